//! [`ChunkManager`] – owner of the chunk registry and every tier transition.
//!
//! # Lifecycle
//!
//! ```text
//! turns ──every micro_chunk_size──▶ Micro (Hot)
//!                                     │ more than hot_chunks Hot chunks
//!                                     ▼
//!                                   Micro (Warm, CTF)
//! Micros ─every mini_chunk_interval─▶ Mini  (Warm, summary document)
//! Minis ─every macro_chunk_interval─▶ Macro (Cold) + consumed Minis/Micros archived
//!                                     Hot Micros under a Cold Mini are archived on demotion
//! ```
//!
//! Ingestion is synchronous and never calls a provider: new chunks get token
//! counts immediately and are queued for deferred enrichment (see
//! [`run_pending`][ChunkManager::run_pending]).  Tier swaps replace the
//! payload of a registry entry under that entry's lock, so readers see either
//! the old tier or the new one.
//!
//! # Example
//!
//! ```rust
//! use strata_memory::{ChunkConfig, ChunkManager, Collaborator};
//! use strata_types::{Role, Turn};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let manager = ChunkManager::open(
//!     dir.path(),
//!     ChunkConfig::default(),
//!     Collaborator::Absent,
//!     Collaborator::Absent,
//! )
//! .unwrap();
//!
//! let turns = (0..10).map(|i| Turn::new(Role::User, format!("message {i}")));
//! let created = manager.add_turns(turns).unwrap();
//! assert_eq!(created.len(), 1);
//! assert_eq!(manager.stats().hot_chunks, 1);
//! ```

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use strata_ctf::SummaryRow;
use strata_types::{ArchiveRef, Chunk, ChunkId, ChunkPayload, ChunkType, Tier, Turn, TurnRange};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::archive::{ArchiveRecord, ArchiveStore};
use crate::collaborator::{EmbedderSlot, SummarizerSlot};
use crate::config::ChunkConfig;
use crate::deferred::DeferredQueue;
use crate::error::MemoryError;
use crate::heuristics;
use crate::persist::{LiveTail, TierStore};

/// Keep the saved turns that follow `chunked`, the end of the last Micro.
fn restore_live_tail(saved: Option<LiveTail>, chunked: u64) -> Vec<Turn> {
    let Some(tail) = saved else {
        return Vec::new();
    };
    if tail.start > chunked {
        warn!(start = tail.start, chunked, "Live tail does not follow the chunk registry; dropping it");
        return Vec::new();
    }
    let covered = (chunked - tail.start) as usize;
    tail.turns.into_iter().skip(covered).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Stats
// ─────────────────────────────────────────────────────────────────────────────

/// Point-in-time counters over the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChunkStats {
    pub total_chunks: usize,
    pub micro_chunks: usize,
    pub mini_chunks: usize,
    pub macro_chunks: usize,
    pub hot_chunks: usize,
    pub warm_chunks: usize,
    pub cold_chunks: usize,
    pub total_turns: u64,
    pub hot_tokens: usize,
    pub total_tokens: usize,
    pub pending_tasks: usize,
    pub pending_archival: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// ChunkManager
// ─────────────────────────────────────────────────────────────────────────────

struct IngestState {
    turn_count: u64,
    /// Turns since the last Micro boundary.
    pending_turns: Vec<Turn>,
    last_timestamp: Option<DateTime<Utc>>,
}

/// Creates, consolidates, demotes and archives chunks.
///
/// All registry mutation goes through this type.  The registry is an arena
/// keyed by [`ChunkId`]; parent and child links are ids, never references,
/// so a chunk's representation can be swapped without touching its
/// neighbours.
pub struct ChunkManager {
    pub(crate) config: ChunkConfig,
    pub(crate) summarizer: SummarizerSlot,
    pub(crate) embedder: EmbedderSlot,
    pub(crate) registry: DashMap<ChunkId, Chunk>,
    pub(crate) deferred: DeferredQueue,
    pub(crate) archive: ArchiveStore,
    ingest: Mutex<IngestState>,
    next_seq: AtomicU64,
    pending_archival: Mutex<BTreeSet<ChunkId>>,
    tiers: TierStore,
    persist_lock: Mutex<()>,
}

impl ChunkManager {
    /// Open (or create) a chunk store rooted at `base_path` and reload any
    /// chunks persisted there.
    ///
    /// Chunks still lacking a summary are re-queued for enrichment, and
    /// Macro chunks that never reached the archive are re-queued for
    /// archival.  Turns recorded after the last Micro boundary are restored
    /// from the saved live tail.
    pub fn open(
        base_path: impl AsRef<Path>,
        config: ChunkConfig,
        summarizer: SummarizerSlot,
        embedder: EmbedderSlot,
    ) -> Result<Self, MemoryError> {
        config.validate()?;
        let base = base_path.as_ref();
        let tiers = TierStore::open(base)?;
        let archive = ArchiveStore::open(base.join("archive"))?;

        let mut loaded = tiers.load_all()?;
        loaded.sort_by_key(|c| c.seq);

        let registry = DashMap::new();
        let deferred = DeferredQueue::default();
        let mut pending_archival = BTreeSet::new();
        let mut turn_count = 0;
        let mut next_seq = 0;
        let mut last_timestamp = None;
        for chunk in loaded {
            turn_count = turn_count.max(chunk.turn_range.end);
            next_seq = next_seq.max(chunk.seq + 1);
            last_timestamp = last_timestamp.max(chunk.timestamp_end);
            if chunk.summary.is_empty() && config.schedules_deferred_work() {
                deferred.push(chunk.id.clone());
            }
            if chunk.chunk_type == ChunkType::Macro
                && chunk.tier() != Tier::Cold
                && config.archive_cold_content
            {
                pending_archival.insert(chunk.id.clone());
            }
            registry.insert(chunk.id.clone(), chunk);
        }
        if config.archive_cold_content {
            for entry in registry.iter() {
                let parent_cold = entry
                    .parent_chunk_id
                    .as_ref()
                    .and_then(|p| registry.get(p))
                    .is_some_and(|p| p.tier() == Tier::Cold);
                if parent_cold && entry.tier() == Tier::Warm {
                    pending_archival.insert(entry.id.clone());
                }
            }
        }
        let pending_turns = restore_live_tail(tiers.load_live(), turn_count);
        turn_count += pending_turns.len() as u64;
        last_timestamp = last_timestamp.max(pending_turns.last().map(|t| t.timestamp));
        if !registry.is_empty() || !pending_turns.is_empty() {
            info!(
                chunks = registry.len(),
                turns = turn_count,
                live = pending_turns.len(),
                "Loaded chunk registry"
            );
        }

        Ok(Self {
            config,
            summarizer,
            embedder,
            registry,
            deferred,
            archive,
            ingest: Mutex::new(IngestState {
                turn_count,
                pending_turns,
                last_timestamp,
            }),
            next_seq: AtomicU64::new(next_seq),
            pending_archival: Mutex::new(pending_archival),
            tiers,
            persist_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// Number of turns ingested so far.
    pub fn turn_count(&self) -> u64 {
        self.ingest.lock().turn_count
    }

    /// Turns recorded since the last Micro boundary, oldest first, with the
    /// range they occupy.
    pub fn live_tail(&self) -> (Vec<Turn>, TurnRange) {
        let state = self.ingest.lock();
        let start = state.turn_count - state.pending_turns.len() as u64;
        (state.pending_turns.clone(), TurnRange::new(start, state.turn_count))
    }

    /// Timestamp of the newest turn ingested, including turns restored on
    /// open.
    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.ingest.lock().last_timestamp
    }

    pub fn get_chunk(&self, chunk_id: &str) -> Option<Chunk> {
        self.registry.get(chunk_id).map(|e| e.value().clone())
    }

    /// Every chunk, oldest first by creation order.
    pub fn chunks(&self) -> Vec<Chunk> {
        let mut all: Vec<Chunk> = self.registry.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|c| c.seq);
        all
    }

    /// Chunks currently in `tier`, ordered by turn range.
    pub fn chunks_in_tier(&self, tier: Tier) -> Vec<Chunk> {
        let mut chunks: Vec<Chunk> = self
            .registry
            .iter()
            .filter(|e| e.tier() == tier)
            .map(|e| e.value().clone())
            .collect();
        chunks.sort_by_key(|c| c.turn_range.start);
        chunks
    }

    pub(crate) fn snapshot(&self, chunk_id: &str) -> Option<Chunk> {
        self.get_chunk(chunk_id)
    }

    fn allocate_id(&self, chunk_type: ChunkType) -> (ChunkId, u64) {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let uuid = Uuid::new_v4().simple().to_string();
        (format!("{}_{}", chunk_type, &uuid[..12]), seq)
    }

    /// Write the current state of `chunk_id` to its tier directory.
    /// Failures are logged; the in-memory registry stays authoritative.
    pub(crate) fn persist(&self, chunk_id: &str) {
        let _guard = self.persist_lock.lock();
        let Some(chunk) = self.snapshot(chunk_id) else {
            return;
        };
        if let Err(e) = self.tiers.save(&chunk) {
            tracing::error!(chunk_id = %chunk_id, error = %e, "Failed to persist chunk");
        }
    }

    // ── Ingestion ────────────────────────────────────────────────────────────

    /// Append turns and run every chunking step they trigger.
    ///
    /// After each turn the counter is checked against the three intervals in
    /// order: Micro creation (followed by Hot demotion), then Mini
    /// consolidation, then Macro consolidation.  Returns the ids of chunks
    /// created by this call.
    ///
    /// # Errors
    ///
    /// Only structural invariant violations are returned.  Missing
    /// collaborators and archive failures never surface here.
    pub fn add_turns(&self, turns: impl IntoIterator<Item = Turn>) -> Result<Vec<ChunkId>, MemoryError> {
        let mut state = self.ingest.lock();
        let mut created = Vec::new();
        for turn in turns {
            state.turn_count += 1;
            state.last_timestamp = state.last_timestamp.max(Some(turn.timestamp));
            state.pending_turns.push(turn.with_estimated_tokens());
            let count = state.turn_count;

            if count % self.config.micro_chunk_size == 0 {
                let window = std::mem::take(&mut state.pending_turns);
                created.push(self.create_micro_chunk(count, window));
                self.demote_excess_hot()?;
            }
            if count % self.config.mini_chunk_interval == 0
                && let Some(id) = self.consolidate(ChunkType::Mini)?
            {
                created.push(id);
            }
            if count % self.config.macro_chunk_interval == 0
                && let Some(id) = self.consolidate(ChunkType::Macro)?
            {
                created.push(id);
            }
        }
        let tail = LiveTail {
            start: state.turn_count - state.pending_turns.len() as u64,
            turns: state.pending_turns.clone(),
        };
        if let Err(e) = self.tiers.save_live(&tail) {
            tracing::error!(error = %e, "Failed to persist live tail");
        }
        Ok(created)
    }

    fn create_micro_chunk(&self, end: u64, turns: Vec<Turn>) -> ChunkId {
        let (id, seq) = self.allocate_id(ChunkType::Micro);
        let turn_range = TurnRange::new(end - turns.len() as u64, end);
        let chunk = Chunk {
            id: id.clone(),
            chunk_type: ChunkType::Micro,
            seq,
            turn_range,
            token_count: turns.iter().map(|t| t.token_count).sum(),
            timestamp_start: turns.first().map(|t| t.timestamp),
            timestamp_end: turns.last().map(|t| t.timestamp),
            payload: ChunkPayload::Turns(turns),
            summary: String::new(),
            embedding: None,
            themes: BTreeSet::new(),
            key_facts: BTreeSet::new(),
            parent_chunk_id: None,
            child_chunk_ids: Vec::new(),
        };
        self.registry.insert(id.clone(), chunk);
        self.persist(&id);
        if self.config.schedules_deferred_work() {
            self.deferred.push(id.clone());
        }
        info!(chunk_id = %id, range = %turn_range, "Created micro chunk");
        id
    }

    // ── Demotion ─────────────────────────────────────────────────────────────

    fn demote_excess_hot(&self) -> Result<(), MemoryError> {
        let mut hot: Vec<(u64, ChunkId)> = self
            .registry
            .iter()
            .filter(|e| e.tier() == Tier::Hot)
            .map(|e| (e.turn_range.start, e.id.clone()))
            .collect();
        hot.sort();
        let excess = hot.len().saturating_sub(self.config.hot_chunks);
        for (_, id) in hot.into_iter().take(excess) {
            self.demote_to_warm(&id)?;
            // A Micro whose Mini was archived while it was still Hot follows
            // its parent into the cold tier.
            if self.config.archive_cold_content
                && self.parent_is_cold(&id)
                && let Err(e) = self.archive_chunk(&id)
            {
                warn!(chunk_id = %id, error = %e, "Archival failed; queued for retry");
            }
        }
        Ok(())
    }

    fn parent_is_cold(&self, chunk_id: &str) -> bool {
        let Some(parent) = self.registry.get(chunk_id).and_then(|e| e.parent_chunk_id.clone()) else {
            return false;
        };
        self.registry.get(&parent).is_some_and(|e| e.tier() == Tier::Cold)
    }

    /// Re-encode a Hot chunk's turns as CTF.  Chunks not in Hot are left
    /// alone.
    pub fn demote_to_warm(&self, chunk_id: &str) -> Result<(), MemoryError> {
        {
            let mut entry = self
                .registry
                .get_mut(chunk_id)
                .ok_or_else(|| MemoryError::NotFound(format!("chunk {chunk_id}")))?;
            let ChunkPayload::Turns(turns) = &entry.payload else {
                return Ok(());
            };
            let blob = strata_ctf::encode_turns(turns);
            entry.payload = ChunkPayload::Ctf(blob);
        }
        debug!(chunk_id = %chunk_id, "Demoted chunk hot -> warm");
        self.persist(chunk_id);
        Ok(())
    }

    // ── Consolidation ────────────────────────────────────────────────────────

    /// Merge every unowned chunk one level down into a new `level` chunk.
    ///
    /// Fewer than two candidates is a no-op.  Summaries are merged
    /// heuristically here; the deferred task refines them with the
    /// summarizer and computes the embedding.
    fn consolidate(&self, level: ChunkType) -> Result<Option<ChunkId>, MemoryError> {
        let child_type = level
            .child_type()
            .ok_or_else(|| MemoryError::Invariant(format!("{level} chunks have no children")))?;
        if level == ChunkType::Macro {
            self.retry_pending_archives();
        }

        let mut children: Vec<Chunk> = self
            .registry
            .iter()
            .filter(|e| e.chunk_type == child_type && e.parent_chunk_id.is_none())
            .map(|e| e.value().clone())
            .collect();
        if children.len() < 2 {
            debug!(level = %level, candidates = children.len(), "Skipping consolidation");
            return Ok(None);
        }
        children.sort_by_key(|c| c.turn_range.start);

        let ranges: Vec<TurnRange> = children.iter().map(|c| c.turn_range).collect();
        let turn_range = TurnRange::span_of(&ranges).ok_or_else(|| {
            MemoryError::Invariant(format!("{child_type} chunks for new {level} chunk are not contiguous"))
        })?;
        for child in &children {
            if let Some(missing) = child.child_chunk_ids.iter().find(|id| !self.registry.contains_key(*id)) {
                return Err(MemoryError::Invariant(format!(
                    "chunk {} references missing child {missing}",
                    child.id
                )));
            }
        }

        let (id, seq) = self.allocate_id(level);
        let summaries: Vec<String> = children.iter().map(|c| c.summary.clone()).collect();
        let rows: Vec<SummaryRow> = children
            .iter()
            .map(|c| SummaryRow {
                chunk_id: c.id.clone(),
                turn_range: c.turn_range,
                summary: c.summary.clone(),
                themes: c.themes.clone(),
            })
            .collect();
        let mut parent = Chunk {
            id: id.clone(),
            chunk_type: level,
            seq,
            turn_range,
            payload: ChunkPayload::Ctf(strata_ctf::encode_summaries(&rows)),
            summary: heuristics::merge_summaries(&summaries),
            token_count: children.iter().map(|c| c.token_count).sum(),
            embedding: None,
            timestamp_start: children.first().and_then(|c| c.timestamp_start),
            timestamp_end: children.last().and_then(|c| c.timestamp_end),
            themes: children.iter().flat_map(|c| c.themes.iter().cloned()).collect(),
            key_facts: children.iter().flat_map(|c| c.key_facts.iter().cloned()).collect(),
            parent_chunk_id: None,
            child_chunk_ids: children.iter().map(|c| c.id.clone()).collect(),
        };

        let archive_children = level == ChunkType::Macro && self.config.archive_cold_content;
        if archive_children {
            match self.archive_new(&parent) {
                Ok(reference) => parent.payload = ChunkPayload::Archived(reference),
                Err(e) => {
                    warn!(chunk_id = %id, error = %e, "Macro archival failed; keeping summaries warm and retrying later");
                    self.pending_archival.lock().insert(id.clone());
                }
            }
        }

        self.registry.insert(id.clone(), parent);
        for child in &children {
            if let Some(mut entry) = self.registry.get_mut(&child.id) {
                entry.parent_chunk_id = Some(id.clone());
            }
            self.persist(&child.id);
        }
        self.persist(&id);
        if self.config.schedules_deferred_work() {
            self.deferred.push(id.clone());
        }
        info!(chunk_id = %id, level = %level, range = %turn_range, children = children.len(), "Consolidated chunk");

        if archive_children {
            for child in &children {
                self.archive_consumed(child);
            }
        }
        Ok(Some(id))
    }

    /// Archive a consumed Mini.  Hot Micros under it keep their turns until
    /// demoted.
    fn archive_consumed(&self, child: &Chunk) {
        if let Err(e) = self.archive_chunk(&child.id) {
            warn!(chunk_id = %child.id, error = %e, "Archival failed; queued for retry");
        }
    }

    /// Archive the Warm children of a chunk that just went Cold.
    fn archive_warm_children(&self, chunk: &Chunk) {
        for child in &chunk.child_chunk_ids {
            let warm = self.registry.get(child).is_some_and(|e| e.tier() == Tier::Warm);
            if warm && let Err(e) = self.archive_chunk(child) {
                warn!(chunk_id = %child, error = %e, "Archival failed; queued for retry");
            }
        }
    }

    // ── Archival ─────────────────────────────────────────────────────────────

    fn record_for(chunk: &Chunk, turns: Vec<Turn>) -> ArchiveRecord {
        ArchiveRecord {
            chunk_id: chunk.id.clone(),
            chunk_type: chunk.chunk_type,
            turn_range: chunk.turn_range,
            summary: chunk.summary.clone(),
            themes: chunk.themes.clone(),
            key_facts: chunk.key_facts.clone(),
            child_chunk_ids: chunk.child_chunk_ids.clone(),
            turns,
            archived_at: Utc::now(),
        }
    }

    /// Write an archive record for `chunk`, which need not be registered
    /// yet.  Only Micro records carry turns, so each turn is archived once.
    fn archive_new(&self, chunk: &Chunk) -> Result<ArchiveRef, MemoryError> {
        let turns = match chunk.chunk_type {
            ChunkType::Micro => self.materialize(chunk)?,
            ChunkType::Mini | ChunkType::Macro => Vec::new(),
        };
        self.archive
            .append(&Self::record_for(chunk, turns), Utc::now().date_naive())
    }

    /// Move a chunk's full content into the archive and swap its payload for
    /// an [`ArchiveRef`].  Summary, embedding and metadata are kept.
    ///
    /// A consumed chunk's queued enrichment is cancelled once it is
    /// archived.  On failure the chunk keeps its current payload and joins
    /// the pending-archival set.
    pub fn archive_chunk(&self, chunk_id: &str) -> Result<ArchiveRef, MemoryError> {
        let chunk = self
            .snapshot(chunk_id)
            .ok_or_else(|| MemoryError::NotFound(format!("chunk {chunk_id}")))?;
        if let Some(reference) = chunk.archive_ref() {
            self.pending_archival.lock().remove(chunk_id);
            return Ok(reference.clone());
        }

        let reference = match self.archive_new(&chunk) {
            Ok(r) => r,
            Err(e) => {
                self.pending_archival.lock().insert(chunk_id.to_string());
                return Err(e);
            }
        };
        if let Some(mut entry) = self.registry.get_mut(chunk_id) {
            entry.payload = ChunkPayload::Archived(reference.clone());
        }
        self.pending_archival.lock().remove(chunk_id);
        if chunk.parent_chunk_id.is_some() && self.deferred.cancel(chunk_id) {
            debug!(chunk_id = %chunk_id, "Cancelled deferred enrichment for archived chunk");
        }
        debug!(chunk_id = %chunk_id, file = %reference.file, "Moved chunk to cold tier");
        self.persist(chunk_id);
        if chunk.chunk_type == ChunkType::Mini {
            self.archive_warm_children(&chunk);
        }
        Ok(reference)
    }

    /// Retry every chunk whose archival previously failed.  Returns how many
    /// succeeded.
    pub fn retry_pending_archives(&self) -> usize {
        let pending: Vec<ChunkId> = self.pending_archival.lock().iter().cloned().collect();
        let mut archived = 0;
        for id in pending {
            match self.archive_chunk(&id) {
                Ok(_) => archived += 1,
                Err(MemoryError::NotFound(_)) if self.snapshot(&id).is_none() => {
                    self.pending_archival.lock().remove(&id);
                }
                Err(e) => debug!(chunk_id = %id, error = %e, "Archive retry failed"),
            }
        }
        if archived > 0 {
            info!(archived, "Archived previously pending chunks");
        }
        archived
    }

    pub fn pending_archival(&self) -> Vec<ChunkId> {
        self.pending_archival.lock().iter().cloned().collect()
    }

    /// Apply the retention policy to archive files, relative to `today`.
    pub fn prune_archives(&self, today: NaiveDate) -> Result<usize, MemoryError> {
        let removed = self.archive.prune(self.config.cold_retention_days, today)?;
        if removed > 0 {
            info!(removed, retention_days = self.config.cold_retention_days, "Pruned archive files");
        }
        Ok(removed)
    }

    // ── Stats ────────────────────────────────────────────────────────────────

    pub fn stats(&self) -> ChunkStats {
        let mut stats = ChunkStats {
            total_turns: self.turn_count(),
            pending_tasks: self.deferred.len(),
            pending_archival: self.pending_archival.lock().len(),
            ..ChunkStats::default()
        };
        for entry in self.registry.iter() {
            stats.total_chunks += 1;
            stats.total_tokens += entry.token_count;
            match entry.chunk_type {
                ChunkType::Micro => stats.micro_chunks += 1,
                ChunkType::Mini => stats.mini_chunks += 1,
                ChunkType::Macro => stats.macro_chunks += 1,
            }
            match entry.tier() {
                Tier::Hot => {
                    stats.hot_chunks += 1;
                    stats.hot_tokens += entry.token_count;
                }
                Tier::Warm => stats.warm_chunks += 1,
                Tier::Cold => stats.cold_chunks += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::Collaborator;
    use strata_types::Role;

    fn open(dir: &Path, config: ChunkConfig) -> ChunkManager {
        ChunkManager::open(dir, config, Collaborator::Absent, Collaborator::Absent).unwrap()
    }

    fn turns(range: std::ops::Range<u64>) -> Vec<Turn> {
        range
            .map(|i| Turn::new(if i % 2 == 0 { Role::User } else { Role::Assistant }, format!("turn number {i}")))
            .collect()
    }

    fn ranges(chunks: &[Chunk], chunk_type: ChunkType) -> Vec<(u64, u64)> {
        let mut out: Vec<(u64, u64)> = chunks
            .iter()
            .filter(|c| c.chunk_type == chunk_type)
            .map(|c| (c.turn_range.start, c.turn_range.end))
            .collect();
        out.sort();
        out
    }

    #[test]
    fn hundred_turns_build_the_full_hierarchy() {
        let dir = tempfile::tempdir().unwrap();
        let m = open(dir.path(), ChunkConfig::default());
        m.add_turns(turns(0..100)).unwrap();
        let chunks = m.chunks();

        let micros = ranges(&chunks, ChunkType::Micro);
        assert_eq!(micros.len(), 10);
        assert_eq!(micros[0], (0, 10));
        assert_eq!(micros[9], (90, 100));
        assert_eq!(
            ranges(&chunks, ChunkType::Mini),
            vec![(0, 20), (20, 50), (50, 70), (70, 100)]
        );
        assert_eq!(ranges(&chunks, ChunkType::Macro), vec![(0, 100)]);

        let stats = m.stats();
        assert_eq!(stats.total_turns, 100);
        assert_eq!(stats.hot_chunks, 2);
        assert_eq!(stats.warm_chunks, 0);
        assert_eq!(stats.cold_chunks, 13);
        assert_eq!(stats.pending_archival, 0);
        // Only the two hot micros and the macro still wait for enrichment.
        assert_eq!(stats.pending_tasks, 3);

        let hot: Vec<_> = m.chunks_in_tier(Tier::Hot).iter().map(|c| c.turn_range.start).collect();
        assert_eq!(hot, vec![80, 90]);
        let the_macro = chunks.iter().find(|c| c.chunk_type == ChunkType::Macro).unwrap();
        assert_eq!(the_macro.tier(), Tier::Cold);
    }

    #[test]
    fn only_micro_records_carry_turns() {
        let dir = tempfile::tempdir().unwrap();
        let m = open(dir.path(), ChunkConfig::default());
        m.add_turns(turns(0..100)).unwrap();

        let mut archived_turns = 0;
        for chunk in m.chunks_in_tier(Tier::Cold) {
            let record = m.archive.load(chunk.archive_ref().unwrap()).unwrap();
            assert_eq!(record.child_chunk_ids, chunk.child_chunk_ids);
            match chunk.chunk_type {
                ChunkType::Micro => assert_eq!(record.turns.len(), 10),
                ChunkType::Mini | ChunkType::Macro => assert!(record.turns.is_empty()),
            }
            archived_turns += record.turns.len();
        }
        // Turns 80..100 are still hot.
        assert_eq!(archived_turns, 80);

        let the_macro = m
            .chunks()
            .into_iter()
            .find(|c| c.chunk_type == ChunkType::Macro)
            .unwrap();
        let expanded = m.expand(&the_macro.id).unwrap();
        let contents: Vec<String> = expanded.turns().unwrap().iter().map(|t| t.content.clone()).collect();
        let expected: Vec<String> = (0..100).map(|i| format!("turn number {i}")).collect();
        assert_eq!(contents, expected);
    }

    #[test]
    fn demoted_micros_follow_a_cold_parent_into_the_archive() {
        let dir = tempfile::tempdir().unwrap();
        let m = open(dir.path(), ChunkConfig::default());
        m.add_turns(turns(0..300)).unwrap();

        let stranded: Vec<TurnRange> = m
            .chunks_in_tier(Tier::Warm)
            .into_iter()
            .filter(|c| c.chunk_type == ChunkType::Micro)
            .filter(|c| {
                c.parent_chunk_id
                    .as_ref()
                    .and_then(|p| m.get_chunk(p))
                    .is_some_and(|p| p.tier() == Tier::Cold)
            })
            .map(|c| c.turn_range)
            .collect();
        assert!(stranded.is_empty(), "warm micros under cold minis: {stranded:?}");

        let early = m
            .chunks()
            .into_iter()
            .find(|c| c.chunk_type == ChunkType::Micro && c.turn_range.start == 80)
            .unwrap();
        assert_eq!(early.tier(), Tier::Cold);
        assert_eq!(m.expand(&early.id).unwrap().turns().unwrap().len(), 10);
        assert!(m.pending_archival().is_empty());
    }

    #[test]
    fn parents_tile_their_children_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let m = open(dir.path(), ChunkConfig::default());
        m.add_turns(turns(0..230)).unwrap();

        for parent in m.chunks().iter().filter(|c| c.chunk_type != ChunkType::Micro) {
            let child_ranges: Vec<TurnRange> = parent
                .child_chunk_ids
                .iter()
                .map(|id| m.get_chunk(id).unwrap())
                .inspect(|child| assert_eq!(child.parent_chunk_id.as_deref(), Some(parent.id.as_str())))
                .map(|child| child.turn_range)
                .collect();
            assert_eq!(TurnRange::span_of(&child_ranges), Some(parent.turn_range));
        }
    }

    #[test]
    fn hot_limit_holds_after_every_call() {
        let dir = tempfile::tempdir().unwrap();
        let config = ChunkConfig {
            micro_chunk_size: 3,
            mini_chunk_interval: 7,
            macro_chunk_interval: 20,
            hot_chunks: 1,
            ..ChunkConfig::default()
        };
        let m = open(dir.path(), config);
        for i in 0..60 {
            m.add_turns(turns(i..i + 1)).unwrap();
            assert!(m.stats().hot_chunks <= 1, "after turn {i}");
        }
    }

    #[test]
    fn lone_candidate_consolidates_to_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = ChunkConfig {
            micro_chunk_size: 10,
            mini_chunk_interval: 10,
            macro_chunk_interval: 10,
            ..ChunkConfig::default()
        };
        let m = open(dir.path(), config);
        let created = m.add_turns(turns(0..10)).unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(m.chunks().len(), 1);
        assert!(m.chunks()[0].parent_chunk_id.is_none());
    }

    #[test]
    fn turns_between_boundaries_stay_unchunked() {
        let dir = tempfile::tempdir().unwrap();
        let m = open(dir.path(), ChunkConfig::default());
        assert!(m.add_turns(turns(0..9)).unwrap().is_empty());
        assert_eq!(m.turn_count(), 9);
        assert!(m.chunks().is_empty());
    }

    #[test]
    fn archive_failure_defers_the_macro_and_retries() {
        let dir = tempfile::tempdir().unwrap();
        let m = open(dir.path(), ChunkConfig::default());
        m.add_turns(turns(0..99)).unwrap();

        let archive_dir = dir.path().join("archive");
        std::fs::remove_dir_all(&archive_dir).unwrap();
        std::fs::write(&archive_dir, b"blocked").unwrap();

        m.add_turns(turns(99..100)).unwrap();
        let the_macro = m
            .chunks()
            .into_iter()
            .find(|c| c.chunk_type == ChunkType::Macro)
            .unwrap();
        assert_eq!(the_macro.tier(), Tier::Warm);
        let pending = m.pending_archival();
        assert!(pending.contains(&the_macro.id));
        assert_eq!(pending.len(), 13);

        std::fs::remove_file(&archive_dir).unwrap();
        std::fs::create_dir(&archive_dir).unwrap();
        assert_eq!(m.retry_pending_archives(), 13);
        assert!(m.pending_archival().is_empty());
        assert_eq!(m.get_chunk(&the_macro.id).unwrap().tier(), Tier::Cold);
        assert_eq!(m.expand(&the_macro.id).unwrap().turns().unwrap().len(), 100);
    }

    #[test]
    fn archiving_keeps_summary_and_drops_content() {
        let dir = tempfile::tempdir().unwrap();
        let m = open(dir.path(), ChunkConfig::default());
        m.add_turns(turns(0..30)).unwrap();
        let mini = m
            .chunks()
            .into_iter()
            .find(|c| c.chunk_type == ChunkType::Mini)
            .unwrap();
        if let Some(mut entry) = m.registry.get_mut(&mini.id) {
            entry.summary = "early chatter".into();
        }

        let reference = m.archive_chunk(&mini.id).unwrap();
        let archived = m.get_chunk(&mini.id).unwrap();
        assert_eq!(archived.archive_ref(), Some(&reference));
        assert_eq!(archived.summary, "early chatter");
        assert!(archived.ctf_blob().is_none());
        assert_eq!(m.archive_chunk(&mini.id).unwrap(), reference);
    }

    #[test]
    fn reopen_restores_registry_and_counters() {
        let dir = tempfile::tempdir().unwrap();
        let before = {
            let m = open(dir.path(), ChunkConfig::default());
            m.add_turns(turns(0..120)).unwrap();
            m.chunks()
        };

        let m = open(dir.path(), ChunkConfig::default());
        assert_eq!(m.chunks(), before);
        assert_eq!(m.turn_count(), 120);

        let created = m.add_turns(turns(120..130)).unwrap();
        let newest = created
            .iter()
            .filter_map(|id| m.get_chunk(id))
            .find(|c| c.chunk_type == ChunkType::Micro)
            .unwrap();
        assert_eq!(newest.turn_range, TurnRange::new(120, 130));
        assert!(before.iter().all(|c| c.seq < newest.seq));
    }

    #[test]
    fn reopen_restores_live_tail() {
        let dir = tempfile::tempdir().unwrap();
        {
            let m = open(dir.path(), ChunkConfig::default());
            m.add_turns(turns(0..14)).unwrap();
        }
        let m = open(dir.path(), ChunkConfig::default());
        assert_eq!(m.turn_count(), 14);
        let (tail, range) = m.live_tail();
        assert_eq!(range, TurnRange::new(10, 14));
        assert_eq!(tail.last().unwrap().content, "turn number 13");
        assert_eq!(m.last_timestamp(), Some(tail[3].timestamp));
    }

    #[test]
    fn saved_tail_is_trimmed_to_turns_after_the_last_micro() {
        let saved = |start| Some(LiveTail { start, turns: turns(0..4) });
        let kept = restore_live_tail(saved(8), 10);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].content, "turn number 2");
        assert_eq!(restore_live_tail(saved(10), 10).len(), 4);
        assert!(restore_live_tail(saved(12), 10).is_empty());
        assert!(restore_live_tail(None, 10).is_empty());
    }

    #[test]
    fn invalid_config_is_rejected_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let config = ChunkConfig {
            macro_chunk_interval: 5,
            ..ChunkConfig::default()
        };
        let err = ChunkManager::open(dir.path(), config, Collaborator::Absent, Collaborator::Absent);
        assert!(matches!(err, Err(MemoryError::InvalidConfig(_))));
    }

    #[test]
    fn prune_uses_retention_days() {
        let dir = tempfile::tempdir().unwrap();
        let m = open(dir.path(), ChunkConfig::default());
        m.add_turns(turns(0..100)).unwrap();
        let today = Utc::now().date_naive();
        assert_eq!(m.prune_archives(today).unwrap(), 0);
        assert_eq!(m.prune_archives(today + chrono::Days::new(31)).unwrap(), 1);
    }
}
