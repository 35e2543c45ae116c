//! Read paths over the chunk registry: full-content expansion, semantic
//! ranking and token-budgeted context assembly.
//!
//! Ranking uses cosine similarity between the query embedding and each
//! chunk's stored embedding.  When no [`Embedder`][crate::Embedder] is
//! configured, or the query cannot be embedded, results fall back to
//! recency order and carry a [`Degraded`] marker instead of an error.

use std::fmt;

use strata_types::{Chunk, ChunkPayload, ChunkType, ContextItem, Tier, Turn, TurnRange, estimate_tokens};
use tracing::{debug, warn};

use crate::chunk_manager::ChunkManager;
use crate::collaborator::with_timeout;
use crate::error::MemoryError;

// ─────────────────────────────────────────────────────────────────────────────
// Result types
// ─────────────────────────────────────────────────────────────────────────────

/// Why semantic ranking was replaced by recency order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Degraded {
    NoEmbedder,
    EmbedderFailed(String),
}

impl fmt::Display for Degraded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Degraded::NoEmbedder => f.write_str("no embedder configured"),
            Degraded::EmbedderFailed(reason) => write!(f, "embedder failed: {reason}"),
        }
    }
}

/// Ranked chunks plus an optional degradation marker.
#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    pub chunks: Vec<Chunk>,
    pub degraded: Option<Degraded>,
}

impl Retrieval {
    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

/// Items selected for a prompt, ordered by turn range.
#[derive(Debug, Clone, Default)]
pub struct ContextWindow {
    pub items: Vec<ContextItem>,
    pub degraded: Option<Degraded>,
}

impl ContextWindow {
    pub fn token_count(&self) -> usize {
        self.items.iter().map(ContextItem::token_count).sum()
    }
}

/// Compute the cosine similarity between two equal-length vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` if either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Expansion
// ─────────────────────────────────────────────────────────────────────────────

impl ChunkManager {
    /// Return a detached copy of the chunk with its turns materialised,
    /// whatever tier it lives in.  The registry is never modified.
    ///
    /// # Errors
    ///
    /// - [`MemoryError::NotFound`] for an unknown id or a missing archive
    ///   record.
    /// - [`MemoryError::Format`] when stored CTF cannot be decoded.
    pub fn expand(&self, chunk_id: &str) -> Result<Chunk, MemoryError> {
        let mut chunk = self
            .snapshot(chunk_id)
            .ok_or_else(|| MemoryError::NotFound(format!("chunk {chunk_id}")))?;
        if chunk.tier() != Tier::Hot {
            let turns = self.materialize(&chunk)?;
            chunk.payload = ChunkPayload::Turns(turns);
        }
        Ok(chunk)
    }

    /// Every turn a chunk covers, in order.
    pub(crate) fn materialize(&self, chunk: &Chunk) -> Result<Vec<Turn>, MemoryError> {
        match &chunk.payload {
            ChunkPayload::Turns(turns) => Ok(turns.clone()),
            ChunkPayload::Ctf(blob) if chunk.chunk_type == ChunkType::Micro => {
                Ok(strata_ctf::decode_turns(blob)?)
            }
            ChunkPayload::Ctf(_) => self.materialize_children(chunk),
            ChunkPayload::Archived(reference) => {
                // Parent records carry no turns of their own; their turns
                // live in the records of the Micros below them.
                let record = self.archive.load(reference)?;
                if chunk.chunk_type == ChunkType::Micro || !record.turns.is_empty() {
                    Ok(record.turns)
                } else {
                    self.materialize_children(chunk)
                }
            }
        }
    }

    fn materialize_children(&self, chunk: &Chunk) -> Result<Vec<Turn>, MemoryError> {
        let mut turns = Vec::new();
        for child_id in &chunk.child_chunk_ids {
            let child = self
                .snapshot(child_id)
                .ok_or_else(|| MemoryError::NotFound(format!("child {child_id} of chunk {}", chunk.id)))?;
            turns.extend(self.materialize(&child)?);
        }
        Ok(turns)
    }

    // ── Ranking ──────────────────────────────────────────────────────────────

    /// Up to `limit` chunks most similar to `query`.
    ///
    /// Chunks without an embedding, or whose embedding length differs from
    /// the query's, are not ranked.  Without a usable embedder the `limit`
    /// most recent chunks are returned instead, newest first.
    pub async fn get_relevant(&self, query: &str, limit: usize) -> Retrieval {
        self.rank(query, limit, None).await
    }

    async fn rank(&self, query: &str, limit: usize, tier: Option<Tier>) -> Retrieval {
        let candidates: Vec<Chunk> = self
            .registry
            .iter()
            .filter(|e| tier.is_none_or(|t| e.tier() == t))
            .map(|e| e.value().clone())
            .collect();

        let Some(embedder) = self.embedder.get() else {
            return by_recency(candidates, limit, Degraded::NoEmbedder);
        };
        let query_vec = match with_timeout(self.config.provider_timeout(), embedder.embed(query)).await {
            Ok(v) if !v.is_empty() => v,
            Ok(_) => {
                return by_recency(candidates, limit, Degraded::EmbedderFailed("empty query embedding".into()));
            }
            Err(e) => {
                warn!(error = %e, "Query embedding failed; falling back to recency");
                return by_recency(candidates, limit, Degraded::EmbedderFailed(e.to_string()));
            }
        };

        let mut scored: Vec<(f32, Chunk)> = candidates
            .into_iter()
            .filter_map(|c| {
                let embedding = c.embedding.as_ref()?;
                if embedding.len() != query_vec.len() {
                    return None;
                }
                Some((cosine_similarity(embedding, &query_vec), c))
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(limit);
        Retrieval {
            chunks: scored.into_iter().map(|(_, c)| c).collect(),
            degraded: None,
        }
    }

    // ── Context assembly ─────────────────────────────────────────────────────

    /// Assemble a context window that never exceeds `token_budget`.
    ///
    /// Priority order:
    /// 1. Hot chunks, newest first, each included whole if it fits.
    /// 2. With a non-empty `query`: up to `semantic_candidates` Warm chunks
    ///    ranked against it, expanded to full turns, skipping any that
    ///    overlap content already included.
    /// 3. Macro summaries, newest first, priced by their summary text.
    ///
    /// The result is ordered by turn range.
    pub async fn get_context_window(
        &self,
        token_budget: usize,
        query: Option<&str>,
    ) -> Result<ContextWindow, MemoryError> {
        let mut remaining = token_budget;
        let mut items = Vec::new();
        let mut covered: Vec<TurnRange> = Vec::new();
        let mut degraded = None;

        let mut hot = self.chunks_in_tier(Tier::Hot);
        hot.sort_by(|a, b| b.turn_range.start.cmp(&a.turn_range.start));
        for chunk in hot {
            if chunk.token_count <= remaining {
                remaining -= chunk.token_count;
                covered.push(chunk.turn_range);
                items.push(ContextItem::Chunk(chunk));
            }
        }

        if let Some(query) = query.map(str::trim).filter(|q| !q.is_empty())
            && remaining > 0
        {
            let relevant = self.rank(query, self.config.semantic_candidates, Some(Tier::Warm)).await;
            degraded = relevant.degraded;
            for candidate in relevant.chunks {
                if candidate.token_count > remaining
                    || covered.iter().any(|r| r.overlaps(&candidate.turn_range))
                {
                    continue;
                }
                let expanded = self.expand(&candidate.id)?;
                remaining -= expanded.token_count;
                covered.push(expanded.turn_range);
                items.push(ContextItem::Chunk(expanded));
            }
        }

        let mut macros: Vec<Chunk> = self
            .registry
            .iter()
            .filter(|e| e.chunk_type == ChunkType::Macro && !e.summary.trim().is_empty())
            .map(|e| e.value().clone())
            .collect();
        macros.sort_by(|a, b| b.seq.cmp(&a.seq));
        for chunk in macros {
            let cost = estimate_tokens(&chunk.summary);
            if cost <= remaining {
                remaining -= cost;
                items.push(ContextItem::Summary(chunk.to_summary(cost)));
            }
        }

        items.sort_by_key(|item| item.turn_range().start);
        debug!(
            items = items.len(),
            used = token_budget - remaining,
            budget = token_budget,
            "Assembled context window"
        );
        Ok(ContextWindow { items, degraded })
    }
}

fn by_recency(mut chunks: Vec<Chunk>, limit: usize, reason: Degraded) -> Retrieval {
    chunks.sort_by(|a, b| b.seq.cmp(&a.seq));
    chunks.truncate(limit);
    Retrieval {
        chunks,
        degraded: Some(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::{Collaborator, CollaboratorError, Embedder, EmbedderSlot};
    use crate::config::ChunkConfig;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use strata_types::Role;

    const TOPICS: [&str; 3] = ["bread", "rust", "garden"];

    /// One dimension per topic keyword.
    struct Keywords;

    #[async_trait]
    impl Embedder for Keywords {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError> {
            let lower = text.to_lowercase();
            Ok(TOPICS
                .iter()
                .map(|t| lower.matches(t).count() as f32)
                .collect())
        }
    }

    struct Down;

    #[async_trait]
    impl Embedder for Down {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, CollaboratorError> {
            Err(CollaboratorError::Unavailable("connection refused".into()))
        }
    }

    fn topic_turns(range: std::ops::Range<u64>) -> Vec<Turn> {
        let base = Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap();
        range
            .map(|i| {
                let topic = match i {
                    0..30 => TOPICS[0],
                    30..60 => TOPICS[1],
                    _ => TOPICS[2],
                };
                Turn::new(Role::User, format!("message {i} about {topic}"))
                    .with_timestamp(base + chrono::Duration::seconds(i as i64))
            })
            .collect()
    }

    fn open(dir: &std::path::Path, embedder: EmbedderSlot) -> ChunkManager {
        ChunkManager::open(dir, ChunkConfig::default(), Collaborator::Absent, embedder).unwrap()
    }

    #[test]
    fn cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn expand_every_tier_returns_original_turns() {
        let dir = tempfile::tempdir().unwrap();
        let m = open(dir.path(), Collaborator::Absent);
        let turns: Vec<Turn> = topic_turns(0..100)
            .into_iter()
            .map(Turn::with_estimated_tokens)
            .collect();
        m.add_turns(turns.clone()).unwrap();

        for chunk in m.chunks() {
            let expanded = m.expand(&chunk.id).unwrap();
            assert_eq!(expanded.tier(), Tier::Hot);
            let start = chunk.turn_range.start as usize;
            let end = chunk.turn_range.end as usize;
            assert_eq!(expanded.turns().unwrap(), &turns[start..end], "chunk {}", chunk.id);
        }
    }

    #[test]
    fn expand_unknown_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let m = open(dir.path(), Collaborator::Absent);
        assert!(matches!(m.expand("micro_nope"), Err(MemoryError::NotFound(_))));
    }

    #[test]
    fn expand_with_missing_archive_leaves_registry_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let m = open(dir.path(), Collaborator::Absent);
        m.add_turns(topic_turns(0..100)).unwrap();
        let before = m.chunks();

        for entry in std::fs::read_dir(dir.path().join("archive")).unwrap() {
            std::fs::remove_file(entry.unwrap().path()).unwrap();
        }
        let cold = m.chunks_in_tier(Tier::Cold);
        assert!(!cold.is_empty());
        assert!(matches!(m.expand(&cold[0].id), Err(MemoryError::NotFound(_))));
        assert_eq!(m.chunks(), before);
    }

    #[test]
    fn expand_corrupt_warm_blob_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let m = open(dir.path(), Collaborator::Absent);
        m.add_turns(topic_turns(0..30)).unwrap();
        let warm = m.chunks_in_tier(Tier::Warm);
        let micro = warm.iter().find(|c| c.chunk_type == ChunkType::Micro).unwrap();
        if let Some(mut entry) = m.registry.get_mut(&micro.id) {
            entry.payload = ChunkPayload::Ctf("#CTF v9 turns=1".into());
        }
        assert!(matches!(m.expand(&micro.id), Err(MemoryError::Format(_))));
    }

    #[tokio::test]
    async fn without_embedder_results_are_recent_and_degraded() {
        let dir = tempfile::tempdir().unwrap();
        let m = open(dir.path(), Collaborator::Absent);
        m.add_turns(topic_turns(0..50)).unwrap();

        let result = m.get_relevant("rust", 3).await;
        assert_eq!(result.degraded, Some(Degraded::NoEmbedder));
        assert_eq!(result.chunks.len(), 3);
        let seqs: Vec<u64> = result.chunks.iter().map(|c| c.seq).collect();
        let mut sorted = seqs.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(seqs, sorted);
        let newest = m.chunks().iter().map(|c| c.seq).max().unwrap();
        assert_eq!(seqs[0], newest);
    }

    #[tokio::test]
    async fn failing_embedder_degrades_instead_of_erroring() {
        let dir = tempfile::tempdir().unwrap();
        let m = open(dir.path(), Collaborator::Configured(Arc::new(Down)));
        m.add_turns(topic_turns(0..20)).unwrap();

        let result = m.get_relevant("bread", 5).await;
        assert!(matches!(result.degraded, Some(Degraded::EmbedderFailed(_))));
        assert_eq!(result.chunks.len(), 2);
    }

    #[tokio::test]
    async fn semantic_ranking_prefers_matching_topic() {
        let dir = tempfile::tempdir().unwrap();
        let m = open(dir.path(), Collaborator::Configured(Arc::new(Keywords)));
        m.add_turns(topic_turns(0..60)).unwrap();
        m.run_pending().await;

        let result = m.get_relevant("rust", 2).await;
        assert!(!result.is_degraded());
        assert_eq!(result.chunks.len(), 2);
        for chunk in &result.chunks {
            assert!(chunk.turn_range.start >= 30, "{} is not about rust", chunk.turn_range);
        }
    }

    #[tokio::test]
    async fn context_window_never_exceeds_budget() {
        let dir = tempfile::tempdir().unwrap();
        let m = open(dir.path(), Collaborator::Configured(Arc::new(Keywords)));
        m.add_turns(topic_turns(0..130)).unwrap();
        m.run_pending().await;

        for budget in [0, 1, 7, 49, 50, 51, 100, 137, 250, 1_000, 100_000] {
            for query in [None, Some("garden"), Some("")] {
                let window = m.get_context_window(budget, query).await.unwrap();
                assert!(window.token_count() <= budget, "budget {budget} query {query:?}");
                let starts: Vec<u64> = window.items.iter().map(|i| i.turn_range().start).collect();
                assert!(starts.windows(2).all(|w| w[0] <= w[1]));
            }
        }
    }

    #[tokio::test]
    async fn context_window_prioritises_hot_then_relevant_then_macro() {
        let dir = tempfile::tempdir().unwrap();
        let m = open(dir.path(), Collaborator::Configured(Arc::new(Keywords)));
        m.add_turns(topic_turns(0..130)).unwrap();
        m.run_pending().await;

        let window = m.get_context_window(100_000, Some("garden")).await.unwrap();
        let hot: Vec<_> = window
            .items
            .iter()
            .filter(|i| matches!(i, ContextItem::Chunk(c) if c.turn_range.start >= 110))
            .collect();
        assert_eq!(hot.len(), 2);
        assert!(window.items.iter().any(|i| matches!(i, ContextItem::Summary(s) if s.chunk_type == ChunkType::Macro)));
        let warm = window
            .items
            .iter()
            .filter(|i| matches!(i, ContextItem::Chunk(c) if c.turn_range.end <= 110))
            .count();
        assert!((1..=3).contains(&warm));
        for item in &window.items {
            if let ContextItem::Chunk(c) = item {
                assert!(c.turns().is_some());
            }
        }
    }

    #[tokio::test]
    async fn tight_budget_keeps_newest_hot_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let m = open(dir.path(), Collaborator::Absent);
        m.add_turns(topic_turns(0..20)).unwrap();
        let newest = m.chunks_in_tier(Tier::Hot).pop().unwrap();

        let window = m.get_context_window(newest.token_count, None).await.unwrap();
        assert_eq!(window.items.len(), 1);
        assert_eq!(window.items[0].chunk_id(), newest.id);
    }
}
