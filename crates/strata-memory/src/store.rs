//! [`Store`] – the session-facing facade over [`ChunkManager`].
//!
//! The store guards turn ordering, forwards every turn to the manager, and
//! formats context windows plus the manager's live tail as plain text for a
//! prompt.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use strata_types::{Chunk, ContextItem, Turn, TurnId, TurnRange};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::chunk_manager::{ChunkManager, ChunkStats};
use crate::collaborator::{EmbedderSlot, SummarizerSlot};
use crate::config::ChunkConfig;
use crate::error::MemoryError;
use crate::retrieval::ContextWindow;

/// Conversation memory for one session.
pub struct Store {
    manager: Arc<ChunkManager>,
    /// Serializes the ordering check with the append it guards.
    ingest: Mutex<()>,
}

impl Store {
    /// Open the store rooted at `base_path`.
    pub fn open(
        base_path: impl AsRef<Path>,
        config: ChunkConfig,
        summarizer: SummarizerSlot,
        embedder: EmbedderSlot,
    ) -> Result<Self, MemoryError> {
        let manager = ChunkManager::open(base_path, config, summarizer, embedder)?;
        Ok(Self::with_manager(Arc::new(manager)))
    }

    pub fn with_manager(manager: Arc<ChunkManager>) -> Self {
        Self {
            manager,
            ingest: Mutex::new(()),
        }
    }

    pub fn manager(&self) -> &Arc<ChunkManager> {
        &self.manager
    }

    /// Record one turn and return its content-addressed id.
    ///
    /// A zero `token_count` is replaced by an estimate.
    ///
    /// # Errors
    ///
    /// [`MemoryError::OutOfOrder`] if the turn is older than the previous
    /// one; nothing is recorded in that case.
    pub fn add_turn(&self, turn: Turn) -> Result<TurnId, MemoryError> {
        let turn = turn.with_estimated_tokens();
        let _ingest = self.ingest.lock();
        if let Some(previous) = self.manager.last_timestamp()
            && turn.timestamp < previous
        {
            return Err(MemoryError::OutOfOrder {
                previous: previous.to_rfc3339(),
                got: turn.timestamp.to_rfc3339(),
            });
        }

        let id = turn.id();
        self.manager.add_turns([turn])?;
        debug!(turn_id = %id, "Recorded turn");
        Ok(id)
    }

    /// Render up to `max_tokens` of memory as prompt text.
    ///
    /// The newest un-chunked turns come first in priority; whatever budget
    /// remains goes to [`ChunkManager::get_context_window`] with `query`.
    pub async fn get_context_for_prompt(&self, query: &str, max_tokens: usize) -> Result<String, MemoryError> {
        let (live, live_range) = self.manager.live_tail();
        let mut budget = max_tokens;
        let mut tail = Vec::new();
        for turn in live.into_iter().rev() {
            if turn.token_count > budget {
                break;
            }
            budget -= turn.token_count;
            tail.push(turn);
        }
        tail.reverse();
        let tail_range = TurnRange::new(live_range.end - tail.len() as u64, live_range.end);
        let used: usize = tail.iter().map(|t| t.token_count).sum();

        let query = Some(query).filter(|q| !q.trim().is_empty());
        let window = self
            .manager
            .get_context_window(max_tokens - used, query)
            .await?;
        Ok(format_context(&window, &tail, tail_range))
    }

    pub fn expand(&self, chunk_id: &str) -> Result<Chunk, MemoryError> {
        self.manager.expand(chunk_id)
    }

    pub fn stats(&self) -> ChunkStats {
        self.manager.stats()
    }

    pub async fn run_pending(&self) -> usize {
        self.manager.run_pending().await
    }

    pub fn spawn_worker(&self, cancel: CancellationToken) -> JoinHandle<()> {
        self.manager.spawn_worker(cancel)
    }

    /// Prune archive files past the retention window as of today (UTC).
    pub fn prune_archives(&self) -> Result<usize, MemoryError> {
        self.manager.prune_archives(Utc::now().date_naive())
    }
}

fn push_turns(out: &mut String, range: TurnRange, turns: &[Turn]) {
    out.push_str(&format!("## Turns {range}\n"));
    for turn in turns {
        out.push_str(&format!("{}: {}\n", turn.role, turn.content));
    }
}

/// Plain-text rendering of a context window followed by the live tail.
pub fn format_context(window: &ContextWindow, tail: &[Turn], tail_range: TurnRange) -> String {
    let mut out = String::new();
    if let Some(reason) = &window.degraded {
        out.push_str(&format!("(retrieval degraded: {reason})\n\n"));
    }
    for item in &window.items {
        match item {
            ContextItem::Chunk(chunk) => {
                push_turns(&mut out, chunk.turn_range, chunk.turns().unwrap_or_default());
            }
            ContextItem::Summary(summary) => {
                out.push_str(&format!("## Summary of turns {}\n{}\n", summary.turn_range, summary.summary));
                if !summary.themes.is_empty() {
                    let themes: Vec<&str> = summary.themes.iter().map(String::as_str).collect();
                    out.push_str(&format!("Themes: {}\n", themes.join(", ")));
                }
            }
        }
        out.push('\n');
    }
    if !tail.is_empty() {
        push_turns(&mut out, tail_range, tail);
    }
    out.trim_end().to_string()
}
