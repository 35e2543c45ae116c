//! Deferred enrichment: summaries, key facts, themes and embeddings.
//!
//! Every provider call runs under the configured timeout and falls back to
//! [`heuristics`] on failure, except embeddings, which are simply left unset.
//! Results are written back only if the chunk still exists.

use std::collections::BTreeSet;
use std::sync::Arc;

use strata_ctf::SummaryRow;
use strata_types::{Chunk, ChunkPayload, ChunkSummary, ChunkType, Turn, estimate_tokens};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chunk_manager::ChunkManager;
use crate::collaborator::with_timeout;
use crate::heuristics;

#[derive(Default)]
struct Enrichment {
    summary: Option<String>,
    key_facts: Option<BTreeSet<String>>,
    themes: Option<BTreeSet<String>>,
    embedding: Option<Vec<f32>>,
    /// Refreshed child summary document for a Warm parent.
    summary_doc: Option<String>,
}

impl ChunkManager {
    /// Number of chunks waiting for enrichment.
    pub fn pending_tasks(&self) -> usize {
        self.deferred.len()
    }

    /// Drain the deferred queue, enriching one chunk at a time.  Returns how
    /// many tasks ran.
    pub async fn run_pending(&self) -> usize {
        let mut processed = 0;
        while let Some(id) = self.deferred.pop() {
            self.enrich(&id).await;
            processed += 1;
        }
        processed
    }

    /// Spawn a background task that drains the queue whenever work arrives,
    /// until `cancel` fires.
    pub fn spawn_worker(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            info!("Deferred enrichment worker started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    processed = manager.run_pending() => {
                        if processed > 0 {
                            debug!(processed, "Drained deferred queue");
                        }
                    }
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = manager.deferred.notified() => {}
                }
            }
            info!("Deferred enrichment worker stopped");
        })
    }

    async fn enrich(&self, chunk_id: &str) {
        let Some(chunk) = self.snapshot(chunk_id) else {
            debug!(chunk_id = %chunk_id, "Chunk gone before enrichment");
            return;
        };
        let enrichment = match chunk.chunk_type {
            ChunkType::Micro => self.enrich_micro(&chunk).await,
            ChunkType::Mini | ChunkType::Macro => self.enrich_parent(&chunk).await,
        };
        self.apply(chunk_id, enrichment);
    }

    async fn enrich_micro(&self, chunk: &Chunk) -> Enrichment {
        let turns = match self.materialize(chunk) {
            Ok(turns) => turns,
            Err(e) => {
                warn!(chunk_id = %chunk.id, error = %e, "Cannot read chunk for enrichment");
                return Enrichment::default();
            }
        };

        let summary = if self.config.auto_summarize {
            Some(self.summarize(&chunk.id, &turns).await)
        } else {
            None
        };

        let key_facts = if self.config.auto_extract_facts {
            Some(match self.summarizer.get() {
                Some(s) => with_timeout(self.config.provider_timeout(), s.extract_facts(&turns))
                    .await
                    .unwrap_or_else(|e| {
                        warn!(chunk_id = %chunk.id, error = %e, "Fact extraction failed; using heuristic");
                        heuristics::extract_facts(&turns)
                    }),
                None => heuristics::extract_facts(&turns),
            })
        } else {
            None
        };

        let text = match summary.as_deref() {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => heuristics::turns_to_text(&turns),
        };
        let embedding = self.embed(&chunk.id, &text).await;

        Enrichment {
            summary,
            key_facts,
            embedding,
            ..Enrichment::default()
        }
    }

    /// Children are read now, not at consolidation time, so summaries that
    /// landed since then are merged in.
    async fn enrich_parent(&self, chunk: &Chunk) -> Enrichment {
        let children: Vec<Chunk> = chunk
            .child_chunk_ids
            .iter()
            .filter_map(|id| self.snapshot(id))
            .collect();
        let mut views: Vec<ChunkSummary> = children
            .iter()
            .map(|c| c.to_summary(estimate_tokens(&c.summary)))
            .collect();
        let texts: Vec<String> = children
            .iter()
            .map(|c| c.summary.clone())
            .filter(|s| !s.trim().is_empty())
            .collect();

        let summary = if !self.config.auto_summarize {
            None
        } else if texts.is_empty() {
            match self.materialize(chunk) {
                Ok(turns) => Some(self.summarize(&chunk.id, &turns).await),
                Err(e) => {
                    warn!(chunk_id = %chunk.id, error = %e, "Cannot read chunk for enrichment");
                    None
                }
            }
        } else {
            Some(match self.summarizer.get() {
                Some(s) => with_timeout(self.config.provider_timeout(), s.merge_summaries(&texts))
                    .await
                    .unwrap_or_else(|e| {
                        warn!(chunk_id = %chunk.id, error = %e, "Summary merge failed; using heuristic");
                        heuristics::merge_summaries(&texts)
                    }),
                None => heuristics::merge_summaries(&texts),
            })
        };

        // Children archived before they were enriched have nothing to offer;
        // derive themes from the parent's own summary instead.
        if texts.is_empty()
            && let Some(own) = &summary
        {
            let mut view = chunk.to_summary(estimate_tokens(own));
            view.summary = own.clone();
            views = vec![view];
        }

        let themes = if self.config.auto_summarize {
            Some(match self.summarizer.get() {
                Some(s) => with_timeout(self.config.provider_timeout(), s.extract_themes(&views))
                    .await
                    .unwrap_or_else(|e| {
                        warn!(chunk_id = %chunk.id, error = %e, "Theme extraction failed; using heuristic");
                        heuristics::extract_themes(&views)
                    }),
                None => heuristics::extract_themes(&views),
            })
        } else {
            None
        };

        let text = summary.clone().unwrap_or_else(|| chunk.summary.clone());
        let embedding = if text.trim().is_empty() {
            None
        } else {
            self.embed(&chunk.id, &text).await
        };

        let rows: Vec<SummaryRow> = children
            .iter()
            .map(|c| SummaryRow {
                chunk_id: c.id.clone(),
                turn_range: c.turn_range,
                summary: c.summary.clone(),
                themes: c.themes.clone(),
            })
            .collect();

        Enrichment {
            summary,
            themes,
            embedding,
            summary_doc: Some(strata_ctf::encode_summaries(&rows)),
            ..Enrichment::default()
        }
    }

    async fn summarize(&self, chunk_id: &str, turns: &[Turn]) -> String {
        match self.summarizer.get() {
            Some(s) => with_timeout(self.config.provider_timeout(), s.summarize(turns))
                .await
                .unwrap_or_else(|e| {
                    warn!(chunk_id = %chunk_id, error = %e, "Summarizer failed; using heuristic");
                    heuristics::summarize_turns(turns)
                }),
            None => heuristics::summarize_turns(turns),
        }
    }

    async fn embed(&self, chunk_id: &str, text: &str) -> Option<Vec<f32>> {
        if !self.config.auto_embed {
            return None;
        }
        let embedder = self.embedder.get()?;
        match with_timeout(self.config.provider_timeout(), embedder.embed(text)).await {
            Ok(vector) if !vector.is_empty() => Some(vector),
            Ok(_) => {
                warn!(chunk_id = %chunk_id, "Embedder returned an empty vector");
                None
            }
            Err(e) => {
                warn!(chunk_id = %chunk_id, error = %e, "Embedding failed; chunk stays unembedded");
                None
            }
        }
    }

    fn apply(&self, chunk_id: &str, enrichment: Enrichment) {
        {
            let Some(mut entry) = self.registry.get_mut(chunk_id) else {
                debug!(chunk_id = %chunk_id, "Chunk gone before enrichment landed");
                return;
            };
            if let Some(summary) = enrichment.summary.filter(|s| !s.trim().is_empty()) {
                entry.summary = summary;
            }
            if let Some(facts) = enrichment.key_facts {
                entry.key_facts.extend(facts);
            }
            if let Some(themes) = enrichment.themes {
                entry.themes.extend(themes);
            }
            if enrichment.embedding.is_some() {
                entry.embedding = enrichment.embedding;
            }
            if let Some(doc) = enrichment.summary_doc
                && entry.chunk_type != ChunkType::Micro
                && matches!(entry.payload, ChunkPayload::Ctf(_))
            {
                entry.payload = ChunkPayload::Ctf(doc);
            }
        }
        debug!(chunk_id = %chunk_id, "Enriched chunk");
        self.persist(chunk_id);
    }
}
