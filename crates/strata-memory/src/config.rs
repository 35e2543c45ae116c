//! [`ChunkConfig`] – chunking cadence, tier limits and deferred-work switches.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::MemoryError;

/// Tunables for the chunk hierarchy.
///
/// Defaults: a Micro chunk every 10 turns, a Mini every 25, a Macro every
/// 100, and the 2 newest chunks kept Hot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    pub micro_chunk_size: u64,
    pub mini_chunk_interval: u64,
    pub macro_chunk_interval: u64,
    /// Maximum number of chunks holding full turns after ingestion returns.
    pub hot_chunks: usize,
    pub auto_summarize: bool,
    pub auto_extract_facts: bool,
    pub auto_embed: bool,
    /// Move consumed Mini/Micro content into the archive on Macro
    /// consolidation.
    pub archive_cold_content: bool,
    /// Archive files older than this many days are pruned.  `0` disables
    /// pruning.
    pub cold_retention_days: u32,
    /// Maximum number of Warm chunks pulled in by semantic retrieval.
    pub semantic_candidates: usize,
    pub provider_timeout_secs: u64,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            micro_chunk_size: 10,
            mini_chunk_interval: 25,
            macro_chunk_interval: 100,
            hot_chunks: 2,
            auto_summarize: true,
            auto_extract_facts: true,
            auto_embed: true,
            archive_cold_content: true,
            cold_retention_days: 30,
            semantic_candidates: 3,
            provider_timeout_secs: 30,
        }
    }
}

impl ChunkConfig {
    /// Reject cadences that cannot produce a well-formed hierarchy.
    pub fn validate(&self) -> Result<(), MemoryError> {
        if self.micro_chunk_size == 0 || self.mini_chunk_interval == 0 || self.macro_chunk_interval == 0 {
            return Err(MemoryError::InvalidConfig("chunk intervals must be non-zero".into()));
        }
        if self.mini_chunk_interval < self.micro_chunk_size {
            return Err(MemoryError::InvalidConfig(format!(
                "mini_chunk_interval ({}) must be >= micro_chunk_size ({})",
                self.mini_chunk_interval, self.micro_chunk_size
            )));
        }
        if self.macro_chunk_interval < self.mini_chunk_interval {
            return Err(MemoryError::InvalidConfig(format!(
                "macro_chunk_interval ({}) must be >= mini_chunk_interval ({})",
                self.macro_chunk_interval, self.mini_chunk_interval
            )));
        }
        Ok(())
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub(crate) fn schedules_deferred_work(&self) -> bool {
        self.auto_summarize || self.auto_extract_facts || self.auto_embed
    }
}
