//! Pluggable external collaborators: [`Summarizer`] and [`Embedder`].
//!
//! Both are optional.  A slot is a [`Collaborator`], which is either
//! [`Collaborator::Configured`] or [`Collaborator::Absent`]; every call site
//! matches on it and supplies a deterministic fallback from
//! [`heuristics`][crate::heuristics] (or, for embeddings, degrades retrieval
//! to recency).

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use strata_types::{ChunkSummary, Turn};
use thiserror::Error;

/// Failure reported by an external provider.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollaboratorError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("provider call failed: {0}")]
    Failed(String),
    #[error("provider timed out after {0:?}")]
    Timeout(Duration),
}

/// Language-model backed summarisation and extraction.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarise a run of turns.
    async fn summarize(&self, turns: &[Turn]) -> Result<String, CollaboratorError>;

    /// Merge child chunk summaries into one parent summary.
    async fn merge_summaries(&self, summaries: &[String]) -> Result<String, CollaboratorError>;

    /// Pull durable facts out of a run of turns.
    async fn extract_facts(&self, turns: &[Turn]) -> Result<BTreeSet<String>, CollaboratorError>;

    /// Name the recurring themes across a set of chunks.
    async fn extract_themes(&self, chunks: &[ChunkSummary]) -> Result<BTreeSet<String>, CollaboratorError>;
}

/// Maps text to a fixed-length vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError>;
}

/// An optional collaborator with an explicit "absent" variant.
pub enum Collaborator<T: ?Sized> {
    Configured(Arc<T>),
    Absent,
}

impl<T: ?Sized> Collaborator<T> {
    pub fn get(&self) -> Option<&Arc<T>> {
        match self {
            Collaborator::Configured(inner) => Some(inner),
            Collaborator::Absent => None,
        }
    }

    pub fn is_configured(&self) -> bool {
        matches!(self, Collaborator::Configured(_))
    }
}

impl<T: ?Sized> Clone for Collaborator<T> {
    fn clone(&self) -> Self {
        match self {
            Collaborator::Configured(inner) => Collaborator::Configured(Arc::clone(inner)),
            Collaborator::Absent => Collaborator::Absent,
        }
    }
}

impl<T: ?Sized> Default for Collaborator<T> {
    fn default() -> Self {
        Collaborator::Absent
    }
}

impl<T: ?Sized> std::fmt::Debug for Collaborator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Collaborator::Configured(_) => f.write_str("Configured"),
            Collaborator::Absent => f.write_str("Absent"),
        }
    }
}

pub type SummarizerSlot = Collaborator<dyn Summarizer>;
pub type EmbedderSlot = Collaborator<dyn Embedder>;

/// Run a provider future under `timeout`, folding elapsed time into
/// [`CollaboratorError::Timeout`].
pub(crate) async fn with_timeout<T>(
    timeout: Duration,
    fut: impl Future<Output = Result<T, CollaboratorError>>,
) -> Result<T, CollaboratorError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(CollaboratorError::Timeout(timeout)),
    }
}
