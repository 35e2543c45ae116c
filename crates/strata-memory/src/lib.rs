//! `strata-memory` – hierarchical conversation memory.
//!
//! Turns are grouped into Micro chunks, Micros into Minis and Minis into
//! Macros.  Each chunk lives in one storage tier: Hot (full turns), Warm
//! (CTF-compressed) or Cold (gzip archive with summary and embedding kept in
//! the registry).
//!
//! # Modules
//!
//! - [`chunk_manager`] – [`ChunkManager`]: chunk creation, consolidation,
//!   tier demotion, archival and on-disk persistence.
//! - [`retrieval`] – expansion, cosine-similarity ranking and token-budgeted
//!   [`ContextWindow`] assembly.
//! - [`store`] – [`Store`]: the per-session facade with turn ordering checks
//!   and prompt formatting.
//! - [`archive`] – [`ArchiveStore`]: dated, append-only `.jsonl.gz` files.
//! - [`collaborator`] – the optional [`Summarizer`] and [`Embedder`] seams.
//! - [`heuristics`] – deterministic fallbacks for every summarizer call.
//! - [`config`] – [`ChunkConfig`].

pub mod archive;
pub mod chunk_manager;
pub mod collaborator;
pub mod config;
mod deferred;
mod enrich;
pub mod error;
pub mod heuristics;
mod persist;
pub mod retrieval;
pub mod store;

pub use archive::{ArchiveRecord, ArchiveStore};
pub use chunk_manager::{ChunkManager, ChunkStats};
pub use collaborator::{
    Collaborator, CollaboratorError, Embedder, EmbedderSlot, Summarizer, SummarizerSlot,
};
pub use config::ChunkConfig;
pub use error::MemoryError;
pub use retrieval::{ContextWindow, Degraded, Retrieval, cosine_similarity};
pub use store::{Store, format_context};
