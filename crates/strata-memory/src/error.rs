//! Error taxonomy for the memory hierarchy.
//!
//! Degraded retrieval (no embedder, provider failure) is not an error; it is
//! reported through [`Degraded`][crate::Degraded] alongside the results.

use std::path::PathBuf;

use strata_ctf::CtfError;
use thiserror::Error;

/// Errors returned by [`ChunkManager`][crate::ChunkManager] and
/// [`Store`][crate::Store].
#[derive(Error, Debug)]
pub enum MemoryError {
    /// Malformed CTF header, version or document type.
    #[error("CTF format error: {0}")]
    Format(#[from] CtfError),

    /// Unknown chunk id or a dangling archive reference.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The compressed archive file could not be opened or written.
    #[error("Archive write failed for {path}: {source}")]
    ArchiveWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A structural invariant of the chunk tree was violated.
    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A turn's timestamp precedes the previous turn of the session.
    #[error("Turn timestamp {got} precedes previous turn at {previous}")]
    OutOfOrder { previous: String, got: String },
}
