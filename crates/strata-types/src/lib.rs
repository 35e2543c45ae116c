//! `strata-types` – shared value types for the Strata memory hierarchy.
//!
//! - [`turn`] – [`Turn`], the immutable leaf entity (one message), its
//!   [`Role`] and content-addressed [`TurnId`].
//! - [`chunk`] – [`Chunk`] and its tier-exclusive [`ChunkPayload`], the
//!   [`ChunkSummary`] view used in context windows, and [`ContextItem`].

pub mod chunk;
pub mod turn;

pub use chunk::{
    ArchiveRef, Chunk, ChunkId, ChunkPayload, ChunkSummary, ChunkType, ContextItem, Tier,
    TurnRange,
};
pub use turn::{Role, Turn, TurnId, estimate_tokens};
