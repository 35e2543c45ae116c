//! [`Chunk`] – a compressed unit covering a contiguous range of turns.
//!
//! A chunk lives in exactly one storage [`Tier`] at a time.  The tier is not
//! stored separately; it is derived from the [`ChunkPayload`] variant, so a
//! chunk can never hold turns and an archive reference at once.
//!
//! | payload | tier | contents |
//! |---|---|---|
//! | [`ChunkPayload::Turns`] | Hot | full turns |
//! | [`ChunkPayload::Ctf`] | Warm | CTF-encoded turns (Micro) or child summary document (Mini / Macro) |
//! | [`ChunkPayload::Archived`] | Cold | reference into the compressed archive |

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::turn::Turn;

/// Registry key of a chunk, e.g. `micro_4f0e9a613c2d`.
pub type ChunkId = String;

// ─────────────────────────────────────────────────────────────────────────────
// ChunkType / Tier
// ─────────────────────────────────────────────────────────────────────────────

/// Granularity of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    Micro,
    Mini,
    Macro,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Micro => "micro",
            ChunkType::Mini => "mini",
            ChunkType::Macro => "macro",
        }
    }

    /// The granularity consumed when consolidating into `self`.
    pub fn child_type(&self) -> Option<ChunkType> {
        match self {
            ChunkType::Micro => None,
            ChunkType::Mini => Some(ChunkType::Micro),
            ChunkType::Macro => Some(ChunkType::Mini),
        }
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage tier, derived from the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Hot,
    Warm,
    Cold,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Hot => "hot",
            Tier::Warm => "warm",
            Tier::Cold => "cold",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TurnRange
// ─────────────────────────────────────────────────────────────────────────────

/// Half-open interval `[start, end)` of global turn indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TurnRange {
    pub start: u64,
    pub end: u64,
}

impl TurnRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn overlaps(&self, other: &TurnRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// The exact union of `ranges` when they tile one interval with no gaps
    /// or overlaps (after sorting by start); `None` otherwise.
    pub fn span_of(ranges: &[TurnRange]) -> Option<TurnRange> {
        let mut sorted = ranges.to_vec();
        sorted.sort_by_key(|r| r.start);
        let first = sorted.first()?;
        let mut end = first.end;
        for r in &sorted[1..] {
            if r.start != end {
                return None;
            }
            end = r.end;
        }
        Some(TurnRange::new(first.start, end))
    }
}

impl fmt::Display for TurnRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Payload
// ─────────────────────────────────────────────────────────────────────────────

/// Location of an archived chunk: a dated archive file plus the chunk id of
/// the record inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArchiveRef {
    /// File name inside the archive directory, e.g. `2026-10-16.jsonl.gz`.
    pub file: String,
    pub chunk_id: ChunkId,
}

/// The detailed content of a chunk.  Exactly one variant exists at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum ChunkPayload {
    Turns(Vec<Turn>),
    Ctf(String),
    Archived(ArchiveRef),
}

impl ChunkPayload {
    pub fn tier(&self) -> Tier {
        match self {
            ChunkPayload::Turns(_) => Tier::Hot,
            ChunkPayload::Ctf(_) => Tier::Warm,
            ChunkPayload::Archived(_) => Tier::Cold,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Chunk
// ─────────────────────────────────────────────────────────────────────────────

/// A unit of conversation history at Micro, Mini or Macro granularity.
///
/// `summary`, `embedding` and `key_facts` are filled in by deferred work and
/// may be absent for a while after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub chunk_type: ChunkType,
    /// Monotonic creation sequence; larger is more recent.
    pub seq: u64,
    pub turn_range: TurnRange,
    pub payload: ChunkPayload,
    #[serde(default)]
    pub summary: String,
    pub token_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub themes: BTreeSet<String>,
    #[serde(default)]
    pub key_facts: BTreeSet<String>,
    /// Lookup-only back reference to the consolidating parent.
    #[serde(default)]
    pub parent_chunk_id: Option<ChunkId>,
    #[serde(default)]
    pub child_chunk_ids: Vec<ChunkId>,
}

impl Chunk {
    pub fn tier(&self) -> Tier {
        self.payload.tier()
    }

    pub fn turns(&self) -> Option<&[Turn]> {
        match &self.payload {
            ChunkPayload::Turns(turns) => Some(turns),
            _ => None,
        }
    }

    pub fn ctf_blob(&self) -> Option<&str> {
        match &self.payload {
            ChunkPayload::Ctf(blob) => Some(blob),
            _ => None,
        }
    }

    pub fn archive_ref(&self) -> Option<&ArchiveRef> {
        match &self.payload {
            ChunkPayload::Archived(r) => Some(r),
            _ => None,
        }
    }

    /// Summary view priced at `token_count` tokens.
    pub fn to_summary(&self, token_count: usize) -> ChunkSummary {
        ChunkSummary {
            chunk_id: self.id.clone(),
            chunk_type: self.chunk_type,
            turn_range: self.turn_range,
            summary: self.summary.clone(),
            themes: self.themes.clone(),
            token_count,
            embedding: self.embedding.clone(),
        }
    }
}

/// The summary-only view of a chunk used when full content does not fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkSummary {
    pub chunk_id: ChunkId,
    pub chunk_type: ChunkType,
    pub turn_range: TurnRange,
    pub summary: String,
    pub themes: BTreeSet<String>,
    pub token_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// One element of an assembled context window.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextItem {
    /// A chunk with its turns materialised.
    Chunk(Chunk),
    Summary(ChunkSummary),
}

impl ContextItem {
    pub fn token_count(&self) -> usize {
        match self {
            ContextItem::Chunk(c) => c.token_count,
            ContextItem::Summary(s) => s.token_count,
        }
    }

    pub fn turn_range(&self) -> TurnRange {
        match self {
            ContextItem::Chunk(c) => c.turn_range,
            ContextItem::Summary(s) => s.turn_range,
        }
    }

    pub fn chunk_id(&self) -> &str {
        match self {
            ContextItem::Chunk(c) => &c.id,
            ContextItem::Summary(s) => &s.chunk_id,
        }
    }
}
