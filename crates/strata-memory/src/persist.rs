//! On-disk tier directories.
//!
//! ```text
//! hot/<chunk_id>          full chunk record with turns
//! warm/<chunk_id>.ctf     CTF blob of a Warm Micro chunk
//! warm/<chunk_id>         Warm chunk record (Micro records omit the blob)
//! cold/<chunk_id>         Cold chunk record: summary, embedding, archive_ref
//! live.json               turns since the last Micro boundary
//! ```
//!
//! Records are JSON-encoded [`Chunk`]s written to a temp file and renamed
//! into place.  After a tier transition the files of the previous tier are
//! removed.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strata_types::{Chunk, ChunkPayload, ChunkType, Tier, Turn};
use tracing::{debug, warn};

use crate::error::MemoryError;

const CTF_EXT: &str = "ctf";
const TMP_EXT: &str = "tmp";
const LIVE_FILE: &str = "live.json";

/// Turns not yet part of a Micro chunk.  `start` is the index of the first
/// one in the session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct LiveTail {
    pub start: u64,
    pub turns: Vec<Turn>,
}

pub(crate) struct TierStore {
    root: PathBuf,
}

impl TierStore {
    pub(crate) fn open(root: &Path) -> Result<Self, MemoryError> {
        for tier in [Tier::Hot, Tier::Warm, Tier::Cold] {
            fs::create_dir_all(root.join(tier.as_str()))?;
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn record_path(&self, tier: Tier, id: &str) -> PathBuf {
        self.root.join(tier.as_str()).join(id)
    }

    fn blob_path(&self, id: &str) -> PathBuf {
        self.root.join(Tier::Warm.as_str()).join(format!("{id}.{CTF_EXT}"))
    }

    /// Write `chunk` into its current tier and drop any copy left in another
    /// tier.
    pub(crate) fn save(&self, chunk: &Chunk) -> Result<(), MemoryError> {
        let tier = chunk.tier();
        match (&chunk.payload, chunk.chunk_type) {
            (ChunkPayload::Ctf(blob), ChunkType::Micro) => {
                write_atomic(&self.blob_path(&chunk.id), blob.as_bytes())?;
                let mut record = chunk.clone();
                record.payload = ChunkPayload::Ctf(String::new());
                write_atomic(&self.record_path(tier, &chunk.id), &serde_json::to_vec(&record)?)?;
            }
            _ => {
                write_atomic(&self.record_path(tier, &chunk.id), &serde_json::to_vec(chunk)?)?;
            }
        }
        self.remove_stale(&chunk.id, tier)
    }

    fn remove_stale(&self, id: &str, current: Tier) -> Result<(), MemoryError> {
        for tier in [Tier::Hot, Tier::Warm, Tier::Cold] {
            if tier != current {
                remove_if_exists(&self.record_path(tier, id))?;
            }
        }
        if current != Tier::Warm {
            remove_if_exists(&self.blob_path(id))?;
        }
        Ok(())
    }

    /// Load every readable chunk record.  Malformed files are skipped.
    pub(crate) fn load_all(&self) -> Result<Vec<Chunk>, MemoryError> {
        let mut chunks = Vec::new();
        for tier in [Tier::Hot, Tier::Warm, Tier::Cold] {
            for entry in fs::read_dir(self.root.join(tier.as_str()))? {
                let path = entry?.path();
                if path.extension().is_some() {
                    continue;
                }
                let Ok(bytes) = fs::read(&path) else { continue };
                let mut chunk: Chunk = match serde_json::from_slice(&bytes) {
                    Ok(c) => c,
                    Err(e) => {
                        debug!(path = %path.display(), error = %e, "Skipping malformed chunk record");
                        continue;
                    }
                };
                if let ChunkPayload::Ctf(blob) = &mut chunk.payload
                    && blob.is_empty()
                {
                    match fs::read_to_string(self.blob_path(&chunk.id)) {
                        Ok(stored) => *blob = stored,
                        Err(e) => {
                            debug!(chunk_id = %chunk.id, error = %e, "Skipping warm chunk without blob");
                            continue;
                        }
                    }
                }
                chunks.push(chunk);
            }
        }
        Ok(chunks)
    }

    pub(crate) fn save_live(&self, tail: &LiveTail) -> Result<(), MemoryError> {
        write_atomic(&self.root.join(LIVE_FILE), &serde_json::to_vec(tail)?)
    }

    /// Read the live tail, if one was saved.  An unreadable file is logged
    /// and treated as empty.
    pub(crate) fn load_live(&self) -> Option<LiveTail> {
        let bytes = fs::read(self.root.join(LIVE_FILE)).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(tail) => Some(tail),
            Err(e) => {
                warn!(error = %e, "Ignoring malformed live tail");
                None
            }
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), MemoryError> {
    let tmp = path.with_extension(TMP_EXT);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<(), MemoryError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
