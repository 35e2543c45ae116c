//! Append-only compressed archive for Cold-tier content.
//!
//! # Storage layout
//!
//! One file per UTC day under `archive/`, named `<YYYY-MM-DD>.jsonl.gz`.  Each
//! append writes one complete gzip member holding a single JSON line
//! ([`ArchiveRecord`]), so a file is a concatenation of independent members
//! and is read back with [`MultiGzDecoder`].  Existing bytes are never
//! rewritten.
//!
//! Writers to the same file are serialised by a per-file lock; different days
//! do not contend.

use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use strata_types::{ArchiveRef, ChunkId, ChunkType, Turn, TurnRange};
use tracing::{debug, warn};

use crate::error::MemoryError;

const ARCHIVE_SUFFIX: &str = ".jsonl.gz";

/// The pre-archival content of one chunk.  Micro records hold the turns;
/// Mini and Macro records hold metadata and child ids only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub chunk_id: ChunkId,
    pub chunk_type: ChunkType,
    pub turn_range: TurnRange,
    pub summary: String,
    #[serde(default)]
    pub themes: BTreeSet<String>,
    #[serde(default)]
    pub key_facts: BTreeSet<String>,
    #[serde(default)]
    pub child_chunk_ids: Vec<ChunkId>,
    #[serde(default)]
    pub turns: Vec<Turn>,
    pub archived_at: DateTime<Utc>,
}

/// Dated, append-only archive directory.
pub struct ArchiveStore {
    dir: PathBuf,
    writers: DashMap<String, Arc<Mutex<()>>>,
}

impl ArchiveStore {
    /// Open the archive rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, MemoryError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            writers: DashMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_name_for(day: NaiveDate) -> String {
        format!("{}{ARCHIVE_SUFFIX}", day.format("%Y-%m-%d"))
    }

    /// Append `record` to the file for `day` and return its reference.
    ///
    /// # Errors
    ///
    /// [`MemoryError::ArchiveWrite`] when the file cannot be opened or the
    /// compressed member cannot be written.
    pub fn append(&self, record: &ArchiveRecord, day: NaiveDate) -> Result<ArchiveRef, MemoryError> {
        let file = Self::file_name_for(day);
        let path = self.dir.join(&file);
        let lock = Arc::clone(self.writers.entry(file.clone()).or_default().value());
        let _guard = lock.lock();

        let write_err = |source: std::io::Error| MemoryError::ArchiveWrite {
            path: path.clone(),
            source,
        };
        let handle = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(write_err)?;

        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut encoder = GzEncoder::new(handle, Compression::default());
        encoder.write_all(&line).map_err(write_err)?;
        encoder.finish().and_then(|f| f.sync_data()).map_err(write_err)?;

        debug!(chunk_id = %record.chunk_id, file = %file, "Archived chunk");
        Ok(ArchiveRef {
            file,
            chunk_id: record.chunk_id.clone(),
        })
    }

    /// Load the record `reference` points at.  When a chunk was archived more
    /// than once into the same file, the latest record wins.
    ///
    /// # Errors
    ///
    /// [`MemoryError::NotFound`] if the file is missing or holds no record
    /// for the chunk.
    pub fn load(&self, reference: &ArchiveRef) -> Result<ArchiveRecord, MemoryError> {
        let path = self.dir.join(&reference.file);
        let handle = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MemoryError::NotFound(format!(
                    "archive file {} for chunk {}",
                    path.display(),
                    reference.chunk_id
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let mut found = None;
        for line in BufReader::new(MultiGzDecoder::new(handle)).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ArchiveRecord>(&line) {
                Ok(record) if record.chunk_id == reference.chunk_id => found = Some(record),
                Ok(_) => {}
                Err(e) => warn!(file = %reference.file, error = %e, "Skipping malformed archive record"),
            }
        }
        found.ok_or_else(|| {
            MemoryError::NotFound(format!(
                "chunk {} in archive {}",
                reference.chunk_id, reference.file
            ))
        })
    }

    /// Delete archive files dated more than `retention_days` before `today`.
    /// Returns the number of files removed.  `retention_days == 0` keeps
    /// everything.
    pub fn prune(&self, retention_days: u32, today: NaiveDate) -> Result<usize, MemoryError> {
        if retention_days == 0 {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(date) = name
                .strip_suffix(ARCHIVE_SUFFIX)
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            else {
                continue;
            };
            if (today - date).num_days() > i64::from(retention_days) {
                let lock = Arc::clone(self.writers.entry(name.clone()).or_default().value());
                let _guard = lock.lock();
                fs::remove_file(entry.path())?;
                debug!(file = %name, "Pruned expired archive");
                removed += 1;
            }
        }
        Ok(removed)
    }
}
