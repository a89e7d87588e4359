// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Sequenced file store: one payload per file, ordered by the sequence
//! number embedded in the file name.
//!
//! ## Layout
//!
//! ```text
//! <queue dir>/
//!   QueuedResource-1.json
//!   QueuedResource-2.json
//!   QueuedResource-5.json   # gaps are tolerated; order is by number
//! ```
//!
//! The store has no index file. The current range is recovered by listing the
//! directory, which keeps it crash-consistent: a file either exists under its
//! final name or it does not.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::paths::QueueLayout;
use super::sealing::{FileProtection, SealingError};
use crate::models::Resource;

/// Error type for sequenced storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The queue directory cannot be created or listed. Nothing can be queued.
    #[error("queue directory {} is unavailable: {source}", path.display())]
    DirectoryUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize resource: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The entry is missing, unreadable, cannot be unsealed, or is not a
    /// valid resource.
    #[error("failed to read queued resource {}: {reason}", path.display())]
    Deserialization { path: PathBuf, reason: String },

    #[error(transparent)]
    Sealing(#[from] SealingError),

    /// The highest sequence on disk is `u64::MAX`; no later position exists.
    #[error("queue directory {} has no sequence number left after {last}", path.display())]
    SequenceExhausted { path: PathBuf, last: u64 },
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// File-backed FIFO addressed by sequence number.
#[derive(Debug, Clone)]
pub struct SequencedFileStore {
    layout: QueueLayout,
    protection: FileProtection,
}

impl SequencedFileStore {
    pub fn new(layout: QueueLayout, protection: FileProtection) -> Self {
        Self { layout, protection }
    }

    pub fn layout(&self) -> &QueueLayout {
        &self.layout
    }

    /// Create the queue directory (and parents) if absent.
    ///
    /// Safe to call multiple times (idempotent).
    pub fn ensure_directory(&self) -> StorageResult<()> {
        let dir = self.layout.dir();
        fs::create_dir_all(dir).map_err(|source| StorageError::DirectoryUnavailable {
            path: dir.to_path_buf(),
            source,
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(dir, fs::Permissions::from_mode(0o700)).map_err(|source| {
                StorageError::DirectoryUnavailable {
                    path: dir.to_path_buf(),
                    source,
                }
            })?;
        }

        Ok(())
    }

    /// All sequence numbers currently on disk, ascending.
    ///
    /// A missing directory is an empty queue.
    pub fn sequences(&self) -> StorageResult<Vec<u64>> {
        let dir = self.layout.dir();
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StorageError::DirectoryUnavailable {
                    path: dir.to_path_buf(),
                    source,
                })
            }
        };

        let mut sequences = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StorageError::DirectoryUnavailable {
                path: dir.to_path_buf(),
                source,
            })?;
            if let Some(name) = entry.file_name().to_str() {
                if let Some(sequence) = self.layout.parse_sequence(name) {
                    sequences.push(sequence);
                }
            }
        }
        sequences.sort_unstable();
        Ok(sequences)
    }

    /// Lowest and highest sequence present, or `None` when empty.
    pub fn current_range(&self) -> StorageResult<Option<(u64, u64)>> {
        let sequences = self.sequences()?;
        Ok(sequences.first().copied().zip(sequences.last().copied()))
    }

    pub fn file_name(&self, sequence: u64) -> String {
        self.layout.file_name(sequence)
    }

    pub fn entry_path(&self, sequence: u64) -> PathBuf {
        self.layout.entry_path(sequence)
    }

    /// Persist a resource under `sequence` (atomic write via rename).
    ///
    /// The file is created with owner-only permissions and, when sealing is
    /// configured, its contents are sealed before they touch the disk.
    pub fn write(&self, resource: &Resource, sequence: u64) -> StorageResult<PathBuf> {
        let path = self.entry_path(sequence);
        let bytes = self.protection.seal(resource.to_wire()?)?;

        // Dot-prefixed temp names never parse as queue entries.
        let temp_path = self.layout.dir().join(format!(
            ".{}.{}.tmp",
            self.file_name(sequence),
            uuid::Uuid::new_v4()
        ));
        let io_err = |source| StorageError::Io {
            path: temp_path.clone(),
            source,
        };

        {
            let mut file = owner_only_file(&temp_path).map_err(io_err)?;
            file.write_all(&bytes).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
        }

        if let Err(source) = fs::rename(&temp_path, &path) {
            let _ = fs::remove_file(&temp_path);
            return Err(StorageError::Io { path, source });
        }
        Ok(path)
    }

    /// Read a queued resource back from disk.
    pub fn read(&self, path: impl AsRef<Path>) -> StorageResult<Resource> {
        let path = path.as_ref();
        let failed = |reason: String| StorageError::Deserialization {
            path: path.to_path_buf(),
            reason,
        };

        let stored = fs::read(path).map_err(|e| failed(e.to_string()))?;
        let bytes = self
            .protection
            .open(stored)
            .map_err(|e| failed(e.to_string()))?;
        Resource::from_wire(&bytes).map_err(|e| failed(e.to_string()))
    }

    /// Delete a queued entry.
    pub fn delete(&self, path: impl AsRef<Path>) -> StorageResult<()> {
        let path = path.as_ref();
        fs::remove_file(path).map_err(|source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Last modification time of an entry, if it can be determined.
    pub fn modified_at(&self, sequence: u64) -> Option<SystemTime> {
        fs::metadata(self.entry_path(sequence))
            .and_then(|meta| meta.modified())
            .ok()
    }
}

fn owner_only_file(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    options.open(path)
}
