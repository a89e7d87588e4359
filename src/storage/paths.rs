// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Path constants and utilities for the on-disk queue layout.

use std::path::{Path, PathBuf};

/// Default root directory for queue storage.
pub const DATA_ROOT: &str = "./outbox";

/// Default queue file prefix.
pub const DEFAULT_PREFIX: &str = "QueuedResource-";

/// Default queue file extension (without the dot).
pub const DEFAULT_EXTENSION: &str = "json";

/// Storage path utilities for the outbox root.
///
/// One queue directory exists per remote host so that two endpoints never
/// share a sequence space.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    root: PathBuf,
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self::new(DATA_ROOT)
    }
}

impl StoragePaths {
    /// Create a new StoragePaths with a custom root (useful for testing).
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Root directory for all queues.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Queue directory for a remote host.
    ///
    /// Characters outside `[A-Za-z0-9.-]` (such as the `:` of a port) are
    /// replaced with `_`.
    pub fn queue_dir(&self, host: &str) -> PathBuf {
        let sanitized: String = host
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join("queues").join(sanitized)
    }
}

/// File naming inside one queue directory: `<prefix><sequence>.<extension>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueLayout {
    dir: PathBuf,
    prefix: String,
    extension: String,
}

impl QueueLayout {
    pub fn new(dir: impl AsRef<Path>, prefix: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            prefix: prefix.into(),
            extension: extension.into(),
        }
    }

    /// Layout with the default prefix and extension.
    pub fn with_defaults(dir: impl AsRef<Path>) -> Self {
        Self::new(dir, DEFAULT_PREFIX, DEFAULT_EXTENSION)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_name(&self, sequence: u64) -> String {
        format!("{}{}.{}", self.prefix, sequence, self.extension)
    }

    pub fn entry_path(&self, sequence: u64) -> PathBuf {
        self.dir.join(self.file_name(sequence))
    }

    /// Recover the sequence number from a file name, or `None` for files
    /// that are not queue entries.
    pub fn parse_sequence(&self, file_name: &str) -> Option<u64> {
        let stem = file_name
            .strip_prefix(self.prefix.as_str())?
            .strip_suffix(self.extension.as_str())?
            .strip_suffix('.')?;
        if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        stem.parse().ok()
    }
}
