// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Handle to one persisted queue entry.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::models::Resource;
use crate::storage::{SequencedFileStore, StorageResult};

/// A queued resource on disk, optionally loaded into memory.
///
/// The resource is held behind an `Arc` once loaded: the same allocation is
/// handed to the transport during replay, which is how the interceptor tells
/// a replay apart from a fresh write carrying equal content.
#[derive(Debug, Clone)]
pub struct QueuedEntry {
    sequence: u64,
    path: PathBuf,
    resource: Option<Arc<Resource>>,
}

impl QueuedEntry {
    /// An entry known to exist on disk but not yet read.
    pub fn on_disk(sequence: u64, path: impl Into<PathBuf>) -> Self {
        Self {
            sequence,
            path: path.into(),
            resource: None,
        }
    }

    /// An entry whose payload is already in memory (e.g. just written).
    pub fn loaded(sequence: u64, path: impl Into<PathBuf>, resource: Arc<Resource>) -> Self {
        Self {
            sequence,
            path: path.into(),
            resource: Some(resource),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn resource(&self) -> Option<&Arc<Resource>> {
        self.resource.as_ref()
    }

    /// Read the payload from disk, keeping it for later calls.
    pub fn load(&mut self, store: &SequencedFileStore) -> StorageResult<Arc<Resource>> {
        if let Some(resource) = &self.resource {
            return Ok(resource.clone());
        }
        let resource = Arc::new(store.read(&self.path)?);
        self.resource = Some(resource.clone());
        Ok(resource)
    }
}
