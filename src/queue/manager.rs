// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Queue Manager
//!
//! FIFO semantics over the sequenced file store with a single-flight replay.
//!
//! ## Replay token
//!
//! `in_flight` holds the entry currently being resubmitted. It is set before
//! the network call for the head entry and cleared on confirmed success.
//! While it is set every `dequeue_first` is a no-op, so at most one replay is
//! ever in progress.
//!
//! What happens to the token when a replay fails is governed by
//! [`ReplayFailurePolicy`]. With the default `HoldToken`, a failed replay
//! pauses all further draining until [`QueueManager::release_in_flight`] is
//! called or the process restarts (the token is never persisted).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::entry::QueuedEntry;
use crate::models::Resource;
use crate::storage::{
    FileProtection, QueueLayout, SequencedFileStore, StorageError, StoragePaths, StorageResult,
};
use crate::storage::paths::{DEFAULT_EXTENSION, DEFAULT_PREFIX};
use crate::transport::{ResourceTransport, TransportError, WriteMode};

/// What to do with the replay token when a replay fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplayFailurePolicy {
    /// Keep the token set: draining pauses until it is released explicitly.
    #[default]
    HoldToken,
    /// Clear the token: the next dequeue retries the same head entry.
    ReleaseToken,
}

/// Queue construction options.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub prefix: String,
    pub extension: String,
    pub replay_failure: ReplayFailurePolicy,
    pub protection: FileProtection,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            extension: DEFAULT_EXTENSION.to_string(),
            replay_failure: ReplayFailurePolicy::default(),
            protection: FileProtection::default(),
        }
    }
}

/// Result of a single dequeue attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dequeue {
    /// The head entry was resubmitted and removed.
    Submitted { sequence: u64 },
    /// Nothing was dequeued: empty queue, unreadable head, or a replay is
    /// already in flight.
    Idle,
}

/// Snapshot of the queue backlog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStatus {
    pub pending: usize,
    pub oldest: Option<u64>,
    pub newest: Option<u64>,
    /// Sequence of the entry holding the replay token.
    pub in_flight: Option<u64>,
    pub oldest_queued_at: Option<DateTime<Utc>>,
}

impl QueueStatus {
    /// Entries are waiting but a replay token is set, so flushes do nothing
    /// until the replay completes or the token is released.
    pub fn is_stalled(&self) -> bool {
        self.pending > 0 && self.in_flight.is_some()
    }
}

/// Durable outbound queue for one remote host.
#[derive(Debug)]
pub struct QueueManager {
    store: SequencedFileStore,
    replay_failure: ReplayFailurePolicy,
    in_flight: Mutex<Option<QueuedEntry>>,
    // Serializes "compute next sequence + write".
    write_lock: Mutex<()>,
}

impl QueueManager {
    pub fn new(store: SequencedFileStore, replay_failure: ReplayFailurePolicy) -> Self {
        Self {
            store,
            replay_failure,
            in_flight: Mutex::new(None),
            write_lock: Mutex::new(()),
        }
    }

    /// Queue for `host` under the given storage root.
    pub fn for_host(paths: &StoragePaths, host: &str, options: QueueOptions) -> Self {
        let layout = QueueLayout::new(paths.queue_dir(host), options.prefix, options.extension);
        Self::new(
            SequencedFileStore::new(layout, options.protection),
            options.replay_failure,
        )
    }

    pub fn store(&self) -> &SequencedFileStore {
        &self.store
    }

    pub fn replay_failure_policy(&self) -> ReplayFailurePolicy {
        self.replay_failure
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, Option<QueuedEntry>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Persist a resource behind everything already queued.
    ///
    /// Errors are returned to the caller; the queue never retries a failed
    /// write on its own.
    pub fn enqueue(&self, resource: &Resource) -> StorageResult<QueuedEntry> {
        let _write = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        self.store.ensure_directory()?;
        let sequence = match self.store.current_range()? {
            Some((_, max)) => max
                .checked_add(1)
                .ok_or_else(|| StorageError::SequenceExhausted {
                    path: self.store.layout().dir().to_path_buf(),
                    last: max,
                })?,
            None => 1,
        };
        let path = self.store.write(resource, sequence)?;

        info!(
            sequence,
            resource_type = %resource.resource_type,
            path = %path.display(),
            "Queued resource for later submission"
        );
        Ok(QueuedEntry::loaded(sequence, path, Arc::new(resource.clone())))
    }

    /// The entry with the lowest sequence number, not yet loaded.
    pub fn first_in_queue(&self) -> StorageResult<Option<QueuedEntry>> {
        let first = self.store.current_range()?.map(|(min, _)| min);
        Ok(first.map(|sequence| QueuedEntry::on_disk(sequence, self.store.entry_path(sequence))))
    }

    /// Try to resubmit the head of the queue through `transport`.
    ///
    /// Returns `Idle` without touching the filesystem when a replay is
    /// already in flight. An unreadable head entry is left in place and also
    /// yields `Idle`; it is not skipped over, so a permanently unreadable
    /// head blocks the entries behind it.
    pub async fn dequeue_first(
        &self,
        transport: &dyn ResourceTransport,
    ) -> Result<Dequeue, TransportError> {
        let (entry, resource) = {
            let mut in_flight = self.lock_in_flight();
            if let Some(current) = in_flight.as_ref() {
                debug!(
                    sequence = current.sequence(),
                    "Dequeue skipped, replay already in flight"
                );
                return Ok(Dequeue::Idle);
            }

            let mut entry = match self.first_in_queue() {
                Ok(Some(entry)) => entry,
                Ok(None) => return Ok(Dequeue::Idle),
                Err(e) => {
                    warn!(error = %e, "Failed to list queue directory");
                    return Ok(Dequeue::Idle);
                }
            };

            let resource = match entry.load(&self.store) {
                Ok(resource) => resource,
                Err(e) => {
                    warn!(
                        sequence = entry.sequence(),
                        error = %e,
                        "Queued resource is unreadable, leaving it at the head of the queue"
                    );
                    return Ok(Dequeue::Idle);
                }
            };

            *in_flight = Some(entry.clone());
            (entry, resource)
        };

        let sequence = entry.sequence();
        let mode = WriteMode::for_resource(&resource);

        match transport.submit(resource, mode).await {
            Ok(_) => {
                let deleted = self.store.delete(entry.path());
                self.lock_in_flight().take();

                if let Err(e) = deleted {
                    // The entry stays on disk and would be replayed again
                    // immediately; stop the drain instead of looping.
                    error!(
                        sequence,
                        error = %e,
                        "Replayed resource could not be removed from the queue"
                    );
                    return Err(TransportError::Queue(e.to_string()));
                }

                info!(sequence, ?mode, "Replayed queued resource");
                Ok(Dequeue::Submitted { sequence })
            }
            Err(e) => {
                warn!(
                    sequence,
                    ?mode,
                    error = %e,
                    policy = ?self.replay_failure,
                    "Replay of queued resource failed"
                );
                if self.replay_failure == ReplayFailurePolicy::ReleaseToken {
                    self.lock_in_flight().take();
                }
                Err(e)
            }
        }
    }

    /// Dequeue repeatedly until the queue is idle or a replay fails.
    ///
    /// Returns the number of entries resubmitted. Entries are drained in
    /// ascending sequence order.
    pub async fn flush(&self, transport: &dyn ResourceTransport) -> Result<usize, TransportError> {
        let mut submitted = 0;
        loop {
            match self.dequeue_first(transport).await? {
                Dequeue::Submitted { .. } => submitted += 1,
                Dequeue::Idle => {
                    if submitted > 0 {
                        info!(submitted, "Queue flushed");
                    }
                    return Ok(submitted);
                }
            }
        }
    }

    /// Whether `resource` is the very payload being replayed right now.
    ///
    /// Identity, not equality: an equal resource submitted by a caller is a
    /// new write.
    pub fn is_replaying(&self, resource: &Arc<Resource>) -> bool {
        self.lock_in_flight()
            .as_ref()
            .and_then(QueuedEntry::resource)
            .is_some_and(|current| Arc::ptr_eq(current, resource))
    }

    /// Clear a replay token left behind by a failed replay.
    ///
    /// Returns the sequence that held it. Must not be called while a replay
    /// is genuinely in progress.
    pub fn release_in_flight(&self) -> Option<u64> {
        let released = self.lock_in_flight().take().map(|entry| entry.sequence());
        if let Some(sequence) = released {
            info!(sequence, "Released replay token");
        }
        released
    }

    pub fn status(&self) -> StorageResult<QueueStatus> {
        let sequences = self.store.sequences()?;
        let oldest = sequences.first().copied();
        Ok(QueueStatus {
            pending: sequences.len(),
            oldest,
            newest: sequences.last().copied(),
            in_flight: self.lock_in_flight().as_ref().map(QueuedEntry::sequence),
            oldest_queued_at: oldest
                .and_then(|sequence| self.store.modified_at(sequence))
                .map(DateTime::<Utc>::from),
        })
    }
}
