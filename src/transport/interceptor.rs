// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Queueing decorator around a [`ResourceTransport`].
//!
//! ## Write policy
//!
//! ```text
//! submit(resource)
//!   ├─ resource is the queue's in-flight replay ──────────► inner.submit
//!   └─ otherwise: flush the queue through this decorator
//!        ├─ flush failed ─► enqueue resource ─► Err(flush error)
//!        └─ flush ok ─────► inner.submit
//!             ├─ ok ──────► Ok
//!             └─ failed ──► enqueue resource ─► Err(transport error)
//! ```
//!
//! A write never reaches the server ahead of older queued writes: the flush
//! and the send that follows it run under one ordering lock, so a write
//! arriving while another task is draining waits for that drain to finish.
//! Replays take the identity fast path and never touch the lock. Reads go
//! straight to the inner transport.
//!
//! Queued writes are replayed with the mode derived from the resource
//! (`Update` when it carries an id). Failures that no retry can fix
//! ([`TransportError::is_retryable`]) are returned without being queued.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use super::{ResourceTransport, Submitted, TransportError, WriteMode};
use crate::models::Resource;
use crate::queue::QueueManager;

/// Transport that routes writes through a durable [`QueueManager`].
pub struct QueueingTransport<T> {
    inner: T,
    queue: Arc<QueueManager>,
    // Held across "flush, then send or enqueue".
    ordering: Mutex<()>,
}

impl<T: ResourceTransport> QueueingTransport<T> {
    pub fn new(inner: T, queue: Arc<QueueManager>) -> Self {
        Self {
            inner,
            queue,
            ordering: Mutex::new(()),
        }
    }

    pub fn queue(&self) -> &Arc<QueueManager> {
        &self.queue
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Drain the backlog. Replays pass back through [`Self::submit`], where
    /// they are recognised and sent directly.
    pub async fn flush(&self) -> Result<usize, TransportError> {
        let _ordered = self.ordering.lock().await;
        self.queue.flush(self).await
    }

    fn enqueue_after_failure(&self, resource: &Resource, cause: &TransportError) {
        if !cause.is_retryable() {
            warn!(
                resource_type = %resource.resource_type,
                error = %cause,
                "Write cannot succeed on retry, not queueing it"
            );
            return;
        }
        if let Err(e) = self.queue.enqueue(resource) {
            // Nothing else holds this payload; the caller's copy is the last.
            error!(
                resource_type = %resource.resource_type,
                error = %e,
                cause = %cause,
                "Failed to queue resource after submission failure, payload dropped"
            );
        }
    }
}

#[async_trait]
impl<T: ResourceTransport> ResourceTransport for QueueingTransport<T> {
    async fn submit(
        &self,
        resource: Arc<Resource>,
        mode: WriteMode,
    ) -> Result<Submitted, TransportError> {
        if self.queue.is_replaying(&resource) {
            return self.inner.submit(resource, mode).await;
        }

        let _ordered = self.ordering.lock().await;

        if let Err(e) = self.queue.flush(self).await {
            warn!(
                resource_type = %resource.resource_type,
                error = %e,
                "Queue flush failed, queueing new write without sending it"
            );
            self.enqueue_after_failure(&resource, &e);
            return Err(e);
        }

        match self.inner.submit(resource.clone(), mode).await {
            Ok(submitted) => {
                debug!(
                    resource_type = %resource.resource_type,
                    status = submitted.status,
                    "Resource submitted"
                );
                Ok(submitted)
            }
            Err(e) => {
                warn!(
                    resource_type = %resource.resource_type,
                    error = %e,
                    "Submission failed, queueing resource for later"
                );
                self.enqueue_after_failure(&resource, &e);
                Err(e)
            }
        }
    }

    async fn fetch(&self, resource_type: &str, id: &str) -> Result<Resource, TransportError> {
        self.inner.fetch(resource_type, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{QueueOptions, ReplayFailurePolicy};
    use crate::storage::StoragePaths;
    use crate::transport::testing::{network_error, RecordingTransport};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    fn interceptor(
        inner: RecordingTransport,
        policy: ReplayFailurePolicy,
    ) -> (TempDir, QueueingTransport<RecordingTransport>) {
        let temp = TempDir::new().unwrap();
        let queue = QueueManager::for_host(
            &StoragePaths::new(temp.path()),
            "fhir.example.org",
            QueueOptions {
                replay_failure: policy,
                ..QueueOptions::default()
            },
        );
        (temp, QueueingTransport::new(inner, Arc::new(queue)))
    }

    fn observation(value: i64) -> Arc<Resource> {
        Arc::new(Resource::new("Observation").with_field("value", json!(value)))
    }

    async fn write<T: ResourceTransport>(
        transport: &QueueingTransport<T>,
        resource: Arc<Resource>,
    ) -> Result<Submitted, TransportError> {
        let mode = WriteMode::for_resource(&resource);
        transport.submit(resource, mode).await
    }

    #[tokio::test]
    async fn write_with_empty_queue_is_sent_directly() {
        let (_temp, transport) = interceptor(RecordingTransport::new(), ReplayFailurePolicy::HoldToken);

        let submitted = write(&transport, observation(1)).await.unwrap();
        assert_eq!(submitted.status, 201);
        assert_eq!(transport.inner().submitted_values(), vec![1]);
        assert_eq!(transport.queue().status().unwrap().pending, 0);
    }

    #[tokio::test]
    async fn failed_write_is_queued_and_error_returned() {
        let inner = RecordingTransport::scripted(vec![Err(network_error())]);
        let (_temp, transport) = interceptor(inner, ReplayFailurePolicy::HoldToken);

        let result = write(&transport, observation(1)).await;
        assert!(matches!(result, Err(TransportError::Network(_))));

        let status = transport.queue().status().unwrap();
        assert_eq!(status.pending, 1);
        assert_eq!(status.in_flight, None);
    }

    #[tokio::test]
    async fn queued_writes_are_replayed_before_the_new_write() {
        let (_temp, transport) = interceptor(RecordingTransport::new(), ReplayFailurePolicy::HoldToken);
        transport.queue().enqueue(&observation(1)).unwrap();
        transport.queue().enqueue(&observation(2)).unwrap();

        write(&transport, observation(3)).await.unwrap();

        // Replays reached the inner transport exactly once each: the
        // identity check sent them directly instead of re-entering flush.
        assert_eq!(transport.inner().submitted_values(), vec![1, 2, 3]);
        assert_eq!(transport.queue().status().unwrap().pending, 0);
    }

    #[tokio::test]
    async fn replayed_payload_bypasses_flush_first() {
        let (_temp, transport) = interceptor(RecordingTransport::new(), ReplayFailurePolicy::HoldToken);
        transport.queue().enqueue(&observation(1)).unwrap();
        transport.queue().enqueue(&observation(2)).unwrap();

        // Park the token on entry 1 with a failed replay.
        transport.inner().fail_next(1);
        assert!(transport.flush().await.is_err());
        let replayed = transport.inner().calls()[0].0.clone();
        assert!(transport.queue().is_replaying(&replayed));
        // Had the replay taken the normal write path, its failure would have
        // appended a duplicate of entry 1.
        assert_eq!(transport.queue().status().unwrap().pending, 2);

        // Submitting that exact allocation goes straight through, without
        // a flush that would otherwise have reached entry 2.
        write(&transport, replayed).await.unwrap();
        assert_eq!(transport.inner().submitted_values(), vec![1, 1]);
        assert_eq!(transport.queue().status().unwrap().pending, 2);
    }

    #[tokio::test]
    async fn flush_failure_queues_new_write_without_sending_it() {
        let inner = RecordingTransport::scripted(vec![Err(TransportError::Rejected {
            status: 503,
            body: "maintenance".into(),
        })]);
        let (_temp, transport) = interceptor(inner, ReplayFailurePolicy::HoldToken);
        transport.queue().enqueue(&observation(1)).unwrap();
        transport.queue().enqueue(&observation(2)).unwrap();

        let result = write(&transport, observation(3)).await;

        // The caller sees the flush's error, not a network error of its own.
        assert!(matches!(
            result,
            Err(TransportError::Rejected { status: 503, .. })
        ));
        assert_eq!(transport.inner().submitted_values(), vec![1]);

        let queue = transport.queue();
        assert_eq!(queue.store().current_range().unwrap(), Some((1, 3)));
        let appended = queue.store().read(queue.store().entry_path(3)).unwrap();
        assert_eq!(appended.fields["value"], json!(3));
    }

    #[tokio::test]
    async fn failed_write_is_replayed_before_the_next_write() {
        let inner = RecordingTransport::scripted(vec![Err(network_error())]);
        let (_temp, transport) = interceptor(inner, ReplayFailurePolicy::HoldToken);

        write(&transport, observation(1)).await.unwrap_err();
        // A direct send failure does not take the replay token.
        write(&transport, observation(2)).await.unwrap();
        assert_eq!(transport.inner().submitted_values(), vec![1, 1, 2]);
        assert_eq!(transport.queue().status().unwrap().pending, 0);
    }

    #[tokio::test]
    async fn failure_then_recovery_drains_in_order() {
        let (_temp, transport) = interceptor(RecordingTransport::new(), ReplayFailurePolicy::ReleaseToken);
        transport.queue().enqueue(&observation(1)).unwrap();
        transport.queue().enqueue(&observation(2)).unwrap();
        transport.inner().fail_next(1);

        assert!(transport.flush().await.is_err());
        assert_eq!(transport.flush().await.unwrap(), 2);

        assert_eq!(transport.inner().submitted_values(), vec![1, 1, 2]);
        assert_eq!(transport.queue().status().unwrap().pending, 0);
    }

    #[tokio::test]
    async fn reads_bypass_the_queue() {
        let inner = RecordingTransport::new();
        let (_temp, transport) = interceptor(inner, ReplayFailurePolicy::HoldToken);
        transport.queue().enqueue(&observation(1)).unwrap();

        let fetched = transport.fetch("Observation", "obs-1").await.unwrap();
        assert_eq!(fetched.id.as_deref(), Some("obs-1"));
        assert_eq!(transport.inner().fetch_count(), 1);
        assert!(transport.inner().calls().is_empty());
        assert_eq!(transport.queue().status().unwrap().pending, 1);
    }

    #[tokio::test]
    async fn malformed_write_is_not_queued() {
        let inner = RecordingTransport::scripted(vec![Err(TransportError::InvalidRequest(
            "update requires a resource id".into(),
        ))]);
        let (_temp, transport) = interceptor(inner, ReplayFailurePolicy::HoldToken);

        let result = transport.submit(observation(1), WriteMode::Update).await;

        assert!(matches!(result, Err(TransportError::InvalidRequest(_))));
        assert_eq!(transport.queue().status().unwrap().pending, 0);
    }

    /// Records every call, then parks the first one until released.
    struct ParkFirstCall {
        recording: RecordingTransport,
        park: AtomicBool,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl ResourceTransport for ParkFirstCall {
        async fn submit(
            &self,
            resource: Arc<Resource>,
            mode: WriteMode,
        ) -> Result<Submitted, TransportError> {
            let outcome = self.recording.submit(resource, mode).await;
            if self.park.swap(false, Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            outcome
        }

        async fn fetch(&self, resource_type: &str, id: &str) -> Result<Resource, TransportError> {
            self.recording.fetch(resource_type, id).await
        }
    }

    #[tokio::test]
    async fn write_during_background_drain_waits_behind_older_entries() {
        let temp = TempDir::new().unwrap();
        let queue = QueueManager::for_host(
            &StoragePaths::new(temp.path()),
            "fhir.example.org",
            QueueOptions::default(),
        );
        let transport = Arc::new(QueueingTransport::new(
            ParkFirstCall {
                recording: RecordingTransport::new(),
                park: AtomicBool::new(true),
                entered: Notify::new(),
                release: Notify::new(),
            },
            Arc::new(queue),
        ));
        transport.queue().enqueue(&observation(1)).unwrap();
        transport.queue().enqueue(&observation(2)).unwrap();

        let drain = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.flush().await })
        };
        transport.inner().entered.notified().await;

        let new_write = {
            let transport = transport.clone();
            tokio::spawn(async move { write(transport.as_ref(), observation(3)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        // Still parked on entry 1: the new write has not gone out.
        assert_eq!(transport.inner().recording.submitted_values(), vec![1]);

        transport.inner().release.notify_one();
        assert_eq!(drain.await.unwrap().unwrap(), 2);
        new_write.await.unwrap().unwrap();

        assert_eq!(transport.inner().recording.submitted_values(), vec![1, 2, 3]);
        assert_eq!(transport.queue().status().unwrap().pending, 0);
    }
}
