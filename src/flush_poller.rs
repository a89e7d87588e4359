// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Queue Flush Poller
//!
//! Background task that periodically drains the outbound queue, so queued
//! writes reach the server even when the application issues no new writes.
//!
//! ## Strategy
//!
//! Every `poll_interval` (default 60 s) the poller flushes through the
//! [`QueueingTransport`], so replays follow the same path as a flush triggered
//! by a new write. A failed flush is logged and retried on the next tick.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken` for graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::transport::{QueueingTransport, ResourceTransport};

/// Default interval between flushes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Background flusher for one queueing transport.
pub struct FlushPoller<T> {
    transport: Arc<QueueingTransport<T>>,
    poll_interval: Duration,
}

impl<T: ResourceTransport> FlushPoller<T> {
    pub fn new(transport: Arc<QueueingTransport<T>>) -> Self {
        Self {
            transport,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Run the poller loop until the cancellation token is triggered.
    ///
    /// Should be spawned as a background task:
    /// ```rust,ignore
    /// tokio::spawn(poller.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.poll_interval.as_secs(),
            "Queue flush poller starting"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("Queue flush poller shutting down");
                return;
            }

            self.poll_step().await;

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Queue flush poller shutting down");
                    return;
                }
            }
        }
    }

    /// Execute one flush and log its outcome.
    async fn poll_step(&self) {
        match self.transport.flush().await {
            Ok(0) => self.report_idle(),
            Ok(submitted) => info!(submitted, "Flush poller: replayed queued resources"),
            Err(e) => {
                let status = self.transport.queue().status().ok();
                warn!(
                    error = %e,
                    pending = status.as_ref().map(|s| s.pending),
                    in_flight = status.as_ref().and_then(|s| s.in_flight),
                    "Flush poller: flush failed"
                );
            }
        }
    }

    fn report_idle(&self) {
        match self.transport.queue().status() {
            Ok(status) if status.is_stalled() => warn!(
                pending = status.pending,
                in_flight = status.in_flight,
                "Flush poller: queue stalled behind a failed replay, release the replay token to resume"
            ),
            Ok(_) => debug!("Flush poller: nothing to replay"),
            Err(e) => warn!(error = %e, "Flush poller: failed to read queue status"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Resource;
    use crate::queue::{QueueManager, QueueOptions};
    use crate::storage::StoragePaths;
    use crate::transport::testing::RecordingTransport;
    use serde_json::json;
    use tempfile::TempDir;

    fn transport() -> (TempDir, Arc<QueueingTransport<RecordingTransport>>) {
        let temp = TempDir::new().unwrap();
        let queue = QueueManager::for_host(
            &StoragePaths::new(temp.path()),
            "fhir.example.org",
            QueueOptions::default(),
        );
        let transport = QueueingTransport::new(RecordingTransport::new(), Arc::new(queue));
        (temp, Arc::new(transport))
    }

    fn observation(value: i64) -> Resource {
        Resource::new("Observation").with_field("value", json!(value))
    }

    #[tokio::test]
    async fn poll_step_drains_the_queue() {
        let (_temp, transport) = transport();
        transport.queue().enqueue(&observation(1)).unwrap();
        transport.queue().enqueue(&observation(2)).unwrap();

        let poller = FlushPoller::new(transport.clone());
        poller.poll_step().await;
        poller.poll_step().await;
        assert_eq!(transport.inner().submitted_values(), vec![1, 2]);
        assert_eq!(transport.queue().status().unwrap().pending, 0);
    }

    #[tokio::test]
    async fn failed_replay_leaves_a_stalled_queue_behind() {
        let (_temp, transport) = transport();
        transport.queue().enqueue(&observation(1)).unwrap();
        transport.queue().enqueue(&observation(2)).unwrap();
        transport.inner().fail_next(1);

        let poller = FlushPoller::new(transport.clone());
        poller.poll_step().await;
        poller.poll_step().await;

        // The second tick finds the token held and sends nothing.
        assert_eq!(transport.inner().submitted_values(), vec![1]);
        let status = transport.queue().status().unwrap();
        assert!(status.is_stalled());
        assert_eq!(status.in_flight, Some(1));

        transport.queue().release_in_flight();
        poller.poll_step().await;
        assert_eq!(transport.inner().submitted_values(), vec![1, 1, 2]);
        assert!(!transport.queue().status().unwrap().is_stalled());
    }

    #[tokio::test]
    async fn run_flushes_until_cancelled() {
        let (_temp, transport) = transport();
        transport.queue().enqueue(&observation(1)).unwrap();

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(
            FlushPoller::new(transport.clone())
                .with_interval(Duration::from_millis(10))
                .run(shutdown.clone()),
        );

        for _ in 0..200 {
            if transport.queue().status().unwrap().pending == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        transport.queue().enqueue(&observation(2)).unwrap();
        for _ in 0..200 {
            if transport.queue().status().unwrap().pending == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(transport.inner().submitted_values(), vec![1, 2]);
    }

    #[tokio::test]
    async fn cancelled_poller_exits_without_flushing() {
        let (_temp, transport) = transport();
        transport.queue().enqueue(&observation(1)).unwrap();

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        FlushPoller::new(transport.clone()).run(shutdown).await;

        assert!(transport.inner().calls().is_empty());
        assert_eq!(transport.queue().status().unwrap().pending, 1);
    }
}
