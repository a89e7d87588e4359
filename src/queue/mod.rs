// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Outbound Queue
//!
//! Ordered, crash-consistent backlog of resources that failed to reach the
//! remote service.
//!
//! - **Enqueue**: persist a resource with the next sequence number
//! - **Dequeue**: resubmit the lowest-sequence resource, delete it on success
//! - **Flush**: dequeue until the queue is idle or a replay fails
//!
//! Delivery is at-least-once: a replay that succeeds remotely but whose
//! deletion fails locally will be sent again.

pub mod entry;
pub mod manager;

pub use entry::QueuedEntry;
pub use manager::{Dequeue, QueueManager, QueueOptions, QueueStatus, ReplayFailurePolicy};
