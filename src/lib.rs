// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Resource Outbox - Durable Offline Write Queue
//!
//! This crate keeps writes of remote resources from being lost while the
//! service is unreachable. Failed writes are persisted to disk in order and
//! replayed, oldest first, before any newer write is sent.
//!
//! ## Modules
//!
//! - `queue` - Sequenced queue with single-flight replay
//! - `storage` - Sequenced file store (atomic, optionally sealed)
//! - `transport` - Transport trait, HTTP client and queueing decorator
//! - `crypto` - Envelope encryption of request bodies
//! - `flush_poller` - Background queue draining

pub mod config;
pub mod crypto;
pub mod error;
pub mod flush_poller;
pub mod logging;
pub mod models;
pub mod queue;
pub mod storage;
pub mod transport;
