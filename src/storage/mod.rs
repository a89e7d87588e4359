// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Queue Storage Module
//!
//! Persistent storage for resources that could not be delivered. Each remote
//! host gets its own queue directory, and each queued resource is one file
//! whose name carries its sequence number.
//!
//! ## Storage Layout
//!
//! ```text
//! <OUTBOX_DATA_DIR>/
//!   queues/
//!     {host}/
//!       QueuedResource-{sequence}.json
//! ```
//!
//! ## Protection
//!
//! Files are written owner-only. When a sealing key is configured their
//! contents are additionally sealed with AES-256-GCM (see [`sealing`]).

pub mod paths;
pub mod sealing;
pub mod sequenced_fs;

pub use paths::{QueueLayout, StoragePaths};
pub use sealing::{FileProtection, SealingError, SealingKey};
pub use sequenced_fs::{SequencedFileStore, StorageError, StorageResult};
