// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use crate::config::ConfigError;
use crate::crypto::EnvelopeError;
use crate::logging::LoggingError;
use crate::storage::StorageError;
use crate::transport::TransportError;

/// Any failure surfaced while assembling or running the outbox.
#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Logging(#[from] LoggingError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub type OutboxResult<T> = Result<T, OutboxError>;
