// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Transport Boundary
//!
//! The outbox never speaks HTTP itself. It depends on a [`ResourceTransport`]
//! that can create or update a resource and fetch one back. Implementations:
//!
//! - [`HttpResourceClient`]: reqwest client against the resource endpoint
//!   (and the encrypted endpoint when an envelope builder is attached)
//! - [`QueueingTransport`]: decorator that routes writes through the
//!   durable queue before delegating to an inner transport

use std::sync::Arc;

use async_trait::async_trait;

use crate::crypto::EnvelopeError;
use crate::models::Resource;

pub mod http;
pub mod interceptor;

pub use http::{HttpResourceClient, PreparedRequest};
pub use interceptor::QueueingTransport;

/// Which write a submission performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// The resource has no remote identity yet.
    Create,
    /// The resource already exists remotely.
    Update,
}

impl WriteMode {
    pub fn for_resource(resource: &Resource) -> Self {
        if resource.has_remote_identity() {
            WriteMode::Update
        } else {
            WriteMode::Create
        }
    }
}

/// Successful write acknowledgement.
#[derive(Debug, Clone, PartialEq)]
pub struct Submitted {
    /// HTTP status (or transport-specific equivalent).
    pub status: u16,
    /// The server's representation, when it returned one.
    pub resource: Option<Resource>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("server rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request preparation failed: {0}")]
    Encryption(#[from] EnvelopeError),

    #[error("queue error: {0}")]
    Queue(String),
}

impl TransportError {
    /// Whether sending the same write again could succeed. Malformed
    /// requests fail identically on every attempt and are never queued.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::InvalidRequest(_))
    }
}

/// Create/update/fetch capability for remote resources.
#[async_trait]
pub trait ResourceTransport: Send + Sync {
    /// Create or update a resource.
    ///
    /// The resource is shared so that a decorator can recognise a payload by
    /// identity (`Arc::ptr_eq`) rather than by value.
    async fn submit(
        &self,
        resource: Arc<Resource>,
        mode: WriteMode,
    ) -> Result<Submitted, TransportError>;

    /// Read a resource. Never queued.
    async fn fetch(&self, resource_type: &str, id: &str) -> Result<Resource, TransportError>;
}
