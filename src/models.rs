// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Resource Data Model
//!
//! The outbox treats submitted payloads as opaque JSON resources. The only
//! fields it interprets are:
//!
//! - `resourceType`: selects the remote collection (`{base}/{resourceType}`)
//! - `id`: the remote identity; present once the server has assigned one
//!
//! Everything else is carried through verbatim. The serialized form of a
//! [`Resource`] is the wire format used both for network submission and for
//! queue files on disk.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A resource submitted to the remote endpoint.
///
/// # Example
///
/// ```rust,ignore
/// let obs = Resource::new("Observation").with_field("status", json!("final"));
/// assert!(!obs.has_remote_identity());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resource {
    /// Remote collection name, e.g. `Observation`.
    #[serde(rename = "resourceType")]
    pub resource_type: String,
    /// Identity assigned by the remote service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// All remaining JSON members, untouched.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Resource {
    /// Create an empty resource of the given type with no remote identity.
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: None,
            fields: Map::new(),
        }
    }

    /// Set the remote identity.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Add or replace a JSON member.
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Whether the remote service already knows this resource.
    pub fn has_remote_identity(&self) -> bool {
        self.id.as_deref().is_some_and(|id| !id.is_empty())
    }

    /// Serialize to the wire format.
    pub fn to_wire(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parse from the wire format.
    pub fn from_wire(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
