// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! reqwest-backed resource client.
//!
//! | Operation | Method | URL |
//! |-----------|--------|-----|
//! | create | `POST` | `{base}/{resourceType}` |
//! | update | `PUT` | `{base}/{resourceType}/{id}` |
//! | fetch | `GET` | `{base}/{resourceType}/{id}` |
//!
//! Encrypted writes use the same paths under the encrypted base URL, with an
//! [`Envelope`](crate::crypto::Envelope) as the body.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method};
use tracing::{debug, warn};
use url::Url;

use super::{ResourceTransport, Submitted, TransportError, WriteMode};
use crate::crypto::EnvelopeBuilder;
use crate::models::Resource;

const JSON_CONTENT_TYPE: &str = "application/json";

/// A request ready to be sent.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: Url,
    pub body: Vec<u8>,
    /// Whether `body` is an envelope.
    pub encrypted: bool,
}

#[derive(Debug)]
struct EncryptedEndpoint {
    base_url: Url,
    builder: EnvelopeBuilder,
}

/// HTTP client for the remote resource endpoint.
#[derive(Debug, Clone)]
pub struct HttpResourceClient {
    base_url: Url,
    encrypted: Option<Arc<EncryptedEndpoint>>,
    http: Client,
}

impl HttpResourceClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let base_url = parse_base_url(base_url)?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            encrypted: None,
            http,
        })
    }

    /// Route writes selected by the builder's delegate to `encrypted_base_url`
    /// as envelopes.
    pub fn with_envelope(
        mut self,
        encrypted_base_url: &str,
        builder: EnvelopeBuilder,
    ) -> Result<Self, TransportError> {
        self.encrypted = Some(Arc::new(EncryptedEndpoint {
            base_url: parse_base_url(encrypted_base_url)?,
            builder,
        }));
        Ok(self)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Host (and port, when explicit) of the primary endpoint; used to key
    /// the queue directory.
    pub fn host(&self) -> String {
        let host = self.base_url.host_str().unwrap_or("localhost");
        match self.base_url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    /// Build the request for a write.
    ///
    /// The plaintext body is serialized from `resource` on every call, so a
    /// retried request is never encrypted twice.
    pub fn prepare(
        &self,
        resource: &Resource,
        mode: WriteMode,
    ) -> Result<PreparedRequest, TransportError> {
        let id = match mode {
            WriteMode::Create => None,
            WriteMode::Update => Some(resource.id.as_deref().filter(|id| !id.is_empty()).ok_or_else(
                || TransportError::InvalidRequest("update requires a resource id".to_string()),
            )?),
        };
        let method = match mode {
            WriteMode::Create => Method::POST,
            WriteMode::Update => Method::PUT,
        };
        let plaintext = resource
            .to_wire()
            .map_err(|e| TransportError::InvalidRequest(format!("failed to serialize resource: {e}")))?;

        match &self.encrypted {
            Some(endpoint) if endpoint.builder.should_encrypt(resource, mode) => {
                let body = endpoint.builder.seal_body(&plaintext).inspect_err(|e| {
                    warn!(
                        resource_type = %resource.resource_type,
                        error = %e,
                        "Failed to build encrypted envelope"
                    );
                })?;
                Ok(PreparedRequest {
                    method,
                    url: resource_url(&endpoint.base_url, &resource.resource_type, id)?,
                    body,
                    encrypted: true,
                })
            }
            _ => Ok(PreparedRequest {
                method,
                url: resource_url(&self.base_url, &resource.resource_type, id)?,
                body: plaintext,
                encrypted: false,
            }),
        }
    }

    async fn send(&self, request: PreparedRequest) -> Result<Submitted, TransportError> {
        debug!(
            method = %request.method,
            url = %request.url,
            encrypted = request.encrypted,
            "Sending resource"
        );

        let response = self
            .http
            .request(request.method, request.url)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .header(ACCEPT, JSON_CONTENT_TYPE)
            .body(request.body)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let resource = if body.is_empty() || request.encrypted {
            None
        } else {
            Resource::from_wire(&body).ok()
        };
        Ok(Submitted {
            status: status.as_u16(),
            resource,
        })
    }
}

#[async_trait]
impl ResourceTransport for HttpResourceClient {
    async fn submit(
        &self,
        resource: Arc<Resource>,
        mode: WriteMode,
    ) -> Result<Submitted, TransportError> {
        let request = self.prepare(&resource, mode)?;
        self.send(request).await
    }

    async fn fetch(&self, resource_type: &str, id: &str) -> Result<Resource, TransportError> {
        let url = resource_url(&self.base_url, resource_type, Some(id))?;
        let response = self
            .http
            .get(url)
            .header(ACCEPT, JSON_CONTENT_TYPE)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        Resource::from_wire(&body).map_err(|e| TransportError::InvalidResponse(e.to_string()))
    }
}

fn parse_base_url(raw: &str) -> Result<Url, TransportError> {
    let url = Url::parse(raw)
        .map_err(|e| TransportError::InvalidRequest(format!("invalid base URL {raw}: {e}")))?;
    if url.cannot_be_a_base() {
        return Err(TransportError::InvalidRequest(format!(
            "invalid base URL {raw}: cannot be a base"
        )));
    }
    Ok(url)
}

fn resource_url(base: &Url, resource_type: &str, id: Option<&str>) -> Result<Url, TransportError> {
    let mut url = base.clone();
    {
        let mut segments = url.path_segments_mut().map_err(|_| {
            TransportError::InvalidRequest(format!("invalid base URL {base}: cannot be a base"))
        })?;
        segments.pop_if_empty().push(resource_type);
        if let Some(id) = id {
            segments.push(id);
        }
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{testing, EncryptResourceTypes, Envelope, PublicKeyCache};
    use serde_json::json;

    fn client() -> HttpResourceClient {
        HttpResourceClient::new("https://fhir.example.org/api/fhir/", Duration::from_secs(5)).unwrap()
    }

    fn encrypting_client(cache: PublicKeyCache) -> HttpResourceClient {
        let builder = EnvelopeBuilder::new(
            cache,
            Arc::new(EncryptResourceTypes::only(["Consent"], Some("kid-1".into()))),
        );
        client()
            .with_envelope("https://secure.example.org/encrypted", builder)
            .unwrap()
    }

    #[test]
    fn create_posts_to_collection() {
        let resource = Resource::new("Observation").with_field("status", json!("final"));
        let request = client().prepare(&resource, WriteMode::Create).unwrap();

        assert_eq!(request.method, Method::POST);
        assert_eq!(
            request.url.as_str(),
            "https://fhir.example.org/api/fhir/Observation"
        );
        assert_eq!(request.body, resource.to_wire().unwrap());
        assert!(!request.encrypted);
    }

    #[test]
    fn update_puts_to_instance() {
        let resource = Resource::new("Task").with_id("task 7");
        let request = client().prepare(&resource, WriteMode::Update).unwrap();

        assert_eq!(request.method, Method::PUT);
        assert_eq!(
            request.url.as_str(),
            "https://fhir.example.org/api/fhir/Task/task%207"
        );
    }

    #[test]
    fn update_without_id_is_rejected() {
        let result = client().prepare(&Resource::new("Task"), WriteMode::Update);
        assert!(matches!(result, Err(TransportError::InvalidRequest(_))));
    }

    #[test]
    fn host_includes_explicit_port() {
        assert_eq!(client().host(), "fhir.example.org");
        let local = HttpResourceClient::new("http://127.0.0.1:8080/fhir", Duration::from_secs(1)).unwrap();
        assert_eq!(local.host(), "127.0.0.1:8080");
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(HttpResourceClient::new("not a url", Duration::from_secs(1)).is_err());
        assert!(HttpResourceClient::new("mailto:ops@example.org", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn selected_writes_are_enveloped_and_redirected() {
        let client = encrypting_client(PublicKeyCache::from_pem(testing::public_key_pem()));
        let consent = Resource::new("Consent").with_field("status", json!("active"));

        let request = client.prepare(&consent, WriteMode::Create).unwrap();
        assert!(request.encrypted);
        assert_eq!(
            request.url.as_str(),
            "https://secure.example.org/encrypted/Consent"
        );

        let envelope: Envelope = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(envelope.key_id, "kid-1");
        assert_eq!(testing::open(&envelope), consent.to_wire().unwrap());

        let observation = Resource::new("Observation");
        let plain = client.prepare(&observation, WriteMode::Create).unwrap();
        assert!(!plain.encrypted);
        assert_eq!(plain.body, observation.to_wire().unwrap());
    }

    #[test]
    fn repeated_preparation_never_double_encrypts() {
        let client = encrypting_client(PublicKeyCache::from_pem(testing::public_key_pem()));
        let consent = Resource::new("Consent").with_id("c-1");

        let first = client.prepare(&consent, WriteMode::Update).unwrap();
        let second = client.prepare(&consent, WriteMode::Update).unwrap();
        let first: Envelope = serde_json::from_slice(&first.body).unwrap();
        let second: Envelope = serde_json::from_slice(&second.body).unwrap();

        assert_eq!(testing::open(&first), consent.to_wire().unwrap());
        assert_eq!(testing::open(&second), consent.to_wire().unwrap());
    }

    #[tokio::test]
    async fn encryption_failure_aborts_before_sending() {
        let client = encrypting_client(PublicKeyCache::from_path("/nonexistent/cert.pem"));

        let result = client
            .submit(Arc::new(Resource::new("Consent")), WriteMode::Create)
            .await;
        assert!(matches!(result, Err(TransportError::Encryption(_))));
    }

    #[tokio::test]
    async fn unreachable_server_is_a_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client =
            HttpResourceClient::new(&format!("http://127.0.0.1:{port}/fhir"), Duration::from_secs(2))
                .unwrap();
        let result = client
            .submit(Arc::new(Resource::new("Observation")), WriteMode::Create)
            .await;
        assert!(matches!(result, Err(TransportError::Network(_))));
    }
}
