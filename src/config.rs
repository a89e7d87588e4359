// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Environment variable names, defaults, and the loader used by the binary.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `OUTBOX_DATA_DIR` | Root directory for queue files | `./outbox` |
//! | `RESOURCE_BASE_URL` | Base URL of the resource endpoint | Required |
//! | `ENCRYPTED_RESOURCE_BASE_URL` | Base URL receiving envelopes | Required with a certificate |
//! | `ENVELOPE_CERT_PATH` | PEM certificate or public key for envelopes | Unset (no encryption) |
//! | `ENVELOPE_KEY_ID` | Key identifier embedded in envelopes | Empty |
//! | `ENVELOPE_RESOURCE_TYPES` | Comma-separated types to encrypt | Empty (all) |
//! | `OUTBOX_QUEUE_KEY` | Base64 32-byte key sealing queue files | Unset (owner-only files) |
//! | `OUTBOX_RELEASE_ON_FAILURE` | Release the replay token after a failed replay | `false` |
//! | `OUTBOX_FLUSH_INTERVAL_SECS` | Seconds between background flushes | `60` |
//! | `HTTP_TIMEOUT_SECS` | Per-request HTTP timeout | `30` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::path::PathBuf;
use std::time::Duration;

use base64ct::{Base64, Encoding};

use crate::logging::LogFormat;
use crate::queue::{QueueOptions, ReplayFailurePolicy};
use crate::storage::{FileProtection, SealingKey, StoragePaths};

/// Root directory for queue files.
///
/// # Default
/// `./outbox`
pub const DATA_DIR_ENV: &str = "OUTBOX_DATA_DIR";

/// Base URL of the plaintext resource endpoint. Required.
pub const RESOURCE_BASE_URL_ENV: &str = "RESOURCE_BASE_URL";

/// Base URL that receives encrypted envelopes.
pub const ENCRYPTED_BASE_URL_ENV: &str = "ENCRYPTED_RESOURCE_BASE_URL";

/// Path of the certificate (or public key) used to wrap session keys.
/// Encryption is disabled when unset.
pub const ENVELOPE_CERT_PATH_ENV: &str = "ENVELOPE_CERT_PATH";

pub const ENVELOPE_KEY_ID_ENV: &str = "ENVELOPE_KEY_ID";

/// Comma-separated resource types to encrypt; empty means every write.
pub const ENVELOPE_RESOURCE_TYPES_ENV: &str = "ENVELOPE_RESOURCE_TYPES";

/// Base64 AES-256 key. When set, queue files are sealed at rest.
pub const QUEUE_KEY_ENV: &str = "OUTBOX_QUEUE_KEY";

pub const RELEASE_ON_FAILURE_ENV: &str = "OUTBOX_RELEASE_ON_FAILURE";

pub const FLUSH_INTERVAL_ENV: &str = "OUTBOX_FLUSH_INTERVAL_SECS";

pub const HTTP_TIMEOUT_ENV: &str = "HTTP_TIMEOUT_SECS";

pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_DATA_DIR: &str = crate::storage::paths::DATA_ROOT;
pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Envelope settings; present only when a certificate is configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeConfig {
    pub base_url: String,
    pub cert_path: PathBuf,
    pub key_id: Option<String>,
    pub resource_types: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct OutboxConfig {
    pub data_dir: PathBuf,
    pub resource_base_url: String,
    pub envelope: Option<EnvelopeConfig>,
    pub queue_key: Option<SealingKey>,
    pub replay_failure: ReplayFailurePolicy,
    pub flush_interval: Duration,
    pub http_timeout: Duration,
    pub log_format: LogFormat,
}

impl OutboxConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let resource_base_url =
            get(RESOURCE_BASE_URL_ENV).ok_or(ConfigError::Missing(RESOURCE_BASE_URL_ENV))?;

        let envelope = match (get(ENVELOPE_CERT_PATH_ENV), get(ENCRYPTED_BASE_URL_ENV)) {
            (Some(cert_path), Some(base_url)) => Some(EnvelopeConfig {
                base_url,
                cert_path: PathBuf::from(cert_path),
                key_id: get(ENVELOPE_KEY_ID_ENV),
                resource_types: get(ENVELOPE_RESOURCE_TYPES_ENV)
                    .map(|types| {
                        types
                            .split(',')
                            .map(str::trim)
                            .filter(|t| !t.is_empty())
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
            }),
            (Some(_), None) => return Err(ConfigError::Missing(ENCRYPTED_BASE_URL_ENV)),
            (None, Some(_)) => return Err(ConfigError::Missing(ENVELOPE_CERT_PATH_ENV)),
            (None, None) => None,
        };

        let queue_key = get(QUEUE_KEY_ENV)
            .map(|encoded| {
                let bytes = Base64::decode_vec(&encoded).map_err(|e| ConfigError::Invalid {
                    name: QUEUE_KEY_ENV,
                    reason: format!("not base64: {e}"),
                })?;
                SealingKey::from_bytes(&bytes).map_err(|e| ConfigError::Invalid {
                    name: QUEUE_KEY_ENV,
                    reason: e.to_string(),
                })
            })
            .transpose()?;

        let replay_failure = if parse_bool(RELEASE_ON_FAILURE_ENV, get(RELEASE_ON_FAILURE_ENV))? {
            ReplayFailurePolicy::ReleaseToken
        } else {
            ReplayFailurePolicy::HoldToken
        };

        let log_format = match get(LOG_FORMAT_ENV) {
            Some(raw) => raw.parse::<LogFormat>().map_err(|reason| ConfigError::Invalid {
                name: LOG_FORMAT_ENV,
                reason,
            })?,
            None => LogFormat::default(),
        };

        Ok(Self {
            data_dir: PathBuf::from(get(DATA_DIR_ENV).unwrap_or_else(|| DEFAULT_DATA_DIR.to_string())),
            resource_base_url,
            envelope,
            queue_key,
            replay_failure,
            flush_interval: parse_secs(FLUSH_INTERVAL_ENV, get(FLUSH_INTERVAL_ENV), DEFAULT_FLUSH_INTERVAL_SECS)?,
            http_timeout: parse_secs(HTTP_TIMEOUT_ENV, get(HTTP_TIMEOUT_ENV), DEFAULT_HTTP_TIMEOUT_SECS)?,
            log_format,
        })
    }

    pub fn storage_paths(&self) -> StoragePaths {
        StoragePaths::new(&self.data_dir)
    }

    pub fn queue_options(&self) -> QueueOptions {
        QueueOptions {
            replay_failure: self.replay_failure,
            protection: match &self.queue_key {
                Some(key) => FileProtection::Sealed(key.clone()),
                None => FileProtection::OwnerOnly,
            },
            ..QueueOptions::default()
        }
    }
}

fn parse_bool(name: &'static str, value: Option<String>) -> Result<bool, ConfigError> {
    match value.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None | Some("false") | Some("0") | Some("no") => Ok(false),
        Some("true") | Some("1") | Some("yes") => Ok(true),
        Some(other) => Err(ConfigError::Invalid {
            name,
            reason: format!("expected true or false, got {other}"),
        }),
    }
}

fn parse_secs(name: &'static str, value: Option<String>, default: u64) -> Result<Duration, ConfigError> {
    let secs = match value {
        Some(raw) => raw.parse::<u64>().map_err(|e| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        })?,
        None => default,
    };
    if secs == 0 {
        return Err(ConfigError::Invalid {
            name,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}
