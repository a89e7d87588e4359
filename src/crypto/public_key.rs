// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Loading and caching of the envelope public key.
//!
//! The key normally comes from a certificate bundled with the deployment.
//! Accepted inputs:
//!
//! - PEM `CERTIFICATE` or a raw DER certificate (validity period is checked)
//! - PEM `PUBLIC KEY` (SubjectPublicKeyInfo)
//! - PEM `RSA PUBLIC KEY` (PKCS#1)
//!
//! The parsed key is cached after the first successful load. Failed loads are
//! not cached and are retried on the next request.

use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::SystemTime;

use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;
use x509_cert::der::{Decode, Encode};
use x509_cert::Certificate;

use super::EnvelopeError;

#[derive(Debug, Clone)]
enum KeySource {
    Path(PathBuf),
    Pem(String),
    Loaded,
}

/// Lazily loaded, process-lifetime cache of the RSA public key.
#[derive(Debug)]
pub struct PublicKeyCache {
    source: KeySource,
    key: OnceLock<RsaPublicKey>,
}

impl PublicKeyCache {
    /// Load from a certificate or public key file on first use.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            source: KeySource::Path(path.into()),
            key: OnceLock::new(),
        }
    }

    /// Parse from PEM text on first use.
    pub fn from_pem(pem: impl Into<String>) -> Self {
        Self {
            source: KeySource::Pem(pem.into()),
            key: OnceLock::new(),
        }
    }

    /// Use an already parsed key.
    pub fn from_key(key: RsaPublicKey) -> Self {
        Self {
            source: KeySource::Loaded,
            key: OnceLock::from(key),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.key.get().is_some()
    }

    /// The cached key, loading it if this is the first call.
    pub fn get(&self) -> Result<&RsaPublicKey, EnvelopeError> {
        if let Some(key) = self.key.get() {
            return Ok(key);
        }
        let loaded = self.load()?;
        Ok(self.key.get_or_init(|| loaded))
    }

    fn load(&self) -> Result<RsaPublicKey, EnvelopeError> {
        match &self.source {
            KeySource::Path(path) => {
                let bytes = fs::read(path).map_err(|e| {
                    EnvelopeError::CertificateUnavailable(format!("{}: {e}", path.display()))
                })?;
                parse_public_key(&bytes, SystemTime::now())
            }
            KeySource::Pem(pem) => parse_public_key(pem.as_bytes(), SystemTime::now()),
            KeySource::Loaded => Err(EnvelopeError::CertificateUnavailable(
                "no key source configured".to_string(),
            )),
        }
    }
}

/// Parse an RSA public key from PEM or DER input.
///
/// Certificates must be within their validity period at `now`.
pub fn parse_public_key(input: &[u8], now: SystemTime) -> Result<RsaPublicKey, EnvelopeError> {
    if !input.trim_ascii_start().starts_with(b"-----BEGIN") {
        return public_key_from_certificate(input, now);
    }

    let block = pem::parse(input)
        .map_err(|e| EnvelopeError::InvalidCertificate(format!("invalid PEM: {e}")))?;

    match block.tag() {
        "CERTIFICATE" => public_key_from_certificate(block.contents(), now),
        "PUBLIC KEY" => RsaPublicKey::from_public_key_der(block.contents())
            .map_err(|e| EnvelopeError::InvalidCertificate(format!("invalid public key: {e}"))),
        "RSA PUBLIC KEY" => RsaPublicKey::from_pkcs1_der(block.contents())
            .map_err(|e| EnvelopeError::InvalidCertificate(format!("invalid RSA key: {e}"))),
        other => Err(EnvelopeError::InvalidCertificate(format!(
            "unsupported PEM block: {other}"
        ))),
    }
}

fn public_key_from_certificate(der: &[u8], now: SystemTime) -> Result<RsaPublicKey, EnvelopeError> {
    let certificate = Certificate::from_der(der)
        .map_err(|e| EnvelopeError::InvalidCertificate(format!("invalid certificate: {e}")))?;

    let validity = &certificate.tbs_certificate.validity;
    let not_before = validity.not_before.to_system_time();
    let not_after = validity.not_after.to_system_time();
    if now < not_before || now > not_after {
        return Err(EnvelopeError::UntrustedCertificate(
            "certificate is outside its validity period".to_string(),
        ));
    }

    let spki = certificate
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| EnvelopeError::InvalidCertificate(format!("invalid key info: {e}")))?;
    RsaPublicKey::from_public_key_der(&spki)
        .map_err(|e| EnvelopeError::InvalidCertificate(format!("not an RSA key: {e}")))
}
