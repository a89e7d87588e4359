// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Envelope Encryption
//!
//! Optional wrapping of request bodies before they leave the device.
//!
//! ## Scheme
//!
//! - A fresh 256-bit session key encrypts the serialized resource with
//!   AES-256-CBC (PKCS#7 padding, zero IV; the key is never reused)
//! - The session key is encrypted with the service's RSA public key
//!   (OAEP, SHA-256)
//! - Both ciphertexts travel base64-encoded in an [`Envelope`] together with
//!   the caller's key identifier and the envelope version
//!
//! Encryption happens per send. Queue files always hold the plaintext
//! resource, so a replay is re-encrypted with a new session key.

pub mod envelope;
pub mod public_key;

pub use envelope::{
    EncryptResourceTypes, EncryptionDelegate, Envelope, EnvelopeBuilder, ENVELOPE_VERSION,
};
pub use public_key::PublicKeyCache;

/// Error type for envelope preparation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("invalid symmetric key size: {0} bytes")]
    InvalidKeySize(usize),

    #[error("certificate unavailable: {0}")]
    CertificateUnavailable(String),

    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("untrusted certificate: {0}")]
    UntrustedCertificate(String),

    #[error("symmetric encryption failed: {0}")]
    SymmetricEncryption(String),

    #[error("key encryption failed: {0}")]
    KeyEncryption(String),

    #[error("envelope serialization failed: {0}")]
    Serialization(String),
}
