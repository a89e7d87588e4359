// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Encrypted envelope construction.

use std::collections::HashSet;
use std::sync::Arc;

use base64ct::{Base64, Encoding};
use cbc::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::Oaep;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::{EnvelopeError, PublicKeyCache};
use crate::models::Resource;
use crate::transport::WriteMode;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

/// Envelope schema version carried in every envelope.
pub const ENVELOPE_VERSION: &str = "1";

/// Session key length (AES-256).
pub const SESSION_KEY_LEN: usize = 32;

/// AES block size; the IV is all zeroes by protocol convention.
const IV_LEN: usize = 16;

/// Wire structure replacing a plaintext request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Identifier of the asymmetric key; empty when none was provided.
    pub key_id: String,
    /// Session key encrypted with RSA-OAEP, base64.
    pub symmetric_key_ciphertext: String,
    /// Serialized resource encrypted with the session key, base64.
    pub message_ciphertext: String,
    pub version: String,
}

/// Policy hooks supplied by the embedding application.
///
/// Both are synchronous queries without side effects.
pub trait EncryptionDelegate: Send + Sync {
    /// Whether this resource, written with this mode, must be encrypted.
    fn should_encrypt(&self, resource: &Resource, mode: WriteMode) -> bool;

    /// Key identifier to embed in the envelope.
    fn key_id(&self) -> Option<String>;
}

/// Delegate that encrypts writes of selected resource types.
#[derive(Debug, Clone, Default)]
pub struct EncryptResourceTypes {
    types: HashSet<String>,
    key_id: Option<String>,
}

impl EncryptResourceTypes {
    /// Encrypt every write.
    pub fn all(key_id: Option<String>) -> Self {
        Self {
            types: HashSet::new(),
            key_id,
        }
    }

    /// Encrypt writes of the listed types only. An empty list means all.
    pub fn only<I, S>(types: I, key_id: Option<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            types: types.into_iter().map(Into::into).collect(),
            key_id,
        }
    }
}

impl EncryptionDelegate for EncryptResourceTypes {
    fn should_encrypt(&self, resource: &Resource, _mode: WriteMode) -> bool {
        self.types.is_empty() || self.types.contains(&resource.resource_type)
    }

    fn key_id(&self) -> Option<String> {
        self.key_id.clone()
    }
}

/// Builds envelopes with a cached public key and a caller-supplied policy.
pub struct EnvelopeBuilder {
    public_key: PublicKeyCache,
    delegate: Arc<dyn EncryptionDelegate>,
}

impl std::fmt::Debug for EnvelopeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeBuilder")
            .field("public_key_loaded", &self.public_key.is_loaded())
            .finish_non_exhaustive()
    }
}

impl EnvelopeBuilder {
    pub fn new(public_key: PublicKeyCache, delegate: Arc<dyn EncryptionDelegate>) -> Self {
        Self {
            public_key,
            delegate,
        }
    }

    pub fn should_encrypt(&self, resource: &Resource, mode: WriteMode) -> bool {
        self.delegate.should_encrypt(resource, mode)
    }

    /// Encrypt `plaintext` under a fresh session key.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Envelope, EnvelopeError> {
        let public_key = self.public_key.get()?;

        let mut session_key = [0u8; SESSION_KEY_LEN];
        OsRng
            .try_fill_bytes(&mut session_key)
            .map_err(|e| EnvelopeError::SymmetricEncryption(format!("no randomness: {e}")))?;

        let message = encrypt_message(&session_key, plaintext)?;
        let wrapped_key = public_key
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), &session_key)
            .map_err(|e| EnvelopeError::KeyEncryption(e.to_string()))?;

        Ok(Envelope {
            key_id: self.delegate.key_id().unwrap_or_default(),
            symmetric_key_ciphertext: Base64::encode_string(&wrapped_key),
            message_ciphertext: Base64::encode_string(&message),
            version: ENVELOPE_VERSION.to_string(),
        })
    }

    /// Encrypt and serialize, producing the replacement request body.
    pub fn seal_body(&self, plaintext: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
        let envelope = self.seal(plaintext)?;
        serde_json::to_vec(&envelope).map_err(|e| EnvelopeError::Serialization(e.to_string()))
    }
}

/// AES-256-CBC with PKCS#7 padding and a zero IV.
pub fn encrypt_message(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    let cipher = Aes256CbcEnc::new_from_slices(key, &[0u8; IV_LEN])
        .map_err(|_| EnvelopeError::InvalidKeySize(key.len()))?;
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}
