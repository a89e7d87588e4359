// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! At-rest protection for queue files.
//!
//! Queue files hold resources that failed to reach the server and may carry
//! personal data. Without platform file-protection classes, the store either
//! restricts files to the owning user or seals their contents with
//! AES-256-GCM under a host-provided key.
//!
//! Sealed layout: `nonce (12 bytes) || ciphertext || tag (16 bytes)`.

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};

/// Length of a sealing key in bytes.
pub const SEALING_KEY_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum SealingError {
    #[error("sealing key must be {SEALING_KEY_LEN} bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("failed to seal queue file")]
    Seal,

    #[error("sealed queue file is truncated or was not produced with this key")]
    Open,
}

/// How queue files are protected at rest.
#[derive(Debug, Clone, Default)]
pub enum FileProtection {
    /// Plain wire format, readable only by the owning user.
    #[default]
    OwnerOnly,
    /// Contents sealed with the given key (and still owner-only).
    Sealed(SealingKey),
}

impl FileProtection {
    pub fn seal(&self, plaintext: Vec<u8>) -> Result<Vec<u8>, SealingError> {
        match self {
            FileProtection::OwnerOnly => Ok(plaintext),
            FileProtection::Sealed(key) => key.seal(plaintext),
        }
    }

    pub fn open(&self, stored: Vec<u8>) -> Result<Vec<u8>, SealingError> {
        match self {
            FileProtection::OwnerOnly => Ok(stored),
            FileProtection::Sealed(key) => key.open(stored),
        }
    }
}

/// AES-256-GCM key for sealing queue files.
#[derive(Clone)]
pub struct SealingKey {
    bytes: [u8; SEALING_KEY_LEN],
}

impl std::fmt::Debug for SealingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SealingKey(..)")
    }
}

impl SealingKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SealingError> {
        let bytes: [u8; SEALING_KEY_LEN] = bytes
            .try_into()
            .map_err(|_| SealingError::InvalidKeyLength(bytes.len()))?;
        Ok(Self { bytes })
    }

    fn aead_key(&self) -> Result<LessSafeKey, SealingError> {
        let unbound = UnboundKey::new(&AES_256_GCM, &self.bytes)
            .map_err(|_| SealingError::InvalidKeyLength(self.bytes.len()))?;
        Ok(LessSafeKey::new(unbound))
    }

    fn seal(&self, mut plaintext: Vec<u8>) -> Result<Vec<u8>, SealingError> {
        let key = self.aead_key()?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        SystemRandom::new()
            .fill(&mut nonce_bytes)
            .map_err(|_| SealingError::Seal)?;

        key.seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::empty(),
            &mut plaintext,
        )
        .map_err(|_| SealingError::Seal)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + plaintext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&plaintext);
        Ok(sealed)
    }

    fn open(&self, stored: Vec<u8>) -> Result<Vec<u8>, SealingError> {
        if stored.len() < NONCE_LEN {
            return Err(SealingError::Open);
        }
        let key = self.aead_key()?;

        let (nonce_bytes, ciphertext) = stored.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes).map_err(|_| SealingError::Open)?;

        let mut in_out = ciphertext.to_vec();
        let plaintext = key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| SealingError::Open)?;
        Ok(plaintext.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sealed_bytes_differ_from_plaintext_and_open_back() {
        let protection = FileProtection::Sealed(SealingKey::from_bytes(&[7u8; 32]).unwrap());
        let plaintext = br#"{"resourceType":"Observation"}"#.to_vec();

        let sealed = protection.seal(plaintext.clone()).unwrap();
        assert_ne!(sealed, plaintext);
        assert_eq!(sealed.len(), plaintext.len() + NONCE_LEN + 16);

        assert_eq!(protection.open(sealed).unwrap(), plaintext);
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let sealer = FileProtection::Sealed(SealingKey::from_bytes(&[1u8; 32]).unwrap());
        let other = FileProtection::Sealed(SealingKey::from_bytes(&[2u8; 32]).unwrap());

        let sealed = sealer.seal(b"secret".to_vec()).unwrap();
        assert!(matches!(other.open(sealed), Err(SealingError::Open)));
    }

    #[test]
    fn truncated_file_fails_to_open() {
        let protection = FileProtection::Sealed(SealingKey::from_bytes(&[1u8; 32]).unwrap());
        assert!(matches!(protection.open(vec![0u8; 4]), Err(SealingError::Open)));
    }

    #[test]
    fn key_length_is_checked() {
        assert!(matches!(
            SealingKey::from_bytes(&[0u8; 16]),
            Err(SealingError::InvalidKeyLength(16))
        ));
    }

    #[test]
    fn owner_only_is_passthrough() {
        let protection = FileProtection::OwnerOnly;
        assert_eq!(protection.seal(b"abc".to_vec()).unwrap(), b"abc");
        assert_eq!(protection.open(b"abc".to_vec()).unwrap(), b"abc");
    }
}
