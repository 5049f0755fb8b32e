//! Sealed Scores
//!
//! A score is sealed under a symmetric key held by the reveal oracle. Only the
//! handle (hash of the sealed payload) is published; the payload itself stays
//! with the oracle.

use std::fmt;

use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit},
};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::errors::SealError;
use crate::score::Score;

/// Opaque reference to a sealed score
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CiphertextHandle(pub [u8; 32]);

impl CiphertextHandle {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// `0x` followed by the first `chars` hex digits and an ellipsis
    pub fn preview(&self, chars: usize) -> String {
        let full = hex::encode(self.0);
        let end = chars.min(full.len());
        format!("0x{}...", &full[..end])
    }

    fn compute(nonce: &[u8; 12], ciphertext: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(nonce);
        hasher.update(ciphertext);
        Self(*hasher.finalize().as_bytes())
    }
}

impl fmt::Display for CiphertextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for CiphertextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CiphertextHandle({})", self.preview(16))
    }
}

/// Symmetric key used by the oracle to seal and open scores
#[derive(Clone)]
pub struct SealingKey([u8; 32]);

impl SealingKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    fn cipher(&self) -> Result<ChaCha20Poly1305, SealError> {
        ChaCha20Poly1305::new_from_slice(&self.0).map_err(|_| SealError::InvalidKey)
    }
}

impl fmt::Debug for SealingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SealingKey").finish_non_exhaustive()
    }
}

/// A sealed score as held by the oracle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedScore {
    /// Hash of nonce and ciphertext, published on the ledger
    pub handle: CiphertextHandle,
    pub nonce: [u8; 12],
    pub ciphertext: Vec<u8>,
}

impl SealedScore {
    /// Seal a score under `key` with a fresh random nonce
    pub fn seal(score: Score, key: &SealingKey) -> Result<Self, SealError> {
        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let ciphertext = key
            .cipher()?
            .encrypt(Nonce::from_slice(&nonce_bytes), score.to_bytes().as_slice())
            .map_err(|_| SealError::EncryptionFailed)?;

        Ok(Self {
            handle: CiphertextHandle::compute(&nonce_bytes, &ciphertext),
            nonce: nonce_bytes,
            ciphertext,
        })
    }

    /// Authenticate and decrypt
    pub fn open(&self, key: &SealingKey) -> Result<Score, SealError> {
        if CiphertextHandle::compute(&self.nonce, &self.ciphertext) != self.handle {
            return Err(SealError::DecryptionFailed);
        }

        let plaintext = key
            .cipher()?
            .decrypt(Nonce::from_slice(&self.nonce), self.ciphertext.as_slice())
            .map_err(|_| SealError::DecryptionFailed)?;

        Score::from_bytes(&plaintext)
    }
}
