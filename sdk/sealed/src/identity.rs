//! Identities and reveal permits
//!
//! A student is identified by an ed25519 verifying key. To reveal one of their
//! scores they sign a time-boxed permit; the oracle checks the permit before
//! opening anything.

use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::errors::SealError;

const PERMIT_DOMAIN: &[u8] = b"gradevault-reveal-permit-v1";

/// Public identity of a record owner (ed25519 verifying key bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerId(pub [u8; 32]);

impl OwnerId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl fmt::Debug for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnerId(0x{}..)", &self.to_hex()[..8])
    }
}

/// A caller's signing identity.
/// Never expose the seed outside `seed_hex` (used by key export).
pub struct Identity {
    signing_key: SigningKey,
}

impl Identity {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    /// Parse a hex-encoded 32-byte seed (surrounding whitespace ignored)
    pub fn from_hex(encoded: &str) -> Result<Self, SealError> {
        let bytes = hex::decode(encoded.trim()).map_err(|_| SealError::InvalidKey)?;
        let seed: [u8; 32] = bytes.try_into().map_err(|_| SealError::InvalidKey)?;
        Ok(Self::from_seed(seed))
    }

    pub fn seed_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    pub fn owner_id(&self) -> OwnerId {
        OwnerId(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign a reveal permit valid for `valid_for_secs` starting at `issued_at` (unix seconds)
    pub fn authorize(&self, issued_at: u64, valid_for_secs: u64) -> Authorization {
        let requester = self.owner_id();
        let msg = Authorization::message(&requester, issued_at, valid_for_secs);
        let signature = self.signing_key.sign(&msg).to_bytes().to_vec();

        Authorization {
            requester,
            issued_at,
            valid_for_secs,
            signature,
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("owner", &self.owner_id())
            .finish_non_exhaustive()
    }
}

/// Signed permit allowing the oracle to reveal the requester's scores
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    pub requester: OwnerId,
    /// Unix seconds
    pub issued_at: u64,
    pub valid_for_secs: u64,
    /// ed25519 signature over the permit message
    pub signature: Vec<u8>,
}

impl Authorization {
    fn message(requester: &OwnerId, issued_at: u64, valid_for_secs: u64) -> Vec<u8> {
        let mut msg = Vec::with_capacity(PERMIT_DOMAIN.len() + 32 + 16);
        msg.extend_from_slice(PERMIT_DOMAIN);
        msg.extend_from_slice(requester.as_bytes());
        msg.extend_from_slice(&issued_at.to_le_bytes());
        msg.extend_from_slice(&valid_for_secs.to_le_bytes());
        msg
    }

    pub fn expires_at(&self) -> u64 {
        self.issued_at.saturating_add(self.valid_for_secs)
    }

    /// Check the signature and that `now` (unix seconds) falls inside the validity window
    pub fn verify(&self, now: u64) -> Result<(), SealError> {
        let key = VerifyingKey::from_bytes(self.requester.as_bytes())
            .map_err(|_| SealError::InvalidSignature)?;
        let signature =
            Signature::from_slice(&self.signature).map_err(|_| SealError::InvalidSignature)?;

        let msg = Self::message(&self.requester, self.issued_at, self.valid_for_secs);
        key.verify(&msg, &signature)
            .map_err(|_| SealError::InvalidSignature)?;

        if now < self.issued_at {
            return Err(SealError::PermitNotYetValid {
                issued_at: self.issued_at,
            });
        }
        if now >= self.expires_at() {
            return Err(SealError::PermitExpired {
                expired_at: self.expires_at(),
            });
        }
        Ok(())
    }
}
