use thiserror::Error;

/// Sealing and permit errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SealError {
    #[error("score {0} is outside 0..=100")]
    InvalidScore(u8),

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("invalid key material")]
    InvalidKey,

    #[error("invalid permit signature")]
    InvalidSignature,

    #[error("permit expired at {expired_at}")]
    PermitExpired { expired_at: u64 },

    #[error("permit not valid before {issued_at}")]
    PermitNotYetValid { issued_at: u64 },
}
