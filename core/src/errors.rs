//! Error taxonomy for the vault.
//!
//! Ledger failures and contract violations surface to the caller as
//! [`VaultError`]. Reveal failures never do: the coordinator absorbs a
//! [`RevealError`] into the record's `Failed` state.

use gradevault_sealed::SealError;
use serde::Serialize;
use thiserror::Error;

use crate::records::RecordId;

/// Errors returned by the ledger collaborator
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    #[error("ledger rejected the write: {0}")]
    Rejected(String),
}

/// Errors surfaced to callers of the store, coordinator and vault
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VaultError {
    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("ledger rejected the write: {0}")]
    LedgerRejected(String),

    #[error("unknown record {0}")]
    UnknownRecord(RecordId),

    #[error("score {0} is outside 0..=100")]
    InvalidScore(u8),

    #[error("sealing failed: {0}")]
    Sealing(SealError),
}

impl From<LedgerError> for VaultError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Unavailable(reason) => VaultError::LedgerUnavailable(reason),
            LedgerError::Rejected(reason) => VaultError::LedgerRejected(reason),
        }
    }
}

impl From<SealError> for VaultError {
    fn from(err: SealError) -> Self {
        match err {
            SealError::InvalidScore(value) => VaultError::InvalidScore(value),
            other => VaultError::Sealing(other),
        }
    }
}

/// Recoverable reveal failures, kept on the record until a retry
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum RevealError {
    #[error("authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("oracle timed out")]
    OracleTimeout,

    #[error("oracle error: {0}")]
    OracleError(String),
}

pub type Result<T> = std::result::Result<T, VaultError>;
