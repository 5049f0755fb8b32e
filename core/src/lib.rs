//! Client-side orchestration for sealed grade records: a record store fed by
//! the ledger, a per-record reveal state machine against the oracle, aggregate
//! statistics and a push-based view.

pub mod aggregate;
pub mod decryption;
pub mod errors;
pub mod ledger;
pub mod oracle;
pub mod records;
pub mod vault;
pub mod view;

#[cfg(test)]
mod tests;

pub use aggregate::AggregateSnapshot;
pub use decryption::{DecryptionCoordinator, PendingReveal, RequestStatus, RevealOutcome};
pub use errors::{LedgerError, Result, RevealError, VaultError};
pub use ledger::{Ledger, LedgerEntry, MemoryLedger};
pub use oracle::{DevOracle, Encryptor, Oracle};
pub use records::{DecryptionState, GradeRecord, LoadStatus, RecordId, RecordStore, StateKind};
pub use vault::{GradeVault, VaultSettings};
pub use view::{RecordCard, RecordView, VaultView, ViewProjection};
