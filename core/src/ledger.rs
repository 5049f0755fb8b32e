//! Ledger collaborator
//!
//! The ledger is the append-only public store of grade records. It only ever
//! sees ciphertext handles; persistence and finality are its concern, not ours.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use gradevault_sealed::{CiphertextHandle, OwnerId};
use log::{debug, info};
use tokio::sync::RwLock;

use crate::errors::LedgerError;
use crate::records::RecordId;

/// Subjects longer than this are rejected on submission
pub const MAX_SUBJECT_LEN: usize = 64;

/// A record as published on the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: RecordId,
    pub subject: String,
    pub handle: CiphertextHandle,
    pub owner: OwnerId,
}

/// Read/write access to the ledger
pub trait Ledger: Send + Sync {
    /// All entries in insertion order, optionally restricted to one owner
    fn fetch_records(
        &self,
        owner: Option<OwnerId>,
    ) -> impl Future<Output = Result<Vec<LedgerEntry>, LedgerError>> + Send;

    /// Append a new entry and return its ledger-assigned id
    fn submit_record(
        &self,
        owner: OwnerId,
        subject: String,
        handle: CiphertextHandle,
    ) -> impl Future<Output = Result<RecordId, LedgerError>> + Send;
}

// ============================================================================
// In-memory ledger
// ============================================================================

/// Append-only in-memory ledger for development and tests
#[derive(Debug, Default)]
pub struct MemoryLedger {
    entries: RwLock<Vec<LedgerEntry>>,
    unavailable: AtomicBool,
    fetches: AtomicUsize,
    latency: Duration,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate network latency on every call
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Toggle availability; an unavailable ledger fails every call
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Number of fetch calls served or refused so far
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    async fn reach(&self) -> Result<(), LedgerError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("memory ledger offline".into()));
        }
        Ok(())
    }
}

impl Ledger for MemoryLedger {
    async fn fetch_records(&self, owner: Option<OwnerId>) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.reach().await?;

        let entries = self.entries.read().await;
        let found: Vec<LedgerEntry> = entries
            .iter()
            .filter(|entry| owner.is_none_or(|owner| entry.owner == owner))
            .cloned()
            .collect();

        debug!("Ledger fetch returned {} of {} entries", found.len(), entries.len());
        Ok(found)
    }

    async fn submit_record(
        &self,
        owner: OwnerId,
        subject: String,
        handle: CiphertextHandle,
    ) -> Result<RecordId, LedgerError> {
        self.reach().await?;

        if subject.trim().is_empty() {
            return Err(LedgerError::Rejected("subject must not be empty".into()));
        }
        if subject.chars().count() > MAX_SUBJECT_LEN {
            return Err(LedgerError::Rejected(format!(
                "subject longer than {} characters",
                MAX_SUBJECT_LEN
            )));
        }

        let mut entries = self.entries.write().await;
        if entries.iter().any(|entry| entry.handle == handle) {
            return Err(LedgerError::Rejected(format!("handle {} already recorded", handle)));
        }

        let id = RecordId(entries.len() as u64);
        entries.push(LedgerEntry {
            id,
            subject,
            handle,
            owner,
        });

        info!("Ledger recorded entry {} for {}", id, owner);
        Ok(id)
    }
}
