//! Record Store
//!
//! Canonical cache of grade records fetched from the ledger. Records are only
//! ever appended; their decryption state changes through the narrow set of
//! transitions the decryption coordinator drives.
//!
//! ```text
//! ┌───────────┐  begin_reveal  ┌────────────┐  apply_decryption  ┌───────────┐
//! │ Encrypted │───────────────▶│ Requesting │───────────────────▶│ Decrypted │
//! └───────────┘                └────────────┘                    └───────────┘
//!                                 ▲      │ fail_reveal
//!                    begin_reveal │      ▼
//!                              ┌────────────┐
//!                              │   Failed   │
//!                              └────────────┘
//! ```
//!
//! Every mutation bumps a revision counter published on a `watch` channel.

use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use gradevault_sealed::{CiphertextHandle, OwnerId, Score};
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::watch;

use crate::errors::{Result, RevealError, VaultError};
use crate::ledger::{Ledger, LedgerEntry};

/// Default bound on a single ledger fetch
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Ledger-assigned record id, monotonic in insertion order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Per-record decryption lifecycle. The plaintext lives inside `Decrypted`,
/// so a score exists exactly when the record is decrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecryptionState {
    Encrypted,
    Requesting { attempt: u32 },
    Decrypted { score: Score, attempt: u32 },
    Failed { attempt: u32, error: RevealError },
}

/// Payload-free view of [`DecryptionState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    Encrypted,
    Requesting,
    Decrypted,
    Failed,
}

impl DecryptionState {
    pub fn kind(&self) -> StateKind {
        match self {
            DecryptionState::Encrypted => StateKind::Encrypted,
            DecryptionState::Requesting { .. } => StateKind::Requesting,
            DecryptionState::Decrypted { .. } => StateKind::Decrypted,
            DecryptionState::Failed { .. } => StateKind::Failed,
        }
    }

    pub fn plaintext(&self) -> Option<Score> {
        match self {
            DecryptionState::Decrypted { score, .. } => Some(*score),
            _ => None,
        }
    }

    /// Attempts made so far (0 while never requested)
    pub fn attempt(&self) -> u32 {
        match self {
            DecryptionState::Encrypted => 0,
            DecryptionState::Requesting { attempt }
            | DecryptionState::Decrypted { attempt, .. }
            | DecryptionState::Failed { attempt, .. } => *attempt,
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, DecryptionState::Requesting { .. })
    }

    pub fn failure(&self) -> Option<&RevealError> {
        match self {
            DecryptionState::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// A grade record as seen by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradeRecord {
    pub id: RecordId,
    pub subject: String,
    pub owner: OwnerId,
    pub handle: CiphertextHandle,
    pub state: DecryptionState,
}

impl GradeRecord {
    pub fn plaintext_score(&self) -> Option<Score> {
        self.state.plaintext()
    }

    fn matches_entry(&self, entry: &LedgerEntry) -> bool {
        self.subject == entry.subject && self.owner == entry.owner && self.handle == entry.handle
    }
}

impl From<LedgerEntry> for GradeRecord {
    fn from(entry: LedgerEntry) -> Self {
        Self {
            id: entry.id,
            subject: entry.subject,
            owner: entry.owner,
            handle: entry.handle,
            state: DecryptionState::Encrypted,
        }
    }
}

/// Outcome of the most recent ledger load
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoadStatus {
    /// Never loaded
    Idle,
    Loading,
    Ready,
    /// Last load failed; previously loaded records are still served
    Degraded { reason: String },
}

/// What a reveal request may do next for a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RevealGate {
    /// The record moved to `Requesting`; the caller owns this attempt
    Start {
        attempt: u32,
        handle: CiphertextHandle,
    },
    /// Already decrypted
    Cached(Score),
    /// Someone else holds the in-flight attempt
    InFlight { attempt: u32 },
}

/// Borrowed, consistent view of the store
pub struct StoreSnapshot<'a> {
    pub records: &'a [GradeRecord],
    pub status: &'a LoadStatus,
    pub revision: u64,
}

struct StoreInner {
    records: Vec<GradeRecord>,
    index: HashMap<RecordId, usize>,
    status: LoadStatus,
    revision: u64,
}

impl StoreInner {
    fn record_mut(&mut self, id: RecordId) -> Result<&mut GradeRecord> {
        let pos = *self.index.get(&id).ok_or(VaultError::UnknownRecord(id))?;
        Ok(&mut self.records[pos])
    }

    fn reindex(&mut self) {
        self.records.sort_by_key(|record| record.id);
        self.index = self
            .records
            .iter()
            .enumerate()
            .map(|(pos, record)| (record.id, pos))
            .collect();
    }

    /// Append unseen entries; returns how many were added
    fn merge(&mut self, entries: Vec<LedgerEntry>) -> usize {
        let mut added = 0;
        let mut ordered = true;

        for entry in entries {
            match self.index.get(&entry.id) {
                Some(&pos) => {
                    if !self.records[pos].matches_entry(&entry) {
                        warn!(
                            "Ledger returned different contents for record {}; keeping the original",
                            entry.id
                        );
                    }
                }
                None => {
                    if let Some(last) = self.records.last() {
                        ordered &= last.id < entry.id;
                    }
                    self.index.insert(entry.id, self.records.len());
                    self.records.push(GradeRecord::from(entry));
                    added += 1;
                }
            }
        }

        if !ordered {
            self.reindex();
        }
        added
    }
}

/// Canonical, append-only cache of grade records
pub struct RecordStore {
    inner: RwLock<StoreInner>,
    changes: watch::Sender<u64>,
    fetch_timeout: Duration,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::with_fetch_timeout(DEFAULT_FETCH_TIMEOUT)
    }

    pub fn with_fetch_timeout(fetch_timeout: Duration) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: RwLock::new(StoreInner {
                records: Vec::new(),
                index: HashMap::new(),
                status: LoadStatus::Idle,
                revision: 0,
            }),
            changes,
            fetch_timeout,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bump the revision and notify subscribers. Called with the write lock held
    /// so subscribers observe revisions in order.
    fn touch(&self, inner: &mut StoreInner) {
        inner.revision += 1;
        self.changes.send_replace(inner.revision);
    }

    /// Fetch from the ledger and merge new records.
    ///
    /// All-or-nothing: on failure nothing already loaded is touched and the
    /// status becomes `Degraded`.
    pub async fn load<L: Ledger>(
        &self,
        ledger: &L,
        scope: Option<OwnerId>,
    ) -> Result<Vec<GradeRecord>> {
        {
            let mut inner = self.write();
            inner.status = LoadStatus::Loading;
            self.touch(&mut inner);
        }

        let fetched = match tokio::time::timeout(self.fetch_timeout, ledger.fetch_records(scope))
            .await
        {
            Ok(Ok(entries)) => Ok(entries),
            Ok(Err(e)) => Err(VaultError::from(e)),
            Err(_) => Err(VaultError::LedgerUnavailable(format!(
                "fetch timed out after {:?}",
                self.fetch_timeout
            ))),
        };

        let mut inner = self.write();
        match fetched {
            Ok(entries) => {
                let fetched_count = entries.len();
                let added = inner.merge(entries);
                inner.status = LoadStatus::Ready;
                self.touch(&mut inner);
                info!(
                    "Loaded {} ledger entries ({} new, {} cached)",
                    fetched_count,
                    added,
                    inner.records.len()
                );
                Ok(inner.records.clone())
            }
            Err(err) => {
                warn!("Ledger load failed: {}", err);
                inner.status = LoadStatus::Degraded {
                    reason: err.to_string(),
                };
                self.touch(&mut inner);
                Err(err)
            }
        }
    }

    /// Record a successful reveal
    pub fn apply_decryption(&self, id: RecordId, score: Score) -> Result<()> {
        let mut inner = self.write();
        let record = inner.record_mut(id)?;
        let attempt = record.state.attempt().max(1);
        record.state = DecryptionState::Decrypted { score, attempt };
        self.touch(&mut inner);
        debug!("Record {} decrypted on attempt {}", id, attempt);
        Ok(())
    }

    /// Claim a record for a reveal attempt
    pub(crate) fn begin_reveal(&self, id: RecordId) -> Result<RevealGate> {
        let mut inner = self.write();
        let record = inner.record_mut(id)?;

        let attempt = match &record.state {
            DecryptionState::Decrypted { score, .. } => return Ok(RevealGate::Cached(*score)),
            DecryptionState::Requesting { attempt } => {
                return Ok(RevealGate::InFlight { attempt: *attempt });
            }
            DecryptionState::Encrypted => 1,
            DecryptionState::Failed { attempt, .. } => attempt + 1,
        };

        let handle = record.handle;
        record.state = DecryptionState::Requesting { attempt };
        self.touch(&mut inner);
        debug!("Record {} requesting (attempt {})", id, attempt);
        Ok(RevealGate::Start { attempt, handle })
    }

    /// Record a failed reveal attempt
    pub(crate) fn fail_reveal(&self, id: RecordId, attempt: u32, error: RevealError) -> Result<()> {
        let mut inner = self.write();
        let record = inner.record_mut(id)?;
        record.state = DecryptionState::Failed { attempt, error };
        self.touch(&mut inner);
        Ok(())
    }

    /// Ordered copy of all records
    pub fn records(&self) -> Vec<GradeRecord> {
        self.read().records.clone()
    }

    pub fn get(&self, id: RecordId) -> Option<GradeRecord> {
        let inner = self.read();
        inner.index.get(&id).map(|&pos| inner.records[pos].clone())
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.read().index.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn status(&self) -> LoadStatus {
        self.read().status.clone()
    }

    pub fn revision(&self) -> u64 {
        self.read().revision
    }

    /// Run `f` against a consistent snapshot without cloning the records
    pub fn with_snapshot<R>(&self, f: impl FnOnce(StoreSnapshot<'_>) -> R) -> R {
        let inner = self.read();
        f(StoreSnapshot {
            records: &inner.records,
            status: &inner.status,
            revision: inner.revision,
        })
    }

    /// Receive the revision number after every mutation
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new()
    }
}
