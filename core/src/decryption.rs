//! Decryption Coordinator
//!
//! Drives the reveal protocol for individual records against the oracle.
//!
//! ```text
//! request_decrypt(id)
//!   │
//!   ├─ in-flight entry exists ──────────▶ join the pending outcome
//!   │
//!   └─ claim (under the per-id entry lock)
//!        ├─ Decrypted ──────────────────▶ cached score, no oracle call
//!        └─ Encrypted | Failed ─▶ Requesting(attempt n)
//!                                   │ spawned task
//!                                   ▼
//!                          oracle.reveal (bounded by timeout)
//!                                   │
//!                          complete(id, n, result)
//!                            ├─ n is current ─▶ Decrypted | Failed, wake waiters
//!                            └─ n is stale ───▶ discarded
//! ```
//!
//! Reveals run in their own tasks, so dropping the coordinator or the caller's
//! future does not cancel them: the store is still updated when they finish.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use gradevault_sealed::{Authorization, CiphertextHandle, Score};
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::watch;

use crate::errors::{Result, RevealError};
use crate::oracle::Oracle;
use crate::records::{RecordId, RecordStore, RevealGate};

/// Default bound on a single oracle reveal
pub const DEFAULT_REVEAL_TIMEOUT: Duration = Duration::from_secs(30);

/// What a caller of [`DecryptionCoordinator::request_decrypt`] gets back
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RevealOutcome {
    Decrypted { score: Score },
    Failed { error: RevealError },
    /// The record is requesting under a claim this coordinator does not own
    Pending { attempt: u32 },
}

impl RevealOutcome {
    pub fn score(&self) -> Option<Score> {
        match self {
            RevealOutcome::Decrypted { score } => Some(*score),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Succeeded,
    Failed,
}

/// Diagnostic copy of an in-flight request
#[derive(Debug, Clone)]
pub struct PendingReveal {
    pub id: RecordId,
    pub attempt: u32,
    pub started_at: Instant,
    pub status: RequestStatus,
}

/// A live reveal request; at most one per record id
struct DecryptionRequest {
    attempt: u32,
    started_at: Instant,
    status: RequestStatus,
    outcome: watch::Sender<Option<RevealOutcome>>,
}

/// Result of claiming a record
enum Claim {
    /// New attempt owned by this caller; the oracle must be called
    Started {
        attempt: u32,
        handle: CiphertextHandle,
        waiter: watch::Receiver<Option<RevealOutcome>>,
    },
    /// Joined an attempt already in flight
    Joined(watch::Receiver<Option<RevealOutcome>>),
    Ready(RevealOutcome),
}

struct Inner<O> {
    store: Arc<RecordStore>,
    oracle: Arc<O>,
    in_flight: DashMap<RecordId, DecryptionRequest>,
    reveal_timeout: Duration,
}

/// Per-record reveal state machine.
///
/// Cheap to clone; clones share the same in-flight set.
pub struct DecryptionCoordinator<O> {
    inner: Arc<Inner<O>>,
}

impl<O> Clone for DecryptionCoordinator<O> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<O: Oracle + 'static> DecryptionCoordinator<O> {
    pub fn new(store: Arc<RecordStore>, oracle: Arc<O>) -> Self {
        Self::with_timeout(store, oracle, DEFAULT_REVEAL_TIMEOUT)
    }

    pub fn with_timeout(store: Arc<RecordStore>, oracle: Arc<O>, reveal_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                oracle,
                in_flight: DashMap::new(),
                reveal_timeout,
            }),
        }
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.inner.store
    }

    /// Reveal one record.
    ///
    /// Only `UnknownRecord` is returned as an error; oracle failures come back
    /// as [`RevealOutcome::Failed`] and stay on the record until retried.
    pub async fn request_decrypt(
        &self,
        id: RecordId,
        authorization: Authorization,
    ) -> Result<RevealOutcome> {
        let waiter = match self.claim(id)? {
            Claim::Ready(outcome) => return Ok(outcome),
            Claim::Joined(waiter) => waiter,
            Claim::Started {
                attempt,
                handle,
                waiter,
            } => {
                tokio::spawn(drive(self.inner.clone(), id, attempt, handle, authorization));
                waiter
            }
        };

        Ok(wait(waiter).await)
    }

    /// Requests currently in flight
    pub fn pending(&self) -> Vec<PendingReveal> {
        let mut pending: Vec<PendingReveal> = self
            .inner
            .in_flight
            .iter()
            .map(|entry| PendingReveal {
                id: *entry.key(),
                attempt: entry.attempt,
                started_at: entry.started_at,
                status: entry.status,
            })
            .collect();
        pending.sort_by_key(|p| p.id);
        pending
    }

    pub fn is_pending(&self, id: RecordId) -> bool {
        self.inner.in_flight.contains_key(&id)
    }

    /// Claim `id` for a new attempt, or join or short-circuit an existing one.
    /// The per-id entry lock makes check-and-claim atomic.
    fn claim(&self, id: RecordId) -> Result<Claim> {
        match self.inner.in_flight.entry(id) {
            Entry::Occupied(entry) => {
                debug!(
                    "Record {} already requesting (attempt {}), joining",
                    id,
                    entry.get().attempt
                );
                Ok(Claim::Joined(entry.get().outcome.subscribe()))
            }
            Entry::Vacant(slot) => match self.inner.store.begin_reveal(id)? {
                RevealGate::Cached(score) => {
                    debug!("Record {} already decrypted", id);
                    Ok(Claim::Ready(RevealOutcome::Decrypted { score }))
                }
                RevealGate::InFlight { attempt } => {
                    warn!(
                        "Record {} is requesting (attempt {}) without a local claim",
                        id, attempt
                    );
                    Ok(Claim::Ready(RevealOutcome::Pending { attempt }))
                }
                RevealGate::Start { attempt, handle } => {
                    let (outcome, waiter) = watch::channel(None);
                    slot.insert(DecryptionRequest {
                        attempt,
                        started_at: Instant::now(),
                        status: RequestStatus::Pending,
                        outcome,
                    });
                    Ok(Claim::Started {
                        attempt,
                        handle,
                        waiter,
                    })
                }
            },
        }
    }
}

/// Apply the result of attempt `attempt` for `id`.
///
/// Returns `false` when the attempt is no longer current and the result was
/// discarded.
fn complete<O>(
    inner: &Inner<O>,
    id: RecordId,
    attempt: u32,
    result: std::result::Result<Score, RevealError>,
) -> bool {
    let Entry::Occupied(mut entry) = inner.in_flight.entry(id) else {
        warn!("Discarding reveal result for {} (attempt {}): nothing in flight", id, attempt);
        return false;
    };
    if entry.get().attempt != attempt {
        warn!(
            "Discarding stale reveal result for {} (attempt {}, current {})",
            id,
            attempt,
            entry.get().attempt
        );
        return false;
    }

    let outcome = match result {
        Ok(score) => match inner.store.apply_decryption(id, score) {
            Ok(()) => {
                info!("Record {} revealed on attempt {}", id, attempt);
                RevealOutcome::Decrypted { score }
            }
            Err(e) => {
                error!("Could not apply reveal of {}: {}", id, e);
                let error = RevealError::OracleError(e.to_string());
                if let Err(e) = inner.store.fail_reveal(id, attempt, error.clone()) {
                    error!("Could not record failed reveal of {}: {}", id, e);
                }
                RevealOutcome::Failed { error }
            }
        },
        Err(error) => {
            warn!("Reveal of {} failed on attempt {}: {}", id, attempt, error);
            if let Err(e) = inner.store.fail_reveal(id, attempt, error.clone()) {
                error!("Could not record failed reveal of {}: {}", id, e);
            }
            RevealOutcome::Failed { error }
        }
    };

    entry.get_mut().status = match outcome {
        RevealOutcome::Decrypted { .. } => RequestStatus::Succeeded,
        _ => RequestStatus::Failed,
    };
    let request = entry.remove();
    request.outcome.send_replace(Some(outcome));
    true
}

async fn drive<O: Oracle + 'static>(
    inner: Arc<Inner<O>>,
    id: RecordId,
    attempt: u32,
    handle: CiphertextHandle,
    authorization: Authorization,
) {
    // A panicking oracle must still settle the attempt
    let oracle = inner.oracle.clone();
    let mut reveal = tokio::spawn(async move { oracle.reveal(handle, authorization).await });

    let result = match tokio::time::timeout(inner.reveal_timeout, &mut reveal).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(RevealError::OracleError(format!("reveal task aborted: {}", e))),
        Err(_) => {
            reveal.abort();
            Err(RevealError::OracleTimeout)
        }
    };

    complete(&inner, id, attempt, result);
}

async fn wait(mut waiter: watch::Receiver<Option<RevealOutcome>>) -> RevealOutcome {
    let outcome = match waiter.wait_for(Option::is_some).await {
        Ok(outcome) => Option::clone(&outcome),
        Err(_) => None,
    };
    outcome.unwrap_or_else(dropped)
}

fn dropped() -> RevealOutcome {
    RevealOutcome::Failed {
        error: RevealError::OracleError("reveal task ended without a result".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{Ledger, MemoryLedger};
    use crate::oracle::{DevOracle, Encryptor};
    use crate::records::DecryptionState;
    use gradevault_sealed::OwnerId;

    fn score(value: u8) -> Score {
        Score::new(value).unwrap()
    }

    /// Store with one record whose handle the oracle never sealed
    async fn single_record_store() -> (Arc<RecordStore>, RecordId) {
        let ledger = MemoryLedger::new();
        let id = ledger
            .submit_record(OwnerId([1u8; 32]), "Math".into(), CiphertextHandle([4u8; 32]))
            .await
            .unwrap();
        let store = Arc::new(RecordStore::new());
        store.load(&ledger, None).await.unwrap();
        (store, id)
    }

    fn start(coordinator: &DecryptionCoordinator<DevOracle>, id: RecordId) -> u32 {
        match coordinator.claim(id).unwrap() {
            Claim::Started { attempt, .. } => attempt,
            _ => panic!("expected a fresh claim"),
        }
    }

    #[tokio::test]
    async fn test_stale_completion_is_discarded() {
        let (store, id) = single_record_store().await;
        let coordinator = DecryptionCoordinator::new(store.clone(), Arc::new(DevOracle::new()));

        let first = start(&coordinator, id);
        assert!(complete(&coordinator.inner, id, first, Err(RevealError::OracleTimeout)));
        assert!(matches!(
            store.get(id).unwrap().state,
            DecryptionState::Failed { attempt: 1, .. }
        ));

        let second = start(&coordinator, id);
        assert_eq!(second, 2);

        // attempt 1 reports late with a different answer
        assert!(!complete(&coordinator.inner, id, first, Ok(score(12))));
        assert_eq!(
            store.get(id).unwrap().state,
            DecryptionState::Requesting { attempt: 2 }
        );

        assert!(complete(&coordinator.inner, id, second, Ok(score(93))));
        assert_eq!(store.get(id).unwrap().plaintext_score(), Some(score(93)));

        // and once more after attempt 2 settled
        assert!(!complete(&coordinator.inner, id, first, Ok(score(12))));
        assert_eq!(store.get(id).unwrap().plaintext_score(), Some(score(93)));
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let (store, id) = single_record_store().await;
        let coordinator = DecryptionCoordinator::new(store, Arc::new(DevOracle::new()));

        assert_eq!(start(&coordinator, id), 1);
        assert!(matches!(coordinator.claim(id).unwrap(), Claim::Joined(_)));
        assert_eq!(coordinator.pending().len(), 1);
        assert_eq!(coordinator.pending()[0].status, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn test_joined_waiter_sees_outcome() {
        let (store, id) = single_record_store().await;
        let coordinator = DecryptionCoordinator::new(store, Arc::new(DevOracle::new()));

        let attempt = start(&coordinator, id);
        let Claim::Joined(waiter) = coordinator.claim(id).unwrap() else {
            panic!("expected to join");
        };

        complete(&coordinator.inner, id, attempt, Ok(score(66)));
        assert_eq!(wait(waiter).await, RevealOutcome::Decrypted { score: score(66) });
        assert!(!coordinator.is_pending(id));
    }

    #[tokio::test]
    async fn test_unknown_record() {
        let (store, _) = single_record_store().await;
        let before = store.records();
        let coordinator = DecryptionCoordinator::new(store.clone(), Arc::new(DevOracle::new()));
        let student = gradevault_sealed::Identity::from_seed([1u8; 32]);

        let result = coordinator
            .request_decrypt(RecordId(42), student.authorize(crate::oracle::unix_now(), 60))
            .await;

        assert_eq!(result, Err(crate::errors::VaultError::UnknownRecord(RecordId(42))));
        assert_eq!(store.records(), before);
        assert!(coordinator.pending().is_empty());
    }

    #[tokio::test]
    async fn test_unappliable_result_settles_as_failed() {
        let (store, _) = single_record_store().await;
        let coordinator = DecryptionCoordinator::new(store.clone(), Arc::new(DevOracle::new()));
        let missing = RecordId(99);

        let (outcome, waiter) = watch::channel(None);
        coordinator.inner.in_flight.insert(
            missing,
            DecryptionRequest {
                attempt: 1,
                started_at: Instant::now(),
                status: RequestStatus::Pending,
                outcome,
            },
        );

        assert!(complete(&coordinator.inner, missing, 1, Ok(score(70))));
        assert!(matches!(
            wait(waiter).await,
            RevealOutcome::Failed {
                error: RevealError::OracleError(_)
            }
        ));
        assert!(!coordinator.is_pending(missing));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_becomes_failed_state() {
        let oracle = Arc::new(DevOracle::new());
        let student = gradevault_sealed::Identity::from_seed([5u8; 32]);
        let handle = oracle.encrypt(student.owner_id(), score(40)).await.unwrap();
        oracle.set_latency(Duration::from_millis(200));

        let ledger = MemoryLedger::new();
        let id = ledger
            .submit_record(student.owner_id(), "Chemistry".into(), handle)
            .await
            .unwrap();
        let store = Arc::new(RecordStore::new());
        store.load(&ledger, None).await.unwrap();

        let coordinator =
            DecryptionCoordinator::with_timeout(store.clone(), oracle, Duration::from_millis(20));
        let outcome = coordinator
            .request_decrypt(id, student.authorize(crate::oracle::unix_now(), 60))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            RevealOutcome::Failed {
                error: RevealError::OracleTimeout
            }
        );
        assert_eq!(store.get(id).unwrap().plaintext_score(), None);
    }
}
