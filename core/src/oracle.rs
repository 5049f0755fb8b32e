//! Reveal oracle collaborator
//!
//! The oracle turns a ciphertext handle into a plaintext score for a caller
//! holding a valid permit. The sealing scheme itself is opaque to the rest of
//! the crate; [`DevOracle`] is a local stand-in that seals with
//! `gradevault-sealed`.

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use gradevault_sealed::{
    Authorization, CiphertextHandle, OwnerId, Score, SealError, SealedScore, SealingKey,
};
use log::{debug, warn};

use crate::errors::RevealError;

/// Current unix time in seconds
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Authorized reveal of sealed scores
pub trait Oracle: Send + Sync {
    fn reveal(
        &self,
        handle: CiphertextHandle,
        authorization: Authorization,
    ) -> impl Future<Output = Result<Score, RevealError>> + Send;
}

/// Sealing side of the oracle: produces handles for new scores
pub trait Encryptor: Send + Sync {
    fn encrypt(
        &self,
        owner: OwnerId,
        score: Score,
    ) -> impl Future<Output = Result<CiphertextHandle, SealError>> + Send;
}

// ============================================================================
// Development oracle
// ============================================================================

/// Local oracle holding the sealing key and an access list per handle
pub struct DevOracle {
    key: SealingKey,
    sealed: DashMap<CiphertextHandle, SealedScore>,
    acl: DashMap<CiphertextHandle, Vec<OwnerId>>,
    latency_ms: AtomicU64,
    reveals: AtomicUsize,
}

impl DevOracle {
    pub fn new() -> Self {
        Self::with_key(SealingKey::generate())
    }

    pub fn with_key(key: SealingKey) -> Self {
        Self {
            key,
            sealed: DashMap::new(),
            acl: DashMap::new(),
            latency_ms: AtomicU64::new(0),
            reveals: AtomicUsize::new(0),
        }
    }

    /// Delay every reveal by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of reveal calls received, successful or not
    pub fn reveal_count(&self) -> usize {
        self.reveals.load(Ordering::SeqCst)
    }

    /// Grant `reader` the right to reveal `handle`
    pub fn allow(&self, handle: CiphertextHandle, reader: OwnerId) {
        let mut readers = self.acl.entry(handle).or_default();
        if !readers.contains(&reader) {
            readers.push(reader);
        }
    }

    fn is_allowed(&self, handle: &CiphertextHandle, reader: &OwnerId) -> bool {
        self.acl
            .get(handle)
            .map(|readers| readers.contains(reader))
            .unwrap_or(false)
    }
}

impl Default for DevOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl Encryptor for DevOracle {
    async fn encrypt(&self, owner: OwnerId, score: Score) -> Result<CiphertextHandle, SealError> {
        let sealed = SealedScore::seal(score, &self.key)?;
        let handle = sealed.handle;

        self.sealed.insert(handle, sealed);
        self.allow(handle, owner);

        debug!("Sealed score for {} under {:?}", owner, handle);
        Ok(handle)
    }
}

impl Oracle for DevOracle {
    async fn reveal(
        &self,
        handle: CiphertextHandle,
        authorization: Authorization,
    ) -> Result<Score, RevealError> {
        self.reveals.fetch_add(1, Ordering::SeqCst);

        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        authorization
            .verify(unix_now())
            .map_err(|e| RevealError::AuthorizationDenied(e.to_string()))?;

        let sealed = self
            .sealed
            .get(&handle)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RevealError::OracleError(format!("unknown handle {:?}", handle)))?;

        if !self.is_allowed(&handle, &authorization.requester) {
            warn!(
                "Reveal of {:?} refused for {}",
                handle, authorization.requester
            );
            return Err(RevealError::AuthorizationDenied(
                "requester is not on the access list".into(),
            ));
        }

        sealed
            .open(&self.key)
            .map_err(|e| RevealError::OracleError(e.to_string()))
    }
}
