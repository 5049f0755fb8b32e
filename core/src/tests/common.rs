use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use gradevault_sealed::{Authorization, CiphertextHandle, Identity, OwnerId, Score, SealError};
use tokio::sync::Semaphore;

use crate::decryption::DecryptionCoordinator;
use crate::errors::RevealError;
use crate::ledger::{Ledger, MemoryLedger};
use crate::oracle::{DevOracle, Encryptor, Oracle, unix_now};
use crate::records::{RecordId, RecordStore};

pub const WAIT: Duration = Duration::from_secs(2);

pub fn student() -> Identity {
    Identity::from_seed([11u8; 32])
}

pub fn classmate() -> Identity {
    Identity::from_seed([22u8; 32])
}

pub fn permit(identity: &Identity) -> Authorization {
    identity.authorize(unix_now(), 600)
}

/// Dev oracle whose reveals block until released
pub struct GatedOracle {
    inner: DevOracle,
    gate: Semaphore,
    calls: AtomicUsize,
}

impl GatedOracle {
    pub fn closed() -> Self {
        Self {
            inner: DevOracle::new(),
            gate: Semaphore::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn open() -> Self {
        let oracle = Self::closed();
        oracle.release(1024);
        oracle
    }

    /// Let `n` more reveals through
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn allow(&self, handle: CiphertextHandle, reader: OwnerId) {
        self.inner.allow(handle, reader);
    }

    /// Wait until at least `n` reveals have reached the oracle
    pub async fn wait_for_calls(&self, n: usize) {
        tokio::time::timeout(WAIT, async {
            while self.calls() < n {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("oracle was never called");
    }
}

impl Encryptor for GatedOracle {
    async fn encrypt(&self, owner: OwnerId, score: Score) -> Result<CiphertextHandle, SealError> {
        self.inner.encrypt(owner, score).await
    }
}

impl Oracle for GatedOracle {
    async fn reveal(
        &self,
        handle: CiphertextHandle,
        authorization: Authorization,
    ) -> Result<Score, RevealError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
        self.inner.reveal(handle, authorization).await
    }
}

/// Dev oracle that panics on its first reveal
pub struct PanicOnce {
    inner: DevOracle,
    panicked: AtomicBool,
    calls: AtomicUsize,
}

impl PanicOnce {
    pub fn new() -> Self {
        Self {
            inner: DevOracle::new(),
            panicked: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Encryptor for PanicOnce {
    async fn encrypt(&self, owner: OwnerId, score: Score) -> Result<CiphertextHandle, SealError> {
        self.inner.encrypt(owner, score).await
    }
}

impl Oracle for PanicOnce {
    async fn reveal(
        &self,
        handle: CiphertextHandle,
        authorization: Authorization,
    ) -> Result<Score, RevealError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.panicked.swap(true, Ordering::SeqCst) {
            panic!("oracle crashed");
        }
        self.inner.reveal(handle, authorization).await
    }
}

/// Ledger, gated oracle, store and coordinator wired together
pub struct Fixture {
    pub ledger: MemoryLedger,
    pub oracle: Arc<GatedOracle>,
    pub store: Arc<RecordStore>,
    pub coordinator: DecryptionCoordinator<GatedOracle>,
}

impl Fixture {
    pub fn new(oracle: GatedOracle) -> Self {
        let store = Arc::new(RecordStore::new());
        let oracle = Arc::new(oracle);
        let coordinator = DecryptionCoordinator::new(store.clone(), oracle.clone());
        Self {
            ledger: MemoryLedger::new(),
            oracle,
            store,
            coordinator,
        }
    }

    /// Seal and record a grade for `owner`, then reload the store
    pub async fn seed(&self, owner: &Identity, subject: &str, value: u8) -> RecordId {
        let handle = self
            .oracle
            .encrypt(owner.owner_id(), Score::new(value).unwrap())
            .await
            .unwrap();
        let id = self
            .ledger
            .submit_record(owner.owner_id(), subject.to_string(), handle)
            .await
            .unwrap();
        self.store.load(&self.ledger, None).await.unwrap();
        id
    }

    pub fn handle(&self, id: RecordId) -> CiphertextHandle {
        self.store.get(id).unwrap().handle
    }
}
