//! Grade vault facade
//!
//! Wires one caller identity to a ledger, an oracle, the record store, the
//! decryption coordinator and the published view.

use std::sync::Arc;
use std::time::Duration;

use gradevault_config::{OracleRuntime, VaultConfig, Visibility};
use gradevault_sealed::{Authorization, Identity, OwnerId, Score};
use log::{info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::decryption::{DEFAULT_REVEAL_TIMEOUT, DecryptionCoordinator, PendingReveal, RevealOutcome};
use crate::errors::Result;
use crate::ledger::Ledger;
use crate::oracle::{Encryptor, Oracle, unix_now};
use crate::records::{DEFAULT_FETCH_TIMEOUT, GradeRecord, RecordId, RecordStore};
use crate::view::{VaultView, ViewProjection};

const DEFAULT_PERMIT_VALIDITY_SECS: u64 = 24 * 60 * 60;

/// Runtime knobs for a [`GradeVault`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultSettings {
    /// Fetch every owner's records, or only the caller's
    pub visibility: Visibility,
    pub fetch_timeout: Duration,
    pub reveal_timeout: Duration,
    /// Lifetime of the permits minted for each reveal
    pub permit_validity_secs: u64,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            visibility: Visibility::All,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            reveal_timeout: DEFAULT_REVEAL_TIMEOUT,
            permit_validity_secs: DEFAULT_PERMIT_VALIDITY_SECS,
        }
    }
}

impl From<&VaultConfig> for VaultSettings {
    fn from(config: &VaultConfig) -> Self {
        let oracle = OracleRuntime::from(&config.oracle);
        Self {
            visibility: config.ledger.visibility,
            fetch_timeout: Duration::from_millis(config.ledger.fetch_timeout_ms),
            reveal_timeout: oracle.reveal_timeout,
            permit_validity_secs: oracle.permit_validity_secs,
        }
    }
}

/// A caller's session over the grade ledger
pub struct GradeVault<L, O> {
    ledger: Arc<L>,
    identity: Identity,
    settings: VaultSettings,
    store: Arc<RecordStore>,
    coordinator: DecryptionCoordinator<O>,
    projection: Arc<ViewProjection>,
    projector: JoinHandle<()>,
}

impl<L, O> GradeVault<L, O>
where
    L: Ledger + 'static,
    O: Oracle + 'static,
{
    /// Must be called from within a tokio runtime; the view projector runs
    /// as a background task for the lifetime of the vault.
    pub fn new(ledger: Arc<L>, oracle: Arc<O>, identity: Identity, settings: VaultSettings) -> Self {
        let store = Arc::new(RecordStore::with_fetch_timeout(settings.fetch_timeout));
        let coordinator =
            DecryptionCoordinator::with_timeout(store.clone(), oracle, settings.reveal_timeout);
        let projection = Arc::new(ViewProjection::new(store.clone(), identity.owner_id()));
        let projector = projection.clone().spawn();

        info!(
            "Vault opened for {} (visibility {:?})",
            identity.owner_id(),
            settings.visibility
        );

        Self {
            ledger,
            identity,
            settings,
            store,
            coordinator,
            projection,
            projector,
        }
    }

    pub fn owner(&self) -> OwnerId {
        self.identity.owner_id()
    }

    pub fn settings(&self) -> &VaultSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &DecryptionCoordinator<O> {
        &self.coordinator
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    fn scope(&self) -> Option<OwnerId> {
        match self.settings.visibility {
            Visibility::All => None,
            Visibility::Owner => Some(self.owner()),
        }
    }

    /// Reload from the ledger, keeping the state of already-known records
    pub async fn refresh(&self) -> Result<Vec<GradeRecord>> {
        self.store.load(self.ledger.as_ref(), self.scope()).await
    }

    /// Seal `score`, append it to the ledger and reload.
    ///
    /// A reload failure after a successful append is not an error: the record
    /// is on the ledger and the store reports `Degraded` until the next load.
    pub async fn submit_grade<E: Encryptor>(
        &self,
        encryptor: &E,
        subject: &str,
        score: u8,
    ) -> Result<RecordId> {
        let score = Score::new(score)?;
        let owner = self.owner();

        let handle = encryptor.encrypt(owner, score).await?;
        let id = self
            .ledger
            .submit_record(owner, subject.to_string(), handle)
            .await?;
        info!("Submitted record {} for {}", id, owner);

        if let Err(e) = self.refresh().await {
            warn!("Reload after submitting {} failed: {}", id, e);
        }
        Ok(id)
    }

    /// Mint a fresh permit for the caller
    pub fn authorize(&self) -> Authorization {
        self.identity
            .authorize(unix_now(), self.settings.permit_validity_secs)
    }

    /// Reveal a record with a freshly minted permit
    pub async fn request_decrypt(&self, id: RecordId) -> Result<RevealOutcome> {
        self.coordinator.request_decrypt(id, self.authorize()).await
    }

    /// Views pushed on every store change
    pub fn subscribe(&self) -> watch::Receiver<Arc<VaultView>> {
        self.projection.subscribe()
    }

    /// Up-to-date view, projected now if the projector has not caught up
    pub fn snapshot(&self) -> Arc<VaultView> {
        self.projection.refresh();
        self.projection.current()
    }

    pub fn pending(&self) -> Vec<PendingReveal> {
        self.coordinator.pending()
    }
}

impl<L, O> Drop for GradeVault<L, O> {
    fn drop(&mut self) {
        // In-flight reveals keep running; only the projector stops
        self.projector.abort();
    }
}
