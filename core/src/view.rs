//! View Projection
//!
//! Read-only presentation of the store: one card per record plus the
//! aggregate snapshot. The projection never talks to the ledger or the
//! oracle; it only re-reads the store when its revision moves.

use std::sync::Arc;

use gradevault_sealed::OwnerId;
use log::{debug, warn};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::aggregate::{self, AggregateSnapshot};
use crate::errors::RevealError;
use crate::records::{GradeRecord, LoadStatus, RecordId, RecordStore, StateKind, StoreSnapshot};

/// Hex characters of the ciphertext handle shown on a card
pub const PREVIEW_CHARS: usize = 20;

/// Presentation of a single record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordView {
    pub id: RecordId,
    pub subject: String,
    /// Hex-encoded owner key
    pub owner: String,
    pub owned_by_viewer: bool,
    pub display_score: Option<u8>,
    /// Score as a 0-100 progress value, 0 until decrypted
    pub progress: u8,
    pub decryption_state: StateKind,
    pub is_busy: bool,
    pub attempt: u32,
    pub failure: Option<RevealError>,
    pub ciphertext_preview: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "card", rename_all = "snake_case")]
pub enum RecordCard {
    Ready(RecordView),
    /// The ledger data for this record could not be presented
    Faulted { id: RecordId, reason: String },
}

impl RecordCard {
    pub fn id(&self) -> RecordId {
        match self {
            RecordCard::Ready(view) => view.id,
            RecordCard::Faulted { id, .. } => *id,
        }
    }

    pub fn as_ready(&self) -> Option<&RecordView> {
        match self {
            RecordCard::Ready(view) => Some(view),
            RecordCard::Faulted { .. } => None,
        }
    }
}

/// Everything a consumer renders
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VaultView {
    pub revision: u64,
    pub status: LoadStatus,
    pub records: Vec<RecordCard>,
    pub aggregate: AggregateSnapshot,
}

impl VaultView {
    pub fn empty() -> Self {
        Self {
            revision: 0,
            status: LoadStatus::Idle,
            records: Vec::new(),
            aggregate: AggregateSnapshot::default(),
        }
    }

    pub fn card(&self, id: RecordId) -> Option<&RecordCard> {
        self.records.iter().find(|card| card.id() == id)
    }
}

fn present(record: &GradeRecord, viewer: &OwnerId) -> Result<RecordView, String> {
    if record.subject.trim().is_empty() {
        return Err("empty subject".to_string());
    }
    if record.subject.chars().any(char::is_control) {
        return Err("subject contains control characters".to_string());
    }

    let display_score = record.plaintext_score().map(u8::from);
    Ok(RecordView {
        id: record.id,
        subject: record.subject.clone(),
        owner: record.owner.to_hex(),
        owned_by_viewer: record.owner == *viewer,
        display_score,
        progress: display_score.unwrap_or(0),
        decryption_state: record.state.kind(),
        is_busy: record.state.is_busy(),
        attempt: record.state.attempt(),
        failure: record.state.failure().cloned(),
        ciphertext_preview: record.handle.preview(PREVIEW_CHARS),
    })
}

/// Build the view for `viewer` from a store snapshot.
///
/// A record that cannot be presented becomes a faulted card; the rest of the
/// view is unaffected.
pub fn project(snapshot: &StoreSnapshot<'_>, viewer: &OwnerId) -> VaultView {
    let records = snapshot
        .records
        .iter()
        .map(|record| match present(record, viewer) {
            Ok(view) => RecordCard::Ready(view),
            Err(reason) => {
                warn!("Record {} cannot be displayed: {}", record.id, reason);
                RecordCard::Faulted {
                    id: record.id,
                    reason,
                }
            }
        })
        .collect();

    VaultView {
        revision: snapshot.revision,
        status: snapshot.status.clone(),
        records,
        aggregate: aggregate::compute(snapshot.records, viewer),
    }
}

/// Publishes a fresh [`VaultView`] whenever the store changes
pub struct ViewProjection {
    store: Arc<RecordStore>,
    viewer: OwnerId,
    views: watch::Sender<Arc<VaultView>>,
}

impl ViewProjection {
    pub fn new(store: Arc<RecordStore>, viewer: OwnerId) -> Self {
        let initial = store.with_snapshot(|snapshot| project(&snapshot, &viewer));
        let (views, _) = watch::channel(Arc::new(initial));
        Self {
            store,
            viewer,
            views,
        }
    }

    /// Latest published view
    pub fn current(&self) -> Arc<VaultView> {
        self.views.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<VaultView>> {
        self.views.subscribe()
    }

    /// Re-project if the store moved past the published revision.
    /// Returns whether a new view was published.
    pub fn refresh(&self) -> bool {
        let published = self.views.borrow().revision;
        if self.store.revision() == published {
            return false;
        }

        let view = self
            .store
            .with_snapshot(|snapshot| project(&snapshot, &self.viewer));

        // Concurrent refreshes may finish out of order; never go backwards
        self.views.send_if_modified(|current| {
            if view.revision > current.revision {
                debug!("Publishing view at revision {}", view.revision);
                *current = Arc::new(view);
                true
            } else {
                false
            }
        })
    }

    /// Follow store changes in a background task. The task keeps the store
    /// alive, so it only stops when the returned handle is aborted.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let mut changes = self.store.subscribe();
        tokio::spawn(async move {
            self.refresh();
            while changes.changed().await.is_ok() {
                self.refresh();
            }
        })
    }
}
