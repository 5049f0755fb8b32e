use std::sync::Arc;

use gradevault_config::Visibility;
use gradevault_sealed::{Identity, Score};

use crate::errors::VaultError;
use crate::ledger::{Ledger, MemoryLedger};
use crate::oracle::Encryptor;
use crate::records::{DecryptionState, LoadStatus, RecordId, StateKind};
use crate::vault::{GradeVault, VaultSettings};
use crate::view::RecordCard;

use super::common::{GatedOracle, WAIT, classmate, student};

type TestVault = GradeVault<MemoryLedger, GatedOracle>;

fn open_vault(identity: Identity, oracle: GatedOracle, settings: VaultSettings) -> (TestVault, Arc<GatedOracle>) {
    let oracle = Arc::new(oracle);
    let vault = GradeVault::new(
        Arc::new(MemoryLedger::new()),
        oracle.clone(),
        identity,
        settings,
    );
    (vault, oracle)
}

/// Record a classmate's grade directly on the ledger
async fn seed_classmate(vault: &TestVault, oracle: &GatedOracle, subject: &str, value: u8) -> RecordId {
    let other = classmate();
    let handle = oracle
        .encrypt(other.owner_id(), Score::new(value).unwrap())
        .await
        .unwrap();
    vault
        .ledger()
        .submit_record(other.owner_id(), subject.to_string(), handle)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_aggregates_after_reveals() {
    let (vault, oracle) = open_vault(student(), GatedOracle::open(), VaultSettings::default());

    for (subject, value) in [("Mathematics", 80), ("Physics", 90), ("Literature", 100)] {
        vault.submit_grade(oracle.as_ref(), subject, value).await.unwrap();
    }
    let shared = seed_classmate(&vault, &oracle, "Chemistry", 60).await;
    vault.refresh().await.unwrap();
    let shared_handle = vault.store().get(shared).unwrap().handle;
    oracle.allow(shared_handle, vault.owner());

    let before = vault.snapshot();
    assert_eq!(before.aggregate.total_count, 4);
    assert_eq!(before.aggregate.decrypted_count, 0);
    assert_eq!(before.aggregate.student_average, None);

    for id in 0..4 {
        let outcome = vault.request_decrypt(RecordId(id)).await.unwrap();
        assert!(outcome.score().is_some(), "record {} not revealed", id);
    }

    let after = vault.snapshot();
    assert_eq!(after.aggregate.student_average, Some(90));
    assert_eq!(after.aggregate.global_average, Some(83));
    assert_eq!(after.aggregate.decrypted_count, 4);
    assert_eq!(after.status, LoadStatus::Ready);
}

#[tokio::test]
async fn test_submit_validates_score_and_subject() {
    let (vault, oracle) = open_vault(student(), GatedOracle::open(), VaultSettings::default());

    assert_eq!(
        vault.submit_grade(oracle.as_ref(), "Mathematics", 101).await,
        Err(VaultError::InvalidScore(101))
    );
    assert!(matches!(
        vault.submit_grade(oracle.as_ref(), "   ", 50).await,
        Err(VaultError::LedgerRejected(_))
    ));
    assert!(matches!(
        vault.submit_grade(oracle.as_ref(), &"x".repeat(65), 50).await,
        Err(VaultError::LedgerRejected(_))
    ));
    assert_eq!(vault.ledger().len().await, 0);
    assert!(vault.store().is_empty());
}

#[tokio::test]
async fn test_ledger_outage_degrades_without_losing_records() {
    let (vault, oracle) = open_vault(student(), GatedOracle::open(), VaultSettings::default());

    let id = vault.submit_grade(oracle.as_ref(), "Economics", 77).await.unwrap();
    vault.request_decrypt(id).await.unwrap();

    vault.ledger().set_available(false);
    assert!(matches!(
        vault.refresh().await,
        Err(VaultError::LedgerUnavailable(_))
    ));
    assert!(matches!(
        vault.submit_grade(oracle.as_ref(), "Drama", 66).await,
        Err(VaultError::LedgerUnavailable(_))
    ));

    let view = vault.snapshot();
    assert!(matches!(view.status, LoadStatus::Degraded { .. }));
    assert_eq!(view.records.len(), 1);
    assert_eq!(view.records[0].as_ready().unwrap().display_score, Some(77));

    vault.ledger().set_available(true);
    vault.refresh().await.unwrap();
    assert_eq!(vault.snapshot().status, LoadStatus::Ready);
}

#[tokio::test]
async fn test_submission_during_reveal_keeps_state() {
    let (vault, oracle) = open_vault(student(), GatedOracle::closed(), VaultSettings::default());
    let vault = Arc::new(vault);

    let first = vault.submit_grade(oracle.as_ref(), "Statistics", 91).await.unwrap();
    let reveal = tokio::spawn({
        let vault = vault.clone();
        async move { vault.request_decrypt(first).await }
    });
    oracle.wait_for_calls(1).await;

    let second = vault.submit_grade(oracle.as_ref(), "Philosophy", 68).await.unwrap();
    assert_eq!(
        vault.store().get(first).unwrap().state,
        DecryptionState::Requesting { attempt: 1 }
    );
    assert_eq!(vault.pending().len(), 1);

    oracle.release(1);
    assert_eq!(
        reveal.await.unwrap().unwrap().score(),
        Some(Score::new(91).unwrap())
    );
    assert_eq!(vault.store().get(second).unwrap().state, DecryptionState::Encrypted);
    assert!(vault.pending().is_empty());
}

#[tokio::test]
async fn test_subscribers_receive_pushed_views() {
    let (vault, oracle) = open_vault(student(), GatedOracle::open(), VaultSettings::default());
    let mut views = vault.subscribe();

    let id = vault.submit_grade(oracle.as_ref(), "Astronomy", 84).await.unwrap();
    vault.request_decrypt(id).await.unwrap();

    let view = tokio::time::timeout(
        WAIT,
        views.wait_for(|view| {
            view.card(id)
                .and_then(RecordCard::as_ready)
                .is_some_and(|card| card.decryption_state == StateKind::Decrypted)
        }),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();

    let card = view.card(id).and_then(RecordCard::as_ready).unwrap();
    assert_eq!(card.display_score, Some(84));
    assert_eq!(card.progress, 84);
    assert!(card.owned_by_viewer);
    assert_eq!(view.aggregate.student_average, Some(84));
}

#[tokio::test]
async fn test_owner_visibility_hides_other_records() {
    let settings = VaultSettings {
        visibility: Visibility::Owner,
        ..VaultSettings::default()
    };
    let (vault, oracle) = open_vault(student(), GatedOracle::open(), settings);

    seed_classmate(&vault, &oracle, "Chemistry", 60).await;
    let mine = vault.submit_grade(oracle.as_ref(), "Latin", 72).await.unwrap();

    let view = vault.snapshot();
    assert_eq!(view.records.len(), 1);
    assert_eq!(view.records[0].id(), mine);
    assert_eq!(view.aggregate.total_count, 1);
}

#[tokio::test]
async fn test_unknown_record_is_an_error() {
    let (vault, _oracle) = open_vault(student(), GatedOracle::open(), VaultSettings::default());

    assert_eq!(
        vault.request_decrypt(RecordId(9)).await,
        Err(VaultError::UnknownRecord(RecordId(9)))
    );
}
