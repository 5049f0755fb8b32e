//! Aggregate statistics over decrypted records.
//!
//! Pure functions of the current record set: recomputed from scratch on every
//! store revision, never updated in place.

use gradevault_sealed::OwnerId;
use serde::Serialize;

use crate::records::GradeRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AggregateSnapshot {
    /// Mean of the viewer's decrypted scores, `None` when there are none
    pub student_average: Option<u8>,
    /// Mean of all decrypted scores visible to the viewer
    pub global_average: Option<u8>,
    pub decrypted_count: usize,
    pub total_count: usize,
}

#[derive(Default)]
struct Mean {
    sum: u64,
    count: u64,
}

impl Mean {
    fn add(&mut self, value: u8) {
        self.sum += u64::from(value);
        self.count += 1;
    }

    /// Rounded half up
    fn rounded(&self) -> Option<u8> {
        if self.count == 0 {
            return None;
        }
        let mean = (2 * self.sum + self.count) / (2 * self.count);
        u8::try_from(mean).ok()
    }
}

/// Compute averages for `viewer` over the decrypted subset of `records`
pub fn compute(records: &[GradeRecord], viewer: &OwnerId) -> AggregateSnapshot {
    let mut student = Mean::default();
    let mut global = Mean::default();

    for record in records {
        let Some(score) = record.plaintext_score() else {
            continue;
        };
        global.add(score.value());
        if record.owner == *viewer {
            student.add(score.value());
        }
    }

    AggregateSnapshot {
        student_average: student.rounded(),
        global_average: global.rounded(),
        decrypted_count: global.count as usize,
        total_count: records.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RevealError;
    use crate::records::{DecryptionState, RecordId};
    use gradevault_sealed::{CiphertextHandle, Score};

    const ME: OwnerId = OwnerId([1u8; 32]);
    const OTHER: OwnerId = OwnerId([2u8; 32]);

    fn record(id: u64, owner: OwnerId, state: DecryptionState) -> GradeRecord {
        GradeRecord {
            id: RecordId(id),
            subject: format!("subject-{}", id),
            owner,
            handle: CiphertextHandle([id as u8; 32]),
            state,
        }
    }

    fn decrypted(id: u64, owner: OwnerId, value: u8) -> GradeRecord {
        record(
            id,
            owner,
            DecryptionState::Decrypted {
                score: Score::new(value).unwrap(),
                attempt: 1,
            },
        )
    }

    #[test]
    fn test_empty_store() {
        assert_eq!(
            compute(&[], &ME),
            AggregateSnapshot {
                student_average: None,
                global_average: None,
                decrypted_count: 0,
                total_count: 0,
            }
        );
    }

    #[test]
    fn test_student_and_global_averages() {
        let records = vec![
            decrypted(0, ME, 80),
            decrypted(1, ME, 90),
            decrypted(2, ME, 100),
            decrypted(3, OTHER, 60),
        ];

        let snapshot = compute(&records, &ME);
        assert_eq!(snapshot.student_average, Some(90));
        // 82.5 rounds half up
        assert_eq!(snapshot.global_average, Some(83));
        assert_eq!(snapshot.decrypted_count, 4);
        assert_eq!(snapshot.total_count, 4);
    }

    #[test]
    fn test_only_decrypted_records_count() {
        let records = vec![
            decrypted(0, ME, 70),
            record(1, ME, DecryptionState::Encrypted),
            record(2, ME, DecryptionState::Requesting { attempt: 1 }),
            record(
                3,
                ME,
                DecryptionState::Failed {
                    attempt: 2,
                    error: RevealError::OracleTimeout,
                },
            ),
        ];

        let snapshot = compute(&records, &ME);
        assert_eq!(snapshot.student_average, Some(70));
        assert_eq!(snapshot.global_average, Some(70));
        assert_eq!(snapshot.decrypted_count, 1);
        assert_eq!(snapshot.total_count, 4);
    }

    #[test]
    fn test_viewer_without_decrypted_records() {
        let records = vec![decrypted(0, OTHER, 55), record(1, ME, DecryptionState::Encrypted)];

        let snapshot = compute(&records, &ME);
        assert_eq!(snapshot.student_average, None);
        assert_eq!(snapshot.global_average, Some(55));
    }

    #[test]
    fn test_rounding_boundaries() {
        let half = vec![decrypted(0, ME, 1), decrypted(1, ME, 2)];
        assert_eq!(compute(&half, &ME).student_average, Some(2));

        let below_half = vec![decrypted(0, ME, 0), decrypted(1, ME, 0), decrypted(2, ME, 1)];
        assert_eq!(compute(&below_half, &ME).student_average, Some(0));

        let extremes = vec![decrypted(0, ME, 0), decrypted(1, ME, 100)];
        assert_eq!(compute(&extremes, &ME).student_average, Some(50));
    }
}
