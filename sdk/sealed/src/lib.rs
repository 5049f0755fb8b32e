//! gradevault sealing primitives
//!
//! Scores are stored on a public ledger only as opaque ciphertext handles.
//! This crate provides the pieces on both sides of that boundary:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  1. Student seals a score          ──▶  handle goes to the ledger │
//! │  2. Student signs a reveal permit  ──▶  permit goes to the oracle │
//! │  3. Oracle checks permit + ACL     ──▶  plaintext score returned  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod errors;
pub mod identity;
pub mod score;
pub mod sealing;

pub use errors::SealError;
pub use identity::{Authorization, Identity, OwnerId};
pub use score::{MAX_SCORE, Score};
pub use sealing::{CiphertextHandle, SealedScore, SealingKey};
