use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::SealError;

/// Highest representable score
pub const MAX_SCORE: u8 = 100;

/// A plaintext score in `0..=100`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Score(u8);

impl Score {
    pub fn new(value: u8) -> Result<Self, SealError> {
        if value > MAX_SCORE {
            return Err(SealError::InvalidScore(value));
        }
        Ok(Self(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub(crate) fn to_bytes(self) -> [u8; 1] {
        [self.0]
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Self, SealError> {
        match bytes {
            [value] => Self::new(*value),
            _ => Err(SealError::DecryptionFailed),
        }
    }
}

impl TryFrom<u8> for Score {
    type Error = SealError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Score> for u8 {
    fn from(score: Score) -> Self {
        score.0
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.0, MAX_SCORE)
    }
}
