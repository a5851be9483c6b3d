//! Turn progression modes and their persisted form.
//!
//! A [`Progress`] is saved as a [`ProgressRecord`]: an object carrying
//! exactly one of two keys, `manual` (a boolean marker) or `automatic` (the
//! period in milliseconds). Readers tell the two apart by which key is
//! present, which keeps history written before any explicit tag existed
//! readable.

use serde::{Deserialize, Serialize};

/// Rules for turn progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "ProgressRecord", try_from = "ProgressRecord")]
pub enum Progress {
    /// Turns occur only when manually requested.
    #[default]
    Manual,

    /// Turns occur automatically with the given gap between them.
    ///
    /// The gap is measured from the end of one turn to the start of the
    /// next, not between successive turn starts.
    Automatic {
        /// Gap between turns in milliseconds.
        milliseconds: u32,
    },
}

impl Progress {
    /// Whether turns are requested manually.
    pub const fn is_manual(self) -> bool {
        matches!(self, Self::Manual)
    }

    /// The automatic period, if any.
    pub const fn period_ms(self) -> Option<u32> {
        match self {
            Self::Manual => None,
            Self::Automatic { milliseconds } => Some(milliseconds),
        }
    }
}

impl core::fmt::Display for Progress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Automatic { milliseconds } => write!(f, "auto({milliseconds}ms)"),
        }
    }
}

/// Persisted form of [`Progress`]: exactly one key is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// Present for [`Progress::Manual`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual: Option<bool>,

    /// Present for [`Progress::Automatic`], holding the period in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automatic: Option<u32>,
}

/// A [`ProgressRecord`] that does not carry exactly one mode key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProgressRecordError {
    /// Neither `manual` nor `automatic` was present.
    #[error("progress record has neither a `manual` nor an `automatic` key")]
    NoMode,

    /// Both `manual` and `automatic` were present.
    #[error("progress record has both `manual` and `automatic` keys")]
    BothModes,
}

impl From<Progress> for ProgressRecord {
    fn from(progress: Progress) -> Self {
        match progress {
            Progress::Manual => Self {
                manual: Some(true),
                automatic: None,
            },
            Progress::Automatic { milliseconds } => Self {
                manual: None,
                automatic: Some(milliseconds),
            },
        }
    }
}

impl TryFrom<ProgressRecord> for Progress {
    type Error = ProgressRecordError;

    fn try_from(record: ProgressRecord) -> Result<Self, Self::Error> {
        match (record.manual, record.automatic) {
            (Some(_), None) => Ok(Self::Manual),
            (None, Some(milliseconds)) => Ok(Self::Automatic { milliseconds }),
            (None, None) => Err(ProgressRecordError::NoMode),
            (Some(_), Some(_)) => Err(ProgressRecordError::BothModes),
        }
    }
}
