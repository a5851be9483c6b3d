//! The data recorded for one turn of history.
//!
//! Each participant contributes one [`HistoricalTurnData`] per turn: its
//! encoded state plus the [`HistoryVersion`] that encoding was written at.
//! A [`TurnData`] map keyed by participant name is one complete checkpoint.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::scalars::HistoryVersion;

/// The data stored per participant per turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalTurnData {
    /// Encoded participant state.
    pub turn_data: Vec<u8>,
    /// Version of `turn_data`.
    pub version: HistoryVersion,
}

impl HistoricalTurnData {
    /// Bundle encoded state with the version it was written at.
    pub const fn new(turn_data: Vec<u8>, version: HistoryVersion) -> Self {
        Self { turn_data, version }
    }
}

/// One checkpoint: participant name to that participant's data.
pub type TurnData = BTreeMap<String, HistoricalTurnData>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn turn_data_serde_preserves_bytes_and_version() {
        let mut data = TurnData::new();
        data.insert(
            "Counter".to_owned(),
            HistoricalTurnData::new(vec![1, 2, 255], HistoryVersion::new(4)),
        );

        let json = serde_json::to_vec(&data).unwrap();
        let restored: TurnData = serde_json::from_slice(&json).unwrap();
        assert_eq!(restored, data);
    }
}
