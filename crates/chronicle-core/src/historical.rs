//! The participant side of history.
//!
//! Any component whose state must survive a rewind implements
//! [`Historical`] and registers with the [`Historian`](crate::Historian)
//! under a stable name. Each participant chooses its own encoding; the
//! [`encode_json`] and [`decode_json`] helpers cover the common case.
//!
//! Restore happens in two passes. First every participant restores its own
//! state ([`Historical::restore_history`] or
//! [`Historical::initialize_fresh`]); only when all have succeeded is
//! [`Historical::restore_complete`] called, so participants can re-establish
//! relationships against each other's now-consistent state.

use chronicle_types::{HistoryVersion, Turn};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Errors reported by participants while saving or restoring.
#[derive(Debug, thiserror::Error)]
pub enum HistoricalError {
    /// The checkpoint holds no data for the participant.
    #[error("no data found at turn {turn}")]
    MissingData {
        /// The turn being restored.
        turn: Turn,
    },

    /// Data at an older version could not be migrated.
    #[error("cannot convert history data from version {from} to {to}")]
    Unconvertible {
        /// Version the data was written at.
        from: HistoryVersion,
        /// Version the participant supports.
        to: HistoryVersion,
    },

    /// Data could not be encoded or decoded.
    #[error("history codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Data decoded but describes an impossible state.
    #[error("invalid history data: {reason}")]
    Invalid {
        /// What is wrong with the data.
        reason: String,
    },
}

/// A component that saves its state every turn and can be restored to any
/// saved turn.
///
/// Every method is called on the turn queue.
pub trait Historical {
    /// The data version this participant reads and writes.
    fn history_version(&self) -> HistoryVersion {
        HistoryVersion::FIRST
    }

    /// Encode current state at [`Historical::history_version`].
    fn save_history(&self) -> Result<Vec<u8>, HistoricalError>;

    /// Replace current state with `data`, which is at
    /// [`Historical::history_version`].
    fn restore_history(&self, data: &[u8]) -> Result<(), HistoricalError>;

    /// Migrate `data` written at `at_version` to
    /// [`Historical::history_version`].
    ///
    /// The result is written back to the history before it is restored, so
    /// each stored turn is migrated at most once.
    fn convert(&self, data: &[u8], at_version: HistoryVersion) -> Result<Vec<u8>, HistoricalError> {
        let _ = data;
        Err(HistoricalError::Unconvertible {
            from: at_version,
            to: self.history_version(),
        })
    }

    /// Reset to a fresh state because an empty history was attached.
    fn initialize_fresh(&self) -> Result<(), HistoricalError> {
        Ok(())
    }

    /// Supply data when a non-empty history has nothing for this
    /// participant at `turn`.
    ///
    /// Returning bytes (at [`Historical::history_version`]) restores from
    /// them; the default fails the restore.
    fn no_data_found(&self, turn: Turn) -> Result<Vec<u8>, HistoricalError> {
        Err(HistoricalError::MissingData { turn })
    }

    /// Called once every participant has restored successfully.
    fn restore_complete(&self) {}
}

/// Encode `value` as JSON for [`Historical::save_history`].
pub fn encode_json<T: Serialize>(value: &T) -> Result<Vec<u8>, HistoricalError> {
    Ok(serde_json::to_vec(value)?)
}

/// Decode JSON produced by [`encode_json`].
pub fn decode_json<T: DeserializeOwned>(data: &[u8]) -> Result<T, HistoricalError> {
    Ok(serde_json::from_slice(data)?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::Cell;

    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Position {
        x: i32,
        y: i32,
    }

    struct Minimal {
        value: Cell<u32>,
    }

    impl Historical for Minimal {
        fn save_history(&self) -> Result<Vec<u8>, HistoricalError> {
            encode_json(&self.value.get())
        }

        fn restore_history(&self, data: &[u8]) -> Result<(), HistoricalError> {
            self.value.set(decode_json(data)?);
            Ok(())
        }
    }

    #[test]
    fn json_helpers_round_trip() {
        let bytes = encode_json(&Position { x: 3, y: -4 }).unwrap();
        let position: Position = decode_json(&bytes).unwrap();
        assert_eq!(position, Position { x: 3, y: -4 });
    }

    #[test]
    fn decode_of_garbage_is_codec_error() {
        let result: Result<Position, _> = decode_json(b"not json");
        assert!(matches!(result, Err(HistoricalError::Codec(_))));
    }

    #[test]
    fn defaults_refuse_conversion_and_missing_data() {
        let minimal = Minimal {
            value: Cell::new(7),
        };
        assert_eq!(minimal.history_version(), HistoryVersion::FIRST);
        assert!(minimal.initialize_fresh().is_ok());
        assert_eq!(minimal.value.get(), 7);

        let convert = minimal.convert(b"7", HistoryVersion::new(2));
        assert!(matches!(
            convert,
            Err(HistoricalError::Unconvertible { from, to })
                if from == HistoryVersion::new(2) && to == HistoryVersion::FIRST
        ));

        let missing = minimal.no_data_found(Turn::new(9));
        assert!(matches!(
            missing,
            Err(HistoricalError::MissingData { turn }) if turn == Turn::new(9)
        ));
    }
}
