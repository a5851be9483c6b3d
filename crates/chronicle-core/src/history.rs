//! The contract between the historian and history storage.
//!
//! A history is a sequence of checkpoints keyed by [`Turn`]. Storage is an
//! external concern: the historian only needs to write the checkpoint for
//! the turn that just ran, read back the checkpoint for any recorded turn,
//! and know the most recent turn written. Implementations are shared via
//! `Rc` and use interior mutability, so every method takes `&self`.

use std::ops::Range;

use chronicle_types::{Turn, TurnData};

/// Errors reported by history storage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The history holds no checkpoint for the requested turn.
    #[error("history `{history}` has no turn {turn} (recorded {}..{})", .turns.start, .turns.end)]
    TurnNotFound {
        /// Name of the history searched.
        history: String,
        /// The turn requested.
        turn: Turn,
        /// The turns the history does hold.
        turns: Range<Turn>,
    },

    /// No history with this name exists in the store.
    #[error("unknown history `{name}`")]
    UnknownHistory {
        /// The name looked up.
        name: String,
    },

    /// A history with this name already exists in the store.
    #[error("history `{name}` already exists")]
    DuplicateHistory {
        /// The conflicting name.
        name: String,
    },

    /// The history is attached to a running world.
    #[error("history `{name}` is active")]
    ActiveHistory {
        /// Name of the active history.
        name: String,
    },

    /// The storage backend failed.
    #[error("history backend error: {message}")]
    Backend {
        /// Backend-specific description.
        message: String,
    },
}

/// Read and write access to one history.
pub trait HistoryAccess {
    /// Human-readable name of the history, used in logs and errors.
    fn name(&self) -> String;

    /// Record the checkpoint for `turn`, replacing any existing one.
    fn set_data_for_turn(&self, turn: Turn, data: TurnData) -> Result<(), StoreError>;

    /// Fetch the checkpoint recorded for `turn`.
    fn load_data_for_turn(&self, turn: Turn) -> Result<TurnData, StoreError>;

    /// The most recent turn written, or `None` for an empty history.
    fn most_recent_turn(&self) -> Option<Turn>;

    /// Whether the history is attached to a running world.
    fn is_active(&self) -> bool;

    /// Mark the history as attached or detached.
    fn set_active(&self, active: bool);
}
