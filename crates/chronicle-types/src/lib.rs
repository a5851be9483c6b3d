//! Shared type definitions for the Chronicle turn and history core.
//!
//! These types are the vocabulary every other crate in the workspace speaks:
//! the turn counter, the per-participant history version, the bytes recorded
//! for one participant at one turn, and the turn progression mode.
//!
//! # Modules
//!
//! - [`scalars`] -- [`Turn`], [`TurnCount`] and [`HistoryVersion`] newtypes
//! - [`turn_data`] -- [`HistoricalTurnData`] and the per-turn [`TurnData`] map
//! - [`progress`] -- [`Progress`] and its persisted [`ProgressRecord`] form

pub mod progress;
pub mod scalars;
pub mod turn_data;

// Re-export all public types at crate root for convenience.
pub use progress::{Progress, ProgressRecord, ProgressRecordError};
pub use scalars::{HistoryVersion, Turn, TurnCount};
pub use turn_data::{HistoricalTurnData, TurnData};
