//! Turn progression and history for the Chronicle simulation core.
//!
//! This crate owns the logical clock of a deterministic, turn-based world,
//! the record of that world's history, and callbacks scheduled against
//! future turns. Everything that mutates turn state runs on a single serial
//! [`TurnQueue`]; the [`TurnContext`] it hands out is the proof of access
//! every mutating operation demands.
//!
//! # Modules
//!
//! - [`queue`] -- [`TurnQueue`] and the [`TurnContext`] capability.
//! - [`fatal`] -- [`Fatal`] hook for unrecoverable programming errors.
//! - [`clock`] -- [`TurnClock`]: the turn counter and progression mode.
//! - [`timer`] -- [`TurnTimer`]: delta-queue of turn-relative callbacks.
//! - [`historical`] -- [`Historical`] trait implemented by saved components.
//! - [`history`] -- [`HistoryAccess`] contract for history storage.
//! - [`historian`] -- [`Historian`]: saves every turn, restores any turn.
//! - [`services`] -- [`Services`] bundle coordinating the above.
//! - [`driver`] -- Tokio driver for automatic turn progression.
//! - [`config`] -- Configuration loading from YAML into typed structs.
//! - [`telemetry`] -- Structured logging setup.

pub mod clock;
pub mod config;
pub mod driver;
pub mod fatal;
pub mod historian;
pub mod historical;
pub mod history;
pub mod queue;
pub mod services;
pub mod telemetry;
pub mod timer;

#[cfg(test)]
pub(crate) mod testing;

pub use clock::{Alarm, TURN_CLOCK_NAME, TurnClock, TurnListener};
pub use config::{ChronicleConfig, ConfigError};
pub use driver::{DriveOutcome, drive_automatic};
pub use fatal::{Fatal, FatalContinuation, FatalReport};
pub use historian::{Historian, RestoreError};
pub use historical::{Historical, HistoricalError, decode_json, encode_json};
pub use history::{HistoryAccess, StoreError};
pub use queue::{QueueId, TurnContext, TurnQueue};
pub use services::Services;
pub use timer::{TimerCallback, TimerToken, TurnTimer};
