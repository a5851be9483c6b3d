//! Contracts for managing a collection of histories.

use std::ops::Range;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use chronicle_core::config::HistoryConfig;
use chronicle_core::{HistoryAccess, StoreError};
use chronicle_types::Turn;

/// A world history along with metadata for choosing between histories.
pub trait History: HistoryAccess {
    /// When the history was created or last written.
    fn access_time(&self) -> DateTime<Utc>;

    /// The turns the history covers.
    ///
    /// Empty is `INITIAL..INITIAL`; otherwise the range runs from turn 1 to
    /// one past the highest turn written.
    fn turns(&self) -> Range<Turn>;

    /// Opaque data stored alongside the history by the application.
    fn client_data(&self) -> Option<Vec<u8>>;

    /// Replace the application's opaque data.
    fn set_client_data(&self, data: Option<Vec<u8>>);
}

/// A manager of alternative histories.
pub trait HistoryStore {
    /// The kind of history this store holds.
    type History: History;

    /// Every history in the store. May be empty.
    fn histories(&self) -> Vec<Rc<Self::History>>;

    /// Remove `history` from the store.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownHistory`] if the store has no such history,
    /// [`StoreError::ActiveHistory`] if it is attached to a running world.
    fn delete(&self, history: &Self::History) -> Result<(), StoreError>;

    /// Create a new, empty history.
    ///
    /// # Errors
    ///
    /// [`StoreError::DuplicateHistory`] if the name is taken.
    fn create_empty(&self, name: &str) -> Result<Rc<Self::History>, StoreError>;

    /// The most recently accessed history, or a new one called
    /// `newly_named` if the store is empty.
    fn get_latest_history(&self, newly_named: &str) -> Result<Rc<Self::History>, StoreError> {
        match self
            .histories()
            .into_iter()
            .max_by_key(|history| history.access_time())
        {
            Some(latest) => Ok(latest),
            None => self.create_empty(newly_named),
        }
    }

    /// The history a restarting world should resume: the latest one, or a
    /// new one named by `config.default_name`.
    fn resume_latest(&self, config: &HistoryConfig) -> Result<Rc<Self::History>, StoreError> {
        self.get_latest_history(&config.default_name)
    }
}
