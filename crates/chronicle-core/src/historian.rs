//! Saving every turn and restoring the world to any saved turn.
//!
//! The [`Historian`] keeps the registry of [`Historical`] participants and
//! the currently attached [`HistoryAccess`]. After each turn it collects
//! every participant's state into one checkpoint. On request it puts every
//! participant back to the state recorded at some turn.
//!
//! # Restore protocol
//!
//! A restore either succeeds for every participant or leaves all of them
//! untouched:
//!
//! 1. Load the checkpoint for the turn.
//! 2. Plan: work out the bytes each participant will restore from, asking
//!    for substitute data when an entry is missing and migrating entries
//!    written at an older version. Nothing is modified yet.
//! 3. Write migrated entries back, so later restores skip the conversion.
//! 4. Snapshot every participant, then restore each in registration order.
//!    If one fails, those already restored are put back from the snapshots.
//! 5. Tell every participant the restore is complete.

use std::cell::RefCell;
use std::rc::Rc;

use chronicle_types::{HistoricalTurnData, HistoryVersion, Turn, TurnData};
use tracing::{debug, error, info, warn};

use crate::fatal::Fatal;
use crate::historical::{Historical, HistoricalError};
use crate::history::{HistoryAccess, StoreError};
use crate::queue::{QueueId, TurnContext, TurnQueue};

/// Component name used in logs and fatal reports.
const COMPONENT: &str = "Historian";

/// A restore that failed without modifying any participant.
#[derive(Debug, thiserror::Error)]
pub enum RestoreError {
    /// The checkpoint could not be read.
    #[error("failed to load turn {turn}: {source}")]
    Load {
        /// The turn requested.
        turn: Turn,
        /// The storage failure.
        source: StoreError,
    },

    /// Migrated data could not be written back.
    #[error("failed to write back migrated data for turn {turn}: {source}")]
    WriteBack {
        /// The turn being restored.
        turn: Turn,
        /// The storage failure.
        source: StoreError,
    },

    /// Stored data is newer than the participant understands.
    #[error(
        "history data for `{name}` is version {stored} but only version {supported} is supported"
    )]
    VersionMismatch {
        /// The participant.
        name: String,
        /// Version of the stored data.
        stored: HistoryVersion,
        /// Version the participant declares.
        supported: HistoryVersion,
    },

    /// A participant could not produce or accept its data.
    #[error("participant `{name}` failed to restore: {source}")]
    Participant {
        /// The participant.
        name: String,
        /// What the participant reported.
        source: HistoricalError,
    },
}

/// One registered participant.
#[derive(Clone)]
struct Participant {
    name: String,
    historical: Rc<dyn Historical>,
}

impl Participant {
    fn failed(&self, source: HistoricalError) -> RestoreError {
        RestoreError::Participant {
            name: self.name.clone(),
            source,
        }
    }
}

/// What a participant will be restored from.
enum Source {
    /// Start fresh: the attached history is empty.
    Fresh,
    /// Restore from these bytes, already at the declared version.
    Data(Vec<u8>),
}

struct HistorianInner {
    queue: QueueId,
    fatal: Fatal,
    participants: RefCell<Vec<Participant>>,
    store: RefCell<Option<Rc<dyn HistoryAccess>>>,
}

/// Saves and restores the state of every registered participant.
///
/// Cloning produces another handle to the same historian.
#[derive(Clone)]
pub struct Historian {
    inner: Rc<HistorianInner>,
}

impl core::fmt::Debug for Historian {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.describe())
    }
}

impl Historian {
    /// Create a historian bound to `queue` with no participants and no history.
    pub fn new(queue: &TurnQueue, fatal: Fatal) -> Self {
        Self {
            inner: Rc::new(HistorianInner {
                queue: queue.id(),
                fatal,
                participants: RefCell::new(Vec::new()),
                store: RefCell::new(None),
            }),
        }
    }

    /// Add a participant to every future save and restore.
    ///
    /// Registration belongs to world initialization: registering once a
    /// history is attached, or reusing a name, is fatal.
    #[track_caller]
    pub fn register(&self, name: impl Into<String>, historical: Rc<dyn Historical>) {
        let name = name.into();
        if self.inner.store.borrow().is_some() {
            self.inner.fatal.raise(
                COMPONENT,
                format!("participant `{name}` registered after a history was attached"),
                self.describe(),
            );
        }
        let Ok(mut participants) = self.inner.participants.try_borrow_mut() else {
            self.inner.fatal.raise(
                COMPONENT,
                format!("participant `{name}` registered during save or restore"),
                self.describe(),
            );
        };
        if participants.iter().any(|existing| existing.name == name) {
            drop(participants);
            self.inner.fatal.raise(
                COMPONENT,
                format!("multiple participants registering as `{name}`"),
                self.describe(),
            );
        }
        debug!(participant = %name, "Registered history participant");
        participants.push(Participant { name, historical });
    }

    /// Names of registered participants, in registration order.
    pub fn participant_names(&self) -> Vec<String> {
        self.inner
            .participants
            .borrow()
            .iter()
            .map(|participant| participant.name.clone())
            .collect()
    }

    /// The attached history, if any.
    pub fn store(&self) -> Option<Rc<dyn HistoryAccess>> {
        self.inner.store.borrow().clone()
    }

    /// Record every participant's state as the checkpoint for `turn`.
    ///
    /// Called after each turn completes. Failures to encode or store are
    /// logged and the turn goes unrecorded; the world carries on.
    #[track_caller]
    pub fn save(&self, ctx: &TurnContext, turn: Turn) {
        self.check(ctx);
        if turn.is_initial() {
            self.inner.fatal.raise(
                COMPONENT,
                "attempt to save the initial turn",
                self.describe(),
            );
        }
        let Some(store) = self.store() else {
            self.inner.fatal.raise(
                COMPONENT,
                "call to save history but no history attached",
                self.describe(),
            );
        };

        let mut data = TurnData::new();
        for participant in self.roster() {
            match participant.historical.save_history() {
                Ok(bytes) => {
                    let version = participant.historical.history_version();
                    data.insert(participant.name, HistoricalTurnData::new(bytes, version));
                }
                Err(error) => {
                    warn!(
                        %turn,
                        participant = %participant.name,
                        %error,
                        "Failed to save participant, turn not recorded"
                    );
                    return;
                }
            }
        }

        if let Err(error) = store.set_data_for_turn(turn, data) {
            warn!(%turn, history = %store.name(), %error, "Failed to save turn data, pressing on");
        }
    }

    /// Put every participant back to its state at `turn` of the attached history.
    #[track_caller]
    pub fn restore_at_turn(&self, ctx: &TurnContext, turn: Turn) -> Result<(), RestoreError> {
        self.check(ctx);
        let Some(store) = self.store() else {
            self.inner.fatal.raise(
                COMPONENT,
                "call to restore history but no history attached",
                self.describe(),
            );
        };
        self.restore_from(store.as_ref(), turn)
    }

    /// Start every participant afresh, as for a world with no history.
    #[track_caller]
    pub fn restore_at_initial_turn(&self, ctx: &TurnContext) -> Result<(), RestoreError> {
        self.check(ctx);
        self.restore_fresh()
    }

    /// Attach `store` and restore the world from it.
    ///
    /// The previous history, if any, is deactivated and `store` activated.
    /// The world is restored at the store's most recent turn, or started
    /// fresh if the store is empty. If that restore fails the previous
    /// history is attached again and the error returned.
    #[track_caller]
    pub fn set_store(
        &self,
        ctx: &TurnContext,
        store: Rc<dyn HistoryAccess>,
    ) -> Result<(), RestoreError> {
        self.check(ctx);
        let previous = self.inner.store.replace(None);
        if let Some(previous) = &previous {
            previous.set_active(false);
        }
        store.set_active(true);
        *self.inner.store.borrow_mut() = Some(Rc::clone(&store));

        let result = match store.most_recent_turn() {
            Some(turn) => self.restore_from(store.as_ref(), turn),
            None => self.restore_fresh(),
        };

        if let Err(error) = &result {
            warn!(history = %store.name(), %error, "Failed to attach history, reverting");
            store.set_active(false);
            if let Some(previous) = &previous {
                previous.set_active(true);
            }
            *self.inner.store.borrow_mut() = previous;
        }
        result
    }

    /// One-line description of current state, for fatal reports.
    pub fn describe(&self) -> String {
        let participants = self.inner.participants.try_borrow().map_or_else(
            |_| "(busy)".to_owned(),
            |participants| {
                participants
                    .iter()
                    .map(|participant| participant.name.as_str())
                    .collect::<Vec<_>>()
                    .join(",")
            },
        );
        let history = self.inner.store.try_borrow().map_or_else(
            |_| "(busy)".to_owned(),
            |store| store.as_ref().map_or_else(|| "(none)".to_owned(), |store| store.name()),
        );
        format!("{COMPONENT} participants=[{participants}] history={history}")
    }

    #[track_caller]
    fn check(&self, ctx: &TurnContext) {
        self.inner
            .fatal
            .check_queue(COMPONENT, self.inner.queue, ctx, || self.describe());
    }

    /// Registered participants, copied out so no borrow is held while
    /// participant code runs.
    fn roster(&self) -> Vec<Participant> {
        self.inner.participants.borrow().clone()
    }

    fn restore_from(&self, store: &dyn HistoryAccess, turn: Turn) -> Result<(), RestoreError> {
        info!(%turn, history = %store.name(), "Restoring history");
        let mut data = store
            .load_data_for_turn(turn)
            .map_err(|source| RestoreError::Load { turn, source })?;

        let roster = self.roster();
        let mut plan = Vec::with_capacity(roster.len());
        let mut migrated = false;
        for participant in roster {
            let supported = participant.historical.history_version();
            let bytes = match data.get(&participant.name).cloned() {
                None => {
                    debug!(%turn, participant = %participant.name, "No data found for participant");
                    participant
                        .historical
                        .no_data_found(turn)
                        .map_err(|source| participant.failed(source))?
                }
                Some(stored) if stored.version > supported => {
                    return Err(RestoreError::VersionMismatch {
                        name: participant.name,
                        stored: stored.version,
                        supported,
                    });
                }
                Some(stored) if stored.version < supported => {
                    debug!(
                        %turn,
                        participant = %participant.name,
                        from = %stored.version,
                        to = %supported,
                        "Migrating participant data"
                    );
                    let converted = participant
                        .historical
                        .convert(&stored.turn_data, stored.version)
                        .map_err(|source| participant.failed(source))?;
                    data.insert(
                        participant.name.clone(),
                        HistoricalTurnData::new(converted.clone(), supported),
                    );
                    migrated = true;
                    converted
                }
                Some(stored) => stored.turn_data,
            };
            plan.push((participant, Source::Data(bytes)));
        }

        if migrated {
            store
                .set_data_for_turn(turn, data)
                .map_err(|source| RestoreError::WriteBack { turn, source })?;
        }

        Self::commit(&plan)?;
        info!(%turn, "Restore complete");
        Ok(())
    }

    fn restore_fresh(&self) -> Result<(), RestoreError> {
        info!("Starting history afresh");
        let plan: Vec<_> = self
            .roster()
            .into_iter()
            .map(|participant| (participant, Source::Fresh))
            .collect();
        Self::commit(&plan)
    }

    /// Apply a plan to every participant, or to none of them.
    fn commit(plan: &[(Participant, Source)]) -> Result<(), RestoreError> {
        let snapshots = plan
            .iter()
            .map(|(participant, _)| {
                participant
                    .historical
                    .save_history()
                    .map_err(|source| participant.failed(source))
            })
            .collect::<Result<Vec<_>, _>>()?;

        for (index, (participant, source)) in plan.iter().enumerate() {
            let applied = match source {
                Source::Fresh => participant.historical.initialize_fresh(),
                Source::Data(bytes) => participant.historical.restore_history(bytes),
            };
            if let Err(source) = applied {
                warn!(participant = %participant.name, error = %source, "Restore failed, rolling back");
                let touched = plan.get(..=index).unwrap_or_default();
                for ((participant, _), snapshot) in touched.iter().zip(&snapshots) {
                    if let Err(error) = participant.historical.restore_history(snapshot) {
                        error!(participant = %participant.name, %error, "Rollback failed");
                    }
                }
                return Err(participant.failed(source));
            }
        }

        for (participant, _) in plan {
            participant.historical.restore_complete();
        }
        Ok(())
    }
}
