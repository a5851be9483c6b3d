//! A history store that keeps everything in memory.
//!
//! Meant for tests, tools, and worlds that do not need to outlive the
//! process. Every turn ever written is kept, so a world can rewind to any
//! recorded turn and fast-forward again.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::ops::Range;
use std::rc::Rc;

use chrono::{DateTime, TimeDelta, Utc};
use chronicle_core::{HistoryAccess, StoreError};
use chronicle_types::{Turn, TurnData};
use tracing::{debug, info};

use crate::store::{History, HistoryStore};

/// Hands out access times that strictly increase within one store, so the
/// latest history is well defined even on a coarse system clock.
#[derive(Debug)]
struct AccessClock {
    last: Cell<DateTime<Utc>>,
}

impl AccessClock {
    fn new() -> Self {
        Self {
            last: Cell::new(DateTime::<Utc>::MIN_UTC),
        }
    }

    fn stamp(&self) -> DateTime<Utc> {
        let last = self.last.get();
        let now = Utc::now();
        let stamp = if now > last {
            now
        } else {
            last.checked_add_signed(TimeDelta::nanoseconds(1))
                .unwrap_or(last)
        };
        self.last.set(stamp);
        stamp
    }
}

/// One history held in memory.
#[derive(Debug)]
pub struct InMemoryHistory {
    name: String,
    clock: Rc<AccessClock>,
    access_time: Cell<DateTime<Utc>>,
    turns: RefCell<BTreeMap<Turn, TurnData>>,
    highest_turn: Cell<Turn>,
    active: Cell<bool>,
    client_data: RefCell<Option<Vec<u8>>>,
}

impl InMemoryHistory {
    fn new(name: &str, clock: Rc<AccessClock>) -> Self {
        let access_time = clock.stamp();
        Self {
            name: name.to_owned(),
            clock,
            access_time: Cell::new(access_time),
            turns: RefCell::new(BTreeMap::new()),
            highest_turn: Cell::new(Turn::INITIAL),
            active: Cell::new(false),
            client_data: RefCell::new(None),
        }
    }

    fn is_empty(&self) -> bool {
        self.highest_turn.get().is_initial()
    }
}

impl core::fmt::Display for InMemoryHistory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let turns = self.turns();
        write!(
            f,
            "{} turns {}..{} last accessed {}",
            self.name,
            turns.start,
            turns.end,
            self.access_time.get()
        )
    }
}

impl HistoryAccess for InMemoryHistory {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn set_data_for_turn(&self, turn: Turn, data: TurnData) -> Result<(), StoreError> {
        self.turns.borrow_mut().insert(turn, data);
        self.highest_turn.set(self.highest_turn.get().max(turn));
        self.access_time.set(self.clock.stamp());
        Ok(())
    }

    fn load_data_for_turn(&self, turn: Turn) -> Result<TurnData, StoreError> {
        self.turns
            .borrow()
            .get(&turn)
            .cloned()
            .ok_or_else(|| StoreError::TurnNotFound {
                history: self.name.clone(),
                turn,
                turns: self.turns(),
            })
    }

    fn most_recent_turn(&self) -> Option<Turn> {
        if self.is_empty() {
            None
        } else {
            Some(self.highest_turn.get())
        }
    }

    fn is_active(&self) -> bool {
        self.active.get()
    }

    fn set_active(&self, active: bool) {
        self.active.set(active);
    }
}

impl History for InMemoryHistory {
    fn access_time(&self) -> DateTime<Utc> {
        self.access_time.get()
    }

    fn turns(&self) -> Range<Turn> {
        match self.most_recent_turn() {
            None => Turn::INITIAL..Turn::INITIAL,
            Some(highest) => Turn::new(1)..highest.next().unwrap_or(highest),
        }
    }

    fn client_data(&self) -> Option<Vec<u8>> {
        self.client_data.borrow().clone()
    }

    fn set_client_data(&self, data: Option<Vec<u8>>) {
        *self.client_data.borrow_mut() = data;
    }
}

/// A store of histories held in memory.
#[derive(Debug)]
pub struct InMemoryHistoryStore {
    clock: Rc<AccessClock>,
    histories: RefCell<BTreeMap<String, Rc<InMemoryHistory>>>,
}

impl Default for InMemoryHistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryHistoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            clock: Rc::new(AccessClock::new()),
            histories: RefCell::new(BTreeMap::new()),
        }
    }

    /// Multi-line description of every history, for debugging.
    pub fn describe(&self) -> String {
        let histories = self.histories.borrow();
        let mut out = format!("{} histories", histories.len());
        for history in histories.values() {
            out.push_str("\n  ");
            out.push_str(&history.to_string());
        }
        out
    }
}

impl HistoryStore for InMemoryHistoryStore {
    type History = InMemoryHistory;

    fn histories(&self) -> Vec<Rc<InMemoryHistory>> {
        self.histories.borrow().values().cloned().collect()
    }

    fn delete(&self, history: &InMemoryHistory) -> Result<(), StoreError> {
        let mut histories = self.histories.borrow_mut();
        if !histories.contains_key(&history.name) {
            return Err(StoreError::UnknownHistory {
                name: history.name.clone(),
            });
        }
        if history.is_active() {
            return Err(StoreError::ActiveHistory {
                name: history.name.clone(),
            });
        }
        histories.remove(&history.name);
        info!(history = %history.name, "Deleted history");
        Ok(())
    }

    fn create_empty(&self, name: &str) -> Result<Rc<InMemoryHistory>, StoreError> {
        let mut histories = self.histories.borrow_mut();
        if histories.contains_key(name) {
            return Err(StoreError::DuplicateHistory {
                name: name.to_owned(),
            });
        }
        let history = Rc::new(InMemoryHistory::new(name, Rc::clone(&self.clock)));
        histories.insert(name.to_owned(), Rc::clone(&history));
        debug!(history = %name, "Created empty history");
        Ok(history)
    }
}
