//! Test doubles shared by the unit tests of this crate.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use chronicle_types::{HistoricalTurnData, HistoryVersion, Turn, TurnData};
use serde::{Deserialize, Serialize};

use crate::historical::{Historical, HistoricalError, decode_json, encode_json};
use crate::history::{HistoryAccess, StoreError};

/// A history held in a map, with switchable write failures.
pub(crate) struct MemoryHistory {
    name: String,
    turns: RefCell<BTreeMap<Turn, TurnData>>,
    active: Cell<bool>,
    fail_writes: Cell<bool>,
    writes: Cell<u32>,
}

impl MemoryHistory {
    pub(crate) fn new(name: &str) -> Rc<Self> {
        Rc::new(Self {
            name: name.to_owned(),
            turns: RefCell::new(BTreeMap::new()),
            active: Cell::new(false),
            fail_writes: Cell::new(false),
            writes: Cell::new(0),
        })
    }

    /// Seed a checkpoint without counting it as a write.
    pub(crate) fn insert(&self, turn: Turn, data: TurnData) {
        self.turns.borrow_mut().insert(turn, data);
    }

    pub(crate) fn stored(&self, turn: Turn) -> Option<TurnData> {
        self.turns.borrow().get(&turn).cloned()
    }

    pub(crate) fn fail_writes(&self, fail: bool) {
        self.fail_writes.set(fail);
    }

    pub(crate) fn writes(&self) -> u32 {
        self.writes.get()
    }
}

impl HistoryAccess for MemoryHistory {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn set_data_for_turn(&self, turn: Turn, data: TurnData) -> Result<(), StoreError> {
        if self.fail_writes.get() {
            return Err(StoreError::Backend {
                message: "disk full".to_owned(),
            });
        }
        self.writes.set(self.writes.get().saturating_add(1));
        self.turns.borrow_mut().insert(turn, data);
        Ok(())
    }

    fn load_data_for_turn(&self, turn: Turn) -> Result<TurnData, StoreError> {
        self.stored(turn).ok_or_else(|| StoreError::TurnNotFound {
            history: self.name.clone(),
            turn,
            turns: Turn::INITIAL..Turn::INITIAL,
        })
    }

    fn most_recent_turn(&self) -> Option<Turn> {
        self.turns.borrow().keys().next_back().copied()
    }

    fn is_active(&self) -> bool {
        self.active.get()
    }

    fn set_active(&self, active: bool) {
        self.active.set(active);
    }
}

/// Version 1 encoding of a [`Counter`]; version 0 is a bare number.
#[derive(Serialize, Deserialize)]
struct CounterRecord {
    count: u64,
}

/// A participant holding one number, instrumented for assertions.
pub(crate) struct Counter {
    pub(crate) value: Cell<u64>,
    version: HistoryVersion,
    fallback: Option<u64>,
    fail_restore: Cell<bool>,
    pub(crate) converts: Cell<u32>,
    pub(crate) completes: Cell<u32>,
    pub(crate) fresh_starts: Cell<u32>,
}

impl Counter {
    pub(crate) fn new(version: u32) -> Rc<Self> {
        Self::build(version, None)
    }

    /// A counter that restores `fallback` when its data is missing.
    pub(crate) fn with_fallback(version: u32, fallback: u64) -> Rc<Self> {
        Self::build(version, Some(fallback))
    }

    fn build(version: u32, fallback: Option<u64>) -> Rc<Self> {
        Rc::new(Self {
            value: Cell::new(0),
            version: HistoryVersion::new(version),
            fallback,
            fail_restore: Cell::new(false),
            converts: Cell::new(0),
            completes: Cell::new(0),
            fresh_starts: Cell::new(0),
        })
    }

    pub(crate) fn fail_restore(&self, fail: bool) {
        self.fail_restore.set(fail);
    }

    /// Stored data for `value` written at `version`.
    pub(crate) fn blob(value: u64, version: u32) -> HistoricalTurnData {
        let bytes = encode_at(value, HistoryVersion::new(version)).unwrap_or_default();
        HistoricalTurnData::new(bytes, HistoryVersion::new(version))
    }
}

fn encode_at(value: u64, version: HistoryVersion) -> Result<Vec<u8>, HistoricalError> {
    if version == HistoryVersion::FIRST {
        encode_json(&value)
    } else {
        encode_json(&CounterRecord { count: value })
    }
}

impl Historical for Counter {
    fn history_version(&self) -> HistoryVersion {
        self.version
    }

    fn save_history(&self) -> Result<Vec<u8>, HistoricalError> {
        encode_at(self.value.get(), self.version)
    }

    fn restore_history(&self, data: &[u8]) -> Result<(), HistoricalError> {
        let value = if self.version == HistoryVersion::FIRST {
            decode_json(data)?
        } else {
            decode_json::<CounterRecord>(data)?.count
        };
        self.value.set(value);
        if self.fail_restore.get() {
            return Err(HistoricalError::Invalid {
                reason: "counter refused".to_owned(),
            });
        }
        Ok(())
    }

    fn convert(&self, data: &[u8], at_version: HistoryVersion) -> Result<Vec<u8>, HistoricalError> {
        if at_version != HistoryVersion::FIRST {
            return Err(HistoricalError::Unconvertible {
                from: at_version,
                to: self.version,
            });
        }
        self.converts.set(self.converts.get().saturating_add(1));
        let count: u64 = decode_json(data)?;
        encode_at(count, self.version)
    }

    fn initialize_fresh(&self) -> Result<(), HistoricalError> {
        self.fresh_starts.set(self.fresh_starts.get().saturating_add(1));
        self.value.set(0);
        Ok(())
    }

    fn no_data_found(&self, turn: Turn) -> Result<Vec<u8>, HistoricalError> {
        match self.fallback {
            Some(value) => encode_at(value, self.version),
            None => Err(HistoricalError::MissingData { turn }),
        }
    }

    fn restore_complete(&self) {
        self.completes.set(self.completes.get().saturating_add(1));
    }
}
