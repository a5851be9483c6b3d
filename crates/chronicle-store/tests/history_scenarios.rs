//! Whole-world scenarios: services, participants, and an in-memory store
//! working together across rewinds, restarts, and upgrades.

#![allow(
    clippy::unwrap_used,
    clippy::arithmetic_side_effects,
    clippy::indexing_slicing,
    clippy::missing_panics_doc
)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use chronicle_core::{
    DriveOutcome, Fatal, FatalReport, Historical, HistoricalError, HistoryAccess, RestoreError,
    Services, StoreError, decode_json, drive_automatic, encode_json,
};
use chronicle_store::{History, HistoryStore, InMemoryHistory, InMemoryHistoryStore};
use chronicle_types::{HistoryVersion, Progress, Turn};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

// =============================================================================
// A participant with two data versions
// =============================================================================

/// Version 0 layout.
#[derive(Serialize, Deserialize)]
struct SettlementV0 {
    people: u64,
}

/// Version 1 layout and later.
#[derive(Serialize, Deserialize)]
struct SettlementV1 {
    population: u64,
    name: String,
}

struct Settlement {
    population: Cell<u64>,
    version: u32,
    converts: Cell<u32>,
    found_by_default: bool,
}

impl Settlement {
    fn new(version: u32) -> Rc<Self> {
        Rc::new(Self {
            population: Cell::new(0),
            version,
            converts: Cell::new(0),
            found_by_default: false,
        })
    }

    fn found_by_default(version: u32) -> Rc<Self> {
        Rc::new(Self {
            population: Cell::new(0),
            version,
            converts: Cell::new(0),
            found_by_default: true,
        })
    }

    fn encode(&self, population: u64) -> Result<Vec<u8>, HistoricalError> {
        if self.version == 0 {
            encode_json(&SettlementV0 { people: population })
        } else {
            encode_json(&SettlementV1 {
                population,
                name: "Ashford".to_owned(),
            })
        }
    }
}

impl Historical for Settlement {
    fn history_version(&self) -> HistoryVersion {
        HistoryVersion::new(self.version)
    }

    fn save_history(&self) -> Result<Vec<u8>, HistoricalError> {
        self.encode(self.population.get())
    }

    fn restore_history(&self, data: &[u8]) -> Result<(), HistoricalError> {
        let population = if self.version == 0 {
            decode_json::<SettlementV0>(data)?.people
        } else {
            decode_json::<SettlementV1>(data)?.population
        };
        self.population.set(population);
        Ok(())
    }

    fn convert(&self, data: &[u8], at_version: HistoryVersion) -> Result<Vec<u8>, HistoricalError> {
        if at_version != HistoryVersion::FIRST {
            return Err(HistoricalError::Unconvertible {
                from: at_version,
                to: self.history_version(),
            });
        }
        self.converts.set(self.converts.get() + 1);
        let old: SettlementV0 = decode_json(data)?;
        self.encode(old.people)
    }

    fn no_data_found(&self, turn: Turn) -> Result<Vec<u8>, HistoricalError> {
        if self.found_by_default {
            self.encode(0)
        } else {
            Err(HistoricalError::MissingData { turn })
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

struct World {
    services: Services,
    settlement: Rc<Settlement>,
}

impl World {
    fn new(version: u32) -> Self {
        let services = Services::new(Fatal::panicking());
        let settlement = Settlement::new(version);
        services
            .historian()
            .register("Settlement", settlement.clone());
        Self {
            services,
            settlement,
        }
    }

    fn attach(&self, history: &Rc<InMemoryHistory>) -> Result<(), RestoreError> {
        self.services
            .queue()
            .sync(|ctx| self.services.set_new_history(ctx, history.clone()))
    }

    fn turn(&self, expected: u64) {
        self.services
            .queue()
            .sync(|ctx| self.services.turn_clock().turn(ctx));
        assert_eq!(self.services.turn_clock().this_turn(), Turn::new(expected));
    }

    fn set_current_turn(&self, turn: u64) -> Result<(), RestoreError> {
        self.services
            .queue()
            .sync(|ctx| self.services.set_current_history_turn(ctx, Turn::new(turn)))
    }

    fn this_turn(&self) -> Turn {
        self.services.turn_clock().this_turn()
    }
}

/// Record `populations` as turns 1, 2, ... of a new history written at `version`.
fn recorded_history(
    store: &InMemoryHistoryStore,
    name: &str,
    version: u32,
    populations: &[u64],
) -> Rc<InMemoryHistory> {
    let history = store.create_empty(name).unwrap();
    let writer = World::new(version);
    writer.attach(&history).unwrap();
    for (turn, population) in (1..).zip(populations) {
        writer.settlement.population.set(*population);
        writer.turn(turn);
    }
    history.set_active(false);
    history
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn rewind_and_fast_forward_across_branched_history() {
    let store = InMemoryHistoryStore::new();
    let world = World::new(1);
    world.attach(&store.get_latest_history("TstHistory").unwrap()).unwrap();

    let turn1_value = 55;
    let first_turn2_value = 1004;
    let second_turn2_value = 41511;
    let turn3_value = 1230;

    world.settlement.population.set(turn1_value);
    world.turn(1);
    world.settlement.population.set(first_turn2_value);
    world.turn(2);

    // Rewind to turn 1
    world.set_current_turn(1).unwrap();
    assert_eq!(world.services.turn_clock().next_turn(), Some(Turn::new(2)));
    assert_eq!(world.settlement.population.get(), turn1_value);

    // Turn 2 happens differently this time
    world.settlement.population.set(second_turn2_value);
    world.turn(2);
    world.settlement.population.set(turn3_value);
    world.turn(3);

    world.set_current_turn(2).unwrap();
    assert_eq!(world.settlement.population.get(), second_turn2_value);

    // Forward again
    world.set_current_turn(3).unwrap();
    assert_eq!(world.settlement.population.get(), turn3_value);

    // A turn that never happened
    let result = world.set_current_turn(400);
    assert!(matches!(
        result,
        Err(RestoreError::Load {
            source: StoreError::TurnNotFound { .. },
            ..
        })
    ));
    assert_eq!(world.this_turn(), Turn::new(3));
    assert_eq!(world.settlement.population.get(), turn3_value);
}

#[test]
fn restarted_world_resumes_latest_history() {
    let store = InMemoryHistoryStore::new();
    recorded_history(&store, "Abandoned", 1, &[1]);
    let main = recorded_history(&store, "Main", 1, &[10, 20, 30]);

    let world = World::new(1);
    let latest = store.get_latest_history("Unused").unwrap();
    assert_eq!(latest.name(), "Main");
    world.attach(&latest).unwrap();

    assert_eq!(world.this_turn(), Turn::new(3));
    assert_eq!(world.settlement.population.get(), 30);
    assert_eq!(main.turns(), Turn::new(1)..Turn::new(4));
    assert!(main.is_active());
    assert!(matches!(
        store.delete(&main),
        Err(StoreError::ActiveHistory { .. })
    ));

    world.turn(4);
    assert_eq!(main.most_recent_turn(), Some(Turn::new(4)));
}

#[test]
fn switching_histories_moves_the_active_flag() {
    let store = InMemoryHistoryStore::new();
    let first = recorded_history(&store, "First", 1, &[1, 2]);
    let second = recorded_history(&store, "Second", 1, &[7, 8, 9]);

    let world = World::new(1);
    world.attach(&first).unwrap();
    assert_eq!(world.this_turn(), Turn::new(2));
    world.attach(&second).unwrap();
    assert_eq!(world.this_turn(), Turn::new(3));
    assert_eq!(world.settlement.population.get(), 9);

    assert!(!first.is_active());
    assert!(second.is_active());
    store.delete(&first).unwrap();
}

#[test]
fn upgraded_participant_migrates_each_turn_once() {
    let store = InMemoryHistoryStore::new();
    let history = recorded_history(&store, "Legacy", 0, &[5, 6]);

    let world = World::new(1);
    world.attach(&history).unwrap();
    assert_eq!(world.settlement.population.get(), 6);
    assert_eq!(world.settlement.converts.get(), 1);

    let stored = history.load_data_for_turn(Turn::new(2)).unwrap();
    assert_eq!(stored["Settlement"].version, HistoryVersion::new(1));

    world.set_current_turn(2).unwrap();
    assert_eq!(world.settlement.converts.get(), 1);

    world.set_current_turn(1).unwrap();
    assert_eq!(world.settlement.population.get(), 5);
    assert_eq!(world.settlement.converts.get(), 2);
}

#[test]
fn data_from_a_newer_binary_is_refused() {
    let store = InMemoryHistoryStore::new();
    let history = recorded_history(&store, "Future", 2, &[3]);

    let world = World::new(1);
    let result = world.attach(&history);

    assert!(matches!(
        result,
        Err(RestoreError::VersionMismatch { ref name, stored, supported })
            if name == "Settlement"
                && stored == HistoryVersion::new(2)
                && supported == HistoryVersion::new(1)
    ));
    assert_eq!(world.this_turn(), Turn::INITIAL);
    assert!(!history.is_active());
}

#[test]
fn new_participant_needs_data_or_a_default() {
    let store = InMemoryHistoryStore::new();
    let history = recorded_history(&store, "BeforeTrade", 1, &[4, 5]);

    let strict = World::new(1);
    let market = Settlement::new(1);
    strict.services.historian().register("Market", market);
    let result = strict.attach(&history);
    assert!(matches!(
        result,
        Err(RestoreError::Participant {
            ref name,
            source: HistoricalError::MissingData { turn },
        }) if name == "Market" && turn == Turn::new(2)
    ));
    assert_eq!(strict.this_turn(), Turn::INITIAL);
    assert_eq!(strict.settlement.population.get(), 0);

    let lenient = World::new(1);
    let market = Settlement::found_by_default(1);
    lenient
        .services
        .historian()
        .register("Market", market.clone());
    lenient.attach(&history).unwrap();
    assert_eq!(lenient.this_turn(), Turn::new(2));
    assert_eq!(lenient.settlement.population.get(), 5);
    assert_eq!(market.population.get(), 0);
}

#[test]
fn fatal_errors_reach_the_continuation() {
    let reports: Rc<RefCell<Vec<FatalReport>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&reports);
    let services = Services::new(Fatal::panicking().with_continuation(move |report| {
        sink.borrow_mut().push(report.clone());
    }));
    let store = InMemoryHistoryStore::new();
    let history = store.create_empty("Fatal").unwrap();

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        services.queue().sync(|ctx| {
            services.set_new_history(ctx, history.clone()).unwrap();
            services
                .turn_clock()
                .set_progress(ctx, Progress::Automatic { milliseconds: 100 });
            services.turn_clock().turn(ctx);
        });
    }));

    assert!(outcome.is_err());
    let reports = reports.borrow();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].component, "TurnClock");
    assert!(reports[0].message.contains("manual turn requested"));
    assert!(reports[0].snapshot.contains("progress=auto(100ms)"));
}

#[tokio::test(start_paused = true)]
async fn automatic_world_records_every_turn() {
    let store = InMemoryHistoryStore::new();
    let history = store.create_empty("Automatic").unwrap();
    let world = World::new(1);
    world.attach(&history).unwrap();

    let harvests = Rc::new(Cell::new(0_u32));
    let settlement = Rc::clone(&world.settlement);
    let counted = Rc::clone(&harvests);
    world.services.queue().sync(|ctx| {
        world.services.turn_timer().schedule(ctx, 2, Some(2), move |_ctx| {
            counted.set(counted.get() + 1);
            settlement.population.set(settlement.population.get() + 100);
        });
        world
            .services
            .turn_clock()
            .set_progress(ctx, Progress::Automatic { milliseconds: 100 });
    });

    let stop = Notify::new();
    let (outcome, ()) = tokio::join!(drive_automatic(&world.services, &stop), async {
        tokio::time::sleep(Duration::from_millis(1050)).await;
        stop.notify_one();
    });

    assert_eq!(outcome, DriveOutcome::Stopped);
    assert_eq!(world.this_turn(), Turn::new(10));
    assert_eq!(harvests.get(), 5);
    assert_eq!(history.turns(), Turn::new(1)..Turn::new(11));

    // Rewinding puts the population back but keeps automatic progress.
    world.set_current_turn(4).unwrap();
    assert_eq!(world.settlement.population.get(), 200);
    assert!(world.services.turn_clock().pending_alarm().is_some());
}
