//! The turn clock: the logical time of the world.
//!
//! The clock owns the current [`Turn`] and the [`Progress`] mode. Each new
//! turn increments the counter, notifies every registered listener in
//! registration order, and then asks the [`Historian`] to record the turn.
//!
//! # Progress
//!
//! In [`Progress::Manual`] turns happen only when [`TurnClock::turn`] is
//! called. In [`Progress::Automatic`] the clock arms an [`Alarm`]; whoever
//! drives the clock (see [`crate::driver`]) waits until the alarm's
//! deadline and then calls [`TurnClock::alarm_fired`] on the turn queue.
//! The next alarm is armed when that turn finishes, so the period is the
//! gap between turns rather than between turn starts.
//!
//! # History
//!
//! The clock registers itself with the historian as [`TURN_CLOCK_NAME`].
//! Restoring that state sets the turn and mode directly without arming
//! anything; [`TurnClock::restart_after_restore`] then re-applies the mode.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use chronicle_types::{Progress, Turn};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::fatal::Fatal;
use crate::historian::Historian;
use crate::historical::{Historical, HistoricalError, decode_json, encode_json};
use crate::queue::{QueueId, TurnContext, TurnQueue};

/// Name under which the clock's own state is recorded in history.
pub const TURN_CLOCK_NAME: &str = "TurnClock";

/// A callback run at the start of every turn.
pub type TurnListener = Box<dyn FnMut(Turn, &TurnContext)>;

/// A pending automatic turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alarm {
    /// Identifies this arming; pass it back to [`TurnClock::alarm_fired`].
    pub generation: u64,
    /// When the next turn is due.
    pub deadline: Instant,
    /// The automatic period the alarm was armed with.
    pub period: Duration,
}

/// State saved in history: the turn and the progress mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct ClockState {
    this_turn: Turn,
    #[serde(flatten)]
    progress: Progress,
}

/// History participant for the clock state.
///
/// Restores write the state directly; mode transitions are the job of
/// [`TurnClock::restart_after_restore`].
struct ClockHistory {
    state: Rc<Cell<ClockState>>,
}

impl Historical for ClockHistory {
    fn save_history(&self) -> Result<Vec<u8>, HistoricalError> {
        encode_json(&self.state.get())
    }

    fn restore_history(&self, data: &[u8]) -> Result<(), HistoricalError> {
        self.state.set(decode_json(data)?);
        Ok(())
    }

    fn initialize_fresh(&self) -> Result<(), HistoricalError> {
        let mut state = self.state.get();
        state.this_turn = Turn::INITIAL;
        self.state.set(state);
        Ok(())
    }
}

struct ClockInner {
    queue: QueueId,
    fatal: Fatal,
    historian: Historian,
    state: Rc<Cell<ClockState>>,
    listeners: RefCell<Vec<TurnListener>>,
    alarm: Cell<Option<Alarm>>,
    last_generation: Cell<u64>,
    /// Set while listeners for a turn are running.
    dispatching: Cell<bool>,
}

/// Source of turns.
///
/// Cloning produces another handle to the same clock.
#[derive(Clone)]
pub struct TurnClock {
    inner: Rc<ClockInner>,
}

impl core::fmt::Debug for TurnClock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.describe())
    }
}

impl TurnClock {
    /// Create a clock at [`Turn::INITIAL`] in manual mode and register its
    /// state with `historian`.
    #[track_caller]
    pub fn new(queue: &TurnQueue, historian: &Historian, fatal: Fatal) -> Self {
        let state = Rc::new(Cell::new(ClockState {
            this_turn: Turn::INITIAL,
            progress: Progress::Manual,
        }));
        historian.register(
            TURN_CLOCK_NAME,
            Rc::new(ClockHistory {
                state: Rc::clone(&state),
            }),
        );
        Self {
            inner: Rc::new(ClockInner {
                queue: queue.id(),
                fatal,
                historian: historian.clone(),
                state,
                listeners: RefCell::new(Vec::new()),
                alarm: Cell::new(None),
                last_generation: Cell::new(0),
                dispatching: Cell::new(false),
            }),
        }
    }

    /// The turn that is happening now; [`Turn::INITIAL`] before the first.
    pub fn this_turn(&self) -> Turn {
        self.inner.state.get().this_turn
    }

    /// The turn that will happen next, or `None` at the end of time.
    pub fn next_turn(&self) -> Option<Turn> {
        self.this_turn().next()
    }

    /// The current progress mode.
    pub fn progress(&self) -> Progress {
        self.inner.state.get().progress
    }

    /// The armed alarm, present only in automatic mode.
    pub fn pending_alarm(&self) -> Option<Alarm> {
        self.inner.alarm.get()
    }

    /// Add a listener called at the start of every turn.
    ///
    /// Listeners cannot be removed. Before the first turn this may be called
    /// from anywhere; afterward only from the turn queue. A listener added
    /// while turn listeners are running first hears about the next turn.
    #[track_caller]
    pub fn register(&self, listener: impl FnMut(Turn, &TurnContext) + 'static) {
        if !self.this_turn().is_initial() {
            self.inner
                .fatal
                .check_current(TURN_CLOCK_NAME, self.inner.queue, || self.describe());
        }
        self.inner.listeners.borrow_mut().push(Box::new(listener));
    }

    /// Run a turn now. Only allowed in manual mode, and not from inside a
    /// turn listener.
    #[track_caller]
    pub fn turn(&self, ctx: &TurnContext) {
        self.check(ctx);
        let progress = self.progress();
        if !progress.is_manual() {
            self.inner.fatal.raise(
                TURN_CLOCK_NAME,
                format!("manual turn requested but progress is {progress}"),
                self.describe(),
            );
        }
        self.new_turn(ctx);
    }

    /// Change the progress mode.
    ///
    /// Any armed alarm is discarded. Entering automatic mode arms a fresh
    /// alarm a whole period from now, including when only the period changes.
    #[track_caller]
    pub fn set_progress(&self, ctx: &TurnContext, progress: Progress) {
        self.check(ctx);
        let mut state = self.inner.state.get();
        info!(from = %state.progress, to = %progress, "Changing progress");
        self.disarm();
        state.progress = progress;
        self.inner.state.set(state);
        if let Progress::Automatic { milliseconds } = progress {
            self.arm(milliseconds);
        }
    }

    /// Handle the alarm armed as `generation` going off.
    ///
    /// Returns `false` without doing anything if that alarm has since been
    /// disarmed. Otherwise runs a turn and arms the next alarm.
    #[track_caller]
    pub fn alarm_fired(&self, ctx: &TurnContext, generation: u64) -> bool {
        self.check(ctx);
        match self.inner.alarm.get() {
            Some(alarm) if alarm.generation == generation => {}
            _ => {
                debug!(generation, "Ignoring stale turn alarm");
                return false;
            }
        }
        self.inner.alarm.set(None);
        let progress = self.progress();
        if progress.is_manual() {
            self.inner.fatal.raise(
                TURN_CLOCK_NAME,
                "turn alarm fired but progress is manual",
                self.describe(),
            );
        }
        self.new_turn(ctx);

        // A listener may have changed the mode during the turn.
        if self.inner.alarm.get().is_none()
            && let Progress::Automatic { milliseconds } = self.progress()
        {
            self.arm(milliseconds);
        }
        true
    }

    /// Re-apply the progress mode after the clock's state was restored.
    #[track_caller]
    pub fn restart_after_restore(&self, ctx: &TurnContext) {
        self.check(ctx);
        self.disarm();
        let state = self.inner.state.get();
        info!(turn = %state.this_turn, progress = %state.progress, "Restarting after restore");
        if let Progress::Automatic { milliseconds } = state.progress {
            self.arm(milliseconds);
        }
    }

    /// One-line description of current state, for fatal reports.
    pub fn describe(&self) -> String {
        let state = self.inner.state.get();
        format!(
            "{TURN_CLOCK_NAME} this_turn={} progress={}",
            state.this_turn, state.progress
        )
    }

    #[track_caller]
    fn check(&self, ctx: &TurnContext) {
        self.inner
            .fatal
            .check_queue(TURN_CLOCK_NAME, self.inner.queue, ctx, || self.describe());
    }

    #[track_caller]
    fn new_turn(&self, ctx: &TurnContext) {
        if self.inner.dispatching.get() {
            self.inner.fatal.raise(
                TURN_CLOCK_NAME,
                "turn requested while the current turn is still starting",
                self.describe(),
            );
        }
        let mut state = self.inner.state.get();
        let Some(turn) = state.this_turn.next() else {
            self.inner.fatal.raise(
                TURN_CLOCK_NAME,
                "Turn limit reached, the end.",
                self.describe(),
            );
        };
        state.this_turn = turn;
        self.inner.state.set(state);
        info!(%turn, "Starting turn");

        self.inner.dispatching.set(true);
        let mut listeners = self.inner.listeners.take();
        for listener in &mut listeners {
            listener(turn, ctx);
        }
        self.inner.dispatching.set(false);
        let mut registered = self.inner.listeners.borrow_mut();
        let added = std::mem::replace(&mut *registered, listeners);
        registered.extend(added);
        drop(registered);

        self.inner.historian.save(ctx, turn);
    }

    fn arm(&self, milliseconds: u32) {
        let period = Duration::from_millis(u64::from(milliseconds));
        let now = Instant::now();
        let generation = self.inner.last_generation.get().wrapping_add(1);
        self.inner.last_generation.set(generation);
        self.inner.alarm.set(Some(Alarm {
            generation,
            deadline: now.checked_add(period).unwrap_or(now),
            period,
        }));
        debug!(generation, period_ms = milliseconds, "Armed turn alarm");
    }

    fn disarm(&self) {
        if let Some(alarm) = self.inner.alarm.take() {
            debug!(generation = alarm.generation, "Disarmed turn alarm");
        }
    }
}
