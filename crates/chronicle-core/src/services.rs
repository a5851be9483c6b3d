//! One complete set of turn services.
//!
//! [`Services`] builds the turn queue, historian, clock, and timer for a
//! world and wires the timer to the clock. It also coordinates the two
//! operations that touch several services at once: attaching a history and
//! jumping to another turn of the current one.

use std::rc::Rc;

use chronicle_types::Turn;
use tracing::info;

use crate::clock::TurnClock;
use crate::config::TurnConfig;
use crate::fatal::Fatal;
use crate::historian::{Historian, RestoreError};
use crate::history::HistoryAccess;
use crate::queue::{TurnContext, TurnQueue};
use crate::timer::{TimerToken, TurnTimer};

/// Component name used in fatal reports.
const COMPONENT: &str = "Services";

/// The turn services of one world.
#[derive(Debug)]
pub struct Services {
    queue: TurnQueue,
    fatal: Fatal,
    historian: Historian,
    turn_clock: TurnClock,
    turn_timer: TurnTimer,
}

impl Services {
    /// Create a fresh set of services in manual mode with no history attached.
    ///
    /// Participants register with [`Services::historian`] before the first
    /// history is attached.
    pub fn new(fatal: Fatal) -> Self {
        let queue = TurnQueue::new(fatal.clone());
        let historian = Historian::new(&queue, fatal.clone());
        let turn_clock = TurnClock::new(&queue, &historian, fatal.clone());
        let turn_timer = TurnTimer::new(&queue, fatal.clone());

        let timer = turn_timer.clone();
        turn_clock.register(move |_turn, ctx| timer.turn_start(ctx));

        Self {
            queue,
            fatal,
            historian,
            turn_clock,
            turn_timer,
        }
    }

    /// The queue on which turns execute.
    pub const fn queue(&self) -> &TurnQueue {
        &self.queue
    }

    /// Saves and restores registered participants.
    pub const fn historian(&self) -> &Historian {
        &self.historian
    }

    /// Generates turns.
    pub const fn turn_clock(&self) -> &TurnClock {
        &self.turn_clock
    }

    /// Fires turn-relative callbacks.
    pub const fn turn_timer(&self) -> &TurnTimer {
        &self.turn_timer
    }

    /// The fatal hook shared by every service.
    pub const fn fatal(&self) -> &Fatal {
        &self.fatal
    }

    /// Apply configured turn progression.
    #[track_caller]
    pub fn configure(&self, ctx: &TurnContext, config: &TurnConfig) {
        self.turn_clock
            .set_progress(ctx, config.progress.to_progress());
    }

    /// Attach `history` and bring the world to its most recent turn.
    ///
    /// An empty history can only be attached to a world that has not run a
    /// turn yet; anything else is fatal. On error the previous history stays
    /// attached and nothing is restored.
    #[track_caller]
    pub fn set_new_history(
        &self,
        ctx: &TurnContext,
        history: Rc<dyn HistoryAccess>,
    ) -> Result<(), RestoreError> {
        self.check(ctx);
        if history.most_recent_turn().is_none() && !self.turn_clock.this_turn().is_initial() {
            self.fatal.raise(
                COMPONENT,
                format!(
                    "attempting to set empty history `{}` onto a world that is not at the initial turn",
                    history.name()
                ),
                self.describe(),
            );
        }
        info!(history = %history.name(), "Attaching history");
        self.historian.set_store(ctx, history)?;
        self.turn_clock.restart_after_restore(ctx);
        Ok(())
    }

    /// Move the world to `turn` of the current history.
    ///
    /// Later turns stay in the history, so a rewind can be followed by a
    /// fast-forward. Turns run after a rewind overwrite the recorded ones.
    #[track_caller]
    pub fn set_current_history_turn(
        &self,
        ctx: &TurnContext,
        turn: Turn,
    ) -> Result<(), RestoreError> {
        self.check(ctx);
        info!(%turn, "Moving to turn");
        self.historian.restore_at_turn(ctx, turn)?;
        self.turn_clock.restart_after_restore(ctx);
        Ok(())
    }

    /// Call `callback` once, at the start of `turn`.
    ///
    /// `turn` must be in the future; anything else is fatal.
    #[track_caller]
    pub fn schedule_at(
        &self,
        ctx: &TurnContext,
        turn: Turn,
        callback: impl FnMut(&TurnContext) + 'static,
    ) -> TimerToken {
        self.check(ctx);
        let now = self.turn_clock.this_turn();
        let Some(after) = turn.turns_since(now).filter(|after| *after > 0) else {
            self.fatal.raise(
                COMPONENT,
                format!("can't schedule timer at turn {turn}, current turn is {now}"),
                self.describe(),
            );
        };
        self.turn_timer.schedule(ctx, after, None, callback)
    }

    /// Description of every service, for fatal reports and debugging.
    pub fn describe(&self) -> String {
        format!(
            "{}; {}; {}",
            self.turn_clock.describe(),
            self.historian.describe(),
            self.turn_timer.describe()
        )
    }

    #[track_caller]
    fn check(&self, ctx: &TurnContext) {
        self.fatal
            .check_queue(COMPONENT, self.queue.id(), ctx, || self.describe());
    }
}
