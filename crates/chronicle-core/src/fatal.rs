//! Handling for unrecoverable programming errors.
//!
//! Some misuse of the turn core cannot be recovered from: touching turn
//! state off the turn queue, requesting a manual turn in automatic mode,
//! registering a participant twice, running the turn counter off the end of
//! time. These signal bugs in the caller, not runtime conditions, so the
//! core stops rather than continuing with state it can no longer vouch for.
//!
//! A [`Fatal`] hook is injected into every component at construction. On a
//! fatal error it assembles a [`FatalReport`] (including a snapshot of the
//! reporting component), logs it, hands it to an optional continuation (a
//! crash reporter, or a test), and then aborts the process. A hook built
//! with [`Fatal::panicking`] panics instead, for tests and for embedders
//! that catch the unwind and tear the world down themselves.

use std::panic::Location;
use std::rc::Rc;

use crate::queue::{QueueId, TurnContext};

/// Callback run with the report before the process stops.
pub type FatalContinuation = Rc<dyn Fn(&FatalReport)>;

/// Everything known about a fatal error at the point it was raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalReport {
    /// The component that detected the error.
    pub component: &'static str,
    /// What went wrong.
    pub message: String,
    /// Where the offending call was made.
    pub location: &'static Location<'static>,
    /// Description of the component's state when the error was detected.
    pub snapshot: String,
}

impl core::fmt::Display for FatalReport {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "fatal error in {} at {}: {} [{}]",
            self.component, self.location, self.message, self.snapshot
        )
    }
}

/// What [`Fatal::raise`] does once the report is out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Ending {
    #[default]
    Abort,
    Panic,
}

/// Fatal error hook shared by the components of one world.
#[derive(Clone, Default)]
pub struct Fatal {
    continuation: Option<FatalContinuation>,
    ending: Ending,
}

impl core::fmt::Debug for Fatal {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Fatal")
            .field("continuation", &self.continuation.is_some())
            .field("ending", &self.ending)
            .finish()
    }
}

impl Fatal {
    /// A hook that logs and aborts the process.
    pub const fn new() -> Self {
        Self {
            continuation: None,
            ending: Ending::Abort,
        }
    }

    /// A hook that logs and panics with the report.
    pub const fn panicking() -> Self {
        Self {
            continuation: None,
            ending: Ending::Panic,
        }
    }

    /// Run `continuation` with the report before stopping.
    ///
    /// The continuation should not return control to the world; if it
    /// returns, the hook still aborts or panics.
    #[must_use]
    pub fn with_continuation(mut self, continuation: impl Fn(&FatalReport) + 'static) -> Self {
        self.continuation = Some(Rc::new(continuation));
        self
    }

    /// Whether [`Fatal::raise`] panics rather than aborting.
    pub const fn is_panicking(&self) -> bool {
        matches!(self.ending, Ending::Panic)
    }

    /// Report a fatal error and stop.
    #[track_caller]
    #[allow(clippy::panic)]
    pub fn raise(
        &self,
        component: &'static str,
        message: impl Into<String>,
        snapshot: impl Into<String>,
    ) -> ! {
        let report = FatalReport {
            component,
            message: message.into(),
            location: Location::caller(),
            snapshot: snapshot.into(),
        };
        tracing::error!(
            component,
            location = %report.location,
            snapshot = %report.snapshot,
            "Fatal error: {}",
            report.message
        );
        if let Some(continuation) = &self.continuation {
            continuation(&report);
        }
        match self.ending {
            Ending::Abort => std::process::abort(),
            Ending::Panic => panic!("{report}"),
        }
    }

    /// Raise unless `ctx` proves the caller is on `queue`.
    #[track_caller]
    pub fn check_queue(
        &self,
        component: &'static str,
        queue: QueueId,
        ctx: &TurnContext,
        snapshot: impl FnOnce() -> String,
    ) {
        if let Err(violation) = queue.check(ctx) {
            self.raise(component, violation.to_string(), snapshot());
        }
    }

    /// Raise unless the current thread is executing on `queue`.
    #[track_caller]
    pub fn check_current(
        &self,
        component: &'static str,
        queue: QueueId,
        snapshot: impl FnOnce() -> String,
    ) {
        if let Err(violation) = queue.check_current() {
            self.raise(component, violation.to_string(), snapshot());
        }
    }
}
