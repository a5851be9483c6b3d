//! The turn queue: the one serial context allowed to mutate turn state.
//!
//! Turn progression, history save/restore and timer bookkeeping must never
//! interleave. Rather than trusting callers, every mutating operation in
//! this crate takes a [`TurnContext`]. A context can only be obtained inside
//! [`TurnQueue::sync`], cannot be cloned, and cannot leave the thread it was
//! created on, so holding one proves the caller is running on the queue.
//!
//! Components additionally check at runtime that the context belongs to
//! *their* queue ([`QueueId::check`]) and that the current thread is inside
//! it ([`QueueId::check_current`]), for paths that cannot demand a context.

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::fatal::Fatal;

/// Component name used in fatal reports raised by the queue itself.
const COMPONENT: &str = "TurnQueue";

/// Source of process-unique queue identifiers.
static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// The queue the current thread is executing on, if any.
    static CURRENT_QUEUE: Cell<Option<QueueId>> = const { Cell::new(None) };
}

/// Identity of a [`TurnQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId(u64);

impl core::fmt::Display for QueueId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "turn-queue-{}", self.0)
    }
}

/// A breach of the single-writer discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueViolation {
    /// The context was issued by a different queue.
    #[error("context belongs to {found}, expected {expected}")]
    ForeignContext {
        /// The queue the component is bound to.
        expected: QueueId,
        /// The queue that issued the context.
        found: QueueId,
    },

    /// The current thread is not executing on the expected queue.
    #[error("thread not on {expected}, found {}", describe_found(.found))]
    NotOnQueue {
        /// The queue the component is bound to.
        expected: QueueId,
        /// The queue the thread is executing on, if any.
        found: Option<QueueId>,
    },
}

#[allow(clippy::ref_option)]
fn describe_found(found: &Option<QueueId>) -> String {
    found.map_or_else(|| "(no queue)".to_owned(), |id| id.to_string())
}

impl QueueId {
    /// Check that `ctx` was issued by this queue.
    pub fn check(self, ctx: &TurnContext) -> Result<(), QueueViolation> {
        if ctx.queue != self {
            return Err(QueueViolation::ForeignContext {
                expected: self,
                found: ctx.queue,
            });
        }
        self.check_current()
    }

    /// Check that the current thread is executing on this queue.
    pub fn check_current(self) -> Result<(), QueueViolation> {
        let found = current_queue();
        if found == Some(self) {
            Ok(())
        } else {
            Err(QueueViolation::NotOnQueue {
                expected: self,
                found,
            })
        }
    }
}

/// The queue the current thread is executing on, if any.
pub fn current_queue() -> Option<QueueId> {
    CURRENT_QUEUE.with(Cell::get)
}

/// Proof that the holder is running on a [`TurnQueue`].
///
/// Only [`TurnQueue::sync`] creates these. The type is neither `Clone` nor
/// `Send`, so it cannot outlive or escape the closure it was handed to.
#[derive(Debug)]
pub struct TurnContext {
    queue: QueueId,
    _not_send: PhantomData<*const ()>,
}

impl TurnContext {
    /// The queue that issued this context.
    pub const fn queue(&self) -> QueueId {
        self.queue
    }
}

/// The serial context on which turns execute.
#[derive(Debug)]
pub struct TurnQueue {
    id: QueueId,
    fatal: Fatal,
}

impl TurnQueue {
    /// Create a new queue with a process-unique identity.
    pub fn new(fatal: Fatal) -> Self {
        let id = QueueId(NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed));
        Self { id, fatal }
    }

    /// The identity of this queue.
    pub const fn id(&self) -> QueueId {
        self.id
    }

    /// Whether the current thread is executing on this queue.
    pub fn is_current(&self) -> bool {
        current_queue() == Some(self.id)
    }

    /// Run `work` on the queue and return its result.
    ///
    /// Calls must not nest: a thread already executing on any turn queue
    /// that enters one again is a fatal error, as it would deadlock a real
    /// serial queue.
    #[track_caller]
    pub fn sync<R>(&self, work: impl FnOnce(&TurnContext) -> R) -> R {
        if let Some(current) = current_queue() {
            self.fatal.raise(
                COMPONENT,
                format!("nested sync onto {} while already on {current}", self.id),
                format!("{COMPONENT} id={}", self.id),
            );
        }
        let _entered = Entered::new(self.id);
        let ctx = TurnContext {
            queue: self.id,
            _not_send: PhantomData,
        };
        work(&ctx)
    }
}

/// Marks the current thread as executing on a queue until dropped.
struct Entered;

impl Entered {
    fn new(id: QueueId) -> Self {
        CURRENT_QUEUE.with(|current| current.set(Some(id)));
        Self
    }
}

impl Drop for Entered {
    fn drop(&mut self) {
        CURRENT_QUEUE.with(|current| current.set(None));
    }
}
