//! Callbacks scheduled a number of turns in the future.
//!
//! [`TurnTimer`] hears about every turn start from the clock and fires
//! whatever is due. Callers can ask to be called after some turns, every so
//! many turns, or both, and cancel through the returned [`TimerToken`].
//!
//! # Algorithm
//!
//! Pending timers sit in a queue ordered by due turn. Each stores a relative
//! delay: the number of turns after the timer ahead of it that it is due, so
//! the sum of delays from the head up to a timer is the number of turns
//! until it fires. Each turn only the head's delay is decremented; then
//! every timer at the front with a delay of zero is due. Scheduling walks
//! the queue to find the insertion point, so it is O(n) while a turn with
//! nothing due is O(1).
//!
//! Cancelled timers stay queued, keeping their delay so the sums for the
//! timers behind them stay correct, and are dropped when they reach the
//! head. Timer storage is a generational arena: a token whose timer has
//! finished refers to a stale generation and is ignored.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use chronicle_types::TurnCount;
use tracing::trace;

use crate::fatal::Fatal;
use crate::queue::{QueueId, TurnContext, TurnQueue};

/// Component name used in fatal reports.
const COMPONENT: &str = "TurnTimer";

/// A callback run when its timer fires.
pub type TimerCallback = Box<dyn FnMut(&TurnContext)>;

/// Handle to a scheduled timer.
///
/// Does nothing useful once the timer has fired its last or been cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken {
    index: u32,
    generation: u32,
}

struct Entry {
    /// `None` while the callback is running or after cancellation.
    callback: Option<TimerCallback>,
    repeat_period: Option<TurnCount>,
    /// Delay the timer was first scheduled with.
    original_period: TurnCount,
    relative_delay: TurnCount,
    cancelled: bool,
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// The delta queue and the arena backing it.
#[derive(Default)]
struct TimerQueue {
    slots: Vec<Slot>,
    free: Vec<u32>,
    order: VecDeque<TimerToken>,
}

fn entry_mut(slots: &mut [Slot], token: TimerToken) -> Option<&mut Entry> {
    slots
        .get_mut(usize::try_from(token.index).ok()?)
        .filter(|slot| slot.generation == token.generation)
        .and_then(|slot| slot.entry.as_mut())
}

impl TimerQueue {
    fn entry(&self, token: TimerToken) -> Option<&Entry> {
        self.slots
            .get(usize::try_from(token.index).ok()?)
            .filter(|slot| slot.generation == token.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    fn allocate(&mut self, entry: Entry) -> Option<TimerToken> {
        if let Some(index) = self.free.pop() {
            let slot = self.slots.get_mut(usize::try_from(index).ok()?)?;
            slot.entry = Some(entry);
            return Some(TimerToken {
                index,
                generation: slot.generation,
            });
        }
        let index = u32::try_from(self.slots.len()).ok()?;
        self.slots.push(Slot {
            generation: 0,
            entry: Some(entry),
        });
        Some(TimerToken {
            index,
            generation: 0,
        })
    }

    fn release(&mut self, token: TimerToken) {
        let Some(slot) = usize::try_from(token.index)
            .ok()
            .and_then(|index| self.slots.get_mut(index))
        else {
            return;
        };
        if slot.generation != token.generation || slot.entry.is_none() {
            return;
        }
        slot.entry = None;
        // A slot whose generation runs out is retired so no stale token can
        // ever match it again.
        if let Some(generation) = slot.generation.checked_add(1) {
            slot.generation = generation;
            self.free.push(token.index);
        }
    }

    /// Queue `token` to fire `delay` turns from now.
    fn insert(&mut self, token: TimerToken, delay: TurnCount) {
        let Self { slots, order, .. } = self;
        let mut remaining = delay;
        let mut position = None;
        for (index, queued) in order.iter().enumerate() {
            let Some(entry) = entry_mut(slots, *queued) else {
                continue;
            };
            if entry.relative_delay <= remaining {
                remaining = remaining.saturating_sub(entry.relative_delay);
            } else {
                entry.relative_delay = entry.relative_delay.saturating_sub(remaining);
                position = Some(index);
                break;
            }
        }
        if let Some(entry) = entry_mut(slots, token) {
            entry.relative_delay = remaining;
        }
        match position {
            Some(index) => order.insert(index, token),
            None => order.push_back(token),
        }
    }

    /// Count one turn off the head of the queue.
    fn tick(&mut self) {
        let Self { slots, order, .. } = self;
        if let Some(entry) = order.front().and_then(|head| entry_mut(slots, *head)) {
            entry.relative_delay = entry.relative_delay.saturating_sub(1);
        }
    }

    /// Take the next due timer off the queue along with its callback.
    ///
    /// Cancelled timers reaching the head are discarded. The timer stays
    /// allocated, out of the queue, until [`TimerQueue::finish`].
    fn pop_due(&mut self) -> Option<(TimerToken, TimerCallback)> {
        loop {
            let token = *self.order.front()?;
            let entry = entry_mut(&mut self.slots, token)?;
            if entry.relative_delay > 0 {
                return None;
            }
            self.order.pop_front();
            let callback = if entry.cancelled {
                None
            } else {
                entry.callback.take()
            };
            match callback {
                Some(callback) => return Some((token, callback)),
                None => self.release(token),
            }
        }
    }

    /// Settle a timer whose callback just ran: queue a repeating timer for
    /// its next firing, release anything else.
    fn finish(&mut self, token: TimerToken, callback: TimerCallback) {
        let Some(entry) = entry_mut(&mut self.slots, token) else {
            return;
        };
        match entry.repeat_period {
            Some(period) if !entry.cancelled => {
                entry.callback = Some(callback);
                self.insert(token, period);
            }
            _ => self.release(token),
        }
    }

    fn turns_until(&self, token: TimerToken) -> Option<TurnCount> {
        if self.entry(token)?.cancelled {
            return None;
        }
        let mut total: TurnCount = 0;
        for queued in &self.order {
            let entry = self.entry(*queued)?;
            total = total.saturating_add(entry.relative_delay);
            if *queued == token {
                return Some(total);
            }
        }
        None
    }

    /// Timers that will fire again, counting a repeating timer whose
    /// callback is running.
    fn live(&self) -> usize {
        self.slots
            .iter()
            .filter_map(|slot| slot.entry.as_ref())
            .filter(|entry| {
                !entry.cancelled && (entry.callback.is_some() || entry.repeat_period.is_some())
            })
            .count()
    }
}

struct TimerInner {
    queue: QueueId,
    fatal: Fatal,
    state: RefCell<TimerQueue>,
}

/// Fires callbacks a number of turns in the future.
///
/// Cloning produces another handle to the same timer.
#[derive(Clone)]
pub struct TurnTimer {
    inner: Rc<TimerInner>,
}

impl core::fmt::Debug for TurnTimer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.describe())
    }
}

impl TurnTimer {
    /// Create an empty timer bound to `queue`.
    pub fn new(queue: &TurnQueue, fatal: Fatal) -> Self {
        Self {
            inner: Rc::new(TimerInner {
                queue: queue.id(),
                fatal,
                state: RefCell::new(TimerQueue::default()),
            }),
        }
    }

    /// Advance by one turn and fire everything now due.
    ///
    /// Callbacks run with the timer unlocked, so they may schedule or cancel
    /// timers, including their own. A repeating timer is queued for its next
    /// firing only after its callback returns.
    #[track_caller]
    pub fn turn_start(&self, ctx: &TurnContext) {
        self.check(ctx);
        self.inner.state.borrow_mut().tick();
        loop {
            let due = self.inner.state.borrow_mut().pop_due();
            let Some((token, mut callback)) = due else {
                break;
            };
            trace!(timer = token.index, "Timer fired");
            callback(ctx);
            self.inner.state.borrow_mut().finish(token, callback);
        }
    }

    /// Call `callback` after `after` turns, then every `repeating_every`
    /// turns if given, until cancelled.
    ///
    /// Both counts must be positive.
    #[track_caller]
    pub fn schedule(
        &self,
        ctx: &TurnContext,
        after: TurnCount,
        repeating_every: Option<TurnCount>,
        callback: impl FnMut(&TurnContext) + 'static,
    ) -> TimerToken {
        self.check(ctx);
        if after == 0 {
            self.inner
                .fatal
                .raise(COMPONENT, "can't schedule timer after 0 turns", self.describe());
        }
        if repeating_every == Some(0) {
            self.inner.fatal.raise(
                COMPONENT,
                "can't schedule repeating timer with 0 repeat period",
                self.describe(),
            );
        }

        let mut state = self.inner.state.borrow_mut();
        let Some(token) = state.allocate(Entry {
            callback: Some(Box::new(callback)),
            repeat_period: repeating_every,
            original_period: after,
            relative_delay: after,
            cancelled: false,
        }) else {
            drop(state);
            self.inner
                .fatal
                .raise(COMPONENT, "timer storage exhausted", self.describe());
        };
        state.insert(token, after);
        token
    }

    /// Stop `token` from firing again.
    ///
    /// Cancelling a timer that already finished is a no-op.
    #[track_caller]
    pub fn cancel(&self, ctx: &TurnContext, token: TimerToken) {
        self.check(ctx);
        let mut state = self.inner.state.borrow_mut();
        if let Some(entry) = entry_mut(&mut state.slots, token) {
            entry.cancelled = true;
            entry.callback = None;
        }
    }

    /// Turns until `token` next fires, or `None` if it never will or is
    /// firing right now.
    ///
    /// Walks the queue, so this is for diagnostics and saving state rather
    /// than every-turn use.
    pub fn turns_until_next_tick(&self, token: TimerToken) -> Option<TurnCount> {
        self.inner.state.borrow().turns_until(token)
    }

    /// Number of timers still due to fire.
    pub fn pending(&self) -> usize {
        self.inner.state.borrow().live()
    }

    /// One-line description of current state, for fatal reports.
    pub fn describe(&self) -> String {
        self.inner.state.try_borrow().map_or_else(
            |_| format!("{COMPONENT} (busy)"),
            |state| {
                let queued: Vec<String> = state
                    .order
                    .iter()
                    .filter_map(|token| state.entry(*token))
                    .map(|entry| {
                        let mark = if entry.cancelled { "x" } else { "" };
                        format!("{mark}{}/{}", entry.relative_delay, entry.original_period)
                    })
                    .collect();
                format!("{COMPONENT} queue=[{}]", queued.join(","))
            },
        )
    }

    #[track_caller]
    fn check(&self, ctx: &TurnContext) {
        self.inner
            .fatal
            .check_queue(COMPONENT, self.inner.queue, ctx, || self.describe());
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::arithmetic_side_effects,
    clippy::indexing_slicing
)]
mod tests {
    use std::cell::{Cell, RefCell};

    use super::*;

    fn setup() -> (TurnQueue, TurnTimer) {
        let queue = TurnQueue::new(Fatal::panicking());
        let timer = TurnTimer::new(&queue, Fatal::panicking());
        (queue, timer)
    }

    fn counter() -> (Rc<Cell<u32>>, impl FnMut(&TurnContext) + 'static) {
        let count = Rc::new(Cell::new(0));
        let sink = Rc::clone(&count);
        (count, move |_ctx: &TurnContext| sink.set(sink.get() + 1))
    }

    fn run_turns(queue: &TurnQueue, timer: &TurnTimer, turns: u32) {
        queue.sync(|ctx| {
            for _ in 0..turns {
                timer.turn_start(ctx);
            }
        });
    }

    #[test]
    fn repeating_timers_fire_exactly() {
        let (queue, timer) = setup();
        let (twos, on_two) = counter();
        let (threes, on_three) = counter();
        let (fours, on_four) = counter();
        let tokens = queue.sync(|ctx| {
            [
                timer.schedule(ctx, 2, Some(2), on_two),
                timer.schedule(ctx, 3, Some(3), on_three),
                timer.schedule(ctx, 4, Some(4), on_four),
            ]
        });

        run_turns(&queue, &timer, 12);
        assert_eq!((twos.get(), threes.get(), fours.get()), (6, 4, 3));

        run_turns(&queue, &timer, 2);
        let remaining = tokens.map(|token| timer.turns_until_next_tick(token));
        assert_eq!(remaining, [Some(2), Some(1), Some(2)]);
        assert_eq!(timer.pending(), 3);
    }

    #[test]
    fn cancelling_one_timer_leaves_others_alone() {
        let (queue, timer) = setup();
        let (cancelled, on_cancelled) = counter();
        let (kept, on_kept) = counter();
        let doomed = queue.sync(|ctx| {
            let doomed = timer.schedule(ctx, 1, Some(1), on_cancelled);
            timer.schedule(ctx, 3, Some(3), on_kept);
            doomed
        });

        run_turns(&queue, &timer, 2);
        queue.sync(|ctx| timer.cancel(ctx, doomed));
        run_turns(&queue, &timer, 7);

        assert_eq!(cancelled.get(), 2);
        assert_eq!(kept.get(), 3);
        assert_eq!(timer.turns_until_next_tick(doomed), None);
        assert_eq!(timer.pending(), 1);
    }

    #[test]
    fn cancelled_timer_keeps_later_timers_on_time() {
        let (queue, timer) = setup();
        let fired_at = Rc::new(Cell::new(0));
        let turn = Rc::new(Cell::new(0_u32));
        let (_, early) = counter();
        let (record, now) = (Rc::clone(&fired_at), Rc::clone(&turn));
        let first = queue.sync(|ctx| {
            let first = timer.schedule(ctx, 3, None, early);
            timer.schedule(ctx, 5, None, move |_ctx| record.set(now.get()));
            first
        });
        queue.sync(|ctx| timer.cancel(ctx, first));

        queue.sync(|ctx| {
            for number in 1..=6 {
                turn.set(number);
                timer.turn_start(ctx);
            }
        });
        assert_eq!(fired_at.get(), 5);
    }

    #[test]
    fn one_shot_fires_once_then_goes_inert() {
        let (queue, timer) = setup();
        let (fired, on_fire) = counter();
        let token = queue.sync(|ctx| timer.schedule(ctx, 2, None, on_fire));
        assert_eq!(timer.turns_until_next_tick(token), Some(2));

        run_turns(&queue, &timer, 5);

        assert_eq!(fired.get(), 1);
        assert_eq!(timer.turns_until_next_tick(token), None);
        assert_eq!(timer.pending(), 0);
        queue.sync(|ctx| timer.cancel(ctx, token));
    }

    #[test]
    fn stale_token_does_not_touch_reused_slot() {
        let (queue, timer) = setup();
        let (_, first) = counter();
        let (second_fired, second) = counter();
        let stale = queue.sync(|ctx| timer.schedule(ctx, 1, None, first));
        run_turns(&queue, &timer, 1);

        let fresh = queue.sync(|ctx| {
            let fresh = timer.schedule(ctx, 1, None, second);
            timer.cancel(ctx, stale);
            fresh
        });
        assert_ne!(fresh, stale);
        run_turns(&queue, &timer, 1);
        assert_eq!(second_fired.get(), 1);
    }

    #[test]
    fn same_due_turn_fires_in_schedule_order() {
        let (queue, timer) = setup();
        let order = Rc::new(RefCell::new(Vec::new()));
        queue.sync(|ctx| {
            for name in ["a", "b", "c"] {
                let order = Rc::clone(&order);
                timer.schedule(ctx, 2, None, move |_ctx| order.borrow_mut().push(name));
            }
        });
        run_turns(&queue, &timer, 2);
        assert_eq!(*order.borrow(), ["a", "b", "c"]);
    }

    #[test]
    fn callback_can_schedule_reentrantly() {
        let (queue, timer) = setup();
        let (follow_ups, on_follow_up) = counter();
        let on_follow_up = Rc::new(RefCell::new(Some(on_follow_up)));
        let rescheduler = timer.clone();
        queue.sync(|ctx| {
            timer.schedule(ctx, 1, None, move |ctx| {
                if let Some(callback) = on_follow_up.borrow_mut().take() {
                    rescheduler.schedule(ctx, 1, None, callback);
                }
            });
        });

        run_turns(&queue, &timer, 1);
        assert_eq!(follow_ups.get(), 0);
        assert_eq!(timer.pending(), 1);
        run_turns(&queue, &timer, 1);
        assert_eq!(follow_ups.get(), 1);
    }

    #[test]
    fn repeating_timer_can_cancel_itself() {
        let (queue, timer) = setup();
        let fired = Rc::new(Cell::new(0_u32));
        let own_token: Rc<Cell<Option<TimerToken>>> = Rc::new(Cell::new(None));
        let canceller = timer.clone();
        let (count, token_cell) = (Rc::clone(&fired), Rc::clone(&own_token));
        queue.sync(|ctx| {
            let token = timer.schedule(ctx, 1, Some(1), move |ctx| {
                count.set(count.get().saturating_add(1));
                if count.get() == 3
                    && let Some(token) = token_cell.get()
                {
                    canceller.cancel(ctx, token);
                }
            });
            own_token.set(Some(token));
        });

        run_turns(&queue, &timer, 6);
        assert_eq!(fired.get(), 3);
        assert_eq!(timer.pending(), 0);
    }

    #[test]
    fn repeating_timer_requeues_after_its_callback() {
        let (queue, timer) = setup();
        let order = Rc::new(RefCell::new(Vec::new()));
        let seen_while_firing = Rc::new(Cell::new(Some(0)));
        let own_token: Rc<Cell<Option<TimerToken>>> = Rc::new(Cell::new(None));

        let scheduler = timer.clone();
        let (log, seen, token_cell) = (
            Rc::clone(&order),
            Rc::clone(&seen_while_firing),
            Rc::clone(&own_token),
        );
        queue.sync(|ctx| {
            let token = timer.schedule(ctx, 2, Some(2), move |ctx| {
                log.borrow_mut().push("A");
                if log.borrow().len() == 1 {
                    if let Some(token) = token_cell.get() {
                        seen.set(scheduler.turns_until_next_tick(token));
                    }
                    let log = Rc::clone(&log);
                    scheduler.schedule(ctx, 2, None, move |_ctx| log.borrow_mut().push("B"));
                }
            });
            own_token.set(Some(token));
        });

        run_turns(&queue, &timer, 4);
        assert_eq!(*order.borrow(), ["A", "B", "A"]);
        assert_eq!(seen_while_firing.get(), None);
        assert_eq!(timer.turns_until_next_tick(own_token.get().unwrap()), Some(2));
    }

    #[test]
    fn one_shot_is_not_pending_while_firing() {
        let (queue, timer) = setup();
        let pending_inside = Rc::new(Cell::new(usize::MAX));
        let (watcher, sink) = (timer.clone(), Rc::clone(&pending_inside));
        queue.sync(|ctx| {
            timer.schedule(ctx, 1, None, move |_ctx| sink.set(watcher.pending()));
            timer.schedule(ctx, 3, Some(3), |_ctx| {});
        });
        run_turns(&queue, &timer, 1);
        assert_eq!(pending_inside.get(), 1);
    }

    #[test]
    fn exhausted_slot_is_retired() {
        let mut state = TimerQueue::default();
        let token = state
            .allocate(Entry {
                callback: None,
                repeat_period: None,
                original_period: 1,
                relative_delay: 1,
                cancelled: false,
            })
            .unwrap();
        state.slots[0].generation = u32::MAX;
        let worn = TimerToken {
            generation: u32::MAX,
            ..token
        };

        state.release(worn);
        assert!(state.free.is_empty());
        assert_eq!(state.slots[0].generation, u32::MAX);
        assert!(state.slots[0].entry.is_none());

        let next = state
            .allocate(Entry {
                callback: None,
                repeat_period: None,
                original_period: 1,
                relative_delay: 1,
                cancelled: false,
            })
            .unwrap();
        assert_eq!(next.index, 1);
        assert!(state.entry(worn).is_none());
    }

    #[test]
    fn describe_lists_queue_deltas() {
        let (queue, timer) = setup();
        queue.sync(|ctx| {
            timer.schedule(ctx, 2, None, |_ctx| {});
            timer.schedule(ctx, 5, None, |_ctx| {});
        });
        assert_eq!(timer.describe(), "TurnTimer queue=[2/2,3/5]");
    }

    #[test]
    #[should_panic(expected = "after 0 turns")]
    fn zero_delay_is_fatal() {
        let (queue, timer) = setup();
        queue.sync(|ctx| timer.schedule(ctx, 0, None, |_ctx| {}));
    }

    #[test]
    #[should_panic(expected = "0 repeat period")]
    fn zero_repeat_is_fatal() {
        let (queue, timer) = setup();
        queue.sync(|ctx| timer.schedule(ctx, 1, Some(0), |_ctx| {}));
    }
}
