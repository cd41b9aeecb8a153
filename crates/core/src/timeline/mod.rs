use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};

/// Wall-clock anchor used to map real time onto a [`Scheduler`] timeline.
#[derive(Debug, Clone, Copy)]
pub struct PlaybackClock {
    started: Instant,
}

impl PlaybackClock {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Timer events routed back to the timeline owner when they come due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimelineEvent {
    /// The current note has run its length; play the next one.
    NextNote,
    /// The current slide has been shown for its full duration.
    NextSlide,
}

/// Token returned by [`TimeSource::after`]. Cancelling twice is harmless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CancelHandle {
    id: u64,
    due: Duration,
}

impl CancelHandle {
    /// Time on the source's timeline at which the event fires.
    pub fn due(&self) -> Duration {
        self.due
    }
}

/// Source of cancellable delayed events.
///
/// Instead of storing closures, callers schedule a value of `E` which is
/// handed back to the single owner of the timeline once it is due. Cancelling
/// is synchronous: a cancelled event is never delivered.
pub trait TimeSource<E> {
    fn now(&self) -> Duration;

    fn after(&mut self, delay: Duration, event: E) -> CancelHandle;

    /// Returns `false` if the event already fired or was cancelled before.
    fn cancel(&mut self, handle: CancelHandle) -> bool;
}

/// An event that has come due.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledEvent<E> {
    pub due: Duration,
    pub event: E,
}

/// Deterministic timer queue driven by an explicit clock.
///
/// Time only moves when the owner calls [`Scheduler::pop_due`] or
/// [`Scheduler::advance_to`], which makes the scheduler usable both as a fake
/// clock in tests and, fed from a [`PlaybackClock`], in real time.
#[derive(Debug)]
pub struct Scheduler<E> {
    now: Duration,
    next_id: u64,
    queue: BTreeMap<(Duration, u64), E>,
}

impl<E> Default for Scheduler<E> {
    fn default() -> Self {
        Self {
            now: Duration::ZERO,
            next_id: 0,
            queue: BTreeMap::new(),
        }
    }
}

impl<E> Scheduler<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Due time of the earliest pending event.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.queue.keys().next().map(|(due, _)| *due)
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Removes and returns the earliest event due at or before `limit`.
    ///
    /// The clock moves to the event's due time, so anything scheduled while
    /// handling it is measured from when it was meant to fire rather than
    /// from when it was polled. Events due at the same instant fire in the
    /// order they were scheduled.
    pub fn pop_due(&mut self, limit: Duration) -> Option<ScheduledEvent<E>> {
        let (&(due, id), _) = self.queue.iter().next()?;
        if due > limit {
            return None;
        }
        let event = self.queue.remove(&(due, id))?;
        self.now = self.now.max(due);
        Some(ScheduledEvent { due, event })
    }

    /// Moves the clock forward without firing anything. The clock never runs
    /// backwards.
    pub fn advance_to(&mut self, now: Duration) {
        self.now = self.now.max(now);
    }
}

impl<E> TimeSource<E> for Scheduler<E> {
    fn now(&self) -> Duration {
        self.now
    }

    fn after(&mut self, delay: Duration, event: E) -> CancelHandle {
        let id = self.next_id;
        self.next_id += 1;
        let due = self.now + delay;
        self.queue.insert((due, id), event);
        CancelHandle { id, due }
    }

    fn cancel(&mut self, handle: CancelHandle) -> bool {
        self.queue.remove(&(handle.due, handle.id)).is_some()
    }
}
