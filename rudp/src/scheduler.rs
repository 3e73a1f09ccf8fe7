//! Timer scheduling for connections
//!
//! Connections never sleep or spawn tasks. They ask a [`Scheduler`] to fire a
//! [`Timer`] after a delay and get back a [`TimerId`] they can cancel. Whoever
//! drives the protocol (the tokio endpoint, or a test with a simulated clock)
//! pops due timers from a [`TimerQueue`] and hands them back to the
//! multiplexer.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::address::Address;

/// Handle to a scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// What a timer does when it fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Build and send the connection's SYN
    SendSyn,
    /// Retransmit (or give up on) the packet with this sequence number
    Retransmit(u32),
    /// Send a standalone acknowledgement
    BareAck,
}

/// A timer addressed to the connection of one peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timer {
    pub peer: Address,
    pub kind: TimerKind,
}

impl Timer {
    pub fn new(peer: Address, kind: TimerKind) -> Self {
        Self { peer, kind }
    }
}

/// Schedule-after / cancel capability handed to connections
pub trait Scheduler {
    /// Arms `timer` to fire `delay` after the scheduler's current time
    fn schedule(&mut self, delay: Duration, timer: Timer) -> TimerId;

    /// Disarms a timer
    ///
    /// Cancelling a timer that already fired is a no-op.
    fn cancel(&mut self, id: TimerId);
}

/// Deadline-ordered timer queue over a logical clock
///
/// Time is a [`Duration`] since an arbitrary epoch and only moves forward.
/// Timers sharing a deadline fire in the order they were scheduled.
#[derive(Debug, Default)]
pub struct TimerQueue {
    now: Duration,
    next_id: u64,
    queue: BTreeMap<(Duration, TimerId), Timer>,
    deadlines: HashMap<TimerId, Duration>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current logical time
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Deadline of the earliest pending timer
    pub fn next_deadline(&self) -> Option<Duration> {
        self.queue.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Moves the clock forward without firing anything
    pub fn advance_to(&mut self, now: Duration) {
        self.now = self.now.max(now);
    }

    /// Pops the earliest timer due at or before `now`
    ///
    /// Only one timer is returned per call and the clock is set to its
    /// deadline, so timers scheduled while handling it are relative to the
    /// moment it was due. Callers loop until `None`; a timer cancelled by an
    /// earlier callback is never returned.
    pub fn pop_expired(&mut self, now: Duration) -> Option<Timer> {
        let key = match self.queue.keys().next() {
            Some(&(deadline, id)) if deadline <= now => (deadline, id),
            _ => {
                self.advance_to(now);
                return None;
            }
        };

        let timer = self.queue.remove(&key)?;
        self.deadlines.remove(&key.1);
        self.advance_to(key.0);
        Some(timer)
    }

    pub fn is_scheduled(&self, id: TimerId) -> bool {
        self.deadlines.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Scheduler for TimerQueue {
    fn schedule(&mut self, delay: Duration, timer: Timer) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;

        let deadline = self.now.checked_add(delay).unwrap_or(Duration::MAX);
        self.queue.insert((deadline, id), timer);
        self.deadlines.insert(id, deadline);
        id
    }

    fn cancel(&mut self, id: TimerId) {
        if let Some(deadline) = self.deadlines.remove(&id) {
            self.queue.remove(&(deadline, id));
        }
    }
}
