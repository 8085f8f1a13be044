//! # Release Scheduling
//!
//! The host loop owns time. Pools only ask it to "release this acquisition
//! after `delay`" and to forget such a request again.
//!
//! ## Design
//!
//! Everything runs on the host's single thread, so cancel-before-fire is
//! never racy. A fired ticket still carries the generation-stamped handle of
//! the acquisition it belongs to: delivering a ticket late (or twice) can
//! never release a newer acquisition of the same slot.
//!
//! `TickScheduler` is the reference host: a virtual clock advanced by the
//! fixed-step loop and a binary heap of deadlines with lazy cancellation.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use crate::instance::InstanceHandle;

/// Token identifying a scheduled auto-release.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CancelToken(u64);

impl CancelToken {
    /// Wraps a raw token value.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw token value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// A deferred release request, handed back to the registry when due.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReleaseTicket {
    /// The acquisition to end.
    pub handle: InstanceHandle,
}

/// What a pool needs from the host scheduler.
pub trait ReleaseScheduler {
    /// Current host time.
    fn now(&self) -> Duration;

    /// Registers a release to fire `delay` from now.
    fn schedule_after(&mut self, delay: Duration, ticket: ReleaseTicket) -> CancelToken;

    /// Forgets a scheduled release. Unknown or already fired tokens are ignored.
    fn cancel(&mut self, token: CancelToken);
}

/// Tick-driven scheduler with a virtual clock.
#[derive(Debug, Default)]
pub struct TickScheduler {
    /// Current virtual time.
    now: Duration,
    /// Next token value.
    next_token: u64,
    /// Deadlines, earliest first. Cancelled entries are skipped on pop and
    /// swept once they outnumber the live ones.
    queue: BinaryHeap<Reverse<(Duration, u64)>>,
    /// Live entries by token.
    pending: HashMap<u64, ReleaseTicket>,
}

impl TickScheduler {
    /// Creates a scheduler at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of scheduled, not yet fired or cancelled, releases.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether `token` is still waiting to fire.
    #[inline]
    #[must_use]
    pub fn is_pending(&self, token: CancelToken) -> bool {
        self.pending.contains_key(&token.0)
    }

    /// Moves the clock forward and returns every ticket now due,
    /// in deadline order (ties in scheduling order).
    pub fn advance(&mut self, dt: Duration) -> Vec<ReleaseTicket> {
        self.now = self.now.saturating_add(dt);

        let mut due = Vec::new();
        while let Some(&Reverse((deadline, token))) = self.queue.peek() {
            if deadline > self.now {
                break;
            }
            self.queue.pop();
            if let Some(ticket) = self.pending.remove(&token) {
                due.push(ticket);
            }
        }
        due
    }
}

impl ReleaseScheduler for TickScheduler {
    fn now(&self) -> Duration {
        self.now
    }

    fn schedule_after(&mut self, delay: Duration, ticket: ReleaseTicket) -> CancelToken {
        let token = self.next_token;
        self.next_token += 1;

        self.queue.push(Reverse((self.now.saturating_add(delay), token)));
        self.pending.insert(token, ticket);
        CancelToken(token)
    }

    fn cancel(&mut self, token: CancelToken) {
        self.pending.remove(&token.0);
        // Pop cancelled entries sitting at the head.
        while let Some(&Reverse((_, head))) = self.queue.peek() {
            if self.pending.contains_key(&head) {
                break;
            }
            self.queue.pop();
        }
        if self.queue.len() > 2 * self.pending.len() + 1 {
            let pending = &self.pending;
            self.queue.retain(|Reverse((_, token))| pending.contains_key(token));
        }
    }
}
