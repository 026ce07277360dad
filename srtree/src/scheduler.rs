//! Epoch scheduler.
//!
//! Tracks every deadline the node has: the steady beacon timer, the bootstrap
//! fast timer, a pending proactive beacon, and the once-per-epoch flush. It
//! owns no protocol logic; `Node::handle_timer` asks it what is due and tells
//! it what was done.
//!
//! Epoch `k` covers `[k*E, (k+1)*E)`. A node at depth `d` flushes epoch `k` at
//! `k*E + flush_offset(d)`, so children always flush before their parent.

use core::marker::PhantomData;

use crate::config::ProtocolConfig;
use crate::time::{Duration, Timestamp};

pub struct EpochScheduler<C> {
    /// Bootstrap fast timer deadline; `None` once disabled.
    fast_until: Option<Timestamp>,
    next_fast: Timestamp,
    next_beacon: Timestamp,
    proactive_beacon: Option<Timestamp>,
    /// First epoch this node may flush.
    first_epoch: u64,
    last_flushed_epoch: Option<u64>,
    _config: PhantomData<C>,
}

impl<C: ProtocolConfig> EpochScheduler<C> {
    /// Start the timers at boot. The first steady beacon is due after
    /// `beacon_period + jitter`; the fast timer fires immediately.
    pub fn new(now: Timestamp, jitter: Duration) -> Self {
        Self {
            fast_until: Some(now + C::bootstrap_window()),
            next_fast: now,
            next_beacon: now + C::beacon_period() + jitter,
            proactive_beacon: None,
            first_epoch: now.period_index(C::epoch_period()),
            last_flushed_epoch: None,
            _config: PhantomData,
        }
    }

    /// Whether the bootstrap fast timer is still running.
    pub fn is_bootstrapping(&self) -> bool {
        self.fast_until.is_some()
    }

    /// Stop the fast timer (parent acquired).
    pub fn stop_bootstrap(&mut self) {
        self.fast_until = None;
    }

    /// Whether a fast-timer beacon is due. Stops the timer once its window
    /// has elapsed.
    pub fn fast_due(&mut self, now: Timestamp) -> bool {
        match self.fast_until {
            Some(until) if now >= until => {
                self.fast_until = None;
                false
            }
            Some(_) => now >= self.next_fast,
            None => false,
        }
    }

    pub fn fast_fired(&mut self, now: Timestamp) {
        self.next_fast = now + C::fast_period();
    }

    /// Whether a steady or proactive beacon is due.
    pub fn beacon_due(&self, now: Timestamp) -> bool {
        now >= self.next_beacon || self.proactive_beacon.is_some_and(|t| now >= t)
    }

    /// Record a sent beacon: re-arm the steady timer and clear any
    /// pending proactive beacon.
    pub fn beacon_fired(&mut self, now: Timestamp, jitter: Duration) {
        self.next_beacon = now + C::beacon_period() + jitter;
        self.proactive_beacon = None;
    }

    /// Request a beacon one fast period from now. Coalesces with an earlier
    /// pending request.
    pub fn schedule_proactive(&mut self, now: Timestamp) {
        let at = now + C::fast_period();
        match self.proactive_beacon {
            Some(existing) if existing <= at => {}
            _ => self.proactive_beacon = Some(at),
        }
    }

    pub fn proactive_pending(&self) -> Option<Timestamp> {
        self.proactive_beacon
    }

    /// Next epoch that has not been flushed yet.
    fn pending_epoch(&self) -> u64 {
        self.last_flushed_epoch
            .map(|e| e + 1)
            .unwrap_or(self.first_epoch)
            .max(self.first_epoch)
    }

    /// Instant at which epoch `epoch` is flushed by a node at `depth`.
    pub fn flush_at(epoch: u64, depth: u8) -> Timestamp {
        Timestamp::period_start(epoch, C::epoch_period()) + C::flush_offset(depth)
    }

    /// Flush deadline of the next unflushed epoch.
    pub fn next_flush(&self, depth: u8) -> Timestamp {
        Self::flush_at(self.pending_epoch(), depth)
    }

    /// If a flush is due, the epoch it belongs to.
    ///
    /// When the node fell behind by more than one epoch, the most recent
    /// elapsed flush instant wins and the skipped epochs are never reported.
    pub fn flush_due(&self, now: Timestamp, depth: u8) -> Option<u64> {
        let pending = self.pending_epoch();
        if now < Self::flush_at(pending, depth) {
            return None;
        }
        let current = now.period_index(C::epoch_period());
        let latest = if now >= Self::flush_at(current, depth) {
            current
        } else {
            current.saturating_sub(1)
        };
        Some(latest.max(pending))
    }

    pub fn flushed(&mut self, epoch: u64) {
        self.last_flushed_epoch = Some(epoch);
    }

    pub fn last_flushed_epoch(&self) -> Option<u64> {
        self.last_flushed_epoch
    }

    /// Earliest instant at which any scheduled activity is due.
    pub fn next_deadline(&self, depth: u8) -> Timestamp {
        let mut next = self.next_beacon.min(self.next_flush(depth));
        if let Some(t) = self.proactive_beacon {
            next = next.min(t);
        }
        if let Some(until) = self.fast_until {
            next = next.min(self.next_fast.min(until));
        }
        next
    }
}
