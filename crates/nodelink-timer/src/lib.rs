//! Named, cancellable deadlines for nodelink.
//!
//! A [`Timers`] holds at most one pending deadline per key. Scheduling a
//! key that is already pending replaces the old deadline, so a state
//! transition can never leave a stale duplicate behind. Each schedule
//! returns a [`TimerHandle`]; cancelling through a handle only succeeds
//! while that exact schedule is still pending.
//!
//! # Integration
//!
//! The set is designed to sit inside a driver's `tokio::select!` loop:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         Some(cmd) = cmd_rx.recv() => { /* handle commands */ }
//!         expired = timers.next_expired() => {
//!             session.on_timer(expired.key);
//!         }
//!     }
//! }
//! ```
//!
//! [`Timers::next_expired`] is cancel-safe: if another branch wins, no
//! deadline is consumed.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::time::Duration;

use rand::Rng;
use tokio::time::{self, Instant};
use tracing::{debug, trace};

/// Longest delay a timer accepts. Longer delays are shortened to this,
/// which keeps `Instant` arithmetic from overflowing.
pub const MAX_DELAY: Duration = Duration::from_secs(86_400 * 365);

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Identifies one particular schedule of a key.
///
/// Rescheduling the key produces a new handle; the old one goes stale and
/// cancelling it is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle<K> {
    key: K,
    generation: u64,
}

impl<K: Copy> TimerHandle<K> {
    pub fn key(&self) -> K {
        self.key
    }
}

/// A deadline that has fired, returned by [`Timers::next_expired`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expired<K> {
    pub key: K,
    pub handle: TimerHandle<K>,
    /// How far past its deadline the timer was observed.
    pub late_by: Duration,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    deadline: Instant,
    generation: u64,
}

// ---------------------------------------------------------------------------
// Timer set
// ---------------------------------------------------------------------------

/// A set of pending deadlines, at most one per key.
pub struct Timers<K> {
    entries: HashMap<K, Entry>,
    next_generation: u64,
}

impl<K> Default for Timers<K> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            next_generation: 0,
        }
    }
}

impl<K> fmt::Debug for Timers<K>
where
    K: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timers")
            .field("pending", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<K> Timers<K>
where
    K: Copy + Eq + Hash + fmt::Debug,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `key` to fire after `delay`, replacing any pending
    /// deadline for the same key.
    ///
    /// Delays above [`MAX_DELAY`] are clamped to it.
    pub fn schedule(&mut self, key: K, delay: Duration) -> TimerHandle<K> {
        if delay > MAX_DELAY {
            debug!(timer = ?key, delay_s = delay.as_secs(), "delay clamped to maximum");
        }
        self.schedule_at(key, Instant::now() + delay.min(MAX_DELAY))
    }

    /// Like [`schedule`](Self::schedule), with a random `0..=jitter` added
    /// to the delay.
    ///
    /// Used for keepalives so that many clients started together do not
    /// ping their nodes in lockstep.
    pub fn schedule_jittered(
        &mut self,
        key: K,
        delay: Duration,
        jitter: Duration,
    ) -> TimerHandle<K> {
        let extra = if jitter.is_zero() {
            Duration::ZERO
        } else {
            let max_us = u64::try_from(jitter.as_micros()).unwrap_or(u64::MAX);
            Duration::from_micros(rand::rng().random_range(0..=max_us))
        };
        self.schedule(key, delay.saturating_add(extra))
    }

    /// Schedules `key` to fire at an absolute instant.
    pub fn schedule_at(&mut self, key: K, deadline: Instant) -> TimerHandle<K> {
        self.next_generation += 1;
        let generation = self.next_generation;
        let replaced = self
            .entries
            .insert(key, Entry { deadline, generation })
            .is_some();

        debug!(
            timer = ?key,
            in_ms = deadline.saturating_duration_since(Instant::now()).as_millis() as u64,
            replaced,
            "timer scheduled"
        );
        TimerHandle { key, generation }
    }

    /// Cancels the schedule identified by `handle`.
    ///
    /// Returns `false` if the handle is stale: the timer already fired,
    /// was cancelled, or was rescheduled since.
    pub fn cancel(&mut self, handle: TimerHandle<K>) -> bool {
        match self.entries.get(&handle.key) {
            Some(entry) if entry.generation == handle.generation => {
                self.entries.remove(&handle.key);
                debug!(timer = ?handle.key, "timer cancelled");
                true
            }
            _ => false,
        }
    }

    /// Cancels whatever is pending under `key`. Returns whether anything was.
    pub fn cancel_key(&mut self, key: K) -> bool {
        let removed = self.entries.remove(&key).is_some();
        if removed {
            debug!(timer = ?key, "timer cancelled");
        }
        removed
    }

    /// Cancels every pending timer.
    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            debug!(count = self.entries.len(), "all timers cancelled");
        }
        self.entries.clear();
    }

    pub fn is_scheduled(&self, key: K) -> bool {
        self.entries.contains_key(&key)
    }

    /// When `key` is due, if it is pending.
    pub fn deadline(&self, key: K) -> Option<Instant> {
        self.entries.get(&key).map(|e| e.deadline)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Waits for the earliest pending deadline and removes it.
    ///
    /// With nothing pending this future pends forever; it will never
    /// resolve on its own, but `tokio::select!` still services the other
    /// branches. Ties between equal deadlines go to the earlier schedule.
    pub async fn next_expired(&mut self) -> Expired<K> {
        let Some((key, entry)) = self.earliest() else {
            std::future::pending::<()>().await;
            unreachable!()
        };

        time::sleep_until(entry.deadline).await;

        self.entries.remove(&key);
        let late_by = Instant::now().saturating_duration_since(entry.deadline);
        trace!(timer = ?key, late_ms = late_by.as_millis() as u64, "timer fired");

        Expired {
            key,
            handle: TimerHandle {
                key,
                generation: entry.generation,
            },
            late_by,
        }
    }

    fn earliest(&self) -> Option<(K, Entry)> {
        self.entries
            .iter()
            .min_by_key(|(_, e)| (e.deadline, e.generation))
            .map(|(k, e)| (*k, *e))
    }
}
