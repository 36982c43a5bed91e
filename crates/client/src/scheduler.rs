//! Decides *when* a changed snapshot is pushed to the server.
//!
//! Two deadlines cooperate: a debounce that fires a quiet period after the
//! *last* change (coalescing bursts into one write), and an independent
//! max-wait watchdog that bounds staleness when changes never go quiet.
//! Firing either performs exactly one persist of the latest state and clears
//! both. Until the initial load handshake completes, nothing is scheduled at
//! all, so default client state can never clobber a real server record.

use std::time::Duration;

use coinstreak_protocol::Snapshot;
use tokio::time::Instant;

/// Debounce: persistence fires this long after the last change.
pub const PERSIST_DEBOUNCE: Duration = Duration::from_millis(500);

/// Upper bound on staleness under continuous change.
pub const PERSIST_MAX_WAIT: Duration = Duration::from_millis(10_000);

#[derive(Debug)]
pub struct PersistScheduler {
    debounce: Duration,
    max_wait: Duration,
    loaded: bool,
    debounce_deadline: Option<Instant>,
    max_deadline: Option<Instant>,
}

impl PersistScheduler {
    pub fn new(debounce: Duration, max_wait: Duration) -> Self {
        Self {
            debounce,
            max_wait,
            loaded: false,
            debounce_deadline: None,
            max_deadline: None,
        }
    }

    /// Lift the boot guard once the initial load handshake has finished
    /// (snapshot applied, or the load timeout elapsed offline).
    pub fn mark_loaded(&mut self) {
        self.loaded = true;
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Observe a mutation. When the encodings are equal this is a no-op: no
    /// timer is started or reset. Otherwise the debounce deadline resets and
    /// the max-wait deadline starts only if none is already pending.
    pub fn on_state_changed(&mut self, now: Instant, prev: &Snapshot, next: &Snapshot) {
        if !self.loaded || prev == next {
            return;
        }
        self.debounce_deadline = Some(now + self.debounce);
        if self.max_deadline.is_none() {
            self.max_deadline = Some(now + self.max_wait);
        }
    }

    /// Earliest pending deadline, for the caller's sleep.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.debounce_deadline, self.max_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// True when a persist is due. Clears both deadlines; the caller performs
    /// exactly one write of the latest state.
    pub fn take_due(&mut self, now: Instant) -> bool {
        let due = self
            .next_deadline()
            .map(|d| d <= now)
            .unwrap_or(false);
        if due {
            self.debounce_deadline = None;
            self.max_deadline = None;
        }
        due
    }
}
