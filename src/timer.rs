//! Cancellable one-shot timers on a monotonic millisecond tick
//!
//! All timeouts in the engine are driven by the runtime loop's tick counter,
//! never wall-clock time. Each timer is identified by a typed [`TimerId`];
//! arming an id that is already pending replaces the previous deadline, so a
//! stale instance can never fire after a re-arm.

pub type TickMs = u64;

/// Every distinct timer the engine can have in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerId {
    /// Per-button hold threshold
    Hold(u8),
    /// Per-button bypass window expiry
    BypassExpiry(u8),
    /// Buffer delay before flushing taps queued during the modal condition
    QueuedFlush,
    /// Gesture accumulator classification
    GestureClassify,
    /// Two-stage gesture pairing window
    GestureSequence,
    /// Scroll smoother periodic decay tick
    ScrollTick,
    /// Lock mode auto-release
    LockExpiry,
}

/// One-shot timer set. Capacity stays tiny (a handful of ids), so a flat
/// vector beats anything fancier.
#[derive(Debug, Default)]
pub struct TimerSet {
    entries: Vec<(TimerId, TickMs)>,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `id` to fire at `deadline`, cancelling any pending instance first.
    pub fn arm(&mut self, id: TimerId, deadline: TickMs) {
        self.cancel(id);
        self.entries.push((id, deadline));
    }

    pub fn cancel(&mut self, id: TimerId) {
        self.entries.retain(|(e, _)| *e != id);
    }

    pub fn cancel_all(&mut self) {
        self.entries.clear();
    }

    pub fn is_armed(&self, id: TimerId) -> bool {
        self.entries.iter().any(|(e, _)| *e == id)
    }

    /// Earliest pending deadline, if any. The runtime uses this to size its
    /// idle sleep.
    pub fn next_deadline(&self) -> Option<TickMs> {
        self.entries.iter().map(|(_, d)| *d).min()
    }

    /// Remove and return the due timer with the earliest deadline, or None
    /// if nothing is due yet. Calling in a loop fires due timers in
    /// deadline order.
    pub fn pop_due(&mut self, now: TickMs) -> Option<TimerId> {
        let idx = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, (_, d))| *d <= now)
            .min_by_key(|(_, (_, d))| *d)
            .map(|(i, _)| i)?;
        Some(self.entries.remove(idx).0)
    }
}
