//! Scroll smoothing
//!
//! Discrete wheel detents become a continuous velocity that a periodic tick
//! decays and drains into quantized output batches. Two strategies share the
//! machinery:
//!
//! - velocity: every raw tick adds signed velocity; opposite ticks cancel.
//! - locked: the first tick of a burst locks the direction and every tick
//!   adds in that direction, so oscillating hardware can't snap the output
//!   back and forth. Only sustained opposite pressure (the consensus
//!   counter) flips the lock.

use crate::config::{ScrollConfig, ScrollMode};
use crate::timer::TickMs;
use tracing::debug;

/// Result of feeding one raw tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputOutput {
    /// Signed units to emit right now (burst-start latency fix)
    pub immediate: i32,
    /// The periodic timer was idle and must be armed
    pub arm_timer: bool,
}

/// Result of one periodic decay tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutput {
    /// Signed units to emit
    pub emit: i32,
    /// Whether the caller should re-arm the periodic timer
    pub rearm: bool,
}

pub struct ScrollSmoother {
    cfg: ScrollConfig,
    velocity: f64,
    /// Fractional output accumulator
    acc: f64,
    /// Direction lock: 0 none, otherwise +/-1 (locked mode only)
    lock: i8,
    /// Sustained opposite-direction pressure (locked mode only)
    opposite_pressure: u32,
    last_input: TickMs,
    timer_running: bool,
}

impl ScrollSmoother {
    pub fn new(cfg: ScrollConfig) -> Self {
        Self {
            cfg,
            velocity: 0.0,
            acc: 0.0,
            lock: 0,
            opposite_pressure: 0,
            last_input: 0,
            timer_running: false,
        }
    }

    pub fn mode(&self) -> ScrollMode {
        self.cfg.mode
    }

    /// Switch strategies at runtime. All burst state resets; a new burst
    /// starts clean under the new rules.
    pub fn set_mode(&mut self, mode: ScrollMode) {
        self.cfg.mode = mode;
        self.reset();
    }

    /// Feed one raw wheel detent.
    pub fn on_input(&mut self, sign: i8, now: TickMs) -> InputOutput {
        self.last_input = now;

        let direction = match self.cfg.mode {
            ScrollMode::Velocity => sign,
            ScrollMode::Locked => self.locked_direction(sign),
        };

        let was_idle = self.velocity == 0.0;
        self.velocity += self.cfg.multiplier * f64::from(direction);

        let immediate = if was_idle { i32::from(direction) } else { 0 };
        let arm_timer = !self.timer_running;
        self.timer_running = true;

        InputOutput {
            immediate,
            arm_timer,
        }
    }

    /// Locked-mode direction resolution: establish, defend or flip the lock.
    fn locked_direction(&mut self, sign: i8) -> i8 {
        if self.lock == 0 {
            self.lock = sign;
            self.opposite_pressure = 0;
        } else if sign != self.lock {
            self.opposite_pressure += 1;
            if self.opposite_pressure >= self.cfg.consensus_threshold {
                debug!("scroll lock flips to {sign}");
                self.lock = sign;
                self.velocity = 0.0;
                self.acc = 0.0;
                self.opposite_pressure = 0;
            }
        } else {
            self.opposite_pressure = self.opposite_pressure.saturating_sub(1);
        }
        self.lock
    }

    /// Periodic decay tick.
    pub fn on_timer(&mut self, now: TickMs) -> TickOutput {
        if self.cfg.mode == ScrollMode::Locked
            && self.lock != 0
            && now.saturating_sub(self.last_input) >= self.cfg.release_ms
        {
            debug!("scroll lock released after inactivity");
            self.reset();
            return TickOutput {
                emit: 0,
                rearm: false,
            };
        }

        self.velocity *= self.cfg.decay;
        self.acc += self.velocity;

        let mut emit = 0;
        if self.acc.abs() >= 1.0 {
            let batch = ((self.acc.abs() / 2.0) as i32).clamp(1, self.cfg.max_batch as i32);
            emit = if self.acc > 0.0 { batch } else { -batch };
            // Subtract exactly what was emitted, never more
            self.acc -= f64::from(emit);
        }

        if self.velocity.abs() < self.cfg.min_velocity {
            self.velocity = 0.0;
            self.acc = 0.0;
            if self.cfg.mode == ScrollMode::Velocity || self.lock == 0 {
                // Velocity mode stops here; locked mode keeps ticking until
                // the inactivity release frees the lock.
                self.timer_running = false;
                return TickOutput { emit, rearm: false };
            }
        }

        TickOutput { emit, rearm: true }
    }

    /// Unconditional reset on device loss or kill switch.
    pub fn reset(&mut self) {
        self.velocity = 0.0;
        self.acc = 0.0;
        self.lock = 0;
        self.opposite_pressure = 0;
        self.timer_running = false;
    }
}
