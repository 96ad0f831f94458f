//! Directional gesture recognition and combo dispatch
//!
//! Relative motion accumulates until a short quiet period, then classifies
//! into one of four cardinal directions (dominant axis, then sign). A single
//! classified swipe never triggers anything on its own; only an ordered pair
//! of swipes inside the sequence window forms a combo, looked up in a fixed
//! 4x4 table.

use crate::actions::{Action, parse_action};
use crate::config::GestureConfig;
use crate::timer::TickMs;
use std::collections::BTreeMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub fn index(&self) -> usize {
        match self {
            Direction::Up => 0,
            Direction::Down => 1,
            Direction::Left => 2,
            Direction::Right => 3,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "up" => Some(Direction::Up),
            "down" => Some(Direction::Down),
            "left" => Some(Direction::Left),
            "right" => Some(Direction::Right),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
        }
    }
}

/// What a classified direction did to the two-stage sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sequence {
    /// Became the pending first direction; arm the sequence timer for the
    /// returned deadline
    First(TickMs),
    /// Completed an ordered pair; cancel the sequence timer
    Pair(Direction, Direction),
}

pub struct GestureRecognizer {
    cfg: GestureConfig,
    dx: i32,
    dy: i32,
    pending: Option<Direction>,
}

impl GestureRecognizer {
    pub fn new(cfg: GestureConfig) -> Self {
        Self {
            cfg,
            dx: 0,
            dy: 0,
            pending: None,
        }
    }

    /// Accumulate motion. The caller re-arms the classification timer for
    /// the returned deadline on every update.
    pub fn on_motion(&mut self, dx: i32, dy: i32, now: TickMs) -> TickMs {
        self.dx += dx;
        self.dy += dy;
        now + self.cfg.timeout_ms
    }

    /// Classification timer fired: resolve the accumulator into a cardinal
    /// direction, or discard it as noise. The accumulator resets either way.
    pub fn classify(&mut self) -> Option<Direction> {
        let (dx, dy) = (self.dx, self.dy);
        self.dx = 0;
        self.dy = 0;

        let direction = if dx.abs() >= dy.abs() {
            if dx.abs() < self.cfg.threshold {
                return None;
            }
            if dx > 0 { Direction::Right } else { Direction::Left }
        } else {
            if dy.abs() < self.cfg.threshold {
                return None;
            }
            // Positive relative Y is downward motion
            if dy > 0 { Direction::Down } else { Direction::Up }
        };
        Some(direction)
    }

    /// Feed a classified direction into the two-stage sequencer.
    pub fn on_direction(&mut self, direction: Direction, now: TickMs) -> Sequence {
        match self.pending.take() {
            Some(first) => Sequence::Pair(first, direction),
            None => {
                self.pending = Some(direction);
                Sequence::First(now + self.cfg.sequence_timeout_ms)
            }
        }
    }

    /// Sequence timer fired with only one direction pending: lone swipes
    /// never trigger an action.
    pub fn on_sequence_timeout(&mut self) {
        if let Some(direction) = self.pending.take() {
            debug!("lone {} swipe discarded", direction.as_str());
        }
    }

    pub fn reset(&mut self) {
        self.dx = 0;
        self.dy = 0;
        self.pending = None;
    }
}

/// One cell of the combo table
#[derive(Debug, Clone, PartialEq)]
pub enum ComboEntry {
    /// Mapped to nothing on purpose
    Empty,
    Single(Action),
    /// Two base actions executed in order
    Pair(Action, Action),
}

#[derive(Debug, Clone, PartialEq)]
enum Slot {
    Unmapped,
    /// Present in the config but unparseable; degrades to a no-op
    Invalid,
    Mapped(ComboEntry),
}

/// Fixed 4x4 direction-pair table. Misconfigured cells are reported once
/// each, not per lookup, so a persistently bad config cannot flood the log.
pub struct ComboTable {
    slots: [[Slot; 4]; 4],
    logged: u16,
}

impl ComboTable {
    pub fn from_config(raw: &BTreeMap<String, Vec<String>>) -> Self {
        let mut slots: [[Slot; 4]; 4] = std::array::from_fn(|_| std::array::from_fn(|_| Slot::Unmapped));

        for (key, specs) in raw {
            let parsed = key.split_once('-').and_then(|(a, b)| {
                Some((Direction::parse(a)?, Direction::parse(b)?))
            });
            let Some((first, second)) = parsed else {
                warn!("combo key '{key}' is not 'dir1-dir2', entry unusable");
                continue;
            };

            let slot = match specs.len() {
                0 => Slot::Mapped(ComboEntry::Empty),
                1 => match parse_action(&specs[0]) {
                    Ok(action) => Slot::Mapped(ComboEntry::Single(action)),
                    Err(_) => Slot::Invalid,
                },
                2 => match (parse_action(&specs[0]), parse_action(&specs[1])) {
                    (Ok(a), Ok(b)) => Slot::Mapped(ComboEntry::Pair(a, b)),
                    _ => Slot::Invalid,
                },
                _ => Slot::Invalid,
            };
            slots[first.index()][second.index()] = slot;
        }

        Self { slots, logged: 0 }
    }

    /// Look up an ordered pair. Unmapped and invalid cells are no-ops,
    /// logged on first encounter.
    pub fn lookup(&mut self, first: Direction, second: Direction) -> Option<ComboEntry> {
        let slot = &self.slots[first.index()][second.index()];
        match slot {
            Slot::Mapped(entry) => Some(entry.clone()),
            Slot::Unmapped | Slot::Invalid => {
                let bit = 1u16 << (first.index() * 4 + second.index());
                if self.logged & bit == 0 {
                    self.logged |= bit;
                    let what = if *slot == Slot::Invalid {
                        "misconfigured"
                    } else {
                        "unmapped"
                    };
                    warn!(
                        "combo {}-{} is {what}, treating as no-op",
                        first.as_str(),
                        second.as_str()
                    );
                }
                None
            }
        }
    }
}
