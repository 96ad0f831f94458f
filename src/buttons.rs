//! Button event classification
//!
//! Each physical button runs a small state machine that sorts presses into
//! mutually exclusive outcomes: Hold (threshold timer fires while down),
//! Paired (two taps inside the window, or one tap inside an active bypass
//! window), Queued (tap arriving while the modal condition is on), or a
//! recorded first tap that emits nothing until its partner shows up.
//!
//! The bypass window is what makes hold-then-tap usable: after a hold fires
//! and the button is released, a single quick tap counts as confirmed
//! (Paired) instead of having to start a full double-tap cycle.

use crate::config::ButtonsConfig;
use crate::timer::TickMs;
use std::collections::HashMap;
use tracing::debug;

/// Classification of one release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// The hold already fired for this press; a bypass window starts now
    HoldEnd,
    /// Modal condition active: tap deferred until the flush
    Queued,
    /// Confirmed pair (double tap or bypass hit)
    Paired,
    /// Recorded as a possible first half of a pair; nothing emitted
    FirstTap,
    /// Release with no matching press (stale event after a reset)
    Ignored,
}

/// Per-button tracking state, created lazily on first event
#[derive(Debug, Default)]
struct ButtonTrack {
    down_at: Option<TickMs>,
    hold_fired: bool,
    /// Pending unpaired first tap
    last_tap_at: Option<TickMs>,
    queued: bool,
    bypass_until: Option<TickMs>,
}

pub struct ButtonClassifier {
    cfg: ButtonsConfig,
    tracks: HashMap<u8, ButtonTrack>,
}

impl ButtonClassifier {
    pub fn new(cfg: ButtonsConfig) -> Self {
        Self {
            cfg,
            tracks: HashMap::new(),
        }
    }

    fn track(&mut self, button: u8) -> &mut ButtonTrack {
        self.tracks.entry(button).or_default()
    }

    /// Record a press. Returns the deadline at which the hold timer should
    /// fire if the button is still down.
    pub fn on_down(&mut self, button: u8, now: TickMs) -> TickMs {
        let hold_threshold = self.cfg.hold_threshold_ms;
        let track = self.track(button);
        track.down_at = Some(now);
        track.hold_fired = false;
        now + hold_threshold
    }

    /// The hold timer fired while the button is still down.
    pub fn on_hold_fired(&mut self, button: u8) {
        self.track(button).hold_fired = true;
    }

    /// Classify a release. The caller has already cancelled the hold timer.
    pub fn on_up(&mut self, button: u8, now: TickMs, modal_active: bool) -> Release {
        let bypass_window = self.cfg.bypass_window_ms;
        let double_tap_window = self.cfg.double_tap_window_ms;
        let track = self.track(button);

        if track.down_at.take().is_none() {
            return Release::Ignored;
        }

        if track.hold_fired {
            // The hold consumed this press; the release opens a bypass
            // window and resets pair tracking.
            track.hold_fired = false;
            track.bypass_until = Some(now + bypass_window);
            track.last_tap_at = None;
            return Release::HoldEnd;
        }

        if modal_active {
            track.queued = true;
            debug!("button {button}: tap queued behind modal condition");
            return Release::Queued;
        }

        if track.bypass_until.is_some_and(|until| now < until) {
            track.bypass_until = None;
            track.last_tap_at = None;
            return Release::Paired;
        }

        if let Some(first) = track.last_tap_at
            && now.saturating_sub(first) <= double_tap_window
        {
            track.last_tap_at = None;
            return Release::Paired;
        }

        track.last_tap_at = Some(now);
        Release::FirstTap
    }

    /// Bypass expiry timer fired for `button`.
    pub fn on_bypass_expired(&mut self, button: u8) {
        self.track(button).bypass_until = None;
    }

    /// Open a fresh bypass window (used after a queued-tap flush). Returns
    /// the expiry deadline for the caller to arm.
    pub fn begin_bypass(&mut self, button: u8, now: TickMs) -> TickMs {
        let until = now + self.cfg.bypass_window_ms;
        self.track(button).bypass_until = Some(until);
        until
    }

    /// Take all buttons with a queued tap, clearing the flags.
    pub fn take_queued(&mut self) -> Vec<u8> {
        let mut buttons: Vec<u8> = self
            .tracks
            .iter_mut()
            .filter(|(_, t)| t.queued)
            .map(|(b, t)| {
                t.queued = false;
                *b
            })
            .collect();
        buttons.sort_unstable();
        buttons
    }

    pub fn has_queued(&self) -> bool {
        self.tracks.values().any(|t| t.queued)
    }

    /// Unconditional reset on device loss or kill switch. A reconnected
    /// device must never inherit stale timers or half-finished presses.
    pub fn reset(&mut self) {
        self.tracks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> ButtonClassifier {
        ButtonClassifier::new(ButtonsConfig {
            hold_threshold_ms: 200,
            double_tap_window_ms: 500,
            bypass_window_ms: 750,
            ..ButtonsConfig::default()
        })
    }

    #[test]
    fn test_quick_tap_records_first_tap() {
        // down@0, up@50 with hold_threshold=200: one tap-path evaluation,
        // no hold involvement
        let mut c = classifier();
        let deadline = c.on_down(0, 0);
        assert_eq!(deadline, 200);
        assert_eq!(c.on_up(0, 50, false), Release::FirstTap);
    }

    #[test]
    fn test_hold_then_release_emits_no_tap() {
        // down@0, hold fires @200, up@300: the release is HoldEnd, never a tap
        let mut c = classifier();
        c.on_down(0, 0);
        c.on_hold_fired(0);
        assert_eq!(c.on_up(0, 300, false), Release::HoldEnd);
    }

    #[test]
    fn test_double_tap_pairs_exactly_once() {
        // tap@0, tap@300 inside a 500ms window: exactly one Paired
        let mut c = classifier();
        c.on_down(0, 0);
        assert_eq!(c.on_up(0, 30, false), Release::FirstTap);
        c.on_down(0, 280);
        assert_eq!(c.on_up(0, 300, false), Release::Paired);

        // A third tap starts a fresh cycle, not a second pair
        c.on_down(0, 400);
        assert_eq!(c.on_up(0, 420, false), Release::FirstTap);
    }

    #[test]
    fn test_taps_outside_window_do_not_pair() {
        let mut c = classifier();
        c.on_down(0, 0);
        assert_eq!(c.on_up(0, 30, false), Release::FirstTap);
        c.on_down(0, 600);
        assert_eq!(c.on_up(0, 620, false), Release::FirstTap);
    }

    #[test]
    fn test_bypass_tap_fires_paired_immediately() {
        let mut c = classifier();
        c.on_down(0, 0);
        c.on_hold_fired(0);
        assert_eq!(c.on_up(0, 250, false), Release::HoldEnd);

        // Tap before bypass expiry (250 + 750 = 1000)
        c.on_down(0, 500);
        assert_eq!(c.on_up(0, 530, false), Release::Paired);

        // Bypass was consumed: the next tap is a fresh first tap
        c.on_down(0, 600);
        assert_eq!(c.on_up(0, 630, false), Release::FirstTap);
    }

    #[test]
    fn test_tap_after_bypass_expiry_needs_fresh_pair() {
        let mut c = classifier();
        c.on_down(0, 0);
        c.on_hold_fired(0);
        assert_eq!(c.on_up(0, 250, false), Release::HoldEnd);

        c.on_bypass_expired(0);
        c.on_down(0, 1100);
        assert_eq!(c.on_up(0, 1130, false), Release::FirstTap);
    }

    #[test]
    fn test_modal_queues_tap() {
        let mut c = classifier();
        c.on_down(0, 0);
        assert_eq!(c.on_up(0, 40, true), Release::Queued);
        assert!(c.has_queued());
        assert_eq!(c.take_queued(), vec![0]);
        assert!(!c.has_queued());
        assert!(c.take_queued().is_empty());
    }

    #[test]
    fn test_modal_beats_bypass_priority() {
        // Modal queueing is evaluated before the bypass window
        let mut c = classifier();
        c.on_down(0, 0);
        c.on_hold_fired(0);
        assert_eq!(c.on_up(0, 250, false), Release::HoldEnd);

        c.on_down(0, 400);
        assert_eq!(c.on_up(0, 430, true), Release::Queued);
    }

    #[test]
    fn test_begin_bypass_after_flush() {
        let mut c = classifier();
        let until = c.begin_bypass(1, 1000);
        assert_eq!(until, 1750);
        c.on_down(1, 1200);
        assert_eq!(c.on_up(1, 1230, false), Release::Paired);
    }

    #[test]
    fn test_hold_release_resets_pair_tracking() {
        let mut c = classifier();
        c.on_down(0, 0);
        assert_eq!(c.on_up(0, 30, false), Release::FirstTap);

        // A hold wipes the pending first tap; bypass takes over instead
        c.on_down(0, 100);
        c.on_hold_fired(0);
        assert_eq!(c.on_up(0, 350, false), Release::HoldEnd);
        c.on_bypass_expired(0);

        c.on_down(0, 1200);
        assert_eq!(c.on_up(0, 1230, false), Release::FirstTap);
    }

    #[test]
    fn test_buttons_are_independent() {
        let mut c = classifier();
        c.on_down(0, 0);
        assert_eq!(c.on_up(0, 30, false), Release::FirstTap);
        c.on_down(1, 100);
        assert_eq!(c.on_up(1, 130, false), Release::FirstTap);

        c.on_down(0, 200);
        assert_eq!(c.on_up(0, 230, false), Release::Paired);
    }

    #[test]
    fn test_stale_release_ignored() {
        let mut c = classifier();
        assert_eq!(c.on_up(0, 10, false), Release::Ignored);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut c = classifier();
        c.on_down(0, 0);
        c.on_up(0, 30, true);
        assert!(c.has_queued());
        c.reset();
        assert!(!c.has_queued());
        assert_eq!(c.on_up(0, 40, false), Release::Ignored);
    }
}
