//! Action dispatch and cross-cutting engine state
//!
//! [`Engine`] owns every subsystem (button classifier, gesture recognizer,
//! scroll smoother), the timer set and the cross-cutting flags (modal
//! condition, lock mode, kill switch). It is the single point of contact
//! with the outside world: subsystems hand it intents, it resolves them
//! through the configured bindings and forwards to the sink.

use crate::actions::{Action, ScrollDirection, parse_action};
use crate::buttons::{ButtonClassifier, Release};
use crate::config::{BindingEntry, Config, ScrollMode};
use crate::gesture::{ComboEntry, ComboTable, GestureRecognizer, Sequence};
use crate::scroll::ScrollSmoother;
use crate::sink::ActionSink;
use crate::source::{DeviceId, RawEvent};
use crate::timer::{TickMs, TimerId, TimerSet};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Fire-and-forget status surface for operator visibility. Absence of a
/// real listener must never affect engine behavior.
pub trait Notifier {
    fn notify(&mut self, message: &str);
}

/// Default notifier: status goes to the log
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&mut self, message: &str) {
        tracing::info!("{message}");
    }
}

#[derive(Debug, Default, Clone)]
struct ButtonActions {
    tap: Option<Action>,
    hold: Option<Action>,
    paired: Option<Action>,
}

/// Per-button bindings resolved from config. Loading is lenient: a bad
/// binding string is skipped with a warning instead of failing startup.
pub struct Bindings {
    map: HashMap<u8, ButtonActions>,
}

impl Bindings {
    pub fn from_config(entries: &[BindingEntry]) -> Self {
        let mut map: HashMap<u8, ButtonActions> = HashMap::new();

        for entry in entries {
            let slot = map.entry(entry.button).or_default();
            for (name, spec, target) in [
                ("tap", &entry.tap, &mut slot.tap),
                ("hold", &entry.hold, &mut slot.hold),
                ("paired", &entry.paired, &mut slot.paired),
            ] {
                if let Some(spec) = spec {
                    match parse_action(spec) {
                        Ok(action) => *target = Some(action),
                        Err(e) => warn!("button {} {name} binding skipped: {e}", entry.button),
                    }
                }
            }
        }

        Self { map }
    }

    fn tap(&self, button: u8) -> Option<&Action> {
        self.map.get(&button)?.tap.as_ref()
    }

    fn hold(&self, button: u8) -> Option<&Action> {
        self.map.get(&button)?.hold.as_ref()
    }

    fn paired(&self, button: u8) -> Option<&Action> {
        self.map.get(&button)?.paired.as_ref()
    }
}

/// Every action the config can reach, for sizing output capabilities.
/// Lenient like `Bindings::from_config`: unparseable entries are skipped.
pub fn collect_actions(cfg: &Config) -> Vec<Action> {
    let mut actions = Vec::new();
    for entry in &cfg.binding {
        for spec in [&entry.tap, &entry.hold, &entry.paired].into_iter().flatten() {
            if let Ok(action) = parse_action(spec) {
                actions.push(action);
            }
        }
    }
    for specs in cfg.combos.values() {
        for spec in specs {
            if let Ok(action) = parse_action(spec) {
                actions.push(action);
            }
        }
    }
    actions
}

pub struct Engine<S: ActionSink, N: Notifier> {
    sink: S,
    notifier: N,
    timers: TimerSet,
    buttons: ButtonClassifier,
    gesture: GestureRecognizer,
    combos: ComboTable,
    scroll: ScrollSmoother,
    bindings: Bindings,

    // Timing the engine arms timers with directly
    bypass_window_ms: u64,
    dictation_buffer_ms: u64,
    scroll_tick_ms: u64,

    modal_button: Option<u8>,
    modal_active: bool,
    /// Operator lock: while set, every press fires this action immediately
    /// and no classification runs
    lock: Option<(Action, Option<TickMs>)>,
    /// Kill switch engaged: all input ignored
    paused: bool,
}

impl<S: ActionSink, N: Notifier> Engine<S, N> {
    pub fn new(cfg: &Config, sink: S, notifier: N) -> Self {
        Self {
            sink,
            notifier,
            timers: TimerSet::new(),
            buttons: ButtonClassifier::new(cfg.buttons.clone()),
            gesture: GestureRecognizer::new(cfg.gesture.clone()),
            combos: ComboTable::from_config(&cfg.combos),
            scroll: ScrollSmoother::new(cfg.scroll.clone()),
            bindings: Bindings::from_config(&cfg.binding),
            bypass_window_ms: cfg.buttons.bypass_window_ms,
            dictation_buffer_ms: cfg.buttons.dictation_buffer_ms,
            scroll_tick_ms: cfg.scroll.tick_interval_ms,
            modal_button: cfg.buttons.modal_button,
            modal_active: false,
            lock: None,
            paused: false,
        }
    }

    /// Process one hardware event at tick `now`.
    pub fn handle_event(&mut self, event: RawEvent, now: TickMs) {
        if self.paused {
            return;
        }

        match event {
            RawEvent::Button { index, down: true } => {
                if let Some((action, _)) = &self.lock {
                    // Classification is frozen: the press fires the locked
                    // binding directly
                    let action = action.clone();
                    self.perform(&action);
                    return;
                }
                let deadline = self.buttons.on_down(index, now);
                self.timers.arm(TimerId::Hold(index), deadline);
            }
            RawEvent::Button { index, down: false } => {
                self.timers.cancel(TimerId::Hold(index));
                if self.lock.is_some() {
                    return;
                }
                match self.buttons.on_up(index, now, self.modal_active) {
                    Release::HoldEnd => {
                        self.timers
                            .arm(TimerId::BypassExpiry(index), now + self.bypass_window_ms);
                    }
                    Release::Paired => {
                        if let Some(action) = self.bindings.paired(index).cloned() {
                            self.perform(&action);
                        }
                    }
                    Release::Queued | Release::FirstTap | Release::Ignored => {}
                }
            }
            RawEvent::Motion { dx, dy } => {
                if self.lock.is_some() {
                    return;
                }
                let deadline = self.gesture.on_motion(dx, dy, now);
                self.timers.arm(TimerId::GestureClassify, deadline);
            }
            RawEvent::Scroll { sign } => {
                let out = self.scroll.on_input(sign, now);
                if out.immediate != 0 {
                    self.sink.emit_scroll(
                        ScrollDirection::from_sign(out.immediate),
                        out.immediate.unsigned_abs(),
                    );
                }
                if out.arm_timer {
                    self.timers
                        .arm(TimerId::ScrollTick, now + self.scroll_tick_ms);
                }
            }
        }
    }

    /// Fire every timer due at `now`, in deadline order.
    pub fn advance(&mut self, now: TickMs) {
        while let Some(id) = self.timers.pop_due(now) {
            self.fire_timer(id, now);
        }
    }

    /// Earliest pending deadline, for the runtime's idle sleep.
    pub fn next_deadline(&self) -> Option<TickMs> {
        self.timers.next_deadline()
    }

    fn fire_timer(&mut self, id: TimerId, now: TickMs) {
        match id {
            TimerId::Hold(button) => {
                self.buttons.on_hold_fired(button);
                if let Some(action) = self.bindings.hold(button).cloned() {
                    self.perform(&action);
                }
                if self.modal_button == Some(button) {
                    let active = !self.modal_active;
                    self.set_modal(active, now);
                }
            }
            TimerId::BypassExpiry(button) => {
                self.buttons.on_bypass_expired(button);
            }
            TimerId::QueuedFlush => {
                for button in self.buttons.take_queued() {
                    if let Some(action) = self.bindings.tap(button).cloned() {
                        self.perform(&action);
                    }
                    // A tap right after the flush is confirmed, not a new
                    // first tap
                    let deadline = self.buttons.begin_bypass(button, now);
                    self.timers.arm(TimerId::BypassExpiry(button), deadline);
                }
            }
            TimerId::GestureClassify => {
                if let Some(direction) = self.gesture.classify() {
                    match self.gesture.on_direction(direction, now) {
                        Sequence::First(deadline) => {
                            self.timers.arm(TimerId::GestureSequence, deadline);
                        }
                        Sequence::Pair(first, second) => {
                            self.timers.cancel(TimerId::GestureSequence);
                            self.dispatch_combo(first, second);
                        }
                    }
                }
            }
            TimerId::GestureSequence => {
                self.gesture.on_sequence_timeout();
            }
            TimerId::ScrollTick => {
                let out = self.scroll.on_timer(now);
                if out.emit != 0 {
                    self.sink.emit_scroll(
                        ScrollDirection::from_sign(out.emit),
                        out.emit.unsigned_abs(),
                    );
                }
                if out.rearm {
                    self.timers
                        .arm(TimerId::ScrollTick, now + self.scroll_tick_ms);
                }
            }
            TimerId::LockExpiry => {
                self.lock = None;
                self.notifier.notify("lock mode expired");
            }
        }
    }

    fn dispatch_combo(&mut self, first: crate::gesture::Direction, second: crate::gesture::Direction) {
        let Some(entry) = self.combos.lookup(first, second) else {
            return;
        };
        match entry {
            ComboEntry::Empty => {
                debug!("combo {}-{} mapped to nothing", first.as_str(), second.as_str());
            }
            ComboEntry::Single(action) => {
                self.perform(&action);
                self.notifier
                    .notify(&format!("combo {}-{}", first.as_str(), second.as_str()));
            }
            ComboEntry::Pair(a, b) => {
                self.perform(&a);
                self.perform(&b);
                self.notifier
                    .notify(&format!("combo {}-{}", first.as_str(), second.as_str()));
            }
        }
    }

    fn perform(&mut self, action: &Action) {
        match action {
            Action::Keys(chords) => self.sink.emit_keys(chords),
            Action::Click(button) => self.sink.emit_click(*button),
            Action::Scroll(direction, count) => self.sink.emit_scroll(*direction, *count),
        }
    }

    /// Toggle or set the modal (dictation) condition. Deactivation starts
    /// the buffer delay after which queued taps flush.
    pub fn set_modal(&mut self, active: bool, now: TickMs) {
        if self.modal_active == active {
            return;
        }
        self.modal_active = active;
        if active {
            self.timers.cancel(TimerId::QueuedFlush);
            self.notifier.notify("dictation on");
        } else {
            self.notifier.notify("dictation off");
            self.timers
                .arm(TimerId::QueuedFlush, now + self.dictation_buffer_ms);
        }
    }

    pub fn modal_active(&self) -> bool {
        self.modal_active
    }

    /// Switch the scroll smoothing strategy. The current burst resets; the
    /// next tick starts clean under the new rules.
    pub fn set_scroll_mode(&mut self, mode: ScrollMode) {
        self.timers.cancel(TimerId::ScrollTick);
        self.scroll.set_mode(mode);
        self.notifier.notify(&format!("scroll mode: {mode:?}"));
    }

    /// Freeze classification: every press fires `action` until expiry or
    /// manual unlock.
    pub fn set_lock_mode(&mut self, action: Action, expiry: Option<TickMs>) {
        if let Some(deadline) = expiry {
            self.timers.arm(TimerId::LockExpiry, deadline);
        } else {
            self.timers.cancel(TimerId::LockExpiry);
        }
        self.lock = Some((action, expiry));
        self.notifier.notify("lock mode engaged");
    }

    pub fn clear_lock_mode(&mut self) {
        if self.lock.take().is_some() {
            self.timers.cancel(TimerId::LockExpiry);
            self.notifier.notify("lock mode released");
        }
    }

    pub fn lock_active(&self) -> bool {
        self.lock.is_some()
    }

    /// Operator pause: same full teardown as device loss, without declaring
    /// the device lost. Input is ignored until release.
    pub fn engage_kill_switch(&mut self) {
        if !self.paused {
            self.paused = true;
            self.reset_all();
            self.notifier.notify("engine paused");
        }
    }

    pub fn release_kill_switch(&mut self) {
        if self.paused {
            self.paused = false;
            self.notifier.notify("engine resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn device_bound(&mut self, id: DeviceId) {
        self.notifier.notify(&format!("ring connected on {id}"));
    }

    pub fn device_lost(&mut self, id: DeviceId) {
        self.reset_all();
        self.notifier.notify(&format!("ring lost ({id})"));
    }

    /// Cancel every timer and clear every per-button/gesture/scroll
    /// structure. A rebind must never inherit stale timers or half-finished
    /// presses. The operator lock survives; its expiry timer is re-armed.
    pub fn reset_all(&mut self) {
        self.timers.cancel_all();
        self.buttons.reset();
        self.gesture.reset();
        self.scroll.reset();
        self.modal_active = false;
        if let Some((_, Some(deadline))) = &self.lock {
            self.timers.arm(TimerId::LockExpiry, *deadline);
        }
    }
}
