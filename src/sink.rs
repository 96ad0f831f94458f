//! Synthetic output sink (uinput virtual device)
//!
//! Emission is fire-and-forget: a failed write is logged and dropped, never
//! retried, because replaying synthetic input late risks double-firing.

use crate::actions::{Action, KeyChord, MouseButton, ScrollDirection};
use crate::error::EngineError;
use anyhow::{Context, Result};
use evdev::{
    AttributeSet, EventType, InputEvent, Key, RelativeAxisType, uinput::VirtualDevice,
    uinput::VirtualDeviceBuilder,
};
use tracing::warn;

const REL_WHEEL: u16 = 8;

/// The engine's only egress. Implementations swallow delivery failures.
pub trait ActionSink {
    fn emit_keys(&mut self, chords: &[KeyChord]);
    fn emit_click(&mut self, button: MouseButton);
    fn emit_scroll(&mut self, direction: ScrollDirection, count: u32);
}

/// uinput-backed sink
pub struct UinputSink {
    vdev: VirtualDevice,
}

impl UinputSink {
    /// Build the virtual device with every capability the configured actions
    /// can reach. Capabilities are fixed at creation, so all bindings and
    /// combo actions must be collected up front.
    pub fn from_actions<'a>(actions: impl Iterator<Item = &'a Action>) -> Result<Self> {
        let mut keys: AttributeSet<Key> = AttributeSet::new();
        let mut rel: AttributeSet<RelativeAxisType> = AttributeSet::new();
        // The wheel axis is always present; scroll smoothing emits even when
        // no binding names a scroll action.
        rel.insert(RelativeAxisType::REL_WHEEL);

        for action in actions {
            match action {
                Action::Keys(chords) => {
                    for chord in chords {
                        keys.insert(Key::new(chord.code));
                        for m in chord.mods.to_key_codes() {
                            keys.insert(Key::new(m));
                        }
                    }
                }
                Action::Click(button) => {
                    keys.insert(Key::new(button.code()));
                }
                Action::Scroll(..) => {}
            }
        }

        let mut builder = VirtualDeviceBuilder::new()
            .context("Failed to create uinput builder")?
            .name(&"RingRemap Virtual Device");

        let has_keys = keys.iter().next().is_some();
        if has_keys {
            builder = builder
                .with_keys(&keys)
                .context("Failed to set key capabilities")?;
        }
        builder = builder
            .with_relative_axes(&rel)
            .context("Failed to set relative axis capabilities")?;

        let vdev = builder.build().context("Failed to build uinput device")?;
        Ok(Self { vdev })
    }

    fn emit(&mut self, events: &[InputEvent], what: &str) {
        if let Err(e) = self.vdev.emit(events) {
            // No retry: replaying synthetic input late double-fires
            warn!("{}", EngineError::Emission(format!("{what}: {e}")));
        }
    }
}

fn sync() -> InputEvent {
    InputEvent::new(EventType::SYNCHRONIZATION, 0, 0)
}

impl ActionSink for UinputSink {
    fn emit_keys(&mut self, chords: &[KeyChord]) {
        for chord in chords {
            let mut events: Vec<InputEvent> = Vec::new();

            // Press modifiers first, then base key
            for m in chord.mods.to_key_codes() {
                events.push(InputEvent::new(EventType::KEY, m, 1));
            }
            events.push(InputEvent::new(EventType::KEY, chord.code, 1));
            events.push(sync());

            // Release base, then modifiers
            events.push(InputEvent::new(EventType::KEY, chord.code, 0));
            for m in chord.mods.to_key_codes() {
                events.push(InputEvent::new(EventType::KEY, m, 0));
            }
            events.push(sync());

            self.emit(&events, "keys");
        }
    }

    fn emit_click(&mut self, button: MouseButton) {
        let code = button.code();
        let events = [
            InputEvent::new(EventType::KEY, code, 1),
            sync(),
            InputEvent::new(EventType::KEY, code, 0),
            sync(),
        ];
        self.emit(&events, "click");
    }

    fn emit_scroll(&mut self, direction: ScrollDirection, count: u32) {
        if count == 0 {
            return;
        }
        let value = direction.sign() * count as i32;
        let events = [
            InputEvent::new(EventType::RELATIVE, REL_WHEEL, value),
            sync(),
        ];
        self.emit(&events, "scroll");
    }
}
