//! Raw input source abstraction and the evdev-backed implementation
//!
//! The engine never talks to hardware directly; it consumes an [`InputSource`]
//! that can enumerate pointing devices, subscribe to one of them per channel
//! (buttons, motion, scroll) and deliver translated [`RawEvent`]s. The
//! production implementation grabs `/dev/input/eventN` so the ring's raw
//! events never reach the desktop alongside the synthetic output.

use crate::error::EngineError;
use evdev::{Device, InputEventKind, RelativeAxisType};
use std::fmt;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Physical device identity: the evdev node number. Changes on every
/// Bluetooth reconnect, which is why the monitor rebinds instead of caching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event{}", self.0)
    }
}

impl DeviceId {
    pub fn node_path(&self) -> PathBuf {
        PathBuf::from(format!("/dev/input/event{}", self.0))
    }
}

/// What enumeration reports about one device
#[derive(Debug, Clone)]
pub struct DeviceCaps {
    pub id: DeviceId,
    pub name: String,
    /// Has relative axes or mouse-range buttons
    pub is_pointing: bool,
}

/// A translated hardware event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawEvent {
    Button { index: u8, down: bool },
    Motion { dx: i32, dy: i32 },
    Scroll { sign: i8 },
}

/// Per-device subscribe/unsubscribe primitives plus a pull-based event feed.
/// Subscribe failures are recoverable by contract; the monitor tears the
/// binding down and retries on its polling cadence.
pub trait InputSource {
    fn enumerate(&mut self) -> Vec<DeviceCaps>;
    fn subscribe_buttons(&mut self, id: DeviceId) -> Result<(), EngineError>;
    fn subscribe_motion(&mut self, id: DeviceId) -> Result<(), EngineError>;
    fn subscribe_scroll(&mut self, id: DeviceId) -> Result<(), EngineError>;
    fn unsubscribe(&mut self, id: DeviceId);
    /// Active presence re-check for the liveness probe
    fn probe(&mut self, id: DeviceId) -> bool;
    /// Drain pending events into `out`. An Err means the binding is gone.
    fn poll_events(&mut self, out: &mut Vec<RawEvent>) -> Result<(), EngineError>;
}

struct Binding {
    id: DeviceId,
    device: Device,
}

/// evdev-backed input source
pub struct EvdevSource {
    /// Evdev key codes of the ring's buttons, position = button index
    button_codes: Vec<u16>,
    binding: Option<Binding>,
    want_buttons: bool,
    want_motion: bool,
    want_scroll: bool,
}

impl EvdevSource {
    pub fn new(button_codes: Vec<u16>) -> Self {
        Self {
            button_codes,
            binding: None,
            want_buttons: false,
            want_motion: false,
            want_scroll: false,
        }
    }

    /// Open, set non-blocking and grab the device if not already bound.
    fn ensure_open(&mut self, id: DeviceId) -> Result<(), EngineError> {
        if let Some(binding) = &self.binding {
            if binding.id == id {
                return Ok(());
            }
            // Rebinding always tears the previous binding down first
            self.unsubscribe_current();
        }

        let path = id.node_path();
        let mut device = Device::open(&path).map_err(|e| EngineError::Subscription {
            id,
            reason: format!("open {path:?}: {e}"),
        })?;

        set_nonblocking(&device).map_err(|e| EngineError::Subscription {
            id,
            reason: format!("set non-blocking: {e}"),
        })?;

        device.grab().map_err(|e| EngineError::Subscription {
            id,
            reason: format!("grab: {e}"),
        })?;

        info!("Grabbed {:?} ('{}')", path, device.name().unwrap_or("?"));
        self.binding = Some(Binding { id, device });
        Ok(())
    }

    fn unsubscribe_current(&mut self) {
        if let Some(mut binding) = self.binding.take() {
            // Best-effort ungrab; dropping the device also releases the grab
            let _ = binding.device.ungrab();
            debug!("Released {}", binding.id);
        }
        self.want_buttons = false;
        self.want_motion = false;
        self.want_scroll = false;
    }
}

fn button_index(codes: &[u16], code: u16) -> Option<u8> {
    codes.iter().position(|c| *c == code).map(|i| i as u8)
}

impl InputSource for EvdevSource {
    fn enumerate(&mut self) -> Vec<DeviceCaps> {
        let mut devices = Vec::new();

        for (path, dev) in evdev::enumerate() {
            let Some(id) = node_number(&path) else {
                continue;
            };
            let name = dev.name().unwrap_or_default().to_string();

            let has_rel = dev
                .supported_relative_axes()
                .map(|r| r.contains(RelativeAxisType::REL_X) || r.contains(RelativeAxisType::REL_Y))
                .unwrap_or(false);
            let has_mouse_btns = dev
                .supported_keys()
                .map(|k| {
                    k.iter()
                        .any(|key| key.code() >= 0x110 && key.code() < 0x160)
                })
                .unwrap_or(false);

            devices.push(DeviceCaps {
                id: DeviceId(id),
                name,
                is_pointing: has_rel || has_mouse_btns,
            });
        }

        devices
    }

    fn subscribe_buttons(&mut self, id: DeviceId) -> Result<(), EngineError> {
        self.ensure_open(id)?;
        self.want_buttons = true;
        Ok(())
    }

    fn subscribe_motion(&mut self, id: DeviceId) -> Result<(), EngineError> {
        self.ensure_open(id)?;
        self.want_motion = true;
        Ok(())
    }

    fn subscribe_scroll(&mut self, id: DeviceId) -> Result<(), EngineError> {
        self.ensure_open(id)?;
        self.want_scroll = true;
        Ok(())
    }

    fn unsubscribe(&mut self, id: DeviceId) {
        if self.binding.as_ref().is_some_and(|b| b.id == id) {
            self.unsubscribe_current();
        }
    }

    fn probe(&mut self, id: DeviceId) -> bool {
        id.node_path().exists()
    }

    fn poll_events(&mut self, out: &mut Vec<RawEvent>) -> Result<(), EngineError> {
        let (want_buttons, want_motion, want_scroll) =
            (self.want_buttons, self.want_motion, self.want_scroll);
        let codes = &self.button_codes;
        let Some(binding) = &mut self.binding else {
            return Ok(());
        };
        let id = binding.id;

        let events = match binding.device.fetch_events() {
            Ok(events) => events,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) => {
                warn!("Read from {} failed: {}", id, e);
                return Err(EngineError::Subscription {
                    id,
                    reason: format!("read: {e}"),
                });
            }
        };

        for ev in events {
            match ev.kind() {
                InputEventKind::Key(key) if want_buttons => {
                    // value 2 is key repeat; classification only wants edges
                    let down = match ev.value() {
                        1 => true,
                        0 => false,
                        _ => continue,
                    };
                    if let Some(index) = button_index(codes, key.code()) {
                        out.push(RawEvent::Button { index, down });
                    }
                }
                InputEventKind::RelAxis(RelativeAxisType::REL_X) if want_motion => {
                    out.push(RawEvent::Motion {
                        dx: ev.value(),
                        dy: 0,
                    });
                }
                InputEventKind::RelAxis(RelativeAxisType::REL_Y) if want_motion => {
                    out.push(RawEvent::Motion {
                        dx: 0,
                        dy: ev.value(),
                    });
                }
                InputEventKind::RelAxis(RelativeAxisType::REL_WHEEL) if want_scroll => {
                    // One RawEvent per detent, preserving sign
                    let value = ev.value();
                    let sign: i8 = if value > 0 { 1 } else { -1 };
                    for _ in 0..value.unsigned_abs() {
                        out.push(RawEvent::Scroll { sign });
                    }
                }
                _ => {}
            }
        }

        Ok(())
    }
}

fn node_number(path: &std::path::Path) -> Option<u32> {
    path.file_name()?
        .to_str()?
        .strip_prefix("event")?
        .parse()
        .ok()
}

fn set_nonblocking(dev: &Device) -> std::io::Result<()> {
    let raw_fd = dev.as_raw_fd();

    // Preserve existing flags; just OR in O_NONBLOCK.
    let current = unsafe { libc::fcntl(raw_fd, libc::F_GETFL) };
    if current < 0 {
        return Err(std::io::Error::last_os_error());
    }

    let rc = unsafe { libc::fcntl(raw_fd, libc::F_SETFL, current | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_node_number_parsing() {
        assert_eq!(node_number(Path::new("/dev/input/event17")), Some(17));
        assert_eq!(node_number(Path::new("/dev/input/event0")), Some(0));
        assert_eq!(node_number(Path::new("/dev/input/mouse0")), None);
        assert_eq!(node_number(Path::new("/dev/input/eventX")), None);
    }

    #[test]
    fn test_device_id_display_and_path() {
        let id = DeviceId(23);
        assert_eq!(id.to_string(), "event23");
        assert_eq!(id.node_path(), PathBuf::from("/dev/input/event23"));
    }

    #[test]
    fn test_button_index_lookup() {
        let codes = vec![272, 273, 274];
        assert_eq!(button_index(&codes, 272), Some(0));
        assert_eq!(button_index(&codes, 274), Some(2));
        assert_eq!(button_index(&codes, 277), None);
    }
}
