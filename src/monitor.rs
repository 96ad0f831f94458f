//! Device binding lifecycle
//!
//! Keeps one stable logical binding to "the ring" across Bluetooth
//! reconnects. The physical event-node number changes every time the device
//! reappears, so discovery re-runs whenever the binding is lost: enumerate
//! pointing-capable devices and take the highest node at or above the
//! configured cutoff (built-in pointing devices sit on low nodes).

use crate::config::DeviceConfig;
use crate::error::EngineError;
use crate::source::{DeviceId, InputSource, RawEvent};
use crate::timer::TickMs;
use tracing::{info, warn};

/// What one monitor poll produced, beyond any events drained into the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorEvent {
    Quiet,
    /// A device was discovered and all three channels subscribed
    Bound(DeviceId),
    /// The binding was lost; all consumer state must be reset before events
    /// from a future binding are accepted
    Lost(DeviceId),
}

#[derive(Debug)]
enum BindingState {
    Searching {
        attempts: u32,
        next_attempt_at: TickMs,
    },
    Connected {
        id: DeviceId,
        last_event_at: TickMs,
    },
}

pub struct DeviceMonitor<S: InputSource> {
    source: S,
    cfg: DeviceConfig,
    state: BindingState,
}

impl<S: InputSource> DeviceMonitor<S> {
    pub fn new(source: S, cfg: DeviceConfig, now: TickMs) -> Self {
        Self {
            source,
            cfg,
            state: BindingState::Searching {
                attempts: 0,
                next_attempt_at: now,
            },
        }
    }

    pub fn bound_device(&self) -> Option<DeviceId> {
        match &self.state {
            BindingState::Connected { id, .. } => Some(*id),
            BindingState::Searching { .. } => None,
        }
    }

    /// Drive the lifecycle one step and drain any pending events.
    pub fn poll(
        &mut self,
        now: TickMs,
        events: &mut Vec<RawEvent>,
    ) -> Result<MonitorEvent, EngineError> {
        match &mut self.state {
            BindingState::Searching {
                attempts,
                next_attempt_at,
            } => {
                if now < *next_attempt_at {
                    return Ok(MonitorEvent::Quiet);
                }
                *attempts += 1;
                if *attempts > self.cfg.max_discovery_attempts {
                    return Err(EngineError::DeviceNotFound {
                        attempts: self.cfg.max_discovery_attempts,
                    });
                }
                let attempt = *attempts;
                *next_attempt_at = now + self.cfg.poll_interval_ms;
                self.try_bind(now, attempt)
            }
            BindingState::Connected { id, last_event_at } => {
                let (id, mut last_event) = (*id, *last_event_at);
                let before = events.len();
                if let Err(e) = self.source.poll_events(events) {
                    warn!("Binding to {} broke: {}", id, e);
                    return Ok(self.tear_down(id, now));
                }

                if events.len() > before {
                    last_event = now;
                } else if now.saturating_sub(last_event) >= self.cfg.liveness_window_ms {
                    if self.source.probe(id) {
                        // Still present, just idle; restart the window
                        last_event = now;
                    } else {
                        info!("{} failed the liveness probe", id);
                        return Ok(self.tear_down(id, now));
                    }
                }
                self.state = BindingState::Connected {
                    id,
                    last_event_at: last_event,
                };
                Ok(MonitorEvent::Quiet)
            }
        }
    }

    fn try_bind(&mut self, now: TickMs, attempt: u32) -> Result<MonitorEvent, EngineError> {
        let candidate = self
            .source
            .enumerate()
            .into_iter()
            .filter(|caps| caps.is_pointing && caps.id.0 >= self.cfg.min_device_id)
            .max_by_key(|caps| caps.id);

        let Some(caps) = candidate else {
            info!(
                "Discovery attempt {}/{}: no candidate device",
                attempt, self.cfg.max_discovery_attempts
            );
            return Ok(MonitorEvent::Quiet);
        };

        let id = caps.id;
        let subscribed = self
            .source
            .subscribe_buttons(id)
            .and_then(|_| self.source.subscribe_motion(id))
            .and_then(|_| self.source.subscribe_scroll(id));

        match subscribed {
            Ok(()) => {
                info!("Bound {} ('{}')", id, caps.name);
                self.state = BindingState::Connected {
                    id,
                    last_event_at: now,
                };
                Ok(MonitorEvent::Bound(id))
            }
            Err(e) => {
                // Recoverable: tear the half-made binding down and retry on
                // the polling cadence.
                warn!("Subscription failed, will retry: {}", e);
                self.source.unsubscribe(id);
                Ok(MonitorEvent::Quiet)
            }
        }
    }

    fn tear_down(&mut self, id: DeviceId, now: TickMs) -> MonitorEvent {
        self.source.unsubscribe(id);
        self.state = BindingState::Searching {
            attempts: 0,
            next_attempt_at: now,
        };
        MonitorEvent::Lost(id)
    }

    /// Forced recovery: drop the current binding and re-run discovery now,
    /// without waiting for the inactivity window. Returns the binding that
    /// was dropped, if any.
    pub fn force_rebind(&mut self, now: TickMs) -> Option<DeviceId> {
        match self.state {
            BindingState::Connected { id, .. } => {
                info!("Manual reset: dropping {}", id);
                self.tear_down(id, now);
                Some(id)
            }
            BindingState::Searching { .. } => {
                self.state = BindingState::Searching {
                    attempts: 0,
                    next_attempt_at: now,
                };
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::DeviceCaps;

    /// Scriptable in-memory source
    struct FakeSource {
        devices: Vec<DeviceCaps>,
        pending: Vec<RawEvent>,
        fail_subscribe: bool,
        present: bool,
        poll_error: bool,
        subscribed: Option<DeviceId>,
    }

    impl FakeSource {
        fn new() -> Self {
            Self {
                devices: Vec::new(),
                pending: Vec::new(),
                fail_subscribe: false,
                present: true,
                poll_error: false,
                subscribed: None,
            }
        }

        fn with_device(mut self, id: u32, is_pointing: bool) -> Self {
            self.devices.push(DeviceCaps {
                id: DeviceId(id),
                name: format!("dev{id}"),
                is_pointing,
            });
            self
        }
    }

    impl InputSource for FakeSource {
        fn enumerate(&mut self) -> Vec<DeviceCaps> {
            self.devices.clone()
        }

        fn subscribe_buttons(&mut self, id: DeviceId) -> Result<(), EngineError> {
            if self.fail_subscribe {
                return Err(EngineError::Subscription {
                    id,
                    reason: "scripted failure".to_string(),
                });
            }
            self.subscribed = Some(id);
            Ok(())
        }

        fn subscribe_motion(&mut self, _id: DeviceId) -> Result<(), EngineError> {
            Ok(())
        }

        fn subscribe_scroll(&mut self, _id: DeviceId) -> Result<(), EngineError> {
            Ok(())
        }

        fn unsubscribe(&mut self, _id: DeviceId) {
            self.subscribed = None;
        }

        fn probe(&mut self, _id: DeviceId) -> bool {
            self.present
        }

        fn poll_events(&mut self, out: &mut Vec<RawEvent>) -> Result<(), EngineError> {
            if self.poll_error {
                return Err(EngineError::Subscription {
                    id: self.subscribed.unwrap_or(DeviceId(0)),
                    reason: "read failed".to_string(),
                });
            }
            out.append(&mut self.pending);
            Ok(())
        }
    }

    fn cfg() -> DeviceConfig {
        DeviceConfig {
            min_device_id: 10,
            max_discovery_attempts: 3,
            poll_interval_ms: 100,
            liveness_window_ms: 1000,
        }
    }

    #[test]
    fn test_binds_highest_id_above_cutoff() {
        let source = FakeSource::new()
            .with_device(3, true) // built-in trackpad, below cutoff
            .with_device(14, true)
            .with_device(22, true)
            .with_device(30, false); // keyboard, not pointing
        let mut monitor = DeviceMonitor::new(source, cfg(), 0);
        let mut events = Vec::new();

        assert_eq!(
            monitor.poll(0, &mut events).unwrap(),
            MonitorEvent::Bound(DeviceId(22))
        );
        assert_eq!(monitor.bound_device(), Some(DeviceId(22)));
    }

    #[test]
    fn test_ignores_devices_below_cutoff() {
        let source = FakeSource::new().with_device(3, true);
        let mut monitor = DeviceMonitor::new(source, cfg(), 0);
        let mut events = Vec::new();

        assert_eq!(monitor.poll(0, &mut events).unwrap(), MonitorEvent::Quiet);
        assert_eq!(monitor.bound_device(), None);
    }

    #[test]
    fn test_discovery_exhaustion_is_fatal() {
        let source = FakeSource::new();
        let mut monitor = DeviceMonitor::new(source, cfg(), 0);
        let mut events = Vec::new();

        // 3 attempts at the polling cadence, then fatal
        assert!(monitor.poll(0, &mut events).is_ok());
        assert!(monitor.poll(100, &mut events).is_ok());
        assert!(monitor.poll(200, &mut events).is_ok());
        let err = monitor.poll(300, &mut events).unwrap_err();
        assert!(matches!(err, EngineError::DeviceNotFound { attempts: 3 }));
    }

    #[test]
    fn test_respects_poll_interval() {
        let source = FakeSource::new();
        let mut monitor = DeviceMonitor::new(source, cfg(), 0);
        let mut events = Vec::new();

        assert!(monitor.poll(0, &mut events).is_ok());
        // Polls inside the interval are free: no attempt is consumed
        for now in 1..100 {
            assert!(monitor.poll(now, &mut events).is_ok());
        }
        assert!(monitor.poll(100, &mut events).is_ok());
        assert!(monitor.poll(200, &mut events).is_ok());
        assert!(monitor.poll(300, &mut events).is_err());
    }

    #[test]
    fn test_subscription_failure_is_recoverable() {
        let mut source = FakeSource::new().with_device(15, true);
        source.fail_subscribe = true;
        let mut monitor = DeviceMonitor::new(source, cfg(), 0);
        let mut events = Vec::new();

        assert_eq!(monitor.poll(0, &mut events).unwrap(), MonitorEvent::Quiet);
        assert_eq!(monitor.bound_device(), None);

        // The device starts accepting subscriptions: next attempt binds
        monitor.source.fail_subscribe = false;
        assert_eq!(
            monitor.poll(100, &mut events).unwrap(),
            MonitorEvent::Bound(DeviceId(15))
        );
    }

    #[test]
    fn test_liveness_probe_failure_rebinds() {
        let source = FakeSource::new().with_device(20, true);
        let mut monitor = DeviceMonitor::new(source, cfg(), 0);
        let mut events = Vec::new();

        assert_eq!(
            monitor.poll(0, &mut events).unwrap(),
            MonitorEvent::Bound(DeviceId(20))
        );

        // Device vanishes silently; the probe notices after the window
        monitor.source.present = false;
        assert_eq!(monitor.poll(500, &mut events).unwrap(), MonitorEvent::Quiet);
        assert_eq!(
            monitor.poll(1000, &mut events).unwrap(),
            MonitorEvent::Lost(DeviceId(20))
        );
        assert_eq!(monitor.bound_device(), None);

        // The ring reappears on a different node
        monitor.source.present = true;
        monitor.source.devices[0].id = DeviceId(27);
        assert_eq!(
            monitor.poll(1000, &mut events).unwrap(),
            MonitorEvent::Bound(DeviceId(27))
        );
    }

    #[test]
    fn test_events_feed_the_liveness_window() {
        let source = FakeSource::new().with_device(20, true);
        let mut monitor = DeviceMonitor::new(source, cfg(), 0);
        let mut events = Vec::new();
        monitor.poll(0, &mut events).unwrap();

        // Activity at 900 pushes the silence window forward
        monitor.source.pending.push(RawEvent::Scroll { sign: 1 });
        assert_eq!(monitor.poll(900, &mut events).unwrap(), MonitorEvent::Quiet);
        assert_eq!(events.len(), 1);

        // 1000 is only 100ms of silence now; probe should not run, and the
        // binding survives even though presence would fail
        monitor.source.present = false;
        events.clear();
        assert_eq!(
            monitor.poll(1000, &mut events).unwrap(),
            MonitorEvent::Quiet
        );
        assert_eq!(monitor.bound_device(), Some(DeviceId(20)));
    }

    #[test]
    fn test_poll_error_tears_down() {
        let source = FakeSource::new().with_device(20, true);
        let mut monitor = DeviceMonitor::new(source, cfg(), 0);
        let mut events = Vec::new();
        monitor.poll(0, &mut events).unwrap();

        monitor.source.poll_error = true;
        assert_eq!(
            monitor.poll(10, &mut events).unwrap(),
            MonitorEvent::Lost(DeviceId(20))
        );
        assert!(monitor.source.subscribed.is_none());
    }

    #[test]
    fn test_force_rebind() {
        let source = FakeSource::new().with_device(20, true);
        let mut monitor = DeviceMonitor::new(source, cfg(), 0);
        let mut events = Vec::new();
        monitor.poll(0, &mut events).unwrap();

        assert_eq!(monitor.force_rebind(50), Some(DeviceId(20)));
        assert_eq!(monitor.bound_device(), None);

        // Discovery restarts immediately with a fresh attempt budget
        assert_eq!(
            monitor.poll(50, &mut events).unwrap(),
            MonitorEvent::Bound(DeviceId(20))
        );
    }

    #[test]
    fn test_rebind_resets_attempt_budget() {
        let source = FakeSource::new().with_device(20, true);
        let mut monitor = DeviceMonitor::new(source, cfg(), 0);
        let mut events = Vec::new();
        monitor.poll(0, &mut events).unwrap();

        // Lose the device, then burn two attempts with nothing present
        monitor.source.poll_error = true;
        monitor.poll(10, &mut events).unwrap();
        monitor.source.poll_error = false;
        monitor.source.devices.clear();
        monitor.poll(10, &mut events).unwrap();
        monitor.poll(110, &mut events).unwrap();

        // A manual reset grants a fresh budget: three more attempts before
        // the fatal error
        monitor.force_rebind(200);
        assert!(monitor.poll(200, &mut events).is_ok());
        assert!(monitor.poll(300, &mut events).is_ok());
        assert!(monitor.poll(400, &mut events).is_ok());
        assert!(monitor.poll(500, &mut events).is_err());
    }
}
