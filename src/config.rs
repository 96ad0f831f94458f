//! Engine configuration
//!
//! All thresholds, button bindings and the gesture combo table live in one
//! TOML file under the user config directory. Every field has a default so a
//! partial (or missing) file still loads.

use crate::actions::parse_action;
use crate::gesture::Direction;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub buttons: ButtonsConfig,

    #[serde(default)]
    pub gesture: GestureConfig,

    #[serde(default)]
    pub scroll: ScrollConfig,

    /// Per-button action bindings
    #[serde(default)]
    pub binding: Vec<BindingEntry>,

    /// Gesture combo table: "dir1-dir2" -> zero, one or two action strings
    #[serde(default)]
    pub combos: BTreeMap<String, Vec<String>>,
}

/// Device discovery and liveness settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Lowest event-node number considered; built-in pointing devices sit
    /// below this cutoff
    #[serde(default = "default_min_device_id")]
    pub min_device_id: u32,

    /// Discovery attempts before giving up for good
    #[serde(default = "default_max_attempts")]
    pub max_discovery_attempts: u32,

    /// Delay between discovery attempts
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Silence on the binding before the presence probe runs
    #[serde(default = "default_liveness_window")]
    pub liveness_window_ms: u64,
}

fn default_min_device_id() -> u32 {
    10
}

fn default_max_attempts() -> u32 {
    40
}

fn default_poll_interval() -> u64 {
    750
}

fn default_liveness_window() -> u64 {
    15_000
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            min_device_id: default_min_device_id(),
            max_discovery_attempts: default_max_attempts(),
            poll_interval_ms: default_poll_interval(),
            liveness_window_ms: default_liveness_window(),
        }
    }
}

/// Button classification timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ButtonsConfig {
    /// Evdev key codes of the ring's buttons, in index order
    #[serde(default = "default_button_codes")]
    pub codes: Vec<u16>,

    /// Press duration at which a hold fires
    #[serde(default = "default_hold_threshold")]
    pub hold_threshold_ms: u64,

    /// Window for pairing two taps
    #[serde(default = "default_double_tap_window")]
    pub double_tap_window_ms: u64,

    /// Grace period after a hold release during which one tap counts as a pair
    #[serde(default = "default_bypass_window")]
    pub bypass_window_ms: u64,

    /// Delay before flushing taps queued during the modal condition
    #[serde(default = "default_dictation_buffer")]
    pub dictation_buffer_ms: u64,

    /// Button whose hold toggles the modal (dictation) condition
    #[serde(default)]
    pub modal_button: Option<u8>,
}

fn default_button_codes() -> Vec<u16> {
    // BTN_LEFT, BTN_RIGHT, BTN_MIDDLE - the ring presents three buttons
    vec![272, 273, 274]
}

fn default_hold_threshold() -> u64 {
    200
}

fn default_double_tap_window() -> u64 {
    300
}

fn default_bypass_window() -> u64 {
    750
}

fn default_dictation_buffer() -> u64 {
    350
}

impl Default for ButtonsConfig {
    fn default() -> Self {
        Self {
            codes: default_button_codes(),
            hold_threshold_ms: default_hold_threshold(),
            double_tap_window_ms: default_double_tap_window(),
            bypass_window_ms: default_bypass_window(),
            dictation_buffer_ms: default_dictation_buffer(),
            modal_button: None,
        }
    }
}

/// Gesture recognition thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GestureConfig {
    /// Minimum accumulated magnitude on the dominant axis
    #[serde(default = "default_gesture_threshold")]
    pub threshold: i32,

    /// Quiet time after motion before the accumulator is classified
    #[serde(default = "default_gesture_timeout")]
    pub timeout_ms: u64,

    /// Window in which a second swipe completes a combo
    #[serde(default = "default_sequence_timeout")]
    pub sequence_timeout_ms: u64,
}

fn default_gesture_threshold() -> i32 {
    30
}

fn default_gesture_timeout() -> u64 {
    80
}

fn default_sequence_timeout() -> u64 {
    450
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            threshold: default_gesture_threshold(),
            timeout_ms: default_gesture_timeout(),
            sequence_timeout_ms: default_sequence_timeout(),
        }
    }
}

/// Scroll smoothing parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrollConfig {
    /// Active smoothing strategy
    #[serde(default)]
    pub mode: ScrollMode,

    /// Velocity added per raw tick
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Per-tick velocity decay factor, below 1
    #[serde(default = "default_decay")]
    pub decay: f64,

    /// Periodic decay tick interval
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Velocity magnitude below which the smoother stops
    #[serde(default = "default_min_velocity")]
    pub min_velocity: f64,

    /// Upper bound on units emitted per decay tick
    #[serde(default = "default_max_batch")]
    pub max_batch: u32,

    /// Sustained opposite ticks needed to flip a locked direction
    #[serde(default = "default_consensus_threshold")]
    pub consensus_threshold: u32,

    /// Inactivity before a direction lock releases
    #[serde(default = "default_release")]
    pub release_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollMode {
    #[default]
    Velocity,
    Locked,
}

fn default_multiplier() -> f64 {
    0.25
}

fn default_decay() -> f64 {
    0.8
}

fn default_tick_interval() -> u64 {
    8
}

fn default_min_velocity() -> f64 {
    0.01
}

fn default_max_batch() -> u32 {
    8
}

fn default_consensus_threshold() -> u32 {
    3
}

fn default_release() -> u64 {
    250
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            mode: ScrollMode::Velocity,
            multiplier: default_multiplier(),
            decay: default_decay(),
            tick_interval_ms: default_tick_interval(),
            min_velocity: default_min_velocity(),
            max_batch: default_max_batch(),
            consensus_threshold: default_consensus_threshold(),
            release_ms: default_release(),
        }
    }
}

/// Bindings for one button
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BindingEntry {
    /// Button index (position in `buttons.codes`)
    pub button: u8,

    #[serde(default)]
    pub tap: Option<String>,

    #[serde(default)]
    pub hold: Option<String>,

    #[serde(default)]
    pub paired: Option<String>,
}

impl Config {
    /// Default config file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not find config directory")?
            .join("ringremap");

        fs::create_dir_all(&config_dir)?;
        Ok(config_dir.join("config.toml"))
    }

    /// Load from the given path, or the default path. A missing file yields
    /// the default configuration.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };

        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {path:?}"))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {path:?}"))?;
            info!("Loaded config from {:?}", path);
            Ok(config)
        } else {
            info!("No config file at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save to the given path, or the default path.
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {path:?}"))?;
        info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Strict validation for `--check-config`. Runtime loading is lenient:
    /// bad bindings are skipped with a warning and bad combo entries degrade
    /// to no-ops, but this surfaces them all up front.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.scroll.decay) {
            bail!("scroll.decay must be in (0, 1), got {}", self.scroll.decay);
        }
        if self.scroll.multiplier <= 0.0 {
            bail!("scroll.multiplier must be positive");
        }
        if self.scroll.tick_interval_ms == 0 {
            bail!("scroll.tick_interval_ms must be nonzero");
        }
        if self.buttons.codes.is_empty() {
            bail!("buttons.codes must list at least one key code");
        }
        if let Some(modal) = self.buttons.modal_button
            && modal as usize >= self.buttons.codes.len()
        {
            bail!("buttons.modal_button {} has no matching code entry", modal);
        }

        for entry in &self.binding {
            if entry.button as usize >= self.buttons.codes.len() {
                bail!("binding for unknown button index {}", entry.button);
            }
            for spec in [&entry.tap, &entry.hold, &entry.paired].into_iter().flatten() {
                parse_action(spec).with_context(|| format!("button {} binding", entry.button))?;
            }
        }

        for (key, specs) in &self.combos {
            let (first, second) = key
                .split_once('-')
                .with_context(|| format!("combo key '{key}' is not 'dir1-dir2'"))?;
            for dir in [first, second] {
                if Direction::parse(dir).is_none() {
                    bail!("combo key '{key}' has unknown direction '{dir}'");
                }
            }
            if specs.len() > 2 {
                bail!("combo '{key}' lists {} actions, max is 2", specs.len());
            }
            for spec in specs {
                parse_action(spec).with_context(|| format!("combo '{key}'"))?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.device.min_device_id, 10);
        assert_eq!(config.buttons.hold_threshold_ms, 200);
        assert_eq!(config.scroll.mode, ScrollMode::Velocity);
        assert!(config.binding.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let toml = r#"
[buttons]
hold_threshold_ms = 150

[scroll]
mode = "locked"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.buttons.hold_threshold_ms, 150);
        assert_eq!(config.buttons.double_tap_window_ms, 300);
        assert_eq!(config.scroll.mode, ScrollMode::Locked);
        assert_eq!(config.scroll.tick_interval_ms, 8);
    }

    #[test]
    fn test_binding_and_combo_sections() {
        let toml = r#"
[[binding]]
button = 0
tap = "click:left"
hold = "keys:META"
paired = "keys:CTRL+C"

[combos]
up-down = ["keys:CTRL+T"]
left-right = []
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.binding.len(), 1);
        assert_eq!(config.combos.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_binding() {
        let mut config = Config::default();
        config.binding.push(BindingEntry {
            button: 0,
            tap: Some("keys:NOTAKEY".to_string()),
            hold: None,
            paired: None,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_combo_key() {
        let mut config = Config::default();
        config
            .combos
            .insert("up-diagonal".to_string(), vec!["keys:A".to_string()]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_modal_button() {
        let mut config = Config::default();
        config.buttons.modal_button = Some(9);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_decay() {
        let mut config = Config::default();
        config.scroll.decay = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_round_trip() {
        let mut config = Config::default();
        config.buttons.modal_button = Some(1);
        config
            .combos
            .insert("up-up".to_string(), vec!["scroll:up:5".to_string()]);

        let serialized = toml::to_string_pretty(&config).unwrap();
        let reparsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(reparsed.buttons.modal_button, Some(1));
        assert_eq!(reparsed.combos["up-up"], vec!["scroll:up:5"]);
    }
}
