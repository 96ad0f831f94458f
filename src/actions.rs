//! Output action vocabulary and binding-string parsing
//!
//! Bindings in the config file are compact strings ("keys:CTRL+SHIFT+P",
//! "click:middle", "scroll:up:3") parsed once at load time into [`Action`]
//! values. Key names follow the Linux input key naming (KEY_A is "A").

use std::fmt;
use thiserror::Error;

/// Modifier keys attached to a chord
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub meta: bool,
}

/// Linux key codes for the left-hand modifiers
const KEY_LEFTCTRL: u16 = 29;
const KEY_LEFTSHIFT: u16 = 42;
const KEY_LEFTALT: u16 = 56;
const KEY_LEFTMETA: u16 = 125;

impl Modifiers {
    pub fn to_key_codes(&self) -> impl Iterator<Item = u16> + '_ {
        let mut codes: [u16; 4] = [0; 4];
        let mut len = 0;
        if self.ctrl {
            codes[len] = KEY_LEFTCTRL;
            len += 1;
        }
        if self.alt {
            codes[len] = KEY_LEFTALT;
            len += 1;
        }
        if self.shift {
            codes[len] = KEY_LEFTSHIFT;
            len += 1;
        }
        if self.meta {
            codes[len] = KEY_LEFTMETA;
            len += 1;
        }

        codes.into_iter().take(len)
    }

    pub fn is_empty(&self) -> bool {
        !(self.ctrl || self.alt || self.shift || self.meta)
    }
}

/// One key press with its modifiers held around it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyChord {
    pub mods: Modifiers,
    pub code: u16,
}

/// Mouse buttons the sink can click
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    Side,
    Extra,
}

impl MouseButton {
    /// Linux BTN_* code
    pub fn code(&self) -> u16 {
        match self {
            MouseButton::Left => 272,
            MouseButton::Right => 273,
            MouseButton::Middle => 274,
            MouseButton::Side => 275,
            MouseButton::Extra => 276,
        }
    }
}

/// Vertical scroll direction as seen by the output device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirection {
    Up,
    Down,
}

impl ScrollDirection {
    /// REL_WHEEL sign convention: positive is up
    pub fn sign(&self) -> i32 {
        match self {
            ScrollDirection::Up => 1,
            ScrollDirection::Down => -1,
        }
    }

    pub fn from_sign(sign: i32) -> Self {
        if sign >= 0 {
            ScrollDirection::Up
        } else {
            ScrollDirection::Down
        }
    }
}

/// A resolved output action, ready to hand to the sink
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Key chord sequence, emitted in order
    Keys(Vec<KeyChord>),
    /// Single mouse click (press + release)
    Click(MouseButton),
    /// Scroll `count` units in `direction`
    Scroll(ScrollDirection, u32),
}

#[derive(Debug, Error, PartialEq)]
#[error("invalid binding '{spec}': {reason}")]
pub struct BindingError {
    pub spec: String,
    pub reason: String,
}

fn err(spec: &str, reason: impl Into<String>) -> BindingError {
    BindingError {
        spec: spec.to_string(),
        reason: reason.into(),
    }
}

/// Parse a binding string into an [`Action`].
pub fn parse_action(spec: &str) -> Result<Action, BindingError> {
    let (kind, rest) = spec
        .split_once(':')
        .ok_or_else(|| err(spec, "expected 'kind:value'"))?;

    match kind {
        "keys" => {
            let mut chords = Vec::new();
            for chord_spec in rest.split(',') {
                chords.push(parse_chord(spec, chord_spec.trim())?);
            }
            if chords.is_empty() {
                return Err(err(spec, "empty key sequence"));
            }
            Ok(Action::Keys(chords))
        }
        "click" => {
            let button = match rest {
                "left" => MouseButton::Left,
                "right" => MouseButton::Right,
                "middle" => MouseButton::Middle,
                "side" => MouseButton::Side,
                "extra" => MouseButton::Extra,
                other => return Err(err(spec, format!("unknown mouse button '{other}'"))),
            };
            Ok(Action::Click(button))
        }
        "scroll" => {
            let (dir_str, count) = match rest.split_once(':') {
                Some((d, c)) => {
                    let count: u32 = c
                        .parse()
                        .map_err(|_| err(spec, format!("bad scroll count '{c}'")))?;
                    (d, count.max(1))
                }
                None => (rest, 1),
            };
            let direction = match dir_str {
                "up" => ScrollDirection::Up,
                "down" => ScrollDirection::Down,
                other => return Err(err(spec, format!("unknown scroll direction '{other}'"))),
            };
            Ok(Action::Scroll(direction, count))
        }
        other => Err(err(spec, format!("unknown action kind '{other}'"))),
    }
}

fn parse_chord(spec: &str, chord: &str) -> Result<KeyChord, BindingError> {
    let tokens: Vec<&str> = chord.split('+').map(str::trim).collect();
    if tokens.is_empty() || tokens.iter().any(|t| t.is_empty()) {
        return Err(err(spec, "empty chord"));
    }

    let mut mods = Modifiers::default();
    for token in &tokens[..tokens.len() - 1] {
        match token.to_ascii_uppercase().as_str() {
            "CTRL" => mods.ctrl = true,
            "ALT" => mods.alt = true,
            "SHIFT" => mods.shift = true,
            "META" | "SUPER" => mods.meta = true,
            other => return Err(err(spec, format!("'{other}' is not a modifier"))),
        }
    }

    let base = tokens[tokens.len() - 1].to_ascii_uppercase();
    let code = key_code(&base).ok_or_else(|| err(spec, format!("unknown key '{base}'")))?;
    Ok(KeyChord { mods, code })
}

/// Key name to Linux key code
pub fn key_code(name: &str) -> Option<u16> {
    let code = match name {
        "ESC" => 1,
        "1" => 2,
        "2" => 3,
        "3" => 4,
        "4" => 5,
        "5" => 6,
        "6" => 7,
        "7" => 8,
        "8" => 9,
        "9" => 10,
        "0" => 11,
        "MINUS" => 12,
        "EQUAL" => 13,
        "BACKSPACE" => 14,
        "TAB" => 15,
        "Q" => 16,
        "W" => 17,
        "E" => 18,
        "R" => 19,
        "T" => 20,
        "Y" => 21,
        "U" => 22,
        "I" => 23,
        "O" => 24,
        "P" => 25,
        "ENTER" => 28,
        "CTRL" => KEY_LEFTCTRL,
        "A" => 30,
        "S" => 31,
        "D" => 32,
        "F" => 33,
        "G" => 34,
        "H" => 35,
        "J" => 36,
        "K" => 37,
        "L" => 38,
        "SHIFT" => KEY_LEFTSHIFT,
        "Z" => 44,
        "X" => 45,
        "C" => 46,
        "V" => 47,
        "B" => 48,
        "N" => 49,
        "M" => 50,
        "ALT" => KEY_LEFTALT,
        "SPACE" => 57,
        "CAPSLOCK" => 58,
        "F1" => 59,
        "F2" => 60,
        "F3" => 61,
        "F4" => 62,
        "F5" => 63,
        "F6" => 64,
        "F7" => 65,
        "F8" => 66,
        "F9" => 67,
        "F10" => 68,
        "F11" => 87,
        "F12" => 88,
        "HOME" => 102,
        "UP" => 103,
        "PAGEUP" => 104,
        "LEFT" => 105,
        "RIGHT" => 106,
        "END" => 107,
        "DOWN" => 108,
        "PAGEDOWN" => 109,
        "INSERT" => 110,
        "DELETE" => 111,
        "MUTE" => 113,
        "VOLUMEDOWN" => 114,
        "VOLUMEUP" => 115,
        "NEXTSONG" => 163,
        "PLAYPAUSE" => 164,
        "PREVIOUSSONG" => 165,
        "META" | "SUPER" => KEY_LEFTMETA,
        "F13" => 183,
        "F14" => 184,
        _ => return None,
    };
    Some(code)
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Keys(chords) => write!(f, "keys ({} chord(s))", chords.len()),
            Action::Click(button) => write!(f, "click {button:?}"),
            Action::Scroll(dir, count) => write!(f, "scroll {dir:?} x{count}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_chord() {
        let action = parse_action("keys:CTRL+C").unwrap();
        let Action::Keys(chords) = action else {
            panic!("expected keys action");
        };
        assert_eq!(chords.len(), 1);
        assert!(chords[0].mods.ctrl);
        assert!(!chords[0].mods.shift);
        assert_eq!(chords[0].code, 46);
    }

    #[test]
    fn test_parse_chord_sequence() {
        let action = parse_action("keys:CTRL+C,CTRL+V").unwrap();
        let Action::Keys(chords) = action else {
            panic!("expected keys action");
        };
        assert_eq!(chords.len(), 2);
        assert_eq!(chords[1].code, 47);
    }

    #[test]
    fn test_parse_bare_modifier_as_base() {
        // A lone META press is a valid binding (e.g. opens the launcher)
        let action = parse_action("keys:META").unwrap();
        let Action::Keys(chords) = action else {
            panic!("expected keys action");
        };
        assert!(chords[0].mods.is_empty());
        assert_eq!(chords[0].code, 125);
    }

    #[test]
    fn test_parse_click() {
        assert_eq!(
            parse_action("click:middle").unwrap(),
            Action::Click(MouseButton::Middle)
        );
    }

    #[test]
    fn test_parse_scroll_with_count() {
        assert_eq!(
            parse_action("scroll:down:3").unwrap(),
            Action::Scroll(ScrollDirection::Down, 3)
        );
        assert_eq!(
            parse_action("scroll:up").unwrap(),
            Action::Scroll(ScrollDirection::Up, 1)
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_action("").is_err());
        assert!(parse_action("keys:").is_err());
        assert!(parse_action("keys:CTRL+NOTAKEY").is_err());
        assert!(parse_action("click:fourth").is_err());
        assert!(parse_action("scroll:sideways").is_err());
        assert!(parse_action("macro:1").is_err());
    }

    #[test]
    fn test_modifier_ordering() {
        let chord = parse_chord("t", "CTRL+ALT+SHIFT+META+A").unwrap();
        let codes: Vec<u16> = chord.mods.to_key_codes().collect();
        assert_eq!(codes, vec![29, 56, 42, 125]);
    }

    #[test]
    fn test_mouse_button_codes() {
        assert_eq!(MouseButton::Left.code(), 272);
        assert_eq!(MouseButton::Extra.code(), 276);
    }
}
