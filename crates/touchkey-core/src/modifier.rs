//! Latched modifier state
//!
//! Modifiers on a touch surface are toggles, not held keys: a tap on Shift
//! flips its bit and the bit stays set until Shift is tapped again or the
//! whole state is reset. Left and right variants are separate bits with no
//! coupling between them.
//!
//! Text injection needs shift for a single keystroke without disturbing what
//! the user latched, so the state carries a second, transient layer that is
//! OR-ed into the report but never touches the latched bits.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::hid;

/// One of the eight modifier bits of the boot report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modifier {
    LeftCtrl,
    LeftShift,
    LeftAlt,
    LeftMeta,
    RightCtrl,
    RightShift,
    RightAlt,
    RightMeta,
}

impl Modifier {
    pub const ALL: [Modifier; 8] = [
        Modifier::LeftCtrl,
        Modifier::LeftShift,
        Modifier::LeftAlt,
        Modifier::LeftMeta,
        Modifier::RightCtrl,
        Modifier::RightShift,
        Modifier::RightAlt,
        Modifier::RightMeta,
    ];

    /// The bit this modifier occupies in report byte 0.
    pub fn bit(self) -> u8 {
        match self {
            Modifier::LeftCtrl => hid::MOD_LEFT_CTRL,
            Modifier::LeftShift => hid::MOD_LEFT_SHIFT,
            Modifier::LeftAlt => hid::MOD_LEFT_ALT,
            Modifier::LeftMeta => hid::MOD_LEFT_META,
            Modifier::RightCtrl => hid::MOD_RIGHT_CTRL,
            Modifier::RightShift => hid::MOD_RIGHT_SHIFT,
            Modifier::RightAlt => hid::MOD_RIGHT_ALT,
            Modifier::RightMeta => hid::MOD_RIGHT_META,
        }
    }

    /// The usage ID of the physical key for this modifier (0xE0..=0xE7).
    pub fn key_code(self) -> u8 {
        hid::KEY_LEFT_CTRL + self.bit().trailing_zeros() as u8
    }

    /// Map a usage ID in 0xE0..=0xE7 back to its modifier.
    pub fn from_key_code(code: u8) -> Option<Self> {
        match code {
            hid::KEY_LEFT_CTRL..=hid::KEY_RIGHT_META => {
                Some(Self::ALL[(code - hid::KEY_LEFT_CTRL) as usize])
            }
            _ => None,
        }
    }

    /// Parse a modifier name (case-insensitive).
    ///
    /// Bare names ("Ctrl", "Shift", "Alt", "Meta"/"Super"/"Win") resolve to the
    /// left variant; an `R`/`Right` prefix selects the right one.
    pub fn from_str_name(name: &str) -> Option<Self> {
        match name.to_uppercase().as_str() {
            "CTRL" | "CONTROL" | "LCTRL" | "LEFTCTRL" => Some(Modifier::LeftCtrl),
            "SHIFT" | "LSHIFT" | "LEFTSHIFT" => Some(Modifier::LeftShift),
            "ALT" | "LALT" | "LEFTALT" => Some(Modifier::LeftAlt),
            "META" | "SUPER" | "WIN" | "GUI" | "LMETA" | "LEFTMETA" | "LWIN" => {
                Some(Modifier::LeftMeta)
            }
            "RCTRL" | "RIGHTCTRL" => Some(Modifier::RightCtrl),
            "RSHIFT" | "RIGHTSHIFT" => Some(Modifier::RightShift),
            "RALT" | "RIGHTALT" | "ALTGR" => Some(Modifier::RightAlt),
            "RMETA" | "RIGHTMETA" | "RWIN" | "RSUPER" => Some(Modifier::RightMeta),
            _ => None,
        }
    }

    /// Decompose a mask into its modifiers, lowest bit first.
    pub fn from_mask(mask: u8) -> Vec<Modifier> {
        Self::ALL.into_iter().filter(|m| mask & m.bit() != 0).collect()
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Modifier::LeftCtrl => "LeftCtrl",
            Modifier::LeftShift => "LeftShift",
            Modifier::LeftAlt => "LeftAlt",
            Modifier::LeftMeta => "LeftMeta",
            Modifier::RightCtrl => "RightCtrl",
            Modifier::RightShift => "RightShift",
            Modifier::RightAlt => "RightAlt",
            Modifier::RightMeta => "RightMeta",
        };
        f.write_str(name)
    }
}

/// Toggle-style modifier state with a transient overlay for injection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModifierState {
    latched: u8,
    transient: u8,
}

impl ModifierState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip exactly one latched bit. Returns whether it is now on.
    pub fn toggle(&mut self, modifier: Modifier) -> bool {
        self.latched ^= modifier.bit();
        self.is_latched(modifier)
    }

    pub fn is_latched(&self, modifier: Modifier) -> bool {
        self.latched & modifier.bit() != 0
    }

    pub fn latched_mask(&self) -> u8 {
        self.latched
    }

    /// The mask that goes into report byte 0.
    pub fn active_mask(&self) -> u8 {
        self.latched | self.transient
    }

    /// Overlay bits for the duration of an injected keystroke.
    pub fn push_transient(&mut self, mask: u8) {
        self.transient |= mask;
    }

    /// Remove bits previously added with [`push_transient`](Self::push_transient).
    pub fn pop_transient(&mut self, mask: u8) {
        self.transient &= !mask;
    }

    /// Clear every latched and transient bit.
    pub fn reset_all(&mut self) {
        self.latched = 0;
        self.transient = 0;
    }
}
