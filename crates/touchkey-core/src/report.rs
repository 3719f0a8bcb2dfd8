//! Boot-keyboard report encoding
//!
//! The encoder keeps the non-modifier keys currently down in press order,
//! at most [`ROLLOVER`] of them. When a seventh key goes down the oldest one
//! is evicted, so a new press is never dropped. Reports list the keys in
//! that same order, so identical input always yields identical bytes.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::hid::{REPORT_SIZE, ROLLOVER};

/// An 8-byte boot-keyboard input report.
///
/// Byte 0 is the modifier mask, byte 1 is reserved (always 0), bytes 2-7
/// hold up to six usage IDs, zero padded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Report([u8; REPORT_SIZE]);

impl Report {
    /// All keys up, no modifiers.
    pub const EMPTY: Report = Report([0; REPORT_SIZE]);

    pub fn new(modifiers: u8, keys: &[u8]) -> Self {
        let mut bytes = [0u8; REPORT_SIZE];
        bytes[0] = modifiers;
        for (slot, code) in bytes[2..].iter_mut().zip(keys.iter().take(ROLLOVER)) {
            *slot = *code;
        }
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; REPORT_SIZE] {
        &self.0
    }

    pub fn modifiers(&self) -> u8 {
        self.0[0]
    }

    /// The key array, including trailing zero slots.
    pub fn keys(&self) -> &[u8] {
        &self.0[2..]
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::EMPTY
    }
}

impl From<Report> for [u8; REPORT_SIZE] {
    fn from(report: Report) -> Self {
        report.0
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex: Vec<String> = self.0.iter().map(|b| format!("{:02x}", b)).collect();
        write!(f, "[{}]", hex.join(" "))
    }
}

/// Ordered, bounded set of pressed non-modifier keys.
#[derive(Debug, Clone, Default)]
pub struct ReportEncoder {
    pressed: VecDeque<u8>,
}

impl ReportEncoder {
    pub fn new() -> Self {
        Self {
            pressed: VecDeque::with_capacity(ROLLOVER),
        }
    }

    /// Add a key. Returns `false` if it was already down.
    ///
    /// With the set full, the earliest press is evicted first.
    pub fn press(&mut self, code: u8) -> bool {
        if self.pressed.contains(&code) {
            return false;
        }
        if self.pressed.len() == ROLLOVER {
            if let Some(evicted) = self.pressed.pop_front() {
                tracing::debug!("Rollover full, evicting 0x{:02x}", evicted);
            }
        }
        self.pressed.push_back(code);
        true
    }

    /// Remove a key. Returns `false` if it was not down.
    pub fn release(&mut self, code: u8) -> bool {
        match self.pressed.iter().position(|&c| c == code) {
            Some(index) => {
                self.pressed.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn is_pressed(&self, code: u8) -> bool {
        self.pressed.contains(&code)
    }

    /// Pressed keys, earliest first.
    pub fn pressed(&self) -> Vec<u8> {
        self.pressed.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.pressed.clear();
    }

    pub fn build(&self, modifiers: u8) -> Report {
        let keys: Vec<u8> = self.pressed.iter().copied().collect();
        Report::new(modifiers, &keys)
    }
}
