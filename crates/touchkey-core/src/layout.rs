//! On-screen key catalog
//!
//! A [`KeyLayout`] is built once at startup and never mutated. Keys carry
//! everything the presentation layer needs (labels, relative width, row)
//! alongside the HID usage ID and, for modifier keys, the modifier bit.

use std::hash::{Hash, Hasher};

use crate::hid;
use crate::keymap::key_for;
use crate::modifier::Modifier;

/// A logical key on the touch surface.
///
/// Identity is the `(code, modifier)` pair: two keys with the same usage ID
/// and modifier bit are the same key, whatever their labels or geometry.
#[derive(Debug, Clone)]
pub struct Key {
    /// HID usage ID
    pub code: u8,
    /// Set for modifier keys (toggle on press, never in the key array)
    pub modifier: Option<Modifier>,
    pub label: &'static str,
    /// Label shown while shift is latched, if it differs
    pub shift_label: Option<&'static str>,
    /// Relative width, 1.0 being a standard key
    pub width: f32,
    pub row: u8,
}

impl Key {
    pub fn new(label: &'static str, code: u8, row: u8) -> Self {
        Self {
            code,
            modifier: None,
            label,
            shift_label: None,
            width: 1.0,
            row,
        }
    }

    pub fn with_shift_label(mut self, label: &'static str) -> Self {
        self.shift_label = Some(label);
        self
    }

    pub fn with_width(mut self, width: f32) -> Self {
        self.width = width;
        self
    }

    /// A modifier key. Its usage ID is derived from the modifier.
    pub fn modifier(label: &'static str, modifier: Modifier, row: u8) -> Self {
        Self {
            code: modifier.key_code(),
            modifier: Some(modifier),
            label,
            shift_label: None,
            width: 1.0,
            row,
        }
    }

    pub fn is_modifier(&self) -> bool {
        self.modifier.is_some()
    }

    /// The label to draw given whether shift is visibly active.
    pub fn label_for(&self, shifted: bool) -> &'static str {
        match (shifted, self.shift_label) {
            (true, Some(label)) => label,
            _ => self.label,
        }
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code && self.modifier == other.modifier
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.code.hash(state);
        self.modifier.hash(state);
    }
}

/// The immutable set of keys on the surface, in row order.
#[derive(Debug, Clone)]
pub struct KeyLayout {
    keys: Vec<Key>,
}

impl KeyLayout {
    pub fn new(keys: Vec<Key>) -> Self {
        Self { keys }
    }

    /// Full-size QWERTY: number row, three letter rows, the modifier row,
    /// and a navigation row.
    pub fn standard() -> Self {
        let mut keys = Vec::new();

        let row = 0;
        let numbers = [
            ("`", "~"),
            ("1", "!"),
            ("2", "@"),
            ("3", "#"),
            ("4", "$"),
            ("5", "%"),
            ("6", "^"),
            ("7", "&"),
            ("8", "*"),
            ("9", "("),
            ("0", ")"),
            ("-", "_"),
            ("=", "+"),
        ];
        push_chars(&mut keys, &numbers, row);
        keys.push(Key::new("Backspace", hid::KEY_BACKSPACE, row).with_width(2.0));

        let row = 1;
        keys.push(Key::new("Tab", hid::KEY_TAB, row).with_width(1.5));
        let qwerty = [
            ("q", "Q"),
            ("w", "W"),
            ("e", "E"),
            ("r", "R"),
            ("t", "T"),
            ("y", "Y"),
            ("u", "U"),
            ("i", "I"),
            ("o", "O"),
            ("p", "P"),
            ("[", "{"),
            ("]", "}"),
            ("\\", "|"),
        ];
        push_chars(&mut keys, &qwerty, row);

        let row = 2;
        keys.push(Key::new("Caps", hid::KEY_CAPS_LOCK, row).with_width(1.75));
        let asdf = [
            ("a", "A"),
            ("s", "S"),
            ("d", "D"),
            ("f", "F"),
            ("g", "G"),
            ("h", "H"),
            ("j", "J"),
            ("k", "K"),
            ("l", "L"),
            (";", ":"),
            ("'", "\""),
        ];
        push_chars(&mut keys, &asdf, row);
        keys.push(Key::new("Enter", hid::KEY_ENTER, row).with_width(2.25));

        let row = 3;
        keys.push(Key::modifier("Shift", Modifier::LeftShift, row).with_width(2.25));
        let zxcv = [
            ("z", "Z"),
            ("x", "X"),
            ("c", "C"),
            ("v", "V"),
            ("b", "B"),
            ("n", "N"),
            ("m", "M"),
            (",", "<"),
            (".", ">"),
            ("/", "?"),
        ];
        push_chars(&mut keys, &zxcv, row);
        keys.push(Key::modifier("Shift", Modifier::RightShift, row).with_width(2.75));

        let row = 4;
        keys.push(Key::modifier("Ctrl", Modifier::LeftCtrl, row).with_width(1.5));
        keys.push(Key::modifier("Win", Modifier::LeftMeta, row).with_width(1.25));
        keys.push(Key::modifier("Alt", Modifier::LeftAlt, row).with_width(1.25));
        keys.push(Key::new("Space", hid::KEY_SPACE, row).with_width(6.0));
        keys.push(Key::modifier("Alt", Modifier::RightAlt, row).with_width(1.25));
        keys.push(Key::modifier("Win", Modifier::RightMeta, row).with_width(1.25));
        keys.push(Key::new("Menu", hid::KEY_MENU, row).with_width(1.25));
        keys.push(Key::modifier("Ctrl", Modifier::RightCtrl, row).with_width(1.5));

        let row = 5;
        keys.push(Key::new("Esc", hid::KEY_ESCAPE, row).with_width(1.5));
        keys.push(Key::new("←", hid::KEY_LEFT_ARROW, row));
        keys.push(Key::new("↑", hid::KEY_UP_ARROW, row));
        keys.push(Key::new("↓", hid::KEY_DOWN_ARROW, row));
        keys.push(Key::new("→", hid::KEY_RIGHT_ARROW, row));
        keys.push(Key::new("Home", hid::KEY_HOME, row));
        keys.push(Key::new("End", hid::KEY_END, row));
        keys.push(Key::new("PgUp", hid::KEY_PAGE_UP, row));
        keys.push(Key::new("PgDn", hid::KEY_PAGE_DOWN, row));

        Self { keys }
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// Keys grouped by row, rows in ascending order.
    pub fn rows(&self) -> Vec<(u8, Vec<&Key>)> {
        let mut rows: Vec<(u8, Vec<&Key>)> = Vec::new();
        for key in &self.keys {
            match rows.iter_mut().find(|(row, _)| *row == key.row) {
                Some((_, keys)) => keys.push(key),
                None => rows.push((key.row, vec![key])),
            }
        }
        rows.sort_by_key(|(row, _)| *row);
        rows
    }

    /// First key with the given usage ID.
    pub fn find(&self, code: u8) -> Option<&Key> {
        self.keys.iter().find(|k| k.code == code)
    }

    /// First key whose label matches (case-insensitive).
    pub fn find_label(&self, label: &str) -> Option<&Key> {
        self.keys
            .iter()
            .find(|k| k.label.eq_ignore_ascii_case(label))
    }
}

impl Default for KeyLayout {
    fn default() -> Self {
        Self::standard()
    }
}

fn push_chars(keys: &mut Vec<Key>, pairs: &[(&'static str, &'static str)], row: u8) {
    for &(base, shifted) in pairs {
        let code = base
            .chars()
            .next()
            .and_then(key_for)
            .map(|k| k.code)
            .unwrap_or(hid::KEY_NONE);
        keys.push(Key::new(base, code, row).with_shift_label(shifted));
    }
}
