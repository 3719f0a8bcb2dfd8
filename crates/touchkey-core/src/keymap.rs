//! Character and key-name lookup
//!
//! [`key_for`] maps a printable character to the usage ID of the key that
//! produces it on a US layout, plus whether shift must be held. It is the
//! inverse of the on-screen layout for text injection.
//!
//! [`code_for_name`] and [`parse_combo`] resolve named keys and combos like
//! `"Ctrl+Shift+T"` for the `key` control command.

use std::fmt;

use crate::error::ComboParseError;
use crate::hid;
use crate::modifier::Modifier;

/// The key that types a character, and whether shift is needed for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharKey {
    pub code: u8,
    pub shift: bool,
}

/// Resolve a character to its key.
///
/// Covers letters, digits, US punctuation in both shift states, space, tab
/// and enter. Anything else has no HID representation and yields `None`;
/// callers skip such characters.
pub fn key_for(c: char) -> Option<CharKey> {
    let shift = needs_shift(c);
    let base = if shift { unshifted(c) } else { c };
    base_code(base).map(|code| CharKey { code, shift })
}

/// Whether typing `c` requires shift, regardless of current modifier state.
pub fn needs_shift(c: char) -> bool {
    c.is_ascii_uppercase()
        || matches!(
            c,
            '!' | '@'
                | '#'
                | '$'
                | '%'
                | '^'
                | '&'
                | '*'
                | '('
                | ')'
                | '_'
                | '+'
                | '{'
                | '}'
                | '|'
                | ':'
                | '"'
                | '<'
                | '>'
                | '?'
                | '~'
        )
}

/// The character on the same key with shift released.
fn unshifted(c: char) -> char {
    match c {
        '!' => '1',
        '@' => '2',
        '#' => '3',
        '$' => '4',
        '%' => '5',
        '^' => '6',
        '&' => '7',
        '*' => '8',
        '(' => '9',
        ')' => '0',
        '_' => '-',
        '+' => '=',
        '{' => '[',
        '}' => ']',
        '|' => '\\',
        ':' => ';',
        '"' => '\'',
        '~' => '`',
        '<' => ',',
        '>' => '.',
        '?' => '/',
        other => other.to_ascii_lowercase(),
    }
}

fn base_code(c: char) -> Option<u8> {
    match c {
        'a'..='z' => Some(hid::KEY_A + (c as u8 - b'a')),
        '1'..='9' => Some(hid::KEY_1 + (c as u8 - b'1')),
        '0' => Some(hid::KEY_0),
        '\n' | '\r' => Some(hid::KEY_ENTER),
        '\t' => Some(hid::KEY_TAB),
        ' ' => Some(hid::KEY_SPACE),
        '-' => Some(hid::KEY_MINUS),
        '=' => Some(hid::KEY_EQUAL),
        '[' => Some(hid::KEY_LEFT_BRACKET),
        ']' => Some(hid::KEY_RIGHT_BRACKET),
        '\\' => Some(hid::KEY_BACKSLASH),
        ';' => Some(hid::KEY_SEMICOLON),
        '\'' => Some(hid::KEY_QUOTE),
        '`' => Some(hid::KEY_GRAVE),
        ',' => Some(hid::KEY_COMMA),
        '.' => Some(hid::KEY_PERIOD),
        '/' => Some(hid::KEY_SLASH),
        _ => None,
    }
}

/// Resolve a key name (case-insensitive) to its usage ID.
///
/// Accepts the labels of the special keys on the layout, their common
/// aliases, modifier names, F1-F12, and any single character that
/// [`key_for`] knows.
pub fn code_for_name(name: &str) -> Option<u8> {
    let mut chars = name.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if let Some(key) = key_for(c) {
            return Some(key.code);
        }
    }

    if let Some(modifier) = Modifier::from_str_name(name) {
        return Some(modifier.key_code());
    }

    let upper = name.to_uppercase();
    let code = match upper.as_str() {
        "ESC" | "ESCAPE" => hid::KEY_ESCAPE,
        "ENTER" | "RETURN" => hid::KEY_ENTER,
        "TAB" => hid::KEY_TAB,
        "SPACE" => hid::KEY_SPACE,
        "BACKSPACE" | "BKSP" => hid::KEY_BACKSPACE,
        "CAPS" | "CAPSLOCK" | "CAPS_LOCK" => hid::KEY_CAPS_LOCK,
        "MENU" | "APP" | "APPLICATION" => hid::KEY_MENU,

        "LEFT" | "←" => hid::KEY_LEFT_ARROW,
        "RIGHT" | "→" => hid::KEY_RIGHT_ARROW,
        "UP" | "↑" => hid::KEY_UP_ARROW,
        "DOWN" | "↓" => hid::KEY_DOWN_ARROW,

        "HOME" => hid::KEY_HOME,
        "END" => hid::KEY_END,
        "PGUP" | "PAGEUP" => hid::KEY_PAGE_UP,
        "PGDN" | "PAGEDOWN" => hid::KEY_PAGE_DOWN,
        "INSERT" | "INS" => hid::KEY_INSERT,
        "DELETE" | "DEL" => hid::KEY_DELETE,
        "PRINTSCREEN" | "PRTSC" => hid::KEY_PRINT_SCREEN,
        "SCROLLLOCK" => hid::KEY_SCROLL_LOCK,
        "PAUSE" => hid::KEY_PAUSE,

        "MINUS" => hid::KEY_MINUS,
        "EQUAL" | "EQUALS" => hid::KEY_EQUAL,
        "COMMA" => hid::KEY_COMMA,
        "PERIOD" | "DOT" => hid::KEY_PERIOD,
        "SLASH" => hid::KEY_SLASH,
        "BACKSLASH" => hid::KEY_BACKSLASH,
        "SEMICOLON" => hid::KEY_SEMICOLON,
        "QUOTE" | "APOSTROPHE" => hid::KEY_QUOTE,
        "GRAVE" => hid::KEY_GRAVE,

        _ => {
            let n: u8 = upper.strip_prefix('F')?.parse().ok()?;
            if (1..=12).contains(&n) {
                hid::KEY_F1 + (n - 1)
            } else {
                return None;
            }
        }
    };
    Some(code)
}

/// A parsed combo: modifiers to hold plus the main key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCombo {
    /// Modifier bits to hold while the main key is tapped
    pub modifiers: u8,
    /// Usage ID of the main key
    pub code: u8,
}

impl KeyCombo {
    pub fn new(code: u8) -> Self {
        Self { modifiers: 0, code }
    }
}

impl fmt::Display for KeyCombo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for modifier in Modifier::from_mask(self.modifiers) {
            write!(f, "{}+", modifier)?;
        }
        write!(f, "0x{:02X}", self.code)
    }
}

/// Parse a combo string like `"Ctrl+Shift+T"` or `"Escape"`.
///
/// Splits on `+`. Every part but the last must be a modifier. The last part
/// is the main key and may itself be a modifier name (e.g. `"Ctrl"` alone).
/// A lone `"+"` or a trailing `"++"` names the plus key.
pub fn parse_combo(input: &str) -> Result<KeyCombo, ComboParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ComboParseError::Empty);
    }

    let (head, main) = if trimmed == "+" {
        ("", "+")
    } else if let Some(head) = trimmed.strip_suffix("++") {
        (head, "+")
    } else {
        match trimmed.rsplit_once('+') {
            Some((head, main)) => (head, main),
            None => ("", trimmed),
        }
    };

    let mut modifiers = 0u8;
    for part in head.split('+').map(str::trim).filter(|p| !p.is_empty()) {
        let modifier = Modifier::from_str_name(part)
            .ok_or_else(|| ComboParseError::NotAModifier(part.to_string()))?;
        modifiers |= modifier.bit();
    }

    let main = main.trim();
    if main.is_empty() {
        return Err(ComboParseError::MissingKey(input.to_string()));
    }

    // Letters are case-insensitive; a shifted symbol implies shift
    let mut chars = main.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if let Some(key) = key_for(c) {
            if key.shift && !c.is_ascii_alphabetic() {
                modifiers |= hid::MOD_LEFT_SHIFT;
            }
            return Ok(KeyCombo {
                modifiers,
                code: key.code,
            });
        }
    }

    let code = code_for_name(main).ok_or_else(|| ComboParseError::UnknownKey(main.to_string()))?;
    Ok(KeyCombo { modifiers, code })
}
