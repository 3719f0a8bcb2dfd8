//! Shared keyboard state
//!
//! [`Keyboard`] is the one place that owns the pressed-key set, the modifier
//! state and the last report sent. Touch input and text injection both go
//! through a [`SharedKeyboard`], so each transition happens under a single
//! lock and produces exactly one report.
//!
//! Every state change rebuilds the report and hands it to the transport,
//! even if the bytes did not change. There is no diffing state to reason
//! about, and a failed send is simply superseded by the next one.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::modifier::{Modifier, ModifierState};
use crate::pointer::KeyEvent;
use crate::report::{Report, ReportEncoder};
use crate::transport::Transport;

/// A keyboard shared between the touch session and injection tasks.
pub type SharedKeyboard = Arc<Mutex<Keyboard>>;

/// What a long-press does to the report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LongPressAction {
    /// Release and re-press the key, so the host sees a second keystroke
    #[default]
    Repeat,
    /// Leave the report alone
    Ignore,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyboardStats {
    pub reports_sent: u64,
    pub transmit_failures: u64,
}

pub struct Keyboard {
    encoder: ReportEncoder,
    modifiers: ModifierState,
    last_report: Report,
    stats: KeyboardStats,
    long_press: LongPressAction,
    transport: Arc<dyn Transport>,
}

impl Keyboard {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            encoder: ReportEncoder::new(),
            modifiers: ModifierState::new(),
            last_report: Report::EMPTY,
            stats: KeyboardStats::default(),
            long_press: LongPressAction::default(),
            transport,
        }
    }

    pub fn with_long_press(mut self, action: LongPressAction) -> Self {
        self.long_press = action;
        self
    }

    pub fn into_shared(self) -> SharedKeyboard {
        Arc::new(Mutex::new(self))
    }

    /// Apply a logical key event from the pointer tracker.
    ///
    /// Returns the report sent, or `None` when the event left the report
    /// untouched (long-press with [`LongPressAction::Ignore`]).
    pub fn apply(&mut self, event: &KeyEvent) -> Option<Report> {
        match event {
            KeyEvent::Pressed(key) => Some(self.press(key.code)),
            KeyEvent::Released(key) => Some(self.release(key.code)),
            KeyEvent::ModifierToggled(modifier) => Some(self.toggle_modifier(*modifier)),
            KeyEvent::LongPress(key) => match self.long_press {
                LongPressAction::Ignore => None,
                LongPressAction::Repeat if self.encoder.is_pressed(key.code) => {
                    self.release(key.code);
                    Some(self.press(key.code))
                }
                LongPressAction::Repeat => None,
            },
            KeyEvent::ReleaseAll => Some(self.release_all()),
        }
    }

    pub fn press(&mut self, code: u8) -> Report {
        if !self.encoder.press(code) {
            tracing::debug!("Key 0x{:02x} already down", code);
        }
        self.send()
    }

    pub fn release(&mut self, code: u8) -> Report {
        if !self.encoder.release(code) {
            tracing::debug!("Key 0x{:02x} was not down", code);
        }
        self.send()
    }

    pub fn toggle_modifier(&mut self, modifier: Modifier) -> Report {
        let on = self.modifiers.toggle(modifier);
        tracing::debug!("{} {}", modifier, if on { "latched" } else { "unlatched" });
        self.send()
    }

    /// Press `code` (if any) with `mask` as transient modifiers.
    pub fn press_transient(&mut self, code: Option<u8>, mask: u8) -> Report {
        self.modifiers.push_transient(mask);
        if let Some(code) = code {
            self.encoder.press(code);
        }
        self.send()
    }

    /// Undo a [`press_transient`](Self::press_transient) in one report.
    pub fn release_transient(&mut self, code: Option<u8>, mask: u8) -> Report {
        if let Some(code) = code {
            self.encoder.release(code);
        }
        self.modifiers.pop_transient(mask);
        self.send()
    }

    /// Clear every key and modifier and send the all-zero report.
    pub fn release_all(&mut self) -> Report {
        self.reset();
        self.send()
    }

    /// Clear every key and modifier without sending. Used once the host is
    /// gone and there is nobody to send to.
    pub fn reset(&mut self) {
        self.encoder.clear();
        self.modifiers.reset_all();
        self.last_report = Report::EMPTY;
    }

    /// The report the current state would produce.
    pub fn current_report(&self) -> Report {
        self.encoder.build(self.modifiers.active_mask())
    }

    pub fn last_report(&self) -> Report {
        self.last_report
    }

    pub fn modifiers(&self) -> &ModifierState {
        &self.modifiers
    }

    pub fn pressed(&self) -> Vec<u8> {
        self.encoder.pressed()
    }

    pub fn stats(&self) -> KeyboardStats {
        self.stats
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    fn send(&mut self) -> Report {
        let report = self.current_report();
        self.last_report = report;
        match self.transport.transmit(report) {
            Ok(()) => {
                self.stats.reports_sent += 1;
                tracing::trace!("Sent report {}", report);
            }
            Err(e) => {
                self.stats.transmit_failures += 1;
                tracing::warn!("Failed to send report {}: {}", report, e);
            }
        }
        report
    }
}
