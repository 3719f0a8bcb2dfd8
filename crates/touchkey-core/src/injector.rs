//! Paced text and key-combo injection
//!
//! Each character becomes a press report, a hold, a release report and a
//! gap. Shift for uppercase and shifted symbols is applied as a transient
//! modifier, so a latched shift the user set on screen survives.
//!
//! Injections run one at a time and can be cancelled at any point. A
//! cancelled injection always finishes with its key released.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::InjectError;
use crate::hid;
use crate::keyboard::SharedKeyboard;
use crate::keymap::{key_for, parse_combo, KeyCombo};
use crate::modifier::Modifier;

/// Delays between the reports of an injected keystroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// Between press and release of one key
    pub key_hold: Duration,
    /// Between one key's release and the next key's press
    pub char_gap: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            key_hold: Duration::from_millis(10),
            char_gap: Duration::from_millis(20),
        }
    }
}

/// Outcome of a completed [`TextInjector::type_text`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InjectionSummary {
    pub typed: usize,
    /// Characters with no key on a US layout
    pub skipped: usize,
}

#[derive(Clone)]
pub struct TextInjector {
    keyboard: SharedKeyboard,
    pacing: Pacing,
    /// Held for the whole of an injection
    sequence: Arc<Mutex<()>>,
    /// Parent of every injection's token; swapped out on cancel
    epoch: Arc<StdMutex<CancellationToken>>,
}

impl TextInjector {
    pub fn new(keyboard: SharedKeyboard, pacing: Pacing) -> Self {
        Self {
            keyboard,
            pacing,
            sequence: Arc::new(Mutex::new(())),
            epoch: Arc::new(StdMutex::new(CancellationToken::new())),
        }
    }

    pub fn pacing(&self) -> Pacing {
        self.pacing
    }

    /// Cancel every running and queued injection.
    pub fn cancel_all(&self) {
        let mut epoch = self.epoch.lock().unwrap_or_else(|e| e.into_inner());
        epoch.cancel();
        *epoch = CancellationToken::new();
        tracing::debug!("Cancelled pending injections");
    }

    /// Type `text`, one keystroke per character.
    ///
    /// Unmapped characters are skipped and counted. A `"\r\n"` pair types a
    /// single Enter. Returns
    /// [`InjectError::Cancelled`] if [`cancel_all`](Self::cancel_all) is
    /// called before the last character is released.
    pub async fn type_text(&self, text: &str) -> Result<InjectionSummary, InjectError> {
        let cancel = self.token();
        let _sequence = self.sequence.lock().await;
        let mut summary = InjectionSummary::default();

        tracing::info!("Typing {} character(s)", text.chars().count());

        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            // CRLF is one line break
            if c == '\r' && chars.peek() == Some(&'\n') {
                continue;
            }
            let Some(key) = key_for(c) else {
                tracing::debug!("No key for {:?}, skipping", c);
                summary.skipped += 1;
                continue;
            };

            if summary.typed > 0 && !pause(self.pacing.char_gap, &cancel).await {
                return Err(InjectError::Cancelled { typed: summary.typed });
            }

            let mask = if key.shift { hid::MOD_LEFT_SHIFT } else { 0 };
            if !self.stroke(Some(key.code), mask, &cancel).await {
                return Err(InjectError::Cancelled { typed: summary.typed });
            }
            summary.typed += 1;
        }

        Ok(summary)
    }

    /// Parse and tap a combo such as `"Ctrl+Alt+Delete"`.
    pub async fn tap_key(&self, combo: &str) -> Result<KeyCombo, InjectError> {
        let combo = parse_combo(combo)?;
        self.tap_combo(&combo).await?;
        Ok(combo)
    }

    /// Press the combo's modifiers and key together, hold, release together.
    ///
    /// A combo whose main key is itself a modifier taps just the modifier bits.
    pub async fn tap_combo(&self, combo: &KeyCombo) -> Result<(), InjectError> {
        let cancel = self.token();
        let _sequence = self.sequence.lock().await;

        let (code, mask) = match Modifier::from_key_code(combo.code) {
            Some(modifier) => (None, combo.modifiers | modifier.bit()),
            None => (Some(combo.code), combo.modifiers),
        };

        tracing::info!("Tapping {}", combo);
        if self.stroke(code, mask, &cancel).await {
            Ok(())
        } else {
            Err(InjectError::Cancelled { typed: 0 })
        }
    }

    /// One press/hold/release. Returns `false` if cancelled; the release is
    /// sent either way once the press went out.
    async fn stroke(&self, code: Option<u8>, mask: u8, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        self.keyboard.lock().await.press_transient(code, mask);
        let held = pause(self.pacing.key_hold, cancel).await;
        self.keyboard.lock().await.release_transient(code, mask);
        held
    }

    fn token(&self) -> CancellationToken {
        self.epoch
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .child_token()
    }
}

/// Sleep for `duration`. Returns `false` if cancelled first.
async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyboard::Keyboard;
    use crate::keymap::needs_shift;
    use crate::report::Report;
    use crate::transport::RecordingTransport;

    fn injector() -> (TextInjector, SharedKeyboard, Arc<RecordingTransport>) {
        let transport = RecordingTransport::new();
        let keyboard = Keyboard::new(transport.clone()).into_shared();
        (
            TextInjector::new(keyboard.clone(), Pacing::default()),
            keyboard,
            transport,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_type_uppercase_letter() {
        let (injector, _keyboard, transport) = injector();
        let summary = injector.type_text("A").await.unwrap();
        assert_eq!(summary, InjectionSummary { typed: 1, skipped: 0 });

        let reports: Vec<[u8; 8]> = transport.take().into_iter().map(Into::into).collect();
        assert_eq!(
            reports,
            vec![[0x02, 0, 0x04, 0, 0, 0, 0, 0], [0, 0, 0, 0, 0, 0, 0, 0]]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_printable_ascii_roundtrips_to_empty() {
        let (injector, _keyboard, transport) = injector();
        for byte in 0x20u8..0x7F {
            let c = byte as char;
            injector.type_text(&c.to_string()).await.unwrap();

            let reports = transport.take();
            assert_eq!(reports.len(), 2, "{c:?}");
            let expected_mask = if needs_shift(c) { hid::MOD_LEFT_SHIFT } else { 0 };
            assert_eq!(reports[0].modifiers(), expected_mask, "{c:?}");
            assert_ne!(reports[0].keys()[0], 0, "{c:?}");
            assert_eq!(reports[1], Report::EMPTY, "{c:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmapped_characters_are_skipped() {
        let (injector, _keyboard, transport) = injector();
        let summary = injector.type_text("a\u{e9}b").await.unwrap();
        assert_eq!(summary, InjectionSummary { typed: 2, skipped: 1 });
        assert_eq!(transport.take().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_crlf_types_one_enter() {
        let (injector, _keyboard, transport) = injector();
        let summary = injector.type_text("a\r\nb\rc").await.unwrap();
        assert_eq!(summary, InjectionSummary { typed: 5, skipped: 0 });

        let presses: Vec<Report> = transport.take().into_iter().step_by(2).collect();
        assert_eq!(
            presses,
            vec![
                Report::new(0, &[hid::KEY_A]),
                Report::new(0, &[hid::KEY_ENTER]),
                Report::new(0, &[hid::KEY_A + 1]),
                Report::new(0, &[hid::KEY_ENTER]),
                Report::new(0, &[hid::KEY_A + 2]),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_works_after_poisoned_lock() {
        let (injector, _keyboard, transport) = injector();
        let epoch = injector.epoch.clone();
        let _ = std::thread::spawn(move || {
            let _guard = epoch.lock().unwrap();
            panic!("holder panicked");
        })
        .join();
        assert!(injector.epoch.is_poisoned());

        let typing = {
            let injector = injector.clone();
            tokio::spawn(async move { injector.type_text("hello").await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        injector.cancel_all();

        assert!(matches!(
            typing.await.unwrap(),
            Err(InjectError::Cancelled { typed: 0 })
        ));
        assert_eq!(transport.reports().last(), Some(&Report::EMPTY));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing() {
        let (injector, _keyboard, _transport) = injector();
        let start = tokio::time::Instant::now();
        injector.type_text("abc").await.unwrap();
        // Three holds and two gaps
        assert_eq!(start.elapsed(), Duration::from_millis(70));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latched_shift_survives_injection() {
        let (injector, keyboard, transport) = injector();
        keyboard.lock().await.toggle_modifier(Modifier::LeftShift);
        transport.take();

        injector.type_text("A").await.unwrap();
        assert_eq!(
            transport.take(),
            vec![Report::new(0x02, &[0x04]), Report::new(0x02, &[])]
        );
        assert!(keyboard.lock().await.modifiers().is_latched(Modifier::LeftShift));
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_keys_stay_down_during_injection() {
        let (injector, keyboard, transport) = injector();
        keyboard.lock().await.press(hid::KEY_Z);
        transport.take();

        injector.type_text("a").await.unwrap();
        assert_eq!(
            transport.take(),
            vec![
                Report::new(0, &[hid::KEY_Z, hid::KEY_A]),
                Report::new(0, &[hid::KEY_Z]),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_hold_releases_key() {
        let (injector, keyboard, transport) = injector();
        let task = {
            let injector = injector.clone();
            tokio::spawn(async move { injector.type_text("hello").await })
        };

        tokio::time::sleep(Duration::from_millis(5)).await;
        injector.cancel_all();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(InjectError::Cancelled { typed: 0 })));
        assert_eq!(transport.take().last(), Some(&Report::EMPTY));
        assert!(keyboard.lock().await.pressed().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_text_stops_typing() {
        let (injector, _keyboard, transport) = injector();
        let task = {
            let injector = injector.clone();
            tokio::spawn(async move { injector.type_text("hello").await })
        };

        // First key done, inside the gap before the second
        tokio::time::sleep(Duration::from_millis(15)).await;
        injector.cancel_all();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(InjectError::Cancelled { typed: 1 })));
        assert_eq!(transport.take().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_injections_after_cancel_still_run() {
        let (injector, _keyboard, _transport) = injector();
        injector.cancel_all();
        let summary = injector.type_text("ok").await.unwrap();
        assert_eq!(summary.typed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tap_combo() {
        let (injector, _keyboard, transport) = injector();
        injector.tap_key("Ctrl+Alt+Delete").await.unwrap();
        assert_eq!(
            transport.take(),
            vec![Report::new(0x05, &[hid::KEY_DELETE]), Report::EMPTY]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_tap_lone_modifier() {
        let (injector, _keyboard, transport) = injector();
        injector.tap_key("Super").await.unwrap();
        assert_eq!(
            transport.take(),
            vec![Report::new(hid::MOD_LEFT_META, &[]), Report::EMPTY]
        );
    }

    #[tokio::test]
    async fn test_tap_bad_combo() {
        let (injector, _keyboard, transport) = injector();
        let err = injector.tap_key("Ctrl+Nope").await.unwrap_err();
        assert!(matches!(err, InjectError::Combo(_)));
        assert!(transport.take().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_injections_are_serialized() {
        let (injector, _keyboard, transport) = injector();
        let first = {
            let injector = injector.clone();
            tokio::spawn(async move { injector.type_text("ab").await })
        };
        tokio::task::yield_now().await;
        let second = {
            let injector = injector.clone();
            tokio::spawn(async move { injector.type_text("c").await })
        };
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        let pressed: Vec<u8> = transport
            .take()
            .iter()
            .filter(|r| !r.is_empty())
            .map(|r| r.keys()[0])
            .collect();
        assert_eq!(pressed, vec![hid::KEY_A, hid::KEY_A + 1, hid::KEY_A + 2]);
    }
}
