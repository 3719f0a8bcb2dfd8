//! Touch pointer tracking
//!
//! Each active pointer is bound to at most one key. The tracker turns raw
//! pointer events into logical [`KeyEvent`]s:
//!
//! - down on a key presses it (or toggles it, for modifiers)
//! - sliding onto another key releases the old one and presses the new one
//! - sliding off every key releases and forgets the pointer
//! - holding a key past the long-press delay fires a single [`KeyEvent::LongPress`]
//!
//! Long-press timers are tokio tasks that post a [`LongPressFired`] back to
//! whoever drives the tracker. Every binding gets a fresh serial, so a timer
//! that fires after its pointer was released or rebound is ignored.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::geometry::KeyResolver;
use crate::layout::Key;
use crate::modifier::Modifier;

/// Platform pointer (contact) identifier.
pub type PointerId = u32;

/// Linux absolute axis codes a slotted (protocol B) multitouch device must
/// report: `ABS_MT_SLOT`, `ABS_MT_POSITION_X`, `ABS_MT_POSITION_Y` and
/// `ABS_MT_TRACKING_ID`.
pub const MULTITOUCH_AXES: [u16; 4] = [0x2f, 0x35, 0x36, 0x39];

/// Whether a device supporting the axes `has` accepts can feed the tracker.
pub fn is_multitouch(has: impl Fn(u16) -> bool) -> bool {
    MULTITOUCH_AXES.iter().all(|code| has(*code))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerPhase {
    Down,
    Move,
    Up,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub id: PointerId,
    pub x: f32,
    pub y: f32,
    pub phase: PointerPhase,
}

impl PointerEvent {
    pub fn down(id: PointerId, x: f32, y: f32) -> Self {
        Self { id, x, y, phase: PointerPhase::Down }
    }

    pub fn moved(id: PointerId, x: f32, y: f32) -> Self {
        Self { id, x, y, phase: PointerPhase::Move }
    }

    pub fn up(id: PointerId, x: f32, y: f32) -> Self {
        Self { id, x, y, phase: PointerPhase::Up }
    }

    pub fn cancel(id: PointerId) -> Self {
        Self { id, x: 0.0, y: 0.0, phase: PointerPhase::Cancel }
    }
}

/// Logical keyboard event derived from pointer activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyEvent {
    Pressed(Key),
    Released(Key),
    ModifierToggled(Modifier),
    LongPress(Key),
    /// Every pointer is gone at once (touch cancel); drop all keys and modifiers
    ReleaseAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerState {
    Pressed,
    LongPressFired,
}

/// Posted by a long-press timer when it expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LongPressFired {
    pub pointer: PointerId,
    pub serial: u64,
}

#[derive(Debug)]
struct Binding {
    key: Key,
    state: PointerState,
    serial: u64,
    since: Instant,
    timer: Option<JoinHandle<()>>,
}

impl Binding {
    fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Maps active pointers to the keys beneath them.
///
/// Must be driven from inside a tokio runtime, since pressing a key spawns
/// its long-press timer.
pub struct PointerTracker<R> {
    resolver: R,
    bindings: HashMap<PointerId, Binding>,
    long_press_delay: Duration,
    timer_tx: mpsc::UnboundedSender<LongPressFired>,
    next_serial: u64,
}

impl<R: KeyResolver> PointerTracker<R> {
    /// Create a tracker. Timer expiries arrive on the returned receiver and
    /// must be fed back through [`on_long_press`](Self::on_long_press).
    pub fn new(
        resolver: R,
        long_press_delay: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<LongPressFired>) {
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let tracker = Self {
            resolver,
            bindings: HashMap::new(),
            long_press_delay,
            timer_tx,
            next_serial: 0,
        };
        (tracker, timer_rx)
    }

    pub fn handle(&mut self, event: PointerEvent) -> Vec<KeyEvent> {
        let mut events = Vec::new();
        match event.phase {
            PointerPhase::Down => {
                if self.bindings.contains_key(&event.id) {
                    tracing::debug!("Pointer {} went down twice, dropping old binding", event.id);
                    self.unbind(event.id, &mut events);
                }
                if let Some(key) = self.resolver.key_at(event.x, event.y) {
                    self.bind(event.id, key, &mut events);
                }
            }
            PointerPhase::Move => {
                let Some(bound) = self.bindings.get(&event.id) else {
                    return events;
                };
                let hit = self.resolver.key_at(event.x, event.y);
                if hit.as_ref() == Some(&bound.key) {
                    return events;
                }
                self.unbind(event.id, &mut events);
                match hit {
                    Some(key) => self.bind(event.id, key, &mut events),
                    None => tracing::trace!("Pointer {} slid off the keys", event.id),
                }
            }
            PointerPhase::Up | PointerPhase::Cancel => self.unbind(event.id, &mut events),
        }
        events
    }

    /// Handle an expired timer. Stale expiries yield nothing.
    pub fn on_long_press(&mut self, fired: LongPressFired) -> Option<KeyEvent> {
        let binding = self.bindings.get_mut(&fired.pointer)?;
        if binding.serial != fired.serial || binding.state != PointerState::Pressed {
            tracing::trace!("Ignoring stale long-press for pointer {}", fired.pointer);
            return None;
        }
        binding.state = PointerState::LongPressFired;
        binding.timer = None;
        tracing::debug!("Long-press on {}", binding.key.label);
        Some(KeyEvent::LongPress(binding.key.clone()))
    }

    /// Forget every pointer. Key state is cleared wholesale by the
    /// [`KeyEvent::ReleaseAll`] this returns.
    pub fn cancel_all(&mut self) -> Vec<KeyEvent> {
        for (_, mut binding) in self.bindings.drain() {
            binding.disarm();
        }
        vec![KeyEvent::ReleaseAll]
    }

    /// Forget every pointer without producing events.
    pub fn reset(&mut self) {
        for (_, mut binding) in self.bindings.drain() {
            binding.disarm();
        }
    }

    pub fn active_pointers(&self) -> usize {
        self.bindings.len()
    }

    pub fn state_of(&self, id: PointerId) -> Option<PointerState> {
        self.bindings.get(&id).map(|b| b.state)
    }

    pub fn key_of(&self, id: PointerId) -> Option<&Key> {
        self.bindings.get(&id).map(|b| &b.key)
    }

    fn bind(&mut self, id: PointerId, key: Key, events: &mut Vec<KeyEvent>) {
        self.next_serial += 1;
        let serial = self.next_serial;

        let timer = match key.modifier {
            Some(modifier) => {
                events.push(KeyEvent::ModifierToggled(modifier));
                None
            }
            None => {
                events.push(KeyEvent::Pressed(key.clone()));
                Some(self.arm(id, serial))
            }
        };

        self.bindings.insert(
            id,
            Binding {
                key,
                state: PointerState::Pressed,
                serial,
                since: Instant::now(),
                timer,
            },
        );
    }

    fn unbind(&mut self, id: PointerId, events: &mut Vec<KeyEvent>) {
        let Some(mut binding) = self.bindings.remove(&id) else {
            return;
        };
        binding.disarm();
        tracing::trace!(
            "Pointer {} left {} after {:?}",
            id,
            binding.key.label,
            binding.since.elapsed()
        );
        if !binding.key.is_modifier() {
            events.push(KeyEvent::Released(binding.key));
        }
    }

    fn arm(&self, pointer: PointerId, serial: u64) -> JoinHandle<()> {
        let tx = self.timer_tx.clone();
        let delay = self.long_press_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(LongPressFired { pointer, serial });
        })
    }
}

impl<R> Drop for PointerTracker<R> {
    fn drop(&mut self) {
        for binding in self.bindings.values_mut() {
            binding.disarm();
        }
    }
}
