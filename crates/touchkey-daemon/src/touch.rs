//! Multitouch input from evdev
//!
//! Decodes the kernel's slotted multitouch protocol (type B) into pointer
//! events on the keyboard surface. Each contact's tracking ID becomes its
//! pointer ID. Slot updates are collected until `SYN_REPORT`, then every
//! slot that changed yields one down, move or up.

use anyhow::{Context, Result};
use evdev::{AbsoluteAxisType, Device, InputEvent, InputEventKind, Synchronization};
use touchkey_core::{PointerEvent, PointerId, SessionHandle, TouchInput};

use crate::device::TouchDeviceInfo;

/// Raw value range of one absolute axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisRange {
    pub min: i32,
    pub max: i32,
}

impl AxisRange {
    pub fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    /// Map `value` onto `0..extent`.
    pub fn scale(&self, value: i32, extent: f32) -> f32 {
        let span = self.max - self.min;
        if span <= 0 {
            return 0.0;
        }
        let clamped = value.clamp(self.min, self.max);
        (clamped - self.min) as f32 / span as f32 * extent
    }
}

/// The subset of evdev events the decoder cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MtEvent {
    Slot(i32),
    TrackingId(i32),
    X(i32),
    Y(i32),
    Report,
    Dropped,
}

impl MtEvent {
    pub fn from_input(event: &InputEvent) -> Option<Self> {
        match event.kind() {
            InputEventKind::AbsAxis(axis) => match axis {
                AbsoluteAxisType::ABS_MT_SLOT => Some(MtEvent::Slot(event.value())),
                AbsoluteAxisType::ABS_MT_TRACKING_ID => Some(MtEvent::TrackingId(event.value())),
                AbsoluteAxisType::ABS_MT_POSITION_X => Some(MtEvent::X(event.value())),
                AbsoluteAxisType::ABS_MT_POSITION_Y => Some(MtEvent::Y(event.value())),
                _ => None,
            },
            InputEventKind::Synchronization(Synchronization::SYN_REPORT) => Some(MtEvent::Report),
            InputEventKind::Synchronization(Synchronization::SYN_DROPPED) => Some(MtEvent::Dropped),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    /// Contact last reported to the session
    reported: Option<PointerId>,
    /// Contact as of the events seen since the last report
    current: Option<PointerId>,
    x: i32,
    y: i32,
    moved: bool,
}

pub struct MtDecoder {
    slots: Vec<Slot>,
    active_slot: Option<usize>,
    x: AxisRange,
    y: AxisRange,
    width: f32,
    height: f32,
    /// Discarding until the next `SYN_REPORT` after a `SYN_DROPPED`
    resyncing: bool,
}

impl MtDecoder {
    pub fn new(slots: usize, x: AxisRange, y: AxisRange, width: f32, height: f32) -> Self {
        Self {
            slots: vec![Slot::default(); slots.max(1)],
            active_slot: Some(0),
            x,
            y,
            width,
            height,
            resyncing: false,
        }
    }

    pub fn for_device(info: &TouchDeviceInfo, width: f32, height: f32) -> Self {
        Self::new(info.slots, info.x, info.y, width, height)
    }

    pub fn feed(&mut self, event: MtEvent) -> Vec<TouchInput> {
        if self.resyncing {
            if event == MtEvent::Report {
                self.resyncing = false;
            }
            return Vec::new();
        }

        match event {
            MtEvent::Slot(slot) => {
                self.active_slot = usize::try_from(slot).ok().filter(|s| *s < self.slots.len());
                if self.active_slot.is_none() {
                    tracing::debug!("Ignoring out-of-range slot {}", slot);
                }
            }
            MtEvent::TrackingId(id) => {
                if let Some(slot) = self.slot_mut() {
                    slot.current = u32::try_from(id).ok();
                }
            }
            MtEvent::X(x) => {
                if let Some(slot) = self.slot_mut() {
                    slot.x = x;
                    slot.moved = true;
                }
            }
            MtEvent::Y(y) => {
                if let Some(slot) = self.slot_mut() {
                    slot.y = y;
                    slot.moved = true;
                }
            }
            MtEvent::Report => return self.flush(),
            MtEvent::Dropped => {
                tracing::warn!("Touch events dropped, releasing all contacts");
                for slot in &mut self.slots {
                    *slot = Slot::default();
                }
                self.resyncing = true;
                return vec![TouchInput::CancelAll];
            }
        }
        Vec::new()
    }

    fn slot_mut(&mut self) -> Option<&mut Slot> {
        self.active_slot.and_then(|i| self.slots.get_mut(i))
    }

    fn flush(&mut self) -> Vec<TouchInput> {
        let mut out = Vec::new();
        for slot in &mut self.slots {
            let x = self.x.scale(slot.x, self.width);
            let y = self.y.scale(slot.y, self.height);
            match (slot.reported, slot.current) {
                (Some(old), Some(new)) if old == new => {
                    if slot.moved {
                        out.push(TouchInput::Pointer(PointerEvent::moved(new, x, y)));
                    }
                }
                (Some(old), Some(new)) => {
                    out.push(TouchInput::Pointer(PointerEvent::up(old, x, y)));
                    out.push(TouchInput::Pointer(PointerEvent::down(new, x, y)));
                }
                (Some(old), None) => out.push(TouchInput::Pointer(PointerEvent::up(old, x, y))),
                (None, Some(new)) => out.push(TouchInput::Pointer(PointerEvent::down(new, x, y))),
                (None, None) => {}
            }
            slot.reported = slot.current;
            slot.moved = false;
        }
        out
    }
}

/// Read `device` until it fails or the session goes away.
pub async fn run_touch_source(
    device: Device,
    info: TouchDeviceInfo,
    mut decoder: MtDecoder,
    session: SessionHandle,
) -> Result<()> {
    let mut stream = device.into_event_stream().with_context(|| {
        format!(
            "Failed to create event stream for device '{}' at {}",
            info.name,
            info.path.display()
        )
    })?;

    tracing::info!(
        "Reading touches from '{}' [{}] at {}, {} slot(s)",
        info.name,
        info.vendor_product(),
        info.path.display(),
        info.slots
    );

    loop {
        let event = match stream.next_event().await {
            Ok(event) => event,
            Err(e) => {
                session.send(TouchInput::CancelAll).await;
                return Err(e).with_context(|| format!("Lost touch device '{}'", info.name));
            }
        };
        let Some(event) = MtEvent::from_input(&event) else {
            continue;
        };
        for input in decoder.feed(event) {
            if !session.send(input).await {
                tracing::debug!("Session closed, stopping touch reader");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use touchkey_core::PointerPhase;

    fn decoder() -> MtDecoder {
        // 0..=1000 on both axes onto a 100x50 surface
        MtDecoder::new(
            4,
            AxisRange::new(0, 1000),
            AxisRange::new(0, 1000),
            100.0,
            50.0,
        )
    }

    fn feed_all(decoder: &mut MtDecoder, events: &[MtEvent]) -> Vec<TouchInput> {
        events.iter().flat_map(|e| decoder.feed(*e)).collect()
    }

    fn pointer(input: &TouchInput) -> PointerEvent {
        match input {
            TouchInput::Pointer(event) => *event,
            TouchInput::CancelAll => panic!("expected a pointer event"),
        }
    }

    #[test]
    fn test_axis_scaling() {
        let range = AxisRange::new(100, 1100);
        assert_eq!(range.scale(100, 50.0), 0.0);
        assert_eq!(range.scale(600, 50.0), 25.0);
        assert_eq!(range.scale(5000, 50.0), 50.0);
        assert_eq!(AxisRange::new(5, 5).scale(5, 50.0), 0.0);
    }

    #[test]
    fn test_single_contact_lifecycle() {
        use MtEvent::*;
        let mut decoder = decoder();

        let out = feed_all(&mut decoder, &[TrackingId(7), X(500), Y(500), Report]);
        assert_eq!(out.len(), 1);
        let down = pointer(&out[0]);
        assert_eq!((down.id, down.phase), (7, PointerPhase::Down));
        assert_eq!((down.x, down.y), (50.0, 25.0));

        let out = feed_all(&mut decoder, &[X(600), Report]);
        let moved = pointer(&out[0]);
        assert_eq!((moved.phase, moved.x, moved.y), (PointerPhase::Move, 60.0, 25.0));

        let out = feed_all(&mut decoder, &[TrackingId(-1), Report]);
        let up = pointer(&out[0]);
        assert_eq!((up.id, up.phase), (7, PointerPhase::Up));
    }

    #[test]
    fn test_report_without_changes_is_silent() {
        use MtEvent::*;
        let mut decoder = decoder();
        feed_all(&mut decoder, &[TrackingId(1), X(10), Y(10), Report]);
        assert!(feed_all(&mut decoder, &[Report]).is_empty());
    }

    #[test]
    fn test_two_slots() {
        use MtEvent::*;
        let mut decoder = decoder();
        let out = feed_all(
            &mut decoder,
            &[
                Slot(0),
                TrackingId(10),
                X(100),
                Y(100),
                Slot(1),
                TrackingId(11),
                X(900),
                Y(900),
                Report,
            ],
        );
        let ids: Vec<u32> = out.iter().map(|i| pointer(i).id).collect();
        assert_eq!(ids, vec![10, 11]);

        // Only slot 1 lifts; slot 0 stays put
        let out = feed_all(&mut decoder, &[Slot(1), TrackingId(-1), Report]);
        assert_eq!(out.len(), 1);
        assert_eq!(pointer(&out[0]).phase, PointerPhase::Up);
        assert_eq!(pointer(&out[0]).id, 11);
    }

    #[test]
    fn test_contact_replaced_within_one_frame() {
        use MtEvent::*;
        let mut decoder = decoder();
        feed_all(&mut decoder, &[TrackingId(1), X(10), Y(10), Report]);
        let out = feed_all(&mut decoder, &[TrackingId(-1), TrackingId(2), X(20), Report]);
        let phases: Vec<(u32, PointerPhase)> =
            out.iter().map(|i| (pointer(i).id, pointer(i).phase)).collect();
        assert_eq!(phases, vec![(1, PointerPhase::Up), (2, PointerPhase::Down)]);
    }

    #[test]
    fn test_dropped_cancels_and_resyncs() {
        use MtEvent::*;
        let mut decoder = decoder();
        feed_all(&mut decoder, &[TrackingId(1), X(10), Y(10), Report]);

        let out = feed_all(&mut decoder, &[X(20), Dropped]);
        assert_eq!(out, vec![TouchInput::CancelAll]);

        // Everything up to the next report is discarded
        assert!(feed_all(&mut decoder, &[TrackingId(3), X(30), Report]).is_empty());

        let out = feed_all(&mut decoder, &[TrackingId(4), X(40), Y(40), Report]);
        assert_eq!(pointer(&out[0]).id, 4);
        assert_eq!(pointer(&out[0]).phase, PointerPhase::Down);
    }

    #[test]
    fn test_out_of_range_slot_is_ignored() {
        use MtEvent::*;
        let mut decoder = decoder();
        let out = feed_all(&mut decoder, &[Slot(9), TrackingId(5), X(10), Report]);
        assert!(out.is_empty());

        let out = feed_all(&mut decoder, &[Slot(2), TrackingId(6), X(10), Y(10), Report]);
        assert_eq!(pointer(&out[0]).id, 6);
    }
}
