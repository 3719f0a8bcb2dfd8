//! touchkey core
//!
//! Turns multi-touch activity on an on-screen keyboard into HID
//! boot-keyboard reports. Nothing in here knows where touches come from or
//! how reports reach the host; the daemon plugs those in through
//! [`KeyResolver`] and [`Transport`].

pub mod control;
pub mod error;
pub mod geometry;
pub mod hid;
pub mod injector;
pub mod keyboard;
pub mod keymap;
pub mod layout;
pub mod modifier;
pub mod pointer;
pub mod report;
pub mod session;
pub mod transport;

pub use error::{ComboParseError, InjectError, TransportError};
pub use geometry::{GridGeometry, KeyResolver, Rect};
pub use injector::{InjectionSummary, Pacing, TextInjector};
pub use keyboard::{Keyboard, KeyboardStats, LongPressAction, SharedKeyboard};
pub use keymap::{code_for_name, key_for, needs_shift, parse_combo, CharKey, KeyCombo};
pub use layout::{Key, KeyLayout};
pub use modifier::{Modifier, ModifierState};
pub use pointer::{
    is_multitouch, KeyEvent, LongPressFired, PointerEvent, PointerId, PointerPhase, PointerState,
    PointerTracker, MULTITOUCH_AXES,
};
pub use report::{Report, ReportEncoder};
pub use session::{Session, SessionHandle, TouchInput};
pub use transport::{
    ConnectionEvent, ConnectionMonitor, ConnectionState, ConnectionStatus, RecordingTransport,
    Transport,
};
