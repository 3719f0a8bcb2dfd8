//! Transport boundary
//!
//! The core hands finished reports to a [`Transport`] and watches its
//! connection state. How the transport reaches the host (USB gadget,
//! Bluetooth HID profile, a log) is not the core's business.
//!
//! Connection state is an explicit state machine driven by
//! [`ConnectionEvent`]s. Transports own a [`ConnectionMonitor`] and feed it
//! events; the core only subscribes.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::TransportError;
use crate::report::Report;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Advertising,
    Connecting,
    Connected,
}

/// Something that happened at the transport level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    StartAdvertising,
    StopAdvertising,
    HostConnecting,
    HostConnected,
    HostDisconnected,
}

impl ConnectionState {
    /// The state after `event`. Events that make no sense in the current
    /// state leave it unchanged.
    pub fn on_event(self, event: ConnectionEvent) -> ConnectionState {
        use ConnectionEvent::*;
        use ConnectionState::*;

        match (self, event) {
            (Disconnected, StartAdvertising) => Advertising,
            (Advertising, StopAdvertising) => Disconnected,
            (Disconnected | Advertising, HostConnecting) => Connecting,
            (Disconnected | Advertising | Connecting, HostConnected) => Connected,
            (Advertising | Connecting | Connected, HostDisconnected) => Disconnected,
            (state, _) => state,
        }
    }

    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Advertising => "advertising",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// The watched value: the current state, plus how often the connection
/// has been lost.
///
/// A watcher only ever sees the latest value, so a quick
/// Connected -> Disconnected -> Connected flap looks like no change at all
/// from `state` alone. `losses` goes up on every transition out of
/// `Connected`, which makes the loss visible anyway.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub losses: u64,
}

/// Publishes a transport's connection state to any number of watchers.
#[derive(Debug)]
pub struct ConnectionMonitor {
    tx: watch::Sender<ConnectionStatus>,
}

impl ConnectionMonitor {
    pub fn new(initial: ConnectionState) -> Self {
        let (tx, _rx) = watch::channel(ConnectionStatus {
            state: initial,
            losses: 0,
        });
        Self { tx }
    }

    /// Run `event` through the state machine. Watchers are only woken when
    /// the state actually changes.
    pub fn apply(&self, event: ConnectionEvent) -> ConnectionState {
        let mut next = ConnectionState::Disconnected;
        self.tx.send_if_modified(|status| {
            let previous = status.state;
            next = previous.on_event(event);
            if next == previous {
                return false;
            }
            tracing::info!("Connection {} -> {} ({:?})", previous, next, event);
            if previous.is_connected() {
                status.losses += 1;
            }
            status.state = next;
            true
        });
        next
    }

    pub fn state(&self) -> ConnectionState {
        self.tx.borrow().state
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.tx.subscribe()
    }
}

/// Where finished reports go.
///
/// `transmit` must not block: transports that do slow IO queue the report
/// and return. A failure is never retried by the caller.
pub trait Transport: Send + Sync {
    fn transmit(&self, report: Report) -> Result<(), TransportError>;

    fn connection(&self) -> watch::Receiver<ConnectionStatus>;

    fn connection_state(&self) -> ConnectionState {
        self.connection().borrow().state
    }
}

/// Keeps every report it is given. Used for offline encoding and tests.
#[derive(Debug)]
pub struct RecordingTransport {
    reports: Mutex<Vec<Report>>,
    failing: Mutex<bool>,
    monitor: ConnectionMonitor,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            reports: Mutex::new(Vec::new()),
            failing: Mutex::new(false),
            monitor: ConnectionMonitor::new(ConnectionState::Connected),
        })
    }

    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Reports recorded since the last call.
    pub fn take(&self) -> Vec<Report> {
        self.reports
            .lock()
            .map(|mut r| std::mem::take(&mut *r))
            .unwrap_or_default()
    }

    /// Make every following `transmit` fail (reports are not recorded).
    pub fn set_failing(&self, failing: bool) {
        if let Ok(mut flag) = self.failing.lock() {
            *flag = failing;
        }
    }

    pub fn monitor(&self) -> &ConnectionMonitor {
        &self.monitor
    }
}

impl Transport for RecordingTransport {
    fn transmit(&self, report: Report) -> Result<(), TransportError> {
        if self.failing.lock().map(|f| *f).unwrap_or(false) {
            return Err(TransportError::NotConnected);
        }
        if let Ok(mut reports) = self.reports.lock() {
            reports.push(report);
        }
        Ok(())
    }

    fn connection(&self) -> watch::Receiver<ConnectionStatus> {
        self.monitor.subscribe()
    }
}
