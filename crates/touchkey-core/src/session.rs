//! The touch session loop
//!
//! A [`Session`] owns the pointer tracker and is the only task that touches
//! it. It multiplexes touch input, long-press expiries and connection
//! changes, and applies the resulting key events to the shared keyboard.
//! Everything else (the touch reader, IPC handlers) talks to it through a
//! cloneable [`SessionHandle`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::control::{DaemonStatus, IpcRequest, IpcResponse};
use crate::geometry::KeyResolver;
use crate::injector::TextInjector;
use crate::keyboard::SharedKeyboard;
use crate::modifier::Modifier;
use crate::pointer::{KeyEvent, LongPressFired, PointerEvent, PointerTracker};
use crate::transport::{ConnectionState, ConnectionStatus};

const INPUT_QUEUE: usize = 256;

/// What the touch source feeds the session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TouchInput {
    Pointer(PointerEvent),
    /// The source lost track of every contact (dropped events, device gone)
    CancelAll,
}

pub struct Session<R> {
    tracker: PointerTracker<R>,
    timers: mpsc::UnboundedReceiver<LongPressFired>,
    input: mpsc::Receiver<TouchInput>,
    keyboard: SharedKeyboard,
    injector: TextInjector,
    connection: watch::Receiver<ConnectionStatus>,
    connected: bool,
    /// `ConnectionStatus::losses` as of the last reset
    losses: u64,
    active_pointers: Arc<AtomicUsize>,
    shutdown: CancellationToken,
}

#[derive(Clone)]
pub struct SessionHandle {
    input: mpsc::Sender<TouchInput>,
    keyboard: SharedKeyboard,
    injector: TextInjector,
    connection: watch::Receiver<ConnectionStatus>,
    active_pointers: Arc<AtomicUsize>,
    shutdown: CancellationToken,
}

impl<R: KeyResolver> Session<R> {
    pub fn new(
        resolver: R,
        long_press_delay: Duration,
        keyboard: SharedKeyboard,
        injector: TextInjector,
        connection: watch::Receiver<ConnectionStatus>,
    ) -> (Self, SessionHandle) {
        let (tracker, timers) = PointerTracker::new(resolver, long_press_delay);
        let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE);
        let active_pointers = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let handle = SessionHandle {
            input: input_tx,
            keyboard: keyboard.clone(),
            injector: injector.clone(),
            connection: connection.clone(),
            active_pointers: active_pointers.clone(),
            shutdown: shutdown.clone(),
        };

        let session = Self {
            tracker,
            timers,
            input: input_rx,
            keyboard,
            injector,
            connection,
            connected: false,
            losses: 0,
            active_pointers,
            shutdown,
        };

        (session, handle)
    }

    /// Run until [`SessionHandle::shutdown`] is called, every handle is
    /// dropped, or the transport goes away.
    pub async fn run(mut self) {
        let status = *self.connection.borrow_and_update();
        self.connected = status.state.is_connected();
        self.losses = status.losses;
        tracing::info!("Touch session started, host {}", status.state);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::debug!("Session shutdown requested");
                    break;
                }
                input = self.input.recv() => match input {
                    Some(TouchInput::Pointer(event)) => {
                        let events = self.tracker.handle(event);
                        self.apply(events).await;
                    }
                    Some(TouchInput::CancelAll) => {
                        let events = self.tracker.cancel_all();
                        self.apply(events).await;
                    }
                    None => {
                        tracing::debug!("All session handles dropped");
                        break;
                    }
                },
                Some(fired) = self.timers.recv() => {
                    if let Some(event) = self.tracker.on_long_press(fired) {
                        self.apply(vec![event]).await;
                    }
                }
                changed = self.connection.changed() => {
                    if changed.is_err() {
                        tracing::warn!("Transport dropped its connection state, stopping session");
                        break;
                    }
                    let status = *self.connection.borrow_and_update();
                    self.on_connection(status).await;
                }
            }
            self.active_pointers
                .store(self.tracker.active_pointers(), Ordering::Relaxed);
        }

        self.injector.cancel_all();
        self.tracker.reset();
        self.active_pointers.store(0, Ordering::Relaxed);
        let mut keyboard = self.keyboard.lock().await;
        if self.connected {
            keyboard.release_all();
        } else {
            keyboard.reset();
        }
        tracing::info!("Touch session stopped");
    }

    async fn apply(&mut self, events: Vec<KeyEvent>) {
        if events.is_empty() {
            return;
        }
        let mut keyboard = self.keyboard.lock().await;
        for event in &events {
            if self.connected {
                keyboard.apply(event);
            } else if *event == KeyEvent::ReleaseAll {
                keyboard.reset();
            } else {
                tracing::debug!("No host connected, dropping {:?}", event);
            }
        }
    }

    async fn on_connection(&mut self, status: ConnectionStatus) {
        let was_connected = self.connected;
        self.connected = status.state.is_connected();

        // Compare loss counts, not states: the host may already be back by
        // the time this runs
        if status.losses != self.losses {
            self.losses = status.losses;
            tracing::info!("Host lost ({}), resetting keyboard state", status.state);
            self.injector.cancel_all();
            self.tracker.reset();
            self.keyboard.lock().await.reset();
            if self.connected {
                tracing::info!("Host connected");
            }
        } else if self.connected && !was_connected {
            tracing::info!("Host connected");
        }
    }
}

impl SessionHandle {
    /// Queue input for the session. Returns `false` once the session is gone.
    pub async fn send(&self, input: TouchInput) -> bool {
        self.input.send(input).await.is_ok()
    }

    pub fn injector(&self) -> &TextInjector {
        &self.injector
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.borrow().state
    }

    /// Stop injections and drop every pointer, key and modifier.
    pub async fn release_all(&self) {
        self.injector.cancel_all();
        if !self.send(TouchInput::CancelAll).await {
            self.keyboard.lock().await.release_all();
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub async fn status(&self) -> DaemonStatus {
        let keyboard = self.keyboard.lock().await;
        let stats = keyboard.stats();
        DaemonStatus {
            connection: self.connection_state(),
            report: keyboard.last_report(),
            latched_modifiers: Modifier::from_mask(keyboard.modifiers().latched_mask()),
            pressed: keyboard.pressed(),
            active_pointers: self.active_pointers.load(Ordering::Relaxed),
            reports_sent: stats.reports_sent,
            transmit_failures: stats.transmit_failures,
        }
    }

    /// Serve one control request.
    pub async fn handle(&self, request: IpcRequest) -> IpcResponse {
        match request {
            IpcRequest::TypeText { text } => {
                if !self.connection_state().is_connected() {
                    return IpcResponse::error("No host connected");
                }
                match self.injector.type_text(&text).await {
                    Ok(summary) if summary.skipped > 0 => IpcResponse::ok_with(format!(
                        "Typed {} character(s), skipped {} without a key",
                        summary.typed, summary.skipped
                    )),
                    Ok(summary) => {
                        IpcResponse::ok_with(format!("Typed {} character(s)", summary.typed))
                    }
                    Err(e) => IpcResponse::error(e.to_string()),
                }
            }
            IpcRequest::Key { combo } => {
                if !self.connection_state().is_connected() {
                    return IpcResponse::error("No host connected");
                }
                match self.injector.tap_key(&combo).await {
                    Ok(combo) => IpcResponse::ok_with(format!("Tapped {}", combo)),
                    Err(e) => IpcResponse::error(e.to_string()),
                }
            }
            IpcRequest::ReleaseAll => {
                self.release_all().await;
                IpcResponse::ok()
            }
            IpcRequest::Cancel => {
                self.injector.cancel_all();
                IpcResponse::ok()
            }
            IpcRequest::Status => IpcResponse::Status(self.status().await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hid;
    use crate::injector::Pacing;
    use crate::keyboard::Keyboard;
    use crate::layout::Key;
    use crate::report::Report;
    use crate::transport::{ConnectionEvent, RecordingTransport, Transport};

    fn resolver(x: f32, _y: f32) -> Option<Key> {
        if (0.0..10.0).contains(&x) {
            Some(Key::new("a", hid::KEY_A, 0))
        } else if (40.0..50.0).contains(&x) {
            Some(Key::modifier("Shift", Modifier::LeftShift, 0))
        } else {
            None
        }
    }

    type Resolver = fn(f32, f32) -> Option<Key>;

    fn start() -> (SessionHandle, Arc<RecordingTransport>, tokio::task::JoinHandle<()>) {
        let transport = RecordingTransport::new();
        let keyboard = Keyboard::new(transport.clone()).into_shared();
        let injector = TextInjector::new(keyboard.clone(), Pacing::default());
        let (session, handle) = Session::new(
            resolver as Resolver,
            Duration::from_millis(400),
            keyboard,
            injector,
            transport.connection(),
        );
        let task = tokio::spawn(session.run());
        (handle, transport, task)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_reaches_transport() {
        let (handle, transport, _task) = start();
        handle.send(TouchInput::Pointer(PointerEvent::down(1, 5.0, 0.0))).await;
        handle.send(TouchInput::Pointer(PointerEvent::up(1, 5.0, 0.0))).await;
        settle().await;

        assert_eq!(
            transport.take(),
            vec![Report::new(0, &[hid::KEY_A]), Report::EMPTY]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_press_repeats_key() {
        let (handle, transport, _task) = start();
        handle.send(TouchInput::Pointer(PointerEvent::down(1, 5.0, 0.0))).await;
        tokio::time::sleep(Duration::from_millis(450)).await;

        assert_eq!(
            transport.take(),
            vec![
                Report::new(0, &[hid::KEY_A]),
                Report::EMPTY,
                Report::new(0, &[hid::KEY_A]),
            ]
        );
        assert_eq!(handle.status().await.active_pointers, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_resets_state() {
        let (handle, transport, _task) = start();
        handle.send(TouchInput::Pointer(PointerEvent::down(1, 45.0, 0.0))).await;
        handle.send(TouchInput::Pointer(PointerEvent::down(2, 5.0, 0.0))).await;
        settle().await;
        transport.take();

        transport.monitor().apply(ConnectionEvent::HostDisconnected);
        settle().await;

        let status = handle.status().await;
        assert_eq!(status.connection, ConnectionState::Disconnected);
        assert!(status.latched_modifiers.is_empty());
        assert!(status.pressed.is_empty());
        assert_eq!(status.active_pointers, 0);
        // Nobody to tell
        assert!(transport.take().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_before_session_runs_still_resets() {
        let (handle, transport, _task) = start();
        handle.send(TouchInput::Pointer(PointerEvent::down(1, 45.0, 0.0))).await;
        handle.send(TouchInput::Pointer(PointerEvent::up(1, 45.0, 0.0))).await;
        handle.send(TouchInput::Pointer(PointerEvent::down(2, 5.0, 0.0))).await;
        settle().await;
        assert_eq!(
            handle.status().await.latched_modifiers,
            vec![Modifier::LeftShift]
        );
        transport.take();

        // Lost and back again without the session getting a turn
        transport.monitor().apply(ConnectionEvent::HostDisconnected);
        transport.monitor().apply(ConnectionEvent::HostConnecting);
        transport.monitor().apply(ConnectionEvent::HostConnected);
        settle().await;

        let status = handle.status().await;
        assert_eq!(status.connection, ConnectionState::Connected);
        assert!(status.latched_modifiers.is_empty());
        assert!(status.pressed.is_empty());
        assert_eq!(status.active_pointers, 0);

        // Reports after the flap carry no leftovers
        handle.send(TouchInput::Pointer(PointerEvent::down(3, 5.0, 0.0))).await;
        settle().await;
        assert_eq!(transport.take(), vec![Report::new(0, &[hid::KEY_A])]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_touches_while_disconnected_are_dropped() {
        let (handle, transport, _task) = start();
        transport.monitor().apply(ConnectionEvent::HostDisconnected);
        settle().await;

        handle.send(TouchInput::Pointer(PointerEvent::down(1, 45.0, 0.0))).await;
        settle().await;
        assert!(transport.take().is_empty());

        transport.monitor().apply(ConnectionEvent::HostConnected);
        settle().await;
        handle.send(TouchInput::Pointer(PointerEvent::down(2, 5.0, 0.0))).await;
        settle().await;
        assert_eq!(transport.take(), vec![Report::new(0, &[hid::KEY_A])]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_injection() {
        let (handle, transport, _task) = start();
        let typing = {
            let handle = handle.clone();
            tokio::spawn(async move {
                handle
                    .handle(IpcRequest::TypeText {
                        text: "hello".to_string(),
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(35)).await;
        transport.monitor().apply(ConnectionEvent::HostDisconnected);

        match typing.await.unwrap() {
            IpcResponse::Error { message } => assert!(message.contains("cancelled")),
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_all_request() {
        let (handle, transport, _task) = start();
        handle.send(TouchInput::Pointer(PointerEvent::down(1, 45.0, 0.0))).await;
        handle.send(TouchInput::Pointer(PointerEvent::down(2, 5.0, 0.0))).await;
        settle().await;

        assert_eq!(handle.handle(IpcRequest::ReleaseAll).await, IpcResponse::ok());
        settle().await;

        assert_eq!(transport.reports().last(), Some(&Report::EMPTY));
        let status = handle.status().await;
        assert_eq!(status.active_pointers, 0);
        assert!(status.latched_modifiers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_type_text_request() {
        let (handle, transport, _task) = start();
        let response = handle
            .handle(IpcRequest::TypeText {
                text: "Hi\u{2603}".to_string(),
            })
            .await;
        assert_eq!(
            response,
            IpcResponse::ok_with("Typed 2 character(s), skipped 1 without a key")
        );
        assert_eq!(transport.take().len(), 4);

        let status = handle.status().await;
        assert_eq!(status.reports_sent, 4);
        assert_eq!(status.report, Report::EMPTY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_request_errors() {
        let (handle, transport, _task) = start();
        let response = handle
            .handle(IpcRequest::Key {
                combo: "Ctrl+Bogus".to_string(),
            })
            .await;
        assert!(matches!(response, IpcResponse::Error { .. }));

        transport.monitor().apply(ConnectionEvent::HostDisconnected);
        let response = handle
            .handle(IpcRequest::Key {
                combo: "Ctrl+C".to_string(),
            })
            .await;
        assert_eq!(response, IpcResponse::error("No host connected"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_releases_keys() {
        let (handle, transport, task) = start();
        handle.send(TouchInput::Pointer(PointerEvent::down(1, 5.0, 0.0))).await;
        settle().await;

        handle.shutdown();
        task.await.unwrap();
        assert_eq!(transport.reports().last(), Some(&Report::EMPTY));
    }
}
