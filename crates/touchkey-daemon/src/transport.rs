//! Report transports
//!
//! `hidg` writes reports to a Linux USB HID gadget device. `log` only logs
//! them and is always connected, which makes it a dry run.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use touchkey_core::{
    ConnectionEvent, ConnectionMonitor, ConnectionState, ConnectionStatus, Report, Transport,
    TransportError,
};

/// Writes reports to a HID gadget character device such as `/dev/hidg0`.
///
/// `transmit` only queues. A writer task owns the file: it counts as
/// connected while the device is open, and after a failed write it closes
/// the device and keeps reopening it every `reconnect`.
pub struct HidgTransport {
    queue: mpsc::UnboundedSender<Report>,
    monitor: Arc<ConnectionMonitor>,
}

impl HidgTransport {
    /// Start the writer task. It runs until `shutdown` fires, then writes
    /// whatever is still queued and exits.
    pub fn spawn(
        path: PathBuf,
        reconnect: Duration,
        shutdown: CancellationToken,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (queue, rx) = mpsc::unbounded_channel();
        let monitor = Arc::new(ConnectionMonitor::new(ConnectionState::Disconnected));

        let writer = HidgWriter {
            path,
            reconnect,
            rx,
            monitor: monitor.clone(),
            shutdown,
        };
        let task = tokio::spawn(writer.run());

        (Arc::new(Self { queue, monitor }), task)
    }
}

impl Transport for HidgTransport {
    fn transmit(&self, report: Report) -> Result<(), TransportError> {
        if !self.monitor.state().is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.queue
            .send(report)
            .map_err(|_| TransportError::QueueClosed)
    }

    fn connection(&self) -> watch::Receiver<ConnectionStatus> {
        self.monitor.subscribe()
    }
}

struct HidgWriter {
    path: PathBuf,
    reconnect: Duration,
    rx: mpsc::UnboundedReceiver<Report>,
    monitor: Arc<ConnectionMonitor>,
    shutdown: CancellationToken,
}

impl HidgWriter {
    async fn run(mut self) {
        loop {
            let Some(mut file) = self.open().await else {
                break;
            };

            // Reports queued before the host went away describe stale state
            while self.rx.try_recv().is_ok() {}
            self.monitor.apply(ConnectionEvent::HostConnected);

            if self.write_until_failure(&mut file).await {
                break;
            }

            self.monitor.apply(ConnectionEvent::HostDisconnected);
            if !self.wait(self.reconnect).await {
                break;
            }
        }

        self.monitor.apply(ConnectionEvent::HostDisconnected);
        tracing::debug!("HID gadget writer stopped");
    }

    /// Open the device, retrying until it works. `None` on shutdown.
    async fn open(&mut self) -> Option<File> {
        self.monitor.apply(ConnectionEvent::HostConnecting);
        let mut logged = false;

        loop {
            match OpenOptions::new().write(true).open(&self.path).await {
                Ok(file) => {
                    tracing::info!("Opened HID gadget {}", self.path.display());
                    return Some(file);
                }
                Err(e) => {
                    if !logged {
                        tracing::warn!(
                            "Cannot open HID gadget {}: {} (retrying every {:?})",
                            self.path.display(),
                            e,
                            self.reconnect
                        );
                        logged = true;
                    } else {
                        tracing::debug!("Cannot open HID gadget {}: {}", self.path.display(), e);
                    }
                }
            }

            if !self.wait(self.reconnect).await {
                return None;
            }
        }
    }

    /// Write queued reports. Returns `true` when the writer should stop,
    /// `false` after a write failure.
    async fn write_until_failure(&mut self, file: &mut File) -> bool {
        loop {
            let report = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    while let Ok(report) = self.rx.try_recv() {
                        if write_report(file, report).await.is_err() {
                            break;
                        }
                    }
                    return true;
                }
                report = self.rx.recv() => match report {
                    Some(report) => report,
                    None => return true,
                },
            };

            if let Err(e) = write_report(file, report).await {
                tracing::warn!("Write to {} failed: {}", self.path.display(), e);
                return false;
            }
            tracing::trace!("Sent report {}", report);
        }
    }

    /// Sleep unless shut down first. `false` on shutdown.
    async fn wait(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

async fn write_report(file: &mut File, report: Report) -> std::io::Result<()> {
    file.write_all(report.as_bytes()).await?;
    file.flush().await
}

/// Logs every report instead of sending it anywhere.
pub struct LogTransport {
    monitor: ConnectionMonitor,
}

impl LogTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            monitor: ConnectionMonitor::new(ConnectionState::Connected),
        })
    }
}

impl Transport for LogTransport {
    fn transmit(&self, report: Report) -> Result<(), TransportError> {
        tracing::info!("Report {}", report);
        Ok(())
    }

    fn connection(&self) -> watch::Receiver<ConnectionStatus> {
        self.monitor.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn wait_for_state(transport: &HidgTransport, wanted: ConnectionState) {
        let mut rx = transport.connection();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.state == wanted))
            .await
            .expect("timed out waiting for connection state")
            .unwrap();
    }

    async fn wait_for_len(path: &std::path::Path, len: usize) -> Vec<u8> {
        for _ in 0..500 {
            let bytes = std::fs::read(path).unwrap();
            if bytes.len() >= len {
                return bytes;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {} bytes", len);
    }

    #[tokio::test]
    async fn test_writes_reports_to_device() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hidg0");
        std::fs::write(&path, b"").unwrap();

        let shutdown = CancellationToken::new();
        let (transport, task) =
            HidgTransport::spawn(path.clone(), Duration::from_millis(10), shutdown.clone());
        wait_for_state(&transport, ConnectionState::Connected).await;

        transport.transmit(Report::new(0x02, &[0x04])).unwrap();
        transport.transmit(Report::EMPTY).unwrap();

        let bytes = wait_for_len(&path, 16).await;
        assert_eq!(&bytes[..8], &[0x02, 0, 0x04, 0, 0, 0, 0, 0]);
        assert_eq!(&bytes[8..], &[0u8; 8]);

        shutdown.cancel();
        task.await.unwrap();
        assert_eq!(transport.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_missing_device_keeps_connecting() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hidg0");

        let shutdown = CancellationToken::new();
        let (transport, task) =
            HidgTransport::spawn(path.clone(), Duration::from_millis(10), shutdown.clone());
        wait_for_state(&transport, ConnectionState::Connecting).await;

        assert!(matches!(
            transport.transmit(Report::EMPTY),
            Err(TransportError::NotConnected)
        ));

        // The device showing up later is picked up by the retry loop
        std::fs::write(&path, b"").unwrap();
        wait_for_state(&transport, ConnectionState::Connected).await;

        shutdown.cancel();
        task.await.unwrap();
    }

    #[test]
    fn test_log_transport_is_always_connected() {
        let transport = LogTransport::new();
        assert!(transport.connection_state().is_connected());
        assert!(transport.transmit(Report::EMPTY).is_ok());
    }
}
