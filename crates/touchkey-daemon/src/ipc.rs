//! IPC server for daemon communication
//!
//! A Unix domain socket that accepts one JSON request per line and answers
//! with one JSON response per line. The message types live in
//! `touchkey_core::control` so the CLI can share them.
//!
//! # Protocol
//!
//! Each connection carries exactly one exchange:
//!
//! ```text
//! -> {"type":"type_text","text":"hello"}
//! <- {"type":"success","message":"Typed 5 character(s)"}
//! ```

use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use touchkey_core::control::{self, IpcRequest, IpcResponse};
use touchkey_core::SessionHandle;

// ============================================================================
// IPC Server
// ============================================================================

/// IPC server listening on a Unix domain socket
///
/// The socket file is removed when the server is dropped.
pub struct IpcServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl IpcServer {
    /// Bind at the default socket path.
    ///
    /// The path is `$XDG_RUNTIME_DIR/touchkey.sock`, or a per-user file in
    /// `/tmp` when the runtime directory is unset (see
    /// [`control::socket_path`]).
    ///
    /// # Errors
    ///
    /// Same as [`IpcServer::bind`].
    pub fn new() -> Result<Self> {
        if std::env::var_os("XDG_RUNTIME_DIR").is_none() {
            tracing::warn!("XDG_RUNTIME_DIR not set, using fallback socket path in /tmp");
        }
        Self::bind(control::socket_path())
    }

    /// Bind at `socket_path`.
    ///
    /// This will:
    /// 1. Remove a socket file left behind by a previous daemon
    /// 2. Create and bind the `UnixListener`
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The stale socket file cannot be removed
    /// - The socket cannot be bound (missing directory, permissions, or a
    ///   non-socket file that could not be cleared)
    pub fn bind(socket_path: impl Into<PathBuf>) -> Result<Self> {
        let socket_path = socket_path.into();

        // Nothing else can listen here while we hold the path
        if socket_path.exists() {
            tracing::debug!("Removing stale socket file: {}", socket_path.display());
            std::fs::remove_file(&socket_path).with_context(|| {
                format!(
                    "Failed to remove stale socket file: {}",
                    socket_path.display()
                )
            })?;
        }

        let listener = UnixListener::bind(&socket_path).with_context(|| {
            format!("Failed to create IPC socket at {}", socket_path.display())
        })?;

        tracing::info!("IPC server listening on {}", socket_path.display());

        Ok(Self {
            listener,
            socket_path,
        })
    }

    /// Wait for the next client to connect.
    ///
    /// # Errors
    ///
    /// Returns an error if accepting the connection fails. The listener
    /// stays usable, so callers may keep accepting.
    pub async fn accept(&self) -> Result<UnixStream> {
        let (stream, _addr) = self
            .listener
            .accept()
            .await
            .context("Failed to accept IPC connection")?;

        tracing::debug!("Accepted IPC connection");

        Ok(stream)
    }

    /// Path of the bound socket file
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        // A client connecting after shutdown should fail fast
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                tracing::warn!("Failed to remove IPC socket file on shutdown: {}", e);
            } else {
                tracing::debug!("Removed IPC socket file: {}", self.socket_path.display());
            }
        }
    }
}

// ============================================================================
// IPC Connection Handler
// ============================================================================

/// Handle one IPC connection.
///
/// This function:
/// 1. Reads one newline-terminated line from the client
/// 2. Parses it as an [`IpcRequest`]
/// 3. Passes the request to `handler`
/// 4. Writes the [`IpcResponse`] back as one JSON line
///
/// A line that does not parse is answered with an error response and the
/// handler is not called. A client that closes without sending anything
/// gets no response.
///
/// # Arguments
///
/// * `stream` - The accepted client connection
/// * `handler` - Produces the response for a parsed request, usually
///   [`SessionHandle::handle`]
///
/// # Errors
///
/// Returns an error if:
/// - Reading the request fails
/// - Serializing or writing the response fails
pub async fn handle_ipc_connection<F, Fut>(mut stream: UnixStream, handler: F) -> Result<()>
where
    F: FnOnce(IpcRequest) -> Fut,
    Fut: Future<Output = IpcResponse>,
{
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);

    let mut line = String::new();
    let bytes_read = reader
        .read_line(&mut line)
        .await
        .context("Failed to read IPC request")?;

    if bytes_read == 0 {
        tracing::debug!("IPC connection closed without data");
        return Ok(());
    }

    // Drops the newline too
    let line = line.trim();
    tracing::debug!("Received IPC request: {}", line);

    let response = match serde_json::from_str::<IpcRequest>(line) {
        Ok(request) => {
            tracing::debug!("Parsed IPC request: {:?}", request);
            handler(request).await
        }
        Err(e) => {
            tracing::warn!("Failed to parse IPC request: {}", e);
            IpcResponse::error(format!("Invalid request: {}", e))
        }
    };

    let response_json =
        serde_json::to_string(&response).context("Failed to serialize IPC response")?;

    tracing::debug!("Sending IPC response: {}", response_json);

    // One line per response, the client reads up to the newline
    writer
        .write_all(response_json.as_bytes())
        .await
        .context("Failed to write IPC response")?;
    writer
        .write_all(b"\n")
        .await
        .context("Failed to write newline")?;
    writer.flush().await.context("Failed to flush IPC response")?;

    Ok(())
}

// ============================================================================
// Connection Loop
// ============================================================================

/// Accept connections until `shutdown` fires, one task per connection.
///
/// Connections are handled concurrently, so a `cancel` can interrupt a
/// `type_text` that is still running on another connection. Accept errors
/// are logged and do not stop the loop. Dropping `server` on return
/// removes the socket file.
pub async fn serve(server: IpcServer, session: SessionHandle, shutdown: CancellationToken) {
    loop {
        let stream = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = server.accept() => match accepted {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!("{:#}", e);
                    continue;
                }
            },
        };

        let session = session.clone();
        tokio::spawn(async move {
            let result =
                handle_ipc_connection(stream, |request| async move { session.handle(request).await })
                    .await;
            if let Err(e) = result {
                tracing::warn!("IPC connection failed: {:#}", e);
            }
        });
    }

    tracing::debug!("IPC server stopped");
}
