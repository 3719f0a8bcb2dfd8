//! Control protocol between `touchkey` and `touchkeyd`
//!
//! One JSON object per line in each direction, discriminated by a `type`
//! field:
//!
//! ```text
//! {"type":"type_text","text":"hello"}
//! {"type":"key","combo":"Ctrl+Alt+Delete"}
//! {"type":"release_all"}
//! {"type":"cancel"}
//! {"type":"status"}
//! ```
//!
//! The socket lives at `$XDG_RUNTIME_DIR/touchkey.sock`, or
//! `/tmp/touchkey-$UID.sock` when the runtime dir is not set.

use std::path::PathBuf;

use nix::libc;
use serde::{Deserialize, Serialize};

use crate::modifier::Modifier;
use crate::report::Report;
use crate::transport::ConnectionState;

const SOCKET_NAME: &str = "touchkey.sock";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest {
    /// Type a string through the injector
    TypeText { text: String },
    /// Tap a key combo such as `Ctrl+Shift+T`
    Key { combo: String },
    /// Drop every pointer, key and modifier
    ReleaseAll,
    /// Stop any running injection
    Cancel,
    Status,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    Success {
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Status(DaemonStatus),
    Error { message: String },
}

impl IpcResponse {
    pub fn ok() -> Self {
        IpcResponse::Success { message: None }
    }

    pub fn ok_with(message: impl Into<String>) -> Self {
        IpcResponse::Success {
            message: Some(message.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        IpcResponse::Error {
            message: message.into(),
        }
    }
}

/// Snapshot of the daemon's keyboard state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DaemonStatus {
    pub connection: ConnectionState,
    pub report: Report,
    pub latched_modifiers: Vec<Modifier>,
    /// Usage IDs in the key array, earliest first
    pub pressed: Vec<u8>,
    pub active_pointers: usize,
    pub reports_sent: u64,
    pub transmit_failures: u64,
}

/// Where the daemon listens and the CLI connects.
pub fn socket_path() -> PathBuf {
    match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(runtime_dir) => PathBuf::from(runtime_dir).join(SOCKET_NAME),
        None => {
            let uid = unsafe { libc::getuid() };
            PathBuf::from(format!("/tmp/touchkey-{}.sock", uid))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let request = IpcRequest::TypeText {
            text: "hi".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"type":"type_text","text":"hi"}"#
        );
        assert_eq!(
            serde_json::to_string(&IpcRequest::ReleaseAll).unwrap(),
            r#"{"type":"release_all"}"#
        );
    }

    #[test]
    fn test_request_parsing() {
        let request: IpcRequest =
            serde_json::from_str(r#"{"type": "key", "combo": "Ctrl+C"}"#).unwrap();
        assert_eq!(
            request,
            IpcRequest::Key {
                combo: "Ctrl+C".to_string()
            }
        );
        let request: IpcRequest = serde_json::from_str(r#"{"type":"cancel"}"#).unwrap();
        assert_eq!(request, IpcRequest::Cancel);

        assert!(serde_json::from_str::<IpcRequest>(r#"{"type":"reboot"}"#).is_err());
    }

    #[test]
    fn test_success_omits_empty_message() {
        assert_eq!(
            serde_json::to_string(&IpcResponse::ok()).unwrap(),
            r#"{"type":"success"}"#
        );
        assert_eq!(
            serde_json::to_string(&IpcResponse::ok_with("typed 3")).unwrap(),
            r#"{"type":"success","message":"typed 3"}"#
        );
    }

    #[test]
    fn test_status_response_fields() {
        let response = IpcResponse::Status(DaemonStatus {
            connection: ConnectionState::Connected,
            report: Report::new(0x02, &[0x04]),
            latched_modifiers: vec![Modifier::LeftShift],
            pressed: vec![0x04],
            active_pointers: 1,
            reports_sent: 10,
            transmit_failures: 0,
        });
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.starts_with(r#"{"type":"status","connection":"connected""#));
        assert!(json.contains(r#""report":[2,0,4,0,0,0,0,0]"#));
        assert!(json.contains(r#""latched_modifiers":["left_shift"]"#));

        let parsed: IpcResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, response);
    }

    #[test]
    fn test_socket_path_uses_runtime_dir() {
        std::env::set_var("XDG_RUNTIME_DIR", "/run/user/1000");
        assert_eq!(socket_path(), PathBuf::from("/run/user/1000/touchkey.sock"));
    }
}
