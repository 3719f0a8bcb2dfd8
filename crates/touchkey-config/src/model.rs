//! Configuration data model

use std::path::PathBuf;
use std::time::Duration;

pub use touchkey_core::LongPressAction;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub global: GlobalConfig,
    pub transport: TransportConfig,
    pub touch: TouchConfig,
    pub timing: TimingConfig,
    pub long_press: LongPressAction,
}

/// Global settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalConfig {
    pub log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string for `tracing_subscriber::EnvFilter`
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!("Unknown log level: {}", s)),
        }
    }
}

/// Where reports go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportConfig {
    /// Linux USB HID gadget character device
    Hidg {
        device: PathBuf,
        /// Wait between reopen attempts after the device fails
        reconnect: Duration,
    },
    /// Log every report, no host
    Log,
}

impl TransportConfig {
    pub const DEFAULT_HIDG_DEVICE: &'static str = "/dev/hidg0";
    pub const DEFAULT_RECONNECT: Duration = Duration::from_millis(1000);

    pub fn kind(&self) -> &'static str {
        match self {
            TransportConfig::Hidg { .. } => "hidg",
            TransportConfig::Log => "log",
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Hidg {
            device: PathBuf::from(Self::DEFAULT_HIDG_DEVICE),
            reconnect: Self::DEFAULT_RECONNECT,
        }
    }
}

/// The touch surface and the keyboard drawn on it
#[derive(Debug, Clone, PartialEq)]
pub struct TouchConfig {
    /// evdev device name; `None` picks the first touchscreen found
    pub device: Option<String>,
    pub width: f32,
    pub height: f32,
    /// Gap between keys and around the edges
    pub margin: f32,
}

impl Default for TouchConfig {
    fn default() -> Self {
        Self {
            device: None,
            width: 1280.0,
            height: 480.0,
            margin: 4.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingConfig {
    pub long_press: Duration,
    pub key_hold: Duration,
    pub char_gap: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            long_press: Duration::from_millis(400),
            key_hold: Duration::from_millis(10),
            char_gap: Duration::from_millis(20),
        }
    }
}
