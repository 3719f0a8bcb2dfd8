use thiserror::Error;

/// Failure to hand a report to the transport.
///
/// Always non-fatal: local state is kept and the next state change resends
/// the current truth.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("No host connected")]
    NotConnected,

    #[error("Report queue closed")]
    QueueClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ComboParseError {
    #[error("Empty key combo")]
    Empty,

    #[error("Unknown key: '{0}'")]
    UnknownKey(String),

    #[error("'{0}' is not a modifier")]
    NotAModifier(String),

    #[error("No main key in combo: '{0}'")]
    MissingKey(String),
}

#[derive(Error, Debug)]
pub enum InjectError {
    #[error("Injection cancelled after {typed} keystroke(s)")]
    Cancelled { typed: usize },

    #[error(transparent)]
    Combo(#[from] ComboParseError),
}
