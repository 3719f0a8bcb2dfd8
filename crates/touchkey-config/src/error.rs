use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum ConfigError {
    #[error("Failed to parse KDL")]
    #[diagnostic(code(touchkey::config::parse_error))]
    ParseError {
        #[source_code]
        src: String,
        #[label("here")]
        span: miette::SourceSpan,
        #[source]
        source: kdl::KdlError,
    },

    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(touchkey::config::invalid))]
    Invalid { message: String },

    #[error("Invalid value for `{node}`")]
    #[diagnostic(code(touchkey::config::invalid_value))]
    InvalidValue {
        node: String,
        #[help]
        expected: String,
        #[source_code]
        src: String,
        #[label("this value")]
        span: miette::SourceSpan,
    },

    #[error("Missing required field: {field}")]
    #[diagnostic(code(touchkey::config::missing_field))]
    MissingField { field: String },

    #[error("IO error: {0}")]
    #[diagnostic(code(touchkey::config::io))]
    Io(#[from] std::io::Error),
}
