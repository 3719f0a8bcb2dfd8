//! KDL configuration parser

use std::path::{Path, PathBuf};
use std::time::Duration;

use kdl::{KdlDocument, KdlNode, KdlValue};

use crate::error::ConfigError;
use crate::model::*;

/// Parse a configuration file from the given path
pub fn parse_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config_str(&content)
}

/// Parse `path`, or fall back to defaults if it does not exist and the
/// caller did not insist on it.
pub fn load_config(path: &Path, required: bool) -> Result<Config, ConfigError> {
    if !required && !path.exists() {
        tracing::info!(
            "No configuration at {}, using defaults",
            path.display()
        );
        return Ok(Config::default());
    }
    parse_config(path)
}

/// Parse configuration from a string
pub fn parse_config_str(content: &str) -> Result<Config, ConfigError> {
    let doc: KdlDocument = content.parse().map_err(|e: kdl::KdlError| {
        // kdl carries its own miette version, so rebuild the span
        let offset = e.span.offset();
        let len = e.span.len();
        let span = miette::SourceSpan::from((offset, len));
        ConfigError::ParseError {
            src: content.to_string(),
            span,
            source: e,
        }
    })?;

    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "global" => config.global = parse_global(node, content)?,
            "transport" => config.transport = parse_transport(node, content)?,
            "touch" => config.touch = parse_touch(node, content)?,
            "timing" => config.timing = parse_timing(node, content)?,
            "long-press" => config.long_press = parse_long_press(node, content)?,
            name => {
                tracing::warn!("Unknown top-level node: {}", name);
            }
        }
    }

    validate(&config)?;
    Ok(config)
}

fn parse_global(node: &KdlNode, source: &str) -> Result<GlobalConfig, ConfigError> {
    let mut global = GlobalConfig::default();

    for child in children(node) {
        match child.name().value() {
            "log-level" => {
                let value = string_arg(child, source, "a log level such as \"info\"")?;
                global.log_level = value
                    .parse()
                    .map_err(|_| invalid_value(child, source, "one of trace, debug, info, warn, error"))?;
            }
            name => {
                tracing::warn!("Unknown global config option: {}", name);
            }
        }
    }

    Ok(global)
}

fn parse_transport(node: &KdlNode, source: &str) -> Result<TransportConfig, ConfigError> {
    let kind = node
        .entries()
        .first()
        .and_then(|e| e.value().as_string())
        .ok_or_else(|| ConfigError::MissingField {
            field: "transport kind (e.g., `transport \"hidg\" { ... }`)".to_string(),
        })?;

    match kind {
        "hidg" => {
            let mut device = PathBuf::from(TransportConfig::DEFAULT_HIDG_DEVICE);
            let mut reconnect = TransportConfig::DEFAULT_RECONNECT;
            for child in children(node) {
                match child.name().value() {
                    "device" => {
                        let path = string_arg(child, source, "a device path such as \"/dev/hidg0\"")?;
                        device = shellexpand::tilde(path).into_owned().into();
                    }
                    "reconnect-ms" => reconnect = millis_arg(child, source)?,
                    name => {
                        tracing::warn!("Unknown hidg transport option: {}", name);
                    }
                }
            }
            Ok(TransportConfig::Hidg { device, reconnect })
        }
        "log" => {
            if !children(node).is_empty() {
                tracing::warn!("The log transport takes no options");
            }
            Ok(TransportConfig::Log)
        }
        _ => Err(invalid_value(node, source, "\"hidg\" or \"log\"")),
    }
}

fn parse_touch(node: &KdlNode, source: &str) -> Result<TouchConfig, ConfigError> {
    let mut touch = TouchConfig::default();

    for child in children(node) {
        match child.name().value() {
            "device" => {
                touch.device = Some(string_arg(child, source, "an input device name")?.to_string());
            }
            "width" => touch.width = dimension_arg(child, source)?,
            "height" => touch.height = dimension_arg(child, source)?,
            "margin" => touch.margin = dimension_arg(child, source)?,
            name => {
                tracing::warn!("Unknown touch option: {}", name);
            }
        }
    }

    Ok(touch)
}

fn parse_timing(node: &KdlNode, source: &str) -> Result<TimingConfig, ConfigError> {
    let mut timing = TimingConfig::default();

    for child in children(node) {
        match child.name().value() {
            "long-press-ms" => timing.long_press = millis_arg(child, source)?,
            "key-hold-ms" => timing.key_hold = millis_arg(child, source)?,
            "char-gap-ms" => timing.char_gap = millis_arg(child, source)?,
            name => {
                tracing::warn!("Unknown timing option: {}", name);
            }
        }
    }

    Ok(timing)
}

fn parse_long_press(node: &KdlNode, source: &str) -> Result<LongPressAction, ConfigError> {
    match string_arg(node, source, "\"repeat\" or \"ignore\"")? {
        "repeat" => Ok(LongPressAction::Repeat),
        "ignore" => Ok(LongPressAction::Ignore),
        _ => Err(invalid_value(node, source, "\"repeat\" or \"ignore\"")),
    }
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    let touch = &config.touch;
    if touch.width <= 0.0 || touch.height <= 0.0 {
        return Err(ConfigError::Invalid {
            message: format!(
                "Touch surface must have a positive size, got {}x{}",
                touch.width, touch.height
            ),
        });
    }
    if touch.margin * 2.0 >= touch.width.min(touch.height) {
        return Err(ConfigError::Invalid {
            message: format!(
                "Touch margin {} leaves no room for keys on a {}x{} surface",
                touch.margin, touch.width, touch.height
            ),
        });
    }
    if config.timing.long_press.is_zero() {
        return Err(ConfigError::Invalid {
            message: "long-press-ms must be greater than zero".to_string(),
        });
    }
    if let TransportConfig::Hidg { reconnect, .. } = &config.transport {
        if reconnect.is_zero() {
            return Err(ConfigError::Invalid {
                message: "reconnect-ms must be greater than zero".to_string(),
            });
        }
    }
    Ok(())
}

fn children(node: &KdlNode) -> &[KdlNode] {
    node.children().map(|doc| doc.nodes()).unwrap_or(&[])
}

fn first_value(node: &KdlNode) -> Option<&KdlValue> {
    node.entries().first().map(|e| e.value())
}

fn string_arg<'a>(node: &'a KdlNode, source: &str, expected: &str) -> Result<&'a str, ConfigError> {
    first_value(node)
        .and_then(|v| v.as_string())
        .ok_or_else(|| invalid_value(node, source, expected))
}

fn millis_arg(node: &KdlNode, source: &str) -> Result<Duration, ConfigError> {
    match first_value(node).and_then(|v| v.as_i64()) {
        Some(ms) if ms >= 0 => Ok(Duration::from_millis(ms as u64)),
        _ => Err(invalid_value(
            node,
            source,
            "a non-negative whole number of milliseconds",
        )),
    }
}

fn dimension_arg(node: &KdlNode, source: &str) -> Result<f32, ConfigError> {
    let value = first_value(node).and_then(|v| v.as_f64().or_else(|| v.as_i64().map(|i| i as f64)));
    match value {
        Some(v) if v >= 0.0 => Ok(v as f32),
        _ => Err(invalid_value(node, source, "a non-negative number")),
    }
}

/// Point at the node's first argument, or its name if it has none.
fn invalid_value(node: &KdlNode, source: &str, expected: &str) -> ConfigError {
    let (offset, len) = match node.entries().first() {
        Some(entry) => (entry.span().offset(), entry.span().len()),
        None => (node.name().span().offset(), node.name().span().len()),
    };
    ConfigError::InvalidValue {
        node: node.name().value().to_string(),
        expected: format!("expected {}", expected),
        src: source.to_string(),
        span: miette::SourceSpan::from((offset, len)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = r#"
            global {
                log-level "debug"
            }

            transport "hidg" {
                device "/dev/hidg1"
                reconnect-ms 250
            }

            touch {
                device "ELAN Touchscreen"
                width 1920
                height 720.5
                margin 6
            }

            timing {
                long-press-ms 500
                key-hold-ms 15
                char-gap-ms 30
            }

            long-press "ignore"
        "#;

        let config = parse_config_str(config).unwrap();
        assert_eq!(config.global.log_level, LogLevel::Debug);
        assert_eq!(
            config.transport,
            TransportConfig::Hidg {
                device: PathBuf::from("/dev/hidg1"),
                reconnect: Duration::from_millis(250),
            }
        );
        assert_eq!(config.touch.device.as_deref(), Some("ELAN Touchscreen"));
        assert_eq!(config.touch.width, 1920.0);
        assert_eq!(config.touch.height, 720.5);
        assert_eq!(config.touch.margin, 6.0);
        assert_eq!(config.timing.long_press, Duration::from_millis(500));
        assert_eq!(config.timing.key_hold, Duration::from_millis(15));
        assert_eq!(config.timing.char_gap, Duration::from_millis(30));
        assert_eq!(config.long_press, LongPressAction::Ignore);
    }

    #[test]
    fn test_empty_config_is_default() {
        let config = parse_config_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.transport.kind(), "hidg");
        assert_eq!(config.timing.long_press, Duration::from_millis(400));
        assert_eq!(config.long_press, LongPressAction::Repeat);
    }

    #[test]
    fn test_log_transport() {
        let config = parse_config_str(r#"transport "log""#).unwrap();
        assert_eq!(config.transport, TransportConfig::Log);
    }

    #[test]
    fn test_unknown_transport_kind() {
        let err = parse_config_str(r#"transport "bluetooth""#).unwrap_err();
        match err {
            ConfigError::InvalidValue { node, expected, .. } => {
                assert_eq!(node, "transport");
                assert!(expected.contains("hidg"));
            }
            other => panic!("Expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_transport_without_kind() {
        let err = parse_config_str("transport { device \"/dev/hidg0\"; }").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { .. }));
    }

    #[test]
    fn test_negative_millis_rejected() {
        let err = parse_config_str("timing { key-hold-ms -5; }").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref node, .. } if node == "key-hold-ms"));
    }

    #[test]
    fn test_wrong_value_type_rejected() {
        let err = parse_config_str(r#"touch { width "wide"; }"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref node, .. } if node == "width"));

        let err = parse_config_str("global { log-level 3; }").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_bad_log_level() {
        let err = parse_config_str(r#"global { log-level "loud"; }"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref node, .. } if node == "log-level"));
    }

    #[test]
    fn test_bad_long_press_action() {
        let err = parse_config_str(r#"long-press "explode""#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_zero_long_press_rejected() {
        let err = parse_config_str("timing { long-press-ms 0; }").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_zero_reconnect_rejected() {
        let err = parse_config_str(r#"transport "hidg" { reconnect-ms 0; }"#).unwrap_err();
        match err {
            ConfigError::Invalid { message } => assert!(message.contains("reconnect-ms")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_oversized_margin_rejected() {
        let err = parse_config_str("touch { width 100; height 40; margin 20; }").unwrap_err();
        match err {
            ConfigError::Invalid { message } => assert!(message.contains("margin")),
            other => panic!("Expected Invalid, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_nodes_are_ignored() {
        let config = parse_config_str(
            r#"
            theme "dark"
            timing { vibrate-ms 20; }
            "#,
        )
        .unwrap();
        assert_eq!(config.timing, TimingConfig::default());
    }

    #[test]
    fn test_kdl_syntax_error() {
        let err = parse_config_str("touch { width 10").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn test_load_missing_optional_file() {
        let path = Path::new("/nonexistent/touchkey/config.kdl");
        assert_eq!(load_config(path, false).unwrap(), Config::default());
        assert!(matches!(load_config(path, true), Err(ConfigError::Io(_))));
    }
}
