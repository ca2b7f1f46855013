//! Structured logging built on `tracing`
//!
//! ## Environment Variables
//!
//! - `LOG_LEVEL`: ERROR, WARN, INFO, DEBUG or TRACE. Defaults to INFO
//! - `LOG_FORMAT`: json, pretty or compact. Defaults to json
//! - `LOG_SPANS`: emit span open/close events (true/false). Defaults to false
//! - `RUST_LOG`: replaces the computed filter entirely
//!
//! ```bash
//! # On the device
//! LOG_FORMAT=json LOG_LEVEL=INFO ./shadow-agent run
//!
//! # At a desk
//! LOG_FORMAT=pretty LOG_LEVEL=DEBUG ./shadow-agent run
//! ```

use std::env;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Dependencies that are chatty at INFO
const QUIET_TARGETS: &[&str] = &["rumqttc=warn", "tokio=warn"];

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line
    Json,
    /// Multi-line, coloured
    Pretty,
    /// Single line, coloured
    Compact,
}

impl LogFormat {
    /// Parse log format from string; unknown values fall back to JSON
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Json,
        }
    }
}

/// Parse a `LOG_LEVEL` value; unknown values fall back to INFO
pub fn parse_level(s: &str) -> Level {
    match s.to_uppercase().as_str() {
        "ERROR" => Level::ERROR,
        "WARN" => Level::WARN,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => Level::INFO,
    }
}

fn parse_flag(s: &str) -> bool {
    s.eq_ignore_ascii_case("true")
}

fn span_events(include_spans: bool) -> FmtSpan {
    if include_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

/// Build the filter for `level`, or take `RUST_LOG` verbatim when set
pub fn build_filter(level: Level, rust_log: Option<&str>) -> EnvFilter {
    if let Some(rust_log) = rust_log {
        return EnvFilter::new(rust_log);
    }

    QUIET_TARGETS
        .iter()
        .filter_map(|directive| directive.parse().ok())
        .fold(EnvFilter::new(level.to_string()), |filter, directive| {
            filter.add_directive(directive)
        })
}

/// Install the global subscriber
pub fn init_logging(
    level: Level,
    format: LogFormat,
    include_spans: bool,
) -> Result<(), TryInitError> {
    let rust_log = env::var("RUST_LOG").ok();
    let registry = tracing_subscriber::registry().with(build_filter(level, rust_log.as_deref()));
    let spans = span_events(include_spans);

    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_span_events(spans))
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_ansi(true).with_span_events(spans))
            .try_init(),
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_ansi(true)
                    .with_target(false)
                    .with_span_events(spans),
            )
            .try_init(),
    }
}

/// Initialize logging from environment variables
pub fn init_default_logging() -> Result<(), TryInitError> {
    let level = parse_level(&env::var("LOG_LEVEL").unwrap_or_default());
    let format = LogFormat::parse(&env::var("LOG_FORMAT").unwrap_or_default());
    let include_spans = parse_flag(&env::var("LOG_SPANS").unwrap_or_default());

    init_logging(level, format, include_spans)
}

/// Span around one shadow document being handled
#[macro_export]
macro_rules! shadow_span {
    ($($field:tt)*) => {
        tracing::info_span!("shadow_sync", $($field)*)
    };
}

/// Span around one telemetry cycle
#[macro_export]
macro_rules! telemetry_span {
    ($($field:tt)*) => {
        tracing::info_span!("telemetry_cycle", $($field)*)
    };
}

/// Span around the MQTT event loop task of one session
#[macro_export]
macro_rules! mqtt_span {
    ($($field:tt)*) => {
        tracing::info_span!("mqtt_session", $($field)*)
    };
}

/// Create a lifecycle event span
#[macro_export]
macro_rules! lifecycle_span {
    ($($field:tt)*) => {
        tracing::info_span!("lifecycle_event", $($field)*)
    };
}

pub use {lifecycle_span, mqtt_span, shadow_span, telemetry_span};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("PRETTY"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("CoMpAcT"), LogFormat::Compact);
    }

    #[test]
    fn test_log_format_parse_invalid_defaults_to_json() {
        for input in ["", "xml", "yaml", "invalid"] {
            assert_eq!(LogFormat::parse(input), LogFormat::Json, "{input}");
        }
    }

    #[test]
    fn test_parse_level() {
        let cases = [
            ("ERROR", Level::ERROR),
            ("warn", Level::WARN),
            ("Info", Level::INFO),
            ("DEBUG", Level::DEBUG),
            ("trace", Level::TRACE),
            ("", Level::INFO),
            ("loud", Level::INFO),
        ];

        for (input, expected) in cases {
            assert_eq!(parse_level(input), expected, "Failed for input: {input}");
        }
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("true"));
        assert!(parse_flag("TRUE"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag(""));
        assert!(!parse_flag("1"));
        assert!(!parse_flag("yes"));
    }

    #[test]
    fn test_build_filter_quiets_dependencies() {
        let filter = build_filter(Level::DEBUG, None).to_string();
        assert!(filter.contains("rumqttc=warn"), "{filter}");
        assert!(filter.contains("tokio=warn"), "{filter}");
        assert!(filter.contains("debug"), "{filter}");
    }

    #[test]
    fn test_build_filter_rust_log_overrides() {
        let filter = build_filter(Level::DEBUG, Some("shadow_agent=trace")).to_string();
        assert_eq!(filter, "shadow_agent=trace");
    }

    #[test]
    fn test_span_macros_build_spans() {
        let _shadow = shadow_span!(device_id = "sensor-01");
        let _telemetry = telemetry_span!(cycle = 1u64);
        let _mqtt = mqtt_span!(topic = "sensor-01/telemetry");
        let _lifecycle = lifecycle_span!(phase = "start");
    }
}
