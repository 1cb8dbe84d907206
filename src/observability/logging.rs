//! Structured logging system using tracing crate
//!
//! Logging is configured by the `[logging]` section of the MSH configuration
//! and may be overridden from the environment:
//!
//! - `LOG_LEVEL`: ERROR, WARN, INFO, DEBUG or TRACE
//! - `LOG_FORMAT`: json, pretty or compact
//! - `LOG_SPANS`: emit span open/close events (true/false)
//! - `RUST_LOG`: replaces the whole filter (level and directives)
//!
//! ```toml
//! [logging]
//! level = "debug"
//! format = "compact"
//! directives = ["as4msh::reliability=trace", "reqwest=warn"]
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log output format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per event
    #[default]
    Json,
    /// Multi-line, coloured
    Pretty,
    /// Single-line, coloured, without targets
    Compact,
}

impl LogFormat {
    /// Lenient parse for environment overrides; unknown values mean JSON
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Json,
        }
    }
}

/// `[logging]` configuration section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingSettings {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default)]
    pub include_spans: bool,
    /// `EnvFilter` directives layered over `level`
    #[serde(default = "default_directives")]
    pub directives: Vec<String>,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_directives() -> Vec<String> {
    ["hyper=warn", "reqwest=warn", "rustls=warn"]
        .iter()
        .map(|d| d.to_string())
        .collect()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            include_spans: false,
            directives: default_directives(),
        }
    }
}

impl LoggingSettings {
    /// Apply `LOG_LEVEL`, `LOG_FORMAT` and `LOG_SPANS` when set
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(level) = env::var("LOG_LEVEL") {
            self.level = level;
        }
        if let Ok(format) = env::var("LOG_FORMAT") {
            self.format = LogFormat::parse(&format);
        }
        if let Ok(spans) = env::var("LOG_SPANS") {
            self.include_spans = spans.eq_ignore_ascii_case("true");
        }
        self
    }

    /// Reject an unknown level or an unparsable directive
    pub fn validate(&self) -> Result<(), String> {
        if parse_level(&self.level).is_none() {
            return Err(format!("unknown log level '{}'", self.level));
        }
        for directive in &self.directives {
            directive
                .parse::<Directive>()
                .map_err(|e| format!("invalid log directive '{directive}': {e}"))?;
        }
        Ok(())
    }

    fn filter(&self) -> EnvFilter {
        if let Ok(rust_log) = env::var("RUST_LOG") {
            return EnvFilter::new(rust_log);
        }

        let level = parse_level(&self.level).unwrap_or(Level::INFO);
        self.directives
            .iter()
            .filter_map(|directive| directive.parse::<Directive>().ok())
            .fold(EnvFilter::new(level.to_string()), |filter, directive| {
                filter.add_directive(directive)
            })
    }
}

pub fn parse_level(s: &str) -> Option<Level> {
    match s.to_uppercase().as_str() {
        "ERROR" => Some(Level::ERROR),
        "WARN" => Some(Level::WARN),
        "INFO" => Some(Level::INFO),
        "DEBUG" => Some(Level::DEBUG),
        "TRACE" => Some(Level::TRACE),
        _ => None,
    }
}

/// Install the global subscriber; later calls are no-ops
pub fn init_logging(settings: &LoggingSettings) {
    let span_events = if settings.include_spans {
        fmt::format::FmtSpan::NEW | fmt::format::FmtSpan::CLOSE
    } else {
        fmt::format::FmtSpan::NONE
    };
    let subscriber = tracing_subscriber::registry().with(settings.filter());

    let _ = match settings.format {
        LogFormat::Json => subscriber
            .with(fmt::layer().json().with_span_events(span_events))
            .try_init(),
        LogFormat::Pretty => subscriber
            .with(fmt::layer().pretty().with_span_events(span_events))
            .try_init(),
        LogFormat::Compact => subscriber
            .with(
                fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_span_events(span_events),
            )
            .try_init(),
    };
}

/// Defaults plus environment overrides, for use before configuration loads
pub fn init_default_logging() {
    init_logging(&LoggingSettings::default().with_env_overrides());
}

/// Span covering one pipeline run
#[macro_export]
macro_rules! pipeline_span {
    ($($field:tt)*) => {
        tracing::info_span!("pipeline_run", $($field)*)
    };
}

/// Span covering one step execution
#[macro_export]
macro_rules! step_span {
    ($($field:tt)*) => {
        tracing::info_span!("step_execution", $($field)*)
    };
}

/// Span covering one reception awareness poll
#[macro_export]
macro_rules! reliability_span {
    ($($field:tt)*) => {
        tracing::info_span!("reception_awareness", $($field)*)
    };
}

pub use {pipeline_span, reliability_span, step_span};
