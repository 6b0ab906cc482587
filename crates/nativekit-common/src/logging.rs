//! Subscriber setup for NativeKit binaries and tests.
//!
//! Render-thread and worker-pool events interleave, so the verbose presets
//! turn on thread names. Shader tooling (`naga`) is noisy at debug level and
//! is capped at `warn` unless a custom filter says otherwise.

use serde::Deserialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter, Layer, Registry,
};

/// Directives appended to the level filter unless a custom filter is set.
const QUIET_DEPENDENCIES: &[&str] = &["naga=warn"];

/// How events are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, human-readable.
    #[default]
    Pretty,
    /// One line per event.
    Compact,
    /// Newline-delimited JSON.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("pretty") {
            Ok(Self::Pretty)
        } else if s.eq_ignore_ascii_case("compact") {
            Ok(Self::Compact)
        } else if s.eq_ignore_ascii_case("json") {
            Ok(Self::Json)
        } else {
            Err(format!("unknown log format '{s}' (expected pretty, compact or json)"))
        }
    }
}

/// Subscriber settings.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: LevelFilter,
    pub format: LogFormat,
    /// Full `EnvFilter` directive string. Replaces `level` and `RUST_LOG`.
    pub filter: Option<String>,
    pub thread_names: bool,
    pub source_location: bool,
    /// Emit span enter and close events.
    pub span_events: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Pretty,
            filter: None,
            thread_names: false,
            source_location: false,
            span_events: false,
        }
    }
}

impl LogConfig {
    pub fn debug() -> Self {
        Self::from_verbosity(1)
    }

    pub fn trace() -> Self {
        Self::from_verbosity(2)
    }

    /// JSON at info level, for log collectors.
    pub fn production() -> Self {
        Self::default().with_format(LogFormat::Json)
    }

    /// Map a `-v` count onto a preset: 0 is info, 1 is debug, 2 or more is
    /// trace with span events.
    pub fn from_verbosity(verbosity: u8) -> Self {
        match verbosity {
            0 => Self::default(),
            1 => Self {
                level: LevelFilter::DEBUG,
                thread_names: true,
                source_location: true,
                ..Self::default()
            },
            _ => Self {
                level: LevelFilter::TRACE,
                thread_names: true,
                source_location: true,
                span_events: true,
                ..Self::default()
            },
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Directive string the subscriber is built from when `RUST_LOG` is
    /// unset or invalid.
    pub fn directives(&self) -> String {
        if let Some(custom) = &self.filter {
            return custom.clone();
        }
        let mut directives = vec![self.level.to_string().to_lowercase()];
        if self.level > LevelFilter::WARN {
            directives.extend(QUIET_DEPENDENCIES.iter().map(|d| d.to_string()));
        }
        directives.join(",")
    }

    fn env_filter(&self) -> EnvFilter {
        let from_config = || {
            EnvFilter::try_new(self.directives()).unwrap_or_else(|_| EnvFilter::new(self.level.to_string()))
        };
        if self.filter.is_some() {
            return from_config();
        }
        EnvFilter::try_from_default_env().unwrap_or_else(|_| from_config())
    }

    fn fmt_layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let span_events = if self.span_events {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };
        let layer = fmt::layer()
            .with_thread_names(self.thread_names)
            .with_file(self.source_location)
            .with_line_number(self.source_location)
            .with_span_events(span_events);

        match self.format {
            LogFormat::Pretty => layer.pretty().boxed(),
            LogFormat::Compact => layer.compact().boxed(),
            LogFormat::Json => layer.json().boxed(),
        }
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn try_init_logging(config: LogConfig) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(config.fmt_layer())
        .with(config.env_filter())
        .try_init()
}

/// Install the global subscriber, ignoring a second call so tools and tests
/// can both initialize.
pub fn init_logging(config: LogConfig) {
    if try_init_logging(config).is_err() {
        tracing::debug!("subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_presets() {
        let quiet = LogConfig::from_verbosity(0);
        assert_eq!(quiet.level, LevelFilter::INFO);
        assert!(!quiet.thread_names);

        let debug = LogConfig::debug();
        assert_eq!(debug.level, LevelFilter::DEBUG);
        assert!(debug.thread_names);
        assert!(!debug.span_events);

        let trace = LogConfig::from_verbosity(5);
        assert_eq!(trace.level, LevelFilter::TRACE);
        assert!(trace.span_events);
    }

    #[test]
    fn test_directives_quiet_naga_at_verbose_levels() {
        assert_eq!(LogConfig::default().directives(), "info,naga=warn");
        assert_eq!(LogConfig::trace().directives(), "trace,naga=warn");

        let warn_only = LogConfig {
            level: LevelFilter::WARN,
            ..LogConfig::default()
        };
        assert_eq!(warn_only.directives(), "warn");
    }

    #[test]
    fn test_custom_filter_wins() {
        let config = LogConfig::production().with_filter("nativekit_engine=trace");
        assert_eq!(config.directives(), "nativekit_engine=trace");
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("Compact".parse::<LogFormat>(), Ok(LogFormat::Compact));
        assert!("xml".parse::<LogFormat>().unwrap_err().contains("xml"));

        let format: LogFormat = serde_json::from_str("\"pretty\"").unwrap();
        assert_eq!(format, LogFormat::Pretty);
    }

    #[test]
    fn test_init_logging_twice_is_ignored() {
        init_logging(LogConfig::default());
        init_logging(LogConfig::debug());
    }
}
