//! Structured logging utilities for scriptgen
//!
//! All diagnostics go to stderr so stdout stays reserved for promotion records. Logs use
//! structured fields for easy parsing and analysis.
//!
//! # Log Format Conventions
//!
//! - `operation`: The step being performed (e.g., "evaluate", "promote", "directive.load")
//! - `status`: The evaluation outcome ("succeeded", "compile-failed", "runtime-failed")
//! - `script`: Absolute path of the script being evaluated
//! - `path`: File the event is about (output target, staged rewrite, config file)
//!
//! # Examples
//!
//! ```rust
//! use tracing::info;
//!
//! # let script = std::path::Path::new("/repo/App/Models.csx");
//! # let target = std::path::Path::new("/repo/App/Models.cs");
//! info!(
//!     operation = "promote",
//!     script = %script.display(),
//!     path = %target.display(),
//!     "generated output"
//! );
//! ```

use std::{fmt as std_fmt, io};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{
    fmt::{self, format::Writer},
    prelude::*,
    EnvFilter,
};

/// Custom formatter that shows "scriptgen" instead of full module path
struct ScriptgenFormatter {
    with_ansi: bool,
}

impl<S, N> FormatEvent<S, N> for ScriptgenFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std_fmt::Result {
        let meta = event.metadata();

        write!(
            writer,
            "{} ",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f")
        )?;

        if self.with_ansi {
            let level_style = match *meta.level() {
                tracing::Level::ERROR => "\x1b[31m",
                tracing::Level::WARN => "\x1b[33m",
                tracing::Level::INFO => "\x1b[32m",
                tracing::Level::DEBUG => "\x1b[34m",
                tracing::Level::TRACE => "\x1b[35m",
            };
            write!(writer, "{}{:5}(scriptgen)\x1b[0m: ", level_style, meta.level())?;
        } else {
            write!(writer, "{:5}(scriptgen): ", meta.level())?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format (default for development)
    Pretty,
    /// Compact format (for CI and build logs)
    Compact,
    /// JSON format (for log aggregation systems)
    Json,
}

impl LogFormat {
    fn parse(value: &str, in_ci: bool) -> Self {
        match value.to_lowercase().as_str() {
            "json" => Self::Json,
            "compact" => Self::Compact,
            "pretty" => Self::Pretty,
            _ if in_ci => Self::Compact,
            _ => Self::Pretty,
        }
    }

    /// Parse from environment variable (SCRIPTGEN_LOG_FORMAT)
    pub fn from_env() -> Self {
        Self::parse(
            &std::env::var("SCRIPTGEN_LOG_FORMAT").unwrap_or_default(),
            std::env::var("CI").is_ok(),
        )
    }
}

/// Initialize the global tracing subscriber
///
/// `default_level` applies when `RUST_LOG` is unset.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Set log level (e.g., "debug", "info", "warn")
/// - `SCRIPTGEN_LOG_FORMAT`: Set format ("pretty", "compact", "json")
/// - `CI`: If set, defaults to compact format
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // A subscriber may already be installed (tests); keep the existing one
    let _ = match LogFormat::from_env() {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .event_format(ScriptgenFormatter { with_ansi: true })
                    .with_writer(io::stderr),
            )
            .try_init(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .event_format(ScriptgenFormatter { with_ansi: false })
                    .with_writer(io::stderr),
            )
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_ansi(false)
                    .with_writer(io::stderr)
                    .json(),
            )
            .try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_selection() {
        assert_eq!(LogFormat::parse("JSON", false), LogFormat::Json);
        assert_eq!(LogFormat::parse("compact", false), LogFormat::Compact);
        assert_eq!(LogFormat::parse("pretty", true), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("", true), LogFormat::Compact);
        assert_eq!(LogFormat::parse("", false), LogFormat::Pretty);
    }
}
