//! Logging setup for Sluice.
//!
//! The engine emits `tracing` events at operation boundaries. Installing a
//! subscriber is left to the application unless the `tracing-subscriber`
//! feature is enabled, in which case [`init`] installs one driven by:
//!
//! - `SLUICE_DEBUG=true|1|yes` enables debug output, including generated SQL
//! - `SLUICE_LOG_LEVEL=trace|debug|info|warn|error` overrides the level
//! - `SLUICE_LOG_FORMAT=json|pretty|compact` selects the formatter (default: json)
//!
//! ```rust,no_run
//! use sluice_core::logging;
//!
//! logging::init();
//! ```

use std::env;
use std::sync::Once;

/// Enables debug output when truthy.
pub const ENV_DEBUG: &str = "SLUICE_DEBUG";
/// Overrides the log level.
pub const ENV_LOG_LEVEL: &str = "SLUICE_LOG_LEVEL";
/// Selects the output format.
pub const ENV_LOG_FORMAT: &str = "SLUICE_LOG_FORMAT";

static INIT: Once = Once::new();

/// Whether `SLUICE_DEBUG` is set to a truthy value.
#[inline]
pub fn is_debug_enabled() -> bool {
    env::var(ENV_DEBUG).map(|v| truthy(&v)).unwrap_or(false)
}

fn truthy(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes")
}

/// The effective log level.
///
/// `SLUICE_LOG_LEVEL` wins when valid; otherwise `debug` with `SLUICE_DEBUG`
/// and `warn` without.
pub fn log_level() -> &'static str {
    resolve_level(env::var(ENV_LOG_LEVEL).ok().as_deref(), is_debug_enabled())
}

fn resolve_level(requested: Option<&str>, debug: bool) -> &'static str {
    let fallback = if debug { "debug" } else { "warn" };
    match requested.map(str::to_lowercase).as_deref() {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("info") => "info",
        Some("warn") => "warn",
        Some("error") => "error",
        _ => fallback,
    }
}

/// The effective output format.
pub fn log_format() -> &'static str {
    resolve_format(env::var(ENV_LOG_FORMAT).ok().as_deref())
}

fn resolve_format(requested: Option<&str>) -> &'static str {
    match requested.map(str::to_lowercase).as_deref() {
        Some("pretty") => "pretty",
        Some("compact") => "compact",
        _ => "json",
    }
}

/// The `EnvFilter` directive covering every Sluice crate.
pub fn filter_directive(level: &str) -> String {
    ["sluice", "sluice_core", "sluice_mssql", "sluice_postgres"]
        .iter()
        .map(|target| format!("{}={}", target, level))
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the Sluice subscriber once.
///
/// Does nothing unless `SLUICE_DEBUG` or `SLUICE_LOG_LEVEL` is set, or when
/// built without the `tracing-subscriber` feature.
pub fn init() {
    INIT.call_once(|| {
        if !is_debug_enabled() && env::var(ENV_LOG_LEVEL).is_err() {
            return;
        }

        #[cfg(feature = "tracing-subscriber")]
        {
            use tracing_subscriber::{EnvFilter, fmt, prelude::*};

            let level = log_level();
            let filter = EnvFilter::try_new(filter_directive(level))
                .unwrap_or_else(|_| EnvFilter::new("warn"));

            let installed = match log_format() {
                "json" => tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().json())
                    .try_init(),
                "compact" => tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().compact())
                    .try_init(),
                _ => tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().pretty())
                    .try_init(),
            };

            if installed.is_ok() {
                tracing::info!(level, format = log_format(), "sluice logging initialized");
            }
        }
    });
}

/// Debug event emitted only when `SLUICE_DEBUG` is enabled.
#[macro_export]
macro_rules! sluice_debug {
    ($($arg:tt)*) => {
        if $crate::logging::is_debug_enabled() {
            tracing::debug!($($arg)*);
        }
    };
}

/// Trace event emitted only when `SLUICE_DEBUG` is enabled.
#[macro_export]
macro_rules! sluice_trace {
    ($($arg:tt)*) => {
        if $crate::logging::is_debug_enabled() {
            tracing::trace!($($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_level_resolution() {
        assert_eq!(resolve_level(None, false), "warn");
        assert_eq!(resolve_level(None, true), "debug");
        assert_eq!(resolve_level(Some("TRACE"), false), "trace");
        assert_eq!(resolve_level(Some("loud"), true), "debug");
    }

    #[test]
    fn test_format_resolution() {
        assert_eq!(resolve_format(None), "json");
        assert_eq!(resolve_format(Some("Pretty")), "pretty");
        assert_eq!(resolve_format(Some("compact")), "compact");
        assert_eq!(resolve_format(Some("xml")), "json");
    }

    #[test]
    fn test_filter_directive() {
        assert_eq!(
            filter_directive("info"),
            "sluice=info,sluice_core=info,sluice_mssql=info,sluice_postgres=info"
        );
        assert!(truthy("YES"));
        assert!(!truthy("off"));
    }
}
