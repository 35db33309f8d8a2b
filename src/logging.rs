//! `tracing` setup for hosts embedding the passes.
//!
//! Events use `autodiff.*` targets (`autodiff.sema`, `autodiff.transform`,
//! `autodiff.witness`, ...), so `RUST_LOG=autodiff.transform=trace` narrows
//! output to derivative synthesis.

use std::env;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Resolved to `Text` when the subscriber is installed.
    Auto,
    Text,
    Json,
}

const FORMAT_NAMES: &[(&str, LogFormat)] = &[
    ("auto", LogFormat::Auto),
    ("text", LogFormat::Text),
    ("plain", LogFormat::Text),
    ("json", LogFormat::Json),
];

impl LogFormat {
    pub fn parse(name: &str) -> Option<Self> {
        lookup(FORMAT_NAMES, name)
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(canonical_name(FORMAT_NAMES, *self))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

const LEVEL_NAMES: &[(&str, LogLevel)] = &[
    ("error", LogLevel::Error),
    ("err", LogLevel::Error),
    ("warn", LogLevel::Warn),
    ("warning", LogLevel::Warn),
    ("info", LogLevel::Info),
    ("debug", LogLevel::Debug),
    ("trace", LogLevel::Trace),
    ("verbose", LogLevel::Trace),
];

impl LogLevel {
    pub fn parse(name: &str) -> Option<Self> {
        lookup(LEVEL_NAMES, name)
    }

    #[must_use]
    pub fn as_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(canonical_name(LEVEL_NAMES, *self))
    }
}

fn lookup<T: Copy>(table: &[(&str, T)], name: &str) -> Option<T> {
    table
        .iter()
        .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name.trim()))
        .map(|(_, value)| *value)
}

/// First spelling listed for `value`.
fn canonical_name<T: Copy + PartialEq>(table: &[(&'static str, T)], value: T) -> &'static str {
    table
        .iter()
        .find(|(_, candidate)| *candidate == value)
        .map_or("?", |(name, _)| *name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogOptions {
    pub format: LogFormat,
    pub level: LogLevel,
}

impl LogOptions {
    pub const DEFAULT: Self = Self {
        format: LogFormat::Auto,
        level: LogLevel::Warn,
    };

    /// Defaults overridden by `AUTODIFF_LOG_FORMAT` and `AUTODIFF_LOG_LEVEL`.
    /// Unparseable values are ignored.
    #[must_use]
    pub fn from_env() -> Self {
        Self::DEFAULT.with_overrides(
            env::var("AUTODIFF_LOG_FORMAT").ok().as_deref(),
            env::var("AUTODIFF_LOG_LEVEL").ok().as_deref(),
        )
    }

    #[must_use]
    fn with_overrides(self, format: Option<&str>, level: Option<&str>) -> Self {
        Self {
            format: format.and_then(LogFormat::parse).unwrap_or(self.format),
            level: level.and_then(LogLevel::parse).unwrap_or(self.level),
        }
    }

    #[must_use]
    pub fn resolved(self) -> Self {
        if self.format == LogFormat::Auto {
            return Self {
                format: LogFormat::Text,
                ..self
            };
        }
        self
    }
}

impl Default for LogOptions {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Install the process-wide subscriber on stderr. Only the first call has an
/// effect; `RUST_LOG` wins over `options.level` when it parses.
pub fn init_logging(options: &LogOptions) {
    use std::io::IsTerminal;
    use std::sync::OnceLock;
    use tracing_subscriber::{EnvFilter, fmt};

    static INSTALLED: OnceLock<()> = OnceLock::new();

    let options = options.resolved();
    INSTALLED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(options.level.to_string()));
        let builder = fmt::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true);
        let installed = match options.format {
            LogFormat::Json => {
                tracing::subscriber::set_global_default(builder.with_ansi(false).json().finish())
            }
            LogFormat::Auto | LogFormat::Text => {
                let ansi = env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal();
                tracing::subscriber::set_global_default(builder.with_ansi(ansi).compact().finish())
            }
        };
        if installed.is_ok() {
            tracing::debug!(target: "autodiff.logging", format = %options.format, level = %options.level, "logging initialised");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_parse_case_insensitively() {
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("plain"), Some(LogFormat::Text));
        assert_eq!(LogFormat::parse("xml"), None);
        assert_eq!(LogLevel::parse("Warning"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse(" verbose "), Some(LogLevel::Trace));
        assert_eq!(LogLevel::parse("noop"), None);
        assert_eq!(LogLevel::Debug.as_tracing_level(), tracing::Level::DEBUG);
    }

    #[test]
    fn display_uses_the_first_spelling() {
        assert_eq!(LogLevel::Error.to_string(), "error");
        assert_eq!(LogLevel::Trace.to_string(), "trace");
        assert_eq!(LogFormat::Text.to_string(), "text");
    }

    #[test]
    fn overrides_ignore_unparseable_values() {
        let options = LogOptions::DEFAULT.with_overrides(Some("json"), Some("debug"));
        assert_eq!(options.format, LogFormat::Json);
        assert_eq!(options.level, LogLevel::Debug);
        assert_eq!(
            LogOptions::DEFAULT.with_overrides(Some("bogus"), None),
            LogOptions::DEFAULT
        );
        assert_eq!(LogOptions::DEFAULT.resolved().format, LogFormat::Text);
        assert_eq!(options.resolved(), options);
    }

    #[test]
    fn init_logging_is_idempotent() {
        let options = LogOptions {
            format: LogFormat::Text,
            level: LogLevel::Error,
        };
        init_logging(&options);
        init_logging(&options);
        tracing::error!(target: "autodiff.test", "logging initialised twice");
    }
}
