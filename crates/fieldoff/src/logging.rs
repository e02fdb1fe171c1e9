use std::env;
use std::fmt;

/// Output format for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    pub fn parse(spec: &str) -> Option<Self> {
        match spec.to_ascii_lowercase().as_str() {
            "text" | "plain" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
        })
    }
}

/// Logging verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn parse(spec: &str) -> Option<Self> {
        match spec.to_ascii_lowercase().as_str() {
            "error" | "err" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "trace" | "verbose" => Some(Self::Trace),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogOptions {
    pub format: LogFormat,
    pub level: LogLevel,
}

impl LogOptions {
    pub const DEFAULT: Self = Self {
        format: LogFormat::Text,
        level: LogLevel::Warn,
    };

    /// Reads `FIELDOFF_LOG_FORMAT` and `FIELDOFF_LOG_LEVEL`; unparsable values are ignored.
    #[must_use]
    pub fn from_env() -> Self {
        let format = env::var("FIELDOFF_LOG_FORMAT").ok();
        let level = env::var("FIELDOFF_LOG_LEVEL").ok();
        apply_overrides(Self::DEFAULT, format.as_deref(), level.as_deref())
    }

    /// CLI flags win over the environment.
    #[must_use]
    pub fn with_overrides(self, format: Option<LogFormat>, level: Option<LogLevel>) -> Self {
        Self {
            format: format.unwrap_or(self.format),
            level: level.unwrap_or(self.level),
        }
    }
}

impl Default for LogOptions {
    fn default() -> Self {
        Self::DEFAULT
    }
}

fn apply_overrides(mut options: LogOptions, format: Option<&str>, level: Option<&str>) -> LogOptions {
    if let Some(f) = format.and_then(LogFormat::parse) {
        options.format = f;
    }
    if let Some(l) = level.and_then(LogLevel::parse) {
        options.level = l;
    }
    options
}

/// Installs the global stderr subscriber. `FIELDOFF_LOG` takes an `EnvFilter`
/// directive and overrides the configured level. Later calls are no-ops.
pub fn init_logging(options: LogOptions) {
    use std::io::IsTerminal;
    use std::sync::OnceLock;
    use tracing_subscriber::{EnvFilter, fmt};

    static INITIALISED: OnceLock<()> = OnceLock::new();

    INITIALISED.get_or_init(|| {
        let use_ansi = env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal();
        let filter = EnvFilter::try_from_env("FIELDOFF_LOG")
            .unwrap_or_else(|_| EnvFilter::new(options.level.to_string()));
        let builder = fmt::fmt()
            .with_env_filter(filter)
            .with_ansi(use_ansi)
            .with_writer(std::io::stderr)
            .with_target(true);

        match options.format {
            LogFormat::Json => {
                let _ = tracing::subscriber::set_global_default(builder.json().finish());
            }
            LogFormat::Text => {
                let _ = tracing::subscriber::set_global_default(builder.compact().finish());
            }
        }
    });
}
