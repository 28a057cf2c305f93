//! Tracing subscriber initialization.

use tracing_subscriber::EnvFilter;

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per line (default; what the log pipeline ingests).
    #[default]
    Json,
    /// Human-readable output for local development.
    Pretty,
}

impl LogFormat {
    /// Read `LOG_FORMAT` (`json` | `pretty`); anything else falls back to JSON.
    pub fn from_env() -> Self {
        std::env::var("LOG_FORMAT")
            .map(|v| Self::parse(&v))
            .unwrap_or_default()
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

/// Initialize tracing for the process.
///
/// Filtering is configured through `RUST_LOG` (default `info`). Safe to call
/// multiple times (subsequent calls are no-ops).
pub fn init(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .with_target(false)
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_parsing() {
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse(" TEXT "), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("whatever"), LogFormat::Json);
    }

    #[test]
    fn init_twice_is_a_noop() {
        init(LogFormat::Json);
        init(LogFormat::Pretty);
    }
}
