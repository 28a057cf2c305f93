//! Tracing/logging setup shared by the API binary and background workers.

/// Initialize process-wide tracing with the format selected by `LOG_FORMAT`.
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(tracing::LogFormat::from_env());
}

/// Tracing configuration (filters, formatter selection).
pub mod tracing;

pub use self::tracing::LogFormat;
