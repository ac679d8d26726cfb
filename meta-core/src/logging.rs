use crate::config::LogFormat;
use tracing_subscriber::EnvFilter;

/// Initialise the global `tracing` subscriber for a `meta` process.
///
/// Respects `META_LOG_LEVEL` (falls back to `info`) and switches between a
/// human-readable and a JSON formatter per `META_LOG_FORMAT`, so a spawned
/// worker's log lines stay machine-parseable for the (out-of-scope)
/// supervising broker. Call this once, at the very start of `main`, before
/// any tracing macro.
pub fn init(log_level: &str, format: LogFormat) {
    let env_filter =
        EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(env_filter)
                .with_target(true)
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
    }
}
