use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Error type for configuration operations — same shape as the data-layer
/// and RPC error enums in this codebase (hand-written `Display`/`Error`,
/// no `thiserror`).
#[derive(Debug)]
pub enum ConfigError {
    TypeMismatch { key: String, expected: &'static str },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::TypeMismatch { key, expected } => {
                write!(f, "config env var '{key}' could not be parsed as {expected}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// The environment-variable inputs this process consumes, plus the ambient
/// defaults layered on top of them. There is no YAML/file config layer
/// here — every setting comes from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// `SESSION_DB_PATH` — path to the durable checkpoint store. Default `session.db`.
    pub session_db_path: PathBuf,
    /// `META_LOG_FORMAT` — `pretty` or `json`. Default `pretty`.
    pub log_format: LogFormat,
    /// `META_LOG_LEVEL` — passed through to `tracing_subscriber::EnvFilter`. Default `info`.
    pub log_level: String,
    /// `META_GLOBAL_PERMIT_BUDGET` — the Permit Executor's global cap. Default 100.
    pub global_permit_budget: u32,
    /// `META_RPC_TIMEOUT_MS` — default outbound RPC deadline. Default 30s.
    pub rpc_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Config {
    /// Load configuration from the process environment, falling back to
    /// documented defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let session_db_path = env::var("SESSION_DB_PATH")
            .unwrap_or_else(|_| "session.db".to_string())
            .into();

        let log_format = match env::var("META_LOG_FORMAT") {
            Ok(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            Ok(v) if v.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            Ok(other) => {
                return Err(ConfigError::TypeMismatch {
                    key: format!("META_LOG_FORMAT={other}"),
                    expected: "'pretty' or 'json'",
                })
            }
            Err(_) => LogFormat::Pretty,
        };

        let log_level = env::var("META_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let global_permit_budget = parse_env_or("META_GLOBAL_PERMIT_BUDGET", 100)?;
        let rpc_timeout_ms: u64 = parse_env_or("META_RPC_TIMEOUT_MS", 30_000)?;

        Ok(Config {
            session_db_path,
            log_format,
            log_level,
            global_permit_budget,
            rpc_timeout: Duration::from_millis(rpc_timeout_ms),
        })
    }
}

fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::TypeMismatch {
            key: key.to_string(),
            expected: std::any::type_name::<T>(),
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial(meta_core_env)]
    fn defaults_when_unset() {
        for key in [
            "SESSION_DB_PATH",
            "META_LOG_FORMAT",
            "META_LOG_LEVEL",
            "META_GLOBAL_PERMIT_BUDGET",
            "META_RPC_TIMEOUT_MS",
        ] {
            env::remove_var(key);
        }
        let config = Config::from_env().unwrap();
        assert_eq!(config.session_db_path, PathBuf::from("session.db"));
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.global_permit_budget, 100);
        assert_eq!(config.rpc_timeout, Duration::from_secs(30));
    }

    #[test]
    #[serial(meta_core_env)]
    fn reads_overrides() {
        env::set_var("SESSION_DB_PATH", "/tmp/custom.db");
        env::set_var("META_LOG_FORMAT", "json");
        env::set_var("META_GLOBAL_PERMIT_BUDGET", "5");
        env::set_var("META_RPC_TIMEOUT_MS", "1500");

        let config = Config::from_env().unwrap();
        assert_eq!(config.session_db_path, PathBuf::from("/tmp/custom.db"));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.global_permit_budget, 5);
        assert_eq!(config.rpc_timeout, Duration::from_millis(1500));

        env::remove_var("SESSION_DB_PATH");
        env::remove_var("META_LOG_FORMAT");
        env::remove_var("META_GLOBAL_PERMIT_BUDGET");
        env::remove_var("META_RPC_TIMEOUT_MS");
    }

    #[test]
    #[serial(meta_core_env)]
    fn rejects_unparseable_budget() {
        env::set_var("META_GLOBAL_PERMIT_BUDGET", "not-a-number");
        assert!(Config::from_env().is_err());
        env::remove_var("META_GLOBAL_PERMIT_BUDGET");
    }
}
