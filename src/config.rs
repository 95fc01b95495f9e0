//! Environment configuration

use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Without a database URL the service runs on the in-memory store.
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub nats_url: Option<String>,
    pub seed_db: bool,
    /// Sessions idle this long are dropped and their baskets released.
    pub session_idle: Duration,
    pub session_sweep_interval: Duration,
}

impl Config {
    /// Reads the process environment. `.env` is expected to be loaded already.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let config = Self {
            port: parse(&lookup, "PORT", 8083)?,
            database_url: lookup("DATABASE_URL").filter(|v| !v.is_empty()),
            max_connections: parse(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
            nats_url: lookup("NATS_URL").filter(|v| !v.is_empty()),
            seed_db: parse(&lookup, "SEED_DB", false)?,
            session_idle: Duration::from_secs(parse(&lookup, "SESSION_IDLE_SECS", 14 * 24 * 3600)?),
            session_sweep_interval: Duration::from_secs(parse(&lookup, "SESSION_SWEEP_SECS", 300)?),
        };
        if config.session_sweep_interval.is_zero() {
            return Err(ConfigError::Invalid { key: "SESSION_SWEEP_SECS", reason: "must be positive".into() });
        }
        info!(port = config.port, database = config.database_url.is_some(), nats = config.nats_url.is_some(), seed_db = config.seed_db, "configuration loaded");
        Ok(config)
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid { key, reason: e.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = config(&[]).unwrap();
        assert_eq!(c.port, 8083);
        assert_eq!(c.max_connections, 10);
        assert!(c.database_url.is_none());
        assert!(!c.seed_db);
        assert_eq!(c.session_idle, Duration::from_secs(1_209_600));
        assert_eq!(c.session_sweep_interval, Duration::from_secs(300));
    }

    #[test]
    fn test_overrides_and_errors() {
        let c = config(&[("PORT", "9000"), ("SEED_DB", "true"), ("DATABASE_URL", "postgres://localhost/shop"), ("NATS_URL", "")]).unwrap();
        assert_eq!(c.port, 9000);
        assert!(c.seed_db);
        assert_eq!(c.database_url.as_deref(), Some("postgres://localhost/shop"));
        assert!(c.nats_url.is_none());
        assert!(matches!(config(&[("PORT", "http")]), Err(ConfigError::Invalid { key: "PORT", .. })));
        assert_eq!(config(&[("SESSION_IDLE_SECS", "60")]).unwrap().session_idle, Duration::from_secs(60));
        assert!(matches!(config(&[("SESSION_SWEEP_SECS", "0")]), Err(ConfigError::Invalid { key: "SESSION_SWEEP_SECS", .. })));
    }
}
