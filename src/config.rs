use std::env;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    pub catalog_cache_ttl: Duration,
    pub lock_timeout: Duration,
    pub max_code_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            event_buffer_size: 1024,
            catalog_cache_ttl: Duration::from_secs(300),
            lock_timeout: Duration::from_millis(5000),
            max_code_attempts: 5,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", defaults.http_port)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", defaults.event_buffer_size)?,
            catalog_cache_ttl: Duration::from_secs(parse_or_default(
                "CATALOG_CACHE_TTL_SECS",
                defaults.catalog_cache_ttl.as_secs(),
            )?),
            lock_timeout: Duration::from_millis(parse_or_default(
                "LOCK_TIMEOUT_MS",
                defaults.lock_timeout.as_millis() as u64,
            )?),
            max_code_attempts: parse_or_default("MAX_CODE_ATTEMPTS", defaults.max_code_attempts)?,
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
