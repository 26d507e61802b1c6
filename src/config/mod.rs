//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or
//! malformed. The database URL carries credentials, so it is held as a
//! `SecretString` to keep it out of logs.

pub mod secrets;

use crate::error::{Error, Result};
use crate::model::DEFAULT_BATCH_LIMIT;
use secrecy::SecretString;
use std::time::Duration;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// Upper bound on items selected into one batch.
    pub batch_size: usize,
    /// How long an idle worker sleeps when no NOTIFY arrives.
    pub poll_interval: Duration,
    pub max_connections: u32,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url = lookup("DATABASE_URL").ok_or_else(|| {
            Error::Config("required environment variable DATABASE_URL is not set".to_string())
        })?;

        Ok(Self {
            database_url: SecretString::from(database_url),
            otel_endpoint: lookup("OTEL_ENDPOINT").filter(|s| !s.is_empty()),
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            batch_size: parse_var(&lookup, "POSTQUEUE_BATCH_SIZE", DEFAULT_BATCH_LIMIT)?,
            poll_interval: Duration::from_secs(parse_var(
                &lookup,
                "POSTQUEUE_POLL_INTERVAL_SECS",
                5,
            )?),
            max_connections: parse_var(&lookup, "POSTQUEUE_MAX_CONNECTIONS", 10)?,
        })
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("invalid value for {name} ({raw:?}): {e}"))),
        None => Ok(default),
    }
}
