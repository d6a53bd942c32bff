//! Process configuration loaded from the environment.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::encoder::EncoderSettings;
use crate::error::{Error, Result};

/// Runtime configuration for the server.
#[derive(Clone, Debug)]
pub struct Config {
    /// PostgreSQL connection string (`DATABASE_URL`, required).
    pub database_url: String,
    /// Address the HTTP server binds to (`LISTEN_ADDR`).
    pub listen_addr: SocketAddr,
    /// Pool size (`DB_MAX_CONNECTIONS`).
    pub max_connections: u32,
    /// How long a request waits for a pooled connection (`DB_ACQUIRE_TIMEOUT_SECS`).
    pub acquire_timeout: Duration,
    /// Largest accepted request body in bytes (`MAX_BODY_BYTES`).
    pub max_body_bytes: usize,
    /// Response stream framing and compression.
    pub encoder: EncoderSettings,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// A `.env` file in the working directory is read first if present.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| Error::Config("DATABASE_URL environment variable is required".to_string()))?;

        let defaults = EncoderSettings::default();
        let encoder = EncoderSettings {
            batch_size: parse(&lookup, "STREAM_BATCH_SIZE", defaults.batch_size)?,
            flush_records: parse(&lookup, "STREAM_FLUSH_RECORDS", defaults.flush_records)?,
            compression_level: parse(&lookup, "GZIP_LEVEL", defaults.compression_level)?,
        };
        if encoder.batch_size == 0 {
            return Err(Error::Config("STREAM_BATCH_SIZE must be at least 1".to_string()));
        }
        if encoder.flush_records == 0 {
            return Err(Error::Config("STREAM_FLUSH_RECORDS must be at least 1".to_string()));
        }
        if encoder.compression_level > 9 {
            return Err(Error::Config(format!(
                "GZIP_LEVEL must be between 0 and 9, got {}",
                encoder.compression_level
            )));
        }

        Ok(Self {
            database_url,
            listen_addr: parse(&lookup, "LISTEN_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            max_connections: parse(&lookup, "DB_MAX_CONNECTIONS", 10)?,
            acquire_timeout: Duration::from_secs(parse(&lookup, "DB_ACQUIRE_TIMEOUT_SECS", 5)?),
            max_body_bytes: parse(&lookup, "MAX_BODY_BYTES", 1024 * 1024)?,
            encoder,
        })
    }
}

fn parse<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid {} '{}': {}", key, raw, e))),
        None => Ok(default),
    }
}
