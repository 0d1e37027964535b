//! Runtime configuration parsed from environment variables.
//!
//! Every knob has a default so the server starts with no environment at all
//! (in-memory store, port 3000). `main` loads an optional `.env` first.

use std::time::Duration;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_DB_ACQUIRE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_MAX_POLLS_PER_ROOM: i32 = 15;
pub const DEFAULT_POLL_DURATION_SECS: i64 = 60;
pub const DEFAULT_BAN_DURATION_MINUTES: i64 = 10;
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 1_000;
pub const DEFAULT_CLIENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    /// `None` selects the in-memory store.
    pub database: Option<DbConfig>,
    pub sweep_interval: Duration,
    pub request_timeout: Duration,
    pub max_polls_per_room: i32,
    pub default_poll_duration_secs: i64,
    pub ban_duration_minutes: i64,
    pub max_message_len: usize,
    pub client_channel_capacity: usize,
}

impl Config {
    /// Build config from environment variables.
    ///
    /// Optional:
    /// - `PORT`: default 3000
    /// - `DATABASE_URL`: Postgres URL; in-memory store when absent
    /// - `DB_MAX_CONNECTIONS`: default 5
    /// - `DB_ACQUIRE_TIMEOUT_MS`: default 5000
    /// - `SWEEP_INTERVAL_MS`: default 5000
    /// - `REQUEST_TIMEOUT_MS`: default 10000
    /// - `MAX_POLLS_PER_ROOM`: default 15
    /// - `DEFAULT_POLL_DURATION_SECS`: default 60
    /// - `BAN_DURATION_MINUTES`: default 10
    /// - `MAX_MESSAGE_LEN`: default 1000
    /// - `CLIENT_CHANNEL_CAPACITY`: default 256
    #[must_use]
    pub fn from_env() -> Self {
        let database = std::env::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .map(|url| DbConfig {
                url,
                max_connections: env_parse("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS),
                acquire_timeout: Duration::from_millis(env_parse(
                    "DB_ACQUIRE_TIMEOUT_MS",
                    DEFAULT_DB_ACQUIRE_TIMEOUT_MS,
                )),
            });

        Self {
            port: env_parse("PORT", DEFAULT_PORT),
            database,
            sweep_interval: Duration::from_millis(env_parse("SWEEP_INTERVAL_MS", DEFAULT_SWEEP_INTERVAL_MS).max(1)),
            request_timeout: Duration::from_millis(env_parse("REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS)),
            max_polls_per_room: env_parse("MAX_POLLS_PER_ROOM", DEFAULT_MAX_POLLS_PER_ROOM),
            default_poll_duration_secs: env_parse("DEFAULT_POLL_DURATION_SECS", DEFAULT_POLL_DURATION_SECS),
            ban_duration_minutes: env_parse("BAN_DURATION_MINUTES", DEFAULT_BAN_DURATION_MINUTES),
            max_message_len: env_parse("MAX_MESSAGE_LEN", DEFAULT_MAX_MESSAGE_LEN),
            client_channel_capacity: env_parse("CLIENT_CHANNEL_CAPACITY", DEFAULT_CLIENT_CHANNEL_CAPACITY).max(1),
        }
    }

    /// Ban window in milliseconds.
    #[must_use]
    pub fn ban_duration_ms(&self) -> i64 {
        self.ban_duration_minutes * 60_000
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            database: None,
            sweep_interval: Duration::from_millis(DEFAULT_SWEEP_INTERVAL_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            max_polls_per_room: DEFAULT_MAX_POLLS_PER_ROOM,
            default_poll_duration_secs: DEFAULT_POLL_DURATION_SECS,
            ban_duration_minutes: DEFAULT_BAN_DURATION_MINUTES,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            client_channel_capacity: DEFAULT_CLIENT_CHANNEL_CAPACITY,
        }
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
