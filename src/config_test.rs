use std::sync::Mutex;

use super::*;

/// Serializes the tests in this file; they share the process environment.
static ENV_LOCK: Mutex<()> = Mutex::new(());

const KEYS: &[&str] = &[
    "PORT",
    "DATABASE_URL",
    "DB_MAX_CONNECTIONS",
    "DB_ACQUIRE_TIMEOUT_MS",
    "SWEEP_INTERVAL_MS",
    "REQUEST_TIMEOUT_MS",
    "MAX_POLLS_PER_ROOM",
    "DEFAULT_POLL_DURATION_SECS",
    "BAN_DURATION_MINUTES",
    "MAX_MESSAGE_LEN",
    "CLIENT_CHANNEL_CAPACITY",
];

/// # Safety
/// Callers hold `ENV_LOCK`; no other test in the crate mutates these keys.
unsafe fn clear_env() {
    for key in KEYS {
        unsafe { std::env::remove_var(key) };
    }
}

#[test]
fn from_env_defaults_match_default_impl() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    unsafe { clear_env() };

    let cfg = Config::from_env();
    assert_eq!(cfg, Config::default());
    assert!(cfg.database.is_none());
    assert_eq!(cfg.max_polls_per_room, 15);
    assert_eq!(cfg.ban_duration_ms(), 600_000);
    assert_eq!(cfg.sweep_interval, Duration::from_secs(5));
}

#[test]
fn from_env_parses_overrides() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    unsafe {
        clear_env();
        std::env::set_var("PORT", "8080");
        std::env::set_var("DATABASE_URL", "postgres://u:p@localhost/livepoll");
        std::env::set_var("DB_MAX_CONNECTIONS", "9");
        std::env::set_var("SWEEP_INTERVAL_MS", "250");
        std::env::set_var("MAX_POLLS_PER_ROOM", "3");
        std::env::set_var("BAN_DURATION_MINUTES", "2");
    }

    let cfg = Config::from_env();
    assert_eq!(cfg.port, 8080);
    let db = cfg.database.as_ref().expect("database configured");
    assert_eq!(db.url, "postgres://u:p@localhost/livepoll");
    assert_eq!(db.max_connections, 9);
    assert_eq!(db.acquire_timeout, Duration::from_millis(DEFAULT_DB_ACQUIRE_TIMEOUT_MS));
    assert_eq!(cfg.sweep_interval, Duration::from_millis(250));
    assert_eq!(cfg.max_polls_per_room, 3);
    assert_eq!(cfg.ban_duration_ms(), 120_000);

    unsafe { clear_env() };
}

#[test]
fn from_env_ignores_unparseable_values() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    unsafe {
        clear_env();
        std::env::set_var("PORT", "not-a-port");
        std::env::set_var("DATABASE_URL", "   ");
        std::env::set_var("MAX_MESSAGE_LEN", "-4");
    }

    let cfg = Config::from_env();
    assert_eq!(cfg.port, DEFAULT_PORT);
    assert!(cfg.database.is_none(), "blank DATABASE_URL selects the memory store");
    assert_eq!(cfg.max_message_len, DEFAULT_MAX_MESSAGE_LEN);

    unsafe { clear_env() };
}
