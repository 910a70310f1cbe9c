//! Configuration Tests
//!
//! Everything runs in one test since the environment is process-wide.

use herald::config::AppConfig;

const ACCESS_KEY: &str = "MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=";

const POSITIVE_SETTINGS: [&str; 5] = [
    "STREAM_KEEPALIVE_SECONDS",
    "STREAM_BUFFER",
    "CLEANUP_INTERVAL_SECONDS",
    "UNREAD_CACHE_TTL_SECONDS",
    "NOTIFICATION_RETENTION_DAYS",
];

#[test]
fn from_env_validates_settings() {
    std::env::set_var("DATABASE_URL", "postgres://localhost/herald");
    std::env::set_var("PASETO_ACCESS_KEY", ACCESS_KEY);
    for key in POSITIVE_SETTINGS {
        std::env::remove_var(key);
    }
    std::env::remove_var("MIGRATIONS_DIR");

    let config = AppConfig::from_env().unwrap();
    assert_eq!(config.unread_cache_ttl_seconds, 300);
    assert_eq!(config.notification_retention_days, 90);
    assert!(config.migrations_dir.is_none());

    for key in POSITIVE_SETTINGS {
        std::env::set_var(key, "0");
        let err = AppConfig::from_env().unwrap_err();
        assert!(err.to_string().contains(key), "{}: {}", key, err);
        std::env::remove_var(key);
    }

    std::env::set_var("UNREAD_CACHE_TTL_SECONDS", "1");
    std::env::set_var("NOTIFICATION_RETENTION_DAYS", "1");
    std::env::set_var("MIGRATIONS_DIR", "migrations");
    let config = AppConfig::from_env().unwrap();
    assert_eq!(config.unread_cache_ttl_seconds, 1);
    assert_eq!(config.notification_retention_days, 1);
    assert_eq!(config.migrations_dir.as_deref(), Some("migrations"));

    std::env::remove_var("PASETO_ACCESS_KEY");
    assert!(AppConfig::from_env().is_err());
}
