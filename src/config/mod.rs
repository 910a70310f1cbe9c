use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::net::SocketAddr;
use std::str::FromStr;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub http_addr: String,
    pub app_mode: String,
    pub database_url: String,
    /// Without Redis the service falls back to an in-process bus and no cache.
    pub redis_url: Option<String>,
    pub db_max_connections: u32,
    pub db_connect_timeout_seconds: u64,
    pub db_idle_timeout_seconds: u64,
    pub db_max_lifetime_seconds: u64,
    /// Applied on startup when set.
    pub migrations_dir: Option<String>,
    pub admin_token: Option<String>,
    pub paseto_access_key: [u8; 32],
    pub unread_cache_ttl_seconds: u64,
    pub stream_keepalive_seconds: u64,
    pub stream_buffer: usize,
    pub notification_retention_days: u32,
    pub cleanup_interval_seconds: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let http_addr = env_or("HTTP_ADDR", "0.0.0.0:8080");
        let _parsed_http_addr = SocketAddr::from_str(&http_addr)
            .map_err(|err| anyhow!("invalid HTTP_ADDR: {}", err))?;
        let app_mode = env_or("APP_MODE", "api");

        let stream_keepalive_seconds: u64 = env_or_parse("STREAM_KEEPALIVE_SECONDS", "30")?;
        if stream_keepalive_seconds == 0 {
            return Err(anyhow!("invalid STREAM_KEEPALIVE_SECONDS: must be positive"));
        }
        let stream_buffer: usize = env_or_parse("STREAM_BUFFER", "64")?;
        if stream_buffer == 0 {
            return Err(anyhow!("invalid STREAM_BUFFER: must be positive"));
        }
        let unread_cache_ttl_seconds: u64 = env_or_parse("UNREAD_CACHE_TTL_SECONDS", "300")?;
        if unread_cache_ttl_seconds == 0 {
            return Err(anyhow!("invalid UNREAD_CACHE_TTL_SECONDS: must be positive"));
        }
        let notification_retention_days: u32 = env_or_parse("NOTIFICATION_RETENTION_DAYS", "90")?;
        if notification_retention_days == 0 {
            return Err(anyhow!("invalid NOTIFICATION_RETENTION_DAYS: must be positive"));
        }
        let cleanup_interval_seconds: u64 = env_or_parse("CLEANUP_INTERVAL_SECONDS", "3600")?;
        if cleanup_interval_seconds == 0 {
            return Err(anyhow!("invalid CLEANUP_INTERVAL_SECONDS: must be positive"));
        }

        Ok(Self {
            http_addr,
            app_mode,
            database_url: env_or_err("DATABASE_URL")?,
            redis_url: std::env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
            db_max_connections: env_or_parse("DB_MAX_CONNECTIONS", "25")?,
            db_connect_timeout_seconds: env_or_parse("DB_CONNECT_TIMEOUT_SECONDS", "5")?,
            db_idle_timeout_seconds: env_or_parse("DB_IDLE_TIMEOUT_SECONDS", "300")?,
            db_max_lifetime_seconds: env_or_parse("DB_MAX_LIFETIME_SECONDS", "1800")?,
            migrations_dir: std::env::var("MIGRATIONS_DIR").ok().filter(|dir| !dir.is_empty()),
            admin_token: std::env::var("ADMIN_TOKEN").ok(),
            paseto_access_key: env_key_32("PASETO_ACCESS_KEY")?,
            unread_cache_ttl_seconds,
            stream_keepalive_seconds,
            stream_buffer,
            notification_retention_days,
            cleanup_interval_seconds,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_err(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| anyhow!("missing required env var: {}", key))
}

fn env_or_parse<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let value = std::env::var(key).unwrap_or_else(|_| default.to_string());
    value
        .parse::<T>()
        .map_err(|err| anyhow!("invalid {}: {}", key, err))
}

fn env_key_32(key: &str) -> Result<[u8; 32]> {
    let value = env_or_err(key)?;
    let decoded = STANDARD
        .decode(value.as_bytes())
        .map_err(|err| anyhow!("invalid {}: {}", key, err))?;
    if decoded.len() != 32 {
        return Err(anyhow!("invalid {}: expected 32 bytes", key));
    }
    let mut key_bytes = [0u8; 32];
    key_bytes.copy_from_slice(&decoded);
    Ok(key_bytes)
}
