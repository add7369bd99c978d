//! Configuration loader for the `machinewatch` backend service.
//!
//! All runtime settings come from environment variables (with optional
//! `.env` support provided by the caller) and are loaded once into an
//! immutable [`Config`]. Optional capabilities (the realtime feed and the
//! chat assistant) are switched off by leaving their variables unset.
use std::env;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::schema::is_identifier;

/// `DATABASE_URL` value selecting the in-process store.
pub const MEMORY_STORE_URL: &str = "memory://";

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_num {
    ($var_name:expr, $ty:ty, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.trim().parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Read an optional string environment variable; blank counts as unset.
fn optional_env(var_name: &str) -> Option<String> {
    env::var(var_name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Strongly typed application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// PostgreSQL connection string, or `memory://`.
    pub db_url: String,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    pub http_port: u16,

    /// Per-request timeout applied at the HTTP boundary.
    pub request_timeout_secs: u64,

    /// Connection string for the `LISTEN` session; `None` disables live events.
    pub realtime_db_url: Option<String>,

    /// Notification channel written by the `sensor_readings` trigger.
    pub realtime_channel: String,

    /// Events buffered per live subscriber before the oldest are dropped.
    pub realtime_buffer: usize,

    /// `None` leaves the chat endpoint answering 503.
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_endpoint: String,

    /// Model call budget; always shorter than the request timeout so a slow
    /// model surfaces as an upstream error rather than a 408.
    pub gemini_timeout: Duration,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `DATABASE_URL` – PostgreSQL connection string (`memory://` for the in-process store)
///
/// Optional:
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `HTTP_PORT` – listen port (default: 8080)
/// - `REQUEST_TIMEOUT_SECS` – per-request timeout (default: 30)
/// - `REALTIME_DATABASE_URL` – connection for the change feed (unset: disabled)
/// - `REALTIME_CHANNEL` – notification channel (default: `sensor_readings_changes`)
/// - `REALTIME_BUFFER` – per-subscriber event buffer (default: 256)
/// - `GEMINI_API_KEY` – chat model key (unset: chat disabled)
/// - `GEMINI_MODEL` – model name (default: `gemini-2.5-flash`)
/// - `GEMINI_ENDPOINT` – API base URL
/// - `GEMINI_TIMEOUT_SECS` – model call timeout, below `REQUEST_TIMEOUT_SECS`
///   (default: four fifths of it)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let db_url = require_env!("DATABASE_URL");
    let db_pool_max = parse_env_num!("DB_POOL_MAX", u32, 5);
    let http_port = parse_env_num!("HTTP_PORT", u16, 8080);
    let request_timeout_secs = parse_env_num!("REQUEST_TIMEOUT_SECS", u64, 30);
    let realtime_buffer = parse_env_num!("REALTIME_BUFFER", usize, 256);

    let realtime_channel =
        optional_env("REALTIME_CHANNEL").unwrap_or_else(|| "sensor_readings_changes".to_string());
    if !is_identifier(&realtime_channel) {
        return Err(anyhow!(
            "Invalid REALTIME_CHANNEL '{}': expected a lowercase SQL identifier",
            realtime_channel
        ));
    }
    if request_timeout_secs == 0 {
        return Err(anyhow!("Invalid REQUEST_TIMEOUT_SECS: must be positive"));
    }
    if realtime_buffer == 0 {
        return Err(anyhow!("Invalid REALTIME_BUFFER: must be positive"));
    }

    let gemini_timeout_secs = env::var("GEMINI_TIMEOUT_SECS")
        .ok()
        .map(|v| v.trim().parse::<u64>())
        .transpose()
        .map_err(|e| anyhow!("Invalid GEMINI_TIMEOUT_SECS: {}", e))?;
    let gemini_timeout = model_timeout(request_timeout_secs, gemini_timeout_secs)?;

    Ok(Config {
        db_url,
        db_pool_max,
        http_port,
        request_timeout_secs,
        realtime_db_url: optional_env("REALTIME_DATABASE_URL"),
        realtime_channel,
        realtime_buffer,
        gemini_api_key: optional_env("GEMINI_API_KEY"),
        gemini_model: optional_env("GEMINI_MODEL")
            .unwrap_or_else(|| "gemini-2.5-flash".to_string()),
        gemini_endpoint: optional_env("GEMINI_ENDPOINT")
            .unwrap_or_else(|| "https://generativelanguage.googleapis.com".to_string()),
        gemini_timeout,
    })
}

/// Model call timeout for a given request timeout.
///
/// An explicit value must be positive and strictly below the request
/// timeout; otherwise four fifths of the request timeout is used.
pub fn model_timeout(request_timeout_secs: u64, explicit_secs: Option<u64>) -> Result<Duration> {
    // ---
    let request = Duration::from_secs(request_timeout_secs);
    match explicit_secs {
        None => Ok(request * 4 / 5),
        Some(0) => Err(anyhow!("Invalid GEMINI_TIMEOUT_SECS: must be positive")),
        Some(secs) if secs >= request_timeout_secs => Err(anyhow!(
            "Invalid GEMINI_TIMEOUT_SECS: {} must be below REQUEST_TIMEOUT_SECS ({})",
            secs,
            request_timeout_secs
        )),
        Some(secs) => Ok(Duration::from_secs(secs)),
    }
}

/// Hide the password part of a connection URL.
pub fn mask_db_url(url: &str) -> String {
    // ---
    let start = url.find("://").map_or(0, |p| p + 3);
    if let Some(at_pos) = url[start..].rfind('@').map(|p| p + start) {
        if let Some(colon_pos) = url[start..at_pos].find(':').map(|p| p + start) {
            return format!("{}:****{}", &url[..colon_pos], &url[at_pos..]);
        }
    }
    url.to_string()
}

impl Config {
    // ---
    pub fn uses_memory_store(&self) -> bool {
        self.db_url == MEMORY_STORE_URL
    }

    /// Log the loaded configuration with secrets masked.
    pub fn log_config(&self) {
        // ---
        let realtime = self
            .realtime_db_url
            .as_deref()
            .map_or("(disabled)".to_string(), mask_db_url);
        let gemini_key = if self.gemini_api_key.is_some() {
            "****"
        } else {
            "(disabled)"
        };

        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL          : {}", mask_db_url(&self.db_url));
        tracing::info!("  DB_POOL_MAX           : {}", self.db_pool_max);
        tracing::info!("  HTTP_PORT             : {}", self.http_port);
        tracing::info!("  REQUEST_TIMEOUT_SECS  : {}", self.request_timeout_secs);
        tracing::info!("  REALTIME_DATABASE_URL : {}", realtime);
        tracing::info!("  REALTIME_CHANNEL      : {}", self.realtime_channel);
        tracing::info!("  REALTIME_BUFFER       : {}", self.realtime_buffer);
        tracing::info!("  GEMINI_API_KEY        : {}", gemini_key);
        tracing::info!("  GEMINI_MODEL          : {}", self.gemini_model);
        tracing::info!("  GEMINI_ENDPOINT       : {}", self.gemini_endpoint);
        tracing::info!("  GEMINI_TIMEOUT        : {:?}", self.gemini_timeout);
    }
}
