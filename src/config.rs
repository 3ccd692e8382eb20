//! Environment-based configuration.
//!
//! Only the geolocation key, outbound timeout, server bind address and
//! logging are configurable. Currencies, prices and the cache lifetime
//! are compiled in.

use crate::logging::{LogConfig, LogFormat};
use crate::pricing::providers::DEFAULT_HTTP_TIMEOUT;
use crate::pricing::PricingError;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Full application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// ipstack access key; geolocation is skipped without it
    pub ipstack_api_key: Option<String>,
    /// Timeout applied to every upstream call
    pub http_timeout: Duration,
    pub server: ServerConfig,
    pub log: LogConfig,
}

/// HTTP server bind settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ipstack_api_key: None,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            server: ServerConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from the process environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self, PricingError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(PricingError::Config(format!(".env: {}", e)));
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from a specific dotenv file only, ignoring the process environment.
    pub fn from_env_file(path: &Path) -> Result<Self, PricingError> {
        let vars = dotenvy::from_path_iter(path)
            .map_err(|e| PricingError::Config(format!("{}: {}", path.display(), e)))?
            .collect::<Result<HashMap<String, String>, _>>()
            .map_err(|e| PricingError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, PricingError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let http_timeout = match non_empty("PRICING_HTTP_TIMEOUT_SECS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(PricingError::Config(format!(
                        "PRICING_HTTP_TIMEOUT_SECS must be a positive integer, got '{}'",
                        raw
                    )))
                }
            },
            None => defaults.http_timeout,
        };

        let port = match non_empty("BODYVERSE_PORT") {
            Some(raw) => raw.trim().parse::<u16>().map_err(|_| {
                PricingError::Config(format!("BODYVERSE_PORT must be a port number, got '{}'", raw))
            })?,
            None => defaults.server.port,
        };

        let format = match non_empty("LOG_FORMAT") {
            Some(raw) => raw.parse::<LogFormat>().map_err(PricingError::Config)?,
            None => defaults.log.format,
        };

        Ok(Self {
            ipstack_api_key: non_empty("IPSTACK_API_KEY").map(|k| k.trim().to_string()),
            http_timeout,
            server: ServerConfig {
                host: non_empty("BODYVERSE_HOST").unwrap_or(defaults.server.host),
                port,
            },
            log: LogConfig {
                level: non_empty("RUST_LOG").unwrap_or(defaults.log.level),
                format,
            },
        })
    }
}
