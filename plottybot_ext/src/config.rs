use crate::protocol::DEVICE_PORT;
use std::time::Duration;
use tracing::warn;
use url::Url;

pub const DEFAULT_DISCOVERY_ORIGIN: &str = "http://192.168.178.192:3000";
pub const DEFAULT_RETRY_MS: u64 = 5000;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct PlottyConfig {
    pub discovery_origin: Url,
    pub device_port: u16,
    pub retry_delay: Duration,
    pub http_timeout: Duration,
}

impl Default for PlottyConfig {
    fn default() -> Self {
        Self {
            discovery_origin: default_origin(),
            device_port: DEVICE_PORT,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_MS),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }
}

fn default_origin() -> Url {
    match Url::parse(DEFAULT_DISCOVERY_ORIGIN) {
        Ok(url) => url,
        Err(_) => unreachable!("default discovery origin is a valid url"),
    }
}

impl PlottyConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from `lookup`; unparsable values warn and keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        let read = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(raw) = read("PLOTTY_DISCOVERY_URL") {
            match Url::parse(&raw) {
                Ok(url) => cfg.discovery_origin = url,
                Err(e) => warn!(value = %raw, error = %e, "invalid PLOTTY_DISCOVERY_URL, using default"),
            }
        }
        if let Some(raw) = read("PLOTTY_DEVICE_PORT") {
            match raw.parse::<u16>() {
                Ok(port) if port != 0 => cfg.device_port = port,
                _ => warn!(value = %raw, "invalid PLOTTY_DEVICE_PORT, using default"),
            }
        }
        if let Some(raw) = read("PLOTTY_RETRY_MS") {
            match raw.parse::<u64>() {
                Ok(ms) => cfg.retry_delay = Duration::from_millis(ms),
                Err(_) => warn!(value = %raw, "invalid PLOTTY_RETRY_MS, using default"),
            }
        }
        if let Some(raw) = read("PLOTTY_HTTP_TIMEOUT_SECS") {
            match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => cfg.http_timeout = Duration::from_secs(secs),
                _ => warn!(value = %raw, "invalid PLOTTY_HTTP_TIMEOUT_SECS, using default"),
            }
        }
        cfg
    }
}
