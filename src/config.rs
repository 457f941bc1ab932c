//! Runtime configuration.
//!
//! Values come from the process environment, after an optional `.env` file
//! has been loaded. Every key has a default so an empty environment yields a
//! working mainnet configuration.

use std::{env, str::FromStr, time::Duration};

use anyhow::{anyhow, Context};

use crate::dto::{DeviceInfo, Feature};

pub const DEFAULT_BRIDGE_URL: &str = "https://bridge.tonapi.io/bridge";
pub const MAX_PROTOCOL_VERSION: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bridge_url: String,
    pub app_name: String,
    pub app_version: String,
    pub platform: String,
    pub max_messages: u32,
    pub retry_delay: Duration,
    pub http_timeout: Duration,
    pub message_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bridge_url: DEFAULT_BRIDGE_URL.to_string(),
            app_name: env!("CARGO_PKG_NAME").to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            platform: default_platform().to_string(),
            max_messages: 4,
            retry_delay: Duration::from_secs(5),
            http_timeout: Duration::from_secs(10),
            message_ttl: Duration::from_secs(300),
        }
    }
}

impl Config {
    /// Reads `.env` (if present) and then the `TC_*` variables.
    pub fn load() -> anyhow::Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(?path, "loaded .env");
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(url) = lookup("TC_BRIDGE_URL") {
            url::Url::parse(&url).with_context(|| format!("TC_BRIDGE_URL {url:?}"))?;
            config.bridge_url = url.trim_end_matches('/').to_string();
        }
        if let Some(name) = lookup("TC_APP_NAME") {
            config.app_name = name;
        }
        if let Some(version) = lookup("TC_APP_VERSION") {
            config.app_version = version;
        }
        if let Some(platform) = lookup("TC_PLATFORM") {
            config.platform = platform;
        }
        if let Some(max) = parse_var::<u32>(&lookup, "TC_MAX_MESSAGES")? {
            if max == 0 {
                return Err(anyhow!("TC_MAX_MESSAGES must be positive"));
            }
            config.max_messages = max;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "TC_RETRY_DELAY_SECS")? {
            if secs == 0 {
                return Err(anyhow!("TC_RETRY_DELAY_SECS must be positive"));
            }
            config.retry_delay = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "TC_HTTP_TIMEOUT_SECS")? {
            config.http_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "TC_MESSAGE_TTL_SECS")? {
            config.message_ttl = Duration::from_secs(secs);
        }

        Ok(config)
    }

    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            platform: self.platform.clone(),
            app_name: self.app_name.clone(),
            app_version: self.app_version.clone(),
            max_protocol_version: MAX_PROTOCOL_VERSION,
            features: vec![Feature::SendTransaction {
                max_messages: self.max_messages,
            }],
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("invalid {key} number {raw:?}"))
        })
        .transpose()
}

fn default_platform() -> &'static str {
    match env::consts::OS {
        "macos" => "mac",
        "ios" => "iphone",
        other => other,
    }
}
