// Client-side defaults and transport configuration helpers.
use anyhow::{Context, Result};
use respmux_transport::TransportConfig;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

pub(crate) const DEFAULT_KEEPALIVE_INTERVAL_MS: u64 = 5_000;
pub(crate) const DEFAULT_READ_TIMEOUT_MS: u64 = 10_000;
pub(crate) const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Hard cap on bytes buffered while waiting for one frame to complete.
///
/// Override with `RESPMUX_MAX_FRAME_BYTES`.
pub(crate) const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024 * 1024; // 64 MiB

/// Settings for a pub/sub connection.
///
/// ```
/// use respmux_client::PubSubConfig;
///
/// let config = PubSubConfig::default();
/// assert_eq!(config.keepalive_interval.as_secs(), 5);
/// assert!(config.transport_config().read_timeout.is_some());
/// ```
#[derive(Debug, Clone)]
pub struct PubSubConfig {
    // Zero disables the keepalive task.
    pub keepalive_interval: Duration,
    // Zero means reads never time out.
    pub read_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_frame_bytes: usize,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
struct PubSubConfigOverride {
    keepalive_interval_ms: Option<u64>,
    read_timeout_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
    max_frame_bytes: Option<usize>,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_millis(DEFAULT_KEEPALIVE_INTERVAL_MS),
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl PubSubConfig {
    pub fn from_env_or_yaml(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::from_env();
        let override_path = config_path
            .map(|value| value.to_string())
            .or_else(|| std::env::var("RESPMUX_CLIENT_CONFIG").ok());
        if let Some(path) = override_path.as_deref() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("read client config: {path}"))?;
            let override_cfg: PubSubConfigOverride =
                serde_yaml::from_str(&contents).context("parse client config yaml")?;
            override_cfg.apply(&mut config);
        }
        Ok(config)
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();
        // Zero is meaningful for both intervals, so these accept it.
        if let Some(value) = read_u64_env("RESPMUX_KEEPALIVE_INTERVAL_MS") {
            config.keepalive_interval = Duration::from_millis(value);
        }
        if let Some(value) = read_u64_env("RESPMUX_READ_TIMEOUT_MS") {
            config.read_timeout = Duration::from_millis(value);
        }
        if let Some(value) = read_u64_env("RESPMUX_CONNECT_TIMEOUT_MS")
            && value > 0
        {
            config.connect_timeout = Duration::from_millis(value);
        }
        if let Some(value) = read_usize_env("RESPMUX_MAX_FRAME_BYTES") {
            config.max_frame_bytes = value;
        }
        config
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            read_timeout: (!self.read_timeout.is_zero()).then_some(self.read_timeout),
            connect_timeout: self.connect_timeout,
            max_frame_bytes: self.max_frame_bytes,
        }
    }

    pub(crate) fn keepalive(&self) -> Option<Duration> {
        (!self.keepalive_interval.is_zero()).then_some(self.keepalive_interval)
    }
}

impl PubSubConfigOverride {
    fn apply(&self, config: &mut PubSubConfig) {
        if let Some(value) = self.keepalive_interval_ms {
            config.keepalive_interval = Duration::from_millis(value);
        }
        if let Some(value) = self.read_timeout_ms {
            config.read_timeout = Duration::from_millis(value);
        }
        if let Some(value) = self.connect_timeout_ms
            && value > 0
        {
            config.connect_timeout = Duration::from_millis(value);
        }
        if let Some(value) = self.max_frame_bytes
            && value > 0
        {
            config.max_frame_bytes = value;
        }
    }
}

fn read_u64_env(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
}

fn read_usize_env(key: &str) -> Option<usize> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
}
