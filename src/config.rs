use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::retry::BackoffPolicy;
use crate::sink::RejectionPolicy;

/// Upper bound the source API accepts for one page
pub const MAX_PAGE_LIMIT: u32 = 50;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub rate_limit: RateLimits,
    #[serde(default)]
    pub relay: RelayConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// Bot credential; `TOKEN` in the environment overrides it
    #[serde(default)]
    pub token: String,
    /// Channel to poll; `CHANNEL_ID` in the environment overrides it
    #[serde(default)]
    pub channel_id: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_auth_scheme")]
    pub auth_scheme: String,
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SinkConfig {
    /// Webhook endpoint; `WEBHOOK` in the environment overrides it
    #[serde(default)]
    pub webhook_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub rejection_policy: RejectionMode,
    #[serde(default = "default_rejection_retries")]
    pub rejection_retries: u32,
    #[serde(default = "default_transport_retries")]
    pub transport_retries: u32,
    #[serde(default = "default_transport_retry_delay_ms")]
    pub transport_retry_delay_ms: u64,
}

/// What to do when the webhook permanently rejects a payload
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RejectionMode {
    #[default]
    Drop,
    Retry,
    RetryForever,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RateLimits {
    #[serde(default)]
    pub source: RateLimitConfig,
    #[serde(default)]
    pub sink: RateLimitConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    #[serde(default = "default_throttle_jitter_ms")]
    pub throttle_jitter_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

fn default_api_base() -> String {
    "https://discord.com/api/v9".to_string()
}

fn default_auth_scheme() -> String {
    "Bot".to_string()
}

fn default_page_limit() -> u32 {
    MAX_PAGE_LIMIT
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_rejection_retries() -> u32 {
    3
}

fn default_transport_retries() -> u32 {
    3
}

fn default_transport_retry_delay_ms() -> u64 {
    1000
}

fn default_max_requests() -> u32 {
    5
}

fn default_window_ms() -> u64 {
    1000
}

fn default_throttle_jitter_ms() -> u64 {
    250
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_backoff_initial_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            channel_id: String::new(),
            api_base: default_api_base(),
            auth_scheme: default_auth_scheme(),
            page_limit: default_page_limit(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            request_timeout_secs: default_request_timeout_secs(),
            rejection_policy: RejectionMode::default(),
            rejection_retries: default_rejection_retries(),
            transport_retries: default_transport_retries(),
            transport_retry_delay_ms: default_transport_retry_delay_ms(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_ms: default_window_ms(),
            throttle_jitter_ms: default_throttle_jitter_ms(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl SourceConfig {
    /// Page size clamped to what the API accepts
    pub fn page_limit(&self) -> u32 {
        self.page_limit.clamp(1, MAX_PAGE_LIMIT)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Value for the `Authorization` header
    pub fn authorization(&self) -> String {
        if self.auth_scheme.is_empty() {
            self.token.clone()
        } else {
            format!("{} {}", self.auth_scheme, self.token)
        }
    }
}

impl SinkConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn rejection_policy(&self) -> RejectionPolicy {
        match self.rejection_policy {
            RejectionMode::Drop => RejectionPolicy::Drop,
            RejectionMode::Retry => RejectionPolicy::Bounded(self.rejection_retries),
            RejectionMode::RetryForever => RejectionPolicy::Forever,
        }
    }

    /// Retry schedule for connection-level failures
    pub fn transport_backoff(&self) -> BackoffPolicy {
        BackoffPolicy::fixed(
            Duration::from_millis(self.transport_retry_delay_ms),
            self.transport_retries,
        )
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn throttle_jitter(&self) -> Duration {
        Duration::from_millis(self.throttle_jitter_ms)
    }
}

impl RelayConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Retry schedule for failed polls: grows to the ceiling then holds, forever
    pub fn poll_backoff(&self) -> BackoffPolicy {
        BackoffPolicy::exponential(
            Duration::from_millis(self.backoff_initial_ms),
            Duration::from_millis(self.backoff_max_ms),
        )
    }
}

impl Config {
    /// Load from a TOML file (if present), apply environment overrides and
    /// validate. Any error here is fatal: the relay must not start.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_toml(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            info!(
                "Config file {} not found, using defaults and environment",
                path.display()
            );
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid TOML")
    }

    /// Override credentials and endpoints from `TOKEN`, `WEBHOOK` and `CHANNEL_ID`
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(token) = non_empty("TOKEN") {
            self.source.token = token;
        }
        if let Some(channel_id) = non_empty("CHANNEL_ID") {
            self.source.channel_id = channel_id;
        }
        if let Some(webhook) = non_empty("WEBHOOK") {
            self.sink.webhook_url = webhook;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.token.trim().is_empty() {
            anyhow::bail!("Missing source credential: set TOKEN or [source] token");
        }
        if self.source.channel_id.trim().is_empty() {
            anyhow::bail!("Missing source channel: set CHANNEL_ID or [source] channel_id");
        }
        if self.sink.webhook_url.trim().is_empty() {
            anyhow::bail!("Missing webhook endpoint: set WEBHOOK or [sink] webhook_url");
        }
        validate_http_url("webhook_url", &self.sink.webhook_url)?;
        validate_http_url("api_base", &self.source.api_base)?;

        for (name, limit) in [
            ("source", &self.rate_limit.source),
            ("sink", &self.rate_limit.sink),
        ] {
            if limit.max_requests == 0 || limit.window_ms == 0 {
                anyhow::bail!(
                    "[rate_limit.{}] needs max_requests > 0 and window_ms > 0",
                    name
                );
            }
        }
        Ok(())
    }
}

fn validate_http_url(field: &str, value: &str) -> Result<()> {
    let url = url::Url::parse(value).with_context(|| format!("Invalid {}: {}", field, value))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        anyhow::bail!("{} must be an http(s) URL, got scheme '{}'", field, url.scheme());
    }
    Ok(())
}
