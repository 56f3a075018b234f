// src/config.rs
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::http::RetryPolicy;

const ENV_PATH: &str = "NEWS_CONFIG_PATH";
const DEFAULT_PATH: &str = "config/news.toml";

/// Retry/timeout knobs and credentials for one provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// API key; absent means the adapter returns no items.
    pub key: Option<String>,
    /// Override for the provider's base URL (tests point this at a mock server).
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_sleep_ms: u64,
    pub retry_max_sleep_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            key: None,
            base_url: None,
            timeout_secs: 10,
            retry_attempts: 3,
            retry_sleep_ms: 100,
            retry_max_sleep_ms: 2000,
        }
    }
}

impl ProviderConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_millis(self.retry_sleep_ms),
            Duration::from_millis(self.retry_max_sleep_ms),
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Key with surrounding whitespace removed; blank keys count as absent.
    pub fn api_key(&self) -> Option<&str> {
        self.key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub batch_size: u32,
    /// Failures (cycle or item level) before the source is disabled.
    pub failure_threshold: u32,
    /// How long a cycle idempotency key suppresses re-runs.
    pub cycle_ttl_secs: u64,
    pub fetch_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            failure_threshold: 3,
            cycle_ttl_secs: 3600,
            fetch_interval_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Allow the trigram strategy when the store supports it.
    pub use_trigram: bool,
    pub trigram_threshold: f64,
    pub recent_window_days: i64,
    /// Maximum edit distance relative to the longer title.
    pub fuzzy_ratio: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            use_trigram: false,
            trigram_threshold: 0.4,
            recent_window_days: 90,
            fuzzy_ratio: 0.2,
        }
    }
}

/// Which broker the binary wires up. Networked transports plug in behind `MessageBroker`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerDriver {
    /// Queues live in the running process.
    #[default]
    Memory,
    /// Publishes are logged and dropped.
    Null,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    pub driver: BrokerDriver,
    pub dlq_prefix: String,
    pub idempotency_ttl_secs: u64,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            driver: BrokerDriver::default(),
            dlq_prefix: "dlq.".to_string(),
            idempotency_ttl_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub newsapi: ProviderConfig,
    pub guardian: ProviderConfig,
    pub nyt: ProviderConfig,
    pub pipeline: PipelineConfig,
    pub dedup: DedupConfig,
    pub messaging: MessagingConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    /// Parse a TOML config file. Missing sections fall back to defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Load config using env var + fallbacks, then apply env overrides:
    /// 1) $NEWS_CONFIG_PATH
    /// 2) config/news.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("NEWS_CONFIG_PATH points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else {
            let fallback = PathBuf::from(DEFAULT_PATH);
            if fallback.exists() {
                Self::load_from(&fallback)?
            } else {
                Self::default()
            }
        };
        cfg.apply_env(|k| std::env::var(k).ok())?;
        Ok(cfg)
    }

    /// Apply the environment overrides. `lookup` is injected so tests need not touch the process env.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(k) = lookup("NEWSAPI_KEY") {
            self.newsapi.key = Some(k);
        }
        if let Some(k) = lookup("GUARDIAN_API_KEY") {
            self.guardian.key = Some(k);
        }
        if let Some(k) = lookup("NYT_API_KEY") {
            self.nyt.key = Some(k);
        }

        let providers = [&mut self.newsapi, &mut self.guardian, &mut self.nyt];
        let timeout: Option<u64> = parse_env(&lookup, "NEWS_TIMEOUT")?;
        let attempts: Option<u32> = parse_env(&lookup, "NEWS_RETRY_ATTEMPTS")?;
        let sleep: Option<u64> = parse_env(&lookup, "NEWS_RETRY_SLEEP_MS")?;
        let max_sleep: Option<u64> = parse_env(&lookup, "NEWS_RETRY_MAX_SLEEP_MS")?;
        for p in providers {
            if let Some(v) = timeout {
                p.timeout_secs = v;
            }
            if let Some(v) = attempts {
                p.retry_attempts = v;
            }
            if let Some(v) = sleep {
                p.retry_sleep_ms = v;
            }
            if let Some(v) = max_sleep {
                p.retry_max_sleep_ms = v;
            }
        }

        if let Some(v) = parse_env(&lookup, "NEWS_BATCH_SIZE")? {
            self.pipeline.batch_size = v;
        }
        if let Some(v) = parse_env(&lookup, "NEWS_FAILURE_THRESHOLD")? {
            self.pipeline.failure_threshold = v;
        }
        if let Some(v) = parse_env(&lookup, "NEWS_FETCH_INTERVAL_SECS")? {
            self.pipeline.fetch_interval_secs = v;
        }
        if let Some(v) = lookup("NEWS_USE_PG_TRGM") {
            self.dedup.use_trigram = matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        if let Some(v) = lookup("MESSAGING_DRIVER") {
            self.messaging.driver = match v.trim().to_ascii_lowercase().as_str() {
                "memory" => BrokerDriver::Memory,
                "null" => BrokerDriver::Null,
                _ => return Err(anyhow!("invalid value for MESSAGING_DRIVER: {v:?}")),
            };
        }
        if let Some(v) = lookup("MESSAGING_DLQ_PREFIX") {
            self.messaging.dlq_prefix = v;
        }
        if let Some(v) = parse_env(&lookup, "MESSAGING_IDEMPOTENCY_TTL")? {
            self.messaging.idempotency_ttl_secs = v;
        }
        if let Some(v) = lookup("NEWS_BIND_ADDR") {
            self.server.bind_addr = v;
        }
        Ok(())
    }
}

fn parse_env<F, T>(lookup: &F, name: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("invalid value for {name}: {raw:?}")),
    }
}
