// src/ingest/providers/nyt.rs
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use super::{extract_items, get_json};
use crate::config::ProviderConfig;
use crate::events::EventBus;
use crate::http::RetryingHttpClient;
use crate::ingest::types::{FetchParams, ProviderKind, SourceAdapter};

/// NYT Top Stories (`/topstories/v2/{section}.json`); items under `results`.
pub struct NytAdapter {
    http: RetryingHttpClient,
    cfg: ProviderConfig,
    base_url: String,
}

impl NytAdapter {
    pub fn new(cfg: &ProviderConfig, events: EventBus) -> reqwest::Result<Self> {
        let http = RetryingHttpClient::new(cfg.retry_policy(), events)?;
        Ok(Self::with_http(cfg, http))
    }

    pub fn with_http(cfg: &ProviderConfig, http: RetryingHttpClient) -> Self {
        let base_url = cfg
            .base_url
            .clone()
            .or_else(|| ProviderKind::Nyt.default_base_url().map(str::to_string))
            .unwrap_or_default();
        Self {
            http,
            cfg: cfg.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, params: &FetchParams) -> String {
        let section = params
            .section
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("home");
        format!("{}/topstories/v2/{}.json", self.base_url, section)
    }
}

#[async_trait]
impl SourceAdapter for NytAdapter {
    async fn fetch_top_headlines(&self, params: &FetchParams) -> Result<Vec<Value>> {
        let Some(key) = self.cfg.api_key() else {
            tracing::debug!(target: "ingest", provider = self.name(), "no api key configured");
            return Ok(Vec::new());
        };
        let url = self.endpoint(params);
        let query = [("api-key".to_string(), key.to_string())];

        let payload = get_json(&self.http, self.name(), &url, &query, &[], self.cfg.timeout()).await?;
        Ok(payload
            .map(|p| extract_items(self.name(), &p, &["results"]))
            .unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "nytimes"
    }
}
