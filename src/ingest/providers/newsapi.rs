// src/ingest/providers/newsapi.rs
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use super::{extract_items, get_json};
use crate::config::ProviderConfig;
use crate::events::EventBus;
use crate::http::RetryingHttpClient;
use crate::ingest::types::{FetchParams, ProviderKind, SourceAdapter};

/// NewsAPI.org `top-headlines`; key sent as `X-Api-Key`, items under `articles`.
pub struct NewsApiAdapter {
    http: RetryingHttpClient,
    cfg: ProviderConfig,
    base_url: String,
}

impl NewsApiAdapter {
    pub fn new(cfg: &ProviderConfig, events: EventBus) -> reqwest::Result<Self> {
        let http = RetryingHttpClient::new(cfg.retry_policy(), events)?;
        Ok(Self::with_http(cfg, http))
    }

    pub fn with_http(cfg: &ProviderConfig, http: RetryingHttpClient) -> Self {
        let base_url = cfg
            .base_url
            .clone()
            .or_else(|| ProviderKind::NewsApi.default_base_url().map(str::to_string))
            .unwrap_or_default();
        Self {
            http,
            cfg: cfg.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn query(params: &FetchParams) -> Vec<(String, String)> {
        let mut q = Vec::new();
        if let Some(s) = &params.sources {
            q.push(("sources".to_string(), s.clone()));
        }
        if let Some(n) = params.page_size {
            q.push(("pageSize".to_string(), n.to_string()));
        }
        if let Some(term) = &params.query {
            q.push(("q".to_string(), term.clone()));
        }
        q
    }
}

#[async_trait]
impl SourceAdapter for NewsApiAdapter {
    async fn fetch_top_headlines(&self, params: &FetchParams) -> Result<Vec<Value>> {
        let Some(key) = self.cfg.api_key() else {
            tracing::debug!(target: "ingest", provider = self.name(), "no api key configured");
            return Ok(Vec::new());
        };
        let url = format!("{}/top-headlines", self.base_url);
        let headers = [("X-Api-Key".to_string(), key.to_string())];

        let payload = get_json(
            &self.http,
            self.name(),
            &url,
            &Self::query(params),
            &headers,
            self.cfg.timeout(),
        )
        .await?;
        Ok(payload
            .map(|p| extract_items(self.name(), &p, &["articles"]))
            .unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "newsapi"
    }
}
