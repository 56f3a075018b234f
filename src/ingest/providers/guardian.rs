// src/ingest/providers/guardian.rs
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use super::{extract_items, get_json};
use crate::config::ProviderConfig;
use crate::events::EventBus;
use crate::http::RetryingHttpClient;
use crate::ingest::types::{FetchParams, ProviderKind, SourceAdapter};

const SHOW_FIELDS: &str = "headline,trailText,thumbnail,body";

/// Guardian content API `search`; items under `response.results`.
pub struct GuardianAdapter {
    http: RetryingHttpClient,
    cfg: ProviderConfig,
    base_url: String,
}

impl GuardianAdapter {
    pub fn new(cfg: &ProviderConfig, events: EventBus) -> reqwest::Result<Self> {
        let http = RetryingHttpClient::new(cfg.retry_policy(), events)?;
        Ok(Self::with_http(cfg, http))
    }

    pub fn with_http(cfg: &ProviderConfig, http: RetryingHttpClient) -> Self {
        let base_url = cfg
            .base_url
            .clone()
            .or_else(|| ProviderKind::Guardian.default_base_url().map(str::to_string))
            .unwrap_or_default();
        Self {
            http,
            cfg: cfg.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn query(key: &str, params: &FetchParams) -> Vec<(String, String)> {
        let mut q = vec![
            ("api-key".to_string(), key.to_string()),
            ("show-fields".to_string(), SHOW_FIELDS.to_string()),
        ];
        if let Some(term) = &params.query {
            q.push(("q".to_string(), term.clone()));
        }
        if let Some(section) = &params.section {
            q.push(("section".to_string(), section.clone()));
        }
        if let Some(n) = params.page_size {
            q.push(("page-size".to_string(), n.to_string()));
        }
        q
    }
}

#[async_trait]
impl SourceAdapter for GuardianAdapter {
    async fn fetch_top_headlines(&self, params: &FetchParams) -> Result<Vec<Value>> {
        let Some(key) = self.cfg.api_key() else {
            tracing::debug!(target: "ingest", provider = self.name(), "no api key configured");
            return Ok(Vec::new());
        };
        let url = format!("{}/search", self.base_url);

        let payload = get_json(
            &self.http,
            self.name(),
            &url,
            &Self::query(key, params),
            &[],
            self.cfg.timeout(),
        )
        .await?;
        Ok(payload
            .map(|p| extract_items(self.name(), &p, &["response", "results"]))
            .unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "theguardian"
    }
}
