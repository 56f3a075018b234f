// src/ingest/providers/mod.rs
pub mod guardian;
pub mod newsapi;
pub mod nyt;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use metrics::{counter, histogram};
use serde_json::Value;

use crate::config::AppConfig;
use crate::events::EventBus;
use crate::http::RetryingHttpClient;
use crate::ingest::types::{ProviderKind, SourceAdapter};
use crate::models::Source;

pub use guardian::GuardianAdapter;
pub use newsapi::NewsApiAdapter;
pub use nyt::NytAdapter;

/// GET a provider endpoint and return its JSON body.
///
/// `Ok(None)` for a final non-2xx response (logged); `Err` for transport or decode failures.
pub(crate) async fn get_json(
    http: &RetryingHttpClient,
    provider: &'static str,
    url: &str,
    query: &[(String, String)],
    headers: &[(String, String)],
    timeout: std::time::Duration,
) -> Result<Option<Value>> {
    let t0 = Instant::now();
    let resp = http
        .get(url, query, headers, timeout)
        .await
        .with_context(|| format!("{provider}: request to {url}"))?;

    let status = resp.status();
    if !status.is_success() {
        tracing::warn!(target: "ingest", provider, url, status = status.as_u16(), "non-success response");
        return Ok(None);
    }

    let body: Value = resp
        .json()
        .await
        .with_context(|| format!("{provider}: decoding response body"))?;
    histogram!("provider_fetch_ms", "provider" => provider).record(t0.elapsed().as_secs_f64() * 1_000.0);
    Ok(Some(body))
}

/// Array at `path` inside `payload`; anything else reads as no items.
pub(crate) fn extract_items(provider: &'static str, payload: &Value, path: &[&str]) -> Vec<Value> {
    let mut cur = payload;
    for key in path {
        match cur.get(*key) {
            Some(v) => cur = v,
            None => return Vec::new(),
        }
    }
    let items = cur.as_array().cloned().unwrap_or_default();
    counter!("provider_items_total", "provider" => provider).increment(items.len() as u64);
    items
}

/// Resolves the adapter for a source: per-slug overrides first, then the provider mapping.
///
/// Jobs only carry a source id; the adapter is looked up here in the worker.
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    providers: HashMap<ProviderKind, Arc<dyn SourceAdapter>>,
    overrides: HashMap<String, Arc<dyn SourceAdapter>>,
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&str> = self.providers.keys().map(|k| k.slug()).collect();
        kinds.sort_unstable();
        let mut slugs: Vec<&str> = self.overrides.keys().map(String::as_str).collect();
        slugs.sort_unstable();
        f.debug_struct("AdapterRegistry")
            .field("providers", &kinds)
            .field("overrides", &slugs)
            .finish()
    }
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The three built-in providers, each with its own retry policy and timeout.
    pub fn from_config(cfg: &AppConfig, events: EventBus) -> Result<Self> {
        let newsapi = NewsApiAdapter::new(&cfg.newsapi, events.clone())
            .context("building newsapi client")?;
        let guardian = GuardianAdapter::new(&cfg.guardian, events.clone())
            .context("building guardian client")?;
        let nyt = NytAdapter::new(&cfg.nyt, events).context("building nyt client")?;
        Ok(Self::new()
            .with_provider(ProviderKind::NewsApi, Arc::new(newsapi))
            .with_provider(ProviderKind::Guardian, Arc::new(guardian))
            .with_provider(ProviderKind::Nyt, Arc::new(nyt)))
    }

    pub fn with_provider(mut self, kind: ProviderKind, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.providers.insert(kind, adapter);
        self
    }

    /// Use `adapter` for the source with this slug regardless of provider mapping.
    pub fn register(&mut self, slug: impl Into<String>, adapter: Arc<dyn SourceAdapter>) {
        self.overrides.insert(slug.into(), adapter);
    }

    /// Adapter plus the schema its items are normalized with.
    pub fn for_source(&self, source: &Source) -> Option<(Arc<dyn SourceAdapter>, ProviderKind)> {
        let kind = ProviderKind::from_slug(&source.slug);
        if let Some(adapter) = self.overrides.get(&source.slug) {
            return Some((Arc::clone(adapter), kind));
        }
        self.providers
            .get(&kind)
            .map(|adapter| (Arc::clone(adapter), kind))
    }
}
