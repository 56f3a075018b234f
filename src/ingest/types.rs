// src/ingest/types.rs
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which provider schema a source speaks. Resolved once per source, not per item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    NewsApi,
    Guardian,
    Nyt,
    /// Sources without a provider mapping (custom adapters); best-effort field lookup.
    Generic,
}

impl ProviderKind {
    pub fn from_slug(slug: &str) -> Self {
        match slug {
            "newsapi" => ProviderKind::NewsApi,
            "theguardian" => ProviderKind::Guardian,
            "nytimes" => ProviderKind::Nyt,
            _ => ProviderKind::Generic,
        }
    }

    /// Message types hint at the provider; unknown types are read as NewsAPI-shaped.
    pub fn from_message_type(ty: &str) -> Self {
        let t = ty.to_ascii_lowercase();
        if t.contains("newsapi") {
            ProviderKind::NewsApi
        } else if t.contains("guardian") {
            ProviderKind::Guardian
        } else if t.contains("nyt") || t.contains("newyorktimes") {
            ProviderKind::Nyt
        } else {
            ProviderKind::NewsApi
        }
    }

    pub fn slug(&self) -> &'static str {
        match self {
            ProviderKind::NewsApi => "newsapi",
            ProviderKind::Guardian => "theguardian",
            ProviderKind::Nyt => "nytimes",
            ProviderKind::Generic => "generic",
        }
    }

    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            ProviderKind::NewsApi => Some("https://newsapi.org/v2"),
            ProviderKind::Guardian => Some("https://content.guardianapis.com"),
            ProviderKind::Nyt => Some("https://api.nytimes.com/svc"),
            ProviderKind::Generic => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorCandidate {
    pub name: String,
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCandidate {
    pub name: String,
    pub slug: String,
}

/// Canonical article shape produced by normalization. Lives for one fetch cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedArticle {
    /// Provider-stable id, synthesized from the payload when the provider has none.
    pub external_id: String,
    pub title: Option<String>,
    pub excerpt: Option<String>,
    pub body: Option<String>,
    pub url: Option<String>,
    pub image_url: Option<String>,
    /// ISO-8601 as delivered by the provider.
    pub published_at: Option<String>,
    pub author: Option<AuthorCandidate>,
    pub category: Option<CategoryCandidate>,
    /// The full original item.
    pub raw_json: Value,
}

/// Query knobs passed to an adapter; each provider reads the ones it understands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchParams {
    pub sources: Option<String>,
    pub page_size: Option<u32>,
    pub section: Option<String>,
    pub query: Option<String>,
}

/// Fetches raw listings from one provider.
///
/// Bad HTTP statuses and a missing API key yield `Ok(vec![])`; only transport or
/// payload-parse failures are errors.
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    async fn fetch_top_headlines(&self, params: &FetchParams) -> Result<Vec<Value>>;
    fn name(&self) -> &'static str;
}
