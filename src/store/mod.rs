// src/store/mod.rs
//! Storage seams consumed by the pipeline. The relational schema (sources, articles,
//! authors, categories with unique (source_id, external_id)) is owned elsewhere; these
//! traits are the operations the ingestion path needs from it.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{Article, ArticleCandidate, Author, AuthorKey, Category, Source};

pub use memory::{MemoryKeyValue, MemoryStore};

/// Projection used by the URL and fuzzy-title dedup scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleSummary {
    pub id: i64,
    pub url: Option<String>,
    pub title: Option<String>,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Whether `Transaction::find_most_similar_title` is backed by trigram similarity.
    fn supports_trigram(&self) -> bool;

    /// Open a per-item unit of work. Dropping it without `commit` discards its writes.
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError>;

    async fn get_source(&self, id: i64) -> Result<Option<Source>, StoreError>;
    async fn find_source_by_slug(&self, slug: &str) -> Result<Option<Source>, StoreError>;
    async fn first_or_create_source(&self, slug: &str, name: &str) -> Result<Source, StoreError>;
    /// Last write wins; there is no optimistic locking on sources.
    async fn save_source(&self, source: &Source) -> Result<(), StoreError>;
    async fn list_sources(&self) -> Result<Vec<Source>, StoreError>;

    async fn find_article_by_key(
        &self,
        source_id: i64,
        external_id: &str,
    ) -> Result<Option<Article>, StoreError>;
    async fn count_articles(&self) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait Transaction: Send {
    async fn find_article_by_key(
        &mut self,
        source_id: i64,
        external_id: &str,
    ) -> Result<Option<Article>, StoreError>;

    /// Highest-similarity stored title strictly above `threshold`.
    /// Stores without trigram support return `StoreError::Unsupported`.
    async fn find_most_similar_title(
        &mut self,
        title: &str,
        threshold: f64,
    ) -> Result<Option<Article>, StoreError>;

    /// Articles published at or after `since`, ascending by id.
    async fn recent_articles(
        &mut self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ArticleSummary>, StoreError>;

    async fn get_article(&mut self, id: i64) -> Result<Option<Article>, StoreError>;

    /// Fails with `StoreError::UniqueViolation` when (source_id, external_id) is taken.
    async fn insert_article(&mut self, candidate: &ArticleCandidate)
        -> Result<Article, StoreError>;

    async fn update_article(&mut self, article: &Article) -> Result<(), StoreError>;

    async fn first_or_create_author(
        &mut self,
        key: &AuthorKey,
        name: &str,
    ) -> Result<Author, StoreError>;

    async fn first_or_create_category(
        &mut self,
        slug: &str,
        name: &str,
    ) -> Result<Category, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Shared key/value store with expiry, used for cycle and message idempotency.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration)
        -> Result<(), StoreError>;
}
