// tests/common/mod.rs
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;

use news_aggregator::config::{DedupConfig, PipelineConfig};
use news_aggregator::error::StoreError;
use news_aggregator::events::{EventBus, EventListener, HttpAttempt, IngestEvent, SourceFetchFailed};
use news_aggregator::ingest::providers::AdapterRegistry;
use news_aggregator::ingest::types::{FetchParams, SourceAdapter};
use news_aggregator::ingest::FetchWorker;
use news_aggregator::models::{Article, ArticleCandidate, Author, AuthorKey, Category, Source};
use news_aggregator::store::{
    ArticleSummary, KeyValueStore, MemoryKeyValue, MemoryStore, Store, Transaction,
};

pub fn fixture(name: &str) -> Value {
    let raw = std::fs::read_to_string(format!("tests/fixtures/{name}")).expect("fixture");
    serde_json::from_str(&raw).expect("fixture json")
}

/// Plays back scripted responses, then keeps returning `fallback`.
pub struct ScriptedAdapter {
    script: Mutex<VecDeque<Result<Vec<Value>, String>>>,
    fallback: Vec<Value>,
    calls: AtomicUsize,
    pub last_params: Mutex<Option<FetchParams>>,
}

impl ScriptedAdapter {
    pub fn returning(items: Vec<Value>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: items,
            calls: AtomicUsize::new(0),
            last_params: Mutex::new(None),
        }
    }

    pub fn then_fail(self, error: &str) -> Self {
        self.script.lock().push_back(Err(error.to_string()));
        self
    }

    pub fn then_items(self, items: Vec<Value>) -> Self {
        self.script.lock().push_back(Ok(items));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for ScriptedAdapter {
    async fn fetch_top_headlines(&self, params: &FetchParams) -> Result<Vec<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_params.lock() = Some(params.clone());
        match self.script.lock().pop_front() {
            Some(Ok(items)) => Ok(items),
            Some(Err(e)) => Err(anyhow::anyhow!(e)),
            None => Ok(self.fallback.clone()),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

pub struct Harness {
    pub store: MemoryStore,
    pub kv: Arc<MemoryKeyValue>,
    pub events: Arc<CollectingListener>,
    pub worker: FetchWorker,
}

pub fn pipeline_cfg() -> PipelineConfig {
    PipelineConfig {
        failure_threshold: 3,
        ..PipelineConfig::default()
    }
}

/// Worker over `store` with `adapter` registered for `slug`.
pub fn harness(store: MemoryStore, slug: &str, adapter: Arc<dyn SourceAdapter>) -> Harness {
    harness_with(store, slug, adapter, DedupConfig::default(), pipeline_cfg())
}

pub fn harness_with(
    store: MemoryStore,
    slug: &str,
    adapter: Arc<dyn SourceAdapter>,
    dedup: DedupConfig,
    cfg: PipelineConfig,
) -> Harness {
    let mut registry = AdapterRegistry::new();
    registry.register(slug, adapter);
    let kv = Arc::new(MemoryKeyValue::new());
    let events = Arc::new(CollectingListener::new());
    let bus = EventBus::new().with_listener(events.clone());
    let worker = FetchWorker::new(
        Arc::new(store.clone()),
        kv.clone(),
        registry,
        dedup,
        bus,
        cfg,
    );
    Harness {
        store,
        kv,
        events,
        worker,
    }
}

/// A store whose next insert loses to a concurrent writer: just before the insert
/// goes through, the same candidate is written directly, outside the transaction.
#[derive(Clone)]
pub struct RacingStore {
    pub inner: MemoryStore,
    armed: Arc<AtomicBool>,
}

impl RacingStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            armed: Arc::new(AtomicBool::new(true)),
        }
    }
}

#[async_trait]
impl Store for RacingStore {
    fn supports_trigram(&self) -> bool {
        self.inner.supports_trigram()
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        Ok(Box::new(RacingTx {
            tx: self.inner.begin().await?,
            store: self.inner.clone(),
            armed: Arc::clone(&self.armed),
        }))
    }

    async fn get_source(&self, id: i64) -> Result<Option<Source>, StoreError> {
        self.inner.get_source(id).await
    }

    async fn find_source_by_slug(&self, slug: &str) -> Result<Option<Source>, StoreError> {
        self.inner.find_source_by_slug(slug).await
    }

    async fn first_or_create_source(&self, slug: &str, name: &str) -> Result<Source, StoreError> {
        self.inner.first_or_create_source(slug, name).await
    }

    async fn save_source(&self, source: &Source) -> Result<(), StoreError> {
        self.inner.save_source(source).await
    }

    async fn list_sources(&self) -> Result<Vec<Source>, StoreError> {
        self.inner.list_sources().await
    }

    async fn find_article_by_key(
        &self,
        source_id: i64,
        external_id: &str,
    ) -> Result<Option<Article>, StoreError> {
        self.inner.find_article_by_key(source_id, external_id).await
    }

    async fn count_articles(&self) -> Result<usize, StoreError> {
        self.inner.count_articles().await
    }
}

struct RacingTx {
    tx: Box<dyn Transaction>,
    store: MemoryStore,
    armed: Arc<AtomicBool>,
}

#[async_trait]
impl Transaction for RacingTx {
    async fn find_article_by_key(
        &mut self,
        source_id: i64,
        external_id: &str,
    ) -> Result<Option<Article>, StoreError> {
        self.tx.find_article_by_key(source_id, external_id).await
    }

    async fn find_most_similar_title(
        &mut self,
        title: &str,
        threshold: f64,
    ) -> Result<Option<Article>, StoreError> {
        self.tx.find_most_similar_title(title, threshold).await
    }

    async fn recent_articles(
        &mut self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ArticleSummary>, StoreError> {
        self.tx.recent_articles(since).await
    }

    async fn get_article(&mut self, id: i64) -> Result<Option<Article>, StoreError> {
        self.tx.get_article(id).await
    }

    async fn insert_article(
        &mut self,
        candidate: &ArticleCandidate,
    ) -> Result<Article, StoreError> {
        if self.armed.swap(false, Ordering::SeqCst) {
            let winner = ArticleCandidate {
                title: Some("Inserted by the other worker".to_string()),
                ..candidate.clone()
            };
            self.store.insert_article_direct(&winner)?;
        }
        self.tx.insert_article(candidate).await
    }

    async fn update_article(&mut self, article: &Article) -> Result<(), StoreError> {
        self.tx.update_article(article).await
    }

    async fn first_or_create_author(
        &mut self,
        key: &AuthorKey,
        name: &str,
    ) -> Result<Author, StoreError> {
        self.tx.first_or_create_author(key, name).await
    }

    async fn first_or_create_category(
        &mut self,
        slug: &str,
        name: &str,
    ) -> Result<Category, StoreError> {
        self.tx.first_or_create_category(slug, name).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await
    }
}

/// Records every event it sees.
#[derive(Debug, Default)]
pub struct CollectingListener {
    pub events: Mutex<Vec<IngestEvent>>,
}

impl CollectingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<IngestEvent> {
        self.events.lock().clone()
    }

    pub fn fetch_failures(&self) -> Vec<SourceFetchFailed> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                IngestEvent::SourceFetchFailed(f) => Some(f.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn http_attempts(&self) -> Vec<HttpAttempt> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                IngestEvent::HttpAttempt(a) => Some(a.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl EventListener for CollectingListener {
    async fn handle(&self, event: &IngestEvent) -> Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "collector"
    }
}
