// src/store/memory.rs
//! In-process store used by the binary's default wiring and by the test-suite.
//! A transaction buffers its writes and sees them on top of committed rows; other
//! transactions only see them after `commit`. Rollback or drop discards the buffer.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{ArticleSummary, KeyValueStore, Store, Transaction};
use crate::error::StoreError;
use crate::ingest::dedup::trigram_similarity;
use crate::models::{Article, ArticleCandidate, Author, AuthorKey, Category, Source};

#[derive(Debug, Default)]
struct State {
    sources: BTreeMap<i64, Source>,
    articles: BTreeMap<i64, Article>,
    article_keys: HashMap<(i64, String), i64>,
    authors: BTreeMap<i64, Author>,
    categories: BTreeMap<i64, Category>,
    next_source_id: i64,
    next_article_id: i64,
    next_author_id: i64,
    next_category_id: i64,
}

impl State {
    fn alloc(counter: &mut i64) -> i64 {
        *counter += 1;
        *counter
    }

    fn article_by_key(&self, source_id: i64, external_id: &str) -> Option<&Article> {
        self.article_keys
            .get(&(source_id, external_id.to_string()))
            .and_then(|id| self.articles.get(id))
    }

    fn put_article(&mut self, article: Article) {
        if let Some(prev) = self.articles.get(&article.id) {
            if let Some(ext) = &prev.external_id {
                self.article_keys.remove(&(prev.source_id, ext.clone()));
            }
        }
        if let Some(ext) = &article.external_id {
            self.article_keys
                .insert((article.source_id, ext.clone()), article.id);
        }
        self.articles.insert(article.id, article);
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    trigram: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advertise trigram similarity support (mirrors a Postgres store with pg_trgm).
    pub fn with_trigram(mut self, enabled: bool) -> Self {
        self.trigram = enabled;
        self
    }

    /// Seed a source row, as an admin or seeder would.
    pub fn insert_source(&self, slug: &str, name: &str) -> Source {
        let mut st = self.state.lock();
        let id = State::alloc(&mut st.next_source_id);
        let source = Source::new(id, slug, name);
        st.sources.insert(id, source.clone());
        source
    }

    /// Snapshot of all articles, ascending by id.
    pub fn articles(&self) -> Vec<Article> {
        self.state.lock().articles.values().cloned().collect()
    }

    pub fn authors(&self) -> Vec<Author> {
        self.state.lock().authors.values().cloned().collect()
    }

    pub fn categories(&self) -> Vec<Category> {
        self.state.lock().categories.values().cloned().collect()
    }

    /// Insert an article outside of any transaction (fixtures, concurrent-writer simulation).
    pub fn insert_article_direct(&self, candidate: &ArticleCandidate) -> Result<Article, StoreError> {
        let mut st = self.state.lock();
        insert_article_locked(&mut st, candidate)
    }
}

fn insert_article_locked(st: &mut State, c: &ArticleCandidate) -> Result<Article, StoreError> {
    if let Some(ext) = &c.external_id {
        if st.article_by_key(c.source_id, ext).is_some() {
            return Err(StoreError::UniqueViolation {
                source_id: c.source_id,
                external_id: ext.clone(),
            });
        }
    }
    let article = article_from(State::alloc(&mut st.next_article_id), c);
    st.put_article(article.clone());
    Ok(article)
}

fn article_from(id: i64, c: &ArticleCandidate) -> Article {
    Article {
        id,
        source_id: c.source_id,
        external_id: c.external_id.clone(),
        title: c.title.clone(),
        excerpt: c.excerpt.clone(),
        body: c.body.clone(),
        url: c.url.clone(),
        image_url: c.image_url.clone(),
        published_at: c.published_at,
        author_id: c.author_id,
        category_id: c.category_id,
        raw_json: c.raw_json.clone(),
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn supports_trigram(&self) -> bool {
        self.trigram
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        Ok(Box::new(MemoryTx {
            state: Arc::clone(&self.state),
            trigram: self.trigram,
            pending: Pending::default(),
        }))
    }

    async fn get_source(&self, id: i64) -> Result<Option<Source>, StoreError> {
        Ok(self.state.lock().sources.get(&id).cloned())
    }

    async fn find_source_by_slug(&self, slug: &str) -> Result<Option<Source>, StoreError> {
        Ok(self
            .state
            .lock()
            .sources
            .values()
            .find(|s| s.slug == slug)
            .cloned())
    }

    async fn first_or_create_source(&self, slug: &str, name: &str) -> Result<Source, StoreError> {
        let mut st = self.state.lock();
        if let Some(found) = st.sources.values().find(|s| s.slug == slug) {
            return Ok(found.clone());
        }
        let id = State::alloc(&mut st.next_source_id);
        let source = Source::new(id, slug, name);
        st.sources.insert(id, source.clone());
        Ok(source)
    }

    async fn save_source(&self, source: &Source) -> Result<(), StoreError> {
        let mut st = self.state.lock();
        if !st.sources.contains_key(&source.id) {
            return Err(StoreError::NotFound(format!("source {}", source.id)));
        }
        st.sources.insert(source.id, source.clone());
        Ok(())
    }

    async fn list_sources(&self) -> Result<Vec<Source>, StoreError> {
        Ok(self.state.lock().sources.values().cloned().collect())
    }

    async fn find_article_by_key(
        &self,
        source_id: i64,
        external_id: &str,
    ) -> Result<Option<Article>, StoreError> {
        Ok(self
            .state
            .lock()
            .article_by_key(source_id, external_id)
            .cloned())
    }

    async fn count_articles(&self) -> Result<usize, StoreError> {
        Ok(self.state.lock().articles.len())
    }
}

/// Writes buffered by one transaction. Ids come from the shared counters, so a
/// rolled-back transaction leaves gaps the way a database sequence does.
#[derive(Debug, Default)]
struct Pending {
    /// Inserted and updated rows, keyed by id.
    articles: BTreeMap<i64, Article>,
    authors: BTreeMap<i64, Author>,
    categories: BTreeMap<i64, Category>,
}

struct MemoryTx {
    state: Arc<Mutex<State>>,
    trigram: bool,
    pending: Pending,
}

impl MemoryTx {
    /// Committed rows overlaid with this transaction's own writes, ascending by id.
    fn visible<'a>(&'a self, st: &'a State) -> BTreeMap<i64, &'a Article> {
        let mut view: BTreeMap<i64, &Article> = st.articles.iter().map(|(id, a)| (*id, a)).collect();
        for (id, a) in &self.pending.articles {
            view.insert(*id, a);
        }
        view
    }

    fn key_holder(&self, st: &State, source_id: i64, external_id: &str) -> Option<Article> {
        self.visible(st)
            .into_values()
            .find(|a| a.source_id == source_id && a.external_id.as_deref() == Some(external_id))
            .cloned()
    }
}

fn author_matches(author: &Author, key: &AuthorKey) -> bool {
    match key {
        AuthorKey::ExternalId(ext) => author.external_id.as_deref() == Some(ext.as_str()),
        AuthorKey::Name(n) => author.name == *n,
    }
}

fn author_key(author: &Author) -> AuthorKey {
    match &author.external_id {
        Some(ext) => AuthorKey::ExternalId(ext.clone()),
        None => AuthorKey::Name(author.name.clone()),
    }
}

#[async_trait]
impl Transaction for MemoryTx {
    async fn find_article_by_key(
        &mut self,
        source_id: i64,
        external_id: &str,
    ) -> Result<Option<Article>, StoreError> {
        let st = self.state.lock();
        Ok(self.key_holder(&st, source_id, external_id))
    }

    async fn find_most_similar_title(
        &mut self,
        title: &str,
        threshold: f64,
    ) -> Result<Option<Article>, StoreError> {
        if !self.trigram {
            return Err(StoreError::Unsupported("trigram similarity"));
        }
        let st = self.state.lock();
        let mut best: Option<(f64, &Article)> = None;
        for article in self.visible(&st).into_values() {
            let Some(stored) = article.title.as_deref() else {
                continue;
            };
            let score = trigram_similarity(stored, title);
            if score <= threshold {
                continue;
            }
            if best.map_or(true, |(s, _)| score > s) {
                best = Some((score, article));
            }
        }
        Ok(best.map(|(_, a)| a.clone()))
    }

    async fn recent_articles(
        &mut self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ArticleSummary>, StoreError> {
        let st = self.state.lock();
        let recent = self
            .visible(&st)
            .into_values()
            .filter(|a| a.published_at.is_some_and(|p| p >= since))
            .map(|a| ArticleSummary {
                id: a.id,
                url: a.url.clone(),
                title: a.title.clone(),
            })
            .collect();
        Ok(recent)
    }

    async fn get_article(&mut self, id: i64) -> Result<Option<Article>, StoreError> {
        if let Some(a) = self.pending.articles.get(&id) {
            return Ok(Some(a.clone()));
        }
        Ok(self.state.lock().articles.get(&id).cloned())
    }

    async fn insert_article(
        &mut self,
        c: &ArticleCandidate,
    ) -> Result<Article, StoreError> {
        let id = {
            let mut st = self.state.lock();
            if let Some(ext) = &c.external_id {
                if self.key_holder(&st, c.source_id, ext).is_some() {
                    return Err(StoreError::UniqueViolation {
                        source_id: c.source_id,
                        external_id: ext.clone(),
                    });
                }
            }
            State::alloc(&mut st.next_article_id)
        };
        let article = article_from(id, c);
        self.pending.articles.insert(id, article.clone());
        Ok(article)
    }

    async fn update_article(&mut self, article: &Article) -> Result<(), StoreError> {
        {
            let st = self.state.lock();
            let view = self.visible(&st);
            if !view.contains_key(&article.id) {
                return Err(StoreError::NotFound(format!("article {}", article.id)));
            }
            if let Some(ext) = &article.external_id {
                let taken = view.values().any(|other| {
                    other.id != article.id
                        && other.source_id == article.source_id
                        && other.external_id.as_deref() == Some(ext.as_str())
                });
                if taken {
                    return Err(StoreError::UniqueViolation {
                        source_id: article.source_id,
                        external_id: ext.clone(),
                    });
                }
            }
        }
        self.pending.articles.insert(article.id, article.clone());
        Ok(())
    }

    async fn first_or_create_author(
        &mut self,
        key: &AuthorKey,
        name: &str,
    ) -> Result<Author, StoreError> {
        if let Some(own) = self.pending.authors.values().find(|a| author_matches(a, key)) {
            return Ok(own.clone());
        }
        let id = {
            let mut st = self.state.lock();
            if let Some(found) = st.authors.values().find(|a| author_matches(a, key)) {
                return Ok(found.clone());
            }
            State::alloc(&mut st.next_author_id)
        };
        let author = Author {
            id,
            name: name.to_string(),
            external_id: match key {
                AuthorKey::ExternalId(ext) => Some(ext.clone()),
                AuthorKey::Name(_) => None,
            },
        };
        self.pending.authors.insert(id, author.clone());
        Ok(author)
    }

    async fn first_or_create_category(
        &mut self,
        slug: &str,
        name: &str,
    ) -> Result<Category, StoreError> {
        if let Some(own) = self.pending.categories.values().find(|c| c.slug == slug) {
            return Ok(own.clone());
        }
        let id = {
            let mut st = self.state.lock();
            if let Some(found) = st.categories.values().find(|c| c.slug == slug) {
                return Ok(found.clone());
            }
            State::alloc(&mut st.next_category_id)
        };
        let category = Category {
            id,
            name: name.to_string(),
            slug: slug.to_string(),
        };
        self.pending.categories.insert(id, category.clone());
        Ok(category)
    }

    /// Applies every buffered write under one lock, or none of them.
    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx { state, pending, .. } = *self;
        let mut st = state.lock();

        // Authors and categories committed meanwhile by another transaction win;
        // this transaction's rows are pointed at them instead.
        let mut author_ids = HashMap::new();
        let mut new_authors = Vec::new();
        for (id, author) in pending.authors {
            let key = author_key(&author);
            match st.authors.values().find(|a| author_matches(a, &key)) {
                Some(existing) => {
                    author_ids.insert(id, existing.id);
                }
                None => new_authors.push(author),
            }
        }
        let mut category_ids = HashMap::new();
        let mut new_categories = Vec::new();
        for (id, category) in pending.categories {
            match st.categories.values().find(|c| c.slug == category.slug) {
                Some(existing) => {
                    category_ids.insert(id, existing.id);
                }
                None => new_categories.push(category),
            }
        }

        let mut articles = Vec::with_capacity(pending.articles.len());
        for (_, mut article) in pending.articles {
            if let Some(ext) = &article.external_id {
                if let Some(holder) = st.article_keys.get(&(article.source_id, ext.clone())) {
                    if *holder != article.id {
                        return Err(StoreError::UniqueViolation {
                            source_id: article.source_id,
                            external_id: ext.clone(),
                        });
                    }
                }
            }
            if let Some(id) = article.author_id.and_then(|id| author_ids.get(&id)) {
                article.author_id = Some(*id);
            }
            if let Some(id) = article.category_id.and_then(|id| category_ids.get(&id)) {
                article.category_id = Some(*id);
            }
            articles.push(article);
        }

        for author in new_authors {
            st.authors.insert(author.id, author);
        }
        for category in new_categories {
            st.categories.insert(category.id, category);
        }
        for article in articles {
            st.put_article(article);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Expiring key/value map standing in for a shared cache.
#[derive(Debug, Default)]
pub struct MemoryKeyValue {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryKeyValue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValue {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((_, expires)) if *expires <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.entries
            .lock()
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }
}
