// src/ingest/persist.rs
//! Create-or-merge for one normalized item inside its own transaction.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{ItemError, StoreError};
use crate::ingest::dedup::{merge_into_existing, DedupEngine, MatchStrategy};
use crate::ingest::normalize::parse_published_at;
use crate::ingest::types::NormalizedArticle;
use crate::models::{Article, ArticleCandidate, AuthorKey};
use crate::store::{Store, Transaction};

#[derive(Debug, Clone, PartialEq)]
pub enum PersistOutcome {
    Created(Article),
    Merged {
        article: Article,
        matched_by: MatchStrategy,
    },
    /// Lost the insert race to another writer; merged into the winner.
    RaceMerged(Article),
}

impl PersistOutcome {
    pub fn article(&self) -> &Article {
        match self {
            PersistOutcome::Created(a) | PersistOutcome::RaceMerged(a) => a,
            PersistOutcome::Merged { article, .. } => article,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, PersistOutcome::Created(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            PersistOutcome::Created(_) => "created",
            PersistOutcome::Merged { .. } => "merged",
            PersistOutcome::RaceMerged(_) => "race_merged",
        }
    }
}

#[derive(Clone)]
pub struct ArticlePersister {
    store: Arc<dyn Store>,
    dedup: DedupEngine,
}

impl ArticlePersister {
    pub fn new(store: Arc<dyn Store>, dedup: DedupEngine) -> Self {
        Self { store, dedup }
    }

    pub fn dedup(&self) -> &DedupEngine {
        &self.dedup
    }

    /// Store `item` for `source_id`. Every write of a failed item is rolled back.
    pub async fn persist(
        &self,
        source_id: i64,
        item: &NormalizedArticle,
        now: DateTime<Utc>,
    ) -> Result<PersistOutcome, ItemError> {
        let published_at = parse_published_at(item.published_at.as_deref())?;

        let mut tx = self.store.begin().await?;
        let result = self
            .persist_in(tx.as_mut(), source_id, item, published_at, now)
            .await;
        match result {
            Ok(outcome) => {
                tx.commit().await?;
                Ok(outcome)
            }
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    tracing::warn!(target: "ingest", source_id, error = %rb, "rollback failed");
                }
                Err(e.into())
            }
        }
    }

    async fn persist_in(
        &self,
        tx: &mut dyn Transaction,
        source_id: i64,
        item: &NormalizedArticle,
        published_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<PersistOutcome, StoreError> {
        let author_id = match &item.author {
            Some(author) => {
                let key = match author.external_id.as_deref().map(str::trim) {
                    Some(ext) if !ext.is_empty() => AuthorKey::ExternalId(ext.to_string()),
                    _ => AuthorKey::Name(author.name.clone()),
                };
                Some(tx.first_or_create_author(&key, &author.name).await?.id)
            }
            None => None,
        };
        let category_id = match &item.category {
            Some(c) => Some(tx.first_or_create_category(&c.slug, &c.name).await?.id),
            None => None,
        };

        let candidate = to_candidate(source_id, item, published_at, author_id, category_id);

        if let Some((existing, matched_by)) = self
            .dedup
            .find_duplicate_with_strategy(tx, &candidate, now)
            .await?
        {
            let merged = merge_into_existing(&existing, &candidate);
            tx.update_article(&merged).await?;
            tracing::debug!(target: "ingest", source_id, article_id = merged.id, strategy = matched_by.as_str(), "merged into existing article");
            return Ok(PersistOutcome::Merged {
                article: merged,
                matched_by,
            });
        }

        match tx.insert_article(&candidate).await {
            Ok(created) => Ok(PersistOutcome::Created(created)),
            Err(StoreError::UniqueViolation {
                source_id,
                external_id,
            }) => {
                // The key cannot change between attempts, so one re-read is enough.
                let Some(winner) = tx.find_article_by_key(source_id, &external_id).await? else {
                    return Err(StoreError::Conflict(format!(
                        "source {source_id} / external id {external_id}"
                    )));
                };
                let merged = merge_into_existing(&winner, &candidate);
                tx.update_article(&merged).await?;
                tracing::info!(target: "ingest", source_id, article_id = merged.id, "insert race lost, merged into winner");
                Ok(PersistOutcome::RaceMerged(merged))
            }
            Err(e) => Err(e),
        }
    }
}

/// Storage attributes for a normalized item once author and category are resolved.
pub fn to_candidate(
    source_id: i64,
    item: &NormalizedArticle,
    published_at: Option<DateTime<Utc>>,
    author_id: Option<i64>,
    category_id: Option<i64>,
) -> ArticleCandidate {
    ArticleCandidate {
        source_id,
        external_id: Some(item.external_id.clone()).filter(|e| !e.is_empty()),
        title: item.title.clone(),
        excerpt: item.excerpt.clone(),
        body: item.body.clone(),
        url: item.url.clone(),
        image_url: item.image_url.clone(),
        published_at,
        author_id,
        category_id,
        raw_json: item.raw_json.clone(),
    }
}
