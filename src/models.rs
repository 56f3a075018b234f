// src/models.rs
//! Persisted records and the storage-side candidate built from a normalized article.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A configured third-party provider. `disabled_at` set implies `enabled == false`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub enabled: bool,
    pub failure_count: u32,
    pub last_failed_at: Option<DateTime<Utc>>,
    pub disabled_at: Option<DateTime<Utc>>,
    pub disabled_reason: Option<String>,
}

impl Source {
    pub fn new(id: i64, slug: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            slug: slug.into(),
            enabled: true,
            failure_count: 0,
            last_failed_at: None,
            disabled_at: None,
            disabled_reason: None,
        }
    }

    /// Increment the failure counter and stamp `last_failed_at`.
    pub fn mark_failure(&mut self, now: DateTime<Utc>) {
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failed_at = Some(now);
    }

    /// Open the circuit.
    pub fn disable(&mut self, reason: &str, now: DateTime<Utc>) {
        self.enabled = false;
        self.disabled_at = Some(now);
        self.disabled_reason = Some(reason.to_string());
    }

    /// Administrative re-enable. Failure history is kept until the next healthy cycle.
    pub fn enable(&mut self) {
        self.enabled = true;
        self.disabled_at = None;
        self.disabled_reason = None;
    }

    /// Heal after a fully successful cycle.
    pub fn reset_failures(&mut self) {
        self.failure_count = 0;
        self.last_failed_at = None;
        self.disabled_at = None;
        self.disabled_reason = None;
        self.enabled = true;
    }

    pub fn is_disabled(&self) -> bool {
        !self.enabled || self.disabled_at.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Article {
    pub id: i64,
    pub source_id: i64,
    pub external_id: Option<String>,
    pub title: Option<String>,
    pub excerpt: Option<String>,
    pub body: Option<String>,
    pub url: Option<String>,
    pub image_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub author_id: Option<i64>,
    pub category_id: Option<i64>,
    pub raw_json: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Author {
    pub id: i64,
    pub name: String,
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub slug: String,
}

/// Lookup key for author find-or-create: external id wins over name when present.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AuthorKey {
    ExternalId(String),
    Name(String),
}

/// Storage attributes for one incoming item, after author/category resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleCandidate {
    pub source_id: i64,
    pub external_id: Option<String>,
    pub title: Option<String>,
    pub excerpt: Option<String>,
    pub body: Option<String>,
    pub url: Option<String>,
    pub image_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub author_id: Option<i64>,
    pub category_id: Option<i64>,
    pub raw_json: Value,
}

impl ArticleCandidate {
    /// An empty candidate for `source_id`; handy for tests and message ingestion.
    pub fn for_source(source_id: i64) -> Self {
        Self {
            source_id,
            external_id: None,
            title: None,
            excerpt: None,
            body: None,
            url: None,
            image_url: None,
            published_at: None,
            author_id: None,
            category_id: None,
            raw_json: Value::Object(Default::default()),
        }
    }
}
