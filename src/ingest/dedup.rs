// src/ingest/dedup.rs
//! Layered duplicate detection and the merge applied when a duplicate is found.
//!
//! Strategy order, first hit wins:
//! 1. exact `(source_id, external_id)`
//! 2. trigram title similarity, only when the store supports it and it is enabled
//! 3. normalized URL within the recency window
//! 4. Levenshtein title ratio within the recency window, only when (2) is not in use
//!
//! (2) and (4) are alternatives selected by store capability, never both.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde_json::Value;

use crate::config::DedupConfig;
use crate::error::StoreError;
use crate::models::{Article, ArticleCandidate};
use crate::store::Transaction;

/// Which strategy produced a match; reported in logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    ExactKey,
    Trigram,
    Url,
    FuzzyTitle,
}

impl MatchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStrategy::ExactKey => "exact_key",
            MatchStrategy::Trigram => "trigram",
            MatchStrategy::Url => "url",
            MatchStrategy::FuzzyTitle => "fuzzy_title",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DedupEngine {
    cfg: DedupConfig,
    trigram: bool,
}

impl DedupEngine {
    /// `store_supports_trigram` comes from [`crate::store::Store::supports_trigram`].
    pub fn new(cfg: DedupConfig, store_supports_trigram: bool) -> Self {
        let trigram = cfg.use_trigram && store_supports_trigram;
        Self { cfg, trigram }
    }

    pub fn uses_trigram(&self) -> bool {
        self.trigram
    }

    pub fn config(&self) -> &DedupConfig {
        &self.cfg
    }

    pub async fn find_duplicate(
        &self,
        tx: &mut dyn Transaction,
        candidate: &ArticleCandidate,
        now: DateTime<Utc>,
    ) -> Result<Option<Article>, StoreError> {
        Ok(self
            .find_duplicate_with_strategy(tx, candidate, now)
            .await?
            .map(|(article, _)| article))
    }

    pub async fn find_duplicate_with_strategy(
        &self,
        tx: &mut dyn Transaction,
        candidate: &ArticleCandidate,
        now: DateTime<Utc>,
    ) -> Result<Option<(Article, MatchStrategy)>, StoreError> {
        if let Some(ext) = candidate.external_id.as_deref().filter(|e| !e.is_empty()) {
            if let Some(found) = tx.find_article_by_key(candidate.source_id, ext).await? {
                return Ok(Some((found, MatchStrategy::ExactKey)));
            }
        }

        let title = candidate
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());

        if self.trigram {
            if let Some(t) = title {
                match tx.find_most_similar_title(t, self.cfg.trigram_threshold).await {
                    Ok(Some(found)) => return Ok(Some((found, MatchStrategy::Trigram))),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::debug!(target: "ingest", error = %e, "trigram lookup failed, falling back");
                    }
                }
            }
        }

        let url_key = candidate
            .url
            .as_deref()
            .map(normalize_url)
            .filter(|u| !u.is_empty());
        let fuzzy_title = if self.trigram { None } else { title };
        if url_key.is_none() && fuzzy_title.is_none() {
            return Ok(None);
        }

        let since = now - Duration::days(self.cfg.recent_window_days);
        let recent = tx.recent_articles(since).await?;

        if let Some(key) = url_key.as_deref() {
            let hit = recent.iter().find(|r| {
                r.url
                    .as_deref()
                    .is_some_and(|stored| normalize_url(stored) == key)
            });
            if let Some(r) = hit {
                if let Some(found) = tx.get_article(r.id).await? {
                    return Ok(Some((found, MatchStrategy::Url)));
                }
            }
        }

        if let Some(t) = fuzzy_title {
            let hit = recent.iter().find(|r| {
                r.title
                    .as_deref()
                    .is_some_and(|stored| title_distance_ratio(t, stored) < self.cfg.fuzzy_ratio)
            });
            if let Some(r) = hit {
                if let Some(found) = tx.get_article(r.id).await? {
                    return Ok(Some((found, MatchStrategy::FuzzyTitle)));
                }
            }
        }

        Ok(None)
    }
}

/// Merge `candidate` into `existing`.
///
/// Content fields: candidate wins when it carries a non-blank value.
/// `published_at`: replaced only by a strictly newer timestamp.
/// `raw_json`: shallow object union, candidate keys win.
/// Identity fields (`external_id`, `author_id`, `category_id`): filled only while empty.
pub fn merge_into_existing(existing: &Article, candidate: &ArticleCandidate) -> Article {
    let mut merged = existing.clone();

    overwrite(&mut merged.title, &candidate.title);
    overwrite(&mut merged.excerpt, &candidate.excerpt);
    overwrite(&mut merged.body, &candidate.body);
    overwrite(&mut merged.url, &candidate.url);
    overwrite(&mut merged.image_url, &candidate.image_url);

    if let Some(incoming) = candidate.published_at {
        if merged.published_at.map_or(true, |current| incoming > current) {
            merged.published_at = Some(incoming);
        }
    }

    if merged.external_id.as_deref().map_or(true, str::is_empty) {
        if let Some(ext) = candidate.external_id.as_ref().filter(|e| !e.is_empty()) {
            merged.external_id = Some(ext.clone());
        }
    }
    if merged.author_id.is_none() {
        merged.author_id = candidate.author_id;
    }
    if merged.category_id.is_none() {
        merged.category_id = candidate.category_id;
    }

    merged.raw_json = merge_raw(&existing.raw_json, &candidate.raw_json);
    merged
}

fn overwrite(slot: &mut Option<String>, incoming: &Option<String>) {
    if let Some(v) = incoming.as_ref().filter(|v| !v.trim().is_empty()) {
        *slot = Some(v.clone());
    }
}

fn merge_raw(existing: &Value, incoming: &Value) -> Value {
    match (existing, incoming) {
        (_, Value::Null) => existing.clone(),
        (Value::Object(old), Value::Object(new)) => {
            let mut out = old.clone();
            for (k, v) in new {
                out.insert(k.clone(), v.clone());
            }
            Value::Object(out)
        }
        _ => incoming.clone(),
    }
}

/// Lowercased `host + path` with scheme, query, fragment and trailing slashes removed.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Ok(parsed) = url::Url::parse(trimmed) {
        if let Some(host) = parsed.host_str() {
            let joined = format!("{}{}", host, parsed.path());
            return joined.trim_end_matches('/').to_lowercase();
        }
    }

    static RE_SCHEME: OnceCell<Regex> = OnceCell::new();
    let re = RE_SCHEME.get_or_init(|| Regex::new(r"(?i)^[a-z][a-z0-9+.-]*://").expect("scheme regex"));
    let without_scheme = re.replace(trimmed, "");
    let end = without_scheme
        .find(|c: char| c == '?' || c == '#')
        .unwrap_or(without_scheme.len());
    without_scheme[..end].trim_end_matches('/').to_lowercase()
}

/// Levenshtein distance over lowercased, trimmed titles divided by the longer length.
/// Returns 1.0 when both are empty.
pub fn title_distance_ratio(a: &str, b: &str) -> f64 {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    strsim::levenshtein(&a, &b) as f64 / max_len as f64
}

/// Trigram similarity in the style of Postgres `pg_trgm`: shared / union of padded word trigrams.
pub fn trigram_similarity(a: &str, b: &str) -> f64 {
    let ta = trigrams(a);
    let tb = trigrams(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let shared = ta.intersection(&tb).count();
    let union = ta.len() + tb.len() - shared;
    shared as f64 / union as f64
}

fn trigrams(s: &str) -> HashSet<[char; 3]> {
    let mut out = HashSet::new();
    let lower = s.to_lowercase();
    for word in lower.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
        let padded: Vec<char> = "  ".chars().chain(word.chars()).chain(" ".chars()).collect();
        for w in padded.windows(3) {
            out.insert([w[0], w[1], w[2]]);
        }
    }
    out
}
