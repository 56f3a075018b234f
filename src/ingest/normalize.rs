// src/ingest/normalize.rs
//! Provider payload → canonical [`NormalizedArticle`]. Pure and deterministic.
//!
//! | field        | NewsAPI       | Guardian            | NYT                 |
//! |--------------|---------------|---------------------|---------------------|
//! | external_id  | synthesized   | `id`                | `url`               |
//! | title        | `title`       | `webTitle`          | `title`             |
//! | excerpt      | `description` | `fields.trailText`  | `abstract`          |
//! | body         | `content`     | `fields.body`       | `abstract`          |
//! | url          | `url`         | `webUrl`            | `url`               |
//! | image_url    | `urlToImage`  | `fields.thumbnail`  | `multimedia[0].url` |
//! | published_at | `publishedAt` | `webPublicationDate`| `published_date`    |
//! | author       | `author`      | `fields.byline`     | `byline`            |
//! | category     | `category`    | `sectionName`       | `section`           |

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::NormalizeError;
use crate::hashing::{canonical_json, sha256_hex};
use crate::ingest::types::{AuthorCandidate, CategoryCandidate, NormalizedArticle, ProviderKind};

pub type NormalizeFn = fn(&Value) -> Result<NormalizedArticle, NormalizeError>;

/// Normalization function for a provider; look it up once per source.
pub fn normalizer_for(kind: ProviderKind) -> NormalizeFn {
    match kind {
        ProviderKind::NewsApi => normalize_from_newsapi,
        ProviderKind::Guardian => normalize_from_guardian,
        ProviderKind::Nyt => normalize_from_nyt,
        ProviderKind::Generic => normalize_generic,
    }
}

pub fn normalize(kind: ProviderKind, item: &Value) -> Result<NormalizedArticle, NormalizeError> {
    normalizer_for(kind)(item)
}

pub fn normalize_from_newsapi(item: &Value) -> Result<NormalizedArticle, NormalizeError> {
    let obj = as_object(item)?;
    Ok(NormalizedArticle {
        external_id: synthesize_external_id(obj),
        title: str_at(obj, &["title"], "title")?,
        excerpt: str_at(obj, &["description"], "description")?,
        body: str_at(obj, &["content"], "content")?,
        url: str_at(obj, &["url"], "url")?,
        image_url: str_at(obj, &["urlToImage"], "urlToImage")?,
        published_at: str_at(obj, &["publishedAt"], "publishedAt")?,
        author: author(str_at(obj, &["author"], "author")?, false),
        category: category(str_at(obj, &["category"], "category")?),
        raw_json: item.clone(),
    })
}

pub fn normalize_from_guardian(item: &Value) -> Result<NormalizedArticle, NormalizeError> {
    let obj = as_object(item)?;
    let external_id = non_empty(str_at(obj, &["id"], "id")?)
        .unwrap_or_else(|| synthesize_external_id(obj));
    Ok(NormalizedArticle {
        external_id,
        title: str_at(obj, &["webTitle"], "webTitle")?,
        excerpt: str_at(obj, &["fields", "trailText"], "fields.trailText")?,
        body: str_at(obj, &["fields", "body"], "fields.body")?,
        url: str_at(obj, &["webUrl"], "webUrl")?,
        image_url: str_at(obj, &["fields", "thumbnail"], "fields.thumbnail")?,
        published_at: str_at(obj, &["webPublicationDate"], "webPublicationDate")?,
        author: author(str_at(obj, &["fields", "byline"], "fields.byline")?, true),
        category: category(str_at(obj, &["sectionName"], "sectionName")?),
        raw_json: item.clone(),
    })
}

pub fn normalize_from_nyt(item: &Value) -> Result<NormalizedArticle, NormalizeError> {
    let obj = as_object(item)?;
    let url = str_at(obj, &["url"], "url")?;
    let abstract_ = str_at(obj, &["abstract"], "abstract")?;
    Ok(NormalizedArticle {
        external_id: non_empty(url.clone()).unwrap_or_else(|| synthesize_external_id(obj)),
        title: str_at(obj, &["title"], "title")?,
        excerpt: abstract_.clone(),
        body: abstract_,
        url,
        image_url: first_multimedia_url(obj),
        published_at: str_at(obj, &["published_date"], "published_date")?,
        author: author(str_at(obj, &["byline"], "byline")?, false),
        category: category(str_at(obj, &["section"], "section")?),
        raw_json: item.clone(),
    })
}

/// Best-effort mapping for sources without a known provider schema.
pub fn normalize_generic(item: &Value) -> Result<NormalizedArticle, NormalizeError> {
    let obj = as_object(item)?;
    let image_url = match str_at(obj, &["fields", "thumbnail"], "fields.thumbnail")? {
        Some(v) => Some(v),
        None => first_multimedia_url(obj).or(str_at(obj, &["image"], "image")?),
    };
    Ok(NormalizedArticle {
        external_id: payload_fingerprint(obj),
        title: first_of(obj, &[&["webTitle"], &["title"]], "title")?,
        excerpt: first_of(obj, &[&["fields", "trailText"], &["description"]], "excerpt")?,
        body: first_of(obj, &[&["fields", "body"], &["content"]], "body")?,
        url: first_of(obj, &[&["webUrl"], &["url"]], "url")?,
        image_url,
        published_at: first_of(obj, &[&["webPublicationDate"], &["publishedAt"]], "published_at")?,
        author: author(str_at(obj, &["author"], "author")?, false),
        category: category(str_at(obj, &["category"], "category")?),
        raw_json: item.clone(),
    })
}

/// `"{source.id}::{title}"` when both are present, otherwise a payload fingerprint.
pub fn synthesize_external_id(obj: &Map<String, Value>) -> String {
    let source_id = obj
        .get("source")
        .and_then(|s| s.get("id"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty());
    let title = obj
        .get("title")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty());
    match (source_id, title) {
        (Some(sid), Some(t)) => format!("{sid}::{t}"),
        _ => payload_fingerprint(obj),
    }
}

/// Hash of the payload with empty top-level members dropped.
pub fn payload_fingerprint(obj: &Map<String, Value>) -> String {
    let filtered: Map<String, Value> = obj
        .iter()
        .filter(|(_, v)| !is_empty_value(v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    sha256_hex(&canonical_json(&Value::Object(filtered)), 32)
}

fn is_empty_value(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty() || s == "0",
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// Lowercase ASCII slug: runs of anything but `[a-z0-9]` become a single dash.
pub fn slugify(s: &str) -> String {
    static RE_SEP: OnceCell<Regex> = OnceCell::new();
    let re = RE_SEP.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("slug regex"));
    let lower = s.trim().to_lowercase();
    re.replace_all(&lower, "-").trim_matches('-').to_string()
}

/// Parse a provider timestamp. Blank means absent.
pub fn parse_published_at(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, NormalizeError> {
    let Some(s) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(Some(dt.with_timezone(&Utc)));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Some(naive.and_utc()));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(Some(naive.and_utc()));
        }
    }
    Err(NormalizeError::InvalidTimestamp(s.to_string()))
}

fn as_object(item: &Value) -> Result<&Map<String, Value>, NormalizeError> {
    item.as_object().ok_or(NormalizeError::NotAnObject)
}

/// String at `path`. Missing, null or a non-object hop yields `None`; a non-string leaf is an error.
fn str_at(
    obj: &Map<String, Value>,
    path: &[&str],
    field: &'static str,
) -> Result<Option<String>, NormalizeError> {
    let Some((first, rest)) = path.split_first() else {
        return Ok(None);
    };
    let mut cur = match obj.get(*first) {
        Some(v) => v,
        None => return Ok(None),
    };
    for key in rest {
        match cur.as_object().and_then(|o| o.get(*key)) {
            Some(v) => cur = v,
            None => return Ok(None),
        }
    }
    match cur {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        _ => Err(NormalizeError::InvalidField { field }),
    }
}

fn first_of(
    obj: &Map<String, Value>,
    paths: &[&[&str]],
    field: &'static str,
) -> Result<Option<String>, NormalizeError> {
    for path in paths {
        if let Some(v) = str_at(obj, path, field)? {
            return Ok(Some(v));
        }
    }
    Ok(None)
}

fn first_multimedia_url(obj: &Map<String, Value>) -> Option<String> {
    obj.get("multimedia")
        .and_then(Value::as_array)
        .and_then(|m| m.first())
        .and_then(|m| m.get("url"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.trim().is_empty())
}

fn author(raw: Option<String>, name_is_external_id: bool) -> Option<AuthorCandidate> {
    let name = raw?.trim().to_string();
    if name.is_empty() {
        return None;
    }
    Some(AuthorCandidate {
        external_id: name_is_external_id.then(|| name.clone()),
        name,
    })
}

fn category(raw: Option<String>) -> Option<CategoryCandidate> {
    let name = raw?.trim().to_string();
    if name.is_empty() {
        return None;
    }
    Some(CategoryCandidate {
        slug: slugify(&name),
        name,
    })
}
