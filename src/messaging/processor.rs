// src/messaging/processor.rs
//! Message-driven ingestion: validate the envelope, skip already-processed
//! messages, then either relay a source failure or persist an article through
//! the same normalize and persist path the fetch worker uses.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use metrics::counter;
use serde_json::{json, Value};

use crate::config::MessagingConfig;
use crate::error::MessageError;
use crate::events::{EventBus, IngestEvent, SourceFetchFailed, SOURCE_FETCH_FAILED};
use crate::hashing::{canonical_json, sha256_hex};
use crate::ingest::normalize::normalize;
use crate::ingest::persist::ArticlePersister;
use crate::ingest::types::ProviderKind;
use crate::messaging::MessageBroker;
use crate::models::Source;
use crate::store::{KeyValueStore, Store};

pub const PROCESSED_PREFIX: &str = "messaging:processed:";
const UNKNOWN_SOURCE_SLUG: &str = "unknown";

/// A validated inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub version: i64,
    pub kind: String,
    pub data: Value,
    pub meta: Option<Value>,
}

impl Envelope {
    /// Integer `version`, string `type` and object `data` are required; `meta` is optional.
    pub fn validate(payload: &Value) -> Result<Self, MessageError> {
        let obj = payload.as_object().ok_or(MessageError::InvalidEnvelope)?;
        let version = obj
            .get("version")
            .and_then(Value::as_i64)
            .ok_or(MessageError::InvalidEnvelope)?;
        let kind = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or(MessageError::InvalidEnvelope)?;
        let data = obj
            .get("data")
            .filter(|d| d.is_object())
            .ok_or(MessageError::InvalidEnvelope)?;
        Ok(Self {
            version,
            kind: kind.to_string(),
            data: data.clone(),
            meta: obj.get("meta").cloned(),
        })
    }

    /// Parse a raw broker message and validate its envelope.
    pub fn decode(raw: &str) -> Result<(Value, Self), MessageError> {
        let payload: Value = serde_json::from_str(raw)?;
        let envelope = Self::validate(&payload)?;
        Ok((payload, envelope))
    }

    /// `messaging:processed:{type}:{hash of canonical data}`.
    pub fn idempotency_key(&self) -> String {
        format!(
            "{}{}:{}",
            PROCESSED_PREFIX,
            self.kind,
            sha256_hex(&canonical_json(&self.data), 32)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Persisted { article_id: i64, created: bool },
    FailureRelayed { source_id: i64 },
    SkippedDuplicate,
    DeadLettered { destination: String, reason: String },
}

impl ProcessOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ProcessOutcome::Persisted { .. } => "persisted",
            ProcessOutcome::FailureRelayed { .. } => "failure_relayed",
            ProcessOutcome::SkippedDuplicate => "skipped_duplicate",
            ProcessOutcome::DeadLettered { .. } => "dead_lettered",
        }
    }
}

pub struct MessageProcessor {
    store: Arc<dyn Store>,
    kv: Arc<dyn KeyValueStore>,
    broker: Arc<dyn MessageBroker>,
    persister: ArticlePersister,
    events: EventBus,
    cfg: MessagingConfig,
}

impl MessageProcessor {
    pub fn new(
        store: Arc<dyn Store>,
        kv: Arc<dyn KeyValueStore>,
        broker: Arc<dyn MessageBroker>,
        persister: ArticlePersister,
        events: EventBus,
        cfg: MessagingConfig,
    ) -> Self {
        Self {
            store,
            kv,
            broker,
            persister,
            events,
            cfg,
        }
    }

    pub fn dlq_for(&self, name: &str) -> String {
        format!("{}{}", self.cfg.dlq_prefix, name)
    }

    /// Handle one decoded message. Never returns an error: failures are dead-lettered
    /// and leave the idempotency key unset so a redelivery is processed again.
    pub async fn process(&self, payload: &Value) -> ProcessOutcome {
        let outcome = self.process_inner(payload).await;
        counter!("messaging_messages_total", "outcome" => outcome.label()).increment(1);
        outcome
    }

    async fn process_inner(&self, payload: &Value) -> ProcessOutcome {
        let envelope = match Envelope::validate(payload) {
            Ok(env) => env,
            Err(e) => {
                let kind = payload
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                tracing::warn!(target: "messaging", error = %e, "invalid payload, sending to dead letter");
                return self
                    .dead_letter(&self.dlq_for(kind), payload.to_string(), e.to_string())
                    .await;
            }
        };

        let key = envelope.idempotency_key();
        match self.kv.get(&key).await {
            Ok(Some(_)) => {
                tracing::info!(target: "messaging", idempotency_key = %key, "skipping already processed message");
                return ProcessOutcome::SkippedDuplicate;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(target: "messaging", error = %e, "idempotency check failed, processing anyway");
            }
        }

        match self.handle(&envelope).await {
            Ok(outcome) => {
                let ttl = Duration::from_secs(self.cfg.idempotency_ttl_secs);
                if let Err(e) = self.kv.set_with_ttl(&key, "1", ttl).await {
                    tracing::warn!(target: "messaging", idempotency_key = %key, error = %e, "could not mark message processed");
                }
                outcome
            }
            Err(e) => {
                tracing::error!(target: "messaging", message_type = %envelope.kind, error = %e, "processing failed, sending to dead letter");
                let body = json!({ "payload": payload, "error": e.to_string() }).to_string();
                self.dead_letter(&self.dlq_for(&envelope.kind), body, e.to_string())
                    .await
            }
        }
    }

    async fn handle(&self, env: &Envelope) -> Result<ProcessOutcome, MessageError> {
        if env.kind == SOURCE_FETCH_FAILED {
            return self.relay_failure(&env.data).await;
        }

        let kind = ProviderKind::from_message_type(&env.kind);
        let article = normalize(kind, &env.data)?;
        let source = self.resolve_source(env).await?;
        let outcome = self
            .persister
            .persist(source.id, &article, Utc::now())
            .await?;
        tracing::info!(
            target: "messaging",
            source_id = source.id,
            external_id = %article.external_id,
            result = outcome.label(),
            "processed and persisted article"
        );
        Ok(ProcessOutcome::Persisted {
            article_id: outcome.article().id,
            created: outcome.is_created(),
        })
    }

    async fn relay_failure(&self, data: &Value) -> Result<ProcessOutcome, MessageError> {
        let source_id = data
            .get("source_id")
            .and_then(Value::as_i64)
            .ok_or(MessageError::MissingField("source_id"))?;
        let error_message = data
            .get("error_message")
            .and_then(Value::as_str)
            .ok_or(MessageError::MissingField("error_message"))?;
        let exhausted = data
            .get("exhausted")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let source = self
            .store
            .get_source(source_id)
            .await?
            .ok_or(MessageError::UnknownSource(source_id))?;

        self.events
            .emit(IngestEvent::SourceFetchFailed(SourceFetchFailed {
                source_id: source.id,
                slug: source.slug.clone(),
                error_message: error_message.to_string(),
                exhausted,
            }))
            .await;
        tracing::info!(target: "messaging", source_id, exhausted, "relayed source fetch failure");
        Ok(ProcessOutcome::FailureRelayed { source_id })
    }

    /// `meta.source_id`, then the item's `source.id` as a slug, then the `unknown` source.
    async fn resolve_source(&self, env: &Envelope) -> Result<Source, MessageError> {
        if let Some(id) = env
            .meta
            .as_ref()
            .and_then(|m| m.get("source_id"))
            .and_then(Value::as_i64)
        {
            if let Some(found) = self.store.get_source(id).await? {
                return Ok(found);
            }
        }

        let external = env.data.get("source").and_then(|s| s.get("id"));
        let slug = match external {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };
        if !slug.is_empty() {
            return Ok(self
                .store
                .first_or_create_source(&slug, &display_name(&slug))
                .await?);
        }

        Ok(self
            .store
            .first_or_create_source(UNKNOWN_SOURCE_SLUG, "Unknown Source")
            .await?)
    }

    async fn dead_letter(&self, destination: &str, body: String, reason: String) -> ProcessOutcome {
        if let Err(e) = self.broker.push(destination, &body).await {
            tracing::error!(target: "messaging", destination, error = %format!("{e:#}"), "dead letter push failed");
        }
        ProcessOutcome::DeadLettered {
            destination: destination.to_string(),
            reason,
        }
    }
}

/// `bbc-news` → `Bbc news`.
fn display_name(slug: &str) -> String {
    let spaced = slug.replace(['-', '_'], " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => spaced,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub consumed: usize,
    pub processed: usize,
    pub skipped: usize,
    pub dead_lettered: usize,
}

/// Pops messages from one destination and hands them to a [`MessageProcessor`].
pub struct MessageConsumer {
    broker: Arc<dyn MessageBroker>,
    processor: Arc<MessageProcessor>,
}

impl MessageConsumer {
    pub fn new(broker: Arc<dyn MessageBroker>, processor: Arc<MessageProcessor>) -> Self {
        Self { broker, processor }
    }

    /// Consume until `destination` is empty or `limit` valid messages were handled (0 = no limit).
    /// Undecodable or invalid messages go to `dlq_prefix + destination` unchanged and do not count
    /// toward the limit.
    pub async fn drain(&self, destination: &str, limit: usize) -> Result<DrainReport> {
        let mut report = DrainReport::default();
        let dlq = self.processor.dlq_for(destination);

        while let Some(message) = self
            .broker
            .pop(destination)
            .await
            .with_context(|| format!("popping from {destination}"))?
        {
            let payload = match Envelope::decode(&message) {
                Ok((payload, _)) => payload,
                Err(e) => {
                    tracing::warn!(target: "messaging", destination, error = %e, "undecodable message, pushing to dead letter");
                    self.broker
                        .push(&dlq, &message)
                        .await
                        .with_context(|| format!("pushing to {dlq}"))?;
                    report.dead_lettered += 1;
                    continue;
                }
            };

            match self.processor.process(&payload).await {
                ProcessOutcome::SkippedDuplicate => report.skipped += 1,
                ProcessOutcome::DeadLettered { .. } => report.dead_lettered += 1,
                ProcessOutcome::Persisted { .. } | ProcessOutcome::FailureRelayed { .. } => {
                    report.processed += 1
                }
            }
            if let Err(e) = self.broker.acknowledge(destination, &message).await {
                tracing::warn!(target: "messaging", destination, error = %format!("{e:#}"), "acknowledge failed");
            }

            report.consumed += 1;
            if limit > 0 && report.consumed >= limit {
                tracing::info!(target: "messaging", destination, limit, "limit reached");
                break;
            }
        }
        Ok(report)
    }
}
