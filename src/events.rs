// src/events.rs
//! Observability and failure-propagation events.
//!
//! Listeners are registered on an [`EventBus`] handed to the pipeline at construction.
//! Each listener call runs on its own task, so an error or a panic inside a listener
//! is logged and never reaches the ingestion path.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use metrics::{counter, histogram};
use serde::Serialize;
use serde_json::json;

use crate::messaging::MessageBroker;

/// One outbound HTTP attempt made by the retrying client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpAttempt {
    pub uri: String,
    pub attempt: u32,
    pub status: Option<u16>,
    pub error: Option<String>,
    pub elapsed_ms: u64,
    /// The final attempt ended in a transport error or a 5xx status.
    pub exhausted: bool,
}

/// A source failed at cycle level (`exhausted == true`) or on a single item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFetchFailed {
    pub source_id: i64,
    pub slug: String,
    pub error_message: String,
    pub exhausted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestEvent {
    HttpAttempt(HttpAttempt),
    SourceFetchFailed(SourceFetchFailed),
}

impl IngestEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            IngestEvent::HttpAttempt(_) => "http_attempt",
            IngestEvent::SourceFetchFailed(_) => "source_fetch_failed",
        }
    }
}

#[async_trait]
pub trait EventListener: Send + Sync {
    async fn handle(&self, event: &IngestEvent) -> Result<()>;
    fn name(&self) -> &'static str;
}

#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Vec<Arc<dyn EventListener>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.listeners.iter().map(|l| l.name()).collect();
        f.debug_struct("EventBus").field("listeners", &names).finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn subscribe(&mut self, listener: Arc<dyn EventListener>) {
        self.listeners.push(listener);
    }

    /// Deliver `event` to every listener in registration order.
    pub async fn emit(&self, event: IngestEvent) {
        for listener in &self.listeners {
            let l = Arc::clone(listener);
            let ev = event.clone();
            let name = l.name();
            let joined = tokio::spawn(async move { l.handle(&ev).await }).await;
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(listener = name, event = event.kind(), error = %format!("{e:#}"), "event listener failed");
                }
                Err(e) => {
                    tracing::warn!(listener = name, event = event.kind(), error = %e, "event listener panicked");
                }
            }
        }
    }
}

/// Maps events onto the `metrics` facade.
#[derive(Debug, Default)]
pub struct MetricsListener;

#[async_trait]
impl EventListener for MetricsListener {
    async fn handle(&self, event: &IngestEvent) -> Result<()> {
        match event {
            IngestEvent::HttpAttempt(a) => {
                counter!(
                    "http_attempts_total",
                    "exhausted" => if a.exhausted { "1" } else { "0" }
                )
                .increment(1);
                histogram!("http_attempt_ms").record(a.elapsed_ms as f64);
            }
            IngestEvent::SourceFetchFailed(f) => {
                counter!(
                    "ingest_fetch_failures_total",
                    "source" => f.slug.clone(),
                    "exhausted" => if f.exhausted { "1" } else { "0" }
                )
                .increment(1);
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "metrics"
    }
}

/// Destination the failure publisher writes to.
pub const SOURCE_FETCH_FAILED: &str = "source.fetch.failed";

/// Publishes a versioned failure envelope for downstream consumers.
pub struct FailurePublisher {
    broker: Arc<dyn MessageBroker>,
}

impl FailurePublisher {
    pub fn new(broker: Arc<dyn MessageBroker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl EventListener for FailurePublisher {
    async fn handle(&self, event: &IngestEvent) -> Result<()> {
        let IngestEvent::SourceFetchFailed(f) = event else {
            return Ok(());
        };
        let envelope = json!({
            "version": 1,
            "type": SOURCE_FETCH_FAILED,
            "data": {
                "source_id": f.source_id,
                "slug": f.slug,
                "error_message": f.error_message,
                "exhausted": f.exhausted,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        });
        self.broker
            .publish(SOURCE_FETCH_FAILED, &envelope.to_string())
            .await
            .context("publishing source failure")
    }

    fn name(&self) -> &'static str {
        "failure_publisher"
    }
}
