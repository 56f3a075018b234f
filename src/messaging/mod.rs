// src/messaging/mod.rs
//! Message transport seam. Concrete transports (Redis lists, RabbitMQ, Kafka) live
//! outside this crate; the pipeline relies only on these operations.

pub mod processor;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};

pub use processor::{DrainReport, Envelope, MessageConsumer, MessageProcessor, ProcessOutcome};

pub type TopicCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn push(&self, destination: &str, message: &str) -> Result<()>;
    /// Oldest message first; `None` when the destination is empty.
    async fn pop(&self, destination: &str) -> Result<Option<String>>;
    async fn acknowledge(&self, destination: &str, message: &str) -> Result<()>;
    async fn queue_length(&self, destination: &str) -> Result<usize>;
    async fn publish(&self, destination: &str, message: &str) -> Result<()>;
    async fn publish_to_topic(&self, topic: &str, message: &str) -> Result<()>;
    async fn subscribe_to_topic(&self, topic: &str, callback: TopicCallback) -> Result<()>;
}

/// NewsAPI-shaped article envelope for smoke-testing a transport end to end.
pub fn sample_article_message(now: DateTime<Utc>) -> Value {
    json!({
        "version": 1,
        "type": "article.newsapi",
        "data": {
            "source": {"id": "sample-source"},
            "author": "CI Smoke",
            "title": "Smoke Test Article",
            "description": "Smoke test excerpt",
            "content": "Smoke test body content",
            "url": "https://example.com/smoke-article",
            "urlToImage": null,
            "publishedAt": now.to_rfc3339(),
        },
        "meta": {"source_id": null},
    })
}

/// FIFO queues and synchronous topic fan-out, all in process.
#[derive(Default)]
pub struct InMemoryBroker {
    queues: Mutex<HashMap<String, VecDeque<String>>>,
    topics: Mutex<HashMap<String, Vec<TopicCallback>>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pending messages on `destination`, oldest first.
    pub fn messages(&self, destination: &str) -> Vec<String> {
        self.queues
            .lock()
            .get(destination)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queues: HashMap<String, usize> = self
            .queues
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.len()))
            .collect();
        f.debug_struct("InMemoryBroker")
            .field("queues", &queues)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn push(&self, destination: &str, message: &str) -> Result<()> {
        self.queues
            .lock()
            .entry(destination.to_string())
            .or_default()
            .push_back(message.to_string());
        Ok(())
    }

    async fn pop(&self, destination: &str) -> Result<Option<String>> {
        Ok(self
            .queues
            .lock()
            .get_mut(destination)
            .and_then(VecDeque::pop_front))
    }

    async fn acknowledge(&self, destination: &str, _message: &str) -> Result<()> {
        // pop already removed it
        tracing::trace!(target: "messaging", destination, "acknowledged");
        Ok(())
    }

    async fn queue_length(&self, destination: &str) -> Result<usize> {
        Ok(self.queues.lock().get(destination).map_or(0, VecDeque::len))
    }

    async fn publish(&self, destination: &str, message: &str) -> Result<()> {
        self.push(destination, message).await
    }

    async fn publish_to_topic(&self, topic: &str, message: &str) -> Result<()> {
        let subscribers = self.topics.lock().get(topic).cloned().unwrap_or_default();
        for cb in subscribers {
            cb(message);
        }
        Ok(())
    }

    async fn subscribe_to_topic(&self, topic: &str, callback: TopicCallback) -> Result<()> {
        self.topics
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(callback);
        Ok(())
    }
}

/// Accepts everything, delivers nothing. For deployments without a transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBroker;

#[async_trait]
impl MessageBroker for NullBroker {
    async fn push(&self, destination: &str, message: &str) -> Result<()> {
        tracing::debug!(target: "messaging", destination, message, "null broker: push");
        Ok(())
    }

    async fn pop(&self, destination: &str) -> Result<Option<String>> {
        tracing::debug!(target: "messaging", destination, "null broker: pop");
        Ok(None)
    }

    async fn acknowledge(&self, destination: &str, _message: &str) -> Result<()> {
        tracing::debug!(target: "messaging", destination, "null broker: acknowledge");
        Ok(())
    }

    async fn queue_length(&self, destination: &str) -> Result<usize> {
        tracing::debug!(target: "messaging", destination, "null broker: queue length");
        Ok(0)
    }

    async fn publish(&self, destination: &str, message: &str) -> Result<()> {
        tracing::debug!(target: "messaging", destination, message, "null broker: publish");
        Ok(())
    }

    async fn publish_to_topic(&self, topic: &str, message: &str) -> Result<()> {
        tracing::debug!(target: "messaging", topic, message, "null broker: publish to topic");
        Ok(())
    }

    async fn subscribe_to_topic(&self, topic: &str, _callback: TopicCallback) -> Result<()> {
        tracing::debug!(target: "messaging", topic, "null broker: subscribe");
        Ok(())
    }
}
