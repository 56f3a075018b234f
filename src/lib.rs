// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod error;
pub mod events;
pub mod hashing;
pub mod http;
pub mod models;
pub mod store;

// Fetch pipeline: adapters, normalization, dedup, persistence, worker, scheduler
pub mod ingest;

// Message-driven ingestion and dead-lettering
pub mod messaging;

pub mod metrics;

// ---- Re-exports for stable public API ----
pub use crate::config::AppConfig;
pub use crate::error::{ItemError, MessageError, NormalizeError, StoreError};
pub use crate::events::{EventBus, EventListener, IngestEvent};
pub use crate::http::{RetryPolicy, RetryingHttpClient};
pub use crate::ingest::{CycleOutcome, CycleReport, FetchJob, FetchWorker};
pub use crate::messaging::{MessageBroker, MessageConsumer, MessageProcessor};
