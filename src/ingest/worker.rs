// src/ingest/worker.rs
//! One fetch cycle for one source: idempotency gate, circuit-breaker gate, fetch,
//! then normalize and persist every item in isolation.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;

use crate::config::{DedupConfig, PipelineConfig};
use crate::error::ItemError;
use crate::events::{EventBus, IngestEvent, SourceFetchFailed};
use crate::ingest::dedup::DedupEngine;
use crate::ingest::ensure_metrics_described;
use crate::ingest::normalize::normalizer_for;
use crate::ingest::persist::{ArticlePersister, PersistOutcome};
use crate::ingest::providers::AdapterRegistry;
use crate::ingest::types::FetchParams;
use crate::models::Source;
use crate::store::{KeyValueStore, Store};

pub const DISABLED_REASON: &str = "failure_threshold_reached";

/// What a worker is asked to do. Carries identifiers only; the adapter is resolved in the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchJob {
    pub source_id: i64,
    /// Overrides the default `fetch:{source_id}:{YYYYMMDDHH}` key.
    pub idempotency_key: Option<String>,
}

impl FetchJob {
    pub fn new(source_id: i64) -> Self {
        Self {
            source_id,
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn key_at(&self, now: DateTime<Utc>) -> String {
        self.idempotency_key
            .clone()
            .unwrap_or_else(|| cycle_key(self.source_id, now))
    }
}

/// Hourly bucket key for a source.
pub fn cycle_key(source_id: i64, now: DateTime<Utc>) -> String {
    format!("fetch:{}:{}", source_id, now.format("%Y%m%d%H"))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub created: usize,
    pub merged: usize,
    pub failed: usize,
    /// The breaker opened during this cycle because of item failures.
    pub breaker_tripped: bool,
    /// A clean cycle cleared a previous failure count or disable.
    pub healed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    SkippedDuplicate,
    SkippedDisabled,
    SourceMissing,
    AdapterMissing,
    /// The store could not be read; nothing was attempted.
    Aborted { error: String },
    FetchFailed { error: String, breaker_tripped: bool },
    Completed(CycleReport),
}

impl CycleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CycleOutcome::SkippedDuplicate => "skipped_duplicate",
            CycleOutcome::SkippedDisabled => "skipped_disabled",
            CycleOutcome::SourceMissing => "source_missing",
            CycleOutcome::AdapterMissing => "adapter_missing",
            CycleOutcome::Aborted { .. } => "aborted",
            CycleOutcome::FetchFailed { .. } => "fetch_failed",
            CycleOutcome::Completed(_) => "completed",
        }
    }
}

pub struct FetchWorker {
    store: Arc<dyn Store>,
    kv: Arc<dyn KeyValueStore>,
    registry: AdapterRegistry,
    persister: ArticlePersister,
    events: EventBus,
    cfg: PipelineConfig,
}

impl FetchWorker {
    pub fn new(
        store: Arc<dyn Store>,
        kv: Arc<dyn KeyValueStore>,
        registry: AdapterRegistry,
        dedup: DedupConfig,
        events: EventBus,
        cfg: PipelineConfig,
    ) -> Self {
        let engine = DedupEngine::new(dedup, store.supports_trigram());
        let persister = ArticlePersister::new(Arc::clone(&store), engine);
        Self {
            store,
            kv,
            registry,
            persister,
            events,
            cfg,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub async fn run(&self, job: &FetchJob) -> CycleOutcome {
        self.run_at(job, Utc::now()).await
    }

    /// Run one cycle as of `now`. Never panics or returns an error; every failure
    /// ends up in the outcome, the logs, the events and the source's breaker state.
    pub async fn run_at(&self, job: &FetchJob, now: DateTime<Utc>) -> CycleOutcome {
        ensure_metrics_described();
        let outcome = self.cycle(job, now).await;
        counter!("ingest_cycles_total", "outcome" => outcome.label()).increment(1);
        outcome
    }

    async fn cycle(&self, job: &FetchJob, now: DateTime<Utc>) -> CycleOutcome {
        let key = job.key_at(now);
        match self.kv.get(&key).await {
            Ok(Some(_)) => {
                tracing::info!(target: "ingest", source_id = job.source_id, idempotency_key = %key, "duplicate cycle prevented");
                return CycleOutcome::SkippedDuplicate;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(target: "ingest", source_id = job.source_id, error = %e, "idempotency lookup failed, proceeding");
            }
        }
        let ttl = Duration::from_secs(self.cfg.cycle_ttl_secs);
        if let Err(e) = self.kv.set_with_ttl(&key, "1", ttl).await {
            tracing::warn!(target: "ingest", source_id = job.source_id, error = %e, "could not record idempotency key");
        }

        let mut source = match self.store.get_source(job.source_id).await {
            Ok(Some(s)) => s,
            Ok(None) => {
                tracing::warn!(target: "ingest", source_id = job.source_id, "source not found");
                return CycleOutcome::SourceMissing;
            }
            Err(e) => {
                tracing::error!(target: "ingest", source_id = job.source_id, error = %e, "loading source failed");
                return CycleOutcome::Aborted {
                    error: e.to_string(),
                };
            }
        };

        if source.is_disabled() {
            tracing::warn!(target: "ingest", source_id = source.id, source_slug = %source.slug, "source is disabled, skipping fetch");
            return CycleOutcome::SkippedDisabled;
        }

        let Some((adapter, kind)) = self.registry.for_source(&source) else {
            tracing::error!(target: "ingest", source_id = source.id, source_slug = %source.slug, "adapter not found");
            return CycleOutcome::AdapterMissing;
        };

        let params = FetchParams {
            sources: Some(source.slug.clone()),
            page_size: Some(self.cfg.batch_size),
            ..FetchParams::default()
        };
        let items = match adapter.fetch_top_headlines(&params).await {
            Ok(items) => items,
            Err(e) => {
                let error = format!("{e:#}");
                tracing::error!(target: "ingest", source_id = source.id, source_slug = %source.slug, error = %error, "adapter fetch failed");
                let breaker_tripped = self.record_failure(&mut source, now).await;
                self.emit_failure(&source, &error, true).await;
                return CycleOutcome::FetchFailed {
                    error,
                    breaker_tripped,
                };
            }
        };
        tracing::info!(target: "ingest", source_id = source.id, source_slug = %source.slug, count = items.len(), "fetched articles");

        let normalize = normalizer_for(kind);
        let mut report = CycleReport {
            fetched: items.len(),
            ..CycleReport::default()
        };

        for item in &items {
            let result = match normalize(item) {
                Ok(article) => self.persister.persist(source.id, &article, now).await,
                Err(e) => Err(ItemError::from(e)),
            };
            match result {
                Ok(outcome) => {
                    counter!("ingest_items_total", "result" => outcome.label()).increment(1);
                    match outcome {
                        PersistOutcome::Created(_) => report.created += 1,
                        PersistOutcome::Merged { .. } | PersistOutcome::RaceMerged(_) => {
                            report.merged += 1
                        }
                    }
                }
                Err(e) => {
                    counter!("ingest_items_total", "result" => "failed").increment(1);
                    report.failed += 1;
                    let error = e.to_string();
                    tracing::warn!(target: "ingest", source_id = source.id, source_slug = %source.slug, error = %error, "item processing failed");
                    self.emit_failure(&source, &error, false).await;
                    if self.record_failure(&mut source, now).await {
                        report.breaker_tripped = true;
                    }
                }
            }
        }

        if report.failed == 0 && (source.failure_count > 0 || source.is_disabled()) {
            source.reset_failures();
            match self.store.save_source(&source).await {
                Ok(()) => {
                    report.healed = true;
                    tracing::info!(target: "ingest", source_id = source.id, source_slug = %source.slug, "clean cycle, failure state reset");
                }
                Err(e) => {
                    tracing::warn!(target: "ingest", source_id = source.id, error = %e, "could not reset failure state");
                }
            }
        }

        tracing::info!(
            target: "ingest",
            source_id = source.id,
            source_slug = %source.slug,
            fetched = report.fetched,
            created = report.created,
            merged = report.merged,
            failed = report.failed,
            "fetch cycle complete"
        );
        CycleOutcome::Completed(report)
    }

    /// Count a failure against `source`; returns true when this failure opened the breaker.
    async fn record_failure(&self, source: &mut Source, now: DateTime<Utc>) -> bool {
        source.mark_failure(now);
        let mut tripped = false;
        if source.failure_count >= self.cfg.failure_threshold && !source.is_disabled() {
            source.disable(DISABLED_REASON, now);
            tripped = true;
            counter!("ingest_circuit_open_total", "source" => source.slug.clone()).increment(1);
            tracing::error!(
                target: "ingest",
                source_id = source.id,
                source_slug = %source.slug,
                failure_count = source.failure_count,
                "circuit breaker tripped, source disabled"
            );
        }
        if let Err(e) = self.store.save_source(source).await {
            tracing::warn!(target: "ingest", source_id = source.id, error = %e, "could not persist failure state");
        }
        tripped
    }

    async fn emit_failure(&self, source: &Source, error: &str, exhausted: bool) {
        self.events
            .emit(IngestEvent::SourceFetchFailed(SourceFetchFailed {
                source_id: source.id,
                slug: source.slug.clone(),
                error_message: error.to_string(),
                exhausted,
            }))
            .await;
    }
}
