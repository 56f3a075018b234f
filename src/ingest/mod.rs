// src/ingest/mod.rs
pub mod dedup;
pub mod normalize;
pub mod persist;
pub mod providers;
pub mod scheduler;
pub mod types;
pub mod worker;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

pub use dedup::{DedupEngine, MatchStrategy};
pub use persist::{ArticlePersister, PersistOutcome};
pub use providers::AdapterRegistry;
pub use types::{FetchParams, NormalizedArticle, ProviderKind, SourceAdapter};
pub use worker::{CycleOutcome, CycleReport, FetchJob, FetchWorker};

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "http_attempts_total",
            "Outbound provider HTTP attempts, labelled by exhaustion."
        );
        describe_histogram!(
            "http_attempt_ms",
            "Elapsed time of a provider request up to each attempt, in milliseconds."
        );
        describe_histogram!("provider_fetch_ms", "Successful provider fetch time in milliseconds.");
        describe_counter!("provider_items_total", "Raw items returned by providers.");
        describe_counter!("ingest_cycles_total", "Fetch cycles by outcome.");
        describe_counter!("ingest_items_total", "Fetched items by persistence result.");
        describe_counter!(
            "ingest_fetch_failures_total",
            "Cycle-level and item-level source failures."
        );
        describe_counter!(
            "ingest_circuit_open_total",
            "Times a source was disabled by the circuit breaker."
        );
        describe_counter!("ingest_runs_total", "Scheduler ticks.");
        describe_gauge!(
            "ingest_pipeline_last_run_ts",
            "Unix ts when the fetch scheduler last ran."
        );
        describe_counter!("messaging_messages_total", "Inbound messages by outcome.");
    });
}
