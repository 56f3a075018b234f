// src/ingest/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::error::StoreError;
use crate::ingest::worker::{CycleOutcome, FetchJob, FetchWorker};
use crate::store::Store;

#[derive(Clone, Debug)]
pub struct FetchSchedulerCfg {
    pub interval_secs: u64,
    /// Only these slugs; empty means every enabled source.
    pub slugs: Vec<String>,
}

/// One job per enabled source, optionally restricted to `slugs`.
pub async fn jobs_for_enabled_sources(
    store: &dyn Store,
    slugs: &[String],
) -> Result<Vec<FetchJob>, StoreError> {
    let sources = store.list_sources().await?;
    Ok(sources
        .into_iter()
        .filter(|s| !s.is_disabled())
        .filter(|s| slugs.is_empty() || slugs.iter().any(|w| w == &s.slug))
        .map(|s| FetchJob::new(s.id))
        .collect())
}

/// Run every job concurrently and wait for all of them.
pub async fn run_jobs(worker: Arc<FetchWorker>, jobs: Vec<FetchJob>) -> Vec<(i64, CycleOutcome)> {
    let mut set = JoinSet::new();
    for job in jobs {
        let w = Arc::clone(&worker);
        set.spawn(async move {
            let outcome = w.run(&job).await;
            (job.source_id, outcome)
        });
    }

    let mut out = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(r) => out.push(r),
            Err(e) => tracing::error!(target: "ingest", error = %e, "fetch task panicked"),
        }
    }
    out.sort_by_key(|(id, _)| *id);
    out
}

/// Enqueue a fetch for every enabled source on a fixed interval.
/// A tick waits for the previous batch, so cycles for the same source never overlap here.
pub fn spawn_fetch_scheduler(worker: Arc<FetchWorker>, cfg: FetchSchedulerCfg) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(cfg.interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let jobs = match jobs_for_enabled_sources(worker.store().as_ref(), &cfg.slugs).await {
                Ok(jobs) => jobs,
                Err(e) => {
                    tracing::error!(target: "ingest", error = %e, "listing sources failed");
                    continue;
                }
            };
            let dispatched = jobs.len();
            let results = run_jobs(Arc::clone(&worker), jobs).await;

            counter!("ingest_runs_total").increment(1);
            gauge!("ingest_pipeline_last_run_ts").set(chrono::Utc::now().timestamp() as f64);
            tracing::info!(
                target: "ingest",
                dispatched,
                completed = results
                    .iter()
                    .filter(|(_, o)| matches!(o, CycleOutcome::Completed(_)))
                    .count(),
                "scheduled fetch tick"
            );
        }
    })
}
