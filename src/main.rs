//! News aggregator ingestion service.
//!
//! `news-aggregator`                         run the hourly fetch scheduler and serve `/metrics` + `/health`
//! `news-aggregator fetch [slug...]`          one fetch cycle for the enabled sources, then exit
//! `news-aggregator consume [dest] [limit]`   drain a message destination, then exit
//! `news-aggregator publish-sample [dest]`    publish a sample article message, then drain it
//!
//! The built-in brokers (`MESSAGING_DRIVER=memory|null`) keep nothing between processes, so
//! `consume` only sees messages published by the same process. A networked transport
//! implements `MessageBroker`.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use news_aggregator::config::{AppConfig, BrokerDriver};
use news_aggregator::events::{EventBus, FailurePublisher, MetricsListener, SOURCE_FETCH_FAILED};
use news_aggregator::ingest::scheduler::{
    jobs_for_enabled_sources, run_jobs, spawn_fetch_scheduler, FetchSchedulerCfg,
};
use news_aggregator::ingest::{AdapterRegistry, ArticlePersister, DedupEngine, FetchWorker, ProviderKind};
use news_aggregator::messaging::{
    sample_article_message, InMemoryBroker, MessageBroker, MessageConsumer, MessageProcessor,
    NullBroker,
};
use news_aggregator::metrics::Metrics;
use news_aggregator::store::{KeyValueStore, MemoryKeyValue, MemoryStore, Store};

/// `RUST_LOG` wins; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("news_aggregator=info,warn"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

struct App {
    cfg: AppConfig,
    store: Arc<dyn Store>,
    kv: Arc<dyn KeyValueStore>,
    broker: Arc<dyn MessageBroker>,
    worker: Arc<FetchWorker>,
}

async fn build(cfg: AppConfig) -> Result<App> {
    let memory = MemoryStore::new();
    for (kind, name) in [
        (ProviderKind::NewsApi, "NewsAPI"),
        (ProviderKind::Guardian, "The Guardian"),
        (ProviderKind::Nyt, "New York Times"),
    ] {
        memory
            .first_or_create_source(kind.slug(), name)
            .await
            .with_context(|| format!("seeding source {}", kind.slug()))?;
    }
    let store: Arc<dyn Store> = Arc::new(memory);
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValue::new());
    let broker: Arc<dyn MessageBroker> = match cfg.messaging.driver {
        BrokerDriver::Memory => Arc::new(InMemoryBroker::new()),
        BrokerDriver::Null => Arc::new(NullBroker),
    };

    let events = EventBus::new()
        .with_listener(Arc::new(MetricsListener))
        .with_listener(Arc::new(FailurePublisher::new(Arc::clone(&broker))));
    let registry = AdapterRegistry::from_config(&cfg, events.clone())?;

    let worker = Arc::new(FetchWorker::new(
        Arc::clone(&store),
        Arc::clone(&kv),
        registry,
        cfg.dedup.clone(),
        events,
        cfg.pipeline.clone(),
    ));

    Ok(App {
        cfg,
        store,
        kv,
        broker,
        worker,
    })
}

async fn serve(app: App) -> Result<()> {
    let metrics = Metrics::init()?;
    let scheduler = spawn_fetch_scheduler(
        Arc::clone(&app.worker),
        FetchSchedulerCfg {
            interval_secs: app.cfg.pipeline.fetch_interval_secs,
            slugs: Vec::new(),
        },
    );

    let listener = tokio::net::TcpListener::bind(&app.cfg.server.bind_addr)
        .await
        .with_context(|| format!("binding {}", app.cfg.server.bind_addr))?;
    tracing::info!(addr = %app.cfg.server.bind_addr, "serving /metrics and /health");
    axum::serve(listener, metrics.router())
        .await
        .context("http server")?;

    scheduler.abort();
    Ok(())
}

async fn fetch_once(app: App, slugs: Vec<String>) -> Result<()> {
    let jobs = jobs_for_enabled_sources(app.store.as_ref(), &slugs)
        .await
        .context("listing sources")?;
    if jobs.is_empty() {
        tracing::warn!("no enabled sources match");
    }
    for (source_id, outcome) in run_jobs(Arc::clone(&app.worker), jobs).await {
        tracing::info!(source_id, outcome = outcome.label(), "fetch dispatched");
    }
    Ok(())
}

async fn consume(app: App, destination: String, limit: usize) -> Result<()> {
    // Relayed failures must not be republished onto the destination being drained.
    let events = EventBus::new().with_listener(Arc::new(MetricsListener));
    let dedup = DedupEngine::new(app.cfg.dedup.clone(), app.store.supports_trigram());
    let processor = MessageProcessor::new(
        Arc::clone(&app.store),
        Arc::clone(&app.kv),
        Arc::clone(&app.broker),
        ArticlePersister::new(Arc::clone(&app.store), dedup),
        events,
        app.cfg.messaging.clone(),
    );
    let consumer = MessageConsumer::new(Arc::clone(&app.broker), Arc::new(processor));
    let report = consumer.drain(&destination, limit).await?;
    tracing::info!(
        destination = %destination,
        consumed = report.consumed,
        processed = report.processed,
        skipped = report.skipped,
        dead_lettered = report.dead_lettered,
        "drain finished"
    );
    Ok(())
}

async fn publish_sample(app: App, destination: String) -> Result<()> {
    let message = sample_article_message(chrono::Utc::now()).to_string();
    app.broker
        .publish(&destination, &message)
        .await
        .with_context(|| format!("publishing to {destination}"))?;
    tracing::info!(destination = %destination, "published sample message");
    consume(app, destination, 1).await
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::load_default().context("loading configuration")?;
    let app = build(cfg).await?;

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("fetch") => fetch_once(app, args.collect()).await,
        Some("consume") => {
            let destination = args.next().unwrap_or_else(|| SOURCE_FETCH_FAILED.to_string());
            let limit = match args.next() {
                Some(raw) => raw
                    .parse()
                    .with_context(|| format!("invalid limit {raw:?}"))?,
                None => 0,
            };
            consume(app, destination, limit).await
        }
        Some("publish-sample") => {
            let destination = args.next().unwrap_or_else(|| "articles.incoming".to_string());
            publish_sample(app, destination).await
        }
        Some(other) => anyhow::bail!(
            "unknown command {other:?}; expected `fetch`, `consume` or `publish-sample`"
        ),
        None => serve(app).await,
    }
}
