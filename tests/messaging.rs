// tests/messaging.rs
mod common;

use std::sync::Arc;

use serde_json::{json, Value};

use common::{fixture, pipeline_cfg, CollectingListener, ScriptedAdapter};
use news_aggregator::config::{DedupConfig, MessagingConfig};
use news_aggregator::events::{EventBus, FailurePublisher, SOURCE_FETCH_FAILED};
use news_aggregator::ingest::{AdapterRegistry, ArticlePersister, DedupEngine, FetchJob, FetchWorker};
use news_aggregator::messaging::{
    sample_article_message, DrainReport, Envelope, InMemoryBroker, MessageBroker,
    MessageConsumer, MessageProcessor, ProcessOutcome,
};
use news_aggregator::store::{KeyValueStore, MemoryKeyValue, MemoryStore, Store};

struct Rig {
    store: MemoryStore,
    kv: Arc<MemoryKeyValue>,
    broker: Arc<InMemoryBroker>,
    events: Arc<CollectingListener>,
    processor: Arc<MessageProcessor>,
}

fn rig(store: MemoryStore) -> Rig {
    let kv = Arc::new(MemoryKeyValue::new());
    let broker = Arc::new(InMemoryBroker::new());
    let events = Arc::new(CollectingListener::new());
    let persister = ArticlePersister::new(
        Arc::new(store.clone()),
        DedupEngine::new(DedupConfig::default(), store.supports_trigram()),
    );
    let processor = Arc::new(MessageProcessor::new(
        Arc::new(store.clone()),
        kv.clone(),
        broker.clone(),
        persister,
        EventBus::new().with_listener(events.clone()),
        MessagingConfig::default(),
    ));
    Rig {
        store,
        kv,
        broker,
        events,
        processor,
    }
}

fn article_message(data: Value) -> Value {
    json!({"version": 1, "type": "article.newsapi", "data": data})
}

fn bbc_item() -> Value {
    fixture("newsapi_top_headlines.json")["articles"][0].clone()
}

#[tokio::test]
async fn article_message_is_persisted_once() {
    let r = rig(MemoryStore::new());
    let msg = article_message(bbc_item());

    let first = r.processor.process(&msg).await;
    assert!(matches!(first, ProcessOutcome::Persisted { created: true, .. }));
    assert_eq!(r.processor.process(&msg).await, ProcessOutcome::SkippedDuplicate);

    assert_eq!(r.store.articles().len(), 1);
    let key = Envelope::validate(&msg).unwrap().idempotency_key();
    assert!(r.kv.get(&key).await.unwrap().is_some());
}

#[tokio::test]
async fn same_article_in_a_different_envelope_merges() {
    let r = rig(MemoryStore::new());
    let mut changed = bbc_item();
    changed["description"] = json!("Revised summary");

    r.processor.process(&article_message(bbc_item())).await;
    let second = r.processor.process(&article_message(changed)).await;
    assert!(matches!(second, ProcessOutcome::Persisted { created: false, .. }));

    let articles = r.store.articles();
    assert_eq!(articles.len(), 1);
    assert_eq!(articles[0].excerpt.as_deref(), Some("Revised summary"));
}

#[tokio::test]
async fn source_resolution_order() {
    let store = MemoryStore::new();
    let pinned = store.insert_source("pinned", "Pinned");
    let r = rig(store);

    // meta.source_id wins
    let mut with_meta = article_message(json!({"title": "One", "source": {"id": "bbc-news"}}));
    with_meta["meta"] = json!({"source_id": pinned.id});
    r.processor.process(&with_meta).await;

    // then source.id as a slug, created on first sight
    r.processor
        .process(&article_message(json!({"title": "Two", "source": {"id": "bbc-news"}})))
        .await;

    // then the catch-all source
    r.processor
        .process(&article_message(json!({"title": "Three", "source": {"id": null}})))
        .await;

    let articles = r.store.articles();
    assert_eq!(articles.len(), 3);
    assert_eq!(articles[0].source_id, pinned.id);

    let bbc = r.store.find_source_by_slug("bbc-news").await.unwrap().unwrap();
    assert_eq!(bbc.name, "Bbc news");
    assert_eq!(articles[1].source_id, bbc.id);

    let unknown = r.store.find_source_by_slug("unknown").await.unwrap().unwrap();
    assert_eq!(unknown.name, "Unknown Source");
    assert_eq!(articles[2].source_id, unknown.id);
}

#[tokio::test]
async fn invalid_envelope_goes_to_the_type_dead_letter_queue() {
    let r = rig(MemoryStore::new());

    let outcome = r
        .processor
        .process(&json!({"version": "1", "type": "article.guardian", "data": {}}))
        .await;
    assert!(matches!(
        outcome,
        ProcessOutcome::DeadLettered { ref destination, .. } if destination == "dlq.article.guardian"
    ));

    r.processor.process(&json!({"data": []})).await;
    assert_eq!(r.broker.messages("dlq.unknown"), vec![r#"{"data":[]}"#.to_string()]);
    assert!(r.store.articles().is_empty());
}

#[tokio::test]
async fn processing_failure_is_dead_lettered_and_can_be_retried() {
    let r = rig(MemoryStore::new());
    let msg = article_message(json!({"title": "Bad date", "publishedAt": "not-a-date"}));

    for _ in 0..2 {
        let outcome = r.processor.process(&msg).await;
        assert!(matches!(outcome, ProcessOutcome::DeadLettered { .. }));
    }

    let dlq = r.broker.messages("dlq.article.newsapi");
    assert_eq!(dlq.len(), 2);
    let body: Value = serde_json::from_str(&dlq[0]).unwrap();
    assert_eq!(body["payload"], msg);
    assert!(body["error"].as_str().unwrap().contains("not-a-date"));

    let key = Envelope::validate(&msg).unwrap().idempotency_key();
    assert!(r.kv.get(&key).await.unwrap().is_none());
    assert!(r.store.articles().is_empty());
}

#[tokio::test]
async fn fetch_failure_message_is_relayed_to_listeners() {
    let store = MemoryStore::new();
    let src = store.insert_source("nytimes", "New York Times");
    let r = rig(store);

    let msg = json!({
        "version": 1,
        "type": SOURCE_FETCH_FAILED,
        "data": {"source_id": src.id, "error_message": "timeout", "exhausted": true}
    });
    assert_eq!(
        r.processor.process(&msg).await,
        ProcessOutcome::FailureRelayed { source_id: src.id }
    );
    let relayed = r.events.fetch_failures();
    assert_eq!(relayed.len(), 1);
    assert_eq!(relayed[0].slug, "nytimes");
    assert!(relayed[0].exhausted);

    // exhausted defaults to false
    let msg = json!({
        "version": 1,
        "type": SOURCE_FETCH_FAILED,
        "data": {"source_id": src.id, "error_message": "bad item"}
    });
    r.processor.process(&msg).await;
    assert!(!r.events.fetch_failures()[1].exhausted);
}

#[tokio::test]
async fn fetch_failure_for_unknown_source_is_dead_lettered() {
    let r = rig(MemoryStore::new());
    for data in [
        json!({"source_id": 42, "error_message": "x"}),
        json!({"error_message": "x"}),
        json!({"source_id": 1}),
    ] {
        let msg = json!({"version": 1, "type": SOURCE_FETCH_FAILED, "data": data});
        assert!(matches!(
            r.processor.process(&msg).await,
            ProcessOutcome::DeadLettered { .. }
        ));
    }
    assert_eq!(r.broker.messages("dlq.source.fetch.failed").len(), 3);
    assert!(r.events.snapshot().is_empty());
}

#[tokio::test]
async fn consumer_drains_with_limit_and_dead_letters_garbage() {
    let r = rig(MemoryStore::new());
    let dest = "articles.incoming";
    r.broker.push(dest, "{not json").await.unwrap();
    for title in ["A", "B", "C"] {
        let msg = article_message(json!({"title": title, "url": format!("https://x.example/{title}")}));
        r.broker.push(dest, &msg.to_string()).await.unwrap();
    }
    r.broker
        .push(dest, &json!({"version": 1, "type": "t", "data": "x"}).to_string())
        .await
        .unwrap();

    let consumer = MessageConsumer::new(r.broker.clone(), r.processor.clone());
    let report = consumer.drain(dest, 2).await.unwrap();
    assert_eq!(
        report,
        DrainReport {
            consumed: 2,
            processed: 2,
            skipped: 0,
            dead_lettered: 1,
        }
    );
    assert_eq!(r.broker.messages("dlq.articles.incoming"), vec!["{not json".to_string()]);
    assert_eq!(r.broker.queue_length(dest).await.unwrap(), 2);

    let rest = consumer.drain(dest, 0).await.unwrap();
    assert_eq!((rest.consumed, rest.processed, rest.dead_lettered), (1, 1, 1));
    assert_eq!(r.broker.queue_length(dest).await.unwrap(), 0);
    assert_eq!(r.broker.messages("dlq.articles.incoming").len(), 2);
    assert_eq!(r.store.articles().len(), 3);
}

#[tokio::test]
async fn worker_failures_reach_the_consumer_through_the_broker() {
    let store = MemoryStore::new();
    let src = store.insert_source("newsapi", "NewsAPI");
    let r = rig(store.clone());

    let mut registry = AdapterRegistry::new();
    registry.register(
        "newsapi",
        Arc::new(ScriptedAdapter::returning(vec![]).then_fail("dns error")),
    );
    let worker = FetchWorker::new(
        Arc::new(store),
        Arc::new(MemoryKeyValue::new()),
        registry,
        DedupConfig::default(),
        EventBus::new().with_listener(Arc::new(FailurePublisher::new(r.broker.clone()))),
        pipeline_cfg(),
    );
    worker.run(&FetchJob::new(src.id)).await;

    let published = r.broker.messages(SOURCE_FETCH_FAILED);
    assert_eq!(published.len(), 1);
    let envelope: Value = serde_json::from_str(&published[0]).unwrap();
    assert_eq!(envelope["version"], 1);
    assert_eq!(envelope["data"]["source_id"], src.id);
    assert_eq!(envelope["data"]["exhausted"], true);
    assert!(envelope["data"]["timestamp"].is_string());

    let consumer = MessageConsumer::new(r.broker.clone(), r.processor.clone());
    let report = consumer.drain(SOURCE_FETCH_FAILED, 0).await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(r.events.fetch_failures()[0].error_message, "dns error");
}

#[tokio::test]
async fn published_sample_message_is_consumed_and_stored() {
    let r = rig(MemoryStore::new());
    let dest = "articles.incoming";
    let sample = sample_article_message(chrono::Utc::now());
    r.broker.publish(dest, &sample.to_string()).await.unwrap();

    let consumer = MessageConsumer::new(r.broker.clone(), r.processor.clone());
    let report = consumer.drain(dest, 1).await.unwrap();
    assert_eq!((report.consumed, report.processed), (1, 1));

    let source = r.store.find_source_by_slug("sample-source").await.unwrap().unwrap();
    let articles = r.store.articles();
    assert_eq!(articles.len(), 1);
    assert_eq!(articles[0].source_id, source.id);
    assert_eq!(articles[0].title.as_deref(), Some("Smoke Test Article"));
    assert_eq!(r.store.authors()[0].name, "CI Smoke");
}

#[tokio::test]
async fn topic_subscribers_receive_published_messages() {
    let broker = InMemoryBroker::new();
    let seen = Arc::new(parking_lot::Mutex::new(Vec::<String>::new()));
    let sink = seen.clone();
    broker
        .subscribe_to_topic("news", Arc::new(move |m: &str| sink.lock().push(m.to_string())))
        .await
        .unwrap();

    broker.publish_to_topic("news", "hello").await.unwrap();
    broker.publish_to_topic("other", "ignored").await.unwrap();
    assert_eq!(*seen.lock(), vec!["hello".to_string()]);
}
