// tests/http_retry.rs
mod common;

use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;

use common::CollectingListener;
use news_aggregator::events::EventBus;
use news_aggregator::http::{RetryPolicy, RetryingHttpClient};

fn client() -> (RetryingHttpClient, Arc<CollectingListener>) {
    let events = Arc::new(CollectingListener::new());
    let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5));
    let http = RetryingHttpClient::new(policy, EventBus::new().with_listener(events.clone()))
        .expect("client");
    (http, events)
}

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn server_errors_are_retried_until_attempts_run_out() {
    let server = MockServer::start_async().await;
    let m = server
        .mock_async(|when, then| {
            when.method(GET).path("/flaky");
            then.status(503).body("unavailable");
        })
        .await;
    let (http, events) = client();

    let resp = http
        .get(&server.url("/flaky"), &[], &[], TIMEOUT)
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 503);
    m.assert_hits_async(3).await;

    let attempts = events.http_attempts();
    assert_eq!(attempts.iter().map(|a| a.attempt).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert!(attempts.iter().all(|a| a.status == Some(503)));
    assert_eq!(
        attempts.iter().map(|a| a.exhausted).collect::<Vec<_>>(),
        vec![false, false, true]
    );
}

#[tokio::test]
async fn success_is_returned_after_one_attempt() {
    let server = MockServer::start_async().await;
    let m = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/ok")
                .query_param("q", "fire")
                .header("X-Api-Key", "secret");
            then.status(200).json_body(serde_json::json!({"ok": true}));
        })
        .await;
    let (http, events) = client();

    let resp = http
        .get(
            &server.url("/ok"),
            &[("q".to_string(), "fire".to_string())],
            &[("X-Api-Key".to_string(), "secret".to_string())],
            TIMEOUT,
        )
        .await
        .unwrap();
    assert!(resp.status().is_success());
    m.assert_hits_async(1).await;

    let attempts = events.http_attempts();
    assert_eq!(attempts.len(), 1);
    assert!(!attempts[0].exhausted);
    assert_eq!(attempts[0].uri, server.url("/ok"));
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start_async().await;
    let m = server
        .mock_async(|when, then| {
            when.method(GET).path("/missing");
            then.status(404);
        })
        .await;
    let (http, events) = client();

    let resp = http
        .get(&server.url("/missing"), &[], &[], TIMEOUT)
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 404);
    m.assert_hits_async(1).await;
    let attempts = events.http_attempts();
    assert_eq!(attempts.len(), 1);
    assert!(!attempts[0].exhausted);
}

#[tokio::test]
async fn transport_errors_surface_after_the_last_attempt() {
    let (http, events) = client();

    let result = http.get("http://127.0.0.1:1/", &[], &[], TIMEOUT).await;
    assert!(result.is_err());

    let attempts = events.http_attempts();
    assert_eq!(attempts.len(), 3);
    assert!(attempts.iter().all(|a| a.status.is_none() && a.error.is_some()));
    assert!(attempts[2].exhausted);
    assert!(!attempts[0].exhausted && !attempts[1].exhausted);
}

#[tokio::test]
async fn single_attempt_policy_does_not_retry() {
    let server = MockServer::start_async().await;
    let m = server
        .mock_async(|when, then| {
            when.method(GET).path("/once");
            then.status(500);
        })
        .await;
    let events = Arc::new(CollectingListener::new());
    let http = RetryingHttpClient::new(
        RetryPolicy::new(1, Duration::from_millis(1), Duration::from_millis(1)),
        EventBus::new().with_listener(events.clone()),
    )
    .unwrap();

    let resp = http.get(&server.url("/once"), &[], &[], TIMEOUT).await.unwrap();
    assert_eq!(resp.status().as_u16(), 500);
    m.assert_hits_async(1).await;
    assert!(events.http_attempts()[0].exhausted);
}
