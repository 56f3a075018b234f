// src/http.rs
//! Outbound GET with exponential backoff. This is the only layer that retries
//! provider calls and the only source of retry telemetry; callers must not retry again.

use std::time::{Duration, Instant};

use rand::Rng;
use reqwest::{Client, Response};

use crate::events::{EventBus, HttpAttempt, IngestEvent};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
/// How many times to try and how long to wait between tries.
pub struct RetryPolicy {
    attempts: u32,
    /// Backoff before the second attempt; doubles for every further attempt.
    base_backoff: Duration,
    /// Upper bound for any single backoff, jitter included.
    max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_backoff,
            max_backoff,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// `min(max, base * 2^(attempt-1) + jitter)` for a 1-based `attempt`.
    pub fn backoff(&self, attempt: u32, jitter: Duration) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let grown = self
            .base_backoff
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_backoff);
        std::cmp::min(self.max_backoff, grown.saturating_add(jitter))
    }

    /// Backoff with jitter drawn uniformly from `0..=base`.
    pub fn jittered_backoff(&self, attempt: u32) -> Duration {
        let base_ms = self.base_backoff.as_millis() as u64;
        let jitter = rand::rng().random_range(0..=base_ms);
        self.backoff(attempt, Duration::from_millis(jitter))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(2000),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RetryingHttpClient {
    client: Client,
    policy: RetryPolicy,
    events: EventBus,
}

impl RetryingHttpClient {
    pub fn new(policy: RetryPolicy, events: EventBus) -> reqwest::Result<Self> {
        let client = Client::builder()
            .user_agent("news-aggregator/0.1")
            .connect_timeout(Duration::from_secs(4))
            .build()?;
        Ok(Self::with_client(client, policy, events))
    }

    pub fn with_client(client: Client, policy: RetryPolicy, events: EventBus) -> Self {
        Self {
            client,
            policy,
            events,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// GET `url`, retrying transport errors and 5xx responses while attempts remain.
    ///
    /// A response below 500, or any response on the final attempt, is returned as-is.
    /// A transport error on the final attempt is returned as `Err`.
    pub async fn get(
        &self,
        url: &str,
        query: &[(String, String)],
        headers: &[(String, String)],
        timeout: Duration,
    ) -> reqwest::Result<Response> {
        let started = Instant::now();
        let attempts = self.policy.attempts();
        let mut attempt = 1;

        loop {
            let last = attempt >= attempts;
            let mut req = self.client.get(url).query(query).timeout(timeout);
            for (name, value) in headers {
                req = req.header(name.as_str(), value.as_str());
            }

            match req.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let retryable = status.is_server_error();
                    self.record(HttpAttempt {
                        uri: url.to_string(),
                        attempt,
                        status: Some(status.as_u16()),
                        error: None,
                        elapsed_ms: elapsed_ms(started),
                        exhausted: retryable && last,
                    })
                    .await;

                    if retryable && !last {
                        let wait = self.policy.jittered_backoff(attempt);
                        tracing::debug!(uri = url, attempt, status = status.as_u16(), wait_ms = wait.as_millis() as u64, "server error, retrying");
                        tokio::time::sleep(wait).await;
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(e) => {
                    self.record(HttpAttempt {
                        uri: url.to_string(),
                        attempt,
                        status: None,
                        error: Some(e.to_string()),
                        elapsed_ms: elapsed_ms(started),
                        exhausted: last,
                    })
                    .await;

                    if last {
                        tracing::warn!(uri = url, attempt, error = %e, "http retries exhausted");
                        return Err(e);
                    }
                    let wait = self.policy.jittered_backoff(attempt);
                    tracing::debug!(uri = url, attempt, error = %e, wait_ms = wait.as_millis() as u64, "transport error, retrying");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn record(&self, attempt: HttpAttempt) {
        self.events.emit(IngestEvent::HttpAttempt(attempt)).await;
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
