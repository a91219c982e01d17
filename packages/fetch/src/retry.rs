//! HTTP GET with a bounded retry budget.
//!
//! All data layer fetchers go through [`RetryingFetcher::fetch`] instead of
//! calling the transport directly, so every request gets the same attempt
//! budget, backoff and cancellation behaviour.
//!
//! # Usage
//!
//! ```ignore
//! let fetcher = RetryingFetcher::new(client, RetryPolicy::default());
//! let body = fetcher.fetch(&url, Some(&token)).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{FetchError, HttpClient, TransportError};

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// The same delay before every retry.
    #[default]
    Fixed,
    /// `delay × 2^(n-1)` before retry `n` (2s, 4s, 8s, ...).
    Exponential,
}

/// Attempt budget and delay for one [`RetryingFetcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Must be at least 1.
    pub max_attempts: u32,
    /// Base delay between attempts, in milliseconds.
    pub delay_ms: u64,
    /// Delay growth.
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 2_000,
            backoff: Backoff::Fixed,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt `attempt` (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let base = Duration::from_millis(self.delay_ms);
        match self.backoff {
            Backoff::Fixed => base,
            Backoff::Exponential => {
                let exponent = attempt.saturating_sub(1).min(16);
                base.saturating_mul(1u32 << exponent)
            }
        }
    }
}

/// Resilient single-URL GET.
#[derive(Clone)]
pub struct RetryingFetcher {
    client: Arc<dyn HttpClient>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for RetryingFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingFetcher")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RetryingFetcher {
    /// Creates a fetcher over the given transport.
    #[must_use]
    pub fn new(client: Arc<dyn HttpClient>, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// The policy this fetcher retries with.
    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// GETs `url` until a 2xx response arrives or the attempt budget runs
    /// out, returning the complete body.
    ///
    /// The cancellation token is checked before every attempt, including
    /// the first; a fired token returns [`FetchError::Cancelled`] without
    /// spending another attempt. A backoff wait in progress also ends as
    /// soon as the token fires. No delay follows the final attempt.
    ///
    /// # Errors
    ///
    /// * [`FetchError::InvalidRequest`] for an empty URL or a zero attempt
    ///   budget.
    /// * [`FetchError::Cancelled`] if the token fired.
    /// * [`FetchError::Exhausted`] naming the URL and wrapping the last
    ///   transport error once every attempt has failed.
    pub async fn fetch(
        &self,
        url: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<u8>, FetchError> {
        if url.trim().is_empty() {
            return Err(FetchError::InvalidRequest {
                url: url.to_string(),
                message: "URL is empty".to_string(),
            });
        }
        let total = self.policy.max_attempts;
        if total == 0 {
            return Err(FetchError::InvalidRequest {
                url: url.to_string(),
                message: "attempt budget must be at least 1".to_string(),
            });
        }

        let mut last_status: Option<u16> = None;
        let mut last_error: Option<TransportError> = None;

        for attempt in 1..=total {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(FetchError::Cancelled {
                    url: url.to_string(),
                });
            }

            match self.client.get(url).await {
                Ok(response) if response.is_success() => return Ok(response.body),
                Ok(response) => {
                    log::warn!(
                        "GET attempt {attempt}/{total} to {url} failed: HTTP {}",
                        response.status
                    );
                    last_status = Some(response.status);
                }
                Err(e) => {
                    log::warn!("GET attempt {attempt}/{total} to {url} failed: {e}");
                    last_error = Some(e);
                }
            }

            if attempt < total {
                self.pause(attempt, url, cancel).await?;
            }
        }

        Err(FetchError::Exhausted {
            url: url.to_string(),
            attempts: total,
            last_status,
            source: last_error,
        })
    }

    /// Waits out the backoff after failed attempt `attempt`, returning
    /// early with [`FetchError::Cancelled`] if the token fires.
    pub(crate) async fn pause(
        &self,
        attempt: u32,
        url: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), FetchError> {
        let delay = self.policy.delay_after(attempt);
        if delay.is_zero() {
            return Ok(());
        }
        log::debug!("retrying {url} in {delay:?}...");

        match cancel {
            Some(token) => {
                tokio::select! {
                    () = token.cancelled() => Err(FetchError::Cancelled {
                        url: url.to_string(),
                    }),
                    () = tokio::time::sleep(delay) => Ok(()),
                }
            }
            None => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeClient, ok, refused, status};

    const URL: &str = "https://example.test/data";

    fn fetcher(client: &Arc<FakeClient>, max_attempts: u32, delay_ms: u64) -> RetryingFetcher {
        RetryingFetcher::new(
            client.clone(),
            RetryPolicy {
                max_attempts,
                delay_ms,
                backoff: Backoff::Fixed,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_uses_exact_attempt_budget() {
        for attempts in 1..=4u32 {
            let client = Arc::new(FakeClient::new(|_| refused()));
            let start = tokio::time::Instant::now();

            let err = fetcher(&client, attempts, 2_000)
                .fetch(URL, None)
                .await
                .unwrap_err();

            assert_eq!(client.call_count(), attempts as usize);
            // Sleeps between attempts, never after the last one
            let expected = Duration::from_millis(2_000 * u64::from(attempts - 1));
            let elapsed = start.elapsed();
            assert!(
                elapsed >= expected && elapsed < expected + Duration::from_millis(1_000),
                "expected ~{expected:?} of backoff, got {elapsed:?}"
            );
            match err {
                FetchError::Exhausted {
                    url,
                    attempts: made,
                    source,
                    ..
                } => {
                    assert_eq!(url, URL);
                    assert_eq!(made, attempts);
                    assert!(source.is_some());
                }
                other => panic!("expected Exhausted, got {other:?}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pre_cancelled_makes_zero_attempts() {
        let client = Arc::new(FakeClient::new(|_| ok("{}")));
        let token = CancellationToken::new();
        token.cancel();

        let err = fetcher(&client, 3, 1_000)
            .fetch(URL, Some(&token))
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let client = Arc::new(
            FakeClient::new(|_| ok("payload")).with_queue([status(503), refused()]),
        );

        let body = fetcher(&client, 3, 500).fetch(URL, None).await.unwrap();

        assert_eq!(body, b"payload");
        assert_eq!(client.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn status_failures_report_last_status() {
        let client = Arc::new(FakeClient::new(|_| status(404)));

        let err = fetcher(&client, 2, 0).fetch(URL, None).await.unwrap_err();

        match err {
            FetchError::Exhausted {
                last_status,
                source,
                ..
            } => {
                assert_eq!(last_status, Some(404));
                assert!(source.is_none());
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff_wait() {
        let client = Arc::new(FakeClient::new(|_| status(500)));
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });
        let start = tokio::time::Instant::now();

        let err = fetcher(&client, 5, 60_000)
            .fetch(URL, Some(&token))
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(client.call_count(), 1);
        assert!(start.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn rejects_invalid_requests() {
        let client = Arc::new(FakeClient::new(|_| ok("")));

        let empty = fetcher(&client, 3, 0).fetch("", None).await.unwrap_err();
        assert!(matches!(empty, FetchError::InvalidRequest { .. }));

        let zero = fetcher(&client, 0, 0).fetch(URL, None).await.unwrap_err();
        assert!(matches!(zero, FetchError::InvalidRequest { .. }));

        assert_eq!(client.call_count(), 0);
    }

    #[test]
    fn exponential_backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 5,
            delay_ms: 2_000,
            backoff: Backoff::Exponential,
        };
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(4));
        assert_eq!(policy.delay_after(3), Duration::from_secs(8));
    }
}
