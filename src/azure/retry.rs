//! Bounded retry with exponential backoff for idempotent upstream calls.

use rand::Rng;
use reqwest::{RequestBuilder, Response, StatusCode};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::RetryConfig;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
  pub max_retries: u32,
  pub base_backoff: Duration,
  pub max_backoff: Duration,
  pub jitter: Duration,
}

impl RetryPolicy {
  /// Single attempt, no retries.
  pub fn none() -> Self {
    Self {
      max_retries: 0,
      base_backoff: Duration::ZERO,
      max_backoff: Duration::ZERO,
      jitter: Duration::ZERO,
    }
  }

  fn backoff(&self, attempt: u32) -> Duration {
    // base * 2^(attempt - 1), capped
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    let raw = self.base_backoff.saturating_mul(factor).min(self.max_backoff);

    let jitter_ms = self.jitter.as_millis() as u64;
    let jitter = if jitter_ms == 0 {
      0
    } else {
      rand::thread_rng().gen_range(0..=jitter_ms)
    };
    raw + Duration::from_millis(jitter)
  }

  fn wait_for(&self, response: &Response, attempt: u32) -> Duration {
    retry_after(response)
      .map(|d| d.min(self.max_backoff.max(self.base_backoff)))
      .unwrap_or_else(|| self.backoff(attempt))
  }
}

impl From<&RetryConfig> for RetryPolicy {
  fn from(c: &RetryConfig) -> Self {
    Self {
      max_retries: c.max_retries,
      base_backoff: Duration::from_millis(c.base_backoff_ms),
      max_backoff: Duration::from_millis(c.max_backoff_ms),
      jitter: Duration::from_millis(c.jitter_ms),
    }
  }
}

fn is_retryable(status: StatusCode) -> bool {
  status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Retry-After given in seconds; HTTP-date values fall back to backoff.
fn retry_after(response: &Response) -> Option<Duration> {
  response
    .headers()
    .get(reqwest::header::RETRY_AFTER)?
    .to_str()
    .ok()?
    .trim()
    .parse::<u64>()
    .ok()
    .map(Duration::from_secs)
}

/// Send a request built by `build`, retrying transport errors, 429 and 5xx.
///
/// After the last attempt the final response is returned as-is (even when
/// it is an error status) so the caller decides how to surface it.
pub async fn send_with_retry<F>(build: F, policy: &RetryPolicy) -> reqwest::Result<Response>
where
  F: Fn() -> RequestBuilder,
{
  let mut attempt = 0;

  loop {
    attempt += 1;

    match build().send().await {
      Ok(response) => {
        let status = response.status();
        if !is_retryable(status) {
          return Ok(response);
        }

        if attempt > policy.max_retries {
          debug!(attempt, %status, "retries exhausted");
          return Ok(response);
        }

        let wait = policy.wait_for(&response, attempt);
        warn!(
          attempt,
          max_attempts = policy.max_retries + 1,
          %status,
          ?wait,
          "upstream call failed, retrying"
        );
        sleep(wait).await;
      }
      Err(e) => {
        if attempt > policy.max_retries {
          return Err(e);
        }

        let wait = policy.backoff(attempt);
        warn!(
          attempt,
          max_attempts = policy.max_retries + 1,
          error = %e,
          ?wait,
          "upstream call failed, retrying"
        );
        sleep(wait).await;
      }
    }
  }
}
