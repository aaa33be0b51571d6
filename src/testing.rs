//! Shared fixtures for unit tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::azure::auth::{AccessToken, IdentityProvider, TokenCache};
use crate::config::{RetryConfig, UpstreamConfig};
use crate::error::Result;

/// Identity provider that always hands out the same long-lived token.
pub struct StaticProvider;

#[async_trait]
impl IdentityProvider for StaticProvider {
  async fn acquire(&self) -> Result<AccessToken> {
    Ok(AccessToken {
      token: "test-token".into(),
      expires_in: Duration::from_secs(3600),
    })
  }
}

pub fn static_tokens() -> Arc<TokenCache> {
  Arc::new(TokenCache::new(
    Arc::new(StaticProvider),
    Duration::from_secs(300),
  ))
}

/// Identity provider handing out `token-1`, `token-2`, ... on each call.
#[derive(Default)]
pub struct SequenceProvider {
  calls: AtomicUsize,
}

impl SequenceProvider {
  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl IdentityProvider for SequenceProvider {
  async fn acquire(&self) -> Result<AccessToken> {
    let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
    Ok(AccessToken {
      token: format!("token-{}", n),
      expires_in: Duration::from_secs(3600),
    })
  }
}

pub fn sequence_tokens() -> (Arc<SequenceProvider>, Arc<TokenCache>) {
  let provider = Arc::new(SequenceProvider::default());
  let cache = Arc::new(TokenCache::new(provider.clone(), Duration::from_secs(300)));
  (provider, cache)
}

/// Upstream config pointed at a mock server with near-zero backoff.
pub fn upstream_config(base_url: &str, max_retries: u32) -> UpstreamConfig {
  UpstreamConfig {
    base_url: base_url.to_string(),
    timeout_secs: 5,
    connect_timeout_secs: 1,
    retry: RetryConfig {
      max_retries,
      base_backoff_ms: 1,
      max_backoff_ms: 5,
      jitter_ms: 0,
    },
    ..UpstreamConfig::default()
  }
}
