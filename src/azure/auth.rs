//! Bearer token acquisition and per-scope caching.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

use crate::config::{AuthConfig, Credentials};
use crate::error::{Error, Result};

/// Token as issued by the identity provider
#[derive(Clone)]
pub struct AccessToken {
  pub token: String,
  /// Lifetime reported by the provider
  pub expires_in: Duration,
}

/// Source of fresh bearer tokens.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
  async fn acquire(&self) -> Result<AccessToken>;
}

/// OAuth2 client-credentials grant against the tenant's token endpoint.
pub struct ClientSecretCredential {
  http: reqwest::Client,
  token_url: Url,
  credentials: Credentials,
  scope: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
  access_token: String,
  expires_in: u64,
}

impl ClientSecretCredential {
  pub fn new(config: &AuthConfig, credentials: Credentials, timeout: Duration) -> Result<Self> {
    let token_url = Url::parse(&format!(
      "{}/{}/oauth2/v2.0/token",
      config.authority_url.trim_end_matches('/'),
      credentials.tenant_id
    ))
    .map_err(|e| Error::Authentication(format!("invalid authority url: {}", e)))?;

    let http = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| Error::Authentication(format!("failed to build http client: {}", e)))?;

    Ok(Self {
      http,
      token_url,
      credentials,
      scope: config.scope.clone(),
    })
  }
}

#[async_trait]
impl IdentityProvider for ClientSecretCredential {
  async fn acquire(&self) -> Result<AccessToken> {
    let form = [
      ("grant_type", "client_credentials"),
      ("client_id", self.credentials.client_id.as_str()),
      ("client_secret", self.credentials.client_secret.as_str()),
      ("scope", self.scope.as_str()),
    ];

    let response = self
      .http
      .post(self.token_url.clone())
      .form(&form)
      .send()
      .await
      .map_err(|e| Error::Authentication(format!("token request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
      return Err(Error::Authentication(format!(
        "identity provider returned {}",
        status
      )));
    }

    let body: TokenResponse = response
      .json()
      .await
      .map_err(|e| Error::Authentication(format!("malformed token response: {}", e)))?;

    Ok(AccessToken {
      token: body.access_token,
      expires_in: Duration::from_secs(body.expires_in),
    })
  }
}

#[derive(Clone)]
struct CachedToken {
  token: String,
  expires_at: Instant,
}

type Slot = Arc<Mutex<Option<CachedToken>>>;

/// In-memory token cache keyed by scope (tenant or subscription id).
///
/// Callers racing on the same scope share one acquisition; different
/// scopes never wait on each other. Tokens are never persisted.
pub struct TokenCache {
  provider: Arc<dyn IdentityProvider>,
  safety_margin: Duration,
  slots: DashMap<String, Slot>,
}

impl TokenCache {
  pub fn new(provider: Arc<dyn IdentityProvider>, safety_margin: Duration) -> Self {
    Self {
      provider,
      safety_margin,
      slots: DashMap::new(),
    }
  }

  /// Return a valid token for `scope`, acquiring one if missing or expired.
  ///
  /// Provider failures surface as `Error::Authentication` and are not retried.
  pub async fn get_token(&self, scope: &str) -> Result<String> {
    // Clone the slot out so the shard lock is not held across the await
    let slot = self
      .slots
      .entry(scope.to_string())
      .or_insert_with(|| Arc::new(Mutex::new(None)))
      .clone();

    let mut entry = slot.lock().await;
    if let Some(cached) = entry.as_ref() {
      if cached.expires_at > Instant::now() {
        return Ok(cached.token.clone());
      }
    }

    tracing::debug!(scope, "acquiring fresh access token");
    let fresh = self.provider.acquire().await.map_err(|e| match e {
      Error::Authentication(_) => e,
      other => Error::Authentication(other.to_string()),
    })?;

    let lifetime = fresh.expires_in.saturating_sub(self.safety_margin);
    *entry = Some(CachedToken {
      token: fresh.token.clone(),
      expires_at: Instant::now() + lifetime,
    });

    Ok(fresh.token)
  }

  /// Forget every cached token, e.g. after credential rotation.
  pub fn clear(&self) {
    self.slots.clear();
  }
}
