use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::sync::Arc;
use url::Url;

use crate::azure::api_types::{
  ApiCommunication, ApiList, ApiNewCommunication, ApiSubscription, ApiTicket,
};
use crate::azure::auth::TokenCache;
use crate::azure::retry::{send_with_retry, RetryPolicy};
use crate::azure::types::{
  CaseDetail, Communication, CommunicationRecord, NewCommunication, Subscription, SupportCase,
};
use crate::config::UpstreamConfig;
use crate::error::{Error, Result};
use crate::mirror::{Fetched, Mirror};

const SUPPORT_PROVIDER: &str = "providers/Microsoft.Support/supportTickets";

/// Support API client.
///
/// Attaches a cached bearer token to every call, retries idempotent reads,
/// and writes whitelisted fields of every successful read through to the
/// mirror. Failures are returned unchanged; fallback is decided by the caller.
///
/// A 401 drops every cached token and the call is repeated once with a
/// freshly acquired one.
#[derive(Clone)]
pub struct SupportClient {
  http: reqwest::Client,
  base_url: Url,
  api_version: String,
  retry: RetryPolicy,
  max_pages: usize,
  tokens: Arc<TokenCache>,
  /// Token scope for tenant-wide calls (subscription listing)
  tenant_scope: String,
  mirror: Mirror,
}

impl SupportClient {
  pub fn new(
    config: &UpstreamConfig,
    tokens: Arc<TokenCache>,
    tenant_scope: impl Into<String>,
    mirror: Mirror,
  ) -> Result<Self> {
    // Without a trailing slash `Url::join` would replace the last segment
    let mut base = config.base_url.clone();
    if !base.ends_with('/') {
      base.push('/');
    }
    let base_url = Url::parse(&base)
      .map_err(|e| Error::upstream(format!("invalid base url {}: {}", config.base_url, e)))?;

    let http = reqwest::Client::builder()
      .timeout(config.timeout())
      .connect_timeout(config.connect_timeout())
      .build()
      .map_err(|e| Error::upstream(format!("failed to build http client: {}", e)))?;

    Ok(Self {
      http,
      base_url,
      api_version: config.api_version.clone(),
      retry: RetryPolicy::from(&config.retry),
      max_pages: config.max_pages,
      tokens,
      tenant_scope: tenant_scope.into(),
      mirror,
    })
  }

  /// Versioned URL for `path` relative to the API root.
  fn url(&self, path: &str) -> Result<Url> {
    let mut url = self
      .base_url
      .join(path)
      .map_err(|e| Error::upstream(format!("invalid path {}: {}", path, e)))?;
    url
      .query_pairs_mut()
      .append_pair("api-version", &self.api_version);
    Ok(url)
  }

  fn tickets_path(subscription_id: &str) -> String {
    format!("subscriptions/{}/{}", subscription_id, SUPPORT_PROVIDER)
  }

  fn ticket_path(subscription_id: &str, case_id: &str) -> String {
    format!("{}/{}", Self::tickets_path(subscription_id), case_id)
  }

  fn communications_path(subscription_id: &str, case_id: &str) -> String {
    format!("{}/communications", Self::ticket_path(subscription_id, case_id))
  }

  fn request(&self, method: Method, url: Url, token: &str) -> RequestBuilder {
    self
      .http
      .request(method, url)
      .bearer_auth(token)
      .header(reqwest::header::CONTENT_TYPE, "application/json")
  }

  /// Send with the cached token for `scope`, refreshing it once on 401.
  async fn send_authorized<F>(&self, scope: &str, build: F, policy: &RetryPolicy) -> Result<Response>
  where
    F: Fn(&str) -> RequestBuilder,
  {
    let token = self.tokens.get_token(scope).await?;
    let response = send_with_retry(|| build(&token), policy).await?;
    if response.status() != StatusCode::UNAUTHORIZED {
      return Ok(response);
    }

    tracing::warn!(scope, "upstream rejected cached token, refreshing");
    self.tokens.clear();
    let token = self.tokens.get_token(scope).await?;
    Ok(send_with_retry(|| build(&token), policy).await?)
  }

  async fn get_json<T: DeserializeOwned>(&self, url: Url, scope: &str) -> Result<T> {
    let response = self
      .send_authorized(
        scope,
        |token| self.request(Method::GET, url.clone(), token),
        &self.retry,
      )
      .await?;
    decode(response, url.path()).await
  }

  /// Follow `nextLink` until every page has been read.
  ///
  /// Links must stay on the API origin, may not repeat, and at most
  /// `max_pages` pages are read.
  async fn get_all<T: DeserializeOwned>(&self, first: Url, scope: &str) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut seen = HashSet::new();
    let mut next = Some(first);

    while let Some(url) = next {
      if seen.len() >= self.max_pages {
        return Err(Error::upstream(format!(
          "{} exceeded {} pages",
          url.path(),
          self.max_pages
        )));
      }
      seen.insert(url.clone());

      let page: ApiList<T> = self.get_json(url, scope).await?;
      items.extend(page.value);

      next = match page.next_link {
        Some(link) => Some(self.checked_next_link(&link, &seen)?),
        None => None,
      };
    }

    Ok(items)
  }

  fn checked_next_link(&self, link: &str, seen: &HashSet<Url>) -> Result<Url> {
    let url = Url::parse(link).map_err(|e| Error::upstream(format!("invalid nextLink: {}", e)))?;
    if url.origin() != self.base_url.origin() {
      tracing::warn!(origin = ?url.origin(), "refusing nextLink to foreign origin");
      return Err(Error::upstream("nextLink points outside the API origin"));
    }
    if seen.contains(&url) {
      return Err(Error::upstream(format!("nextLink cycle at {}", url.path())));
    }
    Ok(url)
  }

  /// List subscriptions visible to the service principal
  pub async fn list_subscriptions(&self) -> Result<Fetched<Vec<Subscription>>> {
    let url = self.url("subscriptions")?;
    let subscriptions: Vec<Subscription> = self
      .get_all::<ApiSubscription>(url, &self.tenant_scope)
      .await?
      .into_iter()
      .map(Subscription::from)
      .collect();

    let rows = subscriptions.clone();
    let mirror = self
      .mirror
      .write_through("subscriptions", move |store| store.upsert_subscriptions(&rows))
      .await;

    Ok(Fetched {
      data: subscriptions,
      mirror,
    })
  }

  /// List support cases for one subscription
  pub async fn list_cases(&self, subscription_id: &str) -> Result<Fetched<Vec<SupportCase>>> {
    let url = self.url(&Self::tickets_path(subscription_id))?;
    let cases: Vec<SupportCase> = self
      .get_all::<ApiTicket>(url, subscription_id)
      .await?
      .into_iter()
      .map(|t| t.into_case(subscription_id))
      .collect();

    tracing::debug!(subscription_id, count = cases.len(), "listed cases");

    let rows = cases.clone();
    let mirror = self
      .mirror
      .write_through("support_cases", move |store| store.upsert_cases(&rows))
      .await;

    Ok(Fetched { data: cases, mirror })
  }

  /// Get full details of one case
  pub async fn get_case(&self, subscription_id: &str, case_id: &str) -> Result<Fetched<CaseDetail>> {
    let url = self.url(&Self::ticket_path(subscription_id, case_id))?;
    let ticket: ApiTicket = self.get_json(url, subscription_id).await?;
    let detail = ticket.into_detail(subscription_id);

    // Only the summary is mirrored; the description stays upstream
    let row = detail.case.clone();
    let mirror = self
      .mirror
      .write_through("support_cases", move |store| store.upsert_cases(&[row]))
      .await;

    Ok(Fetched { data: detail, mirror })
  }

  /// List communications on a case, mirroring metadata only
  pub async fn list_communications(
    &self,
    subscription_id: &str,
    case_id: &str,
  ) -> Result<Fetched<Vec<Communication>>> {
    let url = self.url(&Self::communications_path(subscription_id, case_id))?;
    let communications: Vec<Communication> = self
      .get_all::<ApiCommunication>(url, subscription_id)
      .await?
      .into_iter()
      .map(|c| c.into_communication(case_id))
      .collect();

    let records: Vec<CommunicationRecord> =
      communications.iter().map(CommunicationRecord::from).collect();
    let mirror = self
      .mirror
      .write_through("case_communications", move |store| {
        store.upsert_communications(&records)
      })
      .await;

    Ok(Fetched {
      data: communications,
      mirror,
    })
  }

  /// Post a new communication on a case. Single attempt; nothing is mirrored.
  ///
  /// Any 2xx is a success. When the response carries no usable body (202
  /// Accepted), the result is built from the request and the `Location`
  /// header.
  pub async fn add_communication(
    &self,
    subscription_id: &str,
    case_id: &str,
    communication: &NewCommunication,
  ) -> Result<Communication> {
    let url = self.url(&Self::communications_path(subscription_id, case_id))?;

    let body = ApiNewCommunication::from(communication);
    let response = self
      .send_authorized(
        subscription_id,
        |token| self.request(Method::POST, url.clone(), token).json(&body),
        &RetryPolicy::none(),
      )
      .await?;

    let response = check_status(response, url.path()).await?;
    let status = response.status();
    let location = response
      .headers()
      .get(reqwest::header::LOCATION)
      .and_then(|v| v.to_str().ok())
      .map(str::to_string);
    let bytes = response.bytes().await?;

    if let Ok(created) = serde_json::from_slice::<ApiCommunication>(&bytes) {
      return Ok(created.into_communication(case_id));
    }

    tracing::debug!(%status, case_id, "communication accepted without a body");
    Ok(Communication {
      id: location.as_deref().and_then(id_from_location).unwrap_or_default(),
      case_id: case_id.to_string(),
      sender: None,
      created_time: None,
      communication_type: Some(body.properties.communication_type.to_string()),
      direction: None,
      subject: Some(communication.subject.clone()),
      body: Some(communication.body.clone()),
    })
  }
}

/// Last path segment of a resource `Location`, ignoring any query
fn id_from_location(location: &str) -> Option<String> {
  let path = location.split('?').next()?;
  path
    .trim_end_matches('/')
    .rsplit('/')
    .next()
    .filter(|s| !s.is_empty())
    .map(str::to_string)
}

/// Map non-2xx to `Error::Upstream`.
async fn check_status(response: Response, path: &str) -> Result<Response> {
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }

  // Upstream error bodies are logged at debug only, never passed to callers
  let body = response.text().await.unwrap_or_default();
  tracing::debug!(%status, path, body = %body, "upstream error body");
  Err(Error::upstream_status(
    status.as_u16(),
    format!("{} returned {}", path, status),
  ))
}

/// Map non-2xx to `Error::Upstream` and decode the JSON body.
async fn decode<T: DeserializeOwned>(response: Response, path: &str) -> Result<T> {
  check_status(response, path)
    .await?
    .json::<T>()
    .await
    .map_err(|e| Error::upstream(format!("failed to decode {}: {}", path, e)))
}
