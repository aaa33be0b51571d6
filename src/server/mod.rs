//! HTTP API and realtime endpoint.

mod ws;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::azure::types::NewCommunication;
use crate::error::Error;
use crate::gateway::SupportGateway;

/// Shared application state passed to handlers.
pub struct AppState {
  pub gateway: SupportGateway,
}

pub fn router(state: Arc<AppState>) -> Router {
  Router::new()
    .route("/healthz", get(|| async { "ok" }))
    .route("/api/subscriptions", get(list_subscriptions))
    .route("/api/cases", get(list_cases))
    .route("/api/cases/:subscription_id/:case_id", get(get_case))
    .route(
      "/api/cases/:subscription_id/:case_id/communications",
      get(list_communications).post(add_communication),
    )
    .route("/ws", get(ws::handler))
    .layer(TraceLayer::new_for_http())
    .layer(CorsLayer::permissive())
    .with_state(state)
}

/// Error response for one API operation.
///
/// Validation messages are shown to the caller; anything else is logged and
/// replaced by a generic message.
struct ApiError {
  error: Error,
  operation: &'static str,
}

trait OrFail<T> {
  fn or_fail(self, operation: &'static str) -> Result<T, ApiError>;
}

impl<T> OrFail<T> for crate::error::Result<T> {
  fn or_fail(self, operation: &'static str) -> Result<T, ApiError> {
    self.map_err(|error| ApiError { error, operation })
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, message) = match &self.error {
      Error::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
      Error::Upstream { .. } | Error::Authentication(_) => {
        tracing::error!(operation = self.operation, error = %self.error, "request failed");
        (StatusCode::BAD_GATEWAY, format!("Failed to {}", self.operation))
      }
      Error::Mirror(_) => {
        tracing::error!(operation = self.operation, error = %self.error, "request failed");
        (
          StatusCode::INTERNAL_SERVER_ERROR,
          format!("Failed to {}", self.operation),
        )
      }
    };

    (status, Json(json!({ "error": message }))).into_response()
  }
}

/// Header telling clients whether a list came from upstream or the mirror
const SOURCE_HEADER: &str = "x-data-source";

async fn list_subscriptions(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
  let result = state
    .gateway
    .list_subscriptions()
    .await
    .or_fail("retrieve subscriptions")?;

  Ok(([(SOURCE_HEADER, result.source.as_str())], Json(result.data)).into_response())
}

#[derive(Debug, Deserialize)]
struct CasesQuery {
  subscriptions: Option<String>,
}

async fn list_cases(
  State(state): State<Arc<AppState>>,
  Query(query): Query<CasesQuery>,
) -> Result<Response, ApiError> {
  let result = state
    .gateway
    .list_cases_raw(query.subscriptions.as_deref().unwrap_or_default())
    .await
    .or_fail("retrieve support cases")?;

  Ok(([(SOURCE_HEADER, result.source.as_str())], Json(result.data)).into_response())
}

async fn get_case(
  State(state): State<Arc<AppState>>,
  Path((subscription_id, case_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
  let detail = state
    .gateway
    .get_case(&subscription_id, &case_id)
    .await
    .or_fail("retrieve case details")?;

  Ok(Json(detail).into_response())
}

async fn list_communications(
  State(state): State<Arc<AppState>>,
  Path((subscription_id, case_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
  let communications = state
    .gateway
    .list_communications(&subscription_id, &case_id)
    .await
    .or_fail("retrieve case communications")?;

  Ok(Json(communications).into_response())
}

async fn add_communication(
  State(state): State<Arc<AppState>>,
  Path((subscription_id, case_id)): Path<(String, String)>,
  Json(body): Json<NewCommunication>,
) -> Result<Response, ApiError> {
  let created = state
    .gateway
    .add_communication(&subscription_id, &case_id, body)
    .await
    .or_fail("add communication")?;

  Ok(Json(created).into_response())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::azure::client::SupportClient;
  use crate::config::FallbackPolicy;
  use crate::mirror::{Mirror, MirrorStore, SqliteMirror};
  use crate::notifier::Notifier;
  use crate::testing::{static_tokens, upstream_config};
  use axum::body::{to_bytes, Body};
  use axum::http::Request;
  use tower::ServiceExt;
  use wiremock::matchers::method;
  use wiremock::{Mock, MockServer, ResponseTemplate};

  async fn app_with(server: &MockServer, store: Arc<SqliteMirror>) -> Router {
    let mirror = Mirror::from_shared(store);
    let client = SupportClient::new(
      &upstream_config(&server.uri(), 0),
      static_tokens(),
      "tenant",
      mirror.clone(),
    )
    .unwrap();
    let gateway = SupportGateway::new(
      client,
      mirror,
      Arc::new(Notifier::new()),
      FallbackPolicy::PerSubscription,
    );
    router(Arc::new(AppState { gateway }))
  }

  async fn body_json(response: Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
  }

  #[tokio::test]
  async fn test_cases_without_subscriptions_is_bad_request() {
    let server = MockServer::start().await;
    let app = app_with(&server, Arc::new(SqliteMirror::open_in_memory().unwrap())).await;

    let response = app
      .oneshot(Request::get("/api/cases").body(Body::empty()).unwrap())
      .await
      .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
      body_json(response).await,
      json!({ "error": "Subscriptions parameter required" })
    );
  }

  #[tokio::test]
  async fn test_upstream_failure_is_generic() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(500).set_body_string("internal stack trace"))
      .mount(&server)
      .await;
    let app = app_with(&server, Arc::new(SqliteMirror::open_in_memory().unwrap())).await;

    let response = app
      .oneshot(
        Request::get("/api/cases/sub-A/T1")
          .body(Body::empty())
          .unwrap(),
      )
      .await
      .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(
      body_json(response).await,
      json!({ "error": "Failed to retrieve case details" })
    );
  }

  #[tokio::test]
  async fn test_cases_fallback_sets_source_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(503))
      .mount(&server)
      .await;

    let store = Arc::new(SqliteMirror::open_in_memory().unwrap());
    store
      .upsert_cases(&[crate::azure::types::SupportCase {
        id: "T1".into(),
        subscription_id: "sub-A".into(),
        title: "mirrored".into(),
        severity: None,
        status: None,
        created_time: None,
        last_updated: None,
        service_name: None,
      }])
      .unwrap();
    let app = app_with(&server, store).await;

    let response = app
      .oneshot(
        Request::get("/api/cases?subscriptions=sub-A")
          .body(Body::empty())
          .unwrap(),
      )
      .await
      .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[SOURCE_HEADER], "mirror");
    let body = body_json(response).await;
    assert_eq!(body[0]["id"], "T1");
    assert_eq!(body[0]["subscriptionId"], "sub-A");
  }

  #[tokio::test]
  async fn test_post_without_body_text_is_bad_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .respond_with(ResponseTemplate::new(200))
      .expect(0)
      .mount(&server)
      .await;
    let app = app_with(&server, Arc::new(SqliteMirror::open_in_memory().unwrap())).await;

    let response = app
      .oneshot(
        Request::post("/api/cases/sub-A/T1/communications")
          .header("content-type", "application/json")
          .body(Body::from(r#"{"subject":"hi"}"#))
          .unwrap(),
      )
      .await
      .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  }
}
