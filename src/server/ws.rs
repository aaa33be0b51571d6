//! Realtime observer endpoint.
//!
//! Route: GET /ws
//!
//! Clients join subscription channels by sending
//! `{"type":"subscribe","subscriptionId":"..."}` (and `unsubscribe` to
//! leave). Every notification published to a joined channel is pushed as a
//! JSON text frame.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;

use super::AppState;
use crate::azure::types::validate_id;
use crate::notifier::{ConnectionId, Notifier};

/// Frames a client may send
#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientFrame {
  Subscribe {
    #[serde(rename = "subscriptionId")]
    subscription_id: String,
  },
  Unsubscribe {
    #[serde(rename = "subscriptionId")]
    subscription_id: String,
  },
}

pub async fn handler(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
  let notifier = state.gateway.notifier().clone();
  ws.on_upgrade(move |socket| session(socket, notifier))
}

async fn session(socket: WebSocket, notifier: Arc<Notifier>) {
  let mut observer = notifier.connect();
  let id = observer.id;
  let (mut sink, mut stream) = socket.split();

  let inbound = async {
    while let Some(Ok(msg)) = stream.next().await {
      match msg {
        Message::Text(text) => handle_frame(&notifier, id, &text),
        Message::Close(_) => break,
        _ => {}
      }
    }
  };

  let outbound = async {
    while let Some(event) = observer.events.recv().await {
      let text = match serde_json::to_string(&event) {
        Ok(text) => text,
        Err(e) => {
          tracing::warn!(connection = id, error = %e, "failed to encode notification");
          continue;
        }
      };
      if sink.send(Message::Text(text)).await.is_err() {
        break;
      }
    }
  };

  tokio::select! {
    _ = inbound => {},
    _ = outbound => {},
  }

  notifier.disconnect(id);
}

fn handle_frame(notifier: &Notifier, id: ConnectionId, text: &str) {
  match serde_json::from_str::<ClientFrame>(text) {
    Ok(ClientFrame::Subscribe { subscription_id }) => {
      if validate_id("subscription id", &subscription_id).is_ok() {
        notifier.subscribe(id, &subscription_id);
        tracing::debug!(connection = id, subscription_id = %subscription_id, "joined");
      }
    }
    Ok(ClientFrame::Unsubscribe { subscription_id }) => {
      notifier.unsubscribe(id, &subscription_id);
    }
    Err(e) => tracing::debug!(connection = id, error = %e, "ignoring client frame"),
  }
}
