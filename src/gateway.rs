//! Support gateway: the operations served to callers, composed from the
//! upstream client, the local mirror and the realtime notifier.

use futures::future::join_all;
use std::sync::Arc;

use crate::azure::client::SupportClient;
use crate::azure::types::{
  normalize_subscription_ids, parse_subscription_ids, validate_id, CaseDetail, Communication,
  NewCommunication, Subscription, SupportCase,
};
use crate::config::FallbackPolicy;
use crate::error::Result;
use crate::mirror::{Mirror, Sourced};
use crate::notifier::{Notification, Notifier};

/// Read-through gateway with mirror fallback.
///
/// This wraps the upstream client and decides, per operation, whether a
/// failure is served from the mirror or surfaced to the caller.
#[derive(Clone)]
pub struct SupportGateway {
  client: SupportClient,
  mirror: Mirror,
  notifier: Arc<Notifier>,
  fallback: FallbackPolicy,
}

impl SupportGateway {
  pub fn new(
    client: SupportClient,
    mirror: Mirror,
    notifier: Arc<Notifier>,
    fallback: FallbackPolicy,
  ) -> Self {
    Self {
      client,
      mirror,
      notifier,
      fallback,
    }
  }

  pub fn notifier(&self) -> &Arc<Notifier> {
    &self.notifier
  }

  /// List subscriptions, falling back to every mirrored subscription.
  pub async fn list_subscriptions(&self) -> Result<Sourced<Vec<Subscription>>> {
    match self.client.list_subscriptions().await {
      Ok(fetched) => {
        tracing::debug!(mirror = ?fetched.mirror, "subscriptions fetched");
        Ok(Sourced::upstream(fetched.data))
      }
      Err(e) => {
        tracing::warn!(error = %e, "subscription listing failed, serving mirror");
        let rows = self.mirror.read(|store| store.subscriptions()).await?;
        Ok(Sourced::mirror(rows))
      }
    }
  }

  /// List cases for a comma-separated set of subscription ids.
  pub async fn list_cases_raw(&self, subscriptions: &str) -> Result<Sourced<Vec<SupportCase>>> {
    let ids = parse_subscription_ids(subscriptions)?;
    self.list_cases(&ids).await
  }

  /// List cases across subscriptions, fetching each one concurrently.
  ///
  /// Every branch runs to completion. When all succeed the live results are
  /// returned. Otherwise the configured [`FallbackPolicy`] decides:
  /// `PerSubscription` keeps the live branches and fills only the failed
  /// subscriptions from the mirror, `Global` discards all live results and
  /// serves the mirror's rows for every requested subscription.
  pub async fn list_cases(&self, subscription_ids: &[String]) -> Result<Sourced<Vec<SupportCase>>> {
    let ids = normalize_subscription_ids(subscription_ids.iter().map(String::as_str))?;

    let results = join_all(ids.iter().map(|id| self.client.list_cases(id))).await;

    let mut live = Vec::new();
    let mut failed = Vec::new();
    for (id, result) in ids.iter().zip(results) {
      match result {
        Ok(fetched) => {
          tracing::debug!(subscription_id = %id, mirror = ?fetched.mirror, "cases fetched");
          live.extend(fetched.data);
        }
        Err(e) => {
          tracing::warn!(subscription_id = %id, error = %e, "case listing failed");
          failed.push(id.clone());
        }
      }
    }

    if failed.is_empty() {
      return Ok(Sourced::upstream(live));
    }

    match self.fallback {
      FallbackPolicy::Global => {
        let rows = self.mirror.read(move |store| store.cases_for(&ids)).await?;
        Ok(Sourced::mirror(rows))
      }
      FallbackPolicy::PerSubscription => {
        let all_failed = failed.len() == ids.len();
        let mirrored = self.mirror.read(move |store| store.cases_for(&failed)).await?;
        live.extend(mirrored);
        if all_failed {
          Ok(Sourced::mirror(live))
        } else {
          Ok(Sourced::partial(live))
        }
      }
    }
  }

  /// Case details, live only.
  pub async fn get_case(&self, subscription_id: &str, case_id: &str) -> Result<CaseDetail> {
    validate_id("subscription id", subscription_id)?;
    validate_id("case id", case_id)?;

    Ok(self.client.get_case(subscription_id, case_id).await?.data)
  }

  /// Communications on a case, live only.
  pub async fn list_communications(
    &self,
    subscription_id: &str,
    case_id: &str,
  ) -> Result<Vec<Communication>> {
    validate_id("subscription id", subscription_id)?;
    validate_id("case id", case_id)?;

    Ok(
      self
        .client
        .list_communications(subscription_id, case_id)
        .await?
        .data,
    )
  }

  /// Post a communication and notify observers of the case's subscription.
  pub async fn add_communication(
    &self,
    subscription_id: &str,
    case_id: &str,
    communication: NewCommunication,
  ) -> Result<Communication> {
    validate_id("subscription id", subscription_id)?;
    validate_id("case id", case_id)?;
    communication.validate()?;

    let created = self
      .client
      .add_communication(subscription_id, case_id, &communication)
      .await?;

    let delivered = self
      .notifier
      .publish(subscription_id, Notification::new_communication(case_id));
    tracing::info!(subscription_id, case_id, delivered, "communication added");

    Ok(created)
  }
}
