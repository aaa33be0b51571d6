//! Serde-deserializable types matching the support API responses.
//!
//! These types are separate from domain types to allow clean deserialization
//! while keeping domain types focused on what the gateway serves and mirrors.

use serde::{Deserialize, Serialize};

use super::types::{CaseDetail, Communication, NewCommunication, Subscription, SupportCase};

// ============================================================================
// List envelope
// ============================================================================

/// Paged list response: `{ "value": [...], "nextLink": "..." }`
#[derive(Debug, Deserialize)]
pub struct ApiList<T> {
  #[serde(default = "Vec::new")]
  pub value: Vec<T>,
  #[serde(rename = "nextLink")]
  pub next_link: Option<String>,
}

// ============================================================================
// Subscriptions
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiSubscription {
  #[serde(rename = "subscriptionId")]
  pub subscription_id: String,
  #[serde(rename = "displayName", default)]
  pub display_name: String,
  pub state: Option<String>,
}

// ============================================================================
// Support tickets
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct ApiTicketProperties {
  #[serde(rename = "supportTicketId")]
  pub support_ticket_id: Option<String>,
  #[serde(default)]
  pub title: String,
  pub description: Option<String>,
  pub severity: Option<String>,
  pub status: Option<String>,
  #[serde(rename = "createdDate")]
  pub created_date: Option<String>,
  #[serde(rename = "modifiedDate")]
  pub modified_date: Option<String>,
  #[serde(rename = "serviceDisplayName", alias = "serviceName")]
  pub service_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiTicket {
  pub name: String,
  #[serde(default)]
  pub properties: ApiTicketProperties,
}

// ============================================================================
// Communications
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct ApiCommunicationProperties {
  #[serde(rename = "communicationType")]
  pub communication_type: Option<String>,
  #[serde(rename = "communicationDirection")]
  pub direction: Option<String>,
  pub sender: Option<String>,
  pub subject: Option<String>,
  pub body: Option<String>,
  #[serde(rename = "createdDate")]
  pub created_date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiCommunication {
  pub name: String,
  #[serde(default)]
  pub properties: ApiCommunicationProperties,
}

/// Request body for posting a communication
#[derive(Debug, Serialize)]
pub struct ApiNewCommunication<'a> {
  pub properties: ApiNewCommunicationProperties<'a>,
}

#[derive(Debug, Serialize)]
pub struct ApiNewCommunicationProperties<'a> {
  #[serde(rename = "communicationType")]
  pub communication_type: &'static str,
  pub subject: &'a str,
  pub body: &'a str,
}

impl<'a> From<&'a NewCommunication> for ApiNewCommunication<'a> {
  fn from(c: &'a NewCommunication) -> Self {
    Self {
      properties: ApiNewCommunicationProperties {
        communication_type: "Web",
        subject: &c.subject,
        body: &c.body,
      },
    }
  }
}

// ============================================================================
// Conversions to domain types
// ============================================================================

impl From<ApiSubscription> for Subscription {
  fn from(s: ApiSubscription) -> Self {
    Subscription {
      id: s.subscription_id,
      display_name: s.display_name,
      state: s.state,
      last_synced: None,
    }
  }
}

impl ApiTicket {
  pub fn into_case(self, subscription_id: &str) -> SupportCase {
    let p = self.properties;
    SupportCase {
      id: self.name,
      subscription_id: subscription_id.to_string(),
      title: p.title,
      severity: p.severity,
      status: p.status,
      created_time: p.created_date,
      last_updated: p.modified_date,
      service_name: p.service_name,
    }
  }

  pub fn into_detail(mut self, subscription_id: &str) -> CaseDetail {
    let description = self.properties.description.take();
    let support_ticket_id = self.properties.support_ticket_id.take();
    CaseDetail {
      case: self.into_case(subscription_id),
      description,
      support_ticket_id,
    }
  }
}

impl ApiCommunication {
  pub fn into_communication(self, case_id: &str) -> Communication {
    let p = self.properties;
    Communication {
      id: self.name,
      case_id: case_id.to_string(),
      sender: p.sender,
      created_time: p.created_date,
      communication_type: p.communication_type,
      direction: p.direction,
      subject: p.subject,
      body: p.body,
    }
  }
}
