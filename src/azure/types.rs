use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Subscription as listed upstream or mirrored locally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
  pub id: String,
  pub display_name: String,
  pub state: Option<String>,
  /// When the mirror last saw this subscription upstream (mirror rows only)
  #[serde(skip_serializing_if = "Option::is_none")]
  pub last_synced: Option<String>,
}

/// Support case summary.
///
/// Every field here is safe to mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportCase {
  pub id: String,
  pub subscription_id: String,
  pub title: String,
  pub severity: Option<String>,
  pub status: Option<String>,
  pub created_time: Option<String>,
  pub last_updated: Option<String>,
  pub service_name: Option<String>,
}

/// Full case details, live only
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseDetail {
  #[serde(flatten)]
  pub case: SupportCase,
  pub description: Option<String>,
  pub support_ticket_id: Option<String>,
}

/// Communication on a case, including its content
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Communication {
  pub id: String,
  pub case_id: String,
  pub sender: Option<String>,
  pub created_time: Option<String>,
  pub communication_type: Option<String>,
  pub direction: Option<String>,
  pub subject: Option<String>,
  pub body: Option<String>,
}

/// Metadata of a communication that may be mirrored.
///
/// Deliberately has no subject or body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunicationRecord {
  pub id: String,
  pub case_id: String,
  pub sender: Option<String>,
  pub created_time: Option<String>,
  pub communication_type: Option<String>,
}

impl From<&Communication> for CommunicationRecord {
  fn from(c: &Communication) -> Self {
    Self {
      id: c.id.clone(),
      case_id: c.case_id.clone(),
      sender: c.sender.clone(),
      created_time: c.created_time.clone(),
      communication_type: c.communication_type.clone(),
    }
  }
}

/// A reply to post on a case
#[derive(Debug, Clone, Deserialize)]
pub struct NewCommunication {
  #[serde(default)]
  pub subject: String,
  #[serde(default)]
  pub body: String,
}

impl NewCommunication {
  pub fn validate(&self) -> Result<()> {
    if self.subject.trim().is_empty() || self.body.trim().is_empty() {
      return Err(Error::Validation("Subject and body are required".into()));
    }
    Ok(())
  }
}

/// Reject identifiers that are empty or would escape their URL path segment.
pub fn validate_id(kind: &str, id: &str) -> Result<()> {
  if id.is_empty() {
    return Err(Error::Validation(format!("{} is required", kind)));
  }
  if id
    .chars()
    .any(|c| c.is_whitespace() || matches!(c, '/' | '?' | '#' | '%'))
  {
    return Err(Error::Validation(format!("{} '{}' is not valid", kind, id)));
  }
  Ok(())
}

/// Parse a comma-separated subscription list.
pub fn parse_subscription_ids(raw: &str) -> Result<Vec<String>> {
  normalize_subscription_ids(raw.split(','))
}

/// Trim, validate and de-duplicate subscription ids, preserving order.
///
/// Blank entries are skipped; at least one id must remain.
pub fn normalize_subscription_ids<'a>(raw: impl IntoIterator<Item = &'a str>) -> Result<Vec<String>> {
  let mut ids: Vec<String> = Vec::new();
  for id in raw.into_iter().map(str::trim).filter(|s| !s.is_empty()) {
    validate_id("subscription id", id)?;
    if !ids.iter().any(|existing| existing == id) {
      ids.push(id.to_string());
    }
  }

  if ids.is_empty() {
    return Err(Error::Validation("Subscriptions parameter required".into()));
  }
  Ok(ids)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_subscription_ids_trims_and_dedupes() {
    let ids = parse_subscription_ids(" sub-A, sub-B ,sub-A,,").unwrap();
    assert_eq!(ids, vec!["sub-A", "sub-B"]);
  }

  #[test]
  fn test_parse_subscription_ids_requires_one() {
    assert!(parse_subscription_ids("").unwrap_err().is_validation());
    assert!(parse_subscription_ids(" , ,").unwrap_err().is_validation());
  }

  #[test]
  fn test_parse_subscription_ids_rejects_path_characters() {
    let err = parse_subscription_ids("sub-A,../etc").unwrap_err();
    assert!(err.is_validation());
  }

  #[test]
  fn test_new_communication_requires_subject_and_body() {
    let missing_body = NewCommunication {
      subject: "Update".into(),
      body: "   ".into(),
    };
    assert!(missing_body.validate().unwrap_err().is_validation());

    let ok = NewCommunication {
      subject: "Update".into(),
      body: "Any news?".into(),
    };
    assert!(ok.validate().is_ok());
  }

  #[test]
  fn test_record_drops_content() {
    let comm = Communication {
      id: "c1".into(),
      case_id: "case-1".into(),
      sender: Some("support@example.com".into()),
      created_time: Some("2024-01-01T00:00:00Z".into()),
      communication_type: Some("web".into()),
      direction: Some("outbound".into()),
      subject: Some("secret subject".into()),
      body: Some("secret body".into()),
    };
    let record = CommunicationRecord::from(&comm);
    let json = serde_json::to_string(&record).unwrap();
    assert!(!json.contains("secret"));
    assert_eq!(record.sender.as_deref(), Some("support@example.com"));
  }
}
