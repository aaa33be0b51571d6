//! Error taxonomy shared by the token cache, upstream client, mirror and gateway.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
  /// Token acquisition was rejected or could not reach the identity provider.
  #[error("authentication failed: {0}")]
  Authentication(String),

  /// Transport or HTTP-level failure talking to the support API.
  #[error("upstream unavailable: {message}")]
  Upstream {
    message: String,
    status: Option<u16>,
  },

  /// Caller input rejected before any I/O.
  #[error("{0}")]
  Validation(String),

  /// Local mirror read or write failure.
  #[error("mirror error: {0}")]
  Mirror(String),
}

impl Error {
  pub fn upstream(message: impl Into<String>) -> Self {
    Self::Upstream {
      message: message.into(),
      status: None,
    }
  }

  pub fn upstream_status(status: u16, message: impl Into<String>) -> Self {
    Self::Upstream {
      message: message.into(),
      status: Some(status),
    }
  }

  #[cfg(test)]
  pub fn is_validation(&self) -> bool {
    matches!(self, Self::Validation(_))
  }
}

impl From<reqwest::Error> for Error {
  fn from(e: reqwest::Error) -> Self {
    Self::Upstream {
      status: e.status().map(|s| s.as_u16()),
      message: e.to_string(),
    }
  }
}

impl From<rusqlite::Error> for Error {
  fn from(e: rusqlite::Error) -> Self {
    Self::Mirror(e.to_string())
  }
}
