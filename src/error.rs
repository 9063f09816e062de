//! Error model for remote calls and cache synchronization.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures that a sync step can run into.
///
/// `Connectivity` means no response arrived at all, `Api` means the server
/// answered with something other than 200.
#[derive(Debug, Error)]
pub enum Error {
  #[error("connection to Redmine failed: {0}")]
  Connectivity(String),
  #[error("Redmine responded with http {status}: {body}")]
  Api { status: u16, body: String },
  #[error("unexpected response body: {0}")]
  Parse(String),
  #[error("profile is not configured: {0}")]
  NotConfigured(String),
  #[error("storage error: {0}")]
  Storage(String),
}

impl Error {
  /// Status code for API errors, `None` for everything else.
  pub fn status(&self) -> Option<u16> {
    match self {
      Error::Api { status, .. } => Some(*status),
      _ => None,
    }
  }

  pub fn is_forbidden(&self) -> bool {
    self.status() == Some(403)
  }

  /// Whether this failure should count towards the poll backoff.
  pub fn counts_as_failure(&self) -> bool {
    matches!(
      self,
      Error::Connectivity(_) | Error::Api { .. } | Error::Parse(_)
    )
  }
}

impl From<reqwest::Error> for Error {
  fn from(err: reqwest::Error) -> Self {
    if err.is_decode() {
      Error::Parse(err.to_string())
    } else if let Some(status) = err.status() {
      Error::Api {
        status: status.as_u16(),
        body: err.to_string(),
      }
    } else {
      Error::Connectivity(err.to_string())
    }
  }
}

impl From<serde_json::Error> for Error {
  fn from(err: serde_json::Error) -> Self {
    Error::Parse(err.to_string())
  }
}

impl From<color_eyre::Report> for Error {
  fn from(err: color_eyre::Report) -> Self {
    Error::Storage(format!("{:#}", err))
  }
}
