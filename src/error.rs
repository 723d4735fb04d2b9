//! Error taxonomy shared by the API client, cache and data-access layers.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors surfaced by data-access operations.
///
/// `Clone` is required because a single in-flight request may be awaited by
/// several callers, each of which receives its own copy of the outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
  /// The REST call was rejected or returned a non-2xx status
  #[error("Request failed: {message}")]
  Network {
    status: Option<u16>,
    message: String,
  },

  /// The backend returned an empty payload for a single-entity lookup
  #[error("{0} not found")]
  NotFound(String),

  /// Local input check failed before any request was made
  #[error("Invalid input: {0}")]
  Validation(String),

  /// The backend answered 401; the stored token has been cleared
  #[error("Session expired, please log in again")]
  Unauthorized,

  #[error("Failed to decode response: {0}")]
  Decode(String),

  #[error("Storage error: {0}")]
  Storage(String),

  #[error("Configuration error: {0}")]
  Config(String),
}

impl ApiError {
  pub fn network(status: Option<u16>, message: impl Into<String>) -> Self {
    Self::Network {
      status,
      message: message.into(),
    }
  }

  /// True when the request never reached the server (no HTTP status).
  pub fn is_connection_failure(&self) -> bool {
    matches!(self, Self::Network { status: None, .. })
  }

  /// Human-readable text for the store's `error` field and notifications.
  ///
  /// Server-provided messages win; otherwise `fallback` describes the
  /// operation that failed (e.g. "Failed to load cities").
  pub fn user_message(&self, fallback: &str) -> String {
    match self {
      Self::Network { message, .. } if !message.trim().is_empty() => message.clone(),
      Self::Network { .. } => fallback.to_string(),
      other => other.to_string(),
    }
  }
}

impl From<reqwest::Error> for ApiError {
  fn from(e: reqwest::Error) -> Self {
    Self::network(e.status().map(|s| s.as_u16()), e.to_string())
  }
}

impl From<serde_json::Error> for ApiError {
  fn from(e: serde_json::Error) -> Self {
    Self::Decode(e.to_string())
  }
}

impl From<rusqlite::Error> for ApiError {
  fn from(e: rusqlite::Error) -> Self {
    Self::Storage(e.to_string())
  }
}
