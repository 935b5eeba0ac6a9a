//! Error types for the gateway and the mutation queue.
//!
//! Retry eligibility is decided by [`ApiError::is_connectivity`], which the
//! transport sets structurally. Nothing inspects error message text.

use thiserror::Error;

/// Maximum length for error response bodies kept in errors and logs.
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Failure of a single API call.
///
/// `Clone` so that every waiter on a deduplicated read observes the same
/// outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
  #[error("Network unreachable: {0}")]
  Connectivity(String),

  #[error("Authentication required")]
  Unauthorized,

  #[error("API error: {status}")]
  Status { status: u16, body: String },

  #[error("Invalid request: {0}")]
  InvalidRequest(String),

  #[error("Invalid response: {0}")]
  InvalidResponse(String),
}

impl ApiError {
  /// Truncate a response body to avoid logging excessive data
  fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
      return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
      end -= 1;
    }
    format!(
      "{}... (truncated, {} total bytes)",
      &body[..end],
      body.len()
    )
  }

  /// Map a non-2xx status to an error. 401 is the only status treated specially.
  pub fn from_status(status: u16, body: &str) -> Self {
    match status {
      401 => ApiError::Unauthorized,
      _ => ApiError::Status {
        status,
        body: Self::truncate_body(body),
      },
    }
  }

  /// Whether this failure is attributable to lack of network reachability.
  pub fn is_connectivity(&self) -> bool {
    matches!(self, ApiError::Connectivity(_))
  }

  /// Status code carried by the failure, if the server answered at all.
  pub fn status(&self) -> Option<u16> {
    match self {
      ApiError::Unauthorized => Some(401),
      ApiError::Status { status, .. } => Some(*status),
      _ => None,
    }
  }
}

/// Failure of the queue's write entry point.
#[derive(Error, Debug)]
pub enum QueueError {
  #[error(transparent)]
  Api(#[from] ApiError),

  #[error("Mutation store unavailable: {0}")]
  Storage(String),
}

impl QueueError {
  pub(crate) fn storage(report: color_eyre::Report) -> Self {
    QueueError::Storage(format!("{:#}", report))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_unauthorized_is_distinguished() {
    assert_eq!(ApiError::from_status(401, "nope"), ApiError::Unauthorized);
    assert!(!ApiError::Unauthorized.is_connectivity());
  }

  #[test]
  fn test_other_statuses_carry_code() {
    let err = ApiError::from_status(422, "{\"error\":\"title required\"}");
    assert_eq!(err.status(), Some(422));
    assert!(!err.is_connectivity());
  }

  #[test]
  fn test_long_body_is_truncated() {
    let body = "x".repeat(2000);
    match ApiError::from_status(500, &body) {
      ApiError::Status { body, .. } => {
        assert!(body.len() < 600);
        assert!(body.contains("2000 total bytes"));
      }
      other => panic!("unexpected error: {:?}", other),
    }
  }

  #[test]
  fn test_only_connectivity_is_retryable() {
    assert!(ApiError::Connectivity("connection refused".into()).is_connectivity());
    assert!(!ApiError::InvalidResponse("network".into()).is_connectivity());
  }
}
