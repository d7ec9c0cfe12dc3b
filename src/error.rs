use thiserror::Error;

/// Failures the offline layer distinguishes when deciding on a fallback.
#[derive(Error, Debug)]
pub enum FetchError {
  /// No persistent store in this environment
  #[error("local store is unavailable")]
  Unsupported,

  #[error("{0} not found")]
  NotFound(String),

  /// Transport failure: connection refused, DNS, timeout
  #[error("network unreachable: {0}")]
  Unreachable(String),

  /// Non-JSON body or an unexpected status
  #[error("malformed response: {0}")]
  Malformed(String),

  #[error("storage error: {0}")]
  Storage(String),
}

impl FetchError {
  /// Whether the failure came from the network rather than from the data.
  pub fn is_network(&self) -> bool {
    matches!(self, Self::Unreachable(_))
  }
}

impl From<reqwest::Error> for FetchError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_decode() {
      Self::Malformed(e.to_string())
    } else if e.is_status() {
      Self::Malformed(format!("unexpected status: {}", e))
    } else {
      Self::Unreachable(e.to_string())
    }
  }
}

impl From<serde_json::Error> for FetchError {
  fn from(e: serde_json::Error) -> Self {
    Self::Malformed(e.to_string())
  }
}

impl From<color_eyre::Report> for FetchError {
  fn from(e: color_eyre::Report) -> Self {
    Self::Storage(e.to_string())
  }
}

pub type FetchResult<T> = std::result::Result<T, FetchError>;
