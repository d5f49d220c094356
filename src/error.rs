use thiserror::Error;

/// Failures raised at the reporting-backend boundary.
///
/// Everything above the adapters treats these uniformly as "this call did
/// not produce data"; the variants exist so callers and logs can tell an
/// expired credential from a burned quota.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("quota exhausted: {0}")]
    Quota(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("response decode failed: {0}")]
    Decode(String),

    #[error("unsupported by this backend: {0}")]
    Unsupported(String),
}

impl SourceError {
    /// Classify an HTTP status into the matching variant.
    pub fn from_status(status: reqwest::StatusCode, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match status.as_u16() {
            401 | 403 => SourceError::Auth(detail),
            429 => SourceError::Quota(detail),
            404 => SourceError::NotFound(detail),
            _ => SourceError::Request(detail),
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SourceError::Decode(err.to_string())
        } else {
            SourceError::Request(err.to_string())
        }
    }
}

pub type SourceResult<T> = std::result::Result<T, SourceError>;
