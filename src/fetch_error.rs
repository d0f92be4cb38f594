use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Source is rate limiting requests (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("No data published for {0}")]
    NotFound(String),
    #[error("Unexpected HTTP status {0}")]
    Status(u16),
    #[error("Source returned an empty response")]
    EmptyResponse,
    #[error("Invalid fetch request: {0}")]
    InvalidRequest(String),
}

impl FetchError {
    /// Throttling is the only fetch failure worth retrying.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::RateLimited { .. })
    }
}
