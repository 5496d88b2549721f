use crate::types::ResourceId;
use http::StatusCode;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for query-runner operations
pub type Result<T, E = QueryRunnerError> = std::result::Result<T, E>;

/// Failure of a single call against the Hetzner Cloud API.
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status} ({code}): {message}")]
    Api {
        status: StatusCode,
        code: String,
        message: String,
    },

    #[error("invalid API response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid API URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Errors surfaced to callers of the query runner and the datasource.
///
/// The type is `Clone` because a single failed upstream call is delivered to
/// every waiter its bucket was meant to satisfy.
#[derive(Error, Debug, Clone)]
pub enum QueryRunnerError {
    #[error("upstream request for resource {resource_id} failed: {source}")]
    Upstream {
        resource_id: ResourceId,
        #[source]
        source: Arc<UpstreamError>,
    },

    #[error("request was cancelled")]
    Cancelled,

    #[error("dispatch for resource {resource_id} failed: {message}")]
    DispatchFailed {
        resource_id: ResourceId,
        message: String,
    },

    #[error("query runner dropped the request without a response")]
    Closed,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("failed to resolve resources: {0}")]
    ResourceLookup(#[source] Arc<UpstreamError>),
}

impl QueryRunnerError {
    pub(crate) fn upstream(resource_id: ResourceId, source: UpstreamError) -> Self {
        QueryRunnerError::Upstream {
            resource_id,
            source: Arc::new(source),
        }
    }
}

impl From<UpstreamError> for QueryRunnerError {
    fn from(e: UpstreamError) -> Self {
        QueryRunnerError::ResourceLookup(Arc::new(e))
    }
}
