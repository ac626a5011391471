//! Farm Error Taxonomy
//!
//! Every failure the router can observe maps onto one [`FarmError`] variant.
//! The HTTP front turns these into status codes; the dispatcher uses
//! [`FarmError::is_retryable`] to decide whether a request earns its single
//! fallback attempt.

use std::time::Duration;

use axum::http::StatusCode;
use thiserror::Error;

/// Result alias used throughout the farm core
pub type FarmResult<T> = Result<T, FarmError>;

/// Errors raised while routing a request through the farm
#[derive(Clone, Debug, Error)]
pub enum FarmError {
    /// A health probe could not confirm a node as healthy.
    /// Never reaches callers; it only flips the node's health flag.
    #[error("probe of {node} failed: {reason}")]
    Probe {
        /// Probed node
        node: String,
        /// Why the node was considered unhealthy
        reason: String,
    },

    /// Every configured node is unhealthy
    #[error("No healthy farm nodes available")]
    NoHealthyBackend,

    /// The request queue was at capacity
    #[error("Queue full ({capacity} waiting)")]
    QueueFull {
        /// Configured queue capacity
        capacity: usize,
    },

    /// A queued request waited past the queue timeout
    #[error("Queue timeout after {}ms", waited.as_millis())]
    QueueTimeout {
        /// How long the request waited
        waited: Duration,
    },

    /// The node answered with a non-2xx status
    #[error("{node} returned {status}: {body}")]
    UpstreamHttp {
        /// Node that answered
        node: String,
        /// HTTP status code
        status: u16,
        /// First part of the response body
        body: String,
    },

    /// The connection to the node failed or timed out
    #[error("{node} transport error: {message}")]
    UpstreamTransport {
        /// Node that was contacted
        node: String,
        /// Underlying transport error
        message: String,
    },

    /// The node's response body could not be parsed
    #[error("{node} sent malformed JSON: {message}")]
    MalformedUpstream {
        /// Node that answered
        node: String,
        /// Parser error
        message: String,
    },

    /// The upstream stream failed after bytes were forwarded to the caller
    #[error("{node} stream aborted: {message}")]
    StreamAborted {
        /// Node that was streaming
        node: String,
        /// Underlying error
        message: String,
    },

    /// The caller sent an invalid body
    #[error("{0}")]
    BadRequest(String),
}

/// Maximum number of upstream body bytes carried in an error message
pub const ERROR_BODY_LIMIT: usize = 200;

impl FarmError {
    /// Build an [`FarmError::UpstreamHttp`] with a truncated body
    pub fn upstream_http(node: impl Into<String>, status: u16, body: &str) -> Self {
        Self::UpstreamHttp {
            node: node.into(),
            status,
            body: truncate(body, ERROR_BODY_LIMIT),
        }
    }

    /// Map a `reqwest` failure onto the transport variant
    pub fn transport(node: impl Into<String>, err: &reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            "request timed out".to_string()
        } else {
            err.to_string()
        };
        Self::UpstreamTransport {
            node: node.into(),
            message,
        }
    }

    /// Map a JSON parse failure onto the malformed-upstream variant
    pub fn malformed(node: impl Into<String>, err: &serde_json::Error) -> Self {
        Self::MalformedUpstream {
            node: node.into(),
            message: err.to_string(),
        }
    }

    /// Whether this failure earns a fallback attempt on another node
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UpstreamHttp { .. } | Self::UpstreamTransport { .. } | Self::MalformedUpstream { .. }
        )
    }

    /// HTTP status the front should answer with
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::QueueFull { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::QueueTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classes() {
        assert!(FarmError::upstream_http("mac", 500, "boom").is_retryable());
        assert!(FarmError::UpstreamTransport {
            node: "mac".into(),
            message: "refused".into()
        }
        .is_retryable());
        assert!(FarmError::MalformedUpstream {
            node: "mac".into(),
            message: "eof".into()
        }
        .is_retryable());

        assert!(!FarmError::NoHealthyBackend.is_retryable());
        assert!(!FarmError::QueueFull { capacity: 10 }.is_retryable());
        assert!(!FarmError::BadRequest("nope".into()).is_retryable());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            FarmError::BadRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            FarmError::QueueFull { capacity: 1 }.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            FarmError::QueueTimeout {
                waited: Duration::from_secs(60)
            }
            .status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            FarmError::NoHealthyBackend.status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_upstream_body_truncated() {
        let body = "x".repeat(500);
        match FarmError::upstream_http("pixel", 503, &body) {
            FarmError::UpstreamHttp { body, status, .. } => {
                assert_eq!(body.len(), ERROR_BODY_LIMIT);
                assert_eq!(status, 503);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            FarmError::NoHealthyBackend.to_string(),
            "No healthy farm nodes available"
        );
        assert_eq!(
            FarmError::QueueFull { capacity: 10 }.to_string(),
            "Queue full (10 waiting)"
        );
    }
}
