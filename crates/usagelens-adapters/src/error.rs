//! Transport error types.
//!
//! Every collaborator call surfaces failures through [`TransportError`].  The
//! variants mirror how the remote service answered, so the executor can
//! classify them without inspecting strings.

use serde::{Deserialize, Serialize};

/// Coarse failure class used by the cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Timeout,
    RateLimited,
    AuthFailed,
    ServerError,
    NotFound,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::RateLimited => write!(f, "rate limited"),
            Self::AuthFailed => write!(f, "authentication failed"),
            Self::ServerError => write!(f, "server error"),
            Self::NotFound => write!(f, "not found"),
        }
    }
}

/// A failed call to the analytics collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// No answer arrived in time.
    #[error("request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// HTTP 429.
    #[error("rate limited by the analytics service")]
    RateLimited { retry_after_secs: Option<u64> },

    /// HTTP 401 or 403.  The integration key is missing, wrong or lacks
    /// access.
    #[error("the analytics service rejected the integration key (HTTP {status})")]
    AuthFailed { status: u16 },

    /// HTTP 5xx, an unexpected status, or an unreadable response.
    #[error("analytics service error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    /// The connection could not be established or was dropped.
    #[error("analytics service unreachable: {reason}")]
    Unavailable { reason: String },

    /// HTTP 404 on a direct lookup.
    #[error("resource not found: {resource}")]
    NotFound { resource: String },

    /// HTTP 400.  The service refused the query itself.
    #[error("the analytics service rejected the query: {message}")]
    BadRequest { message: String },
}

impl TransportError {
    /// Map a non-success HTTP status onto the taxonomy.
    pub fn from_status(status: u16, body: &str, resource: &str) -> Self {
        let message = summarize_body(body);
        match status {
            400 | 422 => Self::BadRequest { message },
            401 | 403 => Self::AuthFailed { status },
            404 => Self::NotFound {
                resource: resource.to_string(),
            },
            429 => Self::RateLimited {
                retry_after_secs: None,
            },
            _ => Self::ServerError { status, message },
        }
    }

    /// The failure class, or `None` for a rejected query.
    pub fn kind(&self) -> Option<TransportKind> {
        match self {
            Self::Timeout { .. } => Some(TransportKind::Timeout),
            Self::RateLimited { .. } => Some(TransportKind::RateLimited),
            Self::AuthFailed { .. } => Some(TransportKind::AuthFailed),
            Self::ServerError { .. } | Self::Unavailable { .. } => Some(TransportKind::ServerError),
            Self::NotFound { .. } => Some(TransportKind::NotFound),
            Self::BadRequest { .. } => None,
        }
    }
}

/// First line of an error body, bounded, with JSON `message` fields
/// preferred.
fn summarize_body(body: &str) -> String {
    const MAX: usize = 200;
    let text = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.lines().next().unwrap_or_default().trim().to_string());
    if text.chars().count() > MAX {
        let cut: String = text.chars().take(MAX).collect();
        format!("{cut}…")
    } else if text.is_empty() {
        "no details".into()
    } else {
        text
    }
}

/// Failure to construct a collaborator client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("integration key is empty")]
    MissingKey,

    #[error("invalid API base url `{url}`: {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Convenience alias used throughout the adapters crate.
pub type Result<T> = std::result::Result<T, TransportError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(
            TransportError::from_status(401, "", "x").kind(),
            Some(TransportKind::AuthFailed)
        );
        assert_eq!(
            TransportError::from_status(403, "", "x").kind(),
            Some(TransportKind::AuthFailed)
        );
        assert_eq!(
            TransportError::from_status(404, "", "/api/v1/visitor/v1"),
            TransportError::NotFound {
                resource: "/api/v1/visitor/v1".into()
            }
        );
        assert_eq!(
            TransportError::from_status(429, "", "x").kind(),
            Some(TransportKind::RateLimited)
        );
        assert_eq!(
            TransportError::from_status(503, "down", "x").kind(),
            Some(TransportKind::ServerError)
        );
        assert_eq!(TransportError::from_status(400, "bad", "x").kind(), None);
    }

    #[test]
    fn body_summary_prefers_json_message() {
        let err = TransportError::from_status(500, r#"{"message":"pipeline failed"}"#, "x");
        assert!(err.to_string().contains("pipeline failed"));
        let err = TransportError::from_status(500, "", "x");
        assert!(err.to_string().contains("no details"));
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(1000);
        match TransportError::from_status(502, &body, "x") {
            TransportError::ServerError { message, .. } => {
                assert!(message.chars().count() <= 201);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
