//! Engine error types.
//!
//! Every invocation either produces a `ResultSummary` or one of these labeled
//! failures.  Empty results and transient transport failures never appear
//! here; the cascade absorbs them.

use usagelens_intent::IntentError;

/// Unified error type for the engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    // -- Caller errors -------------------------------------------------------
    /// A parameter is missing, malformed or out of range.  No network call
    /// was made.
    #[error("invalid parameter `{field}`: {reason}")]
    Validation { field: String, reason: String },

    /// The requested tool name is not registered.
    #[error("unknown intent `{name}`; closest known intents: {}", .suggestions.join(", "))]
    UnknownIntent {
        name: String,
        suggestions: Vec<String>,
    },

    // -- Fatal transport -----------------------------------------------------
    /// The analytics service rejected the integration key.
    #[error("authentication failed (HTTP {status}) after {attempts} attempt(s)")]
    AuthFailed { status: u16, attempts: usize },

    // -- Defects and control flow --------------------------------------------
    /// A fallback strategy produced parameters or a query its own target
    /// rejects.
    #[error("internal defect in fallback level {level} of `{intent}`: {reason}")]
    InternalDefect {
        intent: String,
        level: usize,
        reason: String,
    },

    /// The caller cancelled the invocation.
    #[error("invocation cancelled")]
    Cancelled,
}

impl EngineError {
    /// Short category label shown ahead of the message.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Validation { .. } | Self::UnknownIntent { .. } => "Validation error",
            Self::AuthFailed { .. } => "Authentication failed",
            Self::InternalDefect { .. } => "Internal defect",
            Self::Cancelled => "Cancelled",
        }
    }

    /// What the caller can do about it.
    pub fn remediation(&self) -> String {
        match self {
            Self::Validation { field, .. } => {
                format!("Fix `{field}` and retry; the tool's input schema lists accepted values.")
            }
            Self::UnknownIntent { suggestions, .. } => match suggestions.first() {
                Some(first) => format!("Call one of the listed tools instead, e.g. `{first}`."),
                None => "List the available tools and pick one of them.".into(),
            },
            Self::AuthFailed { .. } => "Check that PENDO_INTEGRATION_KEY holds a valid \
                 integration key with read access, then restart the server."
                .into(),
            Self::InternalDefect { .. } => {
                "This is a bug in the fallback plan; report it with the log output.".into()
            }
            Self::Cancelled => "Re-issue the request if the result is still needed.".into(),
        }
    }

    /// Whether the failure is the caller's input rather than the system.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::UnknownIntent { .. })
    }

    /// Re-label an intent error raised while preparing fallback `level`.
    ///
    /// Rejections of the primary attempt are the caller's fault; rejections
    /// of a fallback are defects in the plan.
    pub fn at_level(err: IntentError, intent: &str, level: usize) -> Self {
        match err {
            IntentError::Validation { field, reason } if level == 0 => {
                Self::Validation { field, reason }
            }
            IntentError::Validation { field, reason } => Self::InternalDefect {
                intent: intent.to_string(),
                level,
                reason: format!("`{field}`: {reason}"),
            },
            other => other.into(),
        }
    }
}

impl From<IntentError> for EngineError {
    fn from(err: IntentError) -> Self {
        match err {
            IntentError::Validation { field, reason } => Self::Validation { field, reason },
            IntentError::UnknownIntent { name, suggestions } => {
                Self::UnknownIntent { name, suggestions }
            }
            IntentError::InternalDefect {
                intent,
                level,
                reason,
            } => Self::InternalDefect {
                intent,
                level,
                reason,
            },
        }
    }
}

/// Convenience alias used throughout the engine crate.
pub type Result<T> = std::result::Result<T, EngineError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
