//! Intent error types.
//!
//! All intent subsystems surface errors through [`IntentError`].  Validation
//! failures name the offending field so callers can fix the request without
//! guessing.

/// Unified error type for the intent crate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntentError {
    // -- Validation ----------------------------------------------------------
    /// A parameter is missing, has the wrong type, or is out of range.
    #[error("invalid parameter `{field}`: {reason}")]
    Validation { field: String, reason: String },

    /// The requested intent name is not in the registry.
    #[error("unknown intent `{name}`; closest known intents: {}", .suggestions.join(", "))]
    UnknownIntent {
        name: String,
        suggestions: Vec<String>,
    },

    // -- Plan defects --------------------------------------------------------
    /// A fallback strategy rebound parameters that its own target schema
    /// rejects.  This is a programming error in the plan, not a data
    /// condition.
    #[error("fallback level {level} for `{intent}` is defective: {reason}")]
    InternalDefect {
        intent: String,
        level: usize,
        reason: String,
    },
}

impl IntentError {
    /// Shorthand for a [`IntentError::Validation`] error.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// The offending field, if this is a validation error.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Validation { field, .. } => Some(field),
            _ => None,
        }
    }
}

/// Convenience alias used throughout the intent crate.
pub type Result<T> = std::result::Result<T, IntentError>;
