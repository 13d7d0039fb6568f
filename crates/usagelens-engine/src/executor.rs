//! Query executor.
//!
//! Submits one [`Query`] to the collaborator under a deadline and classifies
//! what came back into an [`ExecutionOutcome`].  The executor never retries;
//! moving on after a failure is the cascade's decision.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;
use usagelens_adapters::{Collaborator, TransportError};
use usagelens_intent::Query;

use crate::cancel::CancelToken;
use crate::error::{EngineError, Result};

/// Field reported when the collaborator rejects a query as malformed.
pub const REJECTED_QUERY_FIELD: &str = "query";

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Classified result of one collaborator call.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// At least one row.
    Success(Vec<Value>),
    /// The call succeeded but matched nothing.
    Empty,
    /// The call failed in transit or the service refused it.
    Transport(TransportError),
    /// The service rejected the query itself.
    ValidationError { field: String, reason: String },
}

impl ExecutionOutcome {
    /// Short description for logs and exhaustion reports.
    pub fn describe(&self) -> String {
        match self {
            Self::Success(rows) => format!("{} row(s)", rows.len()),
            Self::Empty => "no data".into(),
            Self::Transport(err) => match err.kind() {
                Some(kind) => kind.to_string(),
                None => err.to_string(),
            },
            Self::ValidationError { field, reason } => format!("rejected `{field}`: {reason}"),
        }
    }

    fn from_rows(rows: Vec<Value>) -> Self {
        if rows.is_empty() {
            Self::Empty
        } else {
            Self::Success(rows)
        }
    }

    fn from_resource(value: Value) -> Self {
        match value {
            Value::Null => Self::Empty,
            Value::Array(rows) => Self::from_rows(rows.into_iter().filter(|r| !r.is_null()).collect()),
            Value::Object(ref map) if map.is_empty() => Self::Empty,
            other => Self::Success(vec![other]),
        }
    }

    fn from_error(err: TransportError) -> Self {
        match err {
            TransportError::BadRequest { message } => Self::ValidationError {
                field: REJECTED_QUERY_FIELD.into(),
                reason: message,
            },
            other => Self::Transport(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Runs single queries against a collaborator.
#[derive(Clone)]
pub struct Executor {
    collaborator: Arc<dyn Collaborator>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("collaborator", &self.collaborator.id())
            .finish()
    }
}

impl Executor {
    pub fn new(collaborator: Arc<dyn Collaborator>) -> Self {
        Self { collaborator }
    }

    /// Id of the collaborator every call goes to.
    pub fn collaborator_id(&self) -> &str {
        self.collaborator.id()
    }

    /// Make exactly one collaborator call for `query`.
    ///
    /// Returns [`EngineError::Cancelled`] if `cancel` fires first; the
    /// outstanding call is dropped.
    pub async fn execute(
        &self,
        query: &Query,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<ExecutionOutcome> {
        let call = async {
            match query {
                Query::Pipeline(spec) => self
                    .collaborator
                    .execute_pipeline(spec)
                    .await
                    .map(ExecutionOutcome::from_rows),
                Query::Lookup(lookup) => self
                    .collaborator
                    .lookup_resource(lookup)
                    .await
                    .map(ExecutionOutcome::from_resource),
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            result = tokio::time::timeout(timeout, call) => match result {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(err)) => ExecutionOutcome::from_error(err),
                Err(_) => ExecutionOutcome::Transport(TransportError::Timeout {
                    seconds: whole_seconds(timeout),
                }),
            },
        };

        debug!(
            collaborator = self.collaborator.id(),
            lookup = query.is_lookup(),
            outcome = %outcome.describe(),
            "query executed"
        );
        Ok(outcome)
    }
}

/// Seconds in `d`, rounded up so a sub-second timeout never reads as 0s.
fn whole_seconds(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
