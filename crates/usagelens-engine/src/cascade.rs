//! Fallback cascade.
//!
//! A state machine over an intent's [`FallbackPlan`](usagelens_intent::FallbackPlan).
//! Level `k` rebinds the caller's parameters for strategy `k`, builds its
//! query and executes it.  The classified outcome alone decides the next
//! state, through [`transition`], so each rule can be tested without a
//! collaborator.
//!
//! Levels run strictly one after another; the next level starts only after
//! the previous outcome is known.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use usagelens_adapters::TransportError;
use usagelens_intent::{Intent, IntentEntry, IntentRegistry, Query, ValidatedParams};

use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::executor::{ExecutionOutcome, Executor};

// ---------------------------------------------------------------------------
// Transition rule
// ---------------------------------------------------------------------------

/// Why a cascade stopped without an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum ExhaustReason {
    /// Every level came back empty or with a transient failure.
    PlanExhausted,
    /// The integration key was rejected.
    AuthFailed { status: u16 },
    /// The wall-clock budget ran out before the plan did.
    BudgetExceeded,
}

/// Next state after one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The attempt answered the request.
    Succeed,
    /// Try the given level next.
    Advance(usize),
    /// Stop without an answer.
    Exhaust(ExhaustReason),
    /// The primary query was refused as invalid.
    Reject { field: String, reason: String },
    /// A fallback query was refused as invalid.
    Defect { reason: String },
}

/// The transition from `level` of a plan with `plan_len` strategies.
pub fn transition(level: usize, plan_len: usize, outcome: &ExecutionOutcome) -> Transition {
    let advance = || match next_level(level, plan_len) {
        Some(next) => Transition::Advance(next),
        None => Transition::Exhaust(ExhaustReason::PlanExhausted),
    };
    match outcome {
        ExecutionOutcome::Success(_) => Transition::Succeed,
        ExecutionOutcome::Empty => advance(),
        ExecutionOutcome::Transport(TransportError::AuthFailed { status }) => {
            Transition::Exhaust(ExhaustReason::AuthFailed { status: *status })
        }
        // Not-found and every transient failure move on alike.
        ExecutionOutcome::Transport(_) => advance(),
        ExecutionOutcome::ValidationError { field, reason } if level == 0 => Transition::Reject {
            field: field.clone(),
            reason: reason.clone(),
        },
        ExecutionOutcome::ValidationError { field, reason } => Transition::Defect {
            reason: format!("collaborator rejected `{field}`: {reason}"),
        },
    }
}

/// The level after `level`, if the plan has one.
fn next_level(level: usize, plan_len: usize) -> Option<usize> {
    (level + 1 < plan_len).then_some(level + 1)
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Outcome recorded for a level whose query was already sent.
const SKIPPED_REPEAT: &str = "skipped (same query)";

/// One level of the plan, executed or skipped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attempt {
    pub level: usize,
    pub intent: Intent,
    /// Classified outcome, e.g. `no data` or `rate limited`.
    pub outcome: String,
    #[serde(with = "millis")]
    pub elapsed: Duration,
}

mod millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u128(d.as_millis())
    }
}

/// How the cascade ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CascadeOutcome {
    Answered {
        level: usize,
        intent: Intent,
        query: Query,
        rows: Vec<Value>,
    },
    Exhausted(ExhaustReason),
}

/// The final state plus every attempt made on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct CascadeReport {
    pub outcome: CascadeOutcome,
    pub attempts: Vec<Attempt>,
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Walks a fallback plan for one invocation.
pub struct Cascade<'a> {
    registry: &'a IntentRegistry,
    executor: &'a Executor,
    config: &'a EngineConfig,
}

impl<'a> Cascade<'a> {
    pub fn new(registry: &'a IntentRegistry, executor: &'a Executor, config: &'a EngineConfig) -> Self {
        Self {
            registry,
            executor,
            config,
        }
    }

    /// Run `entry`'s plan with the caller's validated `params`.
    ///
    /// Makes at most `entry.plan.len()` collaborator calls and never sends
    /// the same query twice: a level whose rebound query matches an earlier
    /// one is recorded as skipped.  Returns an error only for a rejected
    /// primary query, a plan defect, or cancellation.
    pub async fn run(
        &self,
        entry: &IntentEntry,
        params: &ValidatedParams,
        cancel: &CancelToken,
    ) -> Result<CascadeReport> {
        let deadline = Instant::now() + self.config.cascade_budget;
        let label = entry.intent.label();
        let mut attempts = Vec::with_capacity(entry.plan.len());
        let mut sent: Vec<Query> = Vec::with_capacity(entry.plan.len());
        let mut level = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(intent = %label, level, "cascade budget exhausted");
                return Ok(CascadeReport {
                    outcome: CascadeOutcome::Exhausted(ExhaustReason::BudgetExceeded),
                    attempts,
                });
            }

            let (intent, query) = self.prepare(entry, level, params)?;
            if sent.contains(&query) {
                debug!(intent = %label, level, strategy = %intent, "fallback repeats a sent query");
                attempts.push(Attempt {
                    level,
                    intent,
                    outcome: SKIPPED_REPEAT.into(),
                    elapsed: Duration::ZERO,
                });
                match next_level(level, entry.plan.len()) {
                    Some(next) => {
                        level = next;
                        continue;
                    }
                    None => {
                        info!(intent = %label, attempts = attempts.len(), "cascade exhausted");
                        return Ok(CascadeReport {
                            outcome: CascadeOutcome::Exhausted(ExhaustReason::PlanExhausted),
                            attempts,
                        });
                    }
                }
            }
            if level > 0 {
                info!(intent = %label, level, strategy = %intent, "falling back");
            }

            let started = Instant::now();
            let timeout = self.config.call_timeout_within(remaining);
            let outcome = self.executor.execute(&query, timeout, cancel).await?;
            sent.push(query.clone());
            attempts.push(Attempt {
                level,
                intent,
                outcome: outcome.describe(),
                elapsed: started.elapsed(),
            });

            match (transition(level, entry.plan.len(), &outcome), outcome) {
                (Transition::Succeed, ExecutionOutcome::Success(rows)) => {
                    debug!(intent = %label, level, rows = rows.len(), "cascade answered");
                    return Ok(CascadeReport {
                        outcome: CascadeOutcome::Answered {
                            level,
                            intent,
                            query,
                            rows,
                        },
                        attempts,
                    });
                }
                (Transition::Advance(next), _) => level = next,
                (Transition::Exhaust(reason), _) => {
                    info!(intent = %label, attempts = attempts.len(), ?reason, "cascade exhausted");
                    return Ok(CascadeReport {
                        outcome: CascadeOutcome::Exhausted(reason),
                        attempts,
                    });
                }
                (Transition::Reject { field, reason }, _) => {
                    return Err(EngineError::Validation { field, reason });
                }
                (Transition::Defect { reason }, _) => {
                    return Err(EngineError::InternalDefect {
                        intent: label,
                        level,
                        reason,
                    });
                }
                (Transition::Succeed, other) => {
                    return Err(EngineError::InternalDefect {
                        intent: label,
                        level,
                        reason: format!("success without rows: {}", other.describe()),
                    });
                }
            }
        }
    }

    /// Rebind and build the query for `level`.
    fn prepare(
        &self,
        entry: &IntentEntry,
        level: usize,
        params: &ValidatedParams,
    ) -> Result<(Intent, Query)> {
        let label = entry.intent.label();
        let (intent, rebound) = self
            .registry
            .rebind(entry, level, params)
            .map_err(|e| EngineError::at_level(e, &label, level))?;
        let target = self
            .registry
            .entry(intent)
            .ok_or_else(|| EngineError::InternalDefect {
                intent: label.clone(),
                level,
                reason: format!("{intent} is not registered"),
            })?;
        let query =
            (target.build)(intent, &rebound).map_err(|e| EngineError::at_level(e, &label, level))?;
        Ok((intent, query))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
