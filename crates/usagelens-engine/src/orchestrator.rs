//! Orchestrator: the single entry point for one tool invocation.
//!
//! resolve → validate → cascade → format.  Validation failures return before
//! any collaborator call.  Every invocation gets a UUIDv7 that tags its log
//! lines.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{Instrument, info, info_span, warn};
use usagelens_adapters::Collaborator;
use usagelens_intent::IntentRegistry;
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::cascade::{Cascade, CascadeOutcome, ExhaustReason};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::executor::Executor;
use crate::formatter::{self, Answer, ResultSummary};

/// Serves tool invocations against one collaborator.
///
/// Holds only immutable state; share it behind an `Arc` and call it from as
/// many tasks as needed.
#[derive(Debug)]
pub struct Orchestrator {
    registry: Arc<IntentRegistry>,
    executor: Executor,
    config: EngineConfig,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<IntentRegistry>,
        collaborator: Arc<dyn Collaborator>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            executor: Executor::new(collaborator),
            config,
        }
    }

    pub fn registry(&self) -> &IntentRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Invoke `tool` with raw JSON `args`.
    pub async fn invoke(&self, tool: &str, args: &Value) -> Result<ResultSummary> {
        self.invoke_with_cancel(tool, args, &CancelToken::new()).await
    }

    /// Invoke `tool`, abandoning the work once `cancel` fires.
    pub async fn invoke_with_cancel(
        &self,
        tool: &str,
        args: &Value,
        cancel: &CancelToken,
    ) -> Result<ResultSummary> {
        let invocation_id = Uuid::now_v7();
        let span = info_span!(
            "invoke",
            %invocation_id,
            tool,
            collaborator = self.executor.collaborator_id()
        );
        async {
            let started = Instant::now();
            let result = self.run(tool, args, cancel).await;
            match &result {
                Ok(summary) => info!(
                    level = summary.source_strategy_level,
                    status = ?summary.status,
                    rows = summary.total_rows,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "invocation finished"
                ),
                Err(err) => warn!(
                    error = %err,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "invocation failed"
                ),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run(&self, tool: &str, args: &Value, cancel: &CancelToken) -> Result<ResultSummary> {
        let entry = self.registry.resolve(tool)?;
        let params = entry.schema.validate(args)?;

        let cascade = Cascade::new(&self.registry, &self.executor, &self.config);
        let report = cascade.run(entry, &params, cancel).await?;

        match report.outcome {
            CascadeOutcome::Answered {
                level,
                intent,
                query,
                rows,
            } => {
                let answering =
                    self.registry
                        .entry(intent)
                        .ok_or_else(|| EngineError::InternalDefect {
                            intent: entry.intent.label(),
                            level,
                            reason: format!("{intent} is not registered"),
                        })?;
                Ok(formatter::format(
                    Answer {
                        requested: entry,
                        answering,
                        level,
                        query: &query,
                        rows: &rows,
                    },
                    report.attempts,
                ))
            }
            CascadeOutcome::Exhausted(ExhaustReason::AuthFailed { status }) => {
                Err(EngineError::AuthFailed {
                    status,
                    attempts: report.attempts.len(),
                })
            }
            CascadeOutcome::Exhausted(reason) => Ok(formatter::format_exhausted(
                &self.registry,
                entry,
                reason,
                report.attempts,
            )),
        }
    }
}
