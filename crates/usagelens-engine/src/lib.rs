//! Query orchestration for UsageLens.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌──────────────┐
//! │ Registry │──>│ Cascade  │──>│ Executor │──>│ Collaborator │
//! │ validate │   │ (levels) │   │ (1 call) │   │  (adapters)  │
//! └──────────┘   └────┬─────┘   └──────────┘   └──────────────┘
//!                     │
//!               ┌─────┴─────┐
//!               │ Formatter │──> ResultSummary
//!               └───────────┘
//! ```
//!
//! ## Modules
//!
//! - [`orchestrator`] -- resolve, validate, cascade and format one invocation.
//! - [`cascade`] -- the fallback state machine and its transition rule.
//! - [`executor`] -- one timed, cancellable collaborator call and its
//!   classification.
//! - [`formatter`] -- the `ResultSummary` contract.
//! - [`config`] -- timeouts and the cascade budget.
//! - [`cancel`] -- cooperative cancellation.
//! - [`error`] -- engine error types.

pub mod cancel;
pub mod cascade;
pub mod config;
pub mod error;
pub mod executor;
pub mod formatter;
pub mod orchestrator;

pub use cancel::CancelToken;
pub use cascade::{Attempt, Cascade, CascadeOutcome, CascadeReport, ExhaustReason, Transition};
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use executor::{ExecutionOutcome, Executor};
pub use formatter::{Peak, ResultSummary, SeriesPoint, SummaryStatus, format_number};
pub use orchestrator::Orchestrator;
