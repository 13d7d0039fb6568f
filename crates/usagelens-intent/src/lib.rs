//! Analysis intents and query construction for UsageLens.
//!
//! This crate provides:
//!
//! - **Intents**: the closed set of analysis requests and their tool names
//!   via [`intent::Intent`].
//! - **Parameter validation**: declarative schemas that check raw JSON
//!   arguments before any network call via [`params::ParamSchema`].
//! - **Pipeline IR**: a backend-neutral aggregation description with a
//!   canonical stage order via [`pipeline::PipelineSpec`].
//! - **Query building**: pure, deterministic intent-to-query mapping via
//!   [`builder::build`].
//! - **Registry**: schemas, builders, and fallback plans for every intent
//!   via [`registry::IntentRegistry`].

pub mod builder;
pub mod error;
pub mod intent;
pub mod params;
pub mod pipeline;
pub mod registry;

pub use builder::BuildFn;
pub use error::{IntentError, Result};
pub use intent::{EntityKind, Intent};
pub use params::{ParamKind, ParamSchema, ParamSpec, ParamValue, ValidatedParams};
pub use pipeline::{
    AggregateFn, MAX_WINDOW_DAYS, Metric, Period, PipelineBuilder, PipelineSpec, Predicate, Query,
    ResourceLookup, SortDirection, Source, Stage, TimeWindow, WindowAnchor,
};
pub use registry::{
    DEFAULT_DISPLAY_CAP, FallbackPlan, IntentEntry, IntentRegistry, MAX_SEARCH_LIMIT, RebindFn,
    Strategy,
};
