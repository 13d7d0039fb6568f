//! The collaborator boundary.
//!
//! The engine never talks HTTP directly.  Anything that can run an
//! aggregation pipeline and look up a named resource implements
//! [`Collaborator`]; the production implementation is
//! [`PendoClient`](crate::PendoClient) and tests use scripted in-memory
//! doubles.

use async_trait::async_trait;
use serde_json::Value;
use usagelens_intent::{PipelineSpec, ResourceLookup};

use crate::error::Result;

/// The analytics service as the engine sees it.
///
/// Implementations perform exactly one outbound request per call and never
/// retry; retrying is the cascade's job.
#[async_trait]
pub trait Collaborator: Send + Sync {
    /// Return the unique identifier for this collaborator instance.
    fn id(&self) -> &str;

    /// Run a structured aggregation and return its result rows.
    async fn execute_pipeline(&self, spec: &PipelineSpec) -> Result<Vec<Value>>;

    /// Fetch one named entity directly.
    async fn lookup_resource(&self, lookup: &ResourceLookup) -> Result<Value>;
}
