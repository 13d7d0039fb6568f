//! Collaborator adapters for UsageLens.
//!
//! The engine reaches the analytics service only through the
//! [`Collaborator`] trait defined in [`traits`].  [`PendoClient`] is the HTTP
//! implementation; [`wire`] lowers pipelines into its request body.

pub mod error;
pub mod pendo;
pub mod traits;
pub mod wire;

pub use error::{ClientError, Result, TransportError, TransportKind};
pub use pendo::{DEFAULT_BASE_URL, PendoClient};
pub use traits::Collaborator;
