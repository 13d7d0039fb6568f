//! MCP tool surface for UsageLens.
//!
//! Speaks JSON-RPC 2.0, one message per line, over any async byte stream
//! (stdin/stdout in production).  Every registered intent is one tool.
//!
//! ## Modules
//!
//! - [`protocol`] -- JSON-RPC envelopes and MCP payload types.
//! - [`server`] -- request dispatch and in-flight cancellation.
//! - [`render`] -- text rendering of summaries and labeled errors.
//! - [`transport`] -- the line-delimited read/write loop.
//! - [`error`] -- transport error types.

pub mod error;
pub mod protocol;
pub mod render;
pub mod server;
pub mod transport;

pub use error::{McpError, Result};
pub use protocol::{JsonRpcRequest, JsonRpcResponse, ToolDefinition, ToolResult};
pub use render::{render_error, render_summary};
pub use server::McpServer;
pub use transport::serve;
