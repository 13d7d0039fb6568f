//! MCP transport errors.

/// Failures that end a serving session.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("stdio transport failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, McpError>;
