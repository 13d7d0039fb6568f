//! MCP request dispatch.
//!
//! Exposes every registered intent as one MCP tool.  Supports `initialize`,
//! `ping`, `tools/list`, `tools/call` and the `notifications/cancelled`
//! notification, which cancels an in-flight `tools/call` by request id.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::{Value, json};
use usagelens_engine::{CancelToken, EngineError, Orchestrator};
use usagelens_intent::IntentEntry;

use crate::protocol::{
    INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, JsonRpcRequest, JsonRpcResponse, MCP_PROTOCOL_VERSION,
    METHOD_NOT_FOUND, SERVER_NAME, SERVER_VERSION, ToolDefinition, ToolResult,
};
use crate::render::{render_error, render_summary};

/// Dispatches MCP requests to an [`Orchestrator`].
///
/// Safe to share across tasks: the only mutable state is the map of
/// in-flight calls.
pub struct McpServer {
    orchestrator: Arc<Orchestrator>,
    in_flight: DashMap<String, CancelToken>,
}

impl McpServer {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            in_flight: DashMap::new(),
        }
    }

    /// Number of `tools/call` requests still running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Register a `tools/call` before it is dispatched.
    ///
    /// A cancellation read right after the call then finds its token even if
    /// the call's task has not started yet.  A call whose id is already in
    /// flight is refused, so every running call owns its token.
    pub(crate) fn accept(&self, request: &JsonRpcRequest) -> Result<(), JsonRpcResponse> {
        if request.method != "tools/call" {
            return Ok(());
        }
        let Some(id) = &request.id else {
            return Ok(());
        };
        match self.in_flight.entry(request_key(id)) {
            Entry::Occupied(_) => {
                tracing::warn!(request_id = %id, "duplicate tools/call id refused");
                Err(JsonRpcResponse::error(
                    Some(id.clone()),
                    INVALID_REQUEST,
                    format!("request id {id} is already in flight"),
                ))
            }
            Entry::Vacant(slot) => {
                slot.insert(CancelToken::new());
                Ok(())
            }
        }
    }

    /// Handle one request.
    ///
    /// Returns `None` for notifications and for calls the client cancelled,
    /// which get no response.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if let Err(refused) = self.accept(&request) {
            return Some(refused);
        }
        self.dispatch(request).await
    }

    /// Handle a request that already passed [`accept`](Self::accept).
    pub(crate) async fn dispatch(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        tracing::debug!(method = %request.method, "MCP request received");

        if request.is_notification() {
            self.handle_notification(&request.method, &request.params);
            return None;
        }

        let id = request.id;
        let response = match request.method.as_str() {
            "initialize" => Self::handle_initialize(id),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => self.handle_tools_list(id),
            "tools/call" => return self.handle_tools_call(id, request.params).await,
            other => {
                tracing::warn!(method = %other, "unknown MCP method");
                JsonRpcResponse::error(id, METHOD_NOT_FOUND, format!("method not found: {other}"))
            }
        };
        Some(response)
    }

    fn handle_notification(&self, method: &str, params: &Value) {
        match method {
            "notifications/cancelled" => {
                let Some(request_id) = params.get("requestId") else {
                    tracing::warn!("cancellation without requestId");
                    return;
                };
                match self.in_flight.get(&request_key(request_id)) {
                    Some(token) => {
                        tracing::info!(request_id = %request_id, "cancelling tool call");
                        token.cancel();
                    }
                    None => tracing::debug!(request_id = %request_id, "nothing to cancel"),
                }
            }
            "notifications/initialized" => tracing::info!("client initialized"),
            other => tracing::debug!(method = %other, "ignoring notification"),
        }
    }

    fn handle_initialize(id: Option<Value>) -> JsonRpcResponse {
        JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {
                    "tools": {}
                },
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": SERVER_VERSION
                }
            }),
        )
    }

    fn handle_tools_list(&self, id: Option<Value>) -> JsonRpcResponse {
        let tools: Vec<ToolDefinition> = self
            .orchestrator
            .registry()
            .entries()
            .map(tool_definition)
            .collect();
        match serde_json::to_value(&tools) {
            Ok(tools) => JsonRpcResponse::success(id, json!({ "tools": tools })),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize tool list");
                JsonRpcResponse::error(id, INTERNAL_ERROR, "failed to serialize tool list")
            }
        }
    }

    async fn handle_tools_call(&self, id: Option<Value>, params: Value) -> Option<JsonRpcResponse> {
        let key = id.as_ref().map(request_key).unwrap_or_default();
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            self.in_flight.remove(&key);
            return Some(JsonRpcResponse::error(
                id,
                INVALID_PARAMS,
                "missing required field `name` in params",
            ));
        };
        let arguments = match params.get("arguments") {
            None | Some(Value::Null) => json!({}),
            Some(args) => args.clone(),
        };

        let cancel: CancelToken = self.in_flight.entry(key.clone()).or_default().clone();
        let outcome = self
            .orchestrator
            .invoke_with_cancel(name, &arguments, &cancel)
            .await;
        self.in_flight.remove(&key);

        let result = match outcome {
            Ok(summary) => ToolResult::success(render_summary(&summary)),
            Err(EngineError::Cancelled) => {
                tracing::info!(tool = name, "tool call cancelled; no response sent");
                return None;
            }
            Err(err) => ToolResult::error(render_error(&err)),
        };

        Some(match serde_json::to_value(&result) {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize tool result");
                JsonRpcResponse::error(id, INTERNAL_ERROR, "failed to serialize tool result")
            }
        })
    }
}

fn tool_definition(entry: &IntentEntry) -> ToolDefinition {
    ToolDefinition {
        name: entry.tool_name.clone(),
        description: entry.description.clone(),
        input_schema: entry.schema.to_json_schema(),
    }
}

/// Map key for a request id; `1` and `"1"` stay distinct.
fn request_key(id: &Value) -> String {
    id.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_keys_keep_id_types_apart() {
        assert_ne!(request_key(&json!(1)), request_key(&json!("1")));
        assert_eq!(request_key(&json!("abc")), request_key(&json!("abc")));
    }
}
