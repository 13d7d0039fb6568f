//! Line-delimited JSON-RPC over a byte stream.
//!
//! Each inbound line is one request, notification or batch.  Requests run on
//! their own tasks so that a `notifications/cancelled` arriving mid-call is
//! seen while the call is still running.  A single writer task owns the
//! output; nothing else may write to it, since it is usually stdout.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::error::Result;
use crate::protocol::{INVALID_REQUEST, JsonRpcRequest, JsonRpcResponse, PARSE_ERROR};
use crate::server::McpServer;

/// Serve requests from `reader` until it reaches end of input.
///
/// Calls still running at end of input are allowed to finish and their
/// responses are written before returning; each is bounded by the cascade
/// budget.
pub async fn serve<R, W>(server: Arc<McpServer>, reader: R, writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel::<Value>();
    let writer_task = tokio::spawn(write_responses(rx, writer));
    let mut tasks = JoinSet::new();

    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_line(line) {
            // Notifications never wait on I/O; handle them in order.
            Ok(Inbound::Single(request)) if request.is_notification() => {
                server.dispatch(request).await;
            }
            Ok(Inbound::Single(request)) => match server.accept(&request) {
                Ok(()) => {
                    let server = Arc::clone(&server);
                    let tx = tx.clone();
                    tasks.spawn(async move {
                        if let Some(response) = server.dispatch(request).await {
                            send(&tx, &response);
                        }
                    });
                }
                Err(refused) => send(&tx, &refused),
            },
            Ok(Inbound::Batch(requests)) => {
                let accepted: Vec<_> = requests
                    .into_iter()
                    .map(|request| server.accept(&request).map(|()| request))
                    .collect();
                let server = Arc::clone(&server);
                let tx = tx.clone();
                tasks.spawn(async move {
                    let mut responses = Vec::with_capacity(accepted.len());
                    for request in accepted {
                        let response = match request {
                            Ok(request) => server.dispatch(request).await,
                            Err(refused) => Some(refused),
                        };
                        responses.extend(response);
                    }
                    if !responses.is_empty() {
                        send(&tx, &responses);
                    }
                });
            }
            Err(response) => send(&tx, &response),
        }
        // Reap finished calls so the set does not grow over a long session.
        while tasks.try_join_next().is_some() {}
    }

    tracing::info!(in_flight = server.in_flight(), "input closed; draining");
    while tasks.join_next().await.is_some() {}
    drop(tx);

    match writer_task.await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(error = %e, "response writer panicked");
            Ok(())
        }
    }
}

enum Inbound {
    Single(JsonRpcRequest),
    Batch(Vec<JsonRpcRequest>),
}

fn parse_line(line: &str) -> std::result::Result<Inbound, JsonRpcResponse> {
    let value: Value = serde_json::from_str(line).map_err(|e| {
        JsonRpcResponse::error(
            None,
            PARSE_ERROR,
            format!("failed to parse JSON-RPC message: {e}"),
        )
    })?;
    let invalid = |e: serde_json::Error| {
        JsonRpcResponse::error(None, INVALID_REQUEST, format!("invalid JSON-RPC request: {e}"))
    };
    match value {
        Value::Array(items) if items.is_empty() => Err(JsonRpcResponse::error(
            None,
            INVALID_REQUEST,
            "empty batch request",
        )),
        Value::Array(items) => items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Inbound::Batch)
            .map_err(invalid),
        other => serde_json::from_value(other)
            .map(Inbound::Single)
            .map_err(invalid),
    }
}

fn send<T: serde::Serialize>(tx: &mpsc::UnboundedSender<Value>, message: &T) {
    match serde_json::to_value(message) {
        Ok(value) => {
            if tx.send(value).is_err() {
                tracing::warn!("response writer closed; dropping response");
            }
        }
        Err(e) => tracing::error!(error = %e, "failed to encode response"),
    }
}

async fn write_responses<W>(mut rx: mpsc::UnboundedReceiver<Value>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
    }
    Ok(())
}
