//! Concurrent tool execution
//!
//! Executes every tool call of a batch at once and waits for all of them.
//! Each call yields exactly one tool-result message carrying the call id and
//! tool name; results come back in the order the calls were made. A failed
//! or unknown tool yields an `ERROR: ...` result instead of failing the batch.

use crate::llm::Message;
use crate::tools::ToolRegistry;
use futures::future::join_all;
use sdk::types::ToolOutput;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct ToolRunner {
    registry: Arc<ToolRegistry>,
}

impl ToolRunner {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run the tool calls of every message in `batch`
    pub async fn run(&self, batch: &[Message], cancel: &CancellationToken) -> Vec<Message> {
        let calls: Vec<_> = batch.iter().flat_map(|m| m.tool_calls.iter()).collect();
        debug!("Executing {} tool calls", calls.len());

        let futures = calls.iter().map(|call| async move {
            let output = tokio::select! {
                output = self.registry.dispatch(&call.name, &call.arguments) => output,
                _ = cancel.cancelled() => ToolOutput::error("cancelled"),
            };
            Message::tool_result(output.into_content(), call.id.clone(), call.name.clone())
        });

        join_all(futures).await
    }
}
