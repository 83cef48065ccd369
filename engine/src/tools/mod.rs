//! Research tools
//!
//! Tools are registered by name in a [`ToolRegistry`]. The registry hands the
//! model the schemas of the tools bound to a run and dispatches tool calls.
//! Dispatch never fails: errors become `ERROR: ...` text in the tool-result
//! message so the model can see them and self-correct.

pub mod search;
pub mod visit;

pub use search::SearchTool;
pub use visit::VisitTool;

use crate::config::{ModelConfig, ToolsConfig};
use crate::llm::openai::OpenAIProvider;
use crate::llm::{LLMProvider, ToolSchema};
use crate::secrets::SecretCache;
use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::{ToolError, ToolInput, ToolOutput};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A tool the model can call
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema of the arguments object
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, input: ToolInput) -> Result<ToolOutput, ToolError>;

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Registry of available tools, in registration order
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    /// Create an empty registry with no tools enabled.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the web `search` and `visit` tools
    ///
    /// The visit summarizer uses `[tools.summarizer]`, falling back to the
    /// run's `[model]` settings for anything left unset.
    pub fn with_web_tools(
        tools: &ToolsConfig,
        model: &ModelConfig,
        secret_cache: Arc<SecretCache>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(tools.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let mut summarizer_config = model.clone();
        if let Some(name) = &tools.summarizer.model_name {
            summarizer_config.model_name = name.clone();
        }
        if let Some(url) = &tools.summarizer.base_url {
            summarizer_config.base_url = url.clone();
        }
        if let Some(key) = &tools.summarizer.api_key_name {
            summarizer_config.api_key_name = key.clone();
        }
        let summarizer: Arc<dyn LLMProvider> = Arc::new(OpenAIProvider::new(
            summarizer_config,
            Arc::clone(&secret_cache),
        ));

        let mut registry = Self::empty();
        registry.register(Arc::new(SearchTool::from_config(
            tools,
            client.clone(),
            Arc::clone(&secret_cache),
        )));
        registry.register(Arc::new(VisitTool::from_config(
            tools,
            client,
            secret_cache,
            summarizer,
        )));
        registry
    }

    /// Add a tool, replacing any tool with the same name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn available_tool_names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    /// Schemas for the named tools, in the order given
    ///
    /// # Errors
    /// `EngineError::ToolNotFound` for a name that is not registered
    pub fn resolve(&self, names: &[String]) -> Result<Vec<ToolSchema>, EngineError> {
        names
            .iter()
            .map(|name| {
                self.get(name).map(|tool| tool.schema()).ok_or_else(|| {
                    EngineError::ToolNotFound(format!(
                        "'{}' (available: {})",
                        name,
                        self.available_tool_names().join(", ")
                    ))
                })
            })
            .collect()
    }

    /// Execute one tool call, reporting failures as typed errors
    ///
    /// # Errors
    /// `EngineError::ToolNotFound` for an unregistered name,
    /// `EngineError::ToolExecution` when the arguments are rejected or the
    /// tool fails
    pub async fn execute(&self, name: &str, arguments: &Value) -> Result<ToolOutput, EngineError> {
        let tool = self
            .get(name)
            .ok_or_else(|| EngineError::ToolNotFound(name.to_string()))?;

        let input =
            ToolInput::from_arguments(name, arguments).map_err(|e| execution_error(name, e))?;
        tool.execute(input).await.map_err(|e| execution_error(name, e))
    }

    /// Execute one tool call
    pub async fn dispatch(&self, name: &str, arguments: &Value) -> ToolOutput {
        debug!("Dispatching tool '{}' with args: {}", name, arguments);

        match self.execute(name, arguments).await {
            Ok(output) => output,
            Err(EngineError::ToolNotFound(_)) => {
                warn!("Unknown tool requested: {}", name);
                ToolOutput::error(format!(
                    "Unknown tool '{}'. Available tools: {}",
                    name,
                    self.available_tool_names().join(", ")
                ))
            }
            Err(EngineError::ToolExecution { tool, message }) => {
                debug!("Tool '{}' failed: {}", tool, message);
                ToolOutput::error(message)
            }
            Err(other) => ToolOutput::error(other.to_string()),
        }
    }
}

fn execution_error(tool: &str, error: ToolError) -> EngineError {
    let message = match error {
        ToolError::Failed(message) => message,
        other => other.to_string(),
    };
    EngineError::ToolExecution {
        tool: tool.to_string(),
        message,
    }
}
