//! Tool input/output types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Arguments of one tool call, keyed by parameter name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInput {
    pub tool: String,
    pub params: HashMap<String, serde_json::Value>,
}

impl ToolInput {
    /// Create a new ToolInput
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            params: HashMap::new(),
        }
    }

    /// Build input from the raw arguments a model attached to a tool call
    ///
    /// Accepts a JSON object, a string holding a JSON object (the OpenAI wire
    /// format), or null for zero-argument calls.
    pub fn from_arguments(
        tool: impl Into<String>,
        arguments: &serde_json::Value,
    ) -> Result<Self, ToolError> {
        let object = match arguments {
            serde_json::Value::Null => serde_json::Map::new(),
            serde_json::Value::Object(map) => map.clone(),
            serde_json::Value::String(raw) if raw.trim().is_empty() => serde_json::Map::new(),
            serde_json::Value::String(raw) => {
                match serde_json::from_str::<serde_json::Value>(raw) {
                    Ok(serde_json::Value::Object(map)) => map,
                    _ => {
                        return Err(ToolError::InvalidParameter(
                            "arguments must be a JSON object".to_string(),
                        ))
                    }
                }
            }
            _ => {
                return Err(ToolError::InvalidParameter(
                    "arguments must be a JSON object".to_string(),
                ))
            }
        };

        Ok(Self {
            tool: tool.into(),
            params: object.into_iter().collect(),
        })
    }

    /// Add a parameter
    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Get a string parameter
    pub fn param_str(&self, key: &str) -> Result<String, ToolError> {
        self.params
            .get(key)
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| ToolError::MissingParameter(key.to_string()))
    }

    /// Get an optional string parameter
    pub fn param_str_opt(&self, key: &str) -> Option<String> {
        self.params
            .get(key)
            .and_then(|v| v.as_str())
            .map(String::from)
    }

    /// Get a parameter that may be a single string or an array of strings
    ///
    /// Blank entries are skipped. An absent key or a list with no usable
    /// entries is an error.
    pub fn param_str_list(&self, key: &str) -> Result<Vec<String>, ToolError> {
        let value = self
            .params
            .get(key)
            .ok_or_else(|| ToolError::MissingParameter(key.to_string()))?;

        let items: Vec<String> = match value {
            serde_json::Value::String(s) => vec![s.clone()],
            serde_json::Value::Array(values) => values
                .iter()
                .map(|v| {
                    v.as_str().map(String::from).ok_or_else(|| {
                        ToolError::InvalidParameter(format!("{} must contain only strings", key))
                    })
                })
                .collect::<Result<_, _>>()?,
            _ => {
                return Err(ToolError::InvalidParameter(format!(
                    "{} must be a string or an array of strings",
                    key
                )))
            }
        };

        let items: Vec<String> = items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if items.is_empty() {
            return Err(ToolError::InvalidParameter(format!("{} is empty", key)));
        }
        Ok(items)
    }

    /// Get a parameter as a JSON value
    pub fn param_json(&self, key: &str) -> Result<&serde_json::Value, ToolError> {
        self.params
            .get(key)
            .ok_or_else(|| ToolError::MissingParameter(key.to_string()))
    }
}

/// Output from a tool function
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub content: String,
    pub error: Option<String>,
}

impl ToolOutput {
    /// Create a successful output with text
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            success: true,
            content: text.into(),
            error: None,
        }
    }

    /// Create an error output
    pub fn error(error: impl Into<String>) -> Self {
        Self {
            success: false,
            content: String::new(),
            error: Some(error.into()),
        }
    }

    /// Text placed into the tool-result message the model sees
    ///
    /// Failures are rendered as `ERROR: <reason>` so the model can react to them.
    pub fn into_content(self) -> String {
        if self.success {
            self.content
        } else {
            format!(
                "ERROR: {}",
                self.error.unwrap_or_else(|| "unknown failure".to_string())
            )
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Tool-specific errors
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Execution failed: {0}")]
    Failed(String),

    #[error("Cancelled")]
    Cancelled,
}
