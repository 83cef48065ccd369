//! Web search tool
//!
//! Runs every query of a call concurrently against Google (via Serper) or a
//! custom tool server. Each successful query contributes one JSON array of
//! result items to the output, one array per line. A failed query contributes
//! a one-line failure note instead; the call as a whole only fails when every
//! query fails.

use super::Tool;
use crate::config::ToolsConfig;
use crate::secrets::SecretCache;
use async_trait::async_trait;
use futures::future::join_all;
use sdk::types::{ToolError, ToolInput, ToolOutput};
use serde_json::{json, Value};
use std::sync::Arc;

/// Where queries are sent
#[derive(Debug, Clone)]
pub enum SearchBackend {
    /// Serper Google search API; `api_key_name` names the secret
    Serper { url: String, api_key_name: String },
    /// Custom tool server, `POST {url}/search`
    ToolServer { url: String },
}

pub struct SearchTool {
    backend: SearchBackend,
    client: reqwest::Client,
    secret_cache: Arc<SecretCache>,
}

impl SearchTool {
    pub fn new(backend: SearchBackend, client: reqwest::Client, secret_cache: Arc<SecretCache>) -> Self {
        Self {
            backend,
            client,
            secret_cache,
        }
    }

    pub fn from_config(config: &ToolsConfig, client: reqwest::Client, secret_cache: Arc<SecretCache>) -> Self {
        let backend = match &config.server_url {
            Some(url) => SearchBackend::ToolServer {
                url: url.trim_end_matches('/').to_string(),
            },
            None => SearchBackend::Serper {
                url: config.serper_url.clone(),
                api_key_name: config.serper_api_key_name.clone(),
            },
        };
        Self::new(backend, client, secret_cache)
    }

    /// Raw response body for one query
    async fn fetch(&self, query: &str) -> Result<Value, String> {
        let request = match &self.backend {
            SearchBackend::Serper { url, api_key_name } => {
                let key = self
                    .secret_cache
                    .get_secret(api_key_name)
                    .map_err(|e| e.to_string())?;
                self.client
                    .post(url)
                    .header("X-API-KEY", key.unsecure())
                    .json(&json!({ "q": query }))
            }
            SearchBackend::ToolServer { url } => self
                .client
                .post(format!("{}/search", url))
                .json(&json!({ "query": query, "provider": "google" })),
        };

        let response = request.send().await.map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {}", status));
        }
        response.json::<Value>().await.map_err(|e| e.to_string())
    }

    fn items_key(&self) -> &'static str {
        match self.backend {
            SearchBackend::Serper { .. } => "organic",
            SearchBackend::ToolServer { .. } => "items",
        }
    }
}

/// Render one successful query body as a JSON array line
fn render_items(query: &str, body: &Value, key: &str) -> String {
    let Some(items) = body.get(key).and_then(|v| v.as_array()) else {
        return format!(
            "Failed to get items for query {}. Returned result: {}",
            query, body
        );
    };

    let cleaned: Vec<Value> = items
        .iter()
        .cloned()
        .map(|mut item| {
            if let Some(obj) = item.as_object_mut() {
                obj.remove("error_message");
            }
            item
        })
        .collect();

    serde_json::to_string(&cleaned).unwrap_or_else(|_| "[]".to_string())
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search the web for information about a query using google search."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "The list of search query strings"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: ToolInput) -> Result<ToolOutput, ToolError> {
        let queries = input.param_str_list("query")?;

        let results = join_all(queries.iter().map(|q| self.fetch(q))).await;

        if results.iter().all(|r| r.is_err()) {
            tracing::warn!("All {} search queries failed", queries.len());
            return Err(ToolError::Failed(format!(
                "Failed to get items for queries {:?}. All queries failed.",
                queries
            )));
        }

        let key = self.items_key();
        let lines: Vec<String> = queries
            .iter()
            .zip(results)
            .map(|(query, result)| match result {
                Ok(body) => render_items(query, &body, key),
                Err(e) => {
                    tracing::debug!("Search query '{}' failed: {}", query, e);
                    format!("Failed to get items for query {}: {}", query, crate::secrets::scrub(&e))
                }
            })
            .collect();

        Ok(ToolOutput::text(lines.join("\n")))
    }
}
