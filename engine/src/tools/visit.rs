//! Page visit tool
//!
//! Reads a list of URLs and asks a summarizer model to extract what is
//! relevant to the caller's goal. Pages are read concurrently through the
//! Jina reader (`GET {jina_url}/{url}`); unreadable pages are listed in the
//! output and skipped. When a custom tool server is configured the whole
//! operation is delegated to its `POST /visit` endpoint.

use super::Tool;
use crate::agent::carry_over::fill_template;
use crate::config::ToolsConfig;
use crate::llm::{LLMProvider, Message};
use crate::secrets::SecretCache;
use async_trait::async_trait;
use futures::future::join_all;
use sdk::types::{ToolError, ToolInput, ToolOutput};
use serde_json::{json, Value};
use std::sync::Arc;

pub const SUMMARIZE_PROMPT: &str = "Please process the following webpage content and user goal to extract relevant
information:
## **Webpage Content**
{webpage_content}
## **User Goal**
{goal}
## **Task Guidelines**
1. **Content Scanning for Rationale**: Locate the specific sections/data directly
related to the user's goal within the webpage content
2. **Key Extraction for Evidence**: Identify and extract the most relevant
information from the content, output the full original context as far as possible
3. **Summary Output for Summary**: Organize into a concise paragraph with logical
flow, prioritizing clarity
**Final Output Format using JSON format has \"rational\", \"evidence\", \"summary\"
fields**
";

/// Where pages are read
#[derive(Debug, Clone)]
pub enum VisitBackend {
    /// Jina reader plus the local summarizer model
    Jina { url: String, api_key_name: String },
    /// Custom tool server, `POST {url}/visit`
    ToolServer { url: String },
}

pub struct VisitTool {
    backend: VisitBackend,
    client: reqwest::Client,
    secret_cache: Arc<SecretCache>,
    summarizer: Arc<dyn LLMProvider>,
}

fn url_list(urls: &[String]) -> String {
    format!("[{}]", urls.join(", "))
}

impl VisitTool {
    pub fn new(
        backend: VisitBackend,
        client: reqwest::Client,
        secret_cache: Arc<SecretCache>,
        summarizer: Arc<dyn LLMProvider>,
    ) -> Self {
        Self {
            backend,
            client,
            secret_cache,
            summarizer,
        }
    }

    pub fn from_config(
        config: &ToolsConfig,
        client: reqwest::Client,
        secret_cache: Arc<SecretCache>,
        summarizer: Arc<dyn LLMProvider>,
    ) -> Self {
        let backend = match &config.server_url {
            Some(url) => VisitBackend::ToolServer {
                url: url.trim_end_matches('/').to_string(),
            },
            None => VisitBackend::Jina {
                url: config.jina_url.trim_end_matches('/').to_string(),
                api_key_name: config.jina_api_key_name.clone(),
            },
        };
        Self::new(backend, client, secret_cache, summarizer)
    }

    async fn read_page(&self, reader: &str, api_key_name: &str, url: &str) -> Result<String, String> {
        let key = self
            .secret_cache
            .get_secret(api_key_name)
            .map_err(|e| e.to_string())?;

        let response = self
            .client
            .get(format!("{}/{}", reader, url))
            .header("Authorization", key.bearer())
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {}", status));
        }
        response.text().await.map_err(|e| e.to_string())
    }

    async fn visit_with_reader(
        &self,
        reader: &str,
        api_key_name: &str,
        urls: &[String],
        goal: &str,
    ) -> Result<String, ToolError> {
        let pages = join_all(urls.iter().map(|u| self.read_page(reader, api_key_name, u))).await;

        let mut contents = Vec::new();
        let mut failures = Vec::new();
        for (url, page) in urls.iter().zip(pages) {
            match page {
                Ok(text) => contents.push(text),
                Err(e) => {
                    tracing::debug!("Failed to read {}: {}", url, e);
                    failures.push(format!("{} ({})", url, crate::secrets::scrub(&e)));
                }
            }
        }

        if contents.is_empty() {
            return Err(ToolError::Failed(format!(
                "Failed to read any of the URLs {}: {}",
                url_list(urls),
                failures.join("; ")
            )));
        }

        let webpage_content = contents.join("\n");
        let prompt = fill_template(
            SUMMARIZE_PROMPT,
            &[("webpage_content", webpage_content.as_str()), ("goal", goal)],
        );
        let summary = self
            .summarizer
            .generate(&[Message::human(prompt)], &[])
            .await
            .map_err(|e| ToolError::Failed(format!("Failed to summarize pages: {}", e)))?;

        let mut document = format!(
            "The useful information in {} for user goal {} as follows: {}",
            url_list(urls),
            goal,
            summary.content
        );
        if !failures.is_empty() {
            document.push_str(&format!("\n\nCould not read: {}", failures.join("; ")));
        }
        Ok(document)
    }

    async fn visit_with_server(&self, server: &str, urls: &[String], goal: &str) -> Result<String, ToolError> {
        let response = self
            .client
            .post(format!("{}/visit", server))
            .json(&json!({ "urls": urls, "goal": goal, "style": "tongyi" }))
            .send()
            .await
            .map_err(|e| ToolError::Failed(format!("Visit request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::Failed(format!("Visit request failed: HTTP {}", status)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ToolError::Failed(format!("Invalid visit response: {}", e)))?;

        body.get("semanticDocument")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| ToolError::Failed("Visit response has no semanticDocument".to_string()))
    }
}

#[async_trait]
impl Tool for VisitTool {
    fn name(&self) -> &str {
        "visit"
    }

    fn description(&self) -> &str {
        "Visit multiple URLs and extract information based on a goal."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "List of URLs to visit"
                },
                "goal": {
                    "type": "string",
                    "description": "The goal or question to answer from the URLs"
                }
            },
            "required": ["url", "goal"]
        })
    }

    async fn execute(&self, input: ToolInput) -> Result<ToolOutput, ToolError> {
        let urls = input.param_str_list("url")?;
        let goal = input.param_str("goal")?;

        let document = match &self.backend {
            VisitBackend::Jina { url, api_key_name } => {
                self.visit_with_reader(url, api_key_name, &urls, &goal).await?
            }
            VisitBackend::ToolServer { url } => self.visit_with_server(url, &urls, &goal).await?,
        };

        Ok(ToolOutput::text(document))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_list() {
        assert_eq!(
            url_list(&["https://a.com".to_string(), "https://b.com".to_string()]),
            "[https://a.com, https://b.com]"
        );
    }

    #[test]
    fn test_prompt_placeholders() {
        let prompt = fill_template(SUMMARIZE_PROMPT, &[("webpage_content", "PAGE"), ("goal", "GOAL")]);
        assert!(prompt.contains("PAGE"));
        assert!(prompt.contains("GOAL"));
        assert!(!prompt.contains("{webpage_content}"));
    }

    #[test]
    fn test_prompt_keeps_page_braces() {
        let prompt = fill_template(
            SUMMARIZE_PROMPT,
            &[("webpage_content", "template uses {goal} here"), ("goal", "GOAL")],
        );
        assert!(prompt.contains("template uses {goal} here"));
        assert!(!prompt.contains("template uses GOAL here"));
    }
}
