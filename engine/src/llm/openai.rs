//! OpenAI-compatible chat completions backend
//!
//! Works against any server that speaks the `/chat/completions` protocol
//! with function tools (OpenAI, vLLM, SGLang, OpenRouter, ...).

use super::{
    mentions_context_length, LLMError, LLMProvider, Message, Role, ToolCall, ToolSchema, Usage,
};
use crate::config::ModelConfig;
use crate::secrets::SecretCache;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

pub struct OpenAIProvider {
    config: ModelConfig,
    secret_cache: Arc<SecretCache>,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: ModelConfig, secret_cache: Arc<SecretCache>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            config,
            secret_cache,
            client,
        }
    }

    /// Request body for one completion
    fn build_payload(&self, messages: &[Message], tools: &[ToolSchema]) -> Value {
        let mut payload = json!({
            "model": self.config.model_name,
            "messages": messages.iter().map(to_wire_message).collect::<Vec<_>>(),
        });

        if let Some(temperature) = self.config.temperature {
            payload["temperature"] = json!(temperature);
        }
        if let Some(top_p) = self.config.top_p {
            payload["top_p"] = json!(top_p);
        }
        if !tools.is_empty() {
            payload["tools"] = tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        }
                    })
                })
                .collect();
        }

        if let Value::Object(body) = &mut payload {
            for (key, value) in &self.config.extra_body {
                body.insert(key.clone(), value.clone());
            }
        }

        payload
    }
}

fn to_wire_message(msg: &Message) -> Value {
    let mut wire = json!({
        "role": msg.role.to_string(),
        "content": msg.content,
    });

    // Calls synthesized by the engine have no backend id and stay local
    let calls: Vec<Value> = msg
        .tool_calls
        .iter()
        .filter_map(|call| {
            let id = call.id.as_ref()?;
            let arguments = match &call.arguments {
                Value::String(raw) => raw.clone(),
                other => other.to_string(),
            };
            Some(json!({
                "id": id,
                "type": "function",
                "function": { "name": call.name, "arguments": arguments },
            }))
        })
        .collect();
    if msg.role == Role::Assistant && !calls.is_empty() {
        wire["tool_calls"] = Value::Array(calls);
    }

    if msg.role == Role::Tool {
        if let Some(id) = &msg.tool_call_id {
            wire["tool_call_id"] = json!(id);
        }
    }

    wire
}

/// Parse `choices[0].message` and `usage` of a completion response
fn parse_completion(data: &Value) -> super::Result<Message> {
    let message = data
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|choice| choice.get("message"))
        .ok_or_else(|| LLMError::ParseError("No message in response".to_string()))?;

    let content = message
        .get("content")
        .and_then(|c| c.as_str())
        .unwrap_or_default();

    let tool_calls = message
        .get("tool_calls")
        .and_then(|t| t.as_array())
        .map(|calls| calls.iter().filter_map(parse_tool_call).collect())
        .unwrap_or_default();

    let mut response = Message::assistant(content).with_tool_calls(tool_calls);

    if let Some(usage) = data.get("usage") {
        let field = |name: &str| usage.get(name).and_then(|v| v.as_u64()).unwrap_or(0);
        response = response.with_usage(Usage {
            prompt_tokens: field("prompt_tokens"),
            completion_tokens: field("completion_tokens"),
            total_tokens: field("total_tokens"),
        });
    }

    Ok(response)
}

fn parse_tool_call(raw: &Value) -> Option<ToolCall> {
    let function = raw.get("function")?;
    let name = function.get("name")?.as_str()?;

    // Arguments arrive as a JSON-encoded string; keep the raw text when it
    // does not decode so the tool can report the problem to the model.
    let arguments = match function.get("arguments") {
        Some(Value::String(s)) => serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone())),
        Some(other) => other.clone(),
        None => Value::Null,
    };

    Some(ToolCall {
        id: raw.get("id").and_then(|v| v.as_str()).map(String::from),
        name: name.to_string(),
        arguments,
    })
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.config.model_name
    }

    async fn generate(&self, messages: &[Message], tools: &[ToolSchema]) -> super::Result<Message> {
        let api_key = self
            .secret_cache
            .get_secret(&self.config.api_key_name)
            .map_err(|e| LLMError::AuthenticationFailed(e.to_string()))?;

        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let payload = self.build_payload(messages, tools);

        let response = self
            .client
            .post(&url)
            .header("Authorization", api_key.bearer())
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LLMError::Timeout
                } else if e.is_connect() {
                    LLMError::ProviderUnavailable(e.to_string())
                } else {
                    LLMError::NetworkError(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();

            return Err(match status.as_u16() {
                400 | 413 if mentions_context_length(&text) => {
                    LLMError::ContextLengthExceeded(text)
                }
                401 | 403 => LLMError::AuthenticationFailed(text),
                429 => LLMError::RateLimitExceeded,
                code if code >= 500 => {
                    LLMError::ProviderUnavailable(format!("HTTP {}: {}", code, text))
                }
                _ => LLMError::InvalidRequest(text),
            });
        }

        let data: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                LLMError::Timeout
            } else {
                LLMError::ParseError(e.to_string())
            }
        })?;

        let message = parse_completion(&data)?;
        tracing::debug!(
            "Completion from {}: {} chars, {} tool calls, {} tokens",
            self.config.model_name,
            message.content.len(),
            message.tool_calls.len(),
            message.total_tokens()
        );
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::SecretManager;

    fn provider(config: ModelConfig) -> OpenAIProvider {
        let cache = Arc::new(SecretCache::new(Arc::new(SecretManager::new("recap-test"))));
        OpenAIProvider::new(config, cache)
    }

    #[test]
    fn test_payload_merges_extra_body_and_tools() {
        let mut config = ModelConfig::default();
        config.temperature = Some(0.6);
        config
            .extra_body
            .insert("chat_template_kwargs".to_string(), json!({"thinking": true}));

        let schema = ToolSchema {
            name: "search".to_string(),
            description: "web search".to_string(),
            parameters: json!({"type": "object"}),
        };
        let payload = provider(config).build_payload(&[Message::human("q")], &[schema]);

        assert_eq!(payload["messages"][0]["role"], "user");
        assert_eq!(payload["tools"][0]["function"]["name"], "search");
        assert_eq!(payload["chat_template_kwargs"]["thinking"], true);
        assert!(payload.get("top_p").is_none());
    }

    #[test]
    fn test_payload_omits_tools_when_none_bound() {
        let payload = provider(ModelConfig::default()).build_payload(&[Message::human("q")], &[]);
        assert!(payload.get("tools").is_none());
    }

    #[test]
    fn test_wire_tool_messages() {
        let assistant = Message::assistant("").with_tool_calls(vec![ToolCall::new(
            "call_1",
            "search",
            json!({"query": ["x"]}),
        )]);
        let wire = to_wire_message(&assistant);
        assert_eq!(wire["tool_calls"][0]["function"]["arguments"], r#"{"query":["x"]}"#);

        let result = Message::tool_result("[]", Some("call_1".to_string()), "search");
        assert_eq!(to_wire_message(&result)["tool_call_id"], "call_1");
    }

    #[test]
    fn test_wire_drops_synthesized_calls() {
        let finish = Message::assistant("Paris. <tool_call>finish</tool_call>")
            .with_tool_calls(vec![ToolCall::anonymous("finish", json!({}))]);
        let wire = to_wire_message(&finish);
        assert!(wire.get("tool_calls").is_none());
        assert_eq!(wire["content"], "Paris. <tool_call>finish</tool_call>");

        let mixed = Message::assistant("").with_tool_calls(vec![
            ToolCall::new("call_2", "search", json!({"query": ["y"]})),
            ToolCall::anonymous("finish", json!({})),
        ]);
        let wire = to_wire_message(&mixed);
        assert_eq!(wire["tool_calls"].as_array().map(Vec::len), Some(1));
        assert_eq!(wire["tool_calls"][0]["id"], "call_2");
    }

    #[test]
    fn test_parse_completion_with_tool_calls_and_usage() {
        let data = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "visit", "arguments": "{\"url\":[\"https://a.b\"],\"goal\":\"g\"}"}
                    }]
                }
            }],
            "usage": {"prompt_tokens": 100, "completion_tokens": 20, "total_tokens": 120}
        });

        let message = parse_completion(&data).unwrap();
        assert_eq!(message.content, "");
        assert_eq!(message.tool_calls.len(), 1);
        assert_eq!(message.tool_calls[0].id.as_deref(), Some("call_9"));
        assert_eq!(message.tool_calls[0].arguments["goal"], "g");
        assert_eq!(message.total_tokens(), 120);
    }

    #[test]
    fn test_parse_completion_keeps_undecodable_arguments() {
        let data = json!({
            "choices": [{"message": {"content": "", "tool_calls": [{
                "id": "c", "function": {"name": "search", "arguments": "{broken"}
            }]}}]
        });
        let message = parse_completion(&data).unwrap();
        assert_eq!(message.tool_calls[0].arguments, json!("{broken"));
        assert_eq!(message.usage, None);
    }

    #[test]
    fn test_parse_completion_without_choices() {
        assert!(matches!(
            parse_completion(&json!({"choices": []})),
            Err(LLMError::ParseError(_))
        ));
    }
}
