//! Shared fixtures for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use recap_engine::agent::{
    CycleController, ResearchSettings, ResilientInvoker, RetryPolicy, ToolRunner,
};
use recap_engine::llm::{LLMError, LLMProvider, Message, ToolSchema};
use recap_engine::tools::{Tool, ToolRegistry};
use sdk::types::{ToolError, ToolInput, ToolOutput};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Script = dyn Fn(usize, &[Message]) -> Result<Message, LLMError> + Send + Sync;

/// Model backend answering from a closure of (call index, conversation)
pub struct ScriptedProvider {
    script: Box<Script>,
    calls: AtomicUsize,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedProvider {
    pub fn new<F>(script: F) -> Arc<Self>
    where
        F: Fn(usize, &[Message]) -> Result<Message, LLMError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Always answers with the same text
    pub fn answering(text: &'static str) -> Arc<Self> {
        Self::new(move |_, _| Ok(Message::assistant(text)))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn generate(
        &self,
        messages: &[Message],
        _tools: &[ToolSchema],
    ) -> recap_engine::llm::Result<Message> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(messages.to_vec());
        (self.script)(index, messages)
    }
}

/// Tool returning its `text` argument
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the text argument"
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"text": {"type": "string"}}, "required": ["text"]})
    }

    async fn execute(&self, input: ToolInput) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput::text(input.param_str("text")?))
    }
}

pub fn settings(max_cycles: usize, max_turns: usize) -> ResearchSettings {
    ResearchSettings {
        system_prompt: "You are a research assistant.".to_string(),
        continue_prompt: "Continue from this summary:\n{last_summary}".to_string(),
        summary_prompt: "Summarize what you found about: {input}".to_string(),
        max_cycles,
        max_turns,
        max_context_length: None,
        max_steps: 10_000,
    }
}

pub fn no_wait_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Duration::ZERO)
}

pub fn controller(
    provider: Arc<ScriptedProvider>,
    settings: ResearchSettings,
) -> CycleController {
    let mut registry = ToolRegistry::empty();
    registry.register(Arc::new(EchoTool));
    let registry = Arc::new(registry);

    let provider: Arc<dyn LLMProvider> = provider;
    let invoker = ResilientInvoker::new(provider, no_wait_policy(3));
    CycleController::new(invoker, ToolRunner::new(registry), settings)
}
