//! Resilient model invocation
//!
//! Wraps a single "send the conversation, get the next assistant message"
//! call with:
//!
//! 1. Admission through the shared rate limiter (when one is configured)
//! 2. A per-call timeout
//! 3. Classification of the response text for inline tool-call markers
//! 4. Bounded retries with a fixed delay between attempts
//! 5. Immediate abort on context-length errors, which no retry can fix
//!
//! Every failed attempt leaves a diagnostic line. Diagnostics are returned to
//! the caller in both the success and the failure case; they are recorded in
//! the run's error trail and never drive control flow.

use crate::config::InvokerConfig;
use crate::llm::{LLMError, LLMProvider, Message, ToolCall, ToolSchema};
use crate::rate_limiter::RateLimiter;
use sdk::errors::EngineError;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// The model asked to stop via an inline marker instead of a structured call
pub const FINISH_MARKER: &str = "<tool_call>finish</tool_call>";

/// An inline tool call the backend failed to parse into a structured one
pub const TOOL_CALL_CLOSE: &str = "</tool_call>";

/// Name of the synthesized zero-argument tool call for [`FINISH_MARKER`]
pub const FINISH_TOOL: &str = "finish";

const MALFORMED_DIAGNOSTIC: &str = "Tool call not parsed correctly";

/// Retry policy for one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
        }
    }

    pub fn from_config(config: &InvokerConfig) -> Self {
        Self::new(
            config.retry_attempts,
            Duration::from_secs(config.retry_interval_secs),
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(10))
    }
}

/// Why an invocation produced no message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Every attempt failed with a retryable error or a malformed response
    Exhausted,
    /// The backend reported an error no retry can fix
    Fatal,
    Cancelled,
    /// Nothing to send; no attempt was made
    EmptyConversation,
}

/// Failed invocation with the diagnostics of every attempt
#[derive(Debug)]
pub struct InvocationFailure {
    pub kind: FailureKind,
    pub attempts: u32,
    pub diagnostics: Vec<String>,
    /// Typed error of the last failed attempt
    pub last_error: Option<EngineError>,
}

impl InvocationFailure {
    /// Error describing the failure for run outcomes
    pub fn into_error(self) -> EngineError {
        let last = match self.last_error {
            Some(EngineError::FatalInvocation(message)) if self.kind == FailureKind::Fatal => {
                return EngineError::FatalInvocation(message)
            }
            Some(error) => error.to_string(),
            None => self
                .diagnostics
                .last()
                .cloned()
                .unwrap_or_else(|| "no diagnostics".to_string()),
        };

        match self.kind {
            FailureKind::Exhausted => EngineError::RetriesExhausted {
                attempts: self.attempts,
                last_error: last,
            },
            FailureKind::Fatal => EngineError::FatalInvocation(last),
            FailureKind::Cancelled => EngineError::Cancelled,
            FailureKind::EmptyConversation => EngineError::InvalidState(
                "cannot invoke the model on an empty conversation".to_string(),
            ),
        }
    }
}

/// Successful invocation
#[derive(Debug, Clone)]
pub struct Invocation {
    pub message: Message,
    pub attempts: u32,
    /// Diagnostics from attempts that failed before the successful one
    pub diagnostics: Vec<String>,
}

/// Outcome of inspecting a response's text
enum Classification {
    Accept(Message),
    Malformed,
}

fn classify(mut response: Message) -> Classification {
    if response.content.contains(FINISH_MARKER) {
        response
            .tool_calls
            .push(ToolCall::anonymous(FINISH_TOOL, serde_json::json!({})));
        Classification::Accept(response)
    } else if response.content.contains(TOOL_CALL_CLOSE) {
        Classification::Malformed
    } else {
        Classification::Accept(response)
    }
}

/// Retrying, rate-limited front end to a model backend
pub struct ResilientInvoker {
    provider: Arc<dyn LLMProvider>,
    tools: Vec<ToolSchema>,
    limiter: Option<Arc<RateLimiter>>,
    policy: RetryPolicy,
    call_timeout: Duration,
}

impl ResilientInvoker {
    pub fn new(provider: Arc<dyn LLMProvider>, policy: RetryPolicy) -> Self {
        Self {
            provider,
            tools: Vec::new(),
            limiter: None,
            policy,
            call_timeout: Duration::from_secs(300),
        }
    }

    /// Tool schemas sent with every request
    pub fn with_tools(mut self, tools: Vec<ToolSchema>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Invoke the model on `conversation`
    pub async fn invoke(
        &self,
        conversation: &[Message],
        cancel: &CancellationToken,
    ) -> Result<Invocation, InvocationFailure> {
        if conversation.is_empty() {
            return Err(InvocationFailure {
                kind: FailureKind::EmptyConversation,
                attempts: 0,
                diagnostics: Vec::new(),
                last_error: None,
            });
        }

        let max = self.policy.max_attempts;
        let mut diagnostics = Vec::new();
        let mut last_error = None;

        for attempt in 1..=max {
            let failure = |kind, diagnostics, last_error| InvocationFailure {
                kind,
                attempts: attempt,
                diagnostics,
                last_error,
            };

            if let Some(limiter) = &self.limiter {
                if limiter.admit(cancel).await.is_err() {
                    return Err(failure(FailureKind::Cancelled, diagnostics, last_error));
                }
            }

            let result = tokio::select! {
                res = tokio::time::timeout(
                    self.call_timeout,
                    self.provider.generate(conversation, &self.tools),
                ) => res.unwrap_or(Err(LLMError::Timeout)),
                _ = cancel.cancelled() => {
                    return Err(failure(FailureKind::Cancelled, diagnostics, last_error));
                }
            };

            match result {
                Ok(response) => match classify(response) {
                    Classification::Accept(message) => {
                        debug!(
                            "Model invocation succeeded on attempt {}/{} ({} chars)",
                            attempt,
                            max,
                            message.content.len()
                        );
                        return Ok(Invocation {
                            message,
                            attempts: attempt,
                            diagnostics,
                        });
                    }
                    Classification::Malformed => {
                        warn!("Tool call not parsed correctly on attempt {}/{}", attempt, max);
                        diagnostics.push(MALFORMED_DIAGNOSTIC.to_string());
                        last_error = Some(EngineError::MalformedResponse(
                            MALFORMED_DIAGNOSTIC.to_string(),
                        ));
                    }
                },
                Err(e) => {
                    let message = crate::secrets::scrub(&e.to_string());
                    error!("LLM invocation failed on attempt {}/{}: {}", attempt, max, message);
                    diagnostics.push(format!(
                        "LLM invocation failed on attempt [{}/{}] : {}",
                        attempt, max, message
                    ));

                    if e.is_context_length() {
                        let fatal = EngineError::FatalInvocation(message);
                        return Err(failure(FailureKind::Fatal, diagnostics, Some(fatal)));
                    }
                    last_error = Some(EngineError::TransientInvocation(message));

                    if attempt < max {
                        tokio::select! {
                            _ = tokio::time::sleep(self.policy.interval) => {}
                            _ = cancel.cancelled() => {
                                return Err(failure(FailureKind::Cancelled, diagnostics, last_error));
                            }
                        }
                    }
                }
            }
        }

        Err(InvocationFailure {
            kind: FailureKind::Exhausted,
            attempts: max,
            diagnostics,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_finish_marker() {
        let response = Message::assistant("done <tool_call>finish</tool_call>");
        match classify(response) {
            Classification::Accept(message) => {
                assert_eq!(message.tool_calls.len(), 1);
                assert_eq!(message.tool_calls[0].name, FINISH_TOOL);
                assert_eq!(message.tool_calls[0].id, None);
                assert_eq!(message.tool_calls[0].arguments, serde_json::json!({}));
            }
            Classification::Malformed => panic!("finish marker must be accepted"),
        }
    }

    #[test]
    fn test_classify_unparsed_tool_call() {
        let response = Message::assistant("<tool_call>{\"name\": \"search\"</tool_call>");
        assert!(matches!(classify(response), Classification::Malformed));
    }

    #[test]
    fn test_classify_plain_answer() {
        match classify(Message::assistant("Paris.")) {
            Classification::Accept(message) => assert!(!message.has_tool_calls()),
            Classification::Malformed => panic!("plain answer must be accepted"),
        }
    }

    #[test]
    fn test_failure_into_error() {
        let failure = InvocationFailure {
            kind: FailureKind::Exhausted,
            attempts: 5,
            diagnostics: vec!["a".to_string(), "b".to_string()],
            last_error: None,
        };
        assert!(matches!(
            failure.into_error(),
            EngineError::RetriesExhausted { attempts: 5, ref last_error } if last_error == "b"
        ));

        let failure = InvocationFailure {
            kind: FailureKind::Exhausted,
            attempts: 2,
            diagnostics: vec!["a".to_string(), "b".to_string()],
            last_error: Some(EngineError::MalformedResponse("bad call".to_string())),
        };
        assert!(matches!(
            failure.into_error(),
            EngineError::RetriesExhausted { ref last_error, .. }
                if last_error == "Malformed model response: bad call"
        ));

        let failure = InvocationFailure {
            kind: FailureKind::Fatal,
            attempts: 1,
            diagnostics: vec!["LLM invocation failed on attempt [1/5] : too long".to_string()],
            last_error: Some(EngineError::FatalInvocation("too long".to_string())),
        };
        assert!(matches!(
            failure.into_error(),
            EngineError::FatalInvocation(ref message) if message == "too long"
        ));
    }

    #[test]
    fn test_policy_clamps_attempts() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }
}
