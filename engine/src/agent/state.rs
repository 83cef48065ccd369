//! Run state and patch merging
//!
//! Every state of the controller reads a `&RunState` and returns a
//! `RunStatePatch`. `RunState::apply` is the single place where patches are
//! merged, with a fixed rule per field:
//!
//! | field             | rule     |
//! |-------------------|----------|
//! | `messages`        | replace  |
//! | `tool_input`      | replace  |
//! | `cycle_histories` | append   |
//! | `rollouts`        | append   |
//! | `errors`          | append   |
//! | `output`          | set once |

use crate::llm::Message;
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};

/// Snapshot of one cycle's conversation, taken when the cycle ends
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rollout {
    /// 1-based cycle number
    pub cycle: usize,
    pub messages: Vec<Message>,
}

/// Mutable state of one research run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunState {
    pub question: String,

    /// Conversation of the current cycle
    pub messages: Vec<Message>,

    /// Assistant message being executed, or tool results awaiting merge
    pub tool_input: Vec<Message>,

    /// One summary message per finished cycle
    pub cycle_histories: Vec<Message>,

    /// Process details: per-cycle conversation snapshots
    pub rollouts: Vec<Rollout>,

    /// Diagnostics, never used for control flow
    pub errors: Vec<String>,

    pub output: Option<String>,
}

impl RunState {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Default::default()
        }
    }

    /// Merge a patch into the state
    ///
    /// # Errors
    /// `EngineError::InvalidState` when the patch sets `output` a second time
    pub fn apply(&mut self, patch: RunStatePatch) -> Result<(), EngineError> {
        if patch.output.is_some() && self.output.is_some() {
            return Err(EngineError::InvalidState(
                "output is already set".to_string(),
            ));
        }

        if let Some(messages) = patch.messages {
            self.messages = messages;
        }
        if let Some(tool_input) = patch.tool_input {
            self.tool_input = tool_input;
        }
        self.cycle_histories.extend(patch.cycle_histories);
        self.rollouts.extend(patch.rollouts);
        self.errors.extend(patch.errors);
        if patch.output.is_some() {
            self.output = patch.output;
        }
        Ok(())
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn cycles_completed(&self) -> usize {
        self.cycle_histories.len()
    }
}

/// Partial update produced by one controller state
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunStatePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<Vec<Message>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cycle_histories: Vec<Message>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rollouts: Vec<Rollout>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl RunStatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = Some(messages);
        self
    }

    pub fn with_tool_input(mut self, tool_input: Vec<Message>) -> Self {
        self.tool_input = Some(tool_input);
        self
    }

    pub fn push_history(mut self, summary: Message) -> Self {
        self.cycle_histories.push(summary);
        self
    }

    pub fn push_rollout(mut self, rollout: Rollout) -> Self {
        self.rollouts.push(rollout);
        self
    }

    pub fn with_errors(mut self, errors: impl IntoIterator<Item = String>) -> Self {
        self.errors.extend(errors);
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_fields() {
        let mut state = RunState::new("q");
        state
            .apply(RunStatePatch::new().with_messages(vec![Message::human("a")]))
            .unwrap();
        state
            .apply(RunStatePatch::new().with_messages(vec![Message::human("b")]))
            .unwrap();

        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].content, "b");
    }

    #[test]
    fn test_append_fields() {
        let mut state = RunState::new("q");
        state
            .apply(
                RunStatePatch::new()
                    .push_history(Message::assistant("s1"))
                    .with_errors(vec!["e1".to_string()]),
            )
            .unwrap();
        state
            .apply(
                RunStatePatch::new()
                    .push_history(Message::assistant("s2"))
                    .with_errors(vec!["e2".to_string()]),
            )
            .unwrap();

        assert_eq!(state.cycles_completed(), 2);
        assert_eq!(state.errors, vec!["e1", "e2"]);
    }

    #[test]
    fn test_untouched_fields_survive_empty_patch() {
        let mut state = RunState::new("q");
        state.messages = vec![Message::system("s"), Message::human("q")];
        state.tool_input = vec![Message::assistant("x")];

        state.apply(RunStatePatch::new()).unwrap();

        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.tool_input.len(), 1);
    }

    #[test]
    fn test_output_is_set_once() {
        let mut state = RunState::new("q");
        state.apply(RunStatePatch::new().with_output("first")).unwrap();

        let result = state.apply(RunStatePatch::new().with_output("second"));
        assert!(matches!(result, Err(EngineError::InvalidState(_))));
        assert_eq!(state.output.as_deref(), Some("first"));
    }

    #[test]
    fn test_empty_patch() {
        assert!(RunStatePatch::new().is_empty());
        assert!(!RunStatePatch::new().with_tool_input(vec![]).is_empty());
    }
}
