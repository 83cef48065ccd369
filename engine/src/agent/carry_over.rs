//! Conversation seeding between cycles
//!
//! A new cycle does not inherit the previous transcript. It starts from the
//! system prompt, the question, and the most recent cycle summary with any
//! reasoning preamble (everything up to the last `</think>`) removed.

use crate::llm::Message;
use regex::{Captures, Regex};
use sdk::errors::EngineError;
use std::sync::OnceLock;

/// Appended to the system prompt of every cycle after the first
pub const CARRY_OVER_NOTE: &str = "\nAlso there are some summary for the previous attempts you have made, you can use them to help you answer the question.";

const REASONING_END: &str = "</think>";

/// Text after the last `</think>` marker, or the whole text when there is none
pub fn strip_reasoning(text: &str) -> &str {
    match text.rfind(REASONING_END) {
        Some(pos) => &text[pos + REASONING_END.len()..],
        None => text,
    }
}

static PLACEHOLDER: OnceLock<Option<Regex>> = OnceLock::new();

/// Substitute `{key}` placeholders in a prompt template
///
/// Substitution is a single pass over the template: placeholders inside a
/// substituted value are left as they are. Unknown keys stay untouched.
pub fn fill_template(template: &str, vars: &[(&str, &str)]) -> String {
    let Some(placeholder) = PLACEHOLDER.get_or_init(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").ok())
    else {
        return template.to_string();
    };

    placeholder
        .replace_all(template, |caps: &Captures<'_>| {
            vars.iter()
                .find(|(key, _)| *key == &caps[1])
                .map_or_else(|| caps[0].to_string(), |(_, value)| value.to_string())
        })
        .into_owned()
}

/// Builds the opening conversation of cycles after the first
#[derive(Debug, Clone)]
pub struct CarryOverComposer {
    system_prompt: String,
    continue_prompt: String,
}

impl CarryOverComposer {
    pub fn new(system_prompt: impl Into<String>, continue_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            continue_prompt: continue_prompt.into(),
        }
    }

    /// Compose `[system, human(question), human(continuation)]`
    ///
    /// Only the most recent summary is injected.
    ///
    /// # Errors
    /// `EngineError::InvalidState` when there is no prior summary
    pub fn compose(&self, question: &str, summaries: &[Message]) -> Result<Vec<Message>, EngineError> {
        let last = summaries.last().ok_or_else(|| {
            EngineError::InvalidState("carry-over requires at least one cycle summary".to_string())
        })?;

        let last_summary = strip_reasoning(&last.content);

        Ok(vec![
            Message::system(format!("{}{}", self.system_prompt, CARRY_OVER_NOTE)),
            Message::human(question),
            Message::human(fill_template(
                &self.continue_prompt,
                &[("last_summary", last_summary)],
            )),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;

    #[test]
    fn test_strip_reasoning() {
        assert_eq!(strip_reasoning("A</think>B"), "B");
        assert_eq!(strip_reasoning("x</think>y</think>z"), "z");
        assert_eq!(strip_reasoning("no marker"), "no marker");
        assert_eq!(strip_reasoning("trailing</think>"), "");
    }

    #[test]
    fn test_fill_template() {
        assert_eq!(
            fill_template("Prior: {last_summary}. Again: {last_summary}", &[("last_summary", "S")]),
            "Prior: S. Again: S"
        );
        assert_eq!(fill_template("Q: {input}", &[("other", "x")]), "Q: {input}");
    }

    #[test]
    fn test_fill_template_leaves_substituted_text_alone() {
        let filled = fill_template(
            "Page: {webpage_content}\nGoal: {goal}",
            &[("webpage_content", "literal {goal} in the page"), ("goal", "find the capital")],
        );
        assert_eq!(filled, "Page: literal {goal} in the page\nGoal: find the capital");
    }

    #[test]
    fn test_compose_uses_latest_summary_only() {
        let composer = CarryOverComposer::new("SYS", "Continue from: {last_summary}");
        let summaries = vec![Message::assistant("C"), Message::assistant("A</think>B")];

        let messages = composer.compose("Q?", &summaries).unwrap();

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, format!("SYS{}", CARRY_OVER_NOTE));
        assert_eq!(messages[1].role, Role::Human);
        assert_eq!(messages[1].content, "Q?");
        assert_eq!(messages[2].content, "Continue from: B");
    }

    #[test]
    fn test_compose_without_summary_fails() {
        let composer = CarryOverComposer::new("SYS", "{last_summary}");
        assert!(matches!(
            composer.compose("Q?", &[]),
            Err(EngineError::InvalidState(_))
        ));
    }
}
