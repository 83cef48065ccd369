//! Cycle Controller
//!
//! State machine driving one research run:
//!
//! ```text
//! init -> start_cycle -> invoke -> decide -+-> tools_prep -> tools -> tools_merge -> invoke
//!                ^                         |
//!                |                         +-> end_cycle -> cycle_check -+-> final
//!                +-------------------------------------------------------+
//! ```
//!
//! Each state reads the current `RunState` and returns a `RunStatePatch`;
//! the controller applies it, publishes a `RunEvent` when a listener is
//! attached, and moves to the next state.
//!
//! # Budgets
//!
//! - `max_turns`: tool results allowed in one cycle before a summary is forced
//! - `max_context_length`: token budget of one cycle, read from the latest
//!   message's usage
//! - `max_cycles`: summaries produced before the run ends
//! - `max_steps`: state transitions allowed per run
//!
//! A model invocation that fails (retries exhausted, fatal error or
//! cancellation) ends the run in the `aborted` state with no output.

use super::carry_over::{fill_template, CarryOverComposer};
use super::invoker::{InvocationFailure, ResilientInvoker, FINISH_TOOL};
use super::state::{Rollout, RunState, RunStatePatch};
use super::tool_runner::ToolRunner;
use crate::config::Config;
use crate::llm::Message;
use sdk::errors::EngineError;
use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Loop settings for one run
#[derive(Debug, Clone)]
pub struct ResearchSettings {
    pub system_prompt: String,
    pub continue_prompt: String,
    pub summary_prompt: String,
    pub max_cycles: usize,
    pub max_turns: usize,
    pub max_context_length: Option<u64>,
    pub max_steps: usize,
}

impl ResearchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            system_prompt: config.research.system_prompt.clone(),
            continue_prompt: config.research.continue_prompt.clone(),
            summary_prompt: config.research.summary_prompt.clone(),
            max_cycles: config.research.max_cycles,
            max_turns: config.research.max_turns,
            max_context_length: config.model.max_context_length,
            max_steps: config.research.max_steps,
        }
    }
}

/// Controller states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Init,
    StartCycle,
    Invoke,
    Decide,
    ToolsPrep,
    Tools,
    ToolsMerge,
    EndCycle,
    CycleCheck,
    Final,
    Aborted,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Init => "init",
            Step::StartCycle => "start_cycle",
            Step::Invoke => "invoke",
            Step::Decide => "decide",
            Step::ToolsPrep => "tools_prep",
            Step::Tools => "tools",
            Step::ToolsMerge => "tools_merge",
            Step::EndCycle => "end_cycle",
            Step::CycleCheck => "cycle_check",
            Step::Final => "final",
            Step::Aborted => "aborted",
        };
        write!(f, "{}", name)
    }
}

/// Routing after a model turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Tools,
    EndCycle,
}

/// Route the latest model turn
///
/// Budgets are checked first: a cycle that has used more than `max_turns`
/// tool results, or whose latest message reports more than
/// `max_context_length` total tokens, ends regardless of pending tool calls.
/// A `finish` call ends the cycle. Otherwise the cycle continues with tools
/// when the latest message requests any.
pub fn decide(messages: &[Message], max_turns: usize, max_context_length: Option<u64>) -> Decision {
    let Some(last) = messages.last() else {
        return Decision::EndCycle;
    };

    let tool_results = messages.iter().filter(|m| m.is_tool_result()).count();
    let over_context = max_context_length.is_some_and(|budget| last.total_tokens() > budget);

    if over_context || tool_results > max_turns {
        return Decision::EndCycle;
    }

    if last.tool_calls.iter().any(|call| call.name == FINISH_TOOL) {
        debug!("Model signalled it is finished");
        return Decision::EndCycle;
    }

    if last.has_tool_calls() {
        Decision::Tools
    } else {
        Decision::EndCycle
    }
}

/// One applied transition, published to streaming listeners
#[derive(Debug, Clone, Serialize)]
pub struct RunEvent {
    pub step: Step,
    /// 1-based cycle the step ran in
    pub cycle: usize,
    pub patch: RunStatePatch,
}

/// How a run ended
#[derive(Debug)]
pub enum RunOutcome {
    Completed,
    Aborted(EngineError),
}

/// Final state of a run
#[derive(Debug)]
pub struct RunReport {
    pub state: RunState,
    pub outcome: RunOutcome,
    pub steps: usize,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RunOutcome::Completed) && self.state.output.is_some()
    }

    pub fn output(&self) -> Option<&str> {
        self.state.output.as_deref()
    }
}

enum Transition {
    Next(Step),
    Done,
    Abort(EngineError),
}

pub struct CycleController {
    invoker: ResilientInvoker,
    tools: ToolRunner,
    composer: CarryOverComposer,
    settings: ResearchSettings,
}

impl CycleController {
    /// `max_cycles` and `max_steps` are raised to at least 1
    pub fn new(invoker: ResilientInvoker, tools: ToolRunner, mut settings: ResearchSettings) -> Self {
        settings.max_cycles = settings.max_cycles.max(1);
        settings.max_steps = settings.max_steps.max(1);
        let composer = CarryOverComposer::new(
            settings.system_prompt.clone(),
            settings.continue_prompt.clone(),
        );
        Self {
            invoker,
            tools,
            composer,
            settings,
        }
    }

    pub fn settings(&self) -> &ResearchSettings {
        &self.settings
    }

    pub fn provider_name(&self) -> &str {
        self.invoker.provider_name()
    }

    /// Run to completion and return the final state
    ///
    /// # Errors
    /// `EngineError::MissingInput` for an empty question, before any model
    /// call. Invocation failures are reported through `RunOutcome::Aborted`.
    pub async fn run(&self, question: &str, cancel: &CancellationToken) -> Result<RunReport, EngineError> {
        self.run_streaming(question, cancel, None).await
    }

    /// Run to completion, publishing every applied transition to `events`
    pub async fn run_streaming(
        &self,
        question: &str,
        cancel: &CancellationToken,
        events: Option<mpsc::Sender<RunEvent>>,
    ) -> Result<RunReport, EngineError> {
        if question.trim().is_empty() {
            return Err(EngineError::MissingInput("question is required".to_string()));
        }

        let mut state = RunState::new(question);
        let mut step = Step::Init;
        let mut steps = 0usize;

        let outcome = loop {
            if steps >= self.settings.max_steps {
                warn!("Run exceeded step limit of {}", self.settings.max_steps);
                break RunOutcome::Aborted(EngineError::StepLimitExceeded(self.settings.max_steps));
            }
            if cancel.is_cancelled() {
                break RunOutcome::Aborted(EngineError::Cancelled);
            }
            steps += 1;

            let cycle = state.cycles_completed() + 1;
            debug!("Run step {} ({}) in cycle {}", steps, step, cycle);

            let (patch, transition) = self.execute(step, &state, cancel).await?;
            state.apply(patch.clone())?;

            if let Some(tx) = &events {
                if tx.send(RunEvent { step, cycle, patch }).await.is_err() {
                    debug!("Run event listener dropped");
                }
            }

            match transition {
                Transition::Next(next) => step = next,
                Transition::Done => break RunOutcome::Completed,
                Transition::Abort(reason) => {
                    warn!("Run aborted in {}: {}", step, reason);
                    break RunOutcome::Aborted(reason);
                }
            }
        };

        if let RunOutcome::Aborted(reason) = &outcome {
            if let Some(tx) = &events {
                let event = RunEvent {
                    step: Step::Aborted,
                    cycle: state.cycles_completed() + 1,
                    patch: RunStatePatch::new(),
                };
                if tx.send(event).await.is_err() {
                    debug!("Run event listener dropped before the abort event");
                }
            }
            debug!("Run ended without output: {}", reason);
        }

        Ok(RunReport {
            state,
            outcome,
            steps,
        })
    }

    async fn execute(
        &self,
        step: Step,
        state: &RunState,
        cancel: &CancellationToken,
    ) -> Result<(RunStatePatch, Transition), EngineError> {
        let result = match step {
            Step::Init => (self.init(state), Transition::Next(Step::StartCycle)),
            Step::StartCycle => (self.start_cycle(state)?, Transition::Next(Step::Invoke)),
            Step::Invoke => self.invoke(state, cancel).await,
            Step::Decide => {
                let next = match decide(
                    &state.messages,
                    self.settings.max_turns,
                    self.settings.max_context_length,
                ) {
                    Decision::Tools => Step::ToolsPrep,
                    Decision::EndCycle => Step::EndCycle,
                };
                (RunStatePatch::new(), Transition::Next(next))
            }
            Step::ToolsPrep => {
                let last = state.last_message().cloned().into_iter().collect();
                (
                    RunStatePatch::new().with_tool_input(last),
                    Transition::Next(Step::Tools),
                )
            }
            Step::Tools => {
                let results = self.tools.run(&state.tool_input, cancel).await;
                (
                    RunStatePatch::new().with_tool_input(results),
                    Transition::Next(Step::ToolsMerge),
                )
            }
            Step::ToolsMerge => (Self::merge_tool_output(state), Transition::Next(Step::Invoke)),
            Step::EndCycle => self.end_cycle(state, cancel).await,
            Step::CycleCheck => {
                let next = if state.cycles_completed() >= self.settings.max_cycles {
                    Step::Final
                } else {
                    Step::StartCycle
                };
                (RunStatePatch::new(), Transition::Next(next))
            }
            Step::Final => {
                let output = state
                    .last_message()
                    .map(|m| m.content.clone())
                    .unwrap_or_default();
                info!(
                    "Run finished after {} cycles ({} chars of output)",
                    state.cycles_completed(),
                    output.len()
                );
                (RunStatePatch::new().with_output(output), Transition::Done)
            }
            Step::Aborted => {
                return Err(EngineError::InvalidState(
                    "aborted is a terminal state".to_string(),
                ))
            }
        };
        Ok(result)
    }

    fn init(&self, state: &RunState) -> RunStatePatch {
        let mut patch = RunStatePatch::new();
        if state.messages.is_empty() {
            patch = patch.with_messages(vec![
                Message::system(self.settings.system_prompt.clone()),
                Message::human(state.question.clone()),
            ]);
        }
        patch
    }

    fn start_cycle(&self, state: &RunState) -> Result<RunStatePatch, EngineError> {
        if state.cycle_histories.is_empty() {
            info!("Starting cycle 1");
            return Ok(RunStatePatch::new());
        }

        info!("Starting cycle {}", state.cycles_completed() + 1);
        let messages = self
            .composer
            .compose(&state.question, &state.cycle_histories)?;
        Ok(RunStatePatch::new().with_messages(messages))
    }

    async fn invoke(&self, state: &RunState, cancel: &CancellationToken) -> (RunStatePatch, Transition) {
        match self.invoker.invoke(&state.messages, cancel).await {
            Ok(invocation) => {
                let mut messages = state.messages.clone();
                messages.push(invocation.message);
                (
                    RunStatePatch::new()
                        .with_messages(messages)
                        .with_errors(invocation.diagnostics),
                    Transition::Next(Step::Decide),
                )
            }
            Err(failure) => Self::abort_with(failure),
        }
    }

    fn merge_tool_output(state: &RunState) -> RunStatePatch {
        if state.tool_input.is_empty() {
            return RunStatePatch::new().with_tool_input(Vec::new());
        }

        let mut messages = state.messages.clone();
        messages.extend(state.tool_input.iter().cloned());
        RunStatePatch::new()
            .with_messages(messages)
            .with_tool_input(Vec::new())
    }

    async fn end_cycle(&self, state: &RunState, cancel: &CancellationToken) -> (RunStatePatch, Transition) {
        let cycle = state.cycles_completed() + 1;
        info!("Ending cycle {} with a forced summary", cycle);

        let mut messages = state.messages.clone();
        messages.push(Message::human(fill_template(
            &self.settings.summary_prompt,
            &[("input", state.question.as_str())],
        )));

        match self.invoker.invoke(&messages, cancel).await {
            Ok(invocation) => {
                let summary = invocation.message;
                messages.push(summary.clone());
                (
                    RunStatePatch::new()
                        .with_messages(messages.clone())
                        .push_history(summary)
                        .push_rollout(Rollout { cycle, messages })
                        .with_errors(invocation.diagnostics),
                    Transition::Next(Step::CycleCheck),
                )
            }
            Err(failure) => Self::abort_with(failure),
        }
    }

    fn abort_with(mut failure: InvocationFailure) -> (RunStatePatch, Transition) {
        let diagnostics = std::mem::take(&mut failure.diagnostics);
        let reason = failure.into_error();
        (
            RunStatePatch::new().with_errors(diagnostics),
            Transition::Abort(reason),
        )
    }
}
