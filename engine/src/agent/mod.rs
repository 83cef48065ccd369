//! Research Agent Core
//!
//! This module implements the cyclic research loop. A run is a sequence of
//! cycles; each cycle alternates model invocations and tool executions until
//! the model stops calling tools or a budget is hit, then forces a summary.
//! Later cycles start from the previous cycle's summary instead of the full
//! transcript.
//!
//! - [`controller`]: the state machine driving a run
//! - [`invoker`]: retrying, rate-limited model invocation
//! - [`tool_runner`]: concurrent execution of one batch of tool calls
//! - [`carry_over`]: conversation seeding between cycles
//! - [`state`]: run state and the patch merge rules

pub mod carry_over;
pub mod controller;
pub mod invoker;
pub mod state;
pub mod tool_runner;

pub use carry_over::CarryOverComposer;
pub use controller::{CycleController, Decision, ResearchSettings, RunEvent, RunOutcome, RunReport, Step};
pub use invoker::{FailureKind, InvocationFailure, ResilientInvoker, RetryPolicy};
pub use state::{Rollout, RunState, RunStatePatch};
pub use tool_runner::ToolRunner;
