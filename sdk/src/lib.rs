//! Recap SDK
//!
//! Shared library providing the error taxonomy and tool argument/output types
//! for Recap components. The engine and every tool implementation depend on it.

/// Error types and handling
pub mod errors;

/// Tool input/output types
pub mod types;

// Re-export commonly used types
pub use errors::{EngineError, RecapErrorExt};
pub use types::{ToolError, ToolInput, ToolOutput};
