//! Error types and handling
//!
//! This module provides the error types used throughout the Recap engine.
//! All errors implement the `RecapErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.
//!
//! # Security
//!
//! Error messages may carry backend responses verbatim. Callers that print
//! or persist them pass the text through the engine's secret scrubber first.

use thiserror::Error;

/// Trait for Recap error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information. All engine errors implement this trait.
pub trait RecapErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is a static string and never echoes the error payload.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors may succeed when the same operation is retried.
    /// Non-recoverable errors need a change of input or configuration.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Run input**: missing question, invalid state transitions
/// - **Invocation**: transient and fatal model failures, retry exhaustion
/// - **Tools**: unknown tools and failed executions
/// - **Control**: cancellation and step limits
/// - **Ambient**: configuration, database, keyring, network and IO
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, RecapErrorExt};
///
/// let error = EngineError::TransientInvocation("connection reset".to_string());
/// println!("Hint: {}", error.user_hint());
/// assert!(error.is_recoverable());
///
/// let fatal_error = EngineError::FatalInvocation("context length exceeded".to_string());
/// assert!(!fatal_error.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(String),

    // Run input errors
    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    // Invocation errors
    #[error("Transient invocation failure: {0}")]
    TransientInvocation(String),

    #[error("Fatal invocation failure: {0}")]
    FatalInvocation(String),

    #[error("Malformed model response: {0}")]
    MalformedResponse(String),

    #[error("Model invocation failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    // Tool errors
    #[error("Tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    // Control errors
    #[error("Run cancelled")]
    Cancelled,

    #[error("Step limit of {0} exceeded")]
    StepLimitExceeded(usize),

    // Keyring errors
    #[error("Keyring error: {0}")]
    KeyringError(String),

    #[error("Secret not found: {0}")]
    SecretNotFound(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RecapErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            // Configuration errors
            Self::Config(_) => "Check your config.toml file for errors",

            // Database errors
            Self::Database(_) => "Run history storage failed. Check the data directory",

            // Run input errors
            Self::MissingInput(_) => "Provide a non-empty question",
            Self::InvalidState(_) => "Internal run state is inconsistent. Please report this",

            // Invocation errors
            Self::TransientInvocation(_) => "Model backend unavailable. Check your network",
            Self::FatalInvocation(_) => {
                "The conversation no longer fits the model context. Lower max_turns"
            }
            Self::MalformedResponse(_) => "The model returned an unparseable tool call",
            Self::RetriesExhausted { .. } => {
                "Model backend kept failing. Check API keys and try again later"
            }

            // Tool errors
            Self::ToolExecution { .. } => "Tool operation failed",
            Self::ToolNotFound(_) => "The requested tool is not available",

            // Control errors
            Self::Cancelled => "The run was cancelled",
            Self::StepLimitExceeded(_) => "Run took too many steps. Lower max_cycles or max_turns",

            // Keyring errors
            Self::KeyringError(_) => "Failed to access secure storage. Check system keychain",
            Self::SecretNotFound(_) => "Set the secret with 'recap secret set' or an env var",

            // Network errors
            Self::Network(_) => "Network operation failed. Check your connection",

            // Generic IO error
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Non-recoverable errors
            Self::Config(_)
            | Self::MissingInput(_)
            | Self::InvalidState(_)
            | Self::FatalInvocation(_)
            | Self::RetriesExhausted { .. }
            | Self::StepLimitExceeded(_)
            | Self::SecretNotFound(_) => false,

            // All other errors are potentially recoverable
            _ => true,
        }
    }
}
