//! Recap Engine Library
//!
//! Core of the recap research agent. Used by the `recap` binary and the
//! integration tests.

/// Configuration management module
pub mod config;

/// Secret management module
pub mod secrets;

/// Run history persistence module
pub mod db;

/// Request admission control for the model backend
pub mod rate_limiter;

/// Model backend abstraction layer
pub mod llm;

/// Cyclic research loop
pub mod agent;

/// Web research tools
pub mod tools;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
