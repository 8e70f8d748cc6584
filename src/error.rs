//! Error types for negot-sim operations.
//!
//! Defines the error types shared across subsystems:
//! - LLM provider interactions
//! - Case file loading
//!
//! Simulation, agent and configuration errors live next to the code that
//! raises them.

use thiserror::Error;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: OPENROUTER_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("LLM response contained no message content")]
    EmptyResponse,

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

/// Errors that can occur while loading a case snapshot from disk.
#[derive(Debug, Error)]
pub enum CaseError {
    #[error("Unsupported case file format '{0}': expected .json, .yaml or .yml")]
    UnsupportedFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
