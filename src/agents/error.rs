//! Error types for the LLM-backed agents.
//!
//! These never reach the simulation engine: agents fold them into a FAIL
//! validation on the call trace and return their fallback.

use thiserror::Error;

/// Errors that can occur during agent operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Error from the LLM provider.
    #[error("LLM error: {0}")]
    LlmError(String),

    /// Error parsing LLM response.
    #[error("Failed to parse LLM response: {0}")]
    ResponseParseError(String),

    /// Parsed response does not have the expected shape.
    #[error("Invalid agent output: {0}")]
    InvalidOutput(String),

    /// Prompt not registered.
    #[error("Prompt not found: {0}")]
    PromptNotFound(String),

    /// Prompt template failed to render.
    #[error("Failed to render prompt '{prompt_id}': {reason}")]
    PromptRender { prompt_id: String, reason: String },

    /// Prompt directory could not be read.
    #[error("Failed to read prompt directory: {0}")]
    PromptDirectory(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<crate::error::LlmError> for AgentError {
    fn from(err: crate::error::LlmError) -> Self {
        AgentError::LlmError(err.to_string())
    }
}

impl From<crate::utils::JsonExtractionError> for AgentError {
    fn from(err: crate::utils::JsonExtractionError) -> Self {
        AgentError::ResponseParseError(err.to_string())
    }
}

/// Result type alias for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;
