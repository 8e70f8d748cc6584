//! Errors surfaced by the simulation engine and scheduler.

use thiserror::Error;

/// A paused run that cannot be resumed as requested.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResumeError {
    #[error("Run {run_id} is not paused")]
    NotPaused { run_id: String },

    #[error("Run {run_id} has no pause state in its trace")]
    MissingPauseState { run_id: String },

    #[error("Invalid next turn index {next_turn_index}: turn indices start at 1")]
    InvalidTurnIndex { next_turn_index: u32 },

    #[error("Next turn index {next_turn_index} exceeds max turns {max_turns}")]
    TurnIndexOutOfRange { next_turn_index: u32, max_turns: u32 },

    #[error("Session budget exhausted: {used} questions used, {max} allowed")]
    BudgetExceeded { used: u32, max: u32 },

    #[error("Inconsistent pause state: {0}")]
    InconsistentState(String),
}

/// A run whose task ended without producing a result.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RunFailure {
    #[error("Run {run_id} panicked: {message}")]
    Panicked { run_id: String, message: String },

    #[error("Run {run_id} was cancelled")]
    Cancelled { run_id: String },

    /// The task died outside the run's own panic guard.
    #[error("Run {run_id} task ended abnormally: {reason}")]
    Aborted { run_id: String, reason: String },
}

impl RunFailure {
    pub fn run_id(&self) -> &str {
        match self {
            RunFailure::Panicked { run_id, .. }
            | RunFailure::Cancelled { run_id }
            | RunFailure::Aborted { run_id, .. } => run_id,
        }
    }
}
