//! negot-sim: negotiation simulation orchestrator.
//!
//! Plays a negotiation case many times between a user proxy and a
//! counterparty, refereed by a world agent, with a session-wide budget of
//! clarifying questions and pause/resume support.

// Core modules
pub mod agents;
pub mod cli;
pub mod error;
pub mod llm;
pub mod metrics;
pub mod simulation;
pub mod utils;

// Re-export commonly used error types
pub use error::{CaseError, LlmError};
