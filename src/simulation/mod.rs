//! Negotiation simulation core.
//!
//! This module runs multi-turn negotiations between a user proxy and a
//! counterparty, refereed by an arbiter:
//!
//! - **RunScheduler**: fans a case out into N seeded runs with bounded concurrency
//! - **TurnEngine**: alternates speakers, judges rounds, pauses on questions
//! - **QuestionBudget**: session-wide cap on clarifying questions
//! - **Agent port**: the traits LLM-backed (or scripted) agents implement
//! - **Evaluator**: deterministic offer check used when the arbiter fails
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────┐
//!                 │ RunScheduler │
//!                 └──────┬───────┘
//!          ┌─────────────┼─────────────┐
//!          ▼             ▼             ▼
//!    ┌──────────┐  ┌──────────┐  ┌──────────┐
//!    │TurnEngine│  │TurnEngine│  │TurnEngine│
//!    └────┬─────┘  └────┬─────┘  └────┬─────┘
//!         │             │             │
//!         └──── QuestionBudget (shared) ──┘
//!         │
//!         ▼
//!   RoleplayAgent / ArbiterAgent  ──fallback──▶  evaluator
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use negot_sim::simulation::{CaseSnapshot, RunScheduler, SimulationRequest};
//!
//! let case = Arc::new(CaseSnapshot::load("case.yaml")?);
//! let scheduler = RunScheduler::new(agents, strategies, 4);
//! let mut stream = scheduler.run_stream(case, SimulationRequest {
//!     runs: 10,
//!     max_turns: 8,
//!     max_questions: 1,
//!     session_id: None,
//! });
//! while let Some(outcome) = stream.next().await {
//!     // ...
//! }
//! ```

pub mod budget;
pub mod case;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod insights;
pub mod pause;
pub mod port;
pub mod scheduler;
pub mod strategy;
pub mod types;

pub use budget::QuestionBudget;
pub use case::{
    CaseSnapshot, Clarification, CounterpartyAssumptions, CounterpartyCalibration,
    DesiredValues, Issue, IssueBounds, IssueDirection, ObjectiveType, ObjectiveValue,
    Objectives, Parameter, ParameterAppliesTo,
};
pub use config::{ConfigError, SimulationConfig};
pub use engine::{RunParams, TurnEngine};
pub use error::{ResumeError, RunFailure};
pub use evaluator::{evaluate_offer, evaluate_outcome};
pub use insights::{compute_insights, Insights, OutcomeRates, StrategyUsage};
pub use pause::{PauseState, ResumeRequest};
pub use port::{
    AgentCallTrace, AgentContext, ArbiterAgent, Extraction, PromptVariables, RoleplayAgent,
    RunSummary, SignalExtraction, SimulationAgents, SummaryReply, TurnFallback, TurnReply,
    ValidationResult, ValidationStatus, Verdict,
};
pub use scheduler::{base_seed, RunOutcome, RunScheduler, RunStream, SimulationRequest};
pub use strategy::{
    SeededStrategySampler, StrategyError, StrategySuggestion, StrategySuggestionProvider,
    DEFAULT_SAMPLE_SIZE,
};
pub use types::{
    Action, ActionType, ConversationEntry, Outcome, PendingQuestion, RunStatus, RunTrace,
    SimulationResult, SimulationRun, Speaker, TraceBundle, Turn, GENERIC_PERSONA_ID,
};
