//! Agent Port: the capabilities the engine needs from each participant.
//!
//! Implementations never fail from the engine's point of view. Any upstream
//! error is folded into the returned value: a roleplay agent returns the
//! caller-supplied fallback, an arbiter returns no verdict, and in both cases
//! the call trace carries a FAIL validation status.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::types::{Action, Outcome};
use crate::llm::{Message, Usage};

/// Named values rendered into an agent's prompt.
pub type PromptVariables = BTreeMap<String, Value>;

// ============================================================================
// Call traces
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationStatus {
    #[default]
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub status: ValidationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ValidationResult {
    pub fn pass() -> Self {
        Self::default()
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            status: ValidationStatus::Fail,
            reason: Some(reason.into()),
        }
    }

    pub fn is_fail(&self) -> bool {
        self.status == ValidationStatus::Fail
    }
}

/// Audit record of one agent invocation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AgentCallTrace {
    pub agent_name: String,
    pub prompt_id: String,
    pub prompt_version: String,
    #[serde(default)]
    pub prompt_variables: PromptVariables,
    #[serde(default)]
    pub prompt_text: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub raw_output: String,
    #[serde(default)]
    pub parsed_output: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_params: Option<Value>,
    pub validation_result: ValidationResult,
    #[serde(default)]
    pub tool_calls: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
}

impl AgentCallTrace {
    pub fn new(
        agent_name: impl Into<String>,
        prompt_id: impl Into<String>,
        prompt_version: impl Into<String>,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            prompt_id: prompt_id.into(),
            prompt_version: prompt_version.into(),
            ..Self::default()
        }
    }

    pub fn with_validation(mut self, validation: ValidationResult) -> Self {
        self.validation_result = validation;
        self
    }

    pub fn with_parsed_output(mut self, parsed: Map<String, Value>) -> Self {
        self.parsed_output = parsed;
        self
    }

    pub fn is_fail(&self) -> bool {
        self.validation_result.is_fail()
    }
}

// ============================================================================
// Inputs / outputs
// ============================================================================

/// What the engine hands an agent for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentContext {
    pub run_id: String,
    /// Turn being produced or judged; `None` for post-run calls.
    pub turn_index: Option<u32>,
    pub variables: PromptVariables,
}

impl AgentContext {
    pub fn new(run_id: impl Into<String>, turn_index: Option<u32>, variables: PromptVariables) -> Self {
        Self {
            run_id: run_id.into(),
            turn_index,
            variables,
        }
    }
}

/// Default utterance and action used when an agent call cannot be trusted.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnFallback {
    pub text: String,
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnReply {
    pub text: String,
    /// `None` when the agent reported no action or a malformed one.
    pub action: Option<Action>,
    pub used_strategies: Option<Vec<String>>,
    pub trace: AgentCallTrace,
}

impl TurnReply {
    /// Reply carrying the fallback verbatim.
    pub fn fallback(fallback: &TurnFallback, trace: AgentCallTrace) -> Self {
        Self {
            text: fallback.text.clone(),
            action: Some(fallback.action.clone()),
            used_strategies: None,
            trace,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub outcome: Option<Outcome>,
    pub trace: AgentCallTrace,
}

/// Structured negotiation signals pulled from a finished transcript.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SignalExtraction {
    #[serde(default)]
    pub offers: Vec<Value>,
    #[serde(default)]
    pub concessions: Vec<Value>,
    #[serde(default)]
    pub packages: Vec<Value>,
    #[serde(default)]
    pub asks: Vec<Value>,
    #[serde(default)]
    pub objections: Vec<Value>,
    #[serde(default)]
    pub arguments: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunSummary {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub signals: SignalExtraction,
    pub trace: AgentCallTrace,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryReply {
    pub summary: RunSummary,
    pub trace: AgentCallTrace,
}

// ============================================================================
// Traits
// ============================================================================

/// User proxy or counterparty.
#[async_trait]
pub trait RoleplayAgent: Send + Sync {
    async fn produce_turn(
        &self,
        context: &AgentContext,
        fallback: &TurnFallback,
        history: &[Message],
    ) -> TurnReply;
}

/// World agent judging rounds and digesting finished runs.
#[async_trait]
pub trait ArbiterAgent: Send + Sync {
    async fn evaluate_outcome(&self, context: &AgentContext, history: &[Message]) -> Verdict;

    async fn extract_signals(&self, context: &AgentContext, history: &[Message]) -> Extraction;

    async fn summarize_run(&self, context: &AgentContext, history: &[Message]) -> SummaryReply;
}

/// The three participants of a run.
#[derive(Clone)]
pub struct SimulationAgents {
    pub user: Arc<dyn RoleplayAgent>,
    pub counterparty: Arc<dyn RoleplayAgent>,
    pub arbiter: Arc<dyn ArbiterAgent>,
}

impl SimulationAgents {
    pub fn new(
        user: Arc<dyn RoleplayAgent>,
        counterparty: Arc<dyn RoleplayAgent>,
        arbiter: Arc<dyn ArbiterAgent>,
    ) -> Self {
        Self {
            user,
            counterparty,
            arbiter,
        }
    }
}

impl std::fmt::Debug for SimulationAgents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationAgents").finish_non_exhaustive()
    }
}
