//! Data model for simulation runs.
//!
//! Every type here is a plain serializable record. Enum tags use the
//! SCREAMING_SNAKE_CASE wire format shared with the persistence layer.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

use super::pause::PauseState;
use super::port::{AgentCallTrace, RunSummary, SignalExtraction, ValidationStatus};
use super::strategy::StrategySuggestion;

/// Persona recorded on every run produced by this engine.
pub const GENERIC_PERSONA_ID: &str = "GENERIC";

// ============================================================================
// Outcome / status
// ============================================================================

/// Judgement of a negotiation round or a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Pass,
    Fail,
    #[default]
    Neutral,
}

impl Outcome {
    /// Utility score derived from the outcome.
    pub fn utility(self) -> f64 {
        match self {
            Outcome::Pass => 1.0,
            Outcome::Neutral => 0.5,
            Outcome::Fail => 0.0,
        }
    }

    /// PASS and FAIL end a run early.
    pub fn is_decisive(self) -> bool {
        matches!(self, Outcome::Pass | Outcome::Fail)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Pass => "PASS",
            Outcome::Fail => "FAIL",
            Outcome::Neutral => "NEUTRAL",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = UnknownOutcome;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PASS" => Ok(Outcome::Pass),
            "FAIL" => Ok(Outcome::Fail),
            "NEUTRAL" => Ok(Outcome::Neutral),
            _ => Err(UnknownOutcome(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unknown outcome: {0}")]
pub struct UnknownOutcome(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Completed,
    Paused,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Completed => "COMPLETED",
            RunStatus::Paused => "PAUSED",
        }
    }
}

// ============================================================================
// Speakers and actions
// ============================================================================

/// Who produced a turn. Odd turn indices belong to the user proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Speaker {
    User,
    Counterparty,
}

impl Speaker {
    pub fn for_turn(turn_index: u32) -> Self {
        if turn_index % 2 == 1 {
            Speaker::User
        } else {
            Speaker::Counterparty
        }
    }

    /// Action used when the agent's own action is missing, malformed or
    /// an unaffordable ASK_INFO.
    pub fn default_action(self) -> ActionType {
        match self {
            Speaker::User => ActionType::ProposeOffer,
            Speaker::Counterparty => ActionType::CounterOffer,
        }
    }

    /// Agent name recorded in call traces.
    pub fn agent_name(self) -> &'static str {
        match self {
            Speaker::User => "UserProxy",
            Speaker::Counterparty => "Counterparty",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Speaker::User => "USER",
            Speaker::Counterparty => "COUNTERPARTY",
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of negotiation moves an agent may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionType {
    ProposeOffer,
    CounterOffer,
    Accept,
    Reject,
    Concede,
    Trade,
    ProposePackage,
    AskInfo,
    RequestCriteria,
    SummarizeValidate,
    DeferAndSchedule,
    EscalateToDecider,
    WalkAway,
    TimeoutEnd,
}

impl ActionType {
    pub const ALL: [ActionType; 14] = [
        ActionType::ProposeOffer,
        ActionType::CounterOffer,
        ActionType::Accept,
        ActionType::Reject,
        ActionType::Concede,
        ActionType::Trade,
        ActionType::ProposePackage,
        ActionType::AskInfo,
        ActionType::RequestCriteria,
        ActionType::SummarizeValidate,
        ActionType::DeferAndSchedule,
        ActionType::EscalateToDecider,
        ActionType::WalkAway,
        ActionType::TimeoutEnd,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::ProposeOffer => "PROPOSE_OFFER",
            ActionType::CounterOffer => "COUNTER_OFFER",
            ActionType::Accept => "ACCEPT",
            ActionType::Reject => "REJECT",
            ActionType::Concede => "CONCEDE",
            ActionType::Trade => "TRADE",
            ActionType::ProposePackage => "PROPOSE_PACKAGE",
            ActionType::AskInfo => "ASK_INFO",
            ActionType::RequestCriteria => "REQUEST_CRITERIA",
            ActionType::SummarizeValidate => "SUMMARIZE_VALIDATE",
            ActionType::DeferAndSchedule => "DEFER_AND_SCHEDULE",
            ActionType::EscalateToDecider => "ESCALATE_TO_DECIDER",
            ActionType::WalkAway => "WALK_AWAY",
            ActionType::TimeoutEnd => "TIMEOUT_END",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unknown action type: {0}")]
pub struct UnknownActionType(pub String);

impl FromStr for ActionType {
    type Err = UnknownActionType;

    /// Accepts bare (`ask_info`) and namespaced (`ActionType.ASK_INFO`) tags.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let tag = trimmed.rsplit('.').next().unwrap_or(trimmed).to_ascii_uppercase();
        ActionType::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == tag)
            .ok_or_else(|| UnknownActionType(s.to_string()))
    }
}

impl Serialize for ActionType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ActionType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A declared move plus its free-form payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: ActionType,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl Action {
    pub fn new(kind: ActionType) -> Self {
        Self {
            kind,
            payload: Map::new(),
        }
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Parses an agent-reported action object. Anything that is not an
    /// object with a recognised `type` yields `None`; a non-object payload
    /// is dropped.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let kind = obj.get("type")?.as_str()?.parse().ok()?;
        let payload = obj
            .get("payload")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        Some(Self { kind, payload })
    }

    /// Non-empty `payload.question`, if present.
    pub fn question(&self) -> Option<&str> {
        self.payload
            .get("question")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|q| !q.is_empty())
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "type": self.kind.as_str(),
            "payload": Value::Object(self.payload.clone()),
        })
    }
}

// ============================================================================
// Turns and runs
// ============================================================================

/// One line of the running transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub speaker: Speaker,
    pub text: String,
}

impl ConversationEntry {
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub turn_index: u32,
    pub speaker: Speaker,
    pub message_text: String,
    /// Transcript up to and including this turn.
    pub conversation: Vec<ConversationEntry>,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_suggestions: Option<Vec<StrategySuggestion>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_strategies: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationRun {
    pub run_id: String,
    pub case_id: String,
    pub seed: u64,
    pub persona_id: String,
    pub turns: Vec<Turn>,
    pub outcome: Outcome,
    pub user_utility: f64,
    #[serde(default)]
    pub summary: Option<RunSummary>,
    pub status: RunStatus,
    pub session_id: String,
    /// Assigned by the caller once it has stored the pending question.
    #[serde(default)]
    pub pending_question_id: Option<String>,
    pub max_turns: u32,
    pub max_questions: u32,
    /// When this result was produced (pause or completion).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<DateTime<Utc>>,
}

impl SimulationRun {
    pub fn is_paused(&self) -> bool {
        self.status == RunStatus::Paused
    }
}

/// A clarifying question raised by an agent that paused its run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingQuestion {
    pub question: String,
    pub asked_by: Speaker,
    pub turn_index: u32,
    pub session_id: String,
    pub run_id: String,
}

// ============================================================================
// Traces
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunTrace {
    pub seed: u64,
    pub session_id: String,
    pub max_questions: u32,
    pub strategy_suggestions: Vec<StrategySuggestion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_state: Option<PauseState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction: Option<SignalExtraction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceBundle {
    pub run_trace: RunTrace,
    pub turn_traces: Vec<Turn>,
    pub agent_call_traces: Vec<AgentCallTrace>,
}

impl TraceBundle {
    /// Number of agent calls whose validation failed.
    pub fn error_count(&self) -> usize {
        self.agent_call_traces
            .iter()
            .filter(|trace| trace.validation_result.status == ValidationStatus::Fail)
            .count()
    }
}

/// Output of one engine invocation: a completed or paused run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub run: SimulationRun,
    pub trace_bundle: TraceBundle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_question: Option<PendingQuestion>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_type_normalization() {
        assert_eq!("ASK_INFO".parse::<ActionType>(), Ok(ActionType::AskInfo));
        assert_eq!("ask_info".parse::<ActionType>(), Ok(ActionType::AskInfo));
        assert_eq!(
            "ActionType.COUNTER_OFFER".parse::<ActionType>(),
            Ok(ActionType::CounterOffer)
        );
        assert_eq!(" walk_away ".parse::<ActionType>(), Ok(ActionType::WalkAway));
        assert!("DANCE".parse::<ActionType>().is_err());
    }

    #[test]
    fn test_action_from_value() {
        let action = Action::from_value(&json!({
            "type": "negot.ask_info",
            "payload": {"question": "  What is the budget?  "}
        }))
        .expect("valid action");
        assert_eq!(action.kind, ActionType::AskInfo);
        assert_eq!(action.question(), Some("What is the budget?"));

        let no_payload = Action::from_value(&json!({"type": "ACCEPT", "payload": [1, 2]}))
            .expect("payload dropped");
        assert!(no_payload.payload.is_empty());

        assert!(Action::from_value(&json!({"type": 7})).is_none());
        assert!(Action::from_value(&json!("PROPOSE_OFFER")).is_none());
        assert!(Action::from_value(&json!({"payload": {}})).is_none());
    }

    #[test]
    fn test_action_serde_wire_format() {
        let action = Action::new(ActionType::ProposePackage).with_payload("price", 100);
        let value = serde_json::to_value(&action).expect("serialize");
        assert_eq!(value, json!({"type": "PROPOSE_PACKAGE", "payload": {"price": 100}}));

        let parsed: Action =
            serde_json::from_value(json!({"type": "ActionType.trade"})).expect("deserialize");
        assert_eq!(parsed.kind, ActionType::Trade);
    }

    #[test]
    fn test_speaker_for_turn() {
        assert_eq!(Speaker::for_turn(1), Speaker::User);
        assert_eq!(Speaker::for_turn(2), Speaker::Counterparty);
        assert_eq!(Speaker::for_turn(7), Speaker::User);
        assert_eq!(Speaker::User.default_action(), ActionType::ProposeOffer);
        assert_eq!(
            Speaker::Counterparty.default_action(),
            ActionType::CounterOffer
        );
    }

    #[test]
    fn test_outcome_utility() {
        assert_eq!(Outcome::Pass.utility(), 1.0);
        assert_eq!(Outcome::Neutral.utility(), 0.5);
        assert_eq!(Outcome::Fail.utility(), 0.0);
        assert!(!Outcome::Neutral.is_decisive());
        assert_eq!(" pass".parse::<Outcome>(), Ok(Outcome::Pass));
        assert_eq!(
            serde_json::to_value(Outcome::Neutral).expect("serialize"),
            json!("NEUTRAL")
        );
    }
}
