//! Pause snapshots and resume requests.
//!
//! A [`PauseState`] is built once, at the moment a run pauses, and is never
//! mutated afterwards. Everything a resumed engine needs is in it; nothing
//! else about the original engine survives.

use serde::{Deserialize, Serialize};

use super::error::ResumeError;
use super::port::AgentCallTrace;
use super::strategy::StrategySuggestion;
use super::types::{ConversationEntry, Outcome, SimulationResult, Speaker, Turn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PauseState {
    conversation: Vec<ConversationEntry>,
    turns: Vec<Turn>,
    agent_call_traces: Vec<AgentCallTrace>,
    latest_outcome: Outcome,
    /// Position in `turns` of a user turn still waiting for its round outcome.
    #[serde(default)]
    round_user_turn_index: Option<usize>,
    next_turn_index: u32,
    strategy_suggestions: Vec<StrategySuggestion>,
}

impl PauseState {
    pub(crate) fn new(
        conversation: Vec<ConversationEntry>,
        turns: Vec<Turn>,
        agent_call_traces: Vec<AgentCallTrace>,
        latest_outcome: Outcome,
        round_user_turn_index: Option<usize>,
        next_turn_index: u32,
        strategy_suggestions: Vec<StrategySuggestion>,
    ) -> Self {
        Self {
            conversation,
            turns,
            agent_call_traces,
            latest_outcome,
            round_user_turn_index,
            next_turn_index,
            strategy_suggestions,
        }
    }

    pub fn conversation(&self) -> &[ConversationEntry] {
        &self.conversation
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn agent_call_traces(&self) -> &[AgentCallTrace] {
        &self.agent_call_traces
    }

    pub fn latest_outcome(&self) -> Outcome {
        self.latest_outcome
    }

    pub fn round_user_turn_index(&self) -> Option<usize> {
        self.round_user_turn_index
    }

    pub fn next_turn_index(&self) -> u32 {
        self.next_turn_index
    }

    pub fn strategy_suggestions(&self) -> &[StrategySuggestion] {
        &self.strategy_suggestions
    }

    /// Checks the snapshot describes a run that can continue.
    fn check_consistency(&self) -> Result<(), ResumeError> {
        if self.next_turn_index == 0 {
            return Err(ResumeError::InvalidTurnIndex {
                next_turn_index: 0,
            });
        }
        for (position, turn) in self.turns.iter().enumerate() {
            let expected = position as u32 + 1;
            if turn.turn_index != expected {
                return Err(ResumeError::InconsistentState(format!(
                    "turn at position {} has index {}, expected {}",
                    position, turn.turn_index, expected
                )));
            }
        }
        let expected_next = self.turns.len() as u32 + 1;
        if self.next_turn_index != expected_next {
            return Err(ResumeError::InconsistentState(format!(
                "next turn index {} does not follow {} recorded turns",
                self.next_turn_index,
                self.turns.len()
            )));
        }
        // A round is open exactly when the counterparty speaks next, and its
        // user turn is the last one recorded.
        let counterparty_next = Speaker::for_turn(self.next_turn_index) == Speaker::Counterparty;
        match (self.round_user_turn_index, counterparty_next) {
            (None, false) => {}
            (Some(slot), true)
                if slot + 1 == self.turns.len()
                    && self.turns[slot].speaker == Speaker::User => {}
            (Some(slot), _) => {
                return Err(ResumeError::InconsistentState(format!(
                    "pending outcome slot {} does not hold the user turn before turn {}",
                    slot, self.next_turn_index
                )));
            }
            (None, true) => {
                return Err(ResumeError::InconsistentState(format!(
                    "turn {} closes a round but no pending outcome slot is recorded",
                    self.next_turn_index
                )));
            }
        }
        Ok(())
    }
}

/// Validated input for resuming a paused run.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumeRequest {
    pub run_id: String,
    pub seed: u64,
    pub session_id: String,
    pub max_turns: u32,
    pub max_questions: u32,
    /// Questions already spent in the session, including the one being answered.
    pub budget_used: u32,
    pub pause_state: PauseState,
}

impl ResumeRequest {
    /// Builds a request from a stored paused result.
    pub fn from_result(result: &SimulationResult, budget_used: u32) -> Result<Self, ResumeError> {
        let run = &result.run;
        if !run.is_paused() {
            return Err(ResumeError::NotPaused {
                run_id: run.run_id.clone(),
            });
        }
        let pause_state = result
            .trace_bundle
            .run_trace
            .pause_state
            .clone()
            .ok_or_else(|| ResumeError::MissingPauseState {
                run_id: run.run_id.clone(),
            })?;

        let request = Self {
            run_id: run.run_id.clone(),
            seed: run.seed,
            session_id: run.session_id.clone(),
            max_turns: run.max_turns,
            max_questions: run.max_questions,
            budget_used,
            pause_state,
        };
        request.validate()?;
        Ok(request)
    }

    /// Resume with a different turn limit.
    pub fn with_max_turns(mut self, max_turns: u32) -> Result<Self, ResumeError> {
        self.max_turns = max_turns;
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ResumeError> {
        self.pause_state.check_consistency()?;
        let next_turn_index = self.pause_state.next_turn_index;
        if next_turn_index > self.max_turns {
            return Err(ResumeError::TurnIndexOutOfRange {
                next_turn_index,
                max_turns: self.max_turns,
            });
        }
        if self.budget_used > self.max_questions {
            return Err(ResumeError::BudgetExceeded {
                used: self.budget_used,
                max: self.max_questions,
            });
        }
        Ok(())
    }
}
