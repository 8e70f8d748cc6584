//! Turn engine: drives one run from its first (or resumed) turn to
//! completion or a pause.
//!
//! Odd turns belong to the user proxy, even turns to the counterparty. Each
//! counterparty turn closes a round: the arbiter (or, failing that, the
//! numeric evaluator) judges it, the judgement is written back onto the
//! round's user turn, and a PASS or FAIL ends the run. An agent asking for
//! information pauses the run when the session budget allows; otherwise the
//! request is downgraded to the speaker's default move.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::budget::QuestionBudget;
use super::case::CaseSnapshot;
use super::context;
use super::error::ResumeError;
use super::evaluator;
use super::pause::{PauseState, ResumeRequest};
use super::port::{
    AgentCallTrace, AgentContext, RunSummary, SignalExtraction, SimulationAgents, TurnReply,
};
use super::strategy::StrategySuggestion;
use super::types::{
    Action, ActionType, ConversationEntry, Outcome, PendingQuestion, RunStatus, RunTrace,
    SimulationResult, SimulationRun, Speaker, TraceBundle, Turn, GENERIC_PERSONA_ID,
};
use crate::metrics::MetricsCollector;

/// Identity and limits of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunParams {
    pub run_id: String,
    pub seed: u64,
    pub session_id: String,
    pub max_turns: u32,
}

/// Result of producing one turn.
enum Step {
    Continue,
    Paused(PendingQuestion),
}

/// Owns the state of exactly one run.
pub struct TurnEngine {
    case: Arc<CaseSnapshot>,
    agents: SimulationAgents,
    budget: Arc<QuestionBudget>,
    params: RunParams,
    strategy_suggestions: Vec<StrategySuggestion>,
    conversation: Vec<ConversationEntry>,
    turns: Vec<Turn>,
    agent_call_traces: Vec<AgentCallTrace>,
    latest_outcome: Outcome,
    /// Position in `turns` of the user turn awaiting its round's outcome.
    pending_outcome_slot: Option<usize>,
    next_turn_index: u32,
    metrics: MetricsCollector,
}

impl TurnEngine {
    /// Engine for a fresh run. A `max_turns` of 0 is treated as 1.
    pub fn new(
        case: Arc<CaseSnapshot>,
        agents: SimulationAgents,
        budget: Arc<QuestionBudget>,
        params: RunParams,
        strategy_suggestions: Vec<StrategySuggestion>,
    ) -> Self {
        let params = RunParams {
            max_turns: params.max_turns.max(1),
            ..params
        };
        Self {
            case,
            agents,
            budget,
            params,
            strategy_suggestions,
            conversation: Vec::new(),
            turns: Vec::new(),
            agent_call_traces: Vec::new(),
            latest_outcome: Outcome::Neutral,
            pending_outcome_slot: None,
            next_turn_index: 1,
            metrics: MetricsCollector::new(),
        }
    }

    /// Engine continuing a paused run at its captured turn index, with a
    /// fresh session budget that has `request.budget_used` questions spent.
    pub fn resume(
        case: Arc<CaseSnapshot>,
        agents: SimulationAgents,
        request: ResumeRequest,
    ) -> Result<Self, ResumeError> {
        request.validate()?;

        let ResumeRequest {
            run_id,
            seed,
            session_id,
            max_turns,
            max_questions,
            budget_used,
            pause_state,
        } = request;

        let budget = Arc::new(QuestionBudget::with_used(max_questions, budget_used));
        let mut engine = Self::new(
            case,
            agents,
            budget,
            RunParams {
                run_id,
                seed,
                session_id,
                max_turns,
            },
            pause_state.strategy_suggestions().to_vec(),
        );
        engine.conversation = pause_state.conversation().to_vec();
        engine.turns = pause_state.turns().to_vec();
        engine.agent_call_traces = pause_state.agent_call_traces().to_vec();
        engine.latest_outcome = pause_state.latest_outcome();
        engine.pending_outcome_slot = pause_state.round_user_turn_index();
        engine.next_turn_index = pause_state.next_turn_index();

        debug!(
            run_id = %engine.params.run_id,
            next_turn_index = engine.next_turn_index,
            budget_used = budget_used,
            "Resuming paused run"
        );
        Ok(engine)
    }

    pub fn run_id(&self) -> &str {
        &self.params.run_id
    }

    /// Runs turns until the run completes or pauses.
    pub async fn run(mut self) -> SimulationResult {
        let started = Instant::now();
        let metrics = self.metrics;

        while self.next_turn_index <= self.params.max_turns {
            let turn_index = self.next_turn_index;
            let speaker = Speaker::for_turn(turn_index);

            if let Step::Paused(question) = self.take_turn(turn_index, speaker).await {
                let result = self.into_paused(question);
                metrics.record_run(&result.run, started.elapsed().as_secs_f64());
                return result;
            }

            self.next_turn_index += 1;
            if speaker == Speaker::Counterparty && self.latest_outcome.is_decisive() {
                debug!(
                    run_id = %self.params.run_id,
                    turn_index = turn_index,
                    outcome = %self.latest_outcome,
                    "Round decided, ending run early"
                );
                break;
            }
        }

        let result = self.into_completed().await;
        metrics.record_run(&result.run, started.elapsed().as_secs_f64());
        result
    }

    async fn take_turn(&mut self, turn_index: u32, speaker: Speaker) -> Step {
        let (variables, fallback) = match speaker {
            Speaker::User => (
                context::user_variables(
                    &self.case,
                    &self.strategy_suggestions,
                    self.budget.remaining(),
                ),
                context::user_fallback(&self.case),
            ),
            Speaker::Counterparty => (
                context::counterparty_variables(&self.case, &self.strategy_suggestions),
                context::counterparty_fallback(),
            ),
        };
        let agent_context = AgentContext::new(&self.params.run_id, Some(turn_index), variables);
        let history = context::history_for(&self.conversation, speaker);
        let agent = match speaker {
            Speaker::User => &self.agents.user,
            Speaker::Counterparty => &self.agents.counterparty,
        };

        let mut reply = agent.produce_turn(&agent_context, &fallback, &history).await;
        if reply.trace.is_fail() {
            warn!(
                run_id = %self.params.run_id,
                turn_index = turn_index,
                agent = speaker.agent_name(),
                reason = reply.trace.validation_result.reason.as_deref().unwrap_or(""),
                "Agent call failed validation, using fallback turn"
            );
            reply = TurnReply::fallback(&fallback, reply.trace);
        }
        self.metrics.record_agent_call(&reply.trace);

        let mut action = reply
            .action
            .take()
            .unwrap_or_else(|| Action::new(speaker.default_action()));

        if action.kind == ActionType::AskInfo {
            let question = action
                .question()
                .map(str::to_string)
                .or_else(|| Some(reply.text.trim().to_string()).filter(|q| !q.is_empty()));

            if let Some(question) = question {
                if self.budget.reserve() {
                    self.metrics.record_question_reserved();
                    self.agent_call_traces.push(reply.trace);
                    return Step::Paused(PendingQuestion {
                        question,
                        asked_by: speaker,
                        turn_index,
                        session_id: self.params.session_id.clone(),
                        run_id: self.params.run_id.clone(),
                    });
                }
            }

            debug!(
                run_id = %self.params.run_id,
                turn_index = turn_index,
                speaker = %speaker,
                "ASK_INFO not affordable, downgrading to default action"
            );
            action = Action::new(speaker.default_action());
            reply
                .trace
                .parsed_output
                .insert("action".to_string(), action.to_value());
        }

        self.conversation
            .push(ConversationEntry::new(speaker, reply.text.clone()));
        let TurnReply {
            text,
            used_strategies,
            trace,
            ..
        } = reply;
        self.agent_call_traces.push(trace);

        let outcome = match speaker {
            Speaker::User => self.latest_outcome,
            Speaker::Counterparty => {
                let outcome = self.judge_round(turn_index).await;
                self.latest_outcome = outcome;
                if let Some(slot) = self.pending_outcome_slot.take() {
                    if let Some(user_turn) = self.turns.get_mut(slot) {
                        user_turn.outcome = outcome;
                    }
                }
                outcome
            }
        };

        self.turns.push(Turn {
            turn_index,
            speaker,
            message_text: text,
            conversation: self.conversation.clone(),
            outcome,
            strategy_suggestions: Some(self.strategy_suggestions.clone()),
            used_strategies,
            action: Some(action),
        });
        if speaker == Speaker::User {
            self.pending_outcome_slot = Some(self.turns.len() - 1);
        }

        debug!(
            run_id = %self.params.run_id,
            turn_index = turn_index,
            speaker = %speaker,
            outcome = %outcome,
            "Turn recorded"
        );
        Step::Continue
    }

    /// Arbiter verdict for the round just closed, or the numeric fallback.
    async fn judge_round(&mut self, turn_index: u32) -> Outcome {
        let agent_context = AgentContext::new(
            &self.params.run_id,
            Some(turn_index),
            context::outcome_variables(&self.case),
        );
        let history = context::history_for(&self.conversation, Speaker::Counterparty);
        let verdict = self
            .agents
            .arbiter
            .evaluate_outcome(&agent_context, &history)
            .await;

        let arbiter_outcome = if verdict.trace.is_fail() {
            None
        } else {
            verdict.outcome
        };
        self.metrics.record_agent_call(&verdict.trace);
        self.agent_call_traces.push(verdict.trace);

        arbiter_outcome.unwrap_or_else(|| {
            let outcome = evaluator::evaluate_outcome(&self.case, &self.conversation);
            debug!(
                run_id = %self.params.run_id,
                turn_index = turn_index,
                outcome = %outcome,
                "No arbiter verdict, used numeric evaluator"
            );
            outcome
        })
    }

    fn into_paused(self, question: PendingQuestion) -> SimulationResult {
        let pause_state = PauseState::new(
            self.conversation.clone(),
            self.turns.clone(),
            self.agent_call_traces.clone(),
            self.latest_outcome,
            self.pending_outcome_slot,
            question.turn_index,
            self.strategy_suggestions.clone(),
        );

        info!(
            run_id = %self.params.run_id,
            session_id = %self.params.session_id,
            turn_index = question.turn_index,
            asked_by = %question.asked_by,
            "Run paused for clarifying question"
        );

        self.build_result(RunStatus::Paused, None, Some(pause_state), None, Some(question))
    }

    async fn into_completed(mut self) -> SimulationResult {
        let history = context::history_for(&self.conversation, Speaker::Counterparty);
        let agent_context = AgentContext::new(
            &self.params.run_id,
            None,
            context::digest_variables(&self.case),
        );

        let extraction = self
            .agents
            .arbiter
            .extract_signals(&agent_context, &history)
            .await;
        let signals = (!extraction.trace.is_fail()).then_some(extraction.signals);
        self.metrics.record_agent_call(&extraction.trace);
        self.agent_call_traces.push(extraction.trace);

        let summary_reply = self
            .agents
            .arbiter
            .summarize_run(&agent_context, &history)
            .await;
        let summary = (!summary_reply.trace.is_fail()).then_some(summary_reply.summary);
        self.metrics.record_agent_call(&summary_reply.trace);
        self.agent_call_traces.push(summary_reply.trace);

        if signals.is_none() || summary.is_none() {
            warn!(
                run_id = %self.params.run_id,
                "Post-run extraction or summary failed validation"
            );
        }

        info!(
            run_id = %self.params.run_id,
            session_id = %self.params.session_id,
            turns = self.turns.len(),
            outcome = %self.latest_outcome,
            "Run completed"
        );

        self.build_result(RunStatus::Completed, summary, None, signals, None)
    }

    fn build_result(
        self,
        status: RunStatus,
        summary: Option<RunSummary>,
        pause_state: Option<PauseState>,
        extraction: Option<SignalExtraction>,
        pending_question: Option<PendingQuestion>,
    ) -> SimulationResult {
        let run = SimulationRun {
            run_id: self.params.run_id.clone(),
            case_id: self.case.case_id.clone(),
            seed: self.params.seed,
            persona_id: GENERIC_PERSONA_ID.to_string(),
            turns: self.turns.clone(),
            outcome: self.latest_outcome,
            user_utility: self.latest_outcome.utility(),
            summary,
            status,
            session_id: self.params.session_id.clone(),
            pending_question_id: None,
            max_turns: self.params.max_turns,
            max_questions: self.budget.max(),
            recorded_at: Some(Utc::now()),
        };

        let trace_bundle = TraceBundle {
            run_trace: RunTrace {
                seed: self.params.seed,
                session_id: self.params.session_id,
                max_questions: self.budget.max(),
                strategy_suggestions: self.strategy_suggestions,
                pause_state,
                extraction,
            },
            turn_traces: self.turns,
            agent_call_traces: self.agent_call_traces,
        };

        SimulationResult {
            run,
            trace_bundle,
            pending_question,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Message;
    use crate::simulation::case::{Issue, IssueDirection, ObjectiveValue};
    use crate::simulation::port::{
        ArbiterAgent, Extraction, RoleplayAgent, SummaryReply, TurnFallback, ValidationResult,
        Verdict,
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Replies with a scripted text/action per turn index.
    struct ScriptedAgent {
        name: &'static str,
        script: fn(u32) -> (String, Option<Action>),
        fail_on: Option<u32>,
    }

    #[async_trait]
    impl RoleplayAgent for ScriptedAgent {
        async fn produce_turn(
            &self,
            context: &AgentContext,
            _fallback: &TurnFallback,
            _history: &[Message],
        ) -> TurnReply {
            let turn = context.turn_index.unwrap_or_default();
            let trace = AgentCallTrace::new(self.name, "test", "1");
            if self.fail_on == Some(turn) {
                // Misbehaving agent: FAIL status but non-fallback content.
                return TurnReply {
                    text: "garbage".to_string(),
                    action: Some(Action::new(ActionType::WalkAway)),
                    used_strategies: Some(vec!["x".to_string()]),
                    trace: trace.with_validation(ValidationResult::fail("schema")),
                };
            }
            let (text, action) = (self.script)(turn);
            TurnReply {
                text,
                action,
                used_strategies: None,
                trace,
            }
        }
    }

    struct FixedArbiter {
        verdicts: Mutex<Vec<Option<Outcome>>>,
    }

    #[async_trait]
    impl ArbiterAgent for FixedArbiter {
        async fn evaluate_outcome(&self, _c: &AgentContext, _h: &[Message]) -> Verdict {
            let mut verdicts = self.verdicts.lock().expect("lock");
            let outcome = if verdicts.is_empty() {
                None
            } else {
                verdicts.remove(0)
            };
            Verdict {
                outcome,
                trace: AgentCallTrace::new("WorldAgent", "world_outcome_v1", "1"),
            }
        }

        async fn extract_signals(&self, _c: &AgentContext, _h: &[Message]) -> Extraction {
            Extraction {
                signals: SignalExtraction {
                    offers: vec![json!({"value_text": "100"})],
                    ..SignalExtraction::default()
                },
                trace: AgentCallTrace::new("WorldAgent", "world_extract_v1", "1"),
            }
        }

        async fn summarize_run(&self, _c: &AgentContext, _h: &[Message]) -> SummaryReply {
            SummaryReply {
                summary: RunSummary {
                    summary: "done".to_string(),
                    key_points: vec![],
                },
                trace: AgentCallTrace::new("WorldAgent", "world_summary_v1", "1")
                    .with_validation(ValidationResult::fail("timeout")),
            }
        }
    }

    fn case() -> Arc<CaseSnapshot> {
        let mut case = CaseSnapshot::new("case-engine", "Salary");
        case.issues = Some(vec![Issue {
            issue_id: "salary".to_string(),
            name: "Salary".to_string(),
            kind: "SALARY".to_string(),
            direction: IssueDirection::Maximize,
            unit: "USD".to_string(),
            bounds: None,
        }]);
        case.objectives.target = ObjectiveValue::single(100_000);
        case.objectives.reservation = ObjectiveValue::single(85_000);
        Arc::new(case)
    }

    fn agents(
        user: fn(u32) -> (String, Option<Action>),
        counter: fn(u32) -> (String, Option<Action>),
        verdicts: Vec<Option<Outcome>>,
        user_fail_on: Option<u32>,
    ) -> SimulationAgents {
        SimulationAgents::new(
            Arc::new(ScriptedAgent {
                name: "UserProxy",
                script: user,
                fail_on: user_fail_on,
            }),
            Arc::new(ScriptedAgent {
                name: "Counterparty",
                script: counter,
                fail_on: None,
            }),
            Arc::new(FixedArbiter {
                verdicts: Mutex::new(verdicts),
            }),
        )
    }

    fn params(max_turns: u32) -> RunParams {
        RunParams {
            run_id: "run-1".to_string(),
            seed: 11,
            session_id: "session-1".to_string(),
            max_turns,
        }
    }

    fn offer(turn: u32) -> (String, Option<Action>) {
        (format!("I propose {} dollars more", turn), None)
    }

    fn low_counter(_turn: u32) -> (String, Option<Action>) {
        ("We can do 90,000".to_string(), None)
    }

    #[tokio::test]
    async fn test_outcome_backfilled_onto_user_turn() {
        let engine = TurnEngine::new(
            case(),
            agents(offer, low_counter, vec![None, Some(Outcome::Pass)], None),
            Arc::new(QuestionBudget::new(0)),
            params(6),
            Vec::new(),
        );
        let result = engine.run().await;
        let turns = &result.run.turns;

        assert_eq!(result.run.status, RunStatus::Completed);
        assert_eq!(turns.len(), 4);
        // First round: no verdict, numeric evaluator sees 90,000 between reservation and target.
        assert_eq!(turns[0].outcome, Outcome::Neutral);
        assert_eq!(turns[1].outcome, Outcome::Neutral);
        assert_eq!(turns[2].outcome, Outcome::Pass);
        assert_eq!(turns[3].outcome, Outcome::Pass);
        assert_eq!(result.run.outcome, Outcome::Pass);
        assert_eq!(result.run.user_utility, 1.0);
        assert_eq!(turns[1].action.as_ref().map(|a| a.kind), Some(ActionType::CounterOffer));
    }

    #[tokio::test]
    async fn test_failed_trace_forces_fallback() {
        let engine = TurnEngine::new(
            case(),
            agents(offer, low_counter, vec![], Some(1)),
            Arc::new(QuestionBudget::new(0)),
            params(2),
            Vec::new(),
        );
        let result = engine.run().await;
        let first = &result.run.turns[0];

        assert!(first.message_text.starts_with("I'm looking to reach 100000"));
        assert_eq!(first.action.as_ref().map(|a| a.kind), Some(ActionType::ProposeOffer));
        assert_eq!(first.used_strategies, None);
        // User failure + summary failure.
        assert_eq!(result.trace_bundle.error_count(), 2);
        assert!(result.run.summary.is_none());
        assert_eq!(
            result.trace_bundle.run_trace.extraction.as_ref().map(|e| e.offers.len()),
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_ask_info_pauses_without_appending_turn() {
        fn asks_on_three(turn: u32) -> (String, Option<Action>) {
            if turn == 3 {
                (
                    "Before I answer, what is the signing bonus?".to_string(),
                    Some(Action::new(ActionType::AskInfo)),
                )
            } else {
                offer(turn)
            }
        }

        let engine = TurnEngine::new(
            case(),
            agents(asks_on_three, low_counter, vec![], None),
            Arc::new(QuestionBudget::new(1)),
            params(6),
            Vec::new(),
        );
        let result = engine.run().await;

        assert_eq!(result.run.status, RunStatus::Paused);
        assert_eq!(result.run.turns.len(), 2);
        let question = result.pending_question.expect("pending question");
        assert_eq!(question.question, "Before I answer, what is the signing bonus?");
        assert_eq!(question.asked_by, Speaker::User);
        assert_eq!(question.turn_index, 3);

        let pause = result.trace_bundle.run_trace.pause_state.expect("pause state");
        assert_eq!(pause.next_turn_index(), 3);
        assert_eq!(pause.round_user_turn_index(), None);
        // user, counterparty, arbiter, then the asking call.
        assert_eq!(pause.agent_call_traces().len(), 4);
        assert!(result.trace_bundle.run_trace.extraction.is_none());
    }

    #[tokio::test]
    async fn test_counterparty_ask_info_keeps_pending_slot() {
        fn asks(_turn: u32) -> (String, Option<Action>) {
            (
                String::new(),
                Some(Action::new(ActionType::AskInfo).with_payload("question", "Start date?")),
            )
        }

        let engine = TurnEngine::new(
            case(),
            agents(offer, asks, vec![], None),
            Arc::new(QuestionBudget::new(1)),
            params(4),
            Vec::new(),
        );
        let result = engine.run().await;
        let pause = result.trace_bundle.run_trace.pause_state.expect("pause state");

        assert_eq!(pause.next_turn_index(), 2);
        assert_eq!(pause.round_user_turn_index(), Some(0));
        assert_eq!(
            result.pending_question.map(|q| (q.asked_by, q.question)),
            Some((Speaker::Counterparty, "Start date?".to_string()))
        );
    }

    #[tokio::test]
    async fn test_empty_question_is_downgraded() {
        fn blank_ask(_turn: u32) -> (String, Option<Action>) {
            ("   ".to_string(), Some(Action::new(ActionType::AskInfo)))
        }

        let budget = Arc::new(QuestionBudget::new(3));
        let engine = TurnEngine::new(
            case(),
            agents(blank_ask, low_counter, vec![], None),
            Arc::clone(&budget),
            params(2),
            Vec::new(),
        );
        let result = engine.run().await;

        assert_eq!(result.run.status, RunStatus::Completed);
        assert_eq!(budget.used(), 0);
        assert_eq!(
            result.run.turns[0].action.as_ref().map(|a| a.kind),
            Some(ActionType::ProposeOffer)
        );
        assert_eq!(
            result.trace_bundle.agent_call_traces[0].parsed_output["action"]["type"],
            json!("PROPOSE_OFFER")
        );
    }

    #[tokio::test]
    async fn test_resume_rejects_invalid_request() {
        fn asks(turn: u32) -> (String, Option<Action>) {
            if turn == 1 {
                ("What is the budget?".to_string(), Some(Action::new(ActionType::AskInfo)))
            } else {
                offer(turn)
            }
        }

        let paused = TurnEngine::new(
            case(),
            agents(asks, low_counter, vec![], None),
            Arc::new(QuestionBudget::new(1)),
            params(4),
            Vec::new(),
        )
        .run()
        .await;

        let err = ResumeRequest::from_result(&paused, 2).expect_err("overspent");
        assert_eq!(err, ResumeError::BudgetExceeded { used: 2, max: 1 });

        let request = ResumeRequest::from_result(&paused, 1).expect("valid");
        assert!(TurnEngine::resume(
            case(),
            agents(offer, low_counter, vec![], None),
            request
        )
        .is_ok());
    }
}
