//! LLM-backed implementations of the agent port.
//!
//! Every call renders a prompt, appends the conversation history block,
//! asks the provider for a JSON object and validates its shape. Any failure
//! along the way is recorded as a FAIL validation on the call trace and the
//! caller's fallback is returned instead.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::error::{AgentError, AgentResult};
use super::prompts::{
    PromptRegistry, COUNTERPARTY_PROMPT_ID, USER_PROXY_PROMPT_ID, WORLD_EXTRACT_PROMPT_ID,
    WORLD_OUTCOME_PROMPT_ID, WORLD_SUMMARY_PROMPT_ID,
};
use crate::llm::{GenerationRequest, LlmProvider, Message};
use crate::simulation::{
    Action, AgentCallTrace, AgentContext, ArbiterAgent, Extraction, Outcome, PromptVariables,
    RoleplayAgent, RunSummary, SignalExtraction, SimulationAgents, SimulationConfig, Speaker,
    SummaryReply, TurnFallback, TurnReply, ValidationResult, Verdict,
};

/// Agent name recorded on arbiter traces.
pub const WORLD_AGENT_NAME: &str = "WorldAgent";

const HISTORY_HEADER: &str = "CONVERSATION HISTORY (USER, COUNTERPARTY, WORLDAGENT):";

/// Model settings shared by the LLM agents.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmAgentConfig {
    /// Model id; empty uses the provider's default.
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for LlmAgentConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            temperature: 0.0,
            max_tokens: 1024,
        }
    }
}

impl LlmAgentConfig {
    pub fn from_simulation_config(config: &SimulationConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Builds the user message sent after the system prompt: the template's user
/// part followed by the labelled transcript.
///
/// History roles are relative to the calling agent: `assistant` lines are its
/// own side. The arbiter reads the transcript from the counterparty's side.
pub fn compose_user_payload(user_part: &str, history: &[Message], agent_name: &str) -> String {
    let agent_label = match agent_name {
        "UserProxy" => "USER".to_string(),
        "Counterparty" => "COUNTERPARTY".to_string(),
        WORLD_AGENT_NAME => "WORLDAGENT".to_string(),
        other => other.to_uppercase(),
    };
    let (assistant_label, user_label) = if agent_name == "UserProxy" {
        ("USER", "COUNTERPARTY")
    } else {
        ("COUNTERPARTY", "USER")
    };

    let mut lines = vec![HISTORY_HEADER.to_string()];
    if history.is_empty() {
        lines.push("None".to_string());
    } else {
        for message in history {
            let speaker = if message.is_assistant() {
                assistant_label
            } else {
                user_label
            };
            lines.push(format!("{}: {}", speaker, message.content));
        }
    }
    lines.push(format!("You are {} for this call.", agent_label));
    let history_block = lines.join("\n");

    [user_part.trim(), history_block.trim()]
        .into_iter()
        .filter(|section| !section.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Prompt rendering plus one provider round trip.
#[derive(Clone)]
struct PromptedCall {
    provider: Arc<dyn LlmProvider>,
    prompts: Arc<PromptRegistry>,
    config: LlmAgentConfig,
}

impl PromptedCall {
    /// Returns the trace (validation still PASS) and the parsed JSON object,
    /// or the trace and the error that stopped the call.
    async fn run(
        &self,
        agent_name: &str,
        prompt_id: &str,
        variables: &PromptVariables,
        history: &[Message],
    ) -> (AgentCallTrace, AgentResult<Map<String, Value>>) {
        let mut trace = AgentCallTrace::new(agent_name, prompt_id, "");
        trace.prompt_variables = variables.clone();

        let rendered = match self.prompts.render(prompt_id, variables) {
            Ok(rendered) => rendered,
            Err(e) => {
                trace.raw_output = format!("PROMPT_ERROR: {}", e);
                return (trace, Err(e));
            }
        };
        trace.prompt_version = rendered.prompt_version.clone();

        let (system, user_part) = rendered.split();
        let messages = vec![
            Message::system(system),
            Message::user(compose_user_payload(user_part, history, agent_name)),
        ];
        trace.prompt_text = system.to_string();
        trace.messages = messages.clone();
        trace.model_params = Some(json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        }));

        let request = GenerationRequest::new(self.config.model.clone(), messages)
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens)
            .with_json_output();

        let started = Instant::now();
        let response = match self.provider.generate(request).await {
            Ok(response) => response,
            Err(e) => {
                trace.latency_ms = Some(started.elapsed().as_secs_f64() * 1000.0);
                trace.raw_output = format!("LLM_ERROR: {}", e);
                return (trace, Err(e.into()));
            }
        };
        trace.latency_ms = Some(started.elapsed().as_secs_f64() * 1000.0);
        trace.token_usage = response.usage;

        let Some(content) = response.first_content() else {
            return (
                trace,
                Err(AgentError::ResponseParseError("Empty LLM response".to_string())),
            );
        };
        trace.raw_output = content.to_string();

        let parsed = crate::utils::extract_json_object(content).map_err(AgentError::from);
        (trace, parsed)
    }
}

// ============================================================================
// Roleplay
// ============================================================================

/// Validated roleplay reply.
#[derive(Debug, Clone, PartialEq)]
struct RoleplayOutput {
    message_text: String,
    action: Option<Action>,
    used_strategies: Option<Vec<String>>,
}

impl RoleplayOutput {
    fn parse(parsed: &Map<String, Value>) -> AgentResult<Self> {
        let message_text = parsed
            .get("message_text")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .ok_or_else(|| AgentError::InvalidOutput("missing message_text".to_string()))?;

        let action = parsed.get("action").and_then(Action::from_value);

        let used_strategies = parsed.get("used_strategies").and_then(|value| {
            value.as_array().map(|items| {
                items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect()
            })
        });

        Ok(Self {
            message_text: message_text.to_string(),
            action,
            used_strategies,
        })
    }

    fn to_parsed_output(&self) -> Map<String, Value> {
        let mut out = Map::new();
        out.insert(
            "action".into(),
            self.action.as_ref().map(Action::to_value).unwrap_or(Value::Null),
        );
        out.insert("message_text".into(), json!(self.message_text));
        out.insert("used_strategies".into(), json!(self.used_strategies));
        out
    }
}

fn fallback_output(fallback: &TurnFallback) -> Map<String, Value> {
    let mut out = Map::new();
    out.insert("action".into(), fallback.action.to_value());
    out.insert("message_text".into(), json!(fallback.text));
    out.insert("used_strategies".into(), json!([]));
    out
}

/// User proxy or counterparty backed by an LLM.
pub struct LlmRoleplayAgent {
    call: PromptedCall,
    speaker: Speaker,
    prompt_id: String,
}

impl std::fmt::Debug for LlmRoleplayAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmRoleplayAgent")
            .field("speaker", &self.speaker)
            .field("prompt_id", &self.prompt_id)
            .field("config", &self.call.config)
            .finish_non_exhaustive()
    }
}

impl LlmRoleplayAgent {
    pub fn new(
        speaker: Speaker,
        provider: Arc<dyn LlmProvider>,
        prompts: Arc<PromptRegistry>,
        config: LlmAgentConfig,
    ) -> Self {
        let prompt_id = match speaker {
            Speaker::User => USER_PROXY_PROMPT_ID,
            Speaker::Counterparty => COUNTERPARTY_PROMPT_ID,
        };
        Self {
            call: PromptedCall {
                provider,
                prompts,
                config,
            },
            speaker,
            prompt_id: prompt_id.to_string(),
        }
    }

    pub fn user_proxy(
        provider: Arc<dyn LlmProvider>,
        prompts: Arc<PromptRegistry>,
        config: LlmAgentConfig,
    ) -> Self {
        Self::new(Speaker::User, provider, prompts, config)
    }

    pub fn counterparty(
        provider: Arc<dyn LlmProvider>,
        prompts: Arc<PromptRegistry>,
        config: LlmAgentConfig,
    ) -> Self {
        Self::new(Speaker::Counterparty, provider, prompts, config)
    }

    pub fn with_prompt_id(mut self, prompt_id: impl Into<String>) -> Self {
        self.prompt_id = prompt_id.into();
        self
    }

    pub fn speaker(&self) -> Speaker {
        self.speaker
    }
}

#[async_trait]
impl RoleplayAgent for LlmRoleplayAgent {
    async fn produce_turn(
        &self,
        context: &AgentContext,
        fallback: &TurnFallback,
        history: &[Message],
    ) -> TurnReply {
        let agent_name = self.speaker.agent_name();
        let (trace, parsed) = self
            .call
            .run(agent_name, &self.prompt_id, &context.variables, history)
            .await;

        match parsed.and_then(|p| RoleplayOutput::parse(&p)) {
            Ok(output) => {
                debug!(
                    run_id = %context.run_id,
                    agent = agent_name,
                    action = output.action.as_ref().map(|a| a.kind.as_str()).unwrap_or("none"),
                    "Roleplay turn produced"
                );
                let trace = trace.with_parsed_output(output.to_parsed_output());
                TurnReply {
                    text: output.message_text,
                    action: output.action,
                    used_strategies: output.used_strategies,
                    trace,
                }
            }
            Err(e) => {
                warn!(
                    run_id = %context.run_id,
                    turn_index = ?context.turn_index,
                    agent = agent_name,
                    error = %e,
                    "Roleplay call failed, using fallback"
                );
                let trace = trace
                    .with_parsed_output(fallback_output(fallback))
                    .with_validation(ValidationResult::fail(e.to_string()));
                TurnReply::fallback(fallback, trace)
            }
        }
    }
}

// ============================================================================
// Arbiter
// ============================================================================

/// World agent backed by an LLM.
pub struct LlmArbiterAgent {
    call: PromptedCall,
}

impl std::fmt::Debug for LlmArbiterAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmArbiterAgent")
            .field("config", &self.call.config)
            .finish_non_exhaustive()
    }
}

impl LlmArbiterAgent {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        prompts: Arc<PromptRegistry>,
        config: LlmAgentConfig,
    ) -> Self {
        Self {
            call: PromptedCall {
                provider,
                prompts,
                config,
            },
        }
    }

    fn failed(trace: AgentCallTrace, fallback: Map<String, Value>, err: &AgentError) -> AgentCallTrace {
        trace
            .with_parsed_output(fallback)
            .with_validation(ValidationResult::fail(err.to_string()))
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn empty_extraction() -> Map<String, Value> {
    match serde_json::to_value(SignalExtraction::default()) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

#[async_trait]
impl ArbiterAgent for LlmArbiterAgent {
    async fn evaluate_outcome(&self, context: &AgentContext, history: &[Message]) -> Verdict {
        let (trace, parsed) = self
            .call
            .run(WORLD_AGENT_NAME, WORLD_OUTCOME_PROMPT_ID, &context.variables, history)
            .await;

        let parsed = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(run_id = %context.run_id, error = %e, "Outcome evaluation failed");
                let mut fallback = Map::new();
                fallback.insert("outcome".into(), json!(Outcome::Neutral.as_str()));
                return Verdict {
                    outcome: None,
                    trace: Self::failed(trace, fallback, &e),
                };
            }
        };

        let outcome = parsed
            .get("outcome")
            .and_then(Value::as_str)
            .and_then(|raw| raw.parse::<Outcome>().ok());
        let mut output = Map::new();
        output.insert(
            "outcome".into(),
            json!(outcome.unwrap_or_default().as_str()),
        );
        output.insert(
            "reason".into(),
            parsed.get("reason").cloned().unwrap_or(Value::Null),
        );

        Verdict {
            outcome,
            trace: trace.with_parsed_output(output),
        }
    }

    async fn extract_signals(&self, context: &AgentContext, history: &[Message]) -> Extraction {
        let (trace, parsed) = self
            .call
            .run(WORLD_AGENT_NAME, WORLD_EXTRACT_PROMPT_ID, &context.variables, history)
            .await;

        let signals = parsed.and_then(|parsed| {
            serde_json::from_value::<SignalExtraction>(Value::Object(parsed))
                .map_err(|e| AgentError::InvalidOutput(e.to_string()))
        });

        match signals {
            Ok(signals) => {
                let output = match serde_json::to_value(&signals) {
                    Ok(Value::Object(map)) => map,
                    _ => Map::new(),
                };
                Extraction {
                    signals,
                    trace: trace.with_parsed_output(output),
                }
            }
            Err(e) => {
                warn!(run_id = %context.run_id, error = %e, "Signal extraction failed");
                Extraction {
                    signals: SignalExtraction::default(),
                    trace: Self::failed(trace, empty_extraction(), &e),
                }
            }
        }
    }

    async fn summarize_run(&self, context: &AgentContext, history: &[Message]) -> SummaryReply {
        let (trace, parsed) = self
            .call
            .run(WORLD_AGENT_NAME, WORLD_SUMMARY_PROMPT_ID, &context.variables, history)
            .await;

        let summary = parsed.and_then(|parsed| {
            let summary = parsed
                .get("summary")
                .and_then(Value::as_str)
                .ok_or_else(|| AgentError::InvalidOutput("missing summary".to_string()))?;
            Ok(RunSummary {
                summary: summary.to_string(),
                key_points: string_list(parsed.get("key_points")),
            })
        });

        match summary {
            Ok(summary) => {
                let mut output = Map::new();
                output.insert("summary".into(), json!(summary.summary));
                output.insert("key_points".into(), json!(summary.key_points));
                SummaryReply {
                    summary,
                    trace: trace.with_parsed_output(output),
                }
            }
            Err(e) => {
                warn!(run_id = %context.run_id, error = %e, "Run summary failed");
                let mut fallback = Map::new();
                fallback.insert("summary".into(), json!(""));
                fallback.insert("key_points".into(), json!([]));
                SummaryReply {
                    summary: RunSummary::default(),
                    trace: Self::failed(trace, fallback, &e),
                }
            }
        }
    }
}

/// User proxy, counterparty and arbiter sharing one provider and registry.
pub fn llm_simulation_agents(
    provider: Arc<dyn LlmProvider>,
    prompts: Arc<PromptRegistry>,
    config: LlmAgentConfig,
) -> SimulationAgents {
    SimulationAgents::new(
        Arc::new(LlmRoleplayAgent::user_proxy(
            Arc::clone(&provider),
            Arc::clone(&prompts),
            config.clone(),
        )),
        Arc::new(LlmRoleplayAgent::counterparty(
            Arc::clone(&provider),
            Arc::clone(&prompts),
            config.clone(),
        )),
        Arc::new(LlmArbiterAgent::new(provider, prompts, config)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::{Choice, GenerationResponse, Usage};
    use crate::simulation::{ActionType, ValidationStatus};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Mock LLM provider replaying scripted replies and recording requests.
    struct MockLlmProvider {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        requests: Mutex<Vec<GenerationRequest>>,
    }

    impl MockLlmProvider {
        fn new(replies: Vec<Result<String, LlmError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn replying(content: &str) -> Arc<Self> {
            Arc::new(Self::new(vec![Ok(content.to_string())]))
        }

        fn last_request(&self) -> GenerationRequest {
            self.requests
                .lock()
                .expect("lock not poisoned")
                .last()
                .cloned()
                .expect("a request was sent")
        }
    }

    #[async_trait]
    impl LlmProvider for MockLlmProvider {
        async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
            self.requests.lock().expect("lock not poisoned").push(request);
            let reply = self
                .replies
                .lock()
                .expect("lock not poisoned")
                .pop_front()
                .unwrap_or(Err(LlmError::EmptyResponse))?;
            Ok(GenerationResponse {
                id: "mock-id".to_string(),
                model: "mock-model".to_string(),
                choices: vec![Choice {
                    index: 0,
                    message: Message::assistant(reply),
                    finish_reason: "stop".to_string(),
                }],
                usage: Some(Usage {
                    prompt_tokens: 100,
                    completion_tokens: 20,
                    total_tokens: 120,
                }),
            })
        }
    }

    fn user_vars() -> PromptVariables {
        [
            ("topic", json!("Senior engineer offer")),
            ("domain", json!("EMPLOYMENT")),
            ("channel", json!("EMAIL")),
            ("issues_table", json!("- salary (MAXIMIZE)")),
            ("parameters_table", json!("None")),
            ("target_summary", json!("salary=150000")),
            ("reservation_summary", json!("salary=120000")),
            ("clarifications", json!("None")),
            ("ask_info_budget_remaining", json!(1)),
            ("strategy_suggestions", json!("None")),
            ("counterparty_assumptions_summary", json!("None")),
            ("primary_issue_id", json!("salary")),
            ("primary_issue_direction", json!("MAXIMIZE")),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    fn context() -> AgentContext {
        AgentContext::new("run-1", Some(1), user_vars())
    }

    fn fallback() -> TurnFallback {
        TurnFallback {
            text: "fallback text".to_string(),
            action: Action::new(ActionType::ProposeOffer),
        }
    }

    fn user_agent(provider: Arc<MockLlmProvider>) -> LlmRoleplayAgent {
        LlmRoleplayAgent::user_proxy(
            provider,
            Arc::new(PromptRegistry::builtin()),
            LlmAgentConfig::default().with_model("mock-model"),
        )
    }

    fn arbiter(provider: Arc<MockLlmProvider>) -> LlmArbiterAgent {
        LlmArbiterAgent::new(
            provider,
            Arc::new(PromptRegistry::builtin()),
            LlmAgentConfig::default(),
        )
    }

    #[test]
    fn test_compose_user_payload_labels() {
        let history = vec![
            Message::assistant("I want 150k"),
            Message::user("We can do 130k"),
        ];
        let payload = compose_user_payload("Write the next message.", &history, "UserProxy");
        assert_eq!(
            payload,
            "Write the next message.\n\n\
             CONVERSATION HISTORY (USER, COUNTERPARTY, WORLDAGENT):\n\
             USER: I want 150k\n\
             COUNTERPARTY: We can do 130k\n\
             You are USER for this call."
        );

        let world = compose_user_payload("", &history, WORLD_AGENT_NAME);
        assert!(world.starts_with(HISTORY_HEADER));
        assert!(world.contains("COUNTERPARTY: I want 150k"));
        assert!(world.contains("USER: We can do 130k"));
        assert!(world.ends_with("You are WORLDAGENT for this call."));
    }

    #[test]
    fn test_compose_user_payload_empty_history() {
        let payload = compose_user_payload("", &[], "Counterparty");
        assert_eq!(
            payload,
            format!("{}\nNone\nYou are COUNTERPARTY for this call.", HISTORY_HEADER)
        );
    }

    #[tokio::test]
    async fn test_produce_turn_parses_reply() {
        let provider = MockLlmProvider::replying(
            r#"```json
{"message_text": "Could you confirm the start date?", "action": {"type": "ActionType.ask_info", "payload": {"question": "When can you start?"}}, "used_strategies": ["anchor", 7]}
```"#,
        );
        let agent = user_agent(Arc::clone(&provider));
        let reply = agent.produce_turn(&context(), &fallback(), &[]).await;

        assert_eq!(reply.text, "Could you confirm the start date?");
        let action = reply.action.expect("action");
        assert_eq!(action.kind, ActionType::AskInfo);
        assert_eq!(action.question(), Some("When can you start?"));
        assert_eq!(
            reply.used_strategies,
            Some(vec!["anchor".to_string(), "7".to_string()])
        );
        assert_eq!(reply.trace.validation_result.status, ValidationStatus::Pass);
        assert_eq!(reply.trace.agent_name, "UserProxy");
        assert_eq!(reply.trace.prompt_id, USER_PROXY_PROMPT_ID);
        assert_eq!(reply.trace.prompt_version, "1");
        assert_eq!(reply.trace.token_usage.map(|u| u.total_tokens), Some(120));
        assert_eq!(reply.trace.parsed_output["action"]["type"], "ASK_INFO");

        let request = provider.last_request();
        assert!(request.json_output);
        assert_eq!(request.model, "mock-model");
        assert_eq!(request.messages.len(), 2);
        assert!(request.messages[0].content.contains("Questions remaining in this session: 1"));
        assert!(request.messages[1].content.ends_with("You are USER for this call."));
    }

    #[tokio::test]
    async fn test_produce_turn_malformed_action_is_none() {
        let provider =
            MockLlmProvider::replying(r#"{"message_text": "Deal?", "action": {"type": "HUG"}}"#);
        let reply = user_agent(provider)
            .produce_turn(&context(), &fallback(), &[])
            .await;
        assert_eq!(reply.text, "Deal?");
        assert!(reply.action.is_none());
        assert!(reply.used_strategies.is_none());
        assert!(!reply.trace.is_fail());
    }

    #[tokio::test]
    async fn test_produce_turn_falls_back_on_provider_error() {
        let provider = Arc::new(MockLlmProvider::new(vec![Err(LlmError::RequestFailed(
            "connection reset".to_string(),
        ))]));
        let reply = user_agent(provider)
            .produce_turn(&context(), &fallback(), &[])
            .await;

        assert_eq!(reply.text, "fallback text");
        assert_eq!(reply.action.map(|a| a.kind), Some(ActionType::ProposeOffer));
        assert!(reply.trace.is_fail());
        assert!(reply.trace.raw_output.starts_with("LLM_ERROR:"));
        assert_eq!(reply.trace.parsed_output["message_text"], "fallback text");
    }

    #[tokio::test]
    async fn test_produce_turn_falls_back_on_missing_text() {
        let provider = MockLlmProvider::replying(r#"{"action": {"type": "ACCEPT"}}"#);
        let reply = user_agent(provider)
            .produce_turn(&context(), &fallback(), &[])
            .await;
        assert_eq!(reply.text, "fallback text");
        assert!(reply.trace.is_fail());
        assert!(reply
            .trace
            .validation_result
            .reason
            .as_deref()
            .unwrap_or_default()
            .contains("message_text"));
    }

    #[tokio::test]
    async fn test_produce_turn_falls_back_on_render_error() {
        let provider = MockLlmProvider::replying(r#"{"message_text": "hi"}"#);
        let agent = user_agent(Arc::clone(&provider));
        let ctx = AgentContext::new("run-1", Some(1), PromptVariables::new());
        let reply = agent.produce_turn(&ctx, &fallback(), &[]).await;
        assert!(reply.trace.is_fail());
        assert!(reply.trace.raw_output.starts_with("PROMPT_ERROR:"));
        assert!(provider.requests.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn test_evaluate_outcome() {
        let provider = MockLlmProvider::replying(r#"{"outcome": "pass", "reason": "met target"}"#);
        let verdict = arbiter(provider)
            .evaluate_outcome(&context(), &[Message::user("150k works")])
            .await;
        assert_eq!(verdict.outcome, Some(Outcome::Pass));
        assert_eq!(verdict.trace.agent_name, WORLD_AGENT_NAME);
        assert_eq!(verdict.trace.parsed_output["outcome"], "PASS");
        assert_eq!(verdict.trace.parsed_output["reason"], "met target");
    }

    #[tokio::test]
    async fn test_evaluate_outcome_unknown_label_is_no_verdict() {
        let provider = MockLlmProvider::replying(r#"{"outcome": "MAYBE"}"#);
        let verdict = arbiter(provider).evaluate_outcome(&context(), &[]).await;
        assert_eq!(verdict.outcome, None);
        assert!(!verdict.trace.is_fail());
        assert_eq!(verdict.trace.parsed_output["outcome"], "NEUTRAL");
    }

    #[tokio::test]
    async fn test_evaluate_outcome_failure() {
        let provider = MockLlmProvider::replying("no json here");
        let verdict = arbiter(provider).evaluate_outcome(&context(), &[]).await;
        assert_eq!(verdict.outcome, None);
        assert!(verdict.trace.is_fail());
    }

    #[tokio::test]
    async fn test_extract_signals() {
        let provider = MockLlmProvider::replying(
            r#"{"offers": [{"issue_id": "salary", "value_text": "140k", "speaker": "COUNTERPARTY"}], "asks": []}"#,
        );
        let extraction = arbiter(provider).extract_signals(&context(), &[]).await;
        assert_eq!(extraction.signals.offers.len(), 1);
        assert!(extraction.signals.concessions.is_empty());
        assert!(!extraction.trace.is_fail());
        assert_eq!(extraction.trace.prompt_id, WORLD_EXTRACT_PROMPT_ID);
    }

    #[tokio::test]
    async fn test_extract_signals_bad_shape() {
        let provider = MockLlmProvider::replying(r#"{"offers": "lots"}"#);
        let extraction = arbiter(provider).extract_signals(&context(), &[]).await;
        assert_eq!(extraction.signals, SignalExtraction::default());
        assert!(extraction.trace.is_fail());
        assert_eq!(extraction.trace.parsed_output["offers"], json!([]));
    }

    #[tokio::test]
    async fn test_summarize_run() {
        let provider = MockLlmProvider::replying(
            r#"{"summary": "Settled at 140k.", "key_points": ["anchored high", 3]}"#,
        );
        let reply = arbiter(provider).summarize_run(&context(), &[]).await;
        assert_eq!(reply.summary.summary, "Settled at 140k.");
        assert_eq!(reply.summary.key_points, vec!["anchored high".to_string()]);
        assert!(!reply.trace.is_fail());
    }

    #[tokio::test]
    async fn test_summarize_run_missing_summary() {
        let provider = MockLlmProvider::replying(r#"{"key_points": []}"#);
        let reply = arbiter(provider).summarize_run(&context(), &[]).await;
        assert_eq!(reply.summary, RunSummary::default());
        assert!(reply.trace.is_fail());
    }
}
