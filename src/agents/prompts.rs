//! Prompt registry for the negotiation agents.
//!
//! Five templates ship built in. A directory of `*.md` files can override or
//! extend them; each file may start with a small header:
//!
//! ```text
//! prompt_id: counterparty_v1
//! prompt_version: 3
//! ---
//! You are the counterparty in {{ topic }} ...
//! ```
//!
//! Without a header the file stem is the prompt id and the version is `1`.
//! Templates use Tera syntax. The marker [`PROMPT_SPLIT`] separates the
//! system part of a template from the part sent as the user message.

use std::collections::BTreeMap;
use std::path::Path;

use tera::{Context, Tera};
use walkdir::WalkDir;

use super::error::{AgentError, AgentResult};
use crate::simulation::PromptVariables;

/// Separates the system prompt from the user prompt inside a template.
pub const PROMPT_SPLIT: &str = "<<PROMPT_SPLIT>>";

pub const USER_PROXY_PROMPT_ID: &str = "user_proxy_v1";
pub const COUNTERPARTY_PROMPT_ID: &str = "counterparty_v1";
pub const WORLD_OUTCOME_PROMPT_ID: &str = "world_outcome_v1";
pub const WORLD_EXTRACT_PROMPT_ID: &str = "world_extract_v1";
pub const WORLD_SUMMARY_PROMPT_ID: &str = "world_summary_v1";

const USER_PROXY_TEMPLATE: &str = r#"You are the USER in a {{ domain }} negotiation about: {{ topic }}.
Channel: {{ channel }}.

Negotiate on the user's behalf. Aim for the target, never accept anything worse than the reservation.

ISSUES:
{{ issues_table }}

PARAMETERS:
{{ parameters_table }}

TARGET: {{ target_summary }}
RESERVATION: {{ reservation_summary }}

CLARIFICATIONS FROM THE USER:
{{ clarifications }}

STRATEGY SUGGESTIONS (optional, cite ids you use):
{{ strategy_suggestions }}

You may ask the real user one clarifying question with action type ASK_INFO and payload {"question": "..."}.
Questions remaining in this session: {{ ask_info_budget_remaining }}. Do not ask when it is 0.

Respond with ONLY a JSON object:
{"message_text": "<what you say>", "action": {"type": "PROPOSE_OFFER", "payload": {}}, "used_strategies": ["<strategy_id>"]}

Allowed action types: PROPOSE_OFFER, COUNTER_OFFER, ACCEPT, REJECT, ASK_INFO, PROVIDE_INFO, MAKE_CONCESSION, REQUEST_CONCESSION, PROPOSE_PACKAGE, TRADE, ANCHOR, WALK_AWAY, SUMMARIZE, OTHER.
<<PROMPT_SPLIT>>
Write the user's next message."#;

const COUNTERPARTY_TEMPLATE: &str = r#"You are the COUNTERPARTY in a {{ domain }} negotiation about: {{ topic }}.
Channel: {{ channel }}.

Stay in character. Protect your side's interests and make realistic counteroffers.

ISSUES:
{{ issues_table }}

WHAT YOU KNOW ABOUT YOUR POSITION:
{{ counterparty_assumptions_summary }}

CLARIFICATIONS:
{{ clarifications }}

STRATEGY SUGGESTIONS (optional, cite ids you use):
{{ strategy_suggestions }}

Respond with ONLY a JSON object:
{"message_text": "<what you say>", "action": {"type": "COUNTER_OFFER", "payload": {}}, "used_strategies": ["<strategy_id>"]}

Allowed action types: PROPOSE_OFFER, COUNTER_OFFER, ACCEPT, REJECT, ASK_INFO, PROVIDE_INFO, MAKE_CONCESSION, REQUEST_CONCESSION, PROPOSE_PACKAGE, TRADE, ANCHOR, WALK_AWAY, SUMMARIZE, OTHER.
<<PROMPT_SPLIT>>
Write the counterparty's next message."#;

const WORLD_OUTCOME_TEMPLATE: &str = r#"You are the WORLDAGENT, a neutral referee for a {{ domain }} negotiation about: {{ topic }}.

ISSUES:
{{ issues_table }}

USER TARGET: {{ target_summary }}
USER RESERVATION: {{ reservation_summary }}
PRIMARY ISSUE: {{ primary_issue_id }} ({{ primary_issue_direction }})

Judge the latest round from the user's point of view:
- PASS: the counterparty's latest position meets the user's target
- FAIL: talks broke down or the position is worse than the reservation
- NEUTRAL: the negotiation is still open

Respond with ONLY a JSON object:
{"outcome": "PASS|FAIL|NEUTRAL", "reason": "<one sentence>"}
<<PROMPT_SPLIT>>
Evaluate the latest round."#;

const WORLD_EXTRACT_TEMPLATE: &str = r#"You are the WORLDAGENT. Extract structured signals from a finished {{ domain }} negotiation about: {{ topic }}.

ISSUES:
{{ issues_table }}

Respond with ONLY a JSON object with these lists (use [] when none):
{"offers": [{"issue_id": "...", "value_text": "...", "speaker": "USER|COUNTERPARTY", "turn_index": 1}],
 "concessions": [], "packages": [], "asks": [], "objections": [], "arguments": []}
<<PROMPT_SPLIT>>
Extract the signals from the conversation."#;

const WORLD_SUMMARY_TEMPLATE: &str = r#"You are the WORLDAGENT. Summarize a finished {{ domain }} negotiation about: {{ topic }}.

ISSUES:
{{ issues_table }}

Respond with ONLY a JSON object:
{"summary": "<two or three sentences>", "key_points": ["<point>"]}
<<PROMPT_SPLIT>>
Summarize the conversation."#;

/// A registered prompt template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    pub prompt_id: String,
    pub prompt_version: String,
    pub template: String,
}

impl PromptTemplate {
    pub fn new(
        prompt_id: impl Into<String>,
        prompt_version: impl Into<String>,
        template: impl Into<String>,
    ) -> Self {
        Self {
            prompt_id: prompt_id.into(),
            prompt_version: prompt_version.into(),
            template: template.into(),
        }
    }

    /// Parses a markdown prompt file with an optional header.
    pub fn parse(default_id: &str, content: &str) -> Self {
        let lines: Vec<&str> = content.lines().collect();
        let mut prompt_id = default_id.to_string();
        let mut prompt_version = "1".to_string();
        let mut idx = 0;

        if let Some(id) = lines.first().and_then(|l| l.strip_prefix("prompt_id:")) {
            prompt_id = id.trim().to_string();
            idx = 1;
        }
        if let Some(version) = lines.get(idx).and_then(|l| l.strip_prefix("prompt_version:")) {
            prompt_version = version.trim().to_string();
            idx += 1;
        }
        if lines.get(idx).map(|l| l.trim() == "---").unwrap_or(false) {
            idx += 1;
        }

        Self {
            prompt_id,
            prompt_version,
            template: lines[idx.min(lines.len())..].join("\n"),
        }
    }
}

/// A template rendered with a call's variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub prompt_id: String,
    pub prompt_version: String,
    pub text: String,
}

impl RenderedPrompt {
    /// Splits into `(system, user)` at [`PROMPT_SPLIT`]. Without the marker
    /// the whole text is the system part.
    pub fn split(&self) -> (&str, &str) {
        match self.text.split_once(PROMPT_SPLIT) {
            Some((system, user)) => (system.trim_end(), user.trim_start()),
            None => (self.text.trim(), ""),
        }
    }
}

/// Prompt templates by id.
#[derive(Debug, Clone)]
pub struct PromptRegistry {
    templates: BTreeMap<String, PromptTemplate>,
}

impl Default for PromptRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PromptRegistry {
    /// Registry holding only the built-in templates.
    pub fn builtin() -> Self {
        let mut registry = Self {
            templates: BTreeMap::new(),
        };
        for (id, template) in [
            (USER_PROXY_PROMPT_ID, USER_PROXY_TEMPLATE),
            (COUNTERPARTY_PROMPT_ID, COUNTERPARTY_TEMPLATE),
            (WORLD_OUTCOME_PROMPT_ID, WORLD_OUTCOME_TEMPLATE),
            (WORLD_EXTRACT_PROMPT_ID, WORLD_EXTRACT_TEMPLATE),
            (WORLD_SUMMARY_PROMPT_ID, WORLD_SUMMARY_TEMPLATE),
        ] {
            registry.insert(PromptTemplate::new(id, "1", template));
        }
        registry
    }

    /// Built-in templates overridden by every `*.md` file directly inside `dir`.
    pub fn load_dir(dir: impl AsRef<Path>) -> AgentResult<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(AgentError::PromptDirectory(format!(
                "{} is not a directory",
                dir.display()
            )));
        }

        let mut registry = Self::builtin();
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| AgentError::PromptDirectory(e.to_string()))?;
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|e| e.to_str()) != Some("md")
            {
                continue;
            }
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default();
            let content = std::fs::read_to_string(path)?;
            let template = PromptTemplate::parse(stem, &content);
            tracing::debug!(
                prompt_id = %template.prompt_id,
                prompt_version = %template.prompt_version,
                path = %path.display(),
                "Loaded prompt override"
            );
            registry.insert(template);
        }
        Ok(registry)
    }

    pub fn insert(&mut self, template: PromptTemplate) {
        self.templates.insert(template.prompt_id.clone(), template);
    }

    pub fn get(&self, prompt_id: &str) -> Option<&PromptTemplate> {
        self.templates.get(prompt_id)
    }

    /// `(prompt_id, prompt_version)` pairs in id order.
    pub fn versions(&self) -> Vec<(&str, &str)> {
        self.templates
            .values()
            .map(|t| (t.prompt_id.as_str(), t.prompt_version.as_str()))
            .collect()
    }

    pub fn render(&self, prompt_id: &str, variables: &PromptVariables) -> AgentResult<RenderedPrompt> {
        let template = self
            .get(prompt_id)
            .ok_or_else(|| AgentError::PromptNotFound(prompt_id.to_string()))?;

        let mut context = Context::new();
        for (key, value) in variables {
            context.insert(key.as_str(), value);
        }

        let text = Tera::one_off(&template.template, &context, false).map_err(|e| {
            AgentError::PromptRender {
                prompt_id: prompt_id.to_string(),
                reason: e.to_string(),
            }
        })?;

        Ok(RenderedPrompt {
            prompt_id: template.prompt_id.clone(),
            prompt_version: template.prompt_version.clone(),
            text,
        })
    }
}
