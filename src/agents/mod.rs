//! LLM-backed negotiation agents.
//!
//! - **LlmRoleplayAgent**: user proxy or counterparty, one JSON turn per call
//! - **LlmArbiterAgent**: round verdicts, signal extraction and run summaries
//! - **PromptRegistry**: built-in Tera templates with directory overrides
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use negot_sim::agents::{llm_simulation_agents, LlmAgentConfig, PromptRegistry};
//! use negot_sim::llm::OpenRouterProvider;
//!
//! let provider = Arc::new(OpenRouterProvider::from_env("openai/gpt-4o-mini")?);
//! let agents = llm_simulation_agents(
//!     provider,
//!     Arc::new(PromptRegistry::builtin()),
//!     LlmAgentConfig::default().with_model("openai/gpt-4o-mini"),
//! );
//! ```

pub mod error;
pub mod llm_agent;
pub mod prompts;

pub use error::{AgentError, AgentResult};
pub use llm_agent::{
    compose_user_payload, llm_simulation_agents, LlmAgentConfig, LlmArbiterAgent,
    LlmRoleplayAgent, WORLD_AGENT_NAME,
};
pub use prompts::{PromptRegistry, PromptTemplate, RenderedPrompt, PROMPT_SPLIT};
