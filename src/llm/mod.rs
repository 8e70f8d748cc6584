//! LLM integration for negot-sim.
//!
//! The simulation core never talks to a model directly. This module provides
//! the provider abstraction used by the LLM-backed agents in
//! [`crate::agents`], plus an OpenRouter implementation.
//!
//! ```ignore
//! use negot_sim::llm::{GenerationRequest, LlmProvider, Message, OpenRouterProvider};
//!
//! let provider = OpenRouterProvider::with_model(api_key, "openai/gpt-4o-mini".to_string());
//! let request = GenerationRequest::new("", vec![Message::system("Reply in JSON")])
//!     .with_temperature(0.0)
//!     .with_json_output();
//! let response = provider.generate(request).await?;
//! ```

pub mod providers;
pub mod types;

pub use providers::OpenRouterProvider;
pub use types::{Choice, GenerationRequest, GenerationResponse, LlmProvider, Message, Usage};
