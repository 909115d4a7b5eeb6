//! Language model access for intentflow.
//!
//! [`LlmClient`] talks to Anthropic or OpenAI-compatible APIs; everything
//! else in the workspace depends only on the [`TextGenerator`] trait.

pub mod error;
pub mod generator;
pub mod llm;

pub use error::{AgentError, Result};
pub use generator::{GENERATION_TEMPERATURE, TextGenerator};
pub use llm::{ChatRequest, LlmClient, LlmClientConfig, LlmProvider, Message, Role};
