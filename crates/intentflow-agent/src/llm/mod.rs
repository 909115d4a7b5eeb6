//! LLM integration layer.
//!
//! - [`types`] -- provider-agnostic messages and requests.
//! - [`client`] -- HTTP client for the Anthropic and OpenAI APIs.

pub mod client;
pub mod types;

pub use client::{LlmClient, LlmClientConfig, LlmProvider};
pub use types::{ChatRequest, Message, Role};
