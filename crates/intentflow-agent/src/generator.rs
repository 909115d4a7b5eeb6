//! The text generation seam.
//!
//! Intent classification, approval messages and `ai_processing` steps only
//! need "system prompt + user prompt in, text out".  [`TextGenerator`] is
//! that contract; [`LlmClient`] is the production implementation and tests
//! substitute scripted generators.

use async_trait::async_trait;

use crate::error::Result;
use crate::llm::{ChatRequest, LlmClient, Message};

/// Default sampling temperature; replies should be stable.
pub const GENERATION_TEMPERATURE: f32 = 0.1;

/// Produces a text reply for a system and user prompt.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, system: &str, prompt: &str) -> Result<String>;
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn generate(&self, system: &str, prompt: &str) -> Result<String> {
        let mut messages = Vec::with_capacity(2);
        if !system.is_empty() {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(prompt));

        let request = ChatRequest::new(messages).with_temperature(self.temperature());
        self.chat(&request).await
    }
}
