//! Chat model trait.
//!
//! A chat model takes a system instruction, prior conversation turns, and
//! one new input, and returns generated text. Nothing else: no tool calls,
//! no structured output, no streaming.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Turn;

/// One generation call.
#[derive(Debug, Clone, Copy)]
pub struct ChatRequest<'a> {
    pub system: &'a str,
    /// Prior turns, oldest first.
    pub history: &'a [Turn],
    /// The final user input.
    pub input: &'a str,
}

/// Generates text from a [`ChatRequest`].
///
/// Output is untrusted free text: callers must not assume it follows the
/// system instruction. Failures are reported as
/// [`RagError::GenerationService`](crate::error::RagError::GenerationService)
/// and are not retried by the core.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Returns the model identifier (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;

    async fn generate(&self, request: &ChatRequest<'_>) -> Result<String>;
}
