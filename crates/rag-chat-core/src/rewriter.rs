//! History-aware query rewriting.
//!
//! Follow-up questions ("When was it published?") are useless as retrieval
//! queries on their own. The rewriter asks the chat model to restate the
//! latest utterance as a standalone question using the conversation so far.
//!
//! The model's output is used verbatim. It is not checked to be a question,
//! and a model that answers instead of rewriting will simply degrade the
//! retrieval step that follows.

use std::sync::Arc;

use tracing::debug;

use crate::chat::{ChatModel, ChatRequest};
use crate::error::Result;
use crate::models::ConversationHistory;

pub const CONTEXTUALIZE_SYSTEM_PROMPT: &str = "\
Given a chat history and the latest user question which might reference context in the chat history, \
formulate a standalone question which can be understood without the chat history. \
Do NOT answer the question, just reformulate it if needed and otherwise return it as is.";

#[derive(Clone)]
pub struct QueryRewriter {
    chat: Arc<dyn ChatModel>,
    instruction: String,
}

impl QueryRewriter {
    pub fn new(chat: Arc<dyn ChatModel>) -> Self {
        Self {
            chat,
            instruction: CONTEXTUALIZE_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    /// Standalone form of `latest_utterance`.
    ///
    /// With an empty history there is nothing to resolve, so the utterance is
    /// returned unchanged and the chat model is not called.
    pub async fn rewrite(
        &self,
        history: &ConversationHistory,
        latest_utterance: &str,
    ) -> Result<String> {
        if history.is_empty() {
            return Ok(latest_utterance.to_string());
        }

        let request = ChatRequest {
            system: &self.instruction,
            history: history.turns(),
            input: latest_utterance,
        };
        let standalone = self.chat.generate(&request).await?;
        debug!(original = latest_utterance, standalone = %standalone, "rewrote query");
        Ok(standalone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RagError;
    use crate::models::Role;
    use crate::testing::ScriptedChat;

    fn history() -> ConversationHistory {
        let mut h = ConversationHistory::new();
        h.push_exchange("Who wrote Moby Dick?", "Herman Melville wrote Moby Dick.");
        h
    }

    #[tokio::test]
    async fn test_empty_history_returns_utterance() {
        let chat = Arc::new(ScriptedChat::empty());
        let rewriter = QueryRewriter::new(chat.clone());
        let q = rewriter
            .rewrite(&ConversationHistory::new(), "What is X?")
            .await
            .unwrap();
        assert_eq!(q, "What is X?");
        assert!(chat.calls().is_empty());
    }

    #[tokio::test]
    async fn test_request_shape() {
        let chat = Arc::new(ScriptedChat::new(["When was Moby Dick published?"]));
        let rewriter = QueryRewriter::new(chat.clone());
        let q = rewriter
            .rewrite(&history(), "When was it published?")
            .await
            .unwrap();
        assert_eq!(q, "When was Moby Dick published?");

        let calls = chat.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].system, CONTEXTUALIZE_SYSTEM_PROMPT);
        assert_eq!(calls[0].history.len(), 2);
        assert_eq!(calls[0].history[0].role, Role::User);
        assert_eq!(calls[0].input, "When was it published?");
    }

    #[tokio::test]
    async fn test_output_used_verbatim() {
        for adversarial in ["", "It was published in 1851.", "  padded  "] {
            let chat = Arc::new(ScriptedChat::new([adversarial]));
            let q = QueryRewriter::new(chat)
                .rewrite(&history(), "When was it published?")
                .await
                .unwrap();
            assert_eq!(q, adversarial);
        }
    }

    #[tokio::test]
    async fn test_generation_error_propagates() {
        let chat = Arc::new(ScriptedChat::empty());
        chat.push_error("timeout");
        let err = QueryRewriter::new(chat)
            .rewrite(&history(), "and then?")
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::GenerationService(_)));
    }
}
