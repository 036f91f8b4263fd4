//! Grounded answer synthesis ("stuff" the passages into the system prompt).
//!
//! Retrieved passages are joined, in retrieval order, into one context block
//! substituted into the instruction. The three-sentence limit is requested,
//! not enforced.

use std::sync::Arc;

use crate::chat::{ChatModel, ChatRequest};
use crate::error::Result;
use crate::models::{ConversationHistory, RetrievedPassage};

/// Placeholder replaced by the joined passages.
pub const CONTEXT_PLACEHOLDER: &str = "{context}";

pub const QA_SYSTEM_PROMPT: &str = "\
You are an assistant for question-answering tasks. Use the following pieces of retrieved context to answer the question. \
If you don't know the answer, just say that you don't know. Use three sentences maximum and keep the answer concise.

{context}";

/// Separator placed between passages in the context block.
pub const PASSAGE_SEPARATOR: &str = "\n\n";

#[derive(Clone)]
pub struct AnswerSynthesizer {
    chat: Arc<dyn ChatModel>,
    template: String,
}

impl AnswerSynthesizer {
    pub fn new(chat: Arc<dyn ChatModel>) -> Self {
        Self {
            chat,
            template: QA_SYSTEM_PROMPT.to_string(),
        }
    }

    /// Replace the instruction template. It should contain
    /// [`CONTEXT_PLACEHOLDER`]; without it the passages are appended.
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    /// The system instruction sent for these passages.
    pub fn system_prompt(&self, passages: &[RetrievedPassage]) -> String {
        let context = passages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join(PASSAGE_SEPARATOR);

        if self.template.contains(CONTEXT_PLACEHOLDER) {
            self.template.replace(CONTEXT_PLACEHOLDER, &context)
        } else {
            format!("{}\n\n{}", self.template, context)
        }
    }

    /// Generate an answer to `latest_utterance` from `passages`.
    ///
    /// Empty `passages` is valid; the model is expected to say it doesn't know.
    pub async fn answer(
        &self,
        passages: &[RetrievedPassage],
        history: &ConversationHistory,
        latest_utterance: &str,
    ) -> Result<String> {
        let system = self.system_prompt(passages);
        let request = ChatRequest {
            system: &system,
            history: history.turns(),
            input: latest_utterance,
        };
        self.chat.generate(&request).await
    }
}
