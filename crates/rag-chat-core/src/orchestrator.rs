//! Per-turn RAG pipeline.
//!
//! [`RagChain::turn`] runs one exchange, in order:
//!
//! 1. rewrite the utterance into a standalone query,
//! 2. retrieve passages for that query,
//! 3. synthesize an answer from the passages, the history, and the
//!    *original* utterance,
//! 4. append `(user, utterance)` then `(assistant, answer)` to the history.
//!
//! The chain holds no conversation state. History belongs to the caller and
//! is only modified after step 3 succeeds, so a failed turn leaves it
//! untouched. One chain can serve many concurrent sessions.

use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::models::{ConversationHistory, RetrievedPassage};
use crate::retriever::Retriever;
use crate::rewriter::QueryRewriter;
use crate::synthesizer::AnswerSynthesizer;

/// Everything produced by one turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub answer: String,
    pub standalone_query: String,
    pub passages: Vec<RetrievedPassage>,
}

#[derive(Clone)]
pub struct RagChain {
    rewriter: QueryRewriter,
    retriever: Retriever,
    synthesizer: AnswerSynthesizer,
}

impl RagChain {
    pub fn new(
        rewriter: QueryRewriter,
        retriever: Retriever,
        synthesizer: AnswerSynthesizer,
    ) -> Self {
        Self {
            rewriter,
            retriever,
            synthesizer,
        }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Run one turn and record it in `history` on success.
    pub async fn turn(
        &self,
        history: &mut ConversationHistory,
        latest_utterance: &str,
    ) -> Result<TurnOutcome> {
        let standalone_query = self.rewriter.rewrite(history, latest_utterance).await?;
        let passages = self.retriever.retrieve(&standalone_query).await?;
        let answer = self
            .synthesizer
            .answer(&passages, history, latest_utterance)
            .await?;

        history.push_exchange(latest_utterance, &answer);
        debug!(
            turns = history.len() / 2,
            passages = passages.len(),
            "turn complete"
        );

        Ok(TurnOutcome {
            answer,
            standalone_query,
            passages,
        })
    }
}

/// A chain plus the history of one conversation.
pub struct Session {
    chain: RagChain,
    history: ConversationHistory,
}

impl Session {
    pub fn new(chain: RagChain) -> Self {
        Self {
            chain,
            history: ConversationHistory::new(),
        }
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    /// Ask one question; returns the answer text.
    pub async fn ask(&mut self, utterance: &str) -> Result<String> {
        Ok(self.chain.turn(&mut self.history, utterance).await?.answer)
    }

    /// Ask one question; returns the full turn outcome.
    pub async fn ask_detailed(&mut self, utterance: &str) -> Result<TurnOutcome> {
        self.chain.turn(&mut self.history, utterance).await
    }
}
