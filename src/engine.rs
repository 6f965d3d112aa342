//! Condense-plus-context chat engine.
//!
//! A turn runs in three steps:
//!
//! 1. **Condense**: if the history already holds a user turn, the model
//!    rewrites the prompt into a standalone question; otherwise the prompt is
//!    used as-is.
//! 2. **Retrieve**: the standalone question is embedded and the
//!    `similarity_top_k` closest chunks are pulled from the index.
//! 3. **Generate**: the model streams a reply to
//!    `[system(persona + context), history…, user(prompt)]`.
//!
//! The engine holds no conversation state; the session passes its history on
//! every turn.

use std::sync::Arc;

use tracing::debug;

use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::ChatError;
use crate::index::{IndexCache, VectorIndex};
use crate::llm::{ChatModel, PromptMessage, PromptRole, TokenStream};
use crate::models::{Message, Role, ScoredChunk};
use crate::prompt::PromptTemplates;

pub struct ChatEngine {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    model: Arc<dyn ChatModel>,
    prompts: PromptTemplates,
    top_k: usize,
    condense: bool,
}

impl ChatEngine {
    /// Start generating a reply to `prompt`. `history` is every message
    /// before this prompt, oldest first.
    pub async fn stream_chat(
        &self,
        history: &[Message],
        prompt: &str,
    ) -> Result<TokenStream, ChatError> {
        let question = self.condense_question(history, prompt).await?;

        let query_vec = embed_query(self.embedder.as_ref(), &question)
            .await
            .map_err(ChatError::unavailable)?;
        let hits = self.index.retrieve(&query_vec, self.top_k);
        debug!(question = %question, hits = hits.len(), "retrieved context");

        let messages = self.generation_messages(history, prompt, &hits);
        self.model
            .stream(&messages)
            .await
            .map_err(ChatError::unavailable)
    }

    async fn condense_question(&self, history: &[Message], prompt: &str) -> Result<String, ChatError> {
        let has_user_turn = history.iter().any(|m| m.role == Role::User);
        if !self.condense || !has_user_turn {
            return Ok(prompt.to_string());
        }

        let request = vec![PromptMessage::new(
            PromptRole::User,
            self.prompts.condense_prompt(history, prompt),
        )];
        let condensed = self
            .model
            .complete(&request)
            .await
            .map_err(ChatError::unavailable)?;
        let condensed = condensed.trim();
        if condensed.is_empty() {
            Ok(prompt.to_string())
        } else {
            Ok(condensed.to_string())
        }
    }

    fn generation_messages(
        &self,
        history: &[Message],
        prompt: &str,
        hits: &[ScoredChunk],
    ) -> Vec<PromptMessage> {
        let context_str = hits
            .iter()
            .map(|h| h.chunk.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(PromptMessage::new(
            PromptRole::System,
            self.prompts.system_message(&context_str),
        ));
        for m in history {
            let role = match m.role {
                Role::User => PromptRole::User,
                Role::Assistant => PromptRole::Assistant,
            };
            messages.push(PromptMessage::new(role, m.content.clone()));
        }
        messages.push(PromptMessage::new(PromptRole::User, prompt));
        messages
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }
}

/// Creates chat engines bound to the process-wide index.
pub struct EngineBuilder {
    cache: Arc<IndexCache>,
    embedder: Arc<dyn EmbeddingProvider>,
    model: Arc<dyn ChatModel>,
    prompts: PromptTemplates,
    top_k: usize,
    condense: bool,
}

impl EngineBuilder {
    pub fn new(
        cache: Arc<IndexCache>,
        embedder: Arc<dyn EmbeddingProvider>,
        model: Arc<dyn ChatModel>,
        prompts: PromptTemplates,
        top_k: usize,
        condense: bool,
    ) -> Self {
        Self {
            cache,
            embedder,
            model,
            prompts,
            top_k,
            condense,
        }
    }

    pub async fn build(&self) -> Result<Arc<ChatEngine>, ChatError> {
        let index = self.cache.get_index().await?;
        Ok(Arc::new(ChatEngine {
            index,
            embedder: self.embedder.clone(),
            model: self.model.clone(),
            prompts: self.prompts.clone(),
            top_k: self.top_k,
            condense: self.condense,
        }))
    }

    pub fn cache(&self) -> &Arc<IndexCache> {
        &self.cache
    }
}
