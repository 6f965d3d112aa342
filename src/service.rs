//! Process-wide wiring shared by the HTTP and terminal front ends.
//!
//! A [`ChatService`] owns the single [`IndexCache`], the engine builder that
//! binds sessions to it, and the live [`SessionStore`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use uuid::Uuid;

use crate::config::Config;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::engine::EngineBuilder;
use crate::error::{ChatError, IndexBuildError};
use crate::index::{IndexCache, VectorIndex};
use crate::llm::{create_model, ChatModel};
use crate::prompt::PromptTemplates;
use crate::session::{SessionHandle, SessionStore};

pub struct ChatService {
    config: Arc<Config>,
    engines: EngineBuilder,
    sessions: SessionStore,
}

impl ChatService {
    /// Build a service talking to the providers named in `config`.
    pub fn new(config: Config) -> Result<Self> {
        let embedder = create_provider(&config.embedding)?;
        let model = create_model(&config.llm)?;
        Ok(Self::with_backends(config, embedder, model))
    }

    /// Build a service over caller-supplied providers.
    pub fn with_backends(
        config: Config,
        embedder: Arc<dyn EmbeddingProvider>,
        model: Arc<dyn ChatModel>,
    ) -> Self {
        let cache = Arc::new(IndexCache::new(
            config.corpus.clone(),
            &config.chunking,
            &config.embedding,
            embedder.clone(),
        ));
        let engines = EngineBuilder::new(
            cache,
            embedder,
            model,
            PromptTemplates::from_config(&config.chat),
            config.retrieval.similarity_top_k,
            config.retrieval.condense,
        );
        let sessions = SessionStore::new(Duration::from_secs(config.server.session_idle_secs));

        Self {
            config: Arc::new(config),
            engines,
            sessions,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn index_cache(&self) -> &Arc<IndexCache> {
        self.engines.cache()
    }

    pub fn engines(&self) -> &EngineBuilder {
        &self.engines
    }

    /// Build the index now rather than on the first session.
    pub async fn warm_up(&self) -> Result<Arc<VectorIndex>, IndexBuildError> {
        self.engines.cache().get_index().await
    }

    /// Create, start and register a new session. Idle sessions are expired
    /// first.
    pub async fn open_session(&self) -> Result<SessionHandle, ChatError> {
        self.sessions.sweep_idle();

        let session = SessionHandle::new(self.config.chat.greeting.clone());
        session.start(&self.engines).await?;
        self.sessions.insert(session.clone());
        Ok(session)
    }

    pub fn session(&self, id: &Uuid) -> Option<SessionHandle> {
        self.sessions.get(id)
    }

    pub fn close_session(&self, id: &Uuid) -> bool {
        self.sessions.remove(id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
