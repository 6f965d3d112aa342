//! Chat Session Manager.
//!
//! Each user session walks through
//!
//! ```text
//! Uninitialized ──start──▶ Seeded ──engine built──▶ Ready ◀──┐
//!                                                    │       │ stream ends,
//!                                              submit│       │ fails, or is
//!                                                    ▼       │ dropped
//!                                            AwaitingResponse┘
//! ```
//!
//! A [`SessionHandle`] is the explicit, cloneable handle UI adapters pass
//! around; there is no global session state. While a turn is in flight a
//! second [`SessionHandle::submit`] is rejected with
//! [`ChatError::TurnInProgress`], so fragments of two replies never
//! interleave.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::{ChatEngine, EngineBuilder};
use crate::error::ChatError;
use crate::llm::TokenStream;
use crate::models::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Seeded,
    Ready,
    AwaitingResponse,
}

struct ChatSession {
    state: SessionState,
    conversation: Vec<Message>,
    engine: Option<Arc<ChatEngine>>,
    greeting: String,
    last_active: Instant,
}

fn lock(session: &Mutex<ChatSession>) -> MutexGuard<'_, ChatSession> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared handle to one user's chat session.
#[derive(Clone)]
pub struct SessionHandle {
    id: Uuid,
    created_at: DateTime<Utc>,
    inner: Arc<Mutex<ChatSession>>,
    // Serializes `start` so the engine is built at most once.
    init: Arc<tokio::sync::Mutex<()>>,
}

impl SessionHandle {
    pub fn new(greeting: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            inner: Arc::new(Mutex::new(ChatSession {
                state: SessionState::Uninitialized,
                conversation: Vec::new(),
                engine: None,
                greeting: greeting.into(),
                last_active: Instant::now(),
            })),
            init: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> SessionState {
        lock(&self.inner).state
    }

    /// Snapshot of the conversation, oldest first.
    pub fn messages(&self) -> Vec<Message> {
        lock(&self.inner).conversation.clone()
    }

    pub fn engine(&self) -> Option<Arc<ChatEngine>> {
        lock(&self.inner).engine.clone()
    }

    fn idle_for(&self) -> Duration {
        lock(&self.inner).last_active.elapsed()
    }

    /// Seed the conversation and bind a chat engine. Idempotent: once Ready,
    /// returns the engine created the first time. If the engine cannot be
    /// built the session stays Seeded and a later call retries without
    /// seeding again.
    pub async fn start(&self, engines: &EngineBuilder) -> Result<Arc<ChatEngine>, ChatError> {
        let _init = self.init.lock().await;

        {
            let mut session = lock(&self.inner);
            if let Some(engine) = &session.engine {
                return Ok(engine.clone());
            }
            if session.state == SessionState::Uninitialized {
                let greeting = Message::assistant(session.greeting.clone());
                session.conversation.push(greeting);
                session.state = SessionState::Seeded;
            }
        }

        let engine = engines.build().await?;

        let mut session = lock(&self.inner);
        session.engine = Some(engine.clone());
        session.state = SessionState::Ready;
        session.last_active = Instant::now();
        info!(session = %self.id, "chat session ready");
        Ok(engine)
    }

    /// Submit a user prompt. Blank prompts are ignored and return `None`.
    ///
    /// The returned stream yields the reply fragment by fragment. When it
    /// ends, the concatenated reply is appended to the conversation. If the
    /// engine fails (before or during streaming) no assistant message is
    /// recorded and the session is Ready again.
    pub async fn submit(&self, prompt: &str) -> Result<Option<TurnStream>, ChatError> {
        let prompt = prompt.trim();

        let (engine, history) = {
            let mut session = lock(&self.inner);
            match session.state {
                SessionState::Ready => {}
                SessionState::AwaitingResponse => return Err(ChatError::TurnInProgress),
                SessionState::Uninitialized | SessionState::Seeded => {
                    return Err(ChatError::NotReady)
                }
            }
            if prompt.is_empty() {
                return Ok(None);
            }
            let engine = session.engine.clone().ok_or(ChatError::NotReady)?;
            let history = session.conversation.clone();
            session.conversation.push(Message::user(prompt));
            session.state = SessionState::AwaitingResponse;
            session.last_active = Instant::now();
            (engine, history)
        };

        let mut turn = InFlightTurn {
            session: self.inner.clone(),
            open: true,
        };
        debug!(session = %self.id, turn = history.len(), "submitting prompt");

        match engine.stream_chat(&history, prompt).await {
            Ok(tokens) => Ok(Some(TurnStream {
                turn,
                tokens,
                reply: String::new(),
            })),
            Err(e) => {
                turn.close(None);
                Err(e)
            }
        }
    }
}

/// Returns the session to Ready when a turn ends, however it ends.
struct InFlightTurn {
    session: Arc<Mutex<ChatSession>>,
    open: bool,
}

impl InFlightTurn {
    fn close(&mut self, reply: Option<String>) {
        if !self.open {
            return;
        }
        self.open = false;
        let mut session = lock(&self.session);
        if let Some(reply) = reply {
            session.conversation.push(Message::assistant(reply));
        }
        session.state = SessionState::Ready;
        session.last_active = Instant::now();
    }
}

impl Drop for InFlightTurn {
    fn drop(&mut self) {
        if self.open {
            debug!("turn dropped before completion");
            self.close(None);
        }
    }
}

/// The streamed reply to one prompt. Finite and not restartable; dropping it
/// early cancels the turn and releases the upstream request.
pub struct TurnStream {
    turn: InFlightTurn,
    tokens: TokenStream,
    reply: String,
}

impl Stream for TurnStream {
    type Item = Result<String, ChatError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if !this.turn.open {
            return Poll::Ready(None);
        }
        match this.tokens.poll_next_unpin(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(fragment))) => {
                this.reply.push_str(&fragment);
                Poll::Ready(Some(Ok(fragment)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.turn.close(None);
                Poll::Ready(Some(Err(ChatError::unavailable(e))))
            }
            Poll::Ready(None) => {
                let reply = std::mem::take(&mut this.reply);
                this.turn.close(Some(reply));
                Poll::Ready(None)
            }
        }
    }
}

/// Live sessions keyed by id. Nothing here outlives the process.
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, SessionHandle>>,
    idle_timeout: Duration,
}

impl SessionStore {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_timeout,
        }
    }

    pub fn insert(&self, session: SessionHandle) {
        self.write().insert(session.id(), session);
    }

    pub fn get(&self, id: &Uuid) -> Option<SessionHandle> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn remove(&self, id: &Uuid) -> bool {
        self.write().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop sessions idle for at least the configured timeout. Sessions with
    /// a reply in flight are kept.
    pub fn sweep_idle(&self) -> usize {
        let mut sessions = self.write();
        let before = sessions.len();
        sessions.retain(|_, s| {
            s.state() == SessionState::AwaitingResponse || s.idle_for() < self.idle_timeout
        });
        let removed = before - sessions.len();
        if removed > 0 {
            info!(removed, remaining = sessions.len(), "expired idle sessions");
        }
        removed
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Uuid, SessionHandle>> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
