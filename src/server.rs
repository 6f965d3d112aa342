//! HTTP front end.
//!
//! Serves a single-page chat UI and a small JSON/SSE API over the shared
//! [`ChatService`].
//!
//! # Endpoints
//!
//! | Method   | Path | Description |
//! |----------|------|-------------|
//! | `GET`    | `/` | Chat page |
//! | `GET`    | `/health` | Status, version and index statistics |
//! | `POST`   | `/api/sessions` | Create and start a session |
//! | `GET`    | `/api/sessions/{id}` | Session snapshot |
//! | `DELETE` | `/api/sessions/{id}` | Close a session |
//! | `POST`   | `/api/sessions/{id}/messages` | Submit a prompt, stream the reply |
//!
//! # Streaming
//!
//! `POST /api/sessions/{id}/messages` with `{"prompt": "..."}` answers with
//! Server-Sent Events. Each event's data is a JSON object:
//!
//! ```text
//! event: token
//! data: {"text":"Di Gedung P "}
//!
//! event: done
//! data: {"content":"Di Gedung P ada ..."}
//! ```
//!
//! If generation fails the stream ends with an `error` event carrying
//! `{"message": "..."}` instead of `done`. A blank prompt returns `204`.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "turn_in_progress", "message": "..." } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404),
//! `turn_in_progress` (409), `not_ready` (409), `engine_unavailable` (503),
//! `index_unavailable` (500).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ChatError;
use crate::models::Message;
use crate::service::ChatService;
use crate::session::{SessionHandle, SessionState};

const INDEX_HTML: &str = include_str!("ui.html");

#[derive(Clone)]
struct AppState {
    service: Arc<ChatService>,
}

/// Bind to `[server].bind` and serve until the process is terminated.
pub async fn run_server(service: Arc<ChatService>) -> anyhow::Result<()> {
    let bind_addr = service.config().server.bind.clone();
    let app = router(service);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("canteen chat listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn router(service: Arc<ChatService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_index))
        .route("/health", get(handle_health))
        .route("/api/sessions", post(handle_create_session))
        .route(
            "/api/sessions/{id}",
            get(handle_get_session).delete(handle_close_session),
        )
        .route("/api/sessions/{id}/messages", post(handle_submit))
        .layer(cors)
        .with_state(AppState { service })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        let (status, code) = match &err {
            ChatError::TurnInProgress => (StatusCode::CONFLICT, "turn_in_progress"),
            ChatError::NotReady => (StatusCode::CONFLICT, "not_ready"),
            ChatError::EngineUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "engine_unavailable")
            }
            ChatError::Index(_) => (StatusCode::INTERNAL_SERVER_ERROR, "index_unavailable"),
        };
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

fn lookup(state: &AppState, id: &str) -> Result<SessionHandle, AppError> {
    let id = Uuid::parse_str(id).map_err(|_| bad_request(format!("invalid session id: {}", id)))?;
    state
        .service
        .session(&id)
        .ok_or_else(|| not_found(format!("session not found: {}", id)))
}

// ============ GET / ============

async fn handle_index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    index_ready: bool,
    index_builds: usize,
    documents: usize,
    chunks: usize,
    sessions: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let cache = state.service.index_cache();
    let index = cache.get();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        index_ready: index.is_some(),
        index_builds: cache.build_count(),
        documents: index.as_ref().map_or(0, |i| i.document_count()),
        chunks: index.as_ref().map_or(0, |i| i.chunk_count()),
        sessions: state.service.session_count(),
    })
}

// ============ Sessions ============

#[derive(Serialize)]
struct SessionView {
    id: Uuid,
    title: String,
    input_placeholder: String,
    state: SessionState,
    created_at: DateTime<Utc>,
    messages: Vec<Message>,
}

fn session_view(state: &AppState, session: &SessionHandle) -> SessionView {
    let chat = &state.service.config().chat;
    SessionView {
        id: session.id(),
        title: chat.title.clone(),
        input_placeholder: chat.input_placeholder.clone(),
        state: session.state(),
        created_at: session.created_at(),
        messages: session.messages(),
    }
}

async fn handle_create_session(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<SessionView>), AppError> {
    let session = state.service.open_session().await?;
    info!(session = %session.id(), "session opened");
    Ok((StatusCode::CREATED, Json(session_view(&state, &session))))
}

async fn handle_get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    let session = lookup(&state, &id)?;
    Ok(Json(session_view(&state, &session)))
}

async fn handle_close_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let session = lookup(&state, &id)?;
    state.service.close_session(&session.id());
    info!(session = %session.id(), "session closed");
    Ok(StatusCode::NO_CONTENT)
}

// ============ POST /api/sessions/{id}/messages ============

#[derive(Deserialize)]
struct PromptRequest {
    prompt: String,
}

fn event(name: &'static str, payload: serde_json::Value) -> Result<Event, Infallible> {
    Ok(Event::default().event(name).data(payload.to_string()))
}

async fn handle_submit(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<PromptRequest>,
) -> Result<Response, AppError> {
    let session = lookup(&state, &id)?;
    let session_id = session.id();

    let turn = match session.submit(&request.prompt).await {
        Ok(Some(turn)) => turn,
        Ok(None) => return Ok(StatusCode::NO_CONTENT.into_response()),
        Err(ChatError::EngineUnavailable(message)) => {
            warn!(session = %session_id, error = %message, "turn failed");
            let events = stream::once(async move {
                event("error", serde_json::json!({ "message": message }))
            });
            return Ok(Sse::new(events).into_response());
        }
        Err(e) => return Err(e.into()),
    };

    let events = stream::unfold(Some((turn, String::new())), move |pending| async move {
        let (mut turn, mut reply) = pending?;
        match turn.next().await {
            Some(Ok(fragment)) => {
                reply.push_str(&fragment);
                let ev = event("token", serde_json::json!({ "text": fragment }));
                Some((ev, Some((turn, reply))))
            }
            Some(Err(e)) => {
                warn!(session = %session_id, error = %e, "turn failed mid-stream");
                let ev = event("error", serde_json::json!({ "message": e.to_string() }));
                Some((ev, None))
            }
            None => Some((event("done", serde_json::json!({ "content": reply })), None)),
        }
    });

    Ok(Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response())
}
