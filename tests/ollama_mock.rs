//! End-to-end tests against an in-process mock of the Ollama HTTP API.

mod common;

use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};

use canteen_chat::config::Config;
use canteen_chat::error::{ChatError, IndexBuildError};
use canteen_chat::models::Message;
use canteen_chat::service::ChatService;
use canteen_chat::session::SessionState;

use common::{canteen_corpus, config_for, keyword_vector};

const REPLY: [&str; 3] = ["Di Gedung P ", "ada Ndokee Express ", "yang jual Mie Goreng."];

#[derive(Clone, Copy, Default, PartialEq)]
enum Behavior {
    #[default]
    Reply,
    /// Never sends a response head.
    Silent,
    /// Closes the stream before the `done` line.
    Truncated,
    /// Sends a 500 head, then stalls the body.
    StalledError,
}

#[derive(Clone, Default)]
struct Mock {
    chat_requests: Arc<Mutex<Vec<Value>>>,
    behavior: Behavior,
}

impl Mock {
    fn with(behavior: Behavior) -> Self {
        Self {
            behavior,
            ..Self::default()
        }
    }
}

async fn handle_embed(Json(body): Json<Value>) -> Json<Value> {
    let embeddings: Vec<Vec<f32>> = body["input"]
        .as_array()
        .map(|inputs| {
            inputs
                .iter()
                .map(|t| keyword_vector(t.as_str().unwrap_or_default()))
                .collect()
        })
        .unwrap_or_default();
    Json(json!({ "model": body["model"], "embeddings": embeddings }))
}

fn chat_line(content: &str, done: bool) -> String {
    format!(
        "{}\n",
        json!({ "message": { "role": "assistant", "content": content }, "done": done })
    )
}

async fn handle_chat(State(mock): State<Mock>, Json(body): Json<Value>) -> Response {
    mock.chat_requests.lock().unwrap().push(body.clone());

    match mock.behavior {
        Behavior::Silent => {
            return Body::from_stream(stream::pending::<Result<String, Infallible>>())
                .into_response();
        }
        Behavior::StalledError => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Body::from_stream(stream::pending::<Result<String, Infallible>>()),
            )
                .into_response();
        }
        Behavior::Truncated if body["stream"] == json!(true) => {
            let lines: String = REPLY[..2].iter().map(|c| chat_line(c, false)).collect();
            return Body::from(lines).into_response();
        }
        _ => {}
    }
    if body["stream"] == json!(false) {
        return Json(json!({
            "message": { "role": "assistant", "content": "Di mana ada mie goreng?" },
            "done": true
        }))
        .into_response();
    }

    let mut lines: Vec<String> = REPLY.iter().map(|c| chat_line(c, false)).collect();
    lines.push(chat_line("", true));
    // Split mid-line so the client has to reassemble records.
    let joined = lines.concat();
    let (head, tail) = joined.split_at(joined.len() / 2);
    let chunks = vec![head.to_string(), tail.to_string()];
    Body::from_stream(stream::iter(chunks.into_iter().map(Ok::<_, Infallible>))).into_response()
}

async fn spawn_mock(mock: Mock) -> String {
    let app = Router::new()
        .route("/api/embed", post(handle_embed))
        .route("/api/chat", post(handle_chat))
        .with_state(mock);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn config(root: &std::path::Path, embed_url: &str, llm_url: &str) -> Config {
    let mut config = config_for(root);
    config.embedding.url = embed_url.to_string();
    config.embedding.max_retries = 0;
    config.llm.url = llm_url.to_string();
    config.llm.timeout_secs = 1;
    config.llm.connect_timeout_secs = 1;
    config
}

#[tokio::test]
async fn test_chat_turn_against_ollama_api() {
    let mock = Mock::default();
    let url = spawn_mock(mock.clone()).await;
    let corpus = canteen_corpus();
    let svc = ChatService::new(config(corpus.path(), &url, &url)).unwrap();

    let index = svc.warm_up().await.unwrap();
    assert_eq!(index.document_count(), 3);
    assert_eq!(index.dims(), 5);

    let session = svc.open_session().await.unwrap();
    let mut turn = session
        .submit("Aku mau makan mie, ada dimana?")
        .await
        .unwrap()
        .unwrap();
    let mut fragments = Vec::new();
    while let Some(fragment) = turn.next().await {
        fragments.push(fragment.unwrap());
    }

    assert_eq!(fragments, REPLY);
    let messages = session.messages();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[2], Message::assistant(REPLY.concat()));

    let requests = mock.chat_requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request["model"], "llama3.1:latest");
    assert_eq!(request["stream"], true);
    assert_eq!(request["messages"][0]["role"], "system");
    let system = request["messages"][0]["content"].as_str().unwrap();
    assert!(system.contains("Menu: Mie Goreng"));
    assert_eq!(request["messages"][1]["role"], "assistant");
    assert_eq!(request["messages"][2]["role"], "user");
}

#[tokio::test]
async fn test_follow_up_uses_non_streaming_condense_call() {
    let mock = Mock::default();
    let url = spawn_mock(mock.clone()).await;
    let corpus = canteen_corpus();
    let svc = ChatService::new(config(corpus.path(), &url, &url)).unwrap();

    let session = svc.open_session().await.unwrap();
    for prompt in ["Aku mau makan mie", "Yang paling murah?"] {
        let mut turn = session.submit(prompt).await.unwrap().unwrap();
        while let Some(fragment) = turn.next().await {
            fragment.unwrap();
        }
    }

    let requests = mock.chat_requests.lock().unwrap();
    let streamed: Vec<&Value> = requests.iter().filter(|r| r["stream"] == true).collect();
    let condensed: Vec<&Value> = requests.iter().filter(|r| r["stream"] == false).collect();
    assert_eq!(streamed.len(), 2);
    assert_eq!(condensed.len(), 1);
    let condense_prompt = condensed[0]["messages"][0]["content"].as_str().unwrap();
    assert!(condense_prompt.contains("Follow Up Input: Yang paling murah?"));
    assert_eq!(session.messages().len(), 5);
}

#[tokio::test]
async fn test_unreachable_embedding_service_fails_index_build() {
    let corpus = canteen_corpus();
    let svc = ChatService::new(config(
        corpus.path(),
        "http://127.0.0.1:1",
        "http://127.0.0.1:1",
    ))
    .unwrap();

    let err = svc.warm_up().await.err().unwrap();
    assert!(matches!(err, IndexBuildError::Embedding(_)));
    assert!(err.to_string().contains("Ollama connection error"));
    assert!(svc.index_cache().get().is_none());
}

#[tokio::test]
async fn test_unreachable_generation_service_is_reported_per_turn() {
    let url = spawn_mock(Mock::default()).await;
    let corpus = canteen_corpus();
    let svc = ChatService::new(config(corpus.path(), &url, "http://127.0.0.1:1")).unwrap();

    let session = svc.open_session().await.unwrap();
    let err = session.submit("Ada mie?").await.err().unwrap();
    assert!(matches!(err, ChatError::EngineUnavailable(_)));
    assert_eq!(session.messages().len(), 2);
}

#[tokio::test]
async fn test_silent_generation_service_times_out() {
    let url = spawn_mock(Mock::with(Behavior::Silent)).await;
    let corpus = canteen_corpus();
    let svc = ChatService::new(config(corpus.path(), &url, &url)).unwrap();

    let session = svc.open_session().await.unwrap();
    // The bound applies whether the server stalls before or after the
    // response head.
    let err = match session.submit("Ada mie?").await {
        Ok(Some(mut turn)) => {
            let err = turn.next().await.unwrap().err().unwrap();
            assert!(turn.next().await.is_none());
            err
        }
        Ok(None) => panic!("prompt was not blank"),
        Err(e) => e,
    };
    match err {
        ChatError::EngineUnavailable(message) => assert!(message.contains("timed out")),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(session.messages().len(), 2);
    assert_eq!(session.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_stream_closed_before_done_records_no_reply() {
    let url = spawn_mock(Mock::with(Behavior::Truncated)).await;
    let corpus = canteen_corpus();
    let svc = ChatService::new(config(corpus.path(), &url, &url)).unwrap();

    let session = svc.open_session().await.unwrap();
    let mut turn = session.submit("Ada mie?").await.unwrap().unwrap();
    let mut fragments = Vec::new();
    let mut errors = Vec::new();
    while let Some(item) = turn.next().await {
        match item {
            Ok(fragment) => fragments.push(fragment),
            Err(e) => errors.push(e),
        }
    }

    assert_eq!(fragments, REPLY[..2]);
    assert_eq!(errors.len(), 1);
    match &errors[0] {
        ChatError::EngineUnavailable(message) => {
            assert!(message.contains("ended before completion"), "{}", message)
        }
        other => panic!("unexpected error: {:?}", other),
    }
    let messages = session.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1], Message::user("Ada mie?"));
    assert_eq!(session.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_error_status_with_stalled_body_times_out() {
    let url = spawn_mock(Mock::with(Behavior::StalledError)).await;
    let corpus = canteen_corpus();
    let svc = ChatService::new(config(corpus.path(), &url, &url)).unwrap();

    let session = svc.open_session().await.unwrap();
    let err = tokio::time::timeout(Duration::from_secs(10), session.submit("Ada mie?"))
        .await
        .expect("error body read was not bounded")
        .err()
        .unwrap();
    match err {
        ChatError::EngineUnavailable(message) => assert!(message.contains("500"), "{}", message),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(session.messages().len(), 2);
    assert_eq!(session.state(), SessionState::Ready);
}
