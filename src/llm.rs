//! Generation provider abstraction and the Ollama chat client.
//!
//! [`ChatModel::stream`] returns a [`TokenStream`]: a finite,
//! non-restartable stream of text fragments. Dropping it drops the
//! underlying HTTP response, which releases the upstream connection.
//!
//! Ollama streams `/api/chat` replies as newline-delimited JSON:
//!
//! ```text
//! {"message":{"role":"assistant","content":"Di "},"done":false}
//! {"message":{"role":"assistant","content":"Gedung P"},"done":false}
//! {"message":{"role":"assistant","content":""},"done":true}
//! ```
//!
//! Network chunks do not respect line boundaries, so bytes are buffered
//! until a full line is available.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

use crate::config::LlmConfig;

/// Streamed response fragments.
pub type TokenStream = BoxStream<'static, Result<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

/// A message as sent to the generation service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: PromptRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Generate a whole reply at once.
    async fn complete(&self, messages: &[PromptMessage]) -> Result<String>;

    /// Generate a reply incrementally.
    async fn stream(&self, messages: &[PromptMessage]) -> Result<TokenStream>;
}

pub fn create_model(config: &LlmConfig) -> Result<std::sync::Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "ollama" => Ok(std::sync::Arc::new(OllamaChat::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [PromptMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<ChatOptions>,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Deserialize, Debug)]
struct ChatLine {
    #[serde(default)]
    message: Option<ChatLineMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ChatLineMessage {
    #[serde(default)]
    content: String,
}

/// Chat client for a local Ollama daemon.
pub struct OllamaChat {
    model: String,
    url: String,
    timeout: Duration,
    temperature: Option<f32>,
    client: reqwest::Client,
}

impl OllamaChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        // No overall request timeout: a long answer may legitimately stream
        // for minutes. Waits are bounded per fragment instead.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;

        Ok(Self {
            model: config.model.clone(),
            url: config.url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.timeout_secs),
            temperature: config.temperature,
            client,
        })
    }

    async fn send(&self, messages: &[PromptMessage], stream: bool) -> Result<reqwest::Response> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            stream,
            options: self.temperature.map(|temperature| ChatOptions { temperature }),
        };

        let request = self
            .client
            .post(format!("{}/api/chat", self.url))
            .json(&body)
            .send();

        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "Ollama at {} timed out after {}s",
                    self.url,
                    self.timeout.as_secs()
                )
            })?
            .with_context(|| format!("Ollama connection error (is Ollama running at {}?)", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = tokio::time::timeout(self.timeout, response.text())
                .await
                .ok()
                .and_then(|body| body.ok())
                .unwrap_or_default();
            bail!("Ollama API error {}: {}", status, body_text);
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatModel for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[PromptMessage]) -> Result<String> {
        let response = self.send(messages, false).await?;
        let body = tokio::time::timeout(self.timeout, response.text())
            .await
            .map_err(|_| anyhow::anyhow!("Ollama response timed out"))??;
        let mut lines = NdjsonLines::default();
        let mut out = String::new();
        for frag in lines.push(body.as_bytes()).into_iter().chain(lines.finish()) {
            out.push_str(&frag?);
        }
        Ok(out)
    }

    async fn stream(&self, messages: &[PromptMessage]) -> Result<TokenStream> {
        let response = self.send(messages, true).await?;
        debug!(model = %self.model, "generation stream opened");
        Ok(ndjson_fragments(response.bytes_stream(), self.timeout))
    }
}

/// Turn a byte stream of NDJSON chat lines into content fragments, failing
/// if no bytes arrive within `idle`.
pub fn ndjson_fragments<S, B, E>(bytes: S, idle: Duration) -> TokenStream
where
    S: futures::Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    struct State<S> {
        bytes: std::pin::Pin<Box<S>>,
        lines: NdjsonLines,
        pending: VecDeque<Result<String>>,
        finished: bool,
    }

    let state = State {
        bytes: Box::pin(bytes),
        lines: NdjsonLines::default(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, move |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                if item.is_err() {
                    st.pending.clear();
                    st.finished = true;
                }
                return Some((item, st));
            }
            if st.finished || st.lines.done {
                return None;
            }

            match tokio::time::timeout(idle, st.bytes.next()).await {
                Err(_) => {
                    st.finished = true;
                    let err = anyhow::anyhow!(
                        "generation stream timed out after {}s without data",
                        idle.as_secs()
                    );
                    return Some((Err(err), st));
                }
                Ok(None) => {
                    st.finished = true;
                    st.pending.extend(st.lines.finish());
                    if !st.lines.done {
                        st.pending.push_back(Err(anyhow::anyhow!(
                            "generation stream ended before completion"
                        )));
                    }
                }
                Ok(Some(Err(e))) => {
                    st.finished = true;
                    return Some((Err(anyhow::anyhow!("generation stream failed: {}", e)), st));
                }
                Ok(Some(Ok(chunk))) => {
                    let parsed = st.lines.push(chunk.as_ref());
                    st.pending.extend(parsed);
                }
            }
        }
    })
    .boxed()
}

/// Line buffer for NDJSON chat replies.
#[derive(Default)]
struct NdjsonLines {
    buf: Vec<u8>,
    done: bool,
}

impl NdjsonLines {
    /// Feed bytes, returning fragments for every completed line. Empty
    /// fragments are dropped; nothing after the `done` line is emitted.
    fn push(&mut self, bytes: &[u8]) -> Vec<Result<String>> {
        let mut out = Vec::new();
        if self.done {
            return out;
        }
        self.buf.extend_from_slice(bytes);
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(item) = self.parse_line(&line) {
                out.push(item);
            }
            if self.done {
                self.buf.clear();
                break;
            }
        }
        out
    }

    /// Flush a trailing line that had no newline.
    fn finish(&mut self) -> Vec<Result<String>> {
        if self.done || self.buf.is_empty() {
            return Vec::new();
        }
        let line = std::mem::take(&mut self.buf);
        self.parse_line(&line).into_iter().collect()
    }

    fn parse_line(&mut self, line: &[u8]) -> Option<Result<String>> {
        let text = match std::str::from_utf8(line) {
            Ok(t) => t.trim(),
            Err(e) => return Some(Err(anyhow::anyhow!("invalid UTF-8 in stream: {}", e))),
        };
        if text.is_empty() {
            return None;
        }
        let parsed: ChatLine = match serde_json::from_str(text) {
            Ok(p) => p,
            Err(e) => return Some(Err(anyhow::anyhow!("invalid stream line {:?}: {}", text, e))),
        };
        if let Some(error) = parsed.error {
            self.done = true;
            return Some(Err(anyhow::anyhow!("Ollama error: {}", error)));
        }
        if parsed.done {
            self.done = true;
        }
        parsed
            .message
            .map(|m| m.content)
            .filter(|c| !c.is_empty())
            .map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    const REPLY: &str = concat!(
        "{\"message\":{\"role\":\"assistant\",\"content\":\"Di \"},\"done\":false}\n",
        "{\"message\":{\"role\":\"assistant\",\"content\":\"Gedung P\"},\"done\":false}\n",
        "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n",
    );

    async fn collect(stream: TokenStream) -> Vec<Result<String>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_fragments_across_arbitrary_splits() {
        for split in [1usize, 3, 7, 40, REPLY.len()] {
            let parts: Vec<Result<Vec<u8>, Infallible>> = REPLY
                .as_bytes()
                .chunks(split)
                .map(|c| Ok(c.to_vec()))
                .collect();
            let out = collect(ndjson_fragments(
                stream::iter(parts),
                Duration::from_secs(5),
            ))
            .await;
            let frags: Vec<String> = out.into_iter().map(|r| r.unwrap()).collect();
            assert_eq!(frags, vec!["Di ", "Gedung P"], "split {}", split);
        }
    }

    #[tokio::test]
    async fn test_trailing_line_without_newline() {
        let body = concat!(
            "{\"message\":{\"content\":\"Halo\"},\"done\":false}\n",
            "{\"message\":{\"content\":\"!\"},\"done\":true}",
        );
        let out = collect(ndjson_fragments(
            stream::iter(vec![Ok::<_, Infallible>(body.as_bytes().to_vec())]),
            Duration::from_secs(5),
        ))
        .await;
        let frags: Vec<String> = out.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(frags, vec!["Halo", "!"]);
    }

    #[tokio::test]
    async fn test_stream_closed_before_done_is_an_error() {
        let body = concat!(
            "{\"message\":{\"content\":\"Di \"},\"done\":false}\n",
            "{\"message\":{\"content\":\"Gedung\"},\"done\":false}\n",
        );
        let out = collect(ndjson_fragments(
            stream::iter(vec![Ok::<_, Infallible>(body.as_bytes().to_vec())]),
            Duration::from_secs(5),
        ))
        .await;
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].as_ref().unwrap(), "Di ");
        assert_eq!(out[1].as_ref().unwrap(), "Gedung");
        assert!(out[2]
            .as_ref()
            .unwrap_err()
            .to_string()
            .contains("ended before completion"));
    }

    #[tokio::test]
    async fn test_error_line_ends_stream() {
        let body = concat!(
            "{\"message\":{\"content\":\"Ha\"},\"done\":false}\n",
            "{\"error\":\"model crashed\"}\n",
            "{\"message\":{\"content\":\"never\"},\"done\":false}\n",
        );
        let out = collect(ndjson_fragments(
            stream::iter(vec![Ok::<_, Infallible>(body.as_bytes().to_vec())]),
            Duration::from_secs(5),
        ))
        .await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_ref().unwrap(), "Ha");
        assert!(out[1]
            .as_ref()
            .unwrap_err()
            .to_string()
            .contains("model crashed"));
    }

    #[tokio::test]
    async fn test_idle_timeout() {
        let silent = stream::pending::<Result<Vec<u8>, Infallible>>();
        let out = collect(ndjson_fragments(silent, Duration::from_millis(50))).await;
        assert_eq!(out.len(), 1);
        assert!(out[0].as_ref().unwrap_err().to_string().contains("timed out"));
    }

    #[test]
    fn test_request_serialization() {
        let messages = vec![
            PromptMessage::new(PromptRole::System, "Kamu pelayan kantin."),
            PromptMessage::new(PromptRole::User, "Ada mie?"),
        ];
        let body = ChatRequest {
            model: "llama3.1:latest",
            messages: &messages,
            stream: true,
            options: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "Ada mie?");
        assert_eq!(json["stream"], true);
        assert!(json.get("options").is_none());
    }
}
