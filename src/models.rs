//! Core data models used throughout the canteen chatbot.
//!
//! These types represent the documents, chunks, retrieval hits and chat
//! messages that flow between the corpus loader, the index and the chat
//! sessions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A parsed, embeddable unit of corpus text. Immutable after ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Deterministic id derived from `source` and `row`.
    pub id: String,
    /// Path relative to the corpus root.
    pub source: String,
    pub text: String,
    /// 1-based data row for row-grain CSV documents.
    pub row: Option<usize>,
    /// Empty in no-metadata mode.
    pub metadata: BTreeMap<String, String>,
}

impl Document {
    /// Text as seen by the embedder and the model: metadata lines (if any)
    /// followed by the body.
    pub fn rendered_text(&self) -> String {
        if self.metadata.is_empty() {
            return self.text.clone();
        }
        let mut out = String::new();
        for (key, value) in &self.metadata {
            out.push_str(key);
            out.push_str(": ");
            out.push_str(value);
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.text);
        out
    }
}

/// A chunk of a document's rendered text.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// A chunk returned from the index with its similarity to the query.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub document: Arc<Document>,
    pub score: f32,
}

/// Who authored a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Assistant,
    User,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Assistant => write!(f, "assistant"),
            Role::User => write!(f, "user"),
        }
    }
}

/// One entry of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}
