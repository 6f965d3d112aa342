//! Stub providers and fixtures shared by the integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tempfile::TempDir;

use canteen_chat::config::Config;
use canteen_chat::embedding::EmbeddingProvider;
use canteen_chat::llm::{ChatModel, PromptMessage, TokenStream};

pub const MENU_CSV: &str = "\
Gedung,Stall,Menu,Harga
Gedung P,Ndokee Express,Mie Goreng,12000
Gedung T,Depot Bu Rini,Nasi Campur,17000
Gedung Q,Kopi Kampus,Es Kopi Susu,18000
";

const VOCABULARY: [&str; 5] = ["mie", "nasi", "kopi", "soto", "bakso"];

/// Embeds by keyword presence and counts calls.
#[derive(Default)]
pub struct CountingEmbedder {
    pub calls: AtomicUsize,
    pub inputs: Mutex<Vec<String>>,
    pub delay: Option<Duration>,
}

impl CountingEmbedder {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_input(&self) -> Option<String> {
        self.inputs.lock().unwrap().last().cloned()
    }
}

pub fn keyword_vector(text: &str) -> Vec<f32> {
    let text = text.to_lowercase();
    VOCABULARY
        .iter()
        .map(|word| if text.contains(word) { 1.0 } else { 0.0 })
        .collect()
}

#[async_trait]
impl EmbeddingProvider for CountingEmbedder {
    fn model_name(&self) -> &str {
        "counting"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().unwrap().extend(texts.iter().cloned());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(texts.iter().map(|t| keyword_vector(t)).collect())
    }
}

/// How a [`ScriptedModel`] answers `stream`.
pub enum Script {
    /// Yield these fragments, then end.
    Reply(Vec<&'static str>),
    /// Fail before any fragment.
    Unreachable,
    /// Yield these fragments, then fail.
    FailAfter(Vec<&'static str>),
    /// Yield these fragments, then never finish.
    Hang(Vec<&'static str>),
}

/// Chat model that records every request and answers from a script.
pub struct ScriptedModel {
    pub script: Script,
    pub condensed: &'static str,
    pub requests: Mutex<Vec<Vec<PromptMessage>>>,
    pub completions: AtomicUsize,
    /// Set once the last handed-out stream has been dropped.
    pub released: Arc<AtomicBool>,
}

impl ScriptedModel {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            condensed: "Di mana ada mie goreng di Gedung P?",
            requests: Mutex::new(Vec::new()),
            completions: AtomicUsize::new(0),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn replying(fragments: Vec<&'static str>) -> Self {
        Self::new(Script::Reply(fragments))
    }

    pub fn last_request(&self) -> Vec<PromptMessage> {
        self.requests.lock().unwrap().last().cloned().unwrap_or_default()
    }

    pub fn completions(&self) -> usize {
        self.completions.load(Ordering::SeqCst)
    }
}

struct ReleaseFlag(Arc<AtomicBool>);

impl Drop for ReleaseFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

fn fragments(parts: &[&'static str]) -> Vec<Result<String>> {
    parts.iter().map(|p| Ok(p.to_string())).collect()
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _messages: &[PromptMessage]) -> Result<String> {
        self.completions.fetch_add(1, Ordering::SeqCst);
        if matches!(self.script, Script::Unreachable) {
            bail!("connection refused");
        }
        Ok(self.condensed.to_string())
    }

    async fn stream(&self, messages: &[PromptMessage]) -> Result<TokenStream> {
        self.requests.lock().unwrap().push(messages.to_vec());
        self.released.store(false, Ordering::SeqCst);

        let inner: TokenStream = match &self.script {
            Script::Unreachable => bail!("connection refused"),
            Script::Reply(parts) => stream::iter(fragments(parts)).boxed(),
            Script::FailAfter(parts) => stream::iter(fragments(parts))
                .chain(stream::once(async { Err(anyhow::anyhow!("stream reset")) }))
                .boxed(),
            Script::Hang(parts) => stream::iter(fragments(parts))
                .chain(stream::pending())
                .boxed(),
        };

        let flag = ReleaseFlag(self.released.clone());
        Ok(inner
            .map(move |item| {
                let _held = &flag;
                item
            })
            .boxed())
    }
}

/// Write `files` into a fresh corpus directory.
pub fn corpus_dir(files: &[(&str, &str)]) -> TempDir {
    let tmp = TempDir::new().unwrap();
    for (name, content) in files {
        let path = tmp.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }
    tmp
}

pub fn canteen_corpus() -> TempDir {
    corpus_dir(&[("menu.csv", MENU_CSV)])
}

pub fn config_for(root: &Path) -> Config {
    let mut config = Config::default();
    config.corpus.root = root.to_path_buf();
    config.retrieval.similarity_top_k = 1;
    config
}
