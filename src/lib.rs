//! # Canteen Chat
//!
//! A retrieval-augmented chatbot that recommends food and drink from campus
//! canteen data.
//!
//! A folder of CSV and text files is loaded once into an in-memory vector
//! index. Each chat turn condenses the user's prompt against the
//! conversation, retrieves the closest canteen records, and streams a reply
//! from a local Ollama daemon back to the browser or terminal.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │   Corpus    │──▶│ Chunk+Embed  │──▶│ VectorIndex  │  (built once)
//! │  CSV / txt  │   │   (Ollama)   │   │  IndexCache  │
//! └─────────────┘   └──────────────┘   └──────┬───────┘
//!                                             │
//!                      ┌──────────────────────┤
//!                      ▼                      ▼
//!               ┌─────────────┐        ┌─────────────┐
//!               │  Session A  │  ...   │  Session N  │──▶ ChatEngine ──▶ Ollama
//!               └──────┬──────┘        └──────┬──────┘      (stream)
//!                      ▼                      ▼
//!                 HTTP + SSE              terminal
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ollama pull mxbai-embed-large && ollama pull llama3.1
//! canteen corpus                # list what will be indexed
//! canteen index                 # build the index once and report
//! canteen serve                 # web UI on http://127.0.0.1:8501
//! canteen chat                  # chat in the terminal
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`corpus`] | Corpus loader |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Vector index and build-once cache |
//! | [`llm`] | Generation provider and NDJSON streaming |
//! | [`prompt`] | Prompt templates |
//! | [`engine`] | Condense-plus-context chat engine |
//! | [`session`] | Chat session state machine |
//! | [`service`] | Process-wide wiring |
//! | [`server`] | HTTP + SSE front end |
//! | [`terminal`] | Terminal front end |

pub mod chunk;
pub mod config;
pub mod corpus;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod index;
pub mod llm;
pub mod models;
pub mod prompt;
pub mod server;
pub mod service;
pub mod session;
pub mod terminal;
