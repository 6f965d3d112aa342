//! Error taxonomy.
//!
//! Corpus and index errors are fatal and stop startup. [`ChatError`] is per
//! turn: the session survives it and the UI reports it inline.

use std::path::PathBuf;
use thiserror::Error;

/// The document directory could not be turned into a complete corpus.
#[derive(Error, Debug)]
pub enum CorpusLoadError {
    #[error("corpus directory does not exist: {0}")]
    MissingRoot(PathBuf),

    #[error("corpus root is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("failed to walk corpus directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("invalid corpus glob pattern: {0}")]
    Glob(#[from] globset::Error),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed CSV in {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },

    #[error("corpus directory {0} contains no documents")]
    Empty(PathBuf),
}

/// The one-time index build failed.
#[derive(Error, Debug)]
pub enum IndexBuildError {
    #[error(transparent)]
    Corpus(#[from] CorpusLoadError),

    #[error("embedding service failed: {0:#}")]
    Embedding(anyhow::Error),

    #[error("embedding service returned {actual} vectors for {expected} chunks")]
    VectorCountMismatch { expected: usize, actual: usize },

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// A chat turn could not be served.
#[derive(Error, Debug)]
pub enum ChatError {
    /// Generation or query embedding failed; the user may retry.
    #[error("chat engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("chat session is not ready")]
    NotReady,

    #[error("a response is still being generated for this session")]
    TurnInProgress,

    #[error(transparent)]
    Index(#[from] IndexBuildError),
}

impl ChatError {
    pub fn unavailable(err: anyhow::Error) -> Self {
        ChatError::EngineUnavailable(format!("{:#}", err))
    }
}
