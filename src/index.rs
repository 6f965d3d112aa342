//! In-memory vector index and the process-wide index cache.
//!
//! [`VectorIndex`] is immutable once built: chunks, their parent documents
//! and their vectors live in plain `Vec`s and retrieval is a brute-force
//! cosine scan. Because nothing mutates it after publication, every chat
//! session reads it through an `Arc` with no locking.
//!
//! [`IndexCache`] guarantees the expensive load → chunk → embed pipeline runs
//! at most once per process. Concurrent first callers all await the same
//! build and receive the same `Arc`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::info;

use crate::chunk::chunk_document;
use crate::config::{ChunkingConfig, CorpusConfig, EmbeddingConfig};
use crate::corpus::load_corpus;
use crate::embedding::{cosine_similarity, EmbeddingProvider};
use crate::error::IndexBuildError;
use crate::models::{Chunk, Document, ScoredChunk};

struct IndexedChunk {
    chunk: Chunk,
    document: Arc<Document>,
    vector: Vec<f32>,
}

/// Read-only similarity index over the corpus.
pub struct VectorIndex {
    entries: Vec<IndexedChunk>,
    document_count: usize,
    model: String,
    dims: usize,
}

impl VectorIndex {
    /// Chunk and embed `documents`.
    pub async fn build(
        documents: Vec<Document>,
        embedder: &dyn EmbeddingProvider,
        max_tokens: usize,
        batch_size: usize,
        expected_dims: Option<usize>,
    ) -> Result<Self, IndexBuildError> {
        let document_count = documents.len();
        let mut pending: Vec<(Chunk, Arc<Document>)> = Vec::new();
        for document in documents {
            let document = Arc::new(document);
            for chunk in chunk_document(&document, max_tokens) {
                pending.push((chunk, document.clone()));
            }
        }

        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(pending.len());
        for batch in pending.chunks(batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|(c, _)| c.text.clone()).collect();
            let embedded = embedder
                .embed(&texts)
                .await
                .map_err(IndexBuildError::Embedding)?;
            if embedded.len() != texts.len() {
                return Err(IndexBuildError::VectorCountMismatch {
                    expected: texts.len(),
                    actual: embedded.len(),
                });
            }
            vectors.extend(embedded);
        }

        let dims = expected_dims
            .or_else(|| vectors.first().map(Vec::len))
            .unwrap_or(0);
        if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
            return Err(IndexBuildError::DimensionMismatch {
                expected: dims,
                actual: bad.len(),
            });
        }

        let entries = pending
            .into_iter()
            .zip(vectors)
            .map(|((chunk, document), vector)| IndexedChunk {
                chunk,
                document,
                vector,
            })
            .collect();

        Ok(Self {
            entries,
            document_count,
            model: embedder.model_name().to_string(),
            dims,
        })
    }

    /// The `top_k` chunks most similar to `query_vec`, best first. Equal
    /// scores keep corpus order.
    pub fn retrieve(&self, query_vec: &[f32], top_k: usize) -> Vec<ScoredChunk> {
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| (idx, cosine_similarity(query_vec, &entry.vector)))
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(top_k);

        scored
            .into_iter()
            .map(|(idx, score)| {
                let entry = &self.entries[idx];
                ScoredChunk {
                    chunk: entry.chunk.clone(),
                    document: entry.document.clone(),
                    score,
                }
            })
            .collect()
    }

    pub fn document_count(&self) -> usize {
        self.document_count
    }

    pub fn chunk_count(&self) -> usize {
        self.entries.len()
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }
}

/// Build-once holder for the process's [`VectorIndex`].
///
/// There is no invalidation: corpus changes on disk are picked up only by
/// restarting the process. A failed build publishes nothing.
pub struct IndexCache {
    corpus: CorpusConfig,
    max_tokens: usize,
    batch_size: usize,
    expected_dims: Option<usize>,
    embedder: Arc<dyn EmbeddingProvider>,
    cell: OnceCell<Arc<VectorIndex>>,
    builds: AtomicUsize,
}

impl IndexCache {
    pub fn new(
        corpus: CorpusConfig,
        chunking: &ChunkingConfig,
        embedding: &EmbeddingConfig,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            corpus,
            max_tokens: chunking.max_tokens,
            batch_size: embedding.batch_size,
            expected_dims: embedding.dims,
            embedder,
            cell: OnceCell::new(),
            builds: AtomicUsize::new(0),
        }
    }

    /// Return the index, building it on first use.
    pub async fn get_index(&self) -> Result<Arc<VectorIndex>, IndexBuildError> {
        self.cell.get_or_try_init(|| self.build()).await.cloned()
    }

    /// The index if it has already been published.
    pub fn get(&self) -> Option<Arc<VectorIndex>> {
        self.cell.get().cloned()
    }

    /// How many builds have been started in this process.
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    async fn build(&self) -> Result<Arc<VectorIndex>, IndexBuildError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        info!(root = %self.corpus.root.display(), "building index");

        let corpus = self.corpus.clone();
        let documents = tokio::task::spawn_blocking(move || load_corpus(&corpus))
            .await
            .map_err(|e| IndexBuildError::Embedding(anyhow::anyhow!("corpus task failed: {}", e)))??;

        let index = VectorIndex::build(
            documents,
            self.embedder.as_ref(),
            self.max_tokens,
            self.batch_size,
            self.expected_dims,
        )
        .await?;

        info!(
            documents = index.document_count(),
            chunks = index.chunk_count(),
            dims = index.dims(),
            model = index.model_name(),
            "index ready"
        );
        Ok(Arc::new(index))
    }
}
