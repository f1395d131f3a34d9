//! Per-version semantic code index.
//!
//! [`SemanticSearchService`] runs Chunker → Embedding Provider → Vector
//! Store to build the index of one (program, version), and answers
//! similarity queries against it.
//!
//! Indexing is all-or-nothing: any failing stage ends the run with a
//! failed [`IndexingResult`] carrying elapsed time and the counts reached
//! so far, and a collection created during the failed run is removed. Re-indexing an existing collection is a no-op unless
//! forced; a forced run deletes the collection before rebuilding, so the
//! chunk count afterwards is exactly the fresh count.
//!
//! Index, forced rebuild, and delete for one collection are serialized by
//! an in-process async mutex keyed by collection name. The store's atomic
//! create-if-absent covers callers in other processes.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use code_assist_core::embedding::EmbeddingProvider;
use code_assist_core::models::{CodeChunk, VectorSearchResult};
use code_assist_core::store::CodeVectorIndex;

use crate::cancel::{cancellable, is_cancelled, CancellationToken};
use crate::chunker::CodeChunker;
use crate::embedding::{embed_in_batches, BatchOptions};
use crate::progress::{IndexProgressEvent, IndexProgressReporter};

/// Outcome of one [`SemanticSearchService::index_project`] call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexingResult {
    pub success: bool,
    pub collection: String,
    /// The collection already existed and was left untouched.
    pub skipped: bool,
    pub chunks_created: usize,
    pub chunks_embedded: usize,
    pub chunks_stored: usize,
    pub elapsed_ms: u128,
    pub message: String,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub collection: String,
    pub exists: bool,
    pub indexed_at: Option<DateTime<Utc>>,
    pub chunk_count: usize,
    pub dims: Option<usize>,
}

/// Search knobs. `None` falls back to the service defaults.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub limit: Option<usize>,
    pub min_score: Option<f64>,
    /// Exact matches on chunk payload keys (`file_path`, `language`, ...).
    pub filters: BTreeMap<String, String>,
}

pub struct SemanticSearchService {
    chunker: Arc<CodeChunker>,
    embedder: Arc<dyn EmbeddingProvider>,
    index: CodeVectorIndex,
    batch: BatchOptions,
    default_limit: usize,
    min_score: f64,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SemanticSearchService {
    pub fn new(
        chunker: Arc<CodeChunker>,
        embedder: Arc<dyn EmbeddingProvider>,
        index: CodeVectorIndex,
        batch: BatchOptions,
    ) -> Self {
        Self {
            chunker,
            embedder,
            index,
            batch,
            default_limit: 10,
            min_score: 0.5,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_search_defaults(mut self, default_limit: usize, min_score: f64) -> Self {
        self.default_limit = default_limit.max(1);
        self.min_score = min_score.clamp(0.0, 1.0);
        self
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks
            .lock()
            .map(|locks| locks.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().len())
    }

    /// Whether an embedding backend is configured.
    pub fn is_enabled(&self) -> bool {
        self.embedder.dims() > 0
    }

    pub fn vector_index(&self) -> &CodeVectorIndex {
        &self.index
    }

    fn collection_lock(&self, collection: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Entries only the map still references are idle.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(collection.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Build the index for a program version.
    pub async fn index_project(
        &self,
        program_id: &str,
        version_id: &str,
        force_reindex: bool,
        token: &CancellationToken,
        progress: &dyn IndexProgressReporter,
    ) -> IndexingResult {
        let started = Instant::now();
        let collection = self.index.collection_for(program_id, version_id);
        let mut result = IndexingResult {
            collection: collection.clone(),
            ..IndexingResult::default()
        };

        let lock = self.collection_lock(&collection);
        let _guard = lock.lock().await;

        let outcome = self
            .run_index(program_id, version_id, force_reindex, token, progress, &mut result)
            .await;
        result.elapsed_ms = started.elapsed().as_millis();

        match outcome {
            Ok(()) => {
                result.success = true;
                if !result.skipped {
                    result.message = format!(
                        "Indexed {} chunks into {} in {:.1}s",
                        result.chunks_stored,
                        collection,
                        started.elapsed().as_secs_f64()
                    );
                    tracing::info!(
                        collection = %collection,
                        chunks = result.chunks_stored,
                        elapsed_ms = result.elapsed_ms as u64,
                        "indexing complete"
                    );
                }
            }
            Err(e) => {
                result.success = false;
                result.message = if is_cancelled(&e) {
                    "Indexing cancelled".to_string()
                } else {
                    format!("Indexing failed: {:#}", e)
                };
                tracing::error!(collection = %collection, error = %e, "indexing failed");
            }
        }
        result
    }

    async fn run_index(
        &self,
        program_id: &str,
        version_id: &str,
        force_reindex: bool,
        token: &CancellationToken,
        progress: &dyn IndexProgressReporter,
        result: &mut IndexingResult,
    ) -> Result<()> {
        let collection = result.collection.clone();

        if !force_reindex && self.index.collection_exists(program_id, version_id).await? {
            let warning = format!("{} is already indexed; pass force to rebuild it", collection);
            tracing::warn!(collection = %collection, "index exists, skipping");
            result.skipped = true;
            result.message = warning.clone();
            result.warnings.push(warning);
            return Ok(());
        }
        if !self.is_enabled() {
            bail!("embedding provider is disabled; configure [embedding] to build a semantic index");
        }
        if force_reindex {
            self.index.delete_collection(program_id, version_id).await?;
        }

        progress.report(IndexProgressEvent::Chunking {
            collection: collection.clone(),
        });
        let mut chunks = self
            .chunker
            .chunk_project(program_id, version_id, token)
            .await?;
        result.chunks_created = chunks.len();

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = embed_in_batches(
            self.embedder.as_ref(),
            &texts,
            &self.batch,
            token,
            progress,
            &collection,
        )
        .await?;
        let dims = self.embedder.dims();
        for (chunk, vector) in chunks.iter_mut().zip(vectors) {
            chunk.embedding = Some(vector);
            chunk.embedding_model = Some(self.embedder.model_name().to_string());
            chunk.embedding_dims = Some(dims);
        }
        result.chunks_embedded = chunks.len();

        let stored = match self
            .store_chunks(program_id, version_id, dims, &chunks, token)
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                // A collection left behind would read as "already indexed".
                if let Err(cleanup) = self.index.delete_collection(program_id, version_id).await {
                    tracing::warn!(
                        collection = %collection,
                        error = %cleanup,
                        "failed to remove partial collection"
                    );
                }
                return Err(e);
            }
        };
        result.chunks_stored = stored;
        progress.report(IndexProgressEvent::Storing {
            collection,
            n: stored as u64,
        });

        if chunks.is_empty() {
            result
                .warnings
                .push("No chunks were produced; the index is empty".to_string());
        }
        Ok(())
    }

    async fn store_chunks(
        &self,
        program_id: &str,
        version_id: &str,
        dims: usize,
        chunks: &[CodeChunk],
        token: &CancellationToken,
    ) -> Result<usize> {
        cancellable(
            token,
            self.index
                .create_or_update_collection(program_id, version_id, dims),
        )
        .await?;
        cancellable(
            token,
            self.index.upsert_chunks(program_id, version_id, chunks),
        )
        .await
    }

    /// Chunks similar to `query`. An unindexed version yields an empty list.
    pub async fn search_code(
        &self,
        program_id: &str,
        version_id: &str,
        query: &str,
        options: &SearchOptions,
        token: &CancellationToken,
    ) -> Result<Vec<VectorSearchResult>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        if !self.index.collection_exists(program_id, version_id).await? {
            tracing::debug!(program = program_id, version = version_id, "search on unindexed version");
            return Ok(Vec::new());
        }

        let query_vec = cancellable(token, self.embedder.embed(query)).await?;
        self.index
            .search_similar(
                program_id,
                version_id,
                &query_vec,
                options.limit.unwrap_or(self.default_limit),
                options.min_score.unwrap_or(self.min_score),
                &options.filters,
            )
            .await
    }

    /// Drop the index for a version. Returns `false` if there was none.
    pub async fn delete_index(&self, program_id: &str, version_id: &str) -> Result<bool> {
        let collection = self.index.collection_for(program_id, version_id);
        let lock = self.collection_lock(&collection);
        let _guard = lock.lock().await;
        self.index.delete_collection(program_id, version_id).await
    }

    pub async fn index_status(&self, program_id: &str, version_id: &str) -> Result<IndexStatus> {
        let collection = self.index.collection_for(program_id, version_id);
        Ok(match self.index.stats(program_id, version_id).await? {
            Some(stats) => IndexStatus {
                collection,
                exists: true,
                indexed_at: stats.indexed_at,
                chunk_count: stats.chunk_count,
                dims: Some(stats.dims),
            },
            None => IndexStatus {
                collection,
                exists: false,
                indexed_at: None,
                chunk_count: 0,
                dims: None,
            },
        })
    }
}
