//! Project and file chunking over the project collaborator.
//!
//! [`CodeChunker`] is the I/O side of chunking: it fetches file text,
//! extracts symbols, and hands both to the pure
//! [`chunk_source`](code_assist_core::chunk::chunk_source) planner. A file
//! that fails to read or chunk yields no chunks and a warning.

use std::sync::Arc;

use anyhow::Result;

use code_assist_core::chunk::{chunk_source, ChunkingOptions};
use code_assist_core::indexer::{detect_language, extract_symbols};
use code_assist_core::models::CodeChunk;
use code_assist_core::source::ProjectSource;

use crate::cancel::{cancellable, is_cancelled, CancellationToken};

pub struct CodeChunker {
    source: Arc<dyn ProjectSource>,
    options: ChunkingOptions,
}

impl CodeChunker {
    pub fn new(source: Arc<dyn ProjectSource>, options: ChunkingOptions) -> Self {
        Self { source, options }
    }

    pub fn options(&self) -> &ChunkingOptions {
        &self.options
    }

    pub async fn chunk_file(
        &self,
        program_id: &str,
        version_id: &str,
        path: &str,
        token: &CancellationToken,
    ) -> Result<Vec<CodeChunk>> {
        let content = cancellable(
            token,
            self.source.get_file_text(program_id, version_id, path),
        )
        .await?;
        let language = detect_language(path);
        let symbols = extract_symbols(path, &content, language);
        Ok(chunk_source(
            program_id,
            version_id,
            path,
            &content,
            language,
            &symbols,
            &self.options,
        ))
    }

    /// Chunk every source and config file of a program version.
    pub async fn chunk_project(
        &self,
        program_id: &str,
        version_id: &str,
        token: &CancellationToken,
    ) -> Result<Vec<CodeChunk>> {
        let structure = cancellable(
            token,
            self.source.analyze_project_structure(program_id, version_id),
        )
        .await?;

        let mut chunks = Vec::new();
        for path in structure.all_files() {
            match self.chunk_file(program_id, version_id, &path, token).await {
                Ok(file_chunks) => chunks.extend(file_chunks),
                Err(e) if is_cancelled(&e) => return Err(e),
                Err(e) => tracing::warn!(file = %path, error = %e, "skipping file during chunking"),
            }
        }
        Ok(chunks)
    }
}
