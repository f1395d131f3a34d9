//! Project-wide symbol indexing.
//!
//! [`CodeIndexer`] reads every source and config file of a program version
//! through the [`ProjectSource`] collaborator and runs the regex symbol
//! extractor over each. One unreadable file is logged and skipped; it never
//! fails the whole index.

use std::sync::Arc;

use anyhow::Result;

use code_assist_core::estimate_tokens;
use code_assist_core::indexer::{detect_language, extract_symbols};
use code_assist_core::models::{CodeSymbol, ProjectIndex};
use code_assist_core::source::ProjectSource;

use crate::cancel::{cancellable, is_cancelled, CancellationToken};

pub struct CodeIndexer {
    source: Arc<dyn ProjectSource>,
}

impl CodeIndexer {
    pub fn new(source: Arc<dyn ProjectSource>) -> Self {
        Self { source }
    }

    /// Symbols of one file.
    pub async fn index_file(
        &self,
        program_id: &str,
        version_id: &str,
        path: &str,
        token: &CancellationToken,
    ) -> Result<(Vec<CodeSymbol>, usize)> {
        let content = cancellable(
            token,
            self.source.get_file_text(program_id, version_id, path),
        )
        .await?;
        let symbols = extract_symbols(path, &content, detect_language(path));
        Ok((symbols, estimate_tokens(&content)))
    }

    /// Build the symbol table for a program version.
    ///
    /// Every source and config file is listed in `files`; files that could
    /// not be read are missing from `file_symbols`. Files with no symbols
    /// are recorded with an empty list.
    pub async fn generate_project_index(
        &self,
        program_id: &str,
        version_id: &str,
        token: &CancellationToken,
    ) -> Result<ProjectIndex> {
        let structure = cancellable(
            token,
            self.source.analyze_project_structure(program_id, version_id),
        )
        .await?;

        let mut index = ProjectIndex {
            program_id: program_id.to_string(),
            version_id: version_id.to_string(),
            language: structure.language.clone(),
            files: structure.all_files(),
            ..ProjectIndex::default()
        };

        for path in &index.files {
            match self.index_file(program_id, version_id, path, token).await {
                Ok((symbols, tokens)) => {
                    index.total_symbols += symbols.len();
                    index.estimated_tokens += tokens;
                    index.file_symbols.insert(path.clone(), symbols);
                }
                Err(e) if is_cancelled(&e) => return Err(e),
                Err(e) => {
                    tracing::warn!(file = %path, error = %e, "skipping file during indexing");
                }
            }
        }

        tracing::debug!(
            program = program_id,
            version = version_id,
            files = index.files.len(),
            symbols = index.total_symbols,
            "generated project index"
        );
        Ok(index)
    }
}
