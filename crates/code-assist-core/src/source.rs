//! Collaborators that supply project data to the pipeline.
//!
//! The pipeline never reads files or resolves versions itself. It asks
//! three narrow traits, implemented by whatever hosts the projects (the
//! app crate ships a filesystem-backed implementation).
//!
//! | Trait | Used for |
//! |-------|----------|
//! | [`ProjectSource`] | Structure analysis and raw file bytes |
//! | [`VersionResolver`] | A program's current version |
//! | [`ComponentCatalog`] | Registered UI components (optional context) |

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{ProjectStructureAnalysis, UiComponentMapping};

/// Errors a collaborator reports when the request itself is wrong.
///
/// Returned inside `anyhow::Error`; callers that care downcast with
/// `err.downcast_ref::<SourceError>()`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
}

#[async_trait]
pub trait ProjectSource: Send + Sync {
    async fn analyze_project_structure(
        &self,
        program_id: &str,
        version_id: &str,
    ) -> Result<ProjectStructureAnalysis>;

    /// Raw bytes of one project file. `path` is relative to the version
    /// root, as listed in the structure analysis.
    async fn get_file_content(&self, program_id: &str, version_id: &str, path: &str)
        -> Result<Vec<u8>>;

    /// File content decoded as UTF-8, replacing invalid sequences.
    async fn get_file_text(&self, program_id: &str, version_id: &str, path: &str) -> Result<String> {
        let bytes = self.get_file_content(program_id, version_id, path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[async_trait]
pub trait VersionResolver: Send + Sync {
    /// Fails with [`SourceError::NotFound`] when the program is unknown or
    /// has no current version.
    async fn current_version(&self, program_id: &str) -> Result<String>;
}

#[async_trait]
pub trait ComponentCatalog: Send + Sync {
    /// An empty list is a normal answer.
    async fn component_mappings(
        &self,
        program_id: &str,
        version_id: &str,
    ) -> Result<Vec<UiComponentMapping>>;
}
