//! Construction of the service graph from configuration.
//!
//! One shared `reqwest::Client` (one connection pool) is built here and
//! handed to every HTTP-backed provider. The graph lives as long as the
//! [`Services`] value.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use code_assist_core::embedding::EmbeddingProvider;
use code_assist_core::llm::LlmClient;
use code_assist_core::store::memory::InMemoryVectorStore;
use code_assist_core::store::{CodeVectorIndex, VectorStore};

use crate::assistant::AiAssistant;
use crate::chunker::CodeChunker;
use crate::config::Config;
use crate::embedding::{create_provider, BatchOptions};
use crate::indexer::CodeIndexer;
use crate::intent::IntentClassifier;
use crate::llm::create_llm_client;
use crate::semantic_search::SemanticSearchService;
use crate::sqlite_store::SqliteVectorStore;
use crate::workspace::FsWorkspace;

pub struct Services {
    pub workspace: Arc<FsWorkspace>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub llm: Arc<dyn LlmClient>,
    pub indexer: CodeIndexer,
    pub chunker: Arc<CodeChunker>,
    pub search: Arc<SemanticSearchService>,
    pub classifier: Arc<IntentClassifier>,
    pub assistant: AiAssistant,
}

/// Open the configured vector store backend.
pub async fn open_store(config: &Config) -> Result<Arc<dyn VectorStore>> {
    match config.vector_store.provider.as_str() {
        "sqlite" => Ok(Arc::new(SqliteVectorStore::open(config).await?)),
        "memory" => Ok(Arc::new(InMemoryVectorStore::new())),
        other => bail!("Unknown vector store provider: {}", other),
    }
}

impl Services {
    pub async fn from_config(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(
                config.llm.timeout_secs.max(config.embedding.timeout_secs),
            ))
            .build()
            .context("failed to build HTTP client")?;

        let embedder: Arc<dyn EmbeddingProvider> =
            Arc::from(create_provider(&config.embedding, http.clone())?);
        let llm = create_llm_client(&config.llm, http)?;
        let store = open_store(config).await?;

        Ok(Self::assemble(config, store, embedder, llm))
    }

    /// Wire the services around already-built backends.
    pub fn assemble(
        config: &Config,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        let workspace = Arc::new(FsWorkspace::from_config(config));
        let index = CodeVectorIndex::new(store, config.vector_store.collection_prefix.clone());

        let chunker = Arc::new(CodeChunker::new(workspace.clone(), config.chunking.options()));
        let indexer = CodeIndexer::new(workspace.clone());
        let search = Arc::new(
            SemanticSearchService::new(
                chunker.clone(),
                embedder.clone(),
                index,
                BatchOptions::from_config(&config.embedding),
            )
            .with_search_defaults(config.vector_store.default_limit, config.vector_store.min_score),
        );
        let classifier = Arc::new(
            IntentClassifier::new(llm.clone(), config.intent.clone()).with_search(search.clone()),
        );
        let assistant = AiAssistant::new(
            workspace.clone(),
            workspace.clone(),
            workspace.clone(),
            classifier.clone(),
            llm.clone(),
            config.assistant.clone(),
        );

        Self {
            workspace,
            embedder,
            llm,
            indexer,
            chunker,
            search,
            classifier,
            assistant,
        }
    }
}
