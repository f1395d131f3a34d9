//! End-to-end tests of the indexing, classification, and assistant
//! pipeline with in-test collaborators.
//!
//! The project source, embedder, and LLM are small trait implementations
//! defined here, so every test runs offline against the real services.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use code_assist::assistant::{AiAssistant, AssistantRequest, ConfidenceLevel, COMPONENTS_MODULE_PATH};
use code_assist::cancel::CancellationToken;
use code_assist::chunker::CodeChunker;
use code_assist::config::{AssistantConfig, IntentConfig};
use code_assist::embedding::{BatchOptions, DisabledProvider};
use code_assist::indexer::CodeIndexer;
use code_assist::intent::IntentClassifier;
use code_assist::progress::NoProgress;
use code_assist::semantic_search::{SearchOptions, SemanticSearchService};
use code_assist_core::chunk::ChunkingOptions;
use code_assist_core::embedding::EmbeddingProvider;
use code_assist_core::llm::{ChatOptions, LlmClient, LlmError, LlmMessage, LlmResponse};
use code_assist_core::models::{
    Complexity, FileSelectionScope, IntentType, ProjectStructureAnalysis, UiComponentMapping,
    UserIntent,
};
use code_assist_core::response::parse_ai_response;
use code_assist_core::source::{ComponentCatalog, ProjectSource, SourceError, VersionResolver};
use code_assist_core::store::memory::InMemoryVectorStore;
use code_assist_core::store::{
    CodeVectorIndex, PayloadFilter, ScoredPoint, VectorPoint, VectorStore, POINT_TYPE,
    POINT_TYPE_CHUNK,
};

// ─── Test project ───────────────────────────────────────────────────

const CONFIG_NAMES: [&str; 2] = ["package.json", "tsconfig.json"];

fn sample_files() -> BTreeMap<String, String> {
    let files = [
        (
            "src/index.ts",
            "import { Cart } from './cart/cart';\n\nexport function main() {\n    const cart = new Cart();\n    console.log(cart.total());\n}\n",
        ),
        (
            "src/cart/cart.ts",
            "export class Cart {\n    private items: number[] = [];\n\n    add(price: number) {\n        this.items.push(price);\n    }\n\n    total() {\n        return this.items.reduce((a, b) => a + b, 0);\n    }\n}\n",
        ),
        (
            "src/cart/pricing.ts",
            "export function applyDiscount(total: number, pct: number) {\n    return total * (1 - pct / 100);\n}\n",
        ),
        (
            "src/auth/login.ts",
            "export async function login(user: string, password: string) {\n    if (!user) {\n        throw new Error('missing user');\n    }\n    return { user };\n}\n",
        ),
        (
            "src/util/format.ts",
            "export function formatPrice(value: number) {\n    return `$${value.toFixed(2)}`;\n}\n",
        ),
        (
            "package.json",
            "{\n  \"name\": \"shop\",\n  \"main\": \"src/index.ts\",\n  \"dependencies\": { \"express\": \"^4.0.0\" }\n}\n",
        ),
        (
            "tsconfig.json",
            "{\n  \"compilerOptions\": { \"strict\": true }\n}\n",
        ),
    ];
    files
        .iter()
        .map(|(p, c)| (p.to_string(), c.to_string()))
        .collect()
}

/// An in-memory program `shop` with one version `v1`.
struct MemProject {
    files: Mutex<BTreeMap<String, String>>,
    failing: BTreeSet<String>,
    components: Vec<UiComponentMapping>,
    reads: AtomicUsize,
}

impl MemProject {
    fn new() -> Self {
        Self {
            files: Mutex::new(sample_files()),
            failing: BTreeSet::new(),
            components: Vec::new(),
            reads: AtomicUsize::new(0),
        }
    }

    fn failing_on(mut self, path: &str) -> Self {
        self.failing.insert(path.to_string());
        self
    }

    fn with_components(mut self, components: Vec<UiComponentMapping>) -> Self {
        self.components = components;
        self
    }

    fn remove(&self, path: &str) {
        self.files.lock().unwrap().remove(path);
    }

    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn check(&self, program_id: &str, version_id: &str) -> Result<()> {
        if program_id != "shop" || version_id != "v1" {
            return Err(SourceError::NotFound(format!("{}/{}", program_id, version_id)).into());
        }
        Ok(())
    }
}

fn structure_of(paths: &[String]) -> ProjectStructureAnalysis {
    let (config, source): (Vec<String>, Vec<String>) = paths
        .iter()
        .cloned()
        .partition(|p| CONFIG_NAMES.contains(&p.as_str()));
    ProjectStructureAnalysis {
        language: "typescript".into(),
        project_type: "node".into(),
        entry_points: vec!["src/index.ts".into()],
        source_files: source,
        config_files: config,
        binary_files: Vec::new(),
        dependencies: vec!["express".into()],
    }
}

#[async_trait]
impl ProjectSource for MemProject {
    async fn analyze_project_structure(
        &self,
        program_id: &str,
        version_id: &str,
    ) -> Result<ProjectStructureAnalysis> {
        self.check(program_id, version_id)?;
        let paths: Vec<String> = self.files.lock().unwrap().keys().cloned().collect();
        Ok(structure_of(&paths))
    }

    async fn get_file_content(&self, program_id: &str, version_id: &str, path: &str) -> Result<Vec<u8>> {
        self.check(program_id, version_id)?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(path) {
            return Err(anyhow!("disk error reading {}", path));
        }
        self.files
            .lock()
            .unwrap()
            .get(path)
            .map(|c| c.as_bytes().to_vec())
            .ok_or_else(|| SourceError::NotFound(path.to_string()).into())
    }
}

#[async_trait]
impl VersionResolver for MemProject {
    async fn current_version(&self, program_id: &str) -> Result<String> {
        if program_id == "shop" {
            Ok("v1".to_string())
        } else {
            Err(SourceError::NotFound(format!("program '{}'", program_id)).into())
        }
    }
}

#[async_trait]
impl ComponentCatalog for MemProject {
    async fn component_mappings(&self, program_id: &str, version_id: &str) -> Result<Vec<UiComponentMapping>> {
        self.check(program_id, version_id)?;
        Ok(self.components.clone())
    }
}

// ─── Test embedder ──────────────────────────────────────────────────

/// Byte-histogram embeddings: deterministic, and similar for similar text.
struct HistogramEmbedder {
    batches: AtomicUsize,
}

impl HistogramEmbedder {
    fn new() -> Self {
        Self {
            batches: AtomicUsize::new(0),
        }
    }

    fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for HistogramEmbedder {
    fn model_name(&self) -> &str {
        "histogram"
    }

    fn dims(&self) -> usize {
        8
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![1.0f32; 8];
                for b in t.bytes() {
                    v[(b % 8) as usize] += 1.0;
                }
                v
            })
            .collect())
    }
}

// ─── Test LLM ───────────────────────────────────────────────────────

/// Answers classification calls (those with a response schema) and
/// assistant calls separately. `None` makes that call fail.
struct ScriptedLlm {
    classification: Option<LlmResponse>,
    answer: Option<LlmResponse>,
    system_prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    fn failing() -> Self {
        Self::new(None, None)
    }

    fn new(classification: Option<LlmResponse>, answer: Option<LlmResponse>) -> Self {
        Self {
            classification,
            answer,
            system_prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }
}

fn text_reply(content: &str) -> LlmResponse {
    LlmResponse {
        content: content.to_string(),
        finish_reason: Some("STOP".into()),
        total_tokens: 42,
        model: "scripted".into(),
        ..LlmResponse::default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn chat_completion(
        &self,
        system_prompt: &str,
        _messages: &[LlmMessage],
        options: &ChatOptions,
    ) -> Result<LlmResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.system_prompts
            .lock()
            .unwrap()
            .push(system_prompt.to_string());
        let scripted = if options.response_schema.is_some() {
            &self.classification
        } else {
            &self.answer
        };
        scripted
            .clone()
            .ok_or_else(|| LlmError::Http {
                status: 500,
                body: "scripted failure".into(),
            })
    }
}

// ─── Test store ─────────────────────────────────────────────────────

/// In-memory store whose chunk upserts fail while `failing` is set.
struct FlakyStore {
    inner: InMemoryVectorStore,
    failing: AtomicBool,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: InMemoryVectorStore::new(),
            failing: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl VectorStore for FlakyStore {
    fn provider_name(&self) -> &str {
        "flaky"
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool> {
        self.inner.collection_exists(collection).await
    }

    async fn create_collection_if_absent(&self, collection: &str, dims: usize) -> Result<bool> {
        self.inner.create_collection_if_absent(collection, dims).await
    }

    async fn delete_collection(&self, collection: &str) -> Result<bool> {
        self.inner.delete_collection(collection).await
    }

    async fn collection_dims(&self, collection: &str) -> Result<Option<usize>> {
        self.inner.collection_dims(collection).await
    }

    async fn upsert_points(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()> {
        let has_chunks = points
            .iter()
            .any(|p| p.payload.get(POINT_TYPE).and_then(|v| v.as_str()) == Some(POINT_TYPE_CHUNK));
        if has_chunks && self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("store unreachable"));
        }
        self.inner.upsert_points(collection, points).await
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        limit: usize,
        min_score: f64,
        filter: &PayloadFilter,
    ) -> Result<Vec<ScoredPoint>> {
        self.inner.search(collection, query, limit, min_score, filter).await
    }

    async fn delete_point(&self, collection: &str, id: &str) -> Result<bool> {
        self.inner.delete_point(collection, id).await
    }

    async fn count_points(&self, collection: &str, filter: &PayloadFilter) -> Result<usize> {
        self.inner.count_points(collection, filter).await
    }

    async fn scroll(
        &self,
        collection: &str,
        filter: &PayloadFilter,
        limit: usize,
    ) -> Result<Vec<VectorPoint>> {
        self.inner.scroll(collection, filter, limit).await
    }
}

// ─── Wiring ─────────────────────────────────────────────────────────

fn search_service(
    project: Arc<MemProject>,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
) -> SemanticSearchService {
    let chunker = Arc::new(CodeChunker::new(project, ChunkingOptions::default()));
    SemanticSearchService::new(
        chunker,
        embedder,
        CodeVectorIndex::new(store, "code_"),
        BatchOptions {
            batch_size: 2,
            delay: Duration::ZERO,
        },
    )
    .with_search_defaults(10, 0.5)
}

fn build_assistant(project: Arc<MemProject>, llm: Arc<ScriptedLlm>) -> AiAssistant {
    let classifier = Arc::new(IntentClassifier::new(llm.clone(), IntentConfig::default()));
    AiAssistant::new(
        project.clone(),
        project.clone(),
        project,
        classifier,
        llm,
        AssistantConfig::default(),
    )
}

fn intent(scope: FileSelectionScope, concept: Option<&str>) -> UserIntent {
    UserIntent {
        intent_type: IntentType::Question,
        scope,
        related_concept: concept.map(str::to_string),
        target_file: None,
        required_files: Vec::new(),
        complexity: Complexity::Low,
        confidence: 0.9,
        scope_reasoning: String::new(),
    }
}

// ─── Indexing ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_reindex_without_force_is_noop() {
    let project = Arc::new(MemProject::new());
    let embedder = Arc::new(HistogramEmbedder::new());
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
    let service = search_service(project.clone(), embedder.clone(), store);
    let token = CancellationToken::new();

    let first = service.index_project("shop", "v1", false, &token, &NoProgress).await;
    assert!(first.success, "{}", first.message);
    assert!(first.chunks_stored > 0);

    let reads = project.reads();
    let batches = embedder.batches();
    let second = service.index_project("shop", "v1", false, &token, &NoProgress).await;

    assert!(second.success);
    assert!(second.skipped);
    assert!(!second.warnings.is_empty());
    assert_eq!(project.reads(), reads, "no file was chunked");
    assert_eq!(embedder.batches(), batches, "nothing was embedded");
}

#[tokio::test]
async fn test_forced_reindex_replaces_collection() {
    let project = Arc::new(MemProject::new());
    let embedder = Arc::new(HistogramEmbedder::new());
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
    let service = search_service(project.clone(), embedder, store);
    let token = CancellationToken::new();

    let first = service.index_project("shop", "v1", false, &token, &NoProgress).await;
    assert!(first.success, "{}", first.message);

    project.remove("src/auth/login.ts");
    let second = service.index_project("shop", "v1", true, &token, &NoProgress).await;
    assert!(second.success, "{}", second.message);
    assert!(!second.skipped);
    assert!(second.chunks_created < first.chunks_created);

    let status = service.index_status("shop", "v1").await.unwrap();
    assert!(status.exists);
    assert_eq!(status.chunk_count, second.chunks_created);
    assert_eq!(status.dims, Some(8));
    assert!(status.indexed_at.is_some());
}

#[tokio::test]
async fn test_forced_reindex_without_embedder_keeps_index() {
    let project = Arc::new(MemProject::new());
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
    let token = CancellationToken::new();

    let working = search_service(project.clone(), Arc::new(HistogramEmbedder::new()), store.clone());
    let built = working.index_project("shop", "v1", false, &token, &NoProgress).await;
    assert!(built.success);

    let disabled = search_service(project, Arc::new(DisabledProvider), store);
    let result = disabled.index_project("shop", "v1", true, &token, &NoProgress).await;
    assert!(!result.success);
    assert!(result.message.contains("disabled"));

    let status = working.index_status("shop", "v1").await.unwrap();
    assert_eq!(status.chunk_count, built.chunks_stored);
}

#[tokio::test]
async fn test_concurrent_index_builds_once() {
    let project = Arc::new(MemProject::new());
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
    let service = search_service(project, Arc::new(HistogramEmbedder::new()), store);
    let token = CancellationToken::new();

    let (a, b) = tokio::join!(
        service.index_project("shop", "v1", false, &token, &NoProgress),
        service.index_project("shop", "v1", false, &token, &NoProgress),
    );
    assert!(a.success && b.success);
    assert_eq!([a.skipped, b.skipped].iter().filter(|s| **s).count(), 1);
}

#[tokio::test]
async fn test_failed_store_leaves_no_collection() {
    let project = Arc::new(MemProject::new());
    let store = Arc::new(FlakyStore::new());
    let service = search_service(project, Arc::new(HistogramEmbedder::new()), store.clone());
    let token = CancellationToken::new();

    let failed = service.index_project("shop", "v1", false, &token, &NoProgress).await;
    assert!(!failed.success);
    assert!(failed.message.contains("store unreachable"), "{}", failed.message);
    let status = service.index_status("shop", "v1").await.unwrap();
    assert!(!status.exists);

    store.failing.store(false, Ordering::SeqCst);
    let retried = service.index_project("shop", "v1", false, &token, &NoProgress).await;
    assert!(retried.success, "{}", retried.message);
    assert!(!retried.skipped);
    let status = service.index_status("shop", "v1").await.unwrap();
    assert_eq!(status.chunk_count, retried.chunks_stored);
    assert!(status.chunk_count > 0);
}

#[tokio::test]
async fn test_cancelled_index_reports_cancellation() {
    let project = Arc::new(MemProject::new());
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
    let service = search_service(project, Arc::new(HistogramEmbedder::new()), store);
    let token = CancellationToken::new();
    token.cancel();

    let result = service.index_project("shop", "v1", false, &token, &NoProgress).await;
    assert!(!result.success);
    assert_eq!(result.message, "Indexing cancelled");
}

#[tokio::test]
async fn test_search_unindexed_is_empty_then_ranked() {
    let project = Arc::new(MemProject::new());
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
    let service = search_service(project, Arc::new(HistogramEmbedder::new()), store);
    let token = CancellationToken::new();
    let options = SearchOptions::default();

    let before = service
        .search_code("shop", "v1", "cart total", &options, &token)
        .await
        .unwrap();
    assert!(before.is_empty());

    service.index_project("shop", "v1", false, &token, &NoProgress).await;
    let hits = service
        .search_code("shop", "v1", "cart total", &options, &token)
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].rank, 1);
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    let known = sample_files();
    assert!(hits.iter().all(|h| known.contains_key(&h.chunk.file_path)));
}

#[tokio::test]
async fn test_symbol_index_skips_unreadable_file() {
    let project = Arc::new(MemProject::new().failing_on("src/auth/login.ts"));
    let indexer = CodeIndexer::new(project);
    let index = indexer
        .generate_project_index("shop", "v1", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(index.files.len(), 7);
    assert!(!index.file_symbols.contains_key("src/auth/login.ts"));
    assert_eq!(index.file_symbols.len(), 6);
    assert!(index.file_symbols.contains_key("package.json"));
    let cart = &index.file_symbols["src/cart/cart.ts"];
    assert!(cart.iter().any(|s| s.name == "Cart"));
}

#[tokio::test]
async fn test_chunk_ids_are_stable() {
    let project = Arc::new(MemProject::new());
    let chunker = CodeChunker::new(project, ChunkingOptions::default());
    let token = CancellationToken::new();

    let a = chunker.chunk_file("shop", "v1", "src/cart/cart.ts", &token).await.unwrap();
    let b = chunker.chunk_file("shop", "v1", "src/cart/cart.ts", &token).await.unwrap();
    assert!(!a.is_empty());
    let ids = |chunks: &[code_assist_core::models::CodeChunk]| {
        chunks
            .iter()
            .map(|c| (c.id.clone(), c.content_hash.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(ids(&a), ids(&b));
}

// ─── Intent classification and file selection ───────────────────────

#[tokio::test]
async fn test_classifier_falls_back_to_heuristics() {
    let project = MemProject::new();
    let structure = project.analyze_project_structure("shop", "v1").await.unwrap();
    let classifier = IntentClassifier::new(Arc::new(ScriptedLlm::failing()), IntentConfig::default());

    let intent = classifier
        .classify_intent("fix the null pointer bug", &structure, &[], None, &CancellationToken::new())
        .await;
    assert_eq!(intent.intent_type, IntentType::BugFix);
    assert_eq!(intent.complexity, Complexity::Medium);
    assert_eq!(intent.confidence, 0.7);
}

#[tokio::test]
async fn test_classifier_uses_llm_reply() {
    let project = MemProject::new();
    let structure = project.analyze_project_structure("shop", "v1").await.unwrap();
    let reply = text_reply(
        r#"{"intentType": "Refactoring", "fileScope": "Related", "relatedConcept": "cart",
            "mentionedFiles": ["src/cart/cart.ts"], "reasoning": "cart rework",
            "complexity": "High", "confidence": 0.85}"#,
    );
    let classifier = IntentClassifier::new(
        Arc::new(ScriptedLlm::new(Some(reply), None)),
        IntentConfig::default(),
    );

    let intent = classifier
        .classify_intent("restructure the cart", &structure, &["src/index.ts".into()], None, &CancellationToken::new())
        .await;
    assert_eq!(intent.intent_type, IntentType::Refactoring);
    assert_eq!(intent.scope, FileSelectionScope::Related);
    assert_eq!(intent.related_concept.as_deref(), Some("cart"));
    assert_eq!(intent.confidence, 0.85);
    assert_eq!(intent.required_files, vec!["src/cart/cart.ts", "src/index.ts"]);
}

#[tokio::test]
async fn test_blocked_classification_falls_back() {
    let project = MemProject::new();
    let structure = project.analyze_project_structure("shop", "v1").await.unwrap();
    let blocked = LlmResponse::blocked("scripted", "SAFETY", None);
    let classifier = IntentClassifier::new(
        Arc::new(ScriptedLlm::new(Some(blocked), None)),
        IntentConfig::default(),
    );

    let intent = classifier
        .classify_intent("add a wishlist feature", &structure, &[], None, &CancellationToken::new())
        .await;
    assert_eq!(intent.confidence, 0.7);
}

#[tokio::test]
async fn test_all_files_scope_returns_every_known_file() {
    let project = MemProject::new();
    let structure = project.analyze_project_structure("shop", "v1").await.unwrap();
    let classifier = IntentClassifier::new(Arc::new(ScriptedLlm::failing()), IntentConfig::default());

    let files = classifier
        .select_files_based_on_scope(
            &intent(FileSelectionScope::AllFiles, None),
            &structure,
            "shop",
            "v1",
            usize::MAX,
            &CancellationToken::new(),
        )
        .await;
    assert_eq!(files.len(), 7);
    let expected: BTreeSet<String> = sample_files().into_keys().collect();
    assert_eq!(files.iter().cloned().collect::<BTreeSet<_>>(), expected);
    assert_eq!(files[0], "src/index.ts");
}

#[tokio::test]
async fn test_token_budget_caps_selection() {
    let project = MemProject::new();
    let structure = project.analyze_project_structure("shop", "v1").await.unwrap();
    let classifier = IntentClassifier::new(Arc::new(ScriptedLlm::failing()), IntentConfig::default());

    let files = classifier
        .select_files_based_on_scope(
            &intent(FileSelectionScope::AllFiles, None),
            &structure,
            "shop",
            "v1",
            1000,
            &CancellationToken::new(),
        )
        .await;
    assert_eq!(files.len(), 2);
}

#[tokio::test]
async fn test_every_scope_selects_only_known_files() {
    let project = MemProject::new();
    let structure = project.analyze_project_structure("shop", "v1").await.unwrap();
    let classifier = IntentClassifier::new(Arc::new(ScriptedLlm::failing()), IntentConfig::default());
    let token = CancellationToken::new();

    let mut specific = intent(FileSelectionScope::Specific, None);
    specific.required_files = vec!["src/cart/pricing.ts".into(), "src/ghost.ts".into()];

    let cases = [
        (specific, Some("src/cart/pricing.ts")),
        (intent(FileSelectionScope::Pattern, Some("*.json")), Some("package.json")),
        (intent(FileSelectionScope::Related, Some("cart")), Some("src/cart/cart.ts")),
        (intent(FileSelectionScope::AllFiles, None), None),
    ];
    for (case, must_include) in cases {
        let files = classifier
            .select_files_based_on_scope(&case, &structure, "shop", "v1", usize::MAX, &token)
            .await;
        assert!(!files.is_empty(), "{:?} selected nothing", case.scope);
        assert!(files.iter().all(|f| structure.contains_file(f)), "{:?}: {:?}", case.scope, files);
        if let Some(path) = must_include {
            assert!(files.iter().any(|f| f == path), "{:?}: {:?}", case.scope, files);
        }
    }
}

#[tokio::test]
async fn test_related_scope_uses_semantic_index() {
    let project = Arc::new(MemProject::new());
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
    let search = Arc::new(search_service(project.clone(), Arc::new(HistogramEmbedder::new()), store));
    let token = CancellationToken::new();
    search.index_project("shop", "v1", false, &token, &NoProgress).await;

    let structure = project.analyze_project_structure("shop", "v1").await.unwrap();
    let classifier = IntentClassifier::new(Arc::new(ScriptedLlm::failing()), IntentConfig::default())
        .with_search(search);
    let files = classifier
        .select_files_based_on_scope(
            &intent(FileSelectionScope::Related, Some("applyDiscount total pct")),
            &structure,
            "shop",
            "v1",
            usize::MAX,
            &token,
        )
        .await;
    assert!(!files.is_empty());
    assert!(files.iter().all(|f| structure.contains_file(f)));
}

// ─── Assistant ──────────────────────────────────────────────────────

fn request(program: &str, prompt: &str) -> AssistantRequest {
    AssistantRequest {
        program_id: program.to_string(),
        prompt: prompt.to_string(),
        conversation_id: "c1".to_string(),
        ..AssistantRequest::default()
    }
}

#[tokio::test]
async fn test_assistant_structured_reply() {
    let project = Arc::new(MemProject::new().with_components(vec![UiComponentMapping {
        component_name: "CartView".into(),
        mapping_name: "cart".into(),
        configuration: None,
    }]));
    let classification = text_reply(
        r#"{"intentType": "FileUpdate", "fileScope": "Specific", "mentionedFiles": ["src/cart/cart.ts"],
            "reasoning": "names the cart", "complexity": "Low", "confidence": 0.9}"#,
    );
    let answer = text_reply(
        "Here you go:\n```json\n{\"displayText\": \"Added a clear method.\", \"fileOperations\": \
         [{\"operation\": \"update\", \"filePath\": \"src/cart/cart.ts\", \"content\": \"export class Cart {}\\n\", \
         \"description\": \"add clear\"}], \"warnings\": []}\n```",
    );
    let llm = Arc::new(ScriptedLlm::new(Some(classification), Some(answer)));
    let assistant = build_assistant(project, llm.clone());

    let response = assistant
        .process_prompt(&request("shop", "add a clear method to cart.ts"), &CancellationToken::new())
        .await;

    assert_eq!(response.display_text, "Added a clear method.");
    assert_eq!(response.file_operations.len(), 1);
    assert_eq!(response.file_operations[0].file_path, "src/cart/cart.ts");
    assert_eq!(response.metadata.confidence, ConfidenceLevel::High);
    assert_eq!(response.metadata.version_id.as_deref(), Some("v1"));
    assert_eq!(response.suggestions.len(), 3);
    assert!(response.metadata.files_used.contains(&"src/cart/cart.ts".to_string()));
    assert!(response.metadata.files_used.contains(&COMPONENTS_MODULE_PATH.to_string()));

    let prompts = llm.system_prompts.lock().unwrap();
    let assistant_prompt = prompts.last().unwrap();
    assert!(assistant_prompt.contains("this.items.push(price)"));
    assert!(assistant_prompt.contains("CartView -> cart"));
    assert!(assistant_prompt.contains("fileOperations"));
    drop(prompts);

    let history = assistant.history("c1");
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].content, "Added a clear method.");
    assert!(assistant.clear_history("c1"));
    assert!(assistant.history("c1").is_empty());
}

#[tokio::test]
async fn test_assistant_plain_text_reply_is_low_confidence() {
    let project = Arc::new(MemProject::new());
    let llm = Arc::new(ScriptedLlm::new(None, Some(text_reply("Just use a loop."))));
    let assistant = build_assistant(project, llm);

    let response = assistant
        .process_prompt(&request("shop", "how do I sum prices?"), &CancellationToken::new())
        .await;
    assert_eq!(response.display_text, "Just use a loop.");
    assert!(response.file_operations.is_empty());
    assert!(!response.warnings.is_empty());
    assert_eq!(response.metadata.confidence, ConfidenceLevel::Low);
}

#[tokio::test]
async fn test_assistant_blocked_reply_is_data() {
    let project = Arc::new(MemProject::new());
    let blocked = LlmResponse::blocked("scripted", "SAFETY", Some("SAFETY".into()));
    let llm = Arc::new(ScriptedLlm::new(None, Some(blocked)));
    let assistant = build_assistant(project, llm);

    let response = assistant
        .process_prompt(&request("shop", "explain login"), &CancellationToken::new())
        .await;
    assert!(response.file_operations.is_empty());
    assert!(response.warnings.iter().any(|w| w.contains("SAFETY")));
    assert_eq!(response.metadata.confidence, ConfidenceLevel::Low);
    assert!(assistant.history("c1").is_empty());
}

#[tokio::test]
async fn test_assistant_never_errors() {
    let project = Arc::new(MemProject::new());
    let llm = Arc::new(ScriptedLlm::failing());
    let assistant = build_assistant(project, llm);
    let token = CancellationToken::new();

    let failed_llm = assistant.process_prompt(&request("shop", "fix the null pointer bug"), &token).await;
    assert!(failed_llm.display_text.starts_with("Sorry"));
    assert_eq!(failed_llm.metadata.confidence, ConfidenceLevel::Low);
    assert!(failed_llm.file_operations.is_empty());

    let unknown = assistant.process_prompt(&request("nope", "hello"), &token).await;
    assert!(unknown.display_text.starts_with("Sorry"));
    assert_eq!(unknown.metadata.confidence, ConfidenceLevel::Low);
    assert!(assistant.history("c1").is_empty());
}

#[test]
fn test_malformed_reply_becomes_display_text() {
    let raw = "I think you should rename the function.";
    let parsed = parse_ai_response(raw);
    assert_eq!(parsed.display_text, raw);
    assert!(parsed.file_operations.is_empty());
    assert!(parsed.used_fallback);
}
