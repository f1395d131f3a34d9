//! TOML configuration.
//!
//! Every section except `[[programs]]` has defaults, so a minimal file
//! only needs to name the programs to work on:
//!
//! ```toml
//! [db]
//! path = "./data/assist.sqlite"
//!
//! [embedding]
//! provider = "ollama"
//! model = "nomic-embed-text"
//! dims = 768
//!
//! [[programs]]
//! id = "shop"
//! current_version = "v2"
//! versions = { v1 = "./shop-v1", v2 = "./shop" }
//! ```
//!
//! [`load_config`] parses and validates; relative paths are kept as
//! written and resolved against the process working directory.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use code_assist_core::chunk::ChunkingOptions;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub intent: IntentConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub programs: Vec<ProgramConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/assist.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chunk_tokens")]
    pub max_chunk_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
    #[serde(default = "default_function_fallback_lines")]
    pub function_fallback_lines: usize,
    #[serde(default = "default_min_window_lines")]
    pub min_window_lines: usize,
    #[serde(default = "default_min_overlap_lines")]
    pub min_overlap_lines: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_tokens: default_max_chunk_tokens(),
            overlap_tokens: default_overlap(),
            function_fallback_lines: default_function_fallback_lines(),
            min_window_lines: default_min_window_lines(),
            min_overlap_lines: default_min_overlap_lines(),
        }
    }
}

impl ChunkingConfig {
    pub fn options(&self) -> ChunkingOptions {
        ChunkingOptions {
            max_chunk_tokens: self.max_chunk_tokens,
            overlap_tokens: self.overlap_tokens,
            function_fallback_lines: self.function_fallback_lines,
            min_window_lines: self.min_window_lines,
            min_overlap_lines: self.min_overlap_lines,
        }
    }
}

fn default_max_chunk_tokens() -> usize {
    512
}
fn default_overlap() -> usize {
    64
}
fn default_function_fallback_lines() -> usize {
    50
}
fn default_min_window_lines() -> usize {
    10
}
fn default_min_overlap_lines() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama server, OpenAI-compatible gateway).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_batch_delay_ms() -> u64 {
    100
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_llm_model(),
            base_url: default_llm_base_url(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_llm_model() -> String {
    "gemini-1.5-flash".to_string()
}
fn default_llm_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_output_tokens() -> u32 {
    8192
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    2000
}
fn default_llm_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorStoreConfig {
    #[serde(default = "default_store_provider")]
    pub provider: String,
    #[serde(default = "default_collection_prefix")]
    pub collection_prefix: String,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    #[serde(default = "default_limit")]
    pub default_limit: usize,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            provider: default_store_provider(),
            collection_prefix: default_collection_prefix(),
            min_score: default_min_score(),
            default_limit: default_limit(),
        }
    }
}

fn default_store_provider() -> String {
    "sqlite".to_string()
}
fn default_collection_prefix() -> String {
    "code_".to_string()
}
fn default_min_score() -> f64 {
    0.5
}
fn default_limit() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct IntentConfig {
    #[serde(default = "default_true")]
    pub use_semantic_search: bool,
    #[serde(default = "default_tokens_per_file")]
    pub tokens_per_file: usize,
    #[serde(default = "default_min_related_files")]
    pub min_related_files: usize,
    #[serde(default = "default_semantic_limit")]
    pub semantic_limit: usize,
    #[serde(default = "default_classifier_temperature")]
    pub classifier_temperature: f32,
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            use_semantic_search: true,
            tokens_per_file: default_tokens_per_file(),
            min_related_files: default_min_related_files(),
            semantic_limit: default_semantic_limit(),
            classifier_temperature: default_classifier_temperature(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_tokens_per_file() -> usize {
    500
}
fn default_min_related_files() -> usize {
    code_assist_core::intent::DEFAULT_MIN_RELATED_FILES
}
fn default_semantic_limit() -> usize {
    20
}
fn default_classifier_temperature() -> f32 {
    0.1
}

/// How much file content the assistant may put in front of the model.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContextMode {
    Aggressive,
    #[default]
    Balanced,
    Comprehensive,
}

impl ContextMode {
    /// Token budget for file context.
    pub fn token_budget(&self) -> usize {
        match self {
            ContextMode::Aggressive => 4_000,
            ContextMode::Balanced => 8_000,
            ContextMode::Comprehensive => 16_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssistantConfig {
    #[serde(default)]
    pub context_mode: ContextMode,
    #[serde(default = "default_max_history")]
    pub max_history_messages: usize,
    #[serde(default = "default_structure_cost")]
    pub structure_token_cost: usize,
    #[serde(default = "default_max_suggestions")]
    pub max_suggestions: usize,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            context_mode: ContextMode::default(),
            max_history_messages: default_max_history(),
            structure_token_cost: default_structure_cost(),
            max_suggestions: default_max_suggestions(),
        }
    }
}

fn default_max_history() -> usize {
    20
}
fn default_structure_cost() -> usize {
    500
}
fn default_max_suggestions() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProgramConfig {
    pub id: String,
    #[serde(default)]
    pub current_version: Option<String>,
    /// Version id to project root directory.
    #[serde(default)]
    pub versions: BTreeMap<String, PathBuf>,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default)]
    pub components: Vec<ComponentConfig>,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ComponentConfig {
    pub component_name: String,
    pub mapping_name: String,
    #[serde(default)]
    pub configuration: Option<String>,
}

impl Config {
    pub fn program(&self, id: &str) -> Option<&ProgramConfig> {
        self.programs.iter().find(|p| p.id == id)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Chunking
    if config.chunking.max_chunk_tokens == 0 {
        bail!("chunking.max_chunk_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_chunk_tokens {
        bail!("chunking.overlap_tokens must be < chunking.max_chunk_tokens");
    }

    // Vector store
    if !(0.0..=1.0).contains(&config.vector_store.min_score) {
        bail!("vector_store.min_score must be in [0.0, 1.0]");
    }
    match config.vector_store.provider.as_str() {
        "sqlite" | "memory" => {}
        other => bail!(
            "Unknown vector store provider: '{}'. Must be sqlite or memory.",
            other
        ),
    }

    // Embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if config.embedding.is_enabled() && config.embedding.provider != "local" {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    // LLM
    match config.llm.provider.as_str() {
        "disabled" | "gemini" => {}
        other => bail!(
            "Unknown LLM provider: '{}'. Must be disabled or gemini.",
            other
        ),
    }
    if config.llm.max_attempts == 0 {
        bail!("llm.max_attempts must be >= 1");
    }

    // Programs
    let mut seen = HashSet::new();
    for program in &config.programs {
        if program.id.trim().is_empty() {
            bail!("programs[].id must not be empty");
        }
        if !seen.insert(program.id.as_str()) {
            bail!("duplicate program id: '{}'", program.id);
        }
        if let Some(current) = &program.current_version {
            if !program.versions.contains_key(current) {
                bail!(
                    "program '{}': current_version '{}' is not listed in versions",
                    program.id,
                    current
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.db.path, PathBuf::from("./data/assist.sqlite"));
        assert_eq!(config.chunking.max_chunk_tokens, 512);
        assert_eq!(config.embedding.batch_size, 32);
        assert_eq!(config.llm.model, "gemini-1.5-flash");
        assert_eq!(config.llm.max_attempts, 3);
        assert_eq!(config.vector_store.min_score, 0.5);
        assert_eq!(config.intent.tokens_per_file, 500);
        assert_eq!(config.assistant.context_mode, ContextMode::Balanced);
        assert!(!config.embedding.is_enabled());
    }

    #[test]
    fn test_programs_parse() {
        let config = parse(
            r#"
            [[programs]]
            id = "shop"
            current_version = "v2"
            versions = { v1 = "./old", v2 = "./new" }
            exclude_globs = ["**/generated/**"]

            [[programs.components]]
            component_name = "CartView"
            mapping_name = "cart"
            "#,
        )
        .unwrap();
        let shop = config.program("shop").unwrap();
        assert_eq!(shop.versions.len(), 2);
        assert_eq!(shop.include_globs, vec!["**/*"]);
        assert_eq!(shop.components[0].component_name, "CartView");
    }

    #[test]
    fn test_rejects_overlap_not_below_max() {
        let err = parse("[chunking]\nmax_chunk_tokens = 100\noverlap_tokens = 100\n").unwrap_err();
        assert!(err.to_string().contains("overlap_tokens"));
    }

    #[test]
    fn test_rejects_min_score_out_of_range() {
        assert!(parse("[vector_store]\nmin_score = 1.5\n").is_err());
    }

    #[test]
    fn test_enabled_embedding_requires_model_and_dims() {
        let err = parse("[embedding]\nprovider = \"openai\"\nmodel = \"m\"\n").unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
        assert!(parse("[embedding]\nprovider = \"local\"\n").is_ok());
    }

    #[test]
    fn test_rejects_unknown_providers() {
        assert!(parse("[embedding]\nprovider = \"magic\"\n").is_err());
        assert!(parse("[llm]\nprovider = \"magic\"\n").is_err());
        assert!(parse("[vector_store]\nprovider = \"magic\"\n").is_err());
    }

    #[test]
    fn test_rejects_duplicate_programs_and_unknown_current_version() {
        let dup = "[[programs]]\nid = \"a\"\n[[programs]]\nid = \"a\"\n";
        assert!(parse(dup).unwrap_err().to_string().contains("duplicate"));

        let bad = "[[programs]]\nid = \"a\"\ncurrent_version = \"v9\"\nversions = { v1 = \".\" }\n";
        assert!(parse(bad).unwrap_err().to_string().contains("v9"));
    }

    #[test]
    fn test_context_mode_budgets() {
        assert_eq!(ContextMode::Aggressive.token_budget(), 4_000);
        assert_eq!(ContextMode::Balanced.token_budget(), 8_000);
        assert_eq!(ContextMode::Comprehensive.token_budget(), 16_000);
    }
}
