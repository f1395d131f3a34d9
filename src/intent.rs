//! Intent classification and scope-based file selection.
//!
//! [`IntentClassifier::classify_intent`] asks the LLM for a structured
//! classification constrained by [`intent_schema`]. Any failure on that
//! path (provider disabled, transport error, blocked reply, reply that does
//! not fit the schema) falls back to
//! [`classify_heuristically`](code_assist_core::intent::classify_heuristically),
//! so classification always produces an intent.
//!
//! [`IntentClassifier::select_files_based_on_scope`] turns an intent into
//! a prioritized, token-budgeted file list drawn only from the project's
//! known source and config files.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};

use code_assist_core::intent::{
    apply_token_budget, classify_heuristically, keywords, prioritize_files, select_all,
    select_by_pattern, select_related_by_keywords, select_specific,
};
use code_assist_core::llm::{ChatOptions, LlmClient, LlmMessage};
use code_assist_core::models::{
    Complexity, CursorContext, FileSelectionScope, IntentType, ProjectStructureAnalysis,
    UserIntent,
};

use crate::cancel::{cancellable, CancellationToken};
use crate::config::IntentConfig;
use crate::semantic_search::{SearchOptions, SemanticSearchService};

/// Files listed in the classifier prompt before truncating.
const MAX_LISTED_FILES: usize = 200;

fn enum_schema(values: &[&str]) -> Value {
    json!({ "type": "STRING", "enum": values })
}

/// JSON schema for the classifier reply, in the provider's schema dialect.
pub fn intent_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "intentType": enum_schema(&IntentType::ALL.map(|i| i.as_str())),
            "fileScope": enum_schema(&FileSelectionScope::ALL.map(|s| s.as_str())),
            "relatedConcept": { "type": "STRING", "nullable": true },
            "mentionedFiles": { "type": "ARRAY", "items": { "type": "STRING" } },
            "reasoning": { "type": "STRING" },
            "complexity": enum_schema(&Complexity::ALL.map(|c| c.as_str())),
            "confidence": { "type": "NUMBER" }
        },
        "required": ["intentType", "fileScope", "mentionedFiles", "reasoning", "complexity", "confidence"]
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClassifierReply {
    intent_type: String,
    file_scope: String,
    #[serde(default)]
    related_concept: Option<String>,
    #[serde(default)]
    mentioned_files: Vec<String>,
    #[serde(default)]
    reasoning: String,
    complexity: String,
    confidence: f64,
}

/// The JSON object inside a reply that may carry a code fence or prose.
fn json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn union(mut base: Vec<String>, extra: &[String]) -> Vec<String> {
    for f in extra {
        if !base.contains(f) {
            base.push(f.clone());
        }
    }
    base
}

pub struct IntentClassifier {
    llm: Arc<dyn LlmClient>,
    search: Option<Arc<SemanticSearchService>>,
    settings: IntentConfig,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn LlmClient>, settings: IntentConfig) -> Self {
        Self {
            llm,
            search: None,
            settings,
        }
    }

    /// Use semantic search for concept-scoped selection.
    pub fn with_search(mut self, search: Arc<SemanticSearchService>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn settings(&self) -> &IntentConfig {
        &self.settings
    }

    /// Classify a prompt. Never fails: LLM problems fall back to the
    /// keyword heuristics.
    pub async fn classify_intent(
        &self,
        prompt: &str,
        structure: &ProjectStructureAnalysis,
        open_files: &[String],
        cursor: Option<&CursorContext>,
        token: &CancellationToken,
    ) -> UserIntent {
        let mut open: Vec<String> = open_files.to_vec();
        if let Some(c) = cursor {
            if !c.file_path.is_empty() && !open.contains(&c.file_path) {
                open.push(c.file_path.clone());
            }
        }

        match self
            .classify_with_llm(prompt, structure, &open, cursor, token)
            .await
        {
            Ok(intent) => intent,
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "LLM intent classification failed, using heuristics");
                classify_heuristically(prompt, structure, &open)
            }
        }
    }

    fn system_prompt(
        &self,
        structure: &ProjectStructureAnalysis,
        open_files: &[String],
        cursor: Option<&CursorContext>,
    ) -> String {
        let all = structure.all_files();
        let mut listed: Vec<&str> = all.iter().take(MAX_LISTED_FILES).map(String::as_str).collect();
        if all.len() > MAX_LISTED_FILES {
            listed.push("...");
        }

        let mut prompt = format!(
            "You classify requests made to a coding assistant working on one project.\n\
             Decide what the user wants (intentType), how broadly files must be gathered \
             (fileScope), which files they name (mentionedFiles, exact project paths only), \
             the concept to search for (relatedConcept), complexity, and your confidence \
             between 0 and 1.\n\n\
             fileScope values:\n\
             - Specific: the request names particular files\n\
             - Related: files connected to a concept or feature\n\
             - AllFiles: the request concerns the whole project\n\
             - Pattern: files matching an extension or name pattern; put the pattern in relatedConcept\n\n\
             Project language: {}\nProject type: {}\nEntry points: {}\nDependencies: {}\n\nFiles:\n{}\n",
            structure.language,
            structure.project_type,
            structure.entry_points.join(", "),
            structure.dependencies.join(", "),
            listed.join("\n"),
        );
        if !open_files.is_empty() {
            prompt.push_str(&format!("\nOpen in the editor: {}\n", open_files.join(", ")));
        }
        if let Some(c) = cursor {
            prompt.push_str(&format!("\nCursor in {}", c.file_path));
            if let Some(line) = c.line {
                prompt.push_str(&format!(" at line {}", line));
            }
            prompt.push('\n');
            if let Some(sel) = c.selected_text.as_deref().filter(|s| !s.trim().is_empty()) {
                prompt.push_str(&format!("Selected text:\n{}\n", sel));
            }
        }
        prompt.push_str("\nRespond with a single JSON object matching the schema.");
        prompt
    }

    async fn classify_with_llm(
        &self,
        prompt: &str,
        structure: &ProjectStructureAnalysis,
        open_files: &[String],
        cursor: Option<&CursorContext>,
        token: &CancellationToken,
    ) -> Result<UserIntent> {
        let system = self.system_prompt(structure, open_files, cursor);
        let options = ChatOptions {
            temperature: Some(self.settings.classifier_temperature),
            max_tokens: Some(1024),
            response_schema: Some(intent_schema()),
        };
        let messages = [LlmMessage::user(prompt)];
        let response = cancellable(token, async {
            Ok(self.llm.chat_completion(&system, &messages, &options).await?)
        })
        .await?;

        if !response.is_usable() {
            bail!(
                "classifier reply blocked ({})",
                response.block_reason.as_deref().unwrap_or("empty")
            );
        }
        parse_classifier_reply(&response.content, structure, open_files)
    }

    /// Resolve an intent's scope into files, prioritized and cut to
    /// `max_tokens` at the configured per-file estimate.
    pub async fn select_files_based_on_scope(
        &self,
        intent: &UserIntent,
        structure: &ProjectStructureAnalysis,
        program_id: &str,
        version_id: &str,
        max_tokens: usize,
        token: &CancellationToken,
    ) -> Vec<String> {
        let required = select_specific(&intent.required_files, structure);
        let concept = intent.related_concept.clone().unwrap_or_default();

        let candidates = match intent.scope {
            FileSelectionScope::AllFiles => select_all(structure),
            FileSelectionScope::Specific => {
                let mut refs = intent.required_files.clone();
                if let Some(t) = &intent.target_file {
                    refs.insert(0, t.clone());
                }
                let files = select_specific(&refs, structure);
                if files.is_empty() {
                    self.select_related(&concept, structure, program_id, version_id, token)
                        .await
                } else {
                    files
                }
            }
            FileSelectionScope::Pattern => union(select_by_pattern(&concept, structure), &required),
            FileSelectionScope::Related => union(
                self.select_related(&concept, structure, program_id, version_id, token)
                    .await,
                &required,
            ),
        };

        let known: Vec<String> = candidates
            .into_iter()
            .filter(|f| structure.contains_file(f))
            .collect();
        apply_token_budget(
            prioritize_files(known, structure),
            max_tokens,
            self.settings.tokens_per_file,
        )
    }

    async fn select_related(
        &self,
        concept: &str,
        structure: &ProjectStructureAnalysis,
        program_id: &str,
        version_id: &str,
        token: &CancellationToken,
    ) -> Vec<String> {
        if concept.trim().is_empty() {
            return Vec::new();
        }

        if let Some(search) = self
            .search
            .as_ref()
            .filter(|s| self.settings.use_semantic_search && s.is_enabled())
        {
            let options = SearchOptions {
                limit: Some(self.settings.semantic_limit),
                ..SearchOptions::default()
            };
            match search
                .search_code(program_id, version_id, concept, &options, token)
                .await
            {
                Ok(hits) => {
                    let mut files = Vec::new();
                    for hit in hits {
                        let path = hit.chunk.file_path;
                        if structure.contains_file(&path) && !files.contains(&path) {
                            files.push(path);
                        }
                    }
                    if !files.is_empty() {
                        return files;
                    }
                    tracing::debug!(concept, "semantic search found nothing, using keywords");
                }
                Err(e) => {
                    tracing::warn!(concept, error = %e, "semantic file lookup failed, using keywords");
                }
            }
        }

        select_related_by_keywords(concept, structure, self.settings.min_related_files)
    }
}

/// Turn a classifier reply into an intent. Fails when the reply does not
/// fit the schema, which sends the caller to the heuristic path.
pub fn parse_classifier_reply(
    content: &str,
    structure: &ProjectStructureAnalysis,
    open_files: &[String],
) -> Result<UserIntent> {
    let object = json_object(content).context("classifier reply has no JSON object")?;
    let reply: ClassifierReply =
        serde_json::from_str(object).context("classifier reply does not match the schema")?;

    let intent_type: IntentType = reply.intent_type.parse()?;
    let scope: FileSelectionScope = reply.file_scope.parse()?;
    let complexity: Complexity = reply.complexity.parse()?;
    if !reply.confidence.is_finite() {
        bail!("classifier confidence is not a number");
    }

    let mentioned = select_specific(&reply.mentioned_files, structure);
    let open = select_specific(open_files, structure);
    let related_concept = reply
        .related_concept
        .filter(|c| !c.trim().is_empty())
        .or_else(|| {
            let words = keywords(&reply.reasoning);
            (scope == FileSelectionScope::Related && !words.is_empty()).then(|| words.join(" "))
        });

    Ok(UserIntent {
        intent_type,
        scope,
        related_concept,
        target_file: mentioned.first().cloned(),
        required_files: union(mentioned, &open),
        complexity,
        confidence: reply.confidence.clamp(0.0, 1.0),
        scope_reasoning: reply.reasoning,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn structure() -> ProjectStructureAnalysis {
        ProjectStructureAnalysis {
            language: "typescript".into(),
            project_type: "node".into(),
            entry_points: vec!["src/index.ts".into()],
            source_files: vec![
                "src/index.ts".into(),
                "src/cart/cart.ts".into(),
                "src/cart/pricing.ts".into(),
            ],
            config_files: vec!["package.json".into()],
            ..ProjectStructureAnalysis::default()
        }
    }

    #[test]
    fn test_parse_reply_in_code_fence() {
        let content = "```json\n{\"intentType\": \"FileUpdate\", \"fileScope\": \"Specific\", \
            \"mentionedFiles\": [\"src/cart/cart.ts\", \"src/ghost.ts\"], \"reasoning\": \"names cart.ts\", \
            \"complexity\": \"low\", \"confidence\": 1.4}\n```";
        let intent = parse_classifier_reply(content, &structure(), &["package.json".into()]).unwrap();
        assert_eq!(intent.intent_type, IntentType::FileUpdate);
        assert_eq!(intent.scope, FileSelectionScope::Specific);
        assert_eq!(intent.complexity, Complexity::Low);
        assert_eq!(intent.confidence, 1.0);
        assert_eq!(intent.target_file.as_deref(), Some("src/cart/cart.ts"));
        assert_eq!(intent.required_files, vec!["src/cart/cart.ts", "package.json"]);
    }

    #[test]
    fn test_parse_reply_rejects_unknown_enum() {
        let content = r#"{"intentType": "Dance", "fileScope": "Related", "mentionedFiles": [],
            "reasoning": "", "complexity": "Low", "confidence": 0.5}"#;
        assert!(parse_classifier_reply(content, &structure(), &[]).is_err());
        assert!(parse_classifier_reply("no json here", &structure(), &[]).is_err());
    }

    #[test]
    fn test_schema_lists_every_variant() {
        let schema = intent_schema();
        let intents = schema["properties"]["intentType"]["enum"].as_array().unwrap();
        assert_eq!(intents.len(), IntentType::ALL.len());
        let scopes = schema["properties"]["fileScope"]["enum"].as_array().unwrap();
        assert_eq!(scopes.len(), 4);
    }
}
