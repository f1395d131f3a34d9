//! Conversational entry point.
//!
//! [`AiAssistant::process_prompt`] runs one request end to end:
//!
//! 1. Resolve the program version (explicit, or the program's current one).
//! 2. Analyze the project, classify the prompt, select files within the
//!    context-mode token budget, read them, and append the UI component
//!    module when the program registers components.
//! 3. Build the system prompt with the output-format contract.
//! 4. Call the LLM with the conversation's recent history.
//! 5. Parse the reply, degrading to plain text when it is not JSON.
//! 6. Record the exchange (answered replies only) and derive follow-up
//!    suggestions.
//! 7. Label confidence.
//!
//! Every failure is turned into an [`AssistantResponse`] with an apology
//! and `low` confidence. `process_prompt` has no error path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use serde::Serialize;

use code_assist_core::estimate_tokens;
use code_assist_core::llm::{ChatOptions, LlmClient, LlmMessage};
use code_assist_core::models::{
    CursorContext, IntentType, ProjectStructureAnalysis, UiComponentMapping, UserIntent,
};
use code_assist_core::response::{parse_ai_response, FileOperation, ParsedAiResponse};
use code_assist_core::source::{ComponentCatalog, ProjectSource, VersionResolver};

use crate::cancel::{cancellable, is_cancelled, CancellationToken};
use crate::config::AssistantConfig;
use crate::intent::IntentClassifier;

/// Path under which registered UI components are shown to the model.
pub const COMPONENTS_MODULE_PATH: &str = "__virtual__/ui_components.md";

#[derive(Debug, Clone, Default)]
pub struct AssistantRequest {
    pub program_id: String,
    /// `None` uses the program's current version.
    pub version_id: Option<String>,
    pub prompt: String,
    pub conversation_id: String,
    pub open_files: Vec<String>,
    pub cursor: Option<CursorContext>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::High => "high",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub program_id: String,
    pub version_id: Option<String>,
    pub intent: Option<UserIntent>,
    pub files_used: Vec<String>,
    pub context_tokens: usize,
    pub total_tokens: u32,
    pub model: Option<String>,
    pub confidence: ConfidenceLevel,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantResponse {
    pub display_text: String,
    pub file_operations: Vec<FileOperation>,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
    pub metadata: ResponseMetadata,
}

/// Label a reply's confidence from the classifier score and the number of
/// file operations it proposes.
pub fn confidence_label(classifier_confidence: f64, operations: usize, degraded: bool) -> ConfidenceLevel {
    if degraded {
        ConfidenceLevel::Low
    } else if classifier_confidence >= 0.8 && operations <= 10 {
        ConfidenceLevel::High
    } else if classifier_confidence >= 0.5 {
        ConfidenceLevel::Medium
    } else {
        ConfidenceLevel::Low
    }
}

/// Follow-up prompts offered after a reply of the given intent.
pub fn suggestions_for(intent: IntentType, limit: usize) -> Vec<String> {
    let all: &[&str] = match intent {
        IntentType::FileCreation => &[
            "Add tests for the new file",
            "Wire the new code into the entry point",
            "Document the new module",
        ],
        IntentType::FileUpdate => &[
            "Review the change for edge cases",
            "Update the tests that cover this file",
            "Check callers of the changed code",
        ],
        IntentType::FileDeletion => &[
            "Find remaining references to the removed code",
            "Update the project configuration",
            "Remove tests for the deleted file",
        ],
        IntentType::Question => &[
            "Show where this is used",
            "Explain the surrounding design",
            "Suggest improvements to this code",
        ],
        IntentType::BugFix => &[
            "Add a test that reproduces the bug",
            "Check similar code for the same problem",
            "Add logging around the failing path",
        ],
        IntentType::Refactoring => &[
            "Run the tests to confirm behavior is unchanged",
            "Apply the same refactoring elsewhere",
            "Update the documentation",
        ],
        IntentType::FeatureAddition => &[
            "Add tests for the new feature",
            "Handle error cases for the feature",
            "Document how to use the feature",
        ],
        IntentType::CodeReview => &[
            "Fix the issues found in the review",
            "Add tests for uncovered paths",
            "Review the related files",
        ],
        IntentType::Other => &[
            "Explain the project structure",
            "Find the main entry point",
            "List the project dependencies",
        ],
    };
    all.iter().take(limit).map(|s| s.to_string()).collect()
}

/// Render registered components as a readable context file.
pub fn components_module(mappings: &[UiComponentMapping]) -> String {
    let mut out = String::from("# Registered UI components\n\n");
    for m in mappings {
        out.push_str(&format!("- {} -> {}\n", m.component_name, m.mapping_name));
        if let Some(conf) = m.configuration.as_deref().filter(|c| !c.trim().is_empty()) {
            out.push_str(&format!("  configuration: {}\n", conf.trim()));
        }
    }
    out
}

struct GatheredContext {
    structure: ProjectStructureAnalysis,
    intent: UserIntent,
    files: Vec<(String, String)>,
    tokens: usize,
}

pub struct AiAssistant {
    source: Arc<dyn ProjectSource>,
    versions: Arc<dyn VersionResolver>,
    components: Arc<dyn ComponentCatalog>,
    classifier: Arc<IntentClassifier>,
    llm: Arc<dyn LlmClient>,
    settings: AssistantConfig,
    histories: Mutex<HashMap<String, Vec<LlmMessage>>>,
}

impl AiAssistant {
    pub fn new(
        source: Arc<dyn ProjectSource>,
        versions: Arc<dyn VersionResolver>,
        components: Arc<dyn ComponentCatalog>,
        classifier: Arc<IntentClassifier>,
        llm: Arc<dyn LlmClient>,
        settings: AssistantConfig,
    ) -> Self {
        Self {
            source,
            versions,
            components,
            classifier,
            llm,
            settings,
            histories: Mutex::new(HashMap::new()),
        }
    }

    fn lock_histories(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<LlmMessage>>> {
        self.histories
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Messages recorded for a conversation, oldest first.
    pub fn history(&self, conversation_id: &str) -> Vec<LlmMessage> {
        self.lock_histories()
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Forget a conversation. Returns `false` if it had no history.
    pub fn clear_history(&self, conversation_id: &str) -> bool {
        self.lock_histories().remove(conversation_id).is_some()
    }

    fn record_exchange(&self, conversation_id: &str, prompt: &str, reply: &str) {
        let mut histories = self.lock_histories();
        let history = histories.entry(conversation_id.to_string()).or_default();
        history.push(LlmMessage::user(prompt));
        history.push(LlmMessage::assistant(reply));
        keep_recent_exchanges(history, self.settings.max_history_messages);
    }

    /// Answer one prompt. Never fails.
    pub async fn process_prompt(
        &self,
        request: &AssistantRequest,
        token: &CancellationToken,
    ) -> AssistantResponse {
        match self.run(request, token).await {
            Ok(response) => response,
            Err(e) => {
                let display_text = if is_cancelled(&e) {
                    "The request was cancelled before an answer was ready.".to_string()
                } else {
                    tracing::error!(
                        program = %request.program_id,
                        conversation = %request.conversation_id,
                        error = %format!("{:#}", e),
                        "assistant request failed"
                    );
                    format!(
                        "Sorry, I couldn't process that request. {}",
                        root_message(&e)
                    )
                };
                AssistantResponse {
                    display_text,
                    file_operations: Vec::new(),
                    warnings: vec![format!("{:#}", e)],
                    suggestions: Vec::new(),
                    metadata: ResponseMetadata {
                        program_id: request.program_id.clone(),
                        version_id: request.version_id.clone(),
                        intent: None,
                        files_used: Vec::new(),
                        context_tokens: 0,
                        total_tokens: 0,
                        model: None,
                        confidence: ConfidenceLevel::Low,
                    },
                }
            }
        }
    }

    async fn resolve_version(&self, request: &AssistantRequest) -> Result<String> {
        if request.program_id.trim().is_empty() {
            bail!("no program selected");
        }
        match request.version_id.as_deref().filter(|v| !v.trim().is_empty()) {
            Some(v) => Ok(v.to_string()),
            None => self
                .versions
                .current_version(&request.program_id)
                .await
                .with_context(|| format!("program '{}' has no usable version", request.program_id)),
        }
    }

    async fn run(&self, request: &AssistantRequest, token: &CancellationToken) -> Result<AssistantResponse> {
        if request.prompt.trim().is_empty() {
            bail!("the prompt is empty");
        }
        let version_id = self.resolve_version(request).await?;
        let program_id = request.program_id.as_str();

        let mut warnings = Vec::new();
        let context = self
            .gather_context(request, &version_id, token, &mut warnings)
            .await?;

        let system_prompt = build_system_prompt(&context);
        let mut messages = self.history(&request.conversation_id);
        // Leave room for the new prompt.
        keep_recent_exchanges(&mut messages, self.settings.max_history_messages.saturating_sub(1));
        messages.push(LlmMessage::user(request.prompt.as_str()));

        let reply = cancellable(token, async {
            Ok(self
                .llm
                .chat_completion(&system_prompt, &messages, &ChatOptions::default())
                .await?)
        })
        .await?;

        let (parsed, degraded) = if reply.is_usable() {
            let parsed = parse_ai_response(&reply.content);
            let degraded = parsed.used_fallback;
            (parsed, degraded)
        } else {
            let reason = reply.block_reason.as_deref().unwrap_or("EMPTY_RESPONSE");
            tracing::warn!(program = program_id, reason, "assistant reply was blocked");
            let parsed = ParsedAiResponse {
                display_text: "I can't provide an answer to that request. Try rephrasing it."
                    .to_string(),
                warnings: vec![format!("The model declined to answer ({})", reason)],
                ..ParsedAiResponse::default()
            };
            (parsed, true)
        };
        warnings.extend(parsed.warnings);

        if reply.is_usable() {
            self.record_exchange(&request.conversation_id, &request.prompt, &parsed.display_text);
        }

        let confidence = confidence_label(
            context.intent.confidence,
            parsed.file_operations.len(),
            degraded,
        );
        tracing::info!(
            program = program_id,
            version = %version_id,
            intent = %context.intent.intent_type,
            files = context.files.len(),
            operations = parsed.file_operations.len(),
            confidence = confidence.as_str(),
            "assistant reply ready"
        );

        Ok(AssistantResponse {
            display_text: parsed.display_text,
            file_operations: parsed.file_operations,
            warnings,
            suggestions: suggestions_for(context.intent.intent_type, self.settings.max_suggestions),
            metadata: ResponseMetadata {
                program_id: program_id.to_string(),
                version_id: Some(version_id),
                files_used: context.files.into_iter().map(|(path, _)| path).collect(),
                context_tokens: context.tokens,
                total_tokens: reply.total_tokens,
                model: Some(reply.model),
                intent: Some(context.intent),
                confidence,
            },
        })
    }

    async fn gather_context(
        &self,
        request: &AssistantRequest,
        version_id: &str,
        token: &CancellationToken,
        warnings: &mut Vec<String>,
    ) -> Result<GatheredContext> {
        let program_id = request.program_id.as_str();
        let structure = cancellable(
            token,
            self.source.analyze_project_structure(program_id, version_id),
        )
        .await?;

        let intent = self
            .classifier
            .classify_intent(
                &request.prompt,
                &structure,
                &request.open_files,
                request.cursor.as_ref(),
                token,
            )
            .await;
        tracing::debug!(
            intent = %intent.intent_type,
            scope = %intent.scope,
            confidence = intent.confidence,
            "prompt classified"
        );

        let budget = self
            .settings
            .context_mode
            .token_budget()
            .saturating_sub(self.settings.structure_token_cost);
        let selected = self
            .classifier
            .select_files_based_on_scope(&intent, &structure, program_id, version_id, budget, token)
            .await;

        let mut files = Vec::with_capacity(selected.len());
        let mut tokens = self.settings.structure_token_cost;
        for path in selected {
            match cancellable(token, self.source.get_file_text(program_id, version_id, &path)).await {
                Ok(text) => {
                    tokens += estimate_tokens(&text);
                    files.push((path, text));
                }
                Err(e) if is_cancelled(&e) => return Err(e),
                Err(e) => {
                    tracing::warn!(file = %path, error = %e, "could not read selected file, skipping");
                    warnings.push(format!("Could not read {}", path));
                }
            }
        }

        match self.components.component_mappings(program_id, version_id).await {
            Ok(mappings) if !mappings.is_empty() => {
                let module = components_module(&mappings);
                tokens += estimate_tokens(&module);
                files.push((COMPONENTS_MODULE_PATH.to_string(), module));
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(program = program_id, error = %e, "component module skipped");
            }
        }

        Ok(GatheredContext {
            structure,
            intent,
            files,
            tokens,
        })
    }
}

fn root_message(err: &anyhow::Error) -> String {
    err.root_cause().to_string()
}

fn build_system_prompt(context: &GatheredContext) -> String {
    let s = &context.structure;
    let mut prompt = String::from(
        "You are a coding assistant working inside one project. Answer the user's request \
         using the project context below. Only propose changes to files inside the project.\n\n",
    );
    prompt.push_str("## Project\n");
    prompt.push_str(&format!("Language: {}\n", s.language));
    prompt.push_str(&format!("Type: {}\n", s.project_type));
    if !s.entry_points.is_empty() {
        prompt.push_str(&format!("Entry points: {}\n", s.entry_points.join(", ")));
    }
    prompt.push_str(&format!(
        "Files: {} source, {} config\n",
        s.source_files.len(),
        s.config_files.len()
    ));
    if !s.dependencies.is_empty() {
        prompt.push_str("\n## Dependencies\n");
        for dep in &s.dependencies {
            prompt.push_str(&format!("- {}\n", dep));
        }
    }

    prompt.push_str(&format!(
        "\n## Request analysis\nIntent: {}\nScope: {}\nComplexity: {}\n",
        context.intent.intent_type, context.intent.scope, context.intent.complexity
    ));

    if !context.files.is_empty() {
        prompt.push_str("\n## Files\n");
        for (path, content) in &context.files {
            prompt.push_str(&format!("\n### {}\n```\n{}\n```\n", path, content.trim_end()));
        }
    }

    prompt.push_str(
        "\n## Output format\n\
         Respond with a single JSON object and nothing else:\n\
         {\n  \"displayText\": \"explanation for the user (markdown allowed)\",\n  \
         \"fileOperations\": [\n    {\"operation\": \"create|update|delete\", \"filePath\": \
         \"path relative to the project root\", \"content\": \"full new file content\", \
         \"description\": \"what changed\"}\n  ],\n  \"warnings\": [\"anything the user should \
         double-check\"]\n}\n\
         Use an empty fileOperations list when no files change. Create and update operations \
         must carry the complete file content.",
    );
    prompt
}

/// Drop the oldest user/assistant pairs until at most `max_messages`
/// remain, so the history always starts on a user turn.
fn keep_recent_exchanges(history: &mut Vec<LlmMessage>, max_messages: usize) {
    let keep = max_messages - max_messages % 2;
    if history.len() > keep {
        let excess = history.len() - keep;
        history.drain(..excess);
    }
}
