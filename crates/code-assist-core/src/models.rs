//! Core data models shared by the indexing, search, and assistant pipelines.
//!
//! Everything here is an in-memory value: project snapshots come from a
//! [`ProjectSource`](crate::source::ProjectSource), symbols and chunks are
//! rebuilt on every index run, and intents are created fresh per request.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Immutable snapshot of a program version's layout.
///
/// Produced by the project collaborator and consumed read-only by intent
/// classification, file selection, and chunking.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStructureAnalysis {
    /// Dominant language (e.g. `"csharp"`, `"typescript"`).
    pub language: String,
    /// Coarse project kind (e.g. `"dotnet"`, `"node"`, `"generic"`).
    pub project_type: String,
    pub entry_points: Vec<String>,
    pub source_files: Vec<String>,
    pub config_files: Vec<String>,
    pub binary_files: Vec<String>,
    pub dependencies: Vec<String>,
}

impl ProjectStructureAnalysis {
    /// Source files followed by config files, without duplicates.
    pub fn all_files(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.source_files
            .iter()
            .chain(self.config_files.iter())
            .filter(|f| seen.insert(f.as_str()))
            .cloned()
            .collect()
    }

    pub fn contains_file(&self, path: &str) -> bool {
        self.source_files.iter().any(|f| f == path) || self.config_files.iter().any(|f| f == path)
    }

    pub fn is_entry_point(&self, path: &str) -> bool {
        self.entry_points.iter().any(|f| f == path)
    }

    pub fn is_config_file(&self, path: &str) -> bool {
        self.config_files.iter().any(|f| f == path)
    }
}

/// Classified purpose of a user prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntentType {
    FileCreation,
    FileUpdate,
    FileDeletion,
    Question,
    BugFix,
    Refactoring,
    FeatureAddition,
    CodeReview,
    Other,
}

impl IntentType {
    pub const ALL: [IntentType; 9] = [
        IntentType::FileCreation,
        IntentType::FileUpdate,
        IntentType::FileDeletion,
        IntentType::Question,
        IntentType::BugFix,
        IntentType::Refactoring,
        IntentType::FeatureAddition,
        IntentType::CodeReview,
        IntentType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentType::FileCreation => "FileCreation",
            IntentType::FileUpdate => "FileUpdate",
            IntentType::FileDeletion => "FileDeletion",
            IntentType::Question => "Question",
            IntentType::BugFix => "BugFix",
            IntentType::Refactoring => "Refactoring",
            IntentType::FeatureAddition => "FeatureAddition",
            IntentType::CodeReview => "CodeReview",
            IntentType::Other => "Other",
        }
    }
}

/// How broadly to look for files relevant to a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileSelectionScope {
    /// Only the files the user named.
    Specific,
    /// Files related to a concept (semantic or keyword lookup).
    Related,
    /// Every source and config file.
    AllFiles,
    /// Files matching an extension, glob, or keyword pattern.
    Pattern,
}

impl FileSelectionScope {
    pub const ALL: [FileSelectionScope; 4] = [
        FileSelectionScope::Specific,
        FileSelectionScope::Related,
        FileSelectionScope::AllFiles,
        FileSelectionScope::Pattern,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileSelectionScope::Specific => "Specific",
            FileSelectionScope::Related => "Related",
            FileSelectionScope::AllFiles => "AllFiles",
            FileSelectionScope::Pattern => "Pattern",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl Complexity {
    pub const ALL: [Complexity; 3] = [Complexity::Low, Complexity::Medium, Complexity::High];

    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Low => "Low",
            Complexity::Medium => "Medium",
            Complexity::High => "High",
        }
    }
}

/// Error returned when a string does not name a known enum variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Lowercase and strip separators so `"bug_fix"`, `"Bug Fix"` and
/// `"BugFix"` compare equal.
fn normalize_variant(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(|c| c.to_lowercase())
        .collect()
}

macro_rules! impl_variant_parsing {
    ($ty:ty, $kind:literal) => {
        impl FromStr for $ty {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = normalize_variant(s);
                <$ty>::ALL
                    .iter()
                    .copied()
                    .find(|v| normalize_variant(v.as_str()) == wanted)
                    .ok_or_else(|| ParseEnumError {
                        kind: $kind,
                        value: s.to_string(),
                    })
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

impl_variant_parsing!(IntentType, "intent type");
impl_variant_parsing!(FileSelectionScope, "file selection scope");
impl_variant_parsing!(Complexity, "complexity");

/// Result of classifying one prompt. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIntent {
    pub intent_type: IntentType,
    pub scope: FileSelectionScope,
    pub related_concept: Option<String>,
    pub target_file: Option<String>,
    pub required_files: Vec<String>,
    pub complexity: Complexity,
    /// Classifier confidence in `[0.0, 1.0]`.
    pub confidence: f64,
    pub scope_reasoning: String,
}

/// Editor cursor position supplied alongside a prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorContext {
    pub file_path: String,
    pub line: Option<usize>,
    pub selected_text: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolKind {
    Namespace,
    Class,
    Interface,
    Method,
    Property,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Namespace => "namespace",
            SymbolKind::Class => "class",
            SymbolKind::Interface => "interface",
            SymbolKind::Method => "method",
            SymbolKind::Property => "property",
        }
    }
}

/// A named structural element found by the indexer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeSymbol {
    pub kind: SymbolKind,
    pub name: String,
    /// The declaring line, trimmed.
    pub signature: String,
    pub visibility: Option<String>,
    pub return_type: Option<String>,
    pub parameters: Option<String>,
    /// Name of the innermost enclosing namespace or class.
    pub parent: Option<String>,
    /// 1-based line of the declaration.
    pub line_number: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChunkType {
    Function,
    Class,
    Interface,
    CodeBlock,
    Config,
    Documentation,
}

impl ChunkType {
    pub const ALL: [ChunkType; 6] = [
        ChunkType::Function,
        ChunkType::Class,
        ChunkType::Interface,
        ChunkType::CodeBlock,
        ChunkType::Config,
        ChunkType::Documentation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Function => "Function",
            ChunkType::Class => "Class",
            ChunkType::Interface => "Interface",
            ChunkType::CodeBlock => "CodeBlock",
            ChunkType::Config => "Config",
            ChunkType::Documentation => "Documentation",
        }
    }
}

impl_variant_parsing!(ChunkType, "chunk type");

/// A bounded slice of source code treated as one embeddable unit.
///
/// `id` is a pure function of program, version, file, name, and start
/// line, so re-chunking unchanged content yields the same ids and
/// re-upserting is idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeChunk {
    pub id: String,
    pub program_id: String,
    pub version_id: String,
    pub file_path: String,
    pub chunk_type: ChunkType,
    pub name: String,
    pub content: String,
    /// 1-based, inclusive.
    pub start_line: usize,
    /// 1-based, inclusive.
    pub end_line: usize,
    pub language: String,
    pub parent_context: Option<String>,
    /// SHA-256 hex of `content`.
    pub content_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub embedding_model: Option<String>,
    pub embedding_dims: Option<usize>,
    pub metadata: BTreeMap<String, String>,
}

/// A chunk returned from similarity search. Query-time only.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorSearchResult {
    pub chunk: CodeChunk,
    /// Similarity in `[0.0, 1.0]`.
    pub score: f64,
    /// 1-based rank in descending score order.
    pub rank: usize,
}

/// Symbol table for one program version. Built on demand, never cached.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectIndex {
    pub program_id: String,
    pub version_id: String,
    pub language: String,
    pub files: Vec<String>,
    pub file_symbols: BTreeMap<String, Vec<CodeSymbol>>,
    pub total_symbols: usize,
    pub estimated_tokens: usize,
}

/// A registered UI component, used only to describe available components
/// to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiComponentMapping {
    pub component_name: String,
    pub mapping_name: String,
    #[serde(default)]
    pub configuration: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn structure() -> ProjectStructureAnalysis {
        ProjectStructureAnalysis {
            language: "csharp".into(),
            project_type: "dotnet".into(),
            entry_points: vec!["Program.cs".into()],
            source_files: vec!["Program.cs".into(), "Services/Billing.cs".into()],
            config_files: vec!["appsettings.json".into(), "Program.cs".into()],
            binary_files: vec![],
            dependencies: vec![],
        }
    }

    #[test]
    fn test_all_files_dedupes_and_keeps_order() {
        let s = structure();
        assert_eq!(
            s.all_files(),
            vec!["Program.cs", "Services/Billing.cs", "appsettings.json"]
        );
    }

    #[test]
    fn test_intent_type_parsing_is_lenient() {
        assert_eq!("BugFix".parse::<IntentType>().unwrap(), IntentType::BugFix);
        assert_eq!("bug_fix".parse::<IntentType>().unwrap(), IntentType::BugFix);
        assert_eq!(
            "feature addition".parse::<IntentType>().unwrap(),
            IntentType::FeatureAddition
        );
        assert!("teleport".parse::<IntentType>().is_err());
    }

    #[test]
    fn test_scope_and_complexity_parsing() {
        assert_eq!(
            "all_files".parse::<FileSelectionScope>().unwrap(),
            FileSelectionScope::AllFiles
        );
        assert_eq!("HIGH".parse::<Complexity>().unwrap(), Complexity::High);
    }

    #[test]
    fn test_chunk_type_display_matches_parse() {
        for t in ChunkType::ALL {
            assert_eq!(t.to_string().parse::<ChunkType>().unwrap(), t);
        }
    }
}
