//! Deterministic intent classification and file-scope helpers.
//!
//! [`classify_heuristically`] is the fallback used whenever the LLM-driven
//! classifier cannot produce an answer. It runs an ordered list of keyword
//! checks and always reports a confidence of [`HEURISTIC_CONFIDENCE`].
//!
//! | Order | Trigger | Intent | Complexity |
//! |-------|---------|--------|------------|
//! | 1 | create / new file / scaffold / generate | `FileCreation` | Medium |
//! | 2 | fix / bug / error / crash / exception | `BugFix` | Medium |
//! | 3 | update / modify / change / edit / rename | `FileUpdate` | Low |
//! | 4 | question word or trailing `?` | `Question` | Low |
//! | 5 | refactor / clean up / simplify / restructure | `Refactoring` | High |
//! | 6 | add / implement / feature / support | `FeatureAddition` | High |
//! | 7 | anything else | `Other` | Low |
//!
//! The remaining functions resolve a [`FileSelectionScope`] into concrete
//! paths. Every selector draws only from the files listed in the
//! [`ProjectStructureAnalysis`]; nothing here invents a path.

use std::collections::HashSet;
use std::sync::LazyLock;

use globset::GlobBuilder;
use regex::Regex;

use crate::models::{
    Complexity, FileSelectionScope, IntentType, ProjectStructureAnalysis, UserIntent,
};

/// Confidence reported by every heuristic classification.
pub const HEURISTIC_CONFIDENCE: f64 = 0.7;

/// Default number of related files below which keyword matching widens
/// from exact to partial matches.
pub const DEFAULT_MIN_RELATED_FILES: usize = 3;

static CREATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(create|scaffold|generate|new\s+file|add\s+(?:a\s+|an\s+)?new\s+file)\b").unwrap()
});
static BUG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(fix|fixes|bug|bugs|error|errors|exception|crash|crashes|broken|failing|fails|null\s+pointer|not\s+working|issue)\b").unwrap()
});
static UPDATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(update|modify|change|edit|rename|replace|adjust)\b").unwrap()
});
static QUESTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(what|why|how|where|when|which|who|explain|describe|is|are|does|do|can\s+you\s+explain)\b").unwrap()
});
static REFACTOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(refactor|refactoring|restructure|clean\s*up|simplify|reorganize|extract|decouple|optimi[sz]e)\b").unwrap()
});
static FEATURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(add|implement|feature|support|integrate|introduce|enable|build)\b").unwrap()
});
static FILE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)([\w./\\-]+\.(?:cs|csproj|cshtml|razor|java|kt|py|js|jsx|mjs|ts|tsx|json|ya?ml|xml|toml|ini|config|html?|css|scss|less|md|sql|rs|go|rb|php|sh|vue|svelte))\b").unwrap()
});
static ALL_FILES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(all\s+files|every\s+file|entire\s+(?:project|codebase|solution|repo(?:sitory)?)|whole\s+(?:project|codebase|solution|repo(?:sitory)?)|across\s+the\s+(?:project|codebase))\b").unwrap()
});
static PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:all|every|each)\s+(?:the\s+)?(\*?\.[\w*]+|\*[\w.*]*|[\w-]+)\s+files?\b").unwrap()
});
static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-Za-z][A-Za-z0-9_]*").unwrap());

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "this", "that", "from", "into", "onto", "please", "can", "you",
    "could", "would", "should", "will", "make", "made", "add", "fix", "file", "files", "code",
    "all", "some", "any", "what", "how", "why", "where", "when", "which", "who", "does", "are",
    "was", "were", "update", "change", "modify", "edit", "create", "new", "bug", "error",
    "implement", "refactor", "feature", "support", "explain", "describe", "there", "their",
    "then", "than", "but", "not", "use", "using", "used", "its", "have", "has", "need", "want",
    "also", "just", "about", "our", "your", "my", "me", "it", "is", "in", "to", "of", "on", "a",
    "an", "be", "so", "do", "out", "get", "set", "let", "via", "per", "way", "more", "less",
];

/// Lowercased content words from `text`, in order, without duplicates.
pub fn keywords(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    WORD.find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|w| w.len() >= 3 && !STOPWORDS.contains(&w.as_str()))
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

/// Split a file stem into lowercase identifier parts.
///
/// `"InvoiceService"` → `["invoice", "service", "invoiceservice"]`.
fn identifier_tokens(path: &str) -> Vec<String> {
    let stem = path
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(path)
        .split('.')
        .next()
        .unwrap_or(path);
    let mut tokens = Vec::new();
    for part in stem.split(|c: char| !c.is_alphanumeric()).filter(|p| !p.is_empty()) {
        let mut current = String::new();
        let mut prev_lower = false;
        for c in part.chars() {
            if c.is_uppercase() && prev_lower && !current.is_empty() {
                tokens.push(current.to_lowercase());
                current.clear();
            }
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
            current.push(c);
        }
        if !current.is_empty() {
            tokens.push(current.to_lowercase());
        }
        tokens.push(part.to_lowercase());
    }
    tokens.sort();
    tokens.dedup();
    tokens
}

/// Resolve a file reference from a prompt against the known files.
///
/// Matches an exact path, a path suffix on a separator boundary, or a bare
/// file name, case-insensitively.
fn resolve_file(reference: &str, structure: &ProjectStructureAnalysis) -> Option<String> {
    let wanted = reference.replace('\\', "/").trim_start_matches("./").to_lowercase();
    let all = structure.all_files();
    if let Some(exact) = all.iter().find(|f| f.to_lowercase() == wanted) {
        return Some(exact.clone());
    }
    all.into_iter().find(|f| {
        let lower = f.to_lowercase();
        lower.ends_with(&format!("/{}", wanted))
    })
}

/// File names mentioned in the prompt that exist in the project.
pub fn extract_mentioned_files(prompt: &str, structure: &ProjectStructureAnalysis) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for caps in FILE_NAME.captures_iter(prompt) {
        if let Some(path) = resolve_file(&caps[1], structure) {
            if !out.contains(&path) {
                out.push(path);
            }
        }
    }
    out
}

/// Order files for context: entry points, then config files, then shorter
/// paths, then alphabetically. Duplicates keep their first occurrence.
pub fn prioritize_files(files: Vec<String>, structure: &ProjectStructureAnalysis) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut unique: Vec<String> = files.into_iter().filter(|f| seen.insert(f.clone())).collect();
    unique.sort_by(|a, b| {
        let rank = |f: &str| {
            if structure.is_entry_point(f) {
                0
            } else if structure.is_config_file(f) {
                1
            } else {
                2
            }
        };
        rank(a)
            .cmp(&rank(b))
            .then(a.len().cmp(&b.len()))
            .then_with(|| a.cmp(b))
    });
    unique
}

/// Keep as many files as fit in `max_tokens` at `tokens_per_file` each.
pub fn apply_token_budget(
    mut files: Vec<String>,
    max_tokens: usize,
    tokens_per_file: usize,
) -> Vec<String> {
    let max_files = max_tokens / tokens_per_file.max(1);
    files.truncate(max_files);
    files
}

/// Every source and config file.
pub fn select_all(structure: &ProjectStructureAnalysis) -> Vec<String> {
    structure.all_files()
}

/// The given references, resolved against the project. Unknown names are
/// dropped.
pub fn select_specific(references: &[String], structure: &ProjectStructureAnalysis) -> Vec<String> {
    let mut out = Vec::new();
    for r in references {
        if let Some(path) = resolve_file(r, structure) {
            if !out.contains(&path) {
                out.push(path);
            }
        }
    }
    out
}

/// Files matching a glob (`*.cs`, `src/**/*.ts`), an extension (`.json`,
/// `json`), or a case-insensitive path substring.
pub fn select_by_pattern(pattern: &str, structure: &ProjectStructureAnalysis) -> Vec<String> {
    let pattern = pattern.trim();
    let all = structure.all_files();
    if pattern.is_empty() {
        return Vec::new();
    }

    if pattern.contains(['*', '?', '[']) {
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(true)
            .literal_separator(false)
            .build();
        if let Ok(glob) = glob {
            let matcher = glob.compile_matcher();
            return all
                .into_iter()
                .filter(|f| {
                    matcher.is_match(f)
                        || f.rsplit('/').next().is_some_and(|name| matcher.is_match(name))
                })
                .collect();
        }
    }

    let lower = pattern.to_lowercase();
    let ext = lower.trim_start_matches('.');
    let looks_like_ext = !ext.is_empty()
        && ext.len() <= 6
        && ext.chars().all(|c| c.is_ascii_alphanumeric());
    all.into_iter()
        .filter(|f| {
            let fl = f.to_lowercase();
            (looks_like_ext && fl.ends_with(&format!(".{}", ext))) || fl.contains(&lower)
        })
        .collect()
}

/// Files whose name tokens match keywords from `concept`.
///
/// Exact token matches first; when fewer than `min_related` files match,
/// widens to partial matches (a token contains a keyword or the reverse).
pub fn select_related_by_keywords(
    concept: &str,
    structure: &ProjectStructureAnalysis,
    min_related: usize,
) -> Vec<String> {
    let words = keywords(concept);
    if words.is_empty() {
        return Vec::new();
    }
    let all = structure.all_files();
    let tokenized: Vec<(String, Vec<String>)> = all
        .into_iter()
        .map(|f| {
            let t = identifier_tokens(&f);
            (f, t)
        })
        .collect();

    let exact: Vec<String> = tokenized
        .iter()
        .filter(|(_, tokens)| tokens.iter().any(|t| words.contains(t)))
        .map(|(f, _)| f.clone())
        .collect();
    if exact.len() >= min_related {
        return exact;
    }

    tokenized
        .iter()
        .filter(|(_, tokens)| {
            tokens.iter().any(|t| {
                words.iter().any(|w| {
                    t == w || (t.len() >= 3 && (t.contains(w.as_str()) || w.contains(t.as_str())))
                })
            })
        })
        .map(|(f, _)| f.clone())
        .collect()
}

fn union(mut base: Vec<String>, extra: &[String]) -> Vec<String> {
    for f in extra {
        if !base.contains(f) {
            base.push(f.clone());
        }
    }
    base
}

/// Classify a prompt without an LLM.
///
/// `open_files` are unioned into the candidate list when they exist in the
/// project.
pub fn classify_heuristically(
    prompt: &str,
    structure: &ProjectStructureAnalysis,
    open_files: &[String],
) -> UserIntent {
    let mentioned = extract_mentioned_files(prompt, structure);
    let open = select_specific(open_files, structure);
    let concept_words = keywords(prompt);
    let concept = (!concept_words.is_empty()).then(|| concept_words.join(" "));
    let related = concept
        .as_deref()
        .map(|c| select_related_by_keywords(c, structure, DEFAULT_MIN_RELATED_FILES))
        .unwrap_or_default();

    let (intent_type, complexity, reason) = if CREATION.is_match(prompt) {
        (IntentType::FileCreation, Complexity::Medium, "creation keywords")
    } else if BUG.is_match(prompt) {
        (IntentType::BugFix, Complexity::Medium, "bug keywords")
    } else if UPDATE.is_match(prompt) {
        (IntentType::FileUpdate, Complexity::Low, "update keywords")
    } else if QUESTION.is_match(prompt) || prompt.trim_end().ends_with('?') {
        (IntentType::Question, Complexity::Low, "question phrasing")
    } else if REFACTOR.is_match(prompt) {
        (IntentType::Refactoring, Complexity::High, "refactoring keywords")
    } else if FEATURE.is_match(prompt) {
        (IntentType::FeatureAddition, Complexity::High, "feature keywords")
    } else {
        (IntentType::Other, Complexity::Low, "no keyword match")
    };

    let pattern = PATTERN
        .captures(prompt)
        .map(|c| c[1].to_string())
        .filter(|p| !select_by_pattern(p, structure).is_empty());

    let (scope, related_concept, candidates, scope_reason) = if ALL_FILES.is_match(prompt) {
        (FileSelectionScope::AllFiles, concept.clone(), select_all(structure), "prompt refers to the whole project")
    } else if let Some(p) = pattern {
        let files = select_by_pattern(&p, structure);
        (FileSelectionScope::Pattern, Some(p), files, "prompt names a file pattern")
    } else if !mentioned.is_empty() {
        (FileSelectionScope::Specific, concept.clone(), mentioned.clone(), "prompt names specific files")
    } else {
        let mut files = related;
        if matches!(intent_type, IntentType::FileCreation | IntentType::FeatureAddition | IntentType::Other) {
            files = union(structure.entry_points.clone(), &files);
        }
        (FileSelectionScope::Related, concept.clone(), files, "files related to the prompt's keywords")
    };

    let candidates = union(candidates, &open);
    let candidates: Vec<String> = candidates
        .into_iter()
        .filter(|f| structure.contains_file(f))
        .collect();
    let target_file = mentioned.first().cloned();

    UserIntent {
        intent_type,
        scope,
        related_concept,
        target_file,
        required_files: prioritize_files(candidates, structure),
        complexity,
        confidence: HEURISTIC_CONFIDENCE,
        scope_reasoning: format!("Heuristic classification ({}); {}", reason, scope_reason),
    }
}
