//! Symbol-aware source chunker.
//!
//! Splits a source file into [`CodeChunk`]s suitable for embedding. The
//! strategy is chosen per file from its size, extension, language, and the
//! symbols the indexer found in it.
//!
//! # Strategy selection
//!
//! Checked in order, first match wins:
//!
//! 1. Estimated tokens below half of `max_chunk_tokens` → [`ChunkStrategy::WholeFile`].
//! 2. Structured config extension → `WholeFile` if it fits `max_chunk_tokens`,
//!    else [`ChunkStrategy::SlidingWindow`].
//! 3. Any method symbol → [`ChunkStrategy::FunctionLevel`].
//! 4. Any class or interface symbol → [`ChunkStrategy::ClassLevel`].
//! 5. Scripting language → [`ChunkStrategy::BlockLevel`] (windowed for now).
//! 6. Otherwise `SlidingWindow`.
//!
//! # Boundaries
//!
//! Function and class chunks end where [`find_block_end`] says the block
//! ends: brace counting for braced languages, indentation for Python. Both
//! are heuristics. Braces inside string literals or comments are counted
//! too, so a boundary can land early or late on such code.
//!
//! # Identity
//!
//! Chunk ids are UUID v5 over `program:version:file:name:start_line`, so
//! chunking unchanged content twice yields identical ids and hashes.
//!
//! # Example
//!
//! ```rust
//! use code_assist_core::chunk::{chunk_source, ChunkingOptions};
//!
//! let chunks = chunk_source("p1", "v1", "settings.json", "{ \"a\": 1 }", "json", &[], &ChunkingOptions::default());
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].start_line, 1);
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::estimate_tokens;
use crate::indexer::LanguageFamily;
use crate::models::{ChunkType, CodeChunk, CodeSymbol, SymbolKind};
use crate::CHARS_PER_TOKEN;

/// Extensions treated as structured configuration.
const CONFIG_EXTENSIONS: &[&str] = &[
    "json", "yaml", "yml", "toml", "xml", "ini", "cfg", "conf", "config", "csproj", "props",
    "targets", "env", "properties",
];

const DOC_EXTENSIONS: &[&str] = &["md", "markdown", "rst", "txt", "adoc"];

/// Languages that commonly hold top-level code without methods or classes.
const SCRIPTING_LANGUAGES: &[&str] = &[
    "python",
    "javascript",
    "typescript",
    "ruby",
    "php",
    "shell",
    "powershell",
    "lua",
];

/// Chunk sizing knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkingOptions {
    /// Target token budget for one chunk.
    pub max_chunk_tokens: usize,
    /// Tokens shared between consecutive sliding windows.
    pub overlap_tokens: usize,
    /// Block length assumed when no closing boundary is found.
    pub function_fallback_lines: usize,
    pub min_window_lines: usize,
    pub min_overlap_lines: usize,
}

impl Default for ChunkingOptions {
    fn default() -> Self {
        Self {
            max_chunk_tokens: 512,
            overlap_tokens: 64,
            function_fallback_lines: 50,
            min_window_lines: 10,
            min_overlap_lines: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStrategy {
    WholeFile,
    SlidingWindow,
    FunctionLevel,
    ClassLevel,
    BlockLevel,
}

impl ChunkStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStrategy::WholeFile => "whole_file",
            ChunkStrategy::SlidingWindow => "sliding_window",
            ChunkStrategy::FunctionLevel => "function_level",
            ChunkStrategy::ClassLevel => "class_level",
            ChunkStrategy::BlockLevel => "block_level",
        }
    }
}

fn extension(file_path: &str) -> String {
    Path::new(file_path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

fn file_name(file_path: &str) -> String {
    Path::new(file_path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(file_path)
        .to_string()
}

pub fn is_config_file(file_path: &str) -> bool {
    CONFIG_EXTENSIONS.contains(&extension(file_path).as_str())
}

fn is_doc_file(file_path: &str) -> bool {
    DOC_EXTENSIONS.contains(&extension(file_path).as_str())
}

/// Pick the chunking strategy for one file.
pub fn select_strategy(
    file_path: &str,
    content: &str,
    language: &str,
    symbols: &[CodeSymbol],
    opts: &ChunkingOptions,
) -> ChunkStrategy {
    let tokens = estimate_tokens(content);

    if tokens < opts.max_chunk_tokens / 2 {
        return ChunkStrategy::WholeFile;
    }
    if is_config_file(file_path) {
        return if tokens <= opts.max_chunk_tokens {
            ChunkStrategy::WholeFile
        } else {
            ChunkStrategy::SlidingWindow
        };
    }
    if symbols.iter().any(|s| s.kind == SymbolKind::Method) {
        return ChunkStrategy::FunctionLevel;
    }
    if symbols
        .iter()
        .any(|s| matches!(s.kind, SymbolKind::Class | SymbolKind::Interface))
    {
        return ChunkStrategy::ClassLevel;
    }
    if SCRIPTING_LANGUAGES.contains(&language.to_ascii_lowercase().as_str()) {
        return ChunkStrategy::BlockLevel;
    }
    ChunkStrategy::SlidingWindow
}

/// Carries string and comment state across lines so braces inside them
/// are not counted.
///
/// Double-quoted strings and single quotes end at the end of a line;
/// block comments and JavaScript template literals may span lines. Outside
/// the JavaScript family a `'` only starts a char literal (`'{'`, `'\''`),
/// so Rust lifetimes and generics pass through untouched.
struct BraceScanner {
    family: LanguageFamily,
    in_block_comment: bool,
    in_template: bool,
}

impl BraceScanner {
    fn new(family: LanguageFamily) -> Self {
        Self {
            family,
            in_block_comment: false,
            in_template: false,
        }
    }

    fn braces(&mut self, line: &str) -> Vec<char> {
        let chars: Vec<char> = line.chars().collect();
        let mut found = Vec::new();
        let mut quote: Option<char> = None;
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            let next = chars.get(i + 1).copied();

            if self.in_block_comment {
                if c == '*' && next == Some('/') {
                    self.in_block_comment = false;
                    i += 1;
                }
            } else if self.in_template {
                if c == '\\' {
                    i += 1;
                } else if c == '`' {
                    self.in_template = false;
                }
            } else if let Some(q) = quote {
                if c == '\\' {
                    i += 1;
                } else if c == q {
                    quote = None;
                }
            } else {
                match c {
                    '/' if next == Some('/') => break,
                    '/' if next == Some('*') => {
                        self.in_block_comment = true;
                        i += 1;
                    }
                    '"' => quote = Some('"'),
                    '`' if self.family == LanguageFamily::JsLike => self.in_template = true,
                    '\'' if self.family == LanguageFamily::JsLike => quote = Some('\''),
                    '\'' => i += char_literal_len(&chars[i..]).saturating_sub(1),
                    '{' | '}' => found.push(c),
                    _ => {}
                }
            }
            i += 1;
        }
        found
    }
}

/// Length of a char literal starting at `chars[0] == '\''`, or 1 when the
/// quote does not open one.
fn char_literal_len(chars: &[char]) -> usize {
    match chars.get(1) {
        Some('\\') => chars
            .iter()
            .skip(3)
            .position(|&c| c == '\'')
            .map_or(1, |p| p + 4),
        Some(_) if chars.get(2) == Some(&'\'') => 3,
        _ => 1,
    }
}

/// Find the last line (0-based, inclusive) of the block declared at `start`.
///
/// Braced languages: count `{`/`}` from `start`, ignoring braces inside
/// string literals and comments; the block ends on the line where the
/// count returns to zero after going positive. A declaration
/// that ends in `;` before any brace opens is a one-line block. Python-like
/// languages end at the line before the first non-blank line indented no
/// deeper than the declaration.
///
/// If no boundary is found the block is capped at `fallback_lines` lines.
pub fn find_block_end(
    lines: &[&str],
    start: usize,
    family: LanguageFamily,
    fallback_lines: usize,
) -> usize {
    if lines.is_empty() {
        return 0;
    }
    let last = lines.len() - 1;
    let start = start.min(last);
    let fallback = (start + fallback_lines.max(1) - 1).min(last);

    if family.is_braced() {
        let mut depth: i64 = 0;
        let mut opened = false;
        let mut scanner = BraceScanner::new(family);
        for (i, line) in lines.iter().enumerate().skip(start) {
            for c in scanner.braces(line) {
                if c == '{' {
                    depth += 1;
                    opened = true;
                } else {
                    depth -= 1;
                }
            }
            if opened && depth <= 0 {
                return i;
            }
            if !opened && line.trim_end().ends_with(';') {
                return i;
            }
        }
        fallback
    } else {
        let base = indent_of(lines[start]);
        let mut end = start;
        for (i, line) in lines.iter().enumerate().skip(start + 1) {
            if line.trim().is_empty() {
                continue;
            }
            if indent_of(line) <= base {
                return end;
            }
            end = i;
        }
        if end == start {
            fallback
        } else {
            end
        }
    }
}

fn indent_of(line: &str) -> usize {
    line.chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum()
}

/// Chunk one file's content.
///
/// Returns an empty list for empty or whitespace-only content.
pub fn chunk_source(
    program_id: &str,
    version_id: &str,
    file_path: &str,
    content: &str,
    language: &str,
    symbols: &[CodeSymbol],
    opts: &ChunkingOptions,
) -> Vec<CodeChunk> {
    if content.trim().is_empty() {
        return Vec::new();
    }

    let strategy = select_strategy(file_path, content, language, symbols, opts);
    let lines: Vec<&str> = content.lines().collect();
    let ctx = ChunkContext {
        program_id,
        version_id,
        file_path,
        language,
        strategy,
    };

    let mut chunks = match strategy {
        ChunkStrategy::WholeFile => {
            let chunk_type = if is_config_file(file_path) {
                ChunkType::Config
            } else if is_doc_file(file_path) {
                ChunkType::Documentation
            } else {
                ChunkType::CodeBlock
            };
            vec![ctx.make_chunk(
                chunk_type,
                &file_name(file_path),
                &lines,
                0,
                lines.len().saturating_sub(1),
                None,
                None,
            )]
        }
        ChunkStrategy::FunctionLevel => {
            symbol_chunks(&ctx, &lines, symbols, opts, |k| k == SymbolKind::Method)
        }
        ChunkStrategy::ClassLevel => symbol_chunks(&ctx, &lines, symbols, opts, |k| {
            matches!(k, SymbolKind::Class | SymbolKind::Interface)
        }),
        ChunkStrategy::BlockLevel | ChunkStrategy::SlidingWindow => {
            window_chunks(&ctx, &lines, content, opts)
        }
    };

    chunks.retain(|c| !c.content.trim().is_empty());
    chunks
}

struct ChunkContext<'a> {
    program_id: &'a str,
    version_id: &'a str,
    file_path: &'a str,
    language: &'a str,
    strategy: ChunkStrategy,
}

impl ChunkContext<'_> {
    /// Build a chunk over `lines[start..=end]` (0-based).
    #[allow(clippy::too_many_arguments)]
    fn make_chunk(
        &self,
        chunk_type: ChunkType,
        name: &str,
        lines: &[&str],
        start: usize,
        end: usize,
        parent: Option<&str>,
        symbol_kind: Option<SymbolKind>,
    ) -> CodeChunk {
        let end = end.min(lines.len().saturating_sub(1));
        let text = lines.get(start..=end).map(|l| l.join("\n")).unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        let content_hash = format!("{:x}", hasher.finalize());

        let start_line = start + 1;
        let identity = format!(
            "{}:{}:{}:{}:{}",
            self.program_id, self.version_id, self.file_path, name, start_line
        );

        let mut metadata = BTreeMap::new();
        metadata.insert("strategy".to_string(), self.strategy.as_str().to_string());
        metadata.insert("line_count".to_string(), (end + 1 - start).to_string());
        if let Some(kind) = symbol_kind {
            metadata.insert("symbol_kind".to_string(), kind.as_str().to_string());
        }

        CodeChunk {
            id: Uuid::new_v5(&Uuid::NAMESPACE_OID, identity.as_bytes()).to_string(),
            program_id: self.program_id.to_string(),
            version_id: self.version_id.to_string(),
            file_path: self.file_path.to_string(),
            chunk_type,
            name: name.to_string(),
            content: text,
            start_line,
            end_line: end + 1,
            language: self.language.to_string(),
            parent_context: parent.map(str::to_string),
            content_hash,
            embedding: None,
            embedding_model: None,
            embedding_dims: None,
            metadata,
        }
    }
}

fn symbol_chunks(
    ctx: &ChunkContext<'_>,
    lines: &[&str],
    symbols: &[CodeSymbol],
    opts: &ChunkingOptions,
    wanted: impl Fn(SymbolKind) -> bool,
) -> Vec<CodeChunk> {
    let family = LanguageFamily::from_language(ctx.language);
    let mut selected: Vec<&CodeSymbol> = symbols
        .iter()
        .filter(|s| wanted(s.kind) && s.line_number >= 1 && s.line_number <= lines.len())
        .collect();
    selected.sort_by_key(|s| s.line_number);

    selected
        .into_iter()
        .map(|s| {
            let start = s.line_number - 1;
            let end = find_block_end(lines, start, family, opts.function_fallback_lines);
            let chunk_type = match s.kind {
                SymbolKind::Method => ChunkType::Function,
                SymbolKind::Interface => ChunkType::Interface,
                _ => ChunkType::Class,
            };
            ctx.make_chunk(
                chunk_type,
                &s.name,
                lines,
                start,
                end,
                s.parent.as_deref(),
                Some(s.kind),
            )
        })
        .collect()
}

/// Window and overlap sizes in lines for a file with this content.
pub fn window_size(content: &str, line_count: usize, opts: &ChunkingOptions) -> (usize, usize) {
    let avg_chars = (content.len() / line_count.max(1)).max(1);
    let window = (opts.max_chunk_tokens * CHARS_PER_TOKEN / avg_chars).max(opts.min_window_lines).max(1);
    let overlap = (opts.overlap_tokens * CHARS_PER_TOKEN / avg_chars)
        .max(opts.min_overlap_lines)
        .min(window - 1);
    (window, overlap)
}

fn window_chunks(
    ctx: &ChunkContext<'_>,
    lines: &[&str],
    content: &str,
    opts: &ChunkingOptions,
) -> Vec<CodeChunk> {
    let (window, overlap) = window_size(content, lines.len(), opts);
    let step = window - overlap;
    let base = file_name(ctx.file_path);

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < lines.len() {
        let end = (start + window).min(lines.len());
        let name = format!("{}:{}-{}", base, start + 1, end);
        chunks.push(ctx.make_chunk(ChunkType::CodeBlock, &name, lines, start, end - 1, None, None));
        if end == lines.len() {
            break;
        }
        start += step;
    }
    chunks
}
