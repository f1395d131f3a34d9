//! Regex-based symbol extraction.
//!
//! Extracts namespaces, classes, interfaces, methods, and properties from
//! source text without a real parser. Each language family has its own
//! single-pass extractor that walks the file line by line and keeps the
//! innermost enclosing namespace/class as local state so every symbol can
//! report its `parent`.
//!
//! | Family | Languages | Scope tracking |
//! |--------|-----------|----------------|
//! | [`LanguageFamily::CSharpLike`] | C#, Java, Kotlin | brace depth |
//! | [`LanguageFamily::PythonLike`] | Python | indentation |
//! | [`LanguageFamily::JsLike`] | JavaScript, TypeScript | brace depth |
//! | [`LanguageFamily::Generic`] | everything else | none |
//!
//! Extractors never fail: a line that matches nothing is skipped. Braces
//! inside strings or comments are counted like any other brace, so scope
//! tracking can drift on unusual input.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::models::{CodeSymbol, SymbolKind};

/// Groups languages whose declarations look alike closely enough to share
/// one set of patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageFamily {
    CSharpLike,
    PythonLike,
    JsLike,
    Generic,
}

impl LanguageFamily {
    pub fn from_language(language: &str) -> Self {
        match language.to_ascii_lowercase().as_str() {
            "csharp" | "c#" | "cs" | "java" | "kotlin" => LanguageFamily::CSharpLike,
            "python" | "py" => LanguageFamily::PythonLike,
            "javascript" | "js" | "typescript" | "ts" | "jsx" | "tsx" => LanguageFamily::JsLike,
            _ => LanguageFamily::Generic,
        }
    }

    /// Whether block boundaries follow braces rather than indentation.
    pub fn is_braced(&self) -> bool {
        !matches!(self, LanguageFamily::PythonLike)
    }
}

/// Map a file path to a language identifier by extension.
///
/// Unknown extensions map to `"text"`.
pub fn detect_language(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "cs" => "csharp",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "py" | "pyw" => "python",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "ts" | "tsx" | "mts" | "cts" => "typescript",
        "rs" => "rust",
        "go" => "go",
        "rb" => "ruby",
        "php" => "php",
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" | "hh" => "cpp",
        "swift" => "swift",
        "sh" | "bash" | "zsh" => "shell",
        "ps1" => "powershell",
        "lua" => "lua",
        "sql" => "sql",
        "html" | "htm" | "cshtml" | "razor" => "html",
        "css" | "scss" | "less" => "css",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "xml" | "csproj" | "props" | "targets" | "config" => "xml",
        "ini" | "cfg" | "conf" | "env" => "ini",
        "md" | "markdown" | "rst" | "txt" => "markdown",
        _ => "text",
    }
}

/// Extract all recognizable symbols from `content`.
///
/// Dispatches on [`LanguageFamily::from_language`]. Line numbers in the
/// result are 1-based.
pub fn extract_symbols(file_path: &str, content: &str, language: &str) -> Vec<CodeSymbol> {
    let family = LanguageFamily::from_language(language);
    let symbols = match family {
        LanguageFamily::CSharpLike => extract_csharp_like(content),
        LanguageFamily::PythonLike => extract_python_like(content),
        LanguageFamily::JsLike => extract_js_like(content),
        LanguageFamily::Generic => extract_generic(content),
    };
    tracing::trace!(file = file_path, language, count = symbols.len(), "extracted symbols");
    symbols
}

// ── Brace-scoped extraction ─────────────────────────────────────────────

/// An open namespace or class, popped once the brace depth falls back to
/// where it was declared.
struct Scope {
    name: String,
    kind: SymbolKind,
    open_depth: i64,
    entered: bool,
}

#[derive(Default)]
struct ScopeStack {
    scopes: Vec<Scope>,
    depth: i64,
}

impl ScopeStack {
    fn innermost(&self) -> Option<String> {
        self.scopes.last().map(|s| s.name.clone())
    }

    fn innermost_type(&self) -> Option<&Scope> {
        self.scopes
            .iter()
            .rev()
            .find(|s| matches!(s.kind, SymbolKind::Class | SymbolKind::Interface))
    }

    fn in_type(&self) -> bool {
        self.innermost_type().is_some()
    }

    fn push(&mut self, name: &str, kind: SymbolKind) {
        self.scopes.push(Scope {
            name: name.to_string(),
            kind,
            open_depth: self.depth,
            entered: false,
        });
    }

    /// A scope that never closes, e.g. a file-scoped `namespace X;`.
    fn push_file_scoped(&mut self, name: &str, kind: SymbolKind) {
        self.scopes.push(Scope {
            name: name.to_string(),
            kind,
            open_depth: i64::MIN,
            entered: true,
        });
    }

    fn advance(&mut self, line: &str) {
        let mut peak = self.depth;
        for c in line.chars() {
            match c {
                '{' => {
                    self.depth += 1;
                    peak = peak.max(self.depth);
                }
                '}' => self.depth -= 1,
                _ => {}
            }
        }
        if let Some(top) = self.scopes.last_mut() {
            if peak > top.open_depth {
                top.entered = true;
            }
        }
        while let Some(top) = self.scopes.last() {
            if top.entered && self.depth <= top.open_depth {
                self.scopes.pop();
            } else {
                break;
            }
        }
        // A declaration that ended in `;` before any brace opened.
        if let Some(top) = self.scopes.last() {
            if !top.entered && line.trim_end().ends_with(';') && self.depth <= top.open_depth {
                self.scopes.pop();
            }
        }
    }
}

static CS_NAMESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:namespace|package)\s+([\w.]+)\s*(;)?").unwrap());
static CS_INTERFACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:(public|private|protected|internal)\s+)?(?:(?:partial|sealed|static)\s+)*interface\s+(\w+)").unwrap()
});
static CS_CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:(public|private|protected|internal)\s+)?(?:(?:static|abstract|sealed|partial|final|readonly|data|open)\s+)*(?:class|record|struct|enum)\s+(\w+)").unwrap()
});
static CS_PROPERTY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(public|private|protected|internal)\s+(?:(?:static|virtual|override|abstract|new|required|readonly)\s+)*([\w<>\[\],.?]+)\s+(\w+)\s*\{\s*(?:get|set|init)").unwrap()
});
static CS_METHOD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(public|private|protected|internal)\s+(?:(?:static|virtual|override|abstract|async|sealed|new|extern|final|synchronized|unsafe|partial)\s+)*([\w<>\[\],.?]+)\s+(\w+)\s*(?:<[^>]*>)?\s*\(([^)]*)").unwrap()
});
static CS_CONSTRUCTOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(public|private|protected|internal)\s+(?:static\s+)?(\w+)\s*\(([^)]*)").unwrap()
});

fn symbol(
    kind: SymbolKind,
    name: &str,
    line: &str,
    line_number: usize,
    parent: Option<String>,
) -> CodeSymbol {
    CodeSymbol {
        kind,
        name: name.to_string(),
        signature: line.trim().to_string(),
        visibility: None,
        return_type: None,
        parameters: None,
        parent,
        line_number,
    }
}

fn non_empty(s: Option<regex::Match<'_>>) -> Option<String> {
    s.map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn extract_csharp_like(content: &str) -> Vec<CodeSymbol> {
    let mut out = Vec::new();
    let mut scopes = ScopeStack::default();

    for (idx, line) in content.lines().enumerate() {
        let line_number = idx + 1;
        let trimmed = line.trim_start();
        if trimmed.starts_with("//") || trimmed.starts_with('*') || trimmed.starts_with("/*") {
            continue;
        }

        if let Some(caps) = CS_NAMESPACE.captures(line) {
            let name = &caps[1];
            out.push(symbol(SymbolKind::Namespace, name, line, line_number, scopes.innermost()));
            if caps.get(2).is_some() {
                scopes.push_file_scoped(name, SymbolKind::Namespace);
            } else {
                scopes.push(name, SymbolKind::Namespace);
            }
        } else if let Some(caps) = CS_INTERFACE.captures(line) {
            let name = &caps[2];
            let mut s = symbol(SymbolKind::Interface, name, line, line_number, scopes.innermost());
            s.visibility = non_empty(caps.get(1));
            out.push(s);
            scopes.push(name, SymbolKind::Interface);
        } else if let Some(caps) = CS_CLASS.captures(line) {
            let name = &caps[2];
            let mut s = symbol(SymbolKind::Class, name, line, line_number, scopes.innermost());
            s.visibility = non_empty(caps.get(1));
            out.push(s);
            scopes.push(name, SymbolKind::Class);
        } else if let Some(caps) = CS_PROPERTY.captures(line) {
            let mut s = symbol(SymbolKind::Property, &caps[3], line, line_number, scopes.innermost());
            s.visibility = non_empty(caps.get(1));
            s.return_type = non_empty(caps.get(2));
            out.push(s);
        } else if let Some(caps) = CS_METHOD.captures(line) {
            let return_type = &caps[2];
            // `public new Foo(...)` style object creation inside expressions
            if return_type != "new" && return_type != "return" {
                let mut s = symbol(SymbolKind::Method, &caps[3], line, line_number, scopes.innermost());
                s.visibility = non_empty(caps.get(1));
                s.return_type = Some(return_type.to_string());
                s.parameters = Some(caps[4].trim().to_string());
                out.push(s);
            }
        } else if let Some(caps) = CS_CONSTRUCTOR.captures(line) {
            let name = &caps[2];
            let is_ctor = scopes.innermost_type().is_some_and(|t| t.name == name);
            if is_ctor {
                let mut s = symbol(SymbolKind::Method, name, line, line_number, scopes.innermost());
                s.visibility = non_empty(caps.get(1));
                s.parameters = Some(caps[3].trim().to_string());
                out.push(s);
            }
        }

        scopes.advance(line);
    }
    out
}

// ── Python ──────────────────────────────────────────────────────────────

static PY_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)class\s+(\w+)\s*(?:\(([^)]*)\))?\s*:").unwrap());
static PY_DEF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\s*)(?:async\s+)?def\s+(\w+)\s*\(([^)]*)\)?(?:\s*->\s*([^:]+))?").unwrap()
});

fn indent_width(s: &str) -> usize {
    s.chars()
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum()
}

fn python_visibility(name: &str) -> &'static str {
    if name.starts_with("__") && name.ends_with("__") {
        "public"
    } else if name.starts_with('_') {
        "private"
    } else {
        "public"
    }
}

fn extract_python_like(content: &str) -> Vec<CodeSymbol> {
    let mut out = Vec::new();
    // (indent, class name)
    let mut classes: Vec<(usize, String)> = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let indent = indent_width(&line[..line.len() - trimmed.len()]);
        while classes.last().is_some_and(|(i, _)| indent <= *i) {
            classes.pop();
        }
        let parent = classes.last().map(|(_, n)| n.clone());

        if let Some(caps) = PY_CLASS.captures(line) {
            let name = caps[2].to_string();
            let mut s = symbol(SymbolKind::Class, &name, line, idx + 1, parent);
            s.visibility = Some(python_visibility(&name).to_string());
            s.parameters = non_empty(caps.get(3));
            out.push(s);
            classes.push((indent, name));
        } else if let Some(caps) = PY_DEF.captures(line) {
            let name = &caps[2];
            let mut s = symbol(SymbolKind::Method, name, line, idx + 1, parent);
            s.visibility = Some(python_visibility(name).to_string());
            s.parameters = Some(caps[3].trim().to_string());
            s.return_type = non_empty(caps.get(4));
            out.push(s);
        }
    }
    out
}

// ── JavaScript / TypeScript ─────────────────────────────────────────────

static JS_NAMESPACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:export\s+)?(?:declare\s+)?(?:namespace|module)\s+([\w.]+)\s*\{").unwrap()
});
static JS_INTERFACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:export\s+)?(?:declare\s+)?interface\s+(\w+)").unwrap());
static JS_CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:export\s+)?(?:default\s+)?(?:declare\s+)?(?:abstract\s+)?class\s+(\w+)").unwrap()
});
static JS_FUNCTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*(\w+)\s*(?:<[^>]*>)?\s*\(([^)]*)\)?(?:\s*:\s*([^{]+))?").unwrap()
});
static JS_ARROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:export\s+)?(?:const|let|var)\s+(\w+)\s*(?::[^=]+)?=\s*(?:async\s+)?(?:\(([^)]*)\)|(\w+))\s*(?::\s*[^=]+)?=>").unwrap()
});
static JS_CLASS_METHOD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:(public|private|protected)\s+)?(?:static\s+)?(?:override\s+)?(?:async\s+)?(?:get\s+|set\s+)?\*?#?(\w+)\s*(?:<[^>]*>)?\s*\(([^)]*)\)\s*(?::\s*([^{]+?))?\s*\{").unwrap()
});
static JS_CLASS_PROPERTY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*((?:(?:public|private|protected|readonly|static)\s+)+)(\w+)\s*[?!]?\s*[:=]\s*([^;=]*)").unwrap()
});

const JS_KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "catch", "function", "return", "with", "else", "do", "try",
    "new", "typeof", "super", "await",
];

fn extract_js_like(content: &str) -> Vec<CodeSymbol> {
    let mut out = Vec::new();
    let mut scopes = ScopeStack::default();

    for (idx, line) in content.lines().enumerate() {
        let line_number = idx + 1;
        let trimmed = line.trim_start();
        if trimmed.starts_with("//") || trimmed.starts_with('*') || trimmed.starts_with("/*") {
            continue;
        }
        let class_body_depth = scopes.innermost_type().map(|t| t.open_depth + 1);
        let directly_in_class = class_body_depth == Some(scopes.depth);

        if let Some(caps) = JS_NAMESPACE.captures(line) {
            let name = &caps[1];
            out.push(symbol(SymbolKind::Namespace, name, line, line_number, scopes.innermost()));
            scopes.push(name, SymbolKind::Namespace);
        } else if let Some(caps) = JS_INTERFACE.captures(line) {
            let name = &caps[1];
            let s = symbol(SymbolKind::Interface, name, line, line_number, scopes.innermost());
            out.push(s);
            scopes.push(name, SymbolKind::Interface);
        } else if let Some(caps) = JS_CLASS.captures(line) {
            let name = &caps[1];
            let visibility = if trimmed.starts_with("export") { "public" } else { "internal" };
            let mut s = symbol(SymbolKind::Class, name, line, line_number, scopes.innermost());
            s.visibility = Some(visibility.to_string());
            out.push(s);
            scopes.push(name, SymbolKind::Class);
        } else if let Some(caps) = JS_FUNCTION.captures(line) {
            let mut s = symbol(SymbolKind::Method, &caps[1], line, line_number, scopes.innermost());
            s.parameters = Some(caps[2].trim().to_string());
            s.return_type = non_empty(caps.get(3));
            out.push(s);
        } else if let Some(caps) = JS_ARROW.captures(line) {
            let mut s = symbol(SymbolKind::Method, &caps[1], line, line_number, scopes.innermost());
            s.parameters = non_empty(caps.get(2)).or_else(|| non_empty(caps.get(3)));
            out.push(s);
        } else if directly_in_class && scopes.in_type() {
            if let Some(caps) = JS_CLASS_METHOD.captures(line) {
                let name = &caps[2];
                if !JS_KEYWORDS.contains(&name) {
                    let mut s = symbol(SymbolKind::Method, name, line, line_number, scopes.innermost());
                    s.visibility = non_empty(caps.get(1))
                        .or_else(|| trimmed.starts_with('#').then(|| "private".to_string()));
                    s.parameters = Some(caps[3].trim().to_string());
                    s.return_type = non_empty(caps.get(4));
                    out.push(s);
                }
            } else if let Some(caps) = JS_CLASS_PROPERTY.captures(line) {
                let modifiers = caps[1].split_whitespace().collect::<Vec<_>>();
                let mut s = symbol(SymbolKind::Property, &caps[2], line, line_number, scopes.innermost());
                s.visibility = modifiers
                    .iter()
                    .find(|m| matches!(**m, "public" | "private" | "protected"))
                    .map(|m| m.to_string());
                s.return_type = non_empty(caps.get(3));
                out.push(s);
            }
        }

        scopes.advance(line);
    }
    out
}

// ── Generic fallback ────────────────────────────────────────────────────

static GENERIC_CALLABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:(?:async|static|export|local|private|public|unsafe|const)\s+)*(?:fn|func|def|function|sub|proc|fun)\s+(?:\([^)]*\)\s*)?(\w+)\s*(?:<[^>]*>)?\s*\(([^)]*)").unwrap()
});

fn extract_generic(content: &str) -> Vec<CodeSymbol> {
    content
        .lines()
        .enumerate()
        .filter_map(|(idx, line)| {
            let caps = GENERIC_CALLABLE.captures(line)?;
            let mut s = symbol(SymbolKind::Method, &caps[1], line, idx + 1, None);
            s.parameters = Some(caps[2].trim().to_string());
            Some(s)
        })
        .collect()
}
