//! Parsing of structured assistant replies.
//!
//! The assistant asks the model for a JSON object:
//!
//! ```json
//! {
//!   "displayText": "Explanation shown to the user",
//!   "fileOperations": [
//!     { "operation": "update", "filePath": "src/App.cs", "content": "...", "description": "..." }
//!   ],
//!   "warnings": ["..."]
//! }
//! ```
//!
//! Models often wrap that object in a code fence or surround it with
//! prose, so [`parse_ai_response`] extracts the outermost `{...}` before
//! decoding. When no object can be decoded the whole reply becomes the
//! display text and a warning is attached. Parsing never fails.

use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" | "add" | "new" => Ok(OperationKind::Create),
            "update" | "modify" | "edit" | "replace" => Ok(OperationKind::Update),
            "delete" | "remove" => Ok(OperationKind::Delete),
            other => Err(format!("unknown operation '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOperation {
    pub operation: OperationKind,
    pub file_path: String,
    pub content: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedAiResponse {
    pub display_text: String,
    pub file_operations: Vec<FileOperation>,
    pub warnings: Vec<String>,
    /// The reply was not a decodable object and is shown verbatim.
    #[serde(skip)]
    pub used_fallback: bool,
}

/// Warning attached when a reply had to be shown as plain text.
pub const PLAIN_TEXT_WARNING: &str =
    "The assistant reply was not valid structured output and is shown as plain text.";

static FENCED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*\n(.*?)\n?```").unwrap());
static OUTER_OBJECT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\{.*\}").unwrap());

fn str_field<'a>(obj: &'a serde_json::Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| obj.get(*k).and_then(Value::as_str))
}

fn decode_object(raw: &str) -> Option<serde_json::Map<String, Value>> {
    let fenced = FENCED
        .captures_iter(raw)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .find(|inner| inner.trim_start().starts_with('{'));
    let candidates = fenced.into_iter().chain(std::iter::once(raw));

    for text in candidates {
        if let Some(m) = OUTER_OBJECT.find(text) {
            if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(m.as_str()) {
                let recognized = ["displayText", "display_text", "fileOperations", "file_operations"]
                    .iter()
                    .any(|k| obj.contains_key(*k));
                if recognized {
                    return Some(obj);
                }
            }
        }
    }
    None
}

/// Relative to the project root and staying inside it. Rejects Unix and
/// Windows absolute forms regardless of the host platform.
fn is_project_relative(path: &str) -> bool {
    let bytes = path.as_bytes();
    let rooted = path.starts_with('/') || path.starts_with('\\');
    let drive = bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':';
    !rooted && !drive && !path.split(['/', '\\']).any(|part| part == "..")
}

fn parse_operation(index: usize, value: &Value) -> Result<FileOperation, String> {
    let obj = value
        .as_object()
        .ok_or_else(|| format!("file operation #{} is not an object", index + 1))?;

    let kind_raw = str_field(obj, &["operation", "type", "action"])
        .ok_or_else(|| format!("file operation #{} has no operation", index + 1))?;
    let operation = kind_raw
        .parse::<OperationKind>()
        .map_err(|e| format!("file operation #{}: {}", index + 1, e))?;

    let file_path = str_field(obj, &["filePath", "file_path", "path", "file"])
        .map(str::trim)
        .unwrap_or_default()
        .to_string();
    if file_path.is_empty() {
        return Err(format!("file operation #{} has an empty path", index + 1));
    }
    if !is_project_relative(&file_path) {
        return Err(format!(
            "file operation #{} escapes the project: {}",
            index + 1,
            file_path
        ));
    }

    let content = str_field(obj, &["content", "newContent"]).map(str::to_string);
    if operation != OperationKind::Delete && content.is_none() {
        return Err(format!(
            "file operation #{} ({}) has no content",
            index + 1,
            file_path
        ));
    }

    Ok(FileOperation {
        operation,
        file_path,
        content,
        description: str_field(obj, &["description", "reason"]).map(str::to_string),
    })
}

/// Parse a raw model reply into display text, file operations, and
/// warnings.
pub fn parse_ai_response(raw: &str) -> ParsedAiResponse {
    let Some(obj) = decode_object(raw) else {
        return ParsedAiResponse {
            display_text: raw.to_string(),
            file_operations: Vec::new(),
            warnings: vec![PLAIN_TEXT_WARNING.to_string()],
            used_fallback: true,
        };
    };

    let display_text = str_field(&obj, &["displayText", "display_text"])
        .unwrap_or_default()
        .to_string();

    let mut warnings: Vec<String> = obj
        .get("warnings")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let mut file_operations = Vec::new();
    let ops = obj
        .get("fileOperations")
        .or_else(|| obj.get("file_operations"))
        .and_then(Value::as_array);
    for (i, op) in ops.into_iter().flatten().enumerate() {
        match parse_operation(i, op) {
            Ok(op) => file_operations.push(op),
            Err(reason) => warnings.push(format!("Skipped {}", reason)),
        }
    }

    ParsedAiResponse {
        display_text,
        file_operations,
        warnings,
        used_fallback: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_falls_back() {
        let raw = "Sure! The bug is in the loop bounds.";
        let parsed = parse_ai_response(raw);
        assert_eq!(parsed.display_text, raw);
        assert!(parsed.file_operations.is_empty());
        assert_eq!(parsed.warnings, vec![PLAIN_TEXT_WARNING]);
        assert!(parsed.used_fallback);
    }

    #[test]
    fn test_broken_json_falls_back() {
        let raw = "{\"displayText\": \"half";
        let parsed = parse_ai_response(raw);
        assert_eq!(parsed.display_text, raw);
        assert!(parsed.used_fallback);
    }

    #[test]
    fn test_fenced_json_with_prose() {
        let raw = r#"Here is the change:

```json
{
  "displayText": "Added a null check.",
  "fileOperations": [
    {"operation": "update", "filePath": "src/Cart.cs", "content": "class Cart {}", "description": "guard"}
  ],
  "warnings": ["Run the tests"]
}
```
Let me know!"#;
        let parsed = parse_ai_response(raw);
        assert!(!parsed.used_fallback);
        assert_eq!(parsed.display_text, "Added a null check.");
        assert_eq!(parsed.file_operations.len(), 1);
        let op = &parsed.file_operations[0];
        assert_eq!(op.operation, OperationKind::Update);
        assert_eq!(op.file_path, "src/Cart.cs");
        assert_eq!(op.description.as_deref(), Some("guard"));
        assert_eq!(parsed.warnings, vec!["Run the tests"]);
    }

    #[test]
    fn test_invalid_operations_are_dropped_with_warnings() {
        let raw = r#"{"displayText": "ok", "fileOperations": [
            {"operation": "create", "filePath": "", "content": "x"},
            {"operation": "update", "filePath": "a.cs"},
            {"operation": "teleport", "filePath": "b.cs", "content": "x"},
            {"operation": "create", "filePath": "../etc/passwd", "content": "x"},
            {"operation": "Delete", "filePath": "old.cs"}
        ]}"#;
        let parsed = parse_ai_response(raw);
        assert_eq!(parsed.file_operations.len(), 1);
        assert_eq!(parsed.file_operations[0].operation, OperationKind::Delete);
        assert_eq!(parsed.warnings.len(), 4);
        assert!(parsed.warnings.iter().all(|w| w.starts_with("Skipped file operation #")));
    }

    #[test]
    fn test_absolute_paths_are_rejected() {
        let raw = r#"{"displayText": "ok", "fileOperations": [
            {"operation": "delete", "filePath": "/etc/passwd"},
            {"operation": "create", "filePath": "C:\\x.cs", "content": "x"},
            {"operation": "create", "filePath": "\\\\server\\share\\a.cs", "content": "x"},
            {"operation": "update", "filePath": "src/app.ts", "content": "y"}
        ]}"#;
        let parsed = parse_ai_response(raw);
        assert_eq!(parsed.file_operations.len(), 1);
        assert_eq!(parsed.file_operations[0].file_path, "src/app.ts");
        assert_eq!(parsed.warnings.len(), 3);
        assert!(parsed.warnings.iter().all(|w| w.contains("escapes the project")));
    }

    #[test]
    fn test_unrelated_json_object_is_plain_text() {
        let raw = r#"{"name": "package", "version": "1.0"}"#;
        let parsed = parse_ai_response(raw);
        assert!(parsed.used_fallback);
        assert_eq!(parsed.display_text, raw);
    }
}
