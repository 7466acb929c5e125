//! Output formatting — renders aggregated results for the user.
//!
//! The format is auto-detected from the content shape unless the caller
//! pins one: structured values render as pretty JSON, strings are
//! sniffed for code and markdown cues, and everything else defaults to
//! markdown. Error outputs render the same way regardless of format.

use serde_json::Value;

use crate::types::{FormattedOutput, OutputFormat};

/// Inputs to one formatting pass.
#[derive(Debug, Clone, Default)]
pub struct OutputRequest {
    /// Content to render: a string or any structured value.
    pub content: Value,
    /// Explicit format; auto-detected when absent.
    pub format: Option<OutputFormat>,
    /// Render as an error body.
    pub error: bool,
    /// Error message used when `error` is set.
    pub error_message: Option<String>,
    /// Extra metadata merged into the output.
    pub metadata: serde_json::Map<String, Value>,
}

/// Stateless output formatter.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputEngine;

impl OutputEngine {
    /// Create an engine.
    pub fn new() -> Self {
        Self
    }

    /// Render the request into a formatted output.
    pub fn format(&self, request: OutputRequest) -> FormattedOutput {
        if request.error {
            let message = request
                .error_message
                .clone()
                .unwrap_or_else(|| "unknown error".to_owned());
            return FormattedOutput {
                format: OutputFormat::Markdown,
                content: format!("❌ **Error**\n\n{message}"),
                metadata: request.metadata,
                error: true,
                error_message: Some(message),
            };
        }

        let mut metadata = request.metadata;

        let (format, content) = match &request.content {
            Value::String(text) => {
                let format = request.format.unwrap_or_else(|| detect_format(text));
                if format == OutputFormat::Code {
                    metadata.insert(
                        "language".to_owned(),
                        Value::String(detect_language(text).to_owned()),
                    );
                }
                (format, text.clone())
            }
            other => {
                let rendered =
                    serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string());
                (request.format.unwrap_or(OutputFormat::Json), rendered)
            }
        };

        FormattedOutput {
            format,
            content,
            metadata,
            error: false,
            error_message: None,
        }
    }
}

/// Sniff a string for code and markdown cues.
///
/// The code gate tests only the four generic cues; language-specific
/// markers matter only for the language sniff once the gate matched.
fn detect_format(text: &str) -> OutputFormat {
    let code_cues = ["function ", "class ", "const ", "import "];
    if code_cues.iter().any(|cue| text.contains(cue)) {
        return OutputFormat::Code;
    }
    let markdown_cues = ["# ", "## ", "```", "- "];
    if markdown_cues.iter().any(|cue| text.contains(cue)) {
        return OutputFormat::Markdown;
    }
    OutputFormat::Markdown
}

/// Best-effort language sniff for code content.
///
/// Specific languages are tested before the loose TypeScript/JavaScript
/// cues, which would otherwise swallow everything containing `: `.
fn detect_language(text: &str) -> &'static str {
    if text.contains("fn ") && text.contains("let mut ") {
        return "rust";
    }
    if text.contains("package ") && text.contains("func ") {
        return "go";
    }
    if text.contains("def ") && (text.contains("import ") || text.contains("from ")) {
        return "python";
    }
    if text.contains("public class ") {
        return "java";
    }
    if text.contains("interface ") || text.contains(": ") {
        return "typescript";
    }
    if text.contains("function ") || text.contains("const ") {
        return "javascript";
    }
    "text"
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine() -> OutputEngine {
        OutputEngine::new()
    }

    fn request(content: Value) -> OutputRequest {
        OutputRequest {
            content,
            ..OutputRequest::default()
        }
    }

    #[test]
    fn test_object_renders_as_pretty_json() {
        let output = engine().format(request(json!({ "a": 1 })));
        assert_eq!(output.format, OutputFormat::Json);
        assert!(output.content.contains("\"a\": 1"));
        assert!(!output.error);
    }

    #[test]
    fn test_plain_string_defaults_to_markdown() {
        let output = engine().format(request(json!("just some words")));
        assert_eq!(output.format, OutputFormat::Markdown);
        assert_eq!(output.content, "just some words");
    }

    #[test]
    fn test_markdown_cues_detected() {
        let output = engine().format(request(json!("# Title\n\n- item")));
        assert_eq!(output.format, OutputFormat::Markdown);
    }

    #[test]
    fn test_code_detection_and_language() {
        let output = engine().format(request(json!(
            "function add(a, b) { const sum = a + b; return sum; }"
        )));
        assert_eq!(output.format, OutputFormat::Code);
        assert_eq!(output.metadata["language"], "javascript");
    }

    #[test]
    fn test_rust_language_sniff() {
        let output = engine().format(request(json!(
            "const MAX: usize = 4;\nfn main() { let mut x = MAX; }"
        )));
        assert_eq!(output.format, OutputFormat::Code);
        assert_eq!(output.metadata["language"], "rust");
    }

    #[test]
    fn test_language_markers_alone_do_not_open_the_code_gate() {
        // `fn ` is a language sniff cue, not a code-detection cue.
        let output = engine().format(request(json!("fn main() { let mut x = 1; }")));
        assert_eq!(output.format, OutputFormat::Markdown);
        assert!(!output.metadata.contains_key("language"));
    }

    #[test]
    fn test_python_language_sniff() {
        let output = engine().format(request(json!("import os\n\ndef run():\n    pass")));
        assert_eq!(output.format, OutputFormat::Code);
        assert_eq!(output.metadata["language"], "python");
    }

    #[test]
    fn test_typescript_language_sniff() {
        let output = engine().format(request(json!(
            "interface Point { x: number }\nconst p: Point = { x: 1 }"
        )));
        assert_eq!(output.metadata["language"], "typescript");
    }

    #[test]
    fn test_error_rendering_overrides_format() {
        let output = engine().format(OutputRequest {
            content: json!({ "ignored": true }),
            format: Some(OutputFormat::Json),
            error: true,
            error_message: Some("tool exploded".to_owned()),
            metadata: serde_json::Map::new(),
        });
        assert!(output.error);
        assert!(output.content.starts_with("❌ **Error**\n\n"));
        assert!(output.content.contains("tool exploded"));
        assert_eq!(output.error_message.as_deref(), Some("tool exploded"));
    }

    #[test]
    fn test_format_is_a_fixed_point_for_non_errors() {
        let first = engine().format(request(json!({ "nested": { "k": "v" } })));
        let second = engine().format(OutputRequest {
            content: Value::String(first.content.clone()),
            format: Some(first.format),
            ..OutputRequest::default()
        });
        assert_eq!(first.content, second.content);
        assert_eq!(first.format, second.format);
    }

    #[test]
    fn test_explicit_format_is_honored() {
        let output = engine().format(OutputRequest {
            content: json!("plain words"),
            format: Some(OutputFormat::Text),
            ..OutputRequest::default()
        });
        assert_eq!(output.format, OutputFormat::Text);
    }
}
