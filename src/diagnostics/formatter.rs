//! Rendering of diagnostics for terminals and tools.

use std::fmt::Write as _;

use serde::Serialize;

use super::{Diagnostic, DiagnosticCode, FileCache, Label, LineCol, Span};

pub const JSON_SCHEMA_VERSION: &str = "1.0.0";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ErrorFormat {
    /// Headline, `-->` location, source excerpt with carets, notes and fix-its.
    #[default]
    Human,
    /// One JSON object per diagnostic, one per line.
    Json,
    /// `path:line:col: headline`.
    Short,
}

impl ErrorFormat {
    pub fn parse(name: &str) -> Option<Self> {
        [("human", Self::Human), ("json", Self::Json), ("short", Self::Short)]
            .into_iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .map(|(_, format)| format)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FormatOptions {
    pub format: ErrorFormat,
}

/// Render `diagnostics` separated by newlines.
#[must_use]
pub fn format_diagnostics(diagnostics: &[Diagnostic], files: &FileCache, options: FormatOptions) -> String {
    let renderer = Renderer { files };
    diagnostics
        .iter()
        .map(|diagnostic| match options.format {
            ErrorFormat::Human => renderer.human(diagnostic),
            ErrorFormat::Short => renderer.short(diagnostic),
            ErrorFormat::Json => renderer.json(diagnostic),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

const UNKNOWN_PATH: &str = "<unknown>";

struct Renderer<'a> {
    files: &'a FileCache,
}

impl Renderer<'_> {
    fn position(&self, span: Option<Span>) -> (String, Option<LineCol>) {
        let located = span.and_then(|span| {
            let path = self.files.path(span.file_id)?;
            Some((path.display().to_string(), self.files.line_col(span.file_id, span.start)))
        });
        located.unwrap_or_else(|| (UNKNOWN_PATH.to_string(), None))
    }

    fn arrow(&self, out: &mut String, span: Option<Span>) {
        let (path, position) = self.position(span);
        let _ = match position {
            Some(LineCol { line, column }) => writeln!(out, "  --> {path}:{line}:{column}"),
            None => writeln!(out, "  --> {path}:?:?"),
        };
        out.push_str("   |\n");
    }

    /// Source line containing `span.start` with carets under the span.
    fn excerpt(&self, out: &mut String, span: Span, message: &str) {
        let Some(file) = self.files.get(span.file_id) else {
            return;
        };
        let Some(position) = file.line_col(span.start) else {
            return;
        };
        let Some(text) = file.line(position.line) else {
            return;
        };
        let text = text.trim_end_matches('\n');
        let room = text.len().saturating_sub(position.column - 1).max(1);
        let width = span.end.saturating_sub(span.start).clamp(1, room);
        let _ = write!(
            out,
            "{line:>4} | {text}\n     | {pad}{carets} {message}",
            line = position.line,
            pad = " ".repeat(position.column - 1),
            carets = "^".repeat(width),
        );
    }

    fn human(&self, diagnostic: &Diagnostic) -> String {
        let mut out = format!("{diagnostic}\n");
        self.arrow(&mut out, diagnostic.span());
        if let Some(label) = &diagnostic.primary_label {
            self.excerpt(&mut out, label.span, &label.message);
        }
        for label in &diagnostic.secondary_labels {
            let _ = writeln!(out, "\nnote: {}", label.message);
            self.arrow(&mut out, Some(label.span));
            self.excerpt(&mut out, label.span, "");
        }
        for note in &diagnostic.notes {
            let _ = write!(out, "\nnote: {note}");
        }
        for suggestion in &diagnostic.suggestions {
            let _ = write!(out, "\nhelp: {}", suggestion.message);
            let _ = match suggestion.replacement.as_deref() {
                Some("") => write!(out, " (remove)"),
                Some(replacement) => write!(out, " replace with `{replacement}`"),
                None => Ok(()),
            };
        }
        out
    }

    fn short(&self, diagnostic: &Diagnostic) -> String {
        let (path, position) = self.position(diagnostic.span());
        let mut out = match position {
            Some(LineCol { line, column }) => format!("{path}:{line}:{column}: {diagnostic}"),
            None => format!("{path}:?:?: {diagnostic}"),
        };
        let notes = diagnostic.notes.len() + diagnostic.secondary_labels.len();
        if notes > 0 {
            let _ = write!(out, " (notes: {notes})");
        }
        out
    }

    fn json(&self, diagnostic: &Diagnostic) -> String {
        let labels = diagnostic
            .primary_label
            .iter()
            .map(|primary| self.json_label(primary, true))
            .chain(
                diagnostic
                    .secondary_labels
                    .iter()
                    .map(|secondary| self.json_label(secondary, false)),
            )
            .collect();
        let payload = JsonDiagnostic {
            version: JSON_SCHEMA_VERSION,
            severity: diagnostic.severity.keyword(),
            code: diagnostic.code.as_ref(),
            message: &diagnostic.message,
            primary_span: diagnostic.span().map(|span| self.json_span(span)),
            labels,
            notes: diagnostic.notes.iter().map(String::as_str).collect(),
            suggestions: diagnostic
                .suggestions
                .iter()
                .map(|suggestion| JsonSuggestion {
                    message: &suggestion.message,
                    span: suggestion.span.map(|span| self.json_span(span)),
                    replacement: suggestion.replacement.as_deref(),
                })
                .collect(),
        };
        serde_json::to_string(&payload).unwrap_or_else(|_| "{}".into())
    }

    fn json_label<'l>(&self, label: &'l Label, is_primary: bool) -> JsonLabel<'l> {
        JsonLabel {
            message: &label.message,
            span: self.json_span(label.span),
            is_primary,
        }
    }

    fn json_span(&self, span: Span) -> JsonSpan {
        let (file, position) = self.position(Some(span));
        let position = position.unwrap_or(LineCol { line: 0, column: 0 });
        JsonSpan {
            file,
            start: span.start,
            end: span.end,
            line_start: position.line,
            column_start: position.column,
        }
    }
}

#[derive(Serialize)]
struct JsonDiagnostic<'a> {
    version: &'static str,
    severity: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'a DiagnosticCode>,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    primary_span: Option<JsonSpan>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    labels: Vec<JsonLabel<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    notes: Vec<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    suggestions: Vec<JsonSuggestion<'a>>,
}

/// Line and column are 0 when the file is unknown.
#[derive(Serialize)]
struct JsonSpan {
    file: String,
    start: usize,
    end: usize,
    line_start: usize,
    column_start: usize,
}

#[derive(Serialize)]
struct JsonLabel<'a> {
    message: &'a str,
    span: JsonSpan,
    is_primary: bool,
}

#[derive(Serialize)]
struct JsonSuggestion<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    span: Option<JsonSpan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    replacement: Option<&'a str>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{Diagnostic, DiagnosticCode, Suggestion};
    use serde_json::Value;

    fn sample() -> (FileCache, Span, Span) {
        let mut files = FileCache::default();
        let source = "@differentiable(wrt: (y, x))\nfunc f(x: Float, y: Float) -> Float\n";
        let file_id = files.add_file("sample.swift", source);
        let file = files.get(file_id).expect("file");
        let attr = file.find("(y, x)").expect("attr span");
        let decl = file.find("func f").expect("decl span");
        (files, attr, decl)
    }

    fn out_of_order(span: Span) -> Diagnostic {
        Diagnostic::error("parameters must be specified in original order", Some(span))
            .with_code(DiagnosticCode::categorized("AD011", "autodiff.sema"))
            .with_primary_label("out of order")
    }

    fn render(diagnostic: Diagnostic, files: &FileCache, format: ErrorFormat) -> String {
        format_diagnostics(&[diagnostic], files, FormatOptions { format })
    }

    #[test]
    fn human_format_includes_excerpt_notes_and_fixits() {
        let (files, attr, decl) = sample();
        let mut diagnostic = out_of_order(attr);
        diagnostic.add_note_at(Some(decl), "original declared here");
        diagnostic.add_suggestion(Suggestion::removal("remove the attribute", Some(attr)));
        let rendered = render(diagnostic, &files, ErrorFormat::Human);
        assert!(
            rendered.starts_with("error[AD011]: parameters must be specified in original order\n"),
            "{rendered}"
        );
        assert!(rendered.contains("  --> sample.swift:1:22\n"), "{rendered}");
        assert!(rendered.contains("   1 | @differentiable(wrt: (y, x))"), "{rendered}");
        assert!(rendered.contains("^^^^^^ out of order"), "{rendered}");
        assert!(rendered.contains("note: original declared here"), "{rendered}");
        assert!(rendered.contains("  --> sample.swift:2:1\n"), "{rendered}");
        assert!(rendered.ends_with("help: remove the attribute (remove)"), "{rendered}");
    }

    #[test]
    fn short_format_is_single_line() {
        let (files, attr, decl) = sample();
        let mut diagnostic = out_of_order(attr);
        diagnostic.add_note_at(Some(decl), "original declared here");
        assert_eq!(
            render(diagnostic, &files, ErrorFormat::Short),
            "sample.swift:1:22: error[AD011]: parameters must be specified in original order (notes: 1)"
        );
    }

    #[test]
    fn json_format_emits_schema_versioned_payload() {
        let (files, attr, decl) = sample();
        let mut diagnostic = out_of_order(attr);
        diagnostic.add_note_at(Some(decl), "original declared here");
        let rendered = render(diagnostic, &files, ErrorFormat::Json);
        let value: Value = serde_json::from_str(&rendered).expect("valid json diagnostic");
        assert_eq!(value["version"], JSON_SCHEMA_VERSION);
        assert_eq!(value["severity"], "error");
        assert_eq!(value["code"]["code"], "AD011");
        assert_eq!(value["code"]["category"], "autodiff.sema");
        assert_eq!(value["primary_span"]["line_start"], 1);
        assert_eq!(value["labels"][0]["is_primary"], true);
        assert_eq!(value["labels"][1]["span"]["line_start"], 2);
        assert!(value.get("notes").is_none());
        assert!(value.get("suggestions").is_none());
    }

    #[test]
    fn unknown_locations_render_placeholders() {
        let files = FileCache::default();
        let diagnostic = Diagnostic::error("function is not differentiable", None);
        assert_eq!(
            render(diagnostic, &files, ErrorFormat::Short),
            "<unknown>:?:?: error[UNKNOWN]: function is not differentiable"
        );
        assert_eq!(ErrorFormat::parse("JSON"), Some(ErrorFormat::Json));
        assert_eq!(ErrorFormat::parse("toon"), None);
        assert_eq!(FormatOptions::default().format, ErrorFormat::Human);
    }
}
