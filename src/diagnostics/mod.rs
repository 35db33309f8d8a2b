//! Diagnostics shared by attribute checking and derivative synthesis.
//!
//! Passes tag what they report with stable codes (`AD0xx` from attribute
//! checking, `DIF0xx` from synthesis). Anything pushed into a
//! [`DiagnosticSink`] without a code gets one hashed from the sink's
//! namespace, the message and the primary span, so reruns agree.

mod files;
mod formatter;

use std::fmt;
use std::iter;

use blake3::Hasher;
use serde::Serialize;

pub use files::{FileCache, FileId, LineCol, SourceFile};
pub use formatter::{format_diagnostics, ErrorFormat, FormatOptions, JSON_SCHEMA_VERSION};

/// Byte range in a source file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Span {
    pub file_id: FileId,
    pub start: usize,
    pub end: usize,
}

impl Span {
    /// A range in a file the [`FileCache`] does not know about.
    #[must_use]
    pub fn new(start: usize, end: usize) -> Self {
        Self::in_file(FileId::UNKNOWN, start, end)
    }

    #[must_use]
    pub fn in_file(file_id: FileId, start: usize, end: usize) -> Self {
        Span {
            file_id,
            start,
            end,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl Severity {
    #[must_use]
    pub fn keyword(self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Note => "note",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DiagnosticCode {
    pub code: String,
    pub category: Option<String>,
}

impl DiagnosticCode {
    /// A code reported by the pass named `category` (`autodiff.sema`, ...).
    #[must_use]
    pub fn categorized(code: impl Into<String>, category: &str) -> Self {
        DiagnosticCode {
            code: code.into(),
            category: Some(category.to_string()),
        }
    }
}

/// Message attached to a span.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Label {
    pub span: Span,
    pub message: String,
}

impl Label {
    #[must_use]
    pub fn new(span: Span, message: impl Into<String>) -> Self {
        Label {
            span,
            message: message.into(),
        }
    }
}

/// Fix-it. `replacement == Some("")` deletes the spanned text; `None` is
/// advice without an edit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Suggestion {
    pub message: String,
    pub span: Option<Span>,
    pub replacement: Option<String>,
}

impl Suggestion {
    #[must_use]
    pub fn new(message: impl Into<String>, span: Option<Span>, replacement: Option<String>) -> Self {
        Suggestion {
            message: message.into(),
            span,
            replacement,
        }
    }

    #[must_use]
    pub fn removal(message: impl Into<String>, span: Option<Span>) -> Self {
        Self::new(message, span, Some(String::new()))
    }
}

/// One reported problem: the site it was reported at, located notes (for
/// example the call chain that led to a failed derivative), free-standing
/// notes and fix-its.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: Option<DiagnosticCode>,
    pub message: String,
    pub primary_label: Option<Label>,
    pub secondary_labels: Vec<Label>,
    pub notes: Vec<String>,
    pub suggestions: Vec<Suggestion>,
}

impl Diagnostic {
    fn at(severity: Severity, message: String, span: Option<Span>) -> Self {
        Diagnostic {
            severity,
            code: None,
            message,
            primary_label: span.map(|span| Label::new(span, "")),
            secondary_labels: Vec::new(),
            notes: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>, span: Option<Span>) -> Self {
        Self::at(Severity::Error, message.into(), span)
    }

    #[must_use]
    pub fn warning(message: impl Into<String>, span: Option<Span>) -> Self {
        Self::at(Severity::Warning, message.into(), span)
    }

    #[must_use]
    pub fn with_code(self, code: DiagnosticCode) -> Self {
        Diagnostic {
            code: Some(code),
            ..self
        }
    }

    /// Text printed under the primary span. Ignored when there is no span.
    #[must_use]
    pub fn with_primary_label(mut self, message: impl Into<String>) -> Self {
        if let Some(label) = self.primary_label.as_mut() {
            label.message = message.into();
        }
        self
    }

    #[must_use]
    pub fn with_secondary(mut self, label: Label) -> Self {
        self.secondary_labels.push(label);
        self
    }

    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.add_note(note);
        self
    }

    #[must_use]
    pub fn with_suggestion(mut self, suggestion: Suggestion) -> Self {
        self.add_suggestion(suggestion);
        self
    }

    pub fn add_note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    /// Located note when `span` is known, plain note otherwise.
    pub fn add_note_at(&mut self, span: Option<Span>, note: impl Into<String>) {
        match span {
            Some(span) => self.secondary_labels.push(Label::new(span, note)),
            None => self.add_note(note),
        }
    }

    pub fn add_suggestion(&mut self, suggestion: Suggestion) {
        self.suggestions.push(suggestion);
    }

    #[must_use]
    pub fn span(&self) -> Option<Span> {
        self.primary_label.as_ref().map(|label| label.span)
    }

    #[must_use]
    pub fn code_str(&self) -> Option<&str> {
        self.code.as_ref().map(|code| code.code.as_str())
    }

    /// True when `text` occurs in the message, a note or any label.
    #[must_use]
    pub fn mentions(&self, text: &str) -> bool {
        let labels = self.primary_label.iter().chain(&self.secondary_labels);
        iter::once(self.message.as_str())
            .chain(self.notes.iter().map(String::as_str))
            .chain(labels.map(|label| label.message.as_str()))
            .any(|candidate| candidate.contains(text))
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}]: {}",
            self.severity,
            self.code_str().unwrap_or("UNKNOWN"),
            self.message
        )
    }
}

/// Ordered collection of what one pass reported.
#[derive(Debug)]
pub struct DiagnosticSink {
    namespace: String,
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticSink {
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        DiagnosticSink {
            namespace: namespace.into(),
            diagnostics: Vec::new(),
        }
    }

    pub fn push(&mut self, mut diagnostic: Diagnostic) {
        if diagnostic.code.is_none() {
            diagnostic.code = Some(self.fallback_code(&diagnostic));
        }
        self.diagnostics.push(diagnostic);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|diagnostic| diagnostic.severity == Severity::Error)
            .count()
    }

    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    /// `<NAMESPACE><5 digits>` from a blake3 digest of namespace, message and span.
    fn fallback_code(&self, diagnostic: &Diagnostic) -> DiagnosticCode {
        let mut hasher = Hasher::new();
        hasher.update(self.namespace.as_bytes());
        hasher.update(diagnostic.message.as_bytes());
        if let Some(span) = diagnostic.span() {
            hasher.update(&span.start.to_le_bytes());
            hasher.update(&span.end.to_le_bytes());
        }
        let digest = hasher.finalize();
        let [a, b, c, d, ..] = *digest.as_bytes();
        let number = u32::from_le_bytes([a, b, c, d]) % 100_000;
        DiagnosticCode::categorized(
            format!("{}{number:05}", self.namespace.to_ascii_uppercase()),
            &self.namespace,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncoded_diagnostics_get_stable_codes() {
        let report = |sink: &mut DiagnosticSink| {
            sink.push(Diagnostic::error("function is not differentiable", Some(Span::new(4, 9))));
        };
        let mut first = DiagnosticSink::new("dif");
        let mut second = DiagnosticSink::new("dif");
        report(&mut first);
        report(&mut second);

        let lhs = first.into_vec();
        let rhs = second.into_vec();
        let code = lhs[0].code_str().expect("fallback code");
        assert!(code.starts_with("DIF"), "namespace prefix: {code}");
        assert_eq!(code.len(), 8);
        assert_eq!(lhs[0].code, rhs[0].code);
    }

    #[test]
    fn explicit_codes_are_preserved() {
        let mut sink = DiagnosticSink::new("ad");
        sink.push(
            Diagnostic::error("duplicate attribute", None)
                .with_code(DiagnosticCode::categorized("AD026", "autodiff.sema")),
        );
        sink.push(Diagnostic::warning("zero derivative", None));
        assert_eq!(sink.error_count(), 1);
        assert_eq!(sink.diagnostics()[0].code_str(), Some("AD026"));
        assert!(!sink.is_empty());
    }

    #[test]
    fn located_notes_become_secondary_labels() {
        let mut diagnostic = Diagnostic::error("function is not differentiable", None)
            .with_primary_label("ignored without a span");
        diagnostic.add_note_at(Some(Span::new(1, 2)), "when differentiating this function call");
        diagnostic.add_note_at(None, "expression is not differentiable");
        assert_eq!(diagnostic.secondary_labels.len(), 1);
        assert_eq!(diagnostic.notes.len(), 1);
        assert!(diagnostic.primary_label.is_none());
        assert!(diagnostic.mentions("this function call"));
        assert!(diagnostic.mentions("expression is not"));
        assert!(!diagnostic.mentions("loops"));
    }

    #[test]
    fn display_renders_severity_code_and_message() {
        let diagnostic = Diagnostic::warning("zero derivative", None)
            .with_code(DiagnosticCode::categorized("DIF030", "autodiff.transform"));
        assert_eq!(diagnostic.to_string(), "warning[DIF030]: zero derivative");
        assert_eq!(
            Diagnostic::error("x", None).to_string(),
            "error[UNKNOWN]: x"
        );
    }
}
