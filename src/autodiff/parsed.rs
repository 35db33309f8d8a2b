use std::fmt;

use crate::diagnostics::Span;

/// Unresolved reference to a with-respect-to parameter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParsedParameterKind {
    Named(String),
    Ordered(usize),
    SelfParam,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedDifferentiationParameter {
    pub kind: ParsedParameterKind,
    pub span: Option<Span>,
}

impl ParsedDifferentiationParameter {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            kind: ParsedParameterKind::Named(name.into()),
            span: None,
        }
    }

    #[must_use]
    pub fn ordered(index: usize) -> Self {
        Self {
            kind: ParsedParameterKind::Ordered(index),
            span: None,
        }
    }

    #[must_use]
    pub fn self_param() -> Self {
        Self {
            kind: ParsedParameterKind::SelfParam,
            span: None,
        }
    }

    #[must_use]
    pub fn at(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }
}

impl fmt::Display for ParsedDifferentiationParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ParsedParameterKind::Named(name) => f.write_str(name),
            ParsedParameterKind::Ordered(index) => write!(f, "{index}"),
            ParsedParameterKind::SelfParam => f.write_str("self"),
        }
    }
}
