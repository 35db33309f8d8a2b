use crate::diagnostics::{Diagnostic, DiagnosticCode, Span};

pub mod codes {
    pub const CONTROL_FLOW_UNSUPPORTED: &str = "DIF010";
    pub const LOOPS_UNSUPPORTED: &str = "DIF011";
    pub const ENUM_UNSUPPORTED: &str = "DIF012";
    pub const INOUT_UNSUPPORTED: &str = "DIF013";
    pub const GLOBAL_WRITE_UNSUPPORTED: &str = "DIF014";
    pub const CLASS_MEMBER_UNSUPPORTED: &str = "DIF016";
    pub const MISSING_RETURN: &str = "DIF017";
    pub const NO_TANGENT_PROPERTY: &str = "DIF018";
    pub const OPAQUE_FUNCTION_VALUE: &str = "DIF019";
    pub const EXTERNAL_FUNCTION: &str = "DIF020";
    pub const OPAQUE_SEMANTICS: &str = "DIF021";
    pub const NONDIFFERENTIABLE_ARGUMENT: &str = "DIF022";
    pub const NONDIFFERENTIABLE_RESULT: &str = "DIF023";
    pub const UNMET_REQUIREMENTS: &str = "DIF024";
    pub const RECURSIVE_DIFFERENTIATION: &str = "DIF026";
    pub const UNKNOWN_FUNCTION: &str = "DIF027";
    pub const LINEAR_WITHOUT_TRANSPOSE: &str = "DIF028";
    pub const UNSUPPORTED_INSTRUCTION: &str = "DIF029";
    pub const NONVARIED_RESULT: &str = "DIF030";
    pub const NESTING_TOO_DEEP: &str = "DIF031";
    pub const DUPLICATE_WITNESS: &str = "DIF032";
}

const CATEGORY: &str = "autodiff.transform";

pub const FUNCTION_NOT_DIFFERENTIABLE: &str = "function is not differentiable";
pub const EXPRESSION_NOT_DIFFERENTIABLE: &str = "expression is not differentiable";
pub const WHEN_DIFFERENTIATING_CALL: &str = "when differentiating this function call";

#[must_use]
pub fn error(code: &'static str, message: impl Into<String>, span: Option<Span>) -> Diagnostic {
    Diagnostic::error(message, span).with_code(DiagnosticCode::categorized(code, CATEGORY))
}

#[must_use]
pub fn warning(code: &'static str, message: impl Into<String>, span: Option<Span>) -> Diagnostic {
    Diagnostic::warning(message, span).with_code(DiagnosticCode::categorized(code, CATEGORY))
}

/// The first construct that prevented a derivative from being built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Unsupported {
    pub code: &'static str,
    pub message: String,
    pub span: Option<Span>,
}

impl Unsupported {
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>, span: Option<Span>) -> Self {
        Self {
            code,
            message: message.into(),
            span,
        }
    }
}

/// Why synthesis of one witness stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Failure {
    /// Not yet diagnosed; the requester reports it through its invoker chain.
    Unsupported(Unsupported),
    /// A nested request failed and has already been diagnosed.
    Reported(Reported),
}

impl From<Unsupported> for Failure {
    fn from(unsupported: Unsupported) -> Self {
        Failure::Unsupported(unsupported)
    }
}

impl From<Reported> for Failure {
    fn from(reported: Reported) -> Self {
        Failure::Reported(reported)
    }
}

/// A diagnosed failure, kept so that later requests reaching the same
/// witness can report it through their own invoker chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reported {
    pub cause: Unsupported,
    /// Calls between the failed witness and `cause`, innermost first.
    pub call_sites: Vec<Option<Span>>,
}

impl Reported {
    #[must_use]
    pub fn new(cause: Unsupported) -> Self {
        Self {
            cause,
            call_sites: Vec::new(),
        }
    }

    /// The same failure seen from the caller of the failed witness.
    #[must_use]
    pub fn through(mut self, call_site: Option<Span>) -> Self {
        self.call_sites.push(call_site);
        self
    }
}
