use crate::diagnostics::{Diagnostic, DiagnosticCode, Span, Suggestion};

pub mod codes {
    pub const INVALID_DECL_ATTRIBUTE: &str = "AD001";
    pub const LINEAR_WITH_CUSTOM_DERIVATIVE: &str = "AD002";
    pub const STORED_PROPERTY_CUSTOM_DERIVATIVE: &str = "AD003";
    pub const CLASS_MEMBER_UNSUPPORTED: &str = "AD004";
    pub const VOID_RESULT: &str = "AD005";
    pub const EMPTY_WHERE_CLAUSE: &str = "AD006";
    pub const NONGENERIC_WHERE_CLAUSE: &str = "AD007";
    pub const UNSUPPORTED_REQUIREMENT_KIND: &str = "AD008";
    pub const NO_PARAMETERS: &str = "AD009";
    pub const UNKNOWN_PARAMETER_NAME: &str = "AD010";
    pub const PARAMS_NOT_ORIGINAL_ORDER: &str = "AD011";
    pub const SELF_INSTANCE_MEMBER_ONLY: &str = "AD012";
    pub const SELF_MUST_BE_FIRST: &str = "AD013";
    pub const PARAM_INDEX_OUT_OF_RANGE: &str = "AD014";
    pub const NO_INFERRED_PARAMETERS: &str = "AD015";
    pub const WRT_OBJECT_OR_EXISTENTIAL: &str = "AD016";
    pub const WRT_FUNCTION: &str = "AD017";
    pub const PARAM_NOT_DIFFERENTIABLE: &str = "AD018";
    pub const RESULT_NOT_DIFFERENTIABLE: &str = "AD019";
    pub const DERIVATIVE_TYPE_MISMATCH: &str = "AD020";
    pub const UNRESOLVED_NAME: &str = "AD021";
    pub const AMBIGUOUS_FUNCTION: &str = "AD022";
    pub const NOT_A_FUNCTION: &str = "AD023";
    pub const NOT_SAME_TYPE_CONTEXT: &str = "AD024";
    pub const INVALID_ACCESS: &str = "AD025";
    pub const DUPLICATE_ATTRIBUTE: &str = "AD026";

    pub const EXPECTED_RESULT_TUPLE: &str = "AD030";
    pub const INVALID_VALUE_LABEL: &str = "AD031";
    pub const INVALID_LINEAR_MAP_LABEL: &str = "AD032";
    pub const VALUE_NOT_DIFFERENTIABLE: &str = "AD033";
    pub const ORIGINAL_NOT_FOUND: &str = "AD034";
    pub const LINEAR_MAP_TYPE_MISMATCH: &str = "AD035";
    pub const NOT_IN_SAME_FILE: &str = "AD036";
    pub const ORIGINAL_HAS_DERIVATIVE: &str = "AD037";

    pub const FINAL_OUTSIDE_CLASS: &str = "AD040";
    pub const MUTATING_AND_NONMUTATING: &str = "AD041";
    pub const MUTATING_AT_MODULE_SCOPE: &str = "AD042";
    pub const MUTATING_IN_CLASS: &str = "AD043";
    pub const STATIC_MUTATING: &str = "AD044";
    pub const NO_DERIVATIVE_OUTSIDE_STORED_PROPERTY: &str = "AD045";
}

const CATEGORY: &str = "autodiff.sema";

#[must_use]
pub fn error(code: &'static str, message: impl Into<String>, span: Option<Span>) -> Diagnostic {
    Diagnostic::error(message, span).with_code(DiagnosticCode::categorized(code, CATEGORY))
}

/// Error whose fix-it deletes the offending attribute.
#[must_use]
pub fn error_removing(
    code: &'static str,
    message: impl Into<String>,
    span: Option<Span>,
    spelling: &str,
) -> Diagnostic {
    error(code, message, span)
        .with_suggestion(Suggestion::removal(format!("remove '{spelling}'"), span))
}
