//! Candidate lookup for names written in derivative attributes.
//!
//! Finding a candidate and explaining why none was found are separate
//! steps: [`find_function`] is a pure query over the module and
//! [`explain`] turns a [`LookupFailure`] into a diagnostic.

use crate::decls::{DeclContext, DeclId, DeclNameRef, FunctionDecl, NameLookup, SourceModule};
use crate::diagnostics::{Diagnostic, Span};
use crate::types::{FunctionType, GenericSignature, Type};

use super::diagnostics::{codes, error};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LookupFailure {
    /// Nothing with the name is visible.
    NotFound,
    /// Functions exist but none has the expected type.
    NoMatch,
    Ambiguous(Vec<DeclId>),
    NotFunction,
    InvalidTypeContext,
}

/// What the looked-up declaration is for; selects the diagnostic wording.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LookupPurpose {
    Derivative,
    Original,
}

/// How generic signatures of the outermost layer are compared.
pub enum GenericCheck<'a> {
    /// Canonical signatures must be equal.
    Exact,
    /// Caller-supplied relation between the required and candidate signatures.
    Satisfied(&'a dyn Fn(Option<&GenericSignature>, Option<&GenericSignature>) -> bool),
}

/// Resolve `name` from `scope` to the single function accepted by
/// `is_valid` whose context passes `has_valid_context`.
pub fn find_function(
    module: &SourceModule,
    name: &str,
    scope: &DeclContext,
    is_valid: impl Fn(&FunctionDecl) -> bool,
    has_valid_context: impl Fn(&FunctionDecl) -> bool,
) -> Result<DeclId, LookupFailure> {
    let candidates = module.lookup_value(name, scope);
    if candidates.is_empty() {
        return Err(LookupFailure::NotFound);
    }
    let mut valid = Vec::new();
    let mut saw_non_function = false;
    let mut saw_invalid_context = false;
    for id in candidates {
        let Some(function) = module.function(id) else {
            saw_non_function = true;
            continue;
        };
        if !has_valid_context(function) {
            saw_invalid_context = true;
            continue;
        }
        if is_valid(function) {
            valid.push(id);
        }
    }
    match valid.as_slice() {
        [id] => Ok(*id),
        [] if saw_non_function => Err(LookupFailure::NotFunction),
        [] if saw_invalid_context => Err(LookupFailure::InvalidTypeContext),
        [] => Err(LookupFailure::NoMatch),
        _ => Err(LookupFailure::Ambiguous(valid)),
    }
}

#[must_use]
pub fn explain(
    failure: &LookupFailure,
    name: &DeclNameRef,
    expected: &FunctionType,
    purpose: LookupPurpose,
    span: Option<Span>,
) -> Diagnostic {
    let attribute = match purpose {
        LookupPurpose::Derivative => "'@differentiable'",
        LookupPurpose::Original => "'@differentiating'",
    };
    match failure {
        LookupFailure::NotFound => error(
            codes::UNRESOLVED_NAME,
            format!("use of unresolved identifier '{name}'"),
            span,
        ),
        LookupFailure::NoMatch => match purpose {
            LookupPurpose::Derivative => error(
                codes::DERIVATIVE_TYPE_MISMATCH,
                format!("'{name}' does not have expected type '{expected}'"),
                span,
            ),
            LookupPurpose::Original => error(
                codes::ORIGINAL_NOT_FOUND,
                format!("could not find function '{name}' with expected type '{expected}'"),
                span,
            ),
        },
        LookupFailure::Ambiguous(candidates) => {
            let mut diagnostic = error(
                codes::AMBIGUOUS_FUNCTION,
                format!("ambiguous reference to '{name}' in {attribute} attribute"),
                span,
            );
            diagnostic.add_note(format!("{} candidates match", candidates.len()));
            diagnostic
        }
        LookupFailure::NotFunction => error(
            codes::NOT_A_FUNCTION,
            format!("'{name}' is not a function"),
            span,
        ),
        LookupFailure::InvalidTypeContext => error(
            codes::NOT_SAME_TYPE_CONTEXT,
            format!("'{name}' is not defined in the current type context"),
            span,
        ),
    }
}

/// Both declarations at module scope, or both members of the same type.
#[must_use]
pub fn has_valid_context(anchor: &FunctionDecl, candidate: &FunctionDecl) -> bool {
    anchor.context.same_context(&candidate.context)
}

/// Recursive structural match of a candidate's type against a required
/// function type. Labels are ignored; parameter conventions are not. Only the
/// outermost layer consults `check`, inner curried layers compare exactly.
#[must_use]
pub fn function_signature_matches(
    required: &FunctionType,
    candidate: &FunctionType,
    check: &GenericCheck<'_>,
) -> bool {
    let generics_match = match check {
        GenericCheck::Exact => {
            required.generic_signature.as_ref().map(GenericSignature::canonical)
                == candidate.generic_signature.as_ref().map(GenericSignature::canonical)
        }
        GenericCheck::Satisfied(satisfied) => satisfied(
            required.generic_signature.as_ref(),
            candidate.generic_signature.as_ref(),
        ),
    };
    if !generics_match || required.params.len() != candidate.params.len() {
        return false;
    }
    let params_match = required
        .params
        .iter()
        .zip(&candidate.params)
        .all(|(lhs, rhs)| lhs.convention == rhs.convention && lhs.ty.matches_ignoring_labels(&rhs.ty));
    if !params_match {
        return false;
    }
    match (required.result.as_ref(), candidate.result.as_ref()) {
        (Type::Function(lhs), Type::Function(rhs)) => {
            function_signature_matches(lhs, rhs, &GenericCheck::Exact)
        }
        (lhs, rhs) => lhs.matches_ignoring_labels(rhs),
    }
}

/// An ABI-visible original requires an ABI-visible derivative.
pub fn check_access(
    original: &FunctionDecl,
    derivative: &FunctionDecl,
    name: &DeclNameRef,
    span: Option<Span>,
) -> Result<(), Diagnostic> {
    if original.access.is_abi_public() && !derivative.access.is_abi_public() {
        return Err(error(
            codes::INVALID_ACCESS,
            format!(
                "derivative function '{name}' is required to either be public or \
                 '@usableFromInline' because the original function '{}' is public or \
                 '@usableFromInline'",
                original.full_name()
            ),
            span,
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decls::ParamDecl;
    use crate::types::{GenericParamType, FunctionParam};

    fn signature() -> GenericSignature {
        GenericSignature::new(
            vec![GenericParamType {
                name: "T".into(),
                depth: 0,
                index: 0,
            }],
            Vec::new(),
        )
    }

    #[test]
    fn matcher_ignores_labels_but_not_conventions() {
        let required = FunctionType::from_params(
            vec![FunctionParam::new(Type::float()).labeled("x")],
            Type::labeled_tuple(vec![("value", Type::float()), ("pullback", Type::float())]),
        );
        let candidate = FunctionType::new(
            vec![Type::float()],
            Type::tuple(vec![Type::float(), Type::float()]),
        );
        assert!(function_signature_matches(&required, &candidate, &GenericCheck::Exact));

        let inout = FunctionType::from_params(
            vec![FunctionParam::new(Type::float()).inout()],
            Type::tuple(vec![Type::float(), Type::float()]),
        );
        assert!(!function_signature_matches(&required, &inout, &GenericCheck::Exact));
    }

    #[test]
    fn generic_check_applies_to_outer_layer_only() {
        let t = Type::generic("T", 0, 0);
        let generic = FunctionType::new(vec![t.clone()], t.clone())
            .with_generic_signature(Some(signature()));
        let plain = FunctionType::new(vec![t.clone()], t);
        assert!(!function_signature_matches(&generic, &plain, &GenericCheck::Exact));
        let anything = |_: Option<&GenericSignature>, _: Option<&GenericSignature>| true;
        assert!(function_signature_matches(
            &generic,
            &plain,
            &GenericCheck::Satisfied(&anything)
        ));
    }

    #[test]
    fn lookup_distinguishes_failure_kinds() {
        let mut module = SourceModule::new("main");
        let first = module.add_function(FunctionDecl::new(
            "f",
            vec![ParamDecl::new("x", Type::float())],
            Type::float(),
        ));
        module.add_function(FunctionDecl::new(
            "f",
            vec![ParamDecl::new("x", Type::double())],
            Type::double(),
        ));
        let scope = DeclContext::Module;
        assert_eq!(
            find_function(&module, "g", &scope, |_| true, |_| true),
            Err(LookupFailure::NotFound)
        );
        assert_eq!(
            find_function(&module, "f", &scope, |_| false, |_| true),
            Err(LookupFailure::NoMatch)
        );
        assert!(matches!(
            find_function(&module, "f", &scope, |_| true, |_| true),
            Err(LookupFailure::Ambiguous(ids)) if ids.len() == 2
        ));
        assert_eq!(
            find_function(&module, "f", &scope, |f| f.result == Type::float(), |_| true),
            Ok(first)
        );
        assert_eq!(
            find_function(&module, "f", &scope, |_| true, |_| false),
            Err(LookupFailure::InvalidTypeContext)
        );
    }

    #[test]
    fn explain_picks_code_by_purpose() {
        let expected = FunctionType::new(vec![Type::float()], Type::float());
        let name = DeclNameRef::new("f");
        let derivative = explain(
            &LookupFailure::NoMatch,
            &name,
            &expected,
            LookupPurpose::Derivative,
            None,
        );
        assert_eq!(derivative.code_str(), Some(codes::DERIVATIVE_TYPE_MISMATCH));
        assert!(derivative.mentions("'(Float) -> Float'"));
        let original = explain(&LookupFailure::NoMatch, &name, &expected, LookupPurpose::Original, None);
        assert_eq!(original.code_str(), Some(codes::ORIGINAL_NOT_FOUND));
    }
}
