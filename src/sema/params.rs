//! With-respect-to parameter inference, resolution and validation.
//!
//! Indices address the function's own parameters followed by `self` for
//! instance members.

use crate::autodiff::{IndexSubset, ParsedDifferentiationParameter, ParsedParameterKind};
use crate::decls::FunctionDecl;
use crate::diagnostics::{Diagnostic, Span};
use crate::types::{GenericSignature, Type};

use super::diagnostics::{codes, error};
use super::SemaContext;

/// Resolved indices plus the source location of each explicitly listed one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedParameters {
    pub indices: IndexSubset,
    spans: Vec<(usize, Span)>,
}

impl ResolvedParameters {
    #[must_use]
    pub fn precomputed(indices: IndexSubset) -> Self {
        Self {
            indices,
            spans: Vec::new(),
        }
    }

    fn span_of(&self, index: usize) -> Option<Span> {
        self.spans
            .iter()
            .find(|(candidate, _)| *candidate == index)
            .map(|(_, span)| *span)
    }
}

/// Parameter types in index order: own parameters, then `self`.
#[must_use]
pub fn differentiation_param_types(function: &FunctionDecl) -> Vec<Type> {
    let mut types: Vec<Type> = function.params.iter().map(|param| param.ty.clone()).collect();
    if let Some(self_type) = function.self_type() {
        types.push(self_type.clone());
    }
    types
}

/// Every parameter that is not a class, existential or function and conforms
/// to `Differentiable`.
pub(crate) fn infer_parameters(
    cx: &SemaContext<'_>,
    function: &FunctionDecl,
    signature: Option<&GenericSignature>,
) -> IndexSubset {
    let types = differentiation_param_types(function);
    let inferred = types
        .iter()
        .enumerate()
        .filter(|(_, ty)| {
            !ty.is_class()
                && !ty.is_existential()
                && !ty.is_function()
                && cx.conforms_to_differentiable(ty, signature)
        })
        .map(|(index, _)| index);
    IndexSubset::from_indices(types.len(), inferred)
}

pub(crate) fn resolve_parameters(
    cx: &SemaContext<'_>,
    function: &FunctionDecl,
    parsed: &[ParsedDifferentiationParameter],
    signature: Option<&GenericSignature>,
    attr_span: Option<Span>,
) -> Result<ResolvedParameters, Diagnostic> {
    let is_instance = function.is_instance_member();
    let param_count = function.params.len();
    let capacity = param_count + usize::from(is_instance);

    if function.params.is_empty() {
        let self_is_differentiable = function
            .self_type()
            .is_some_and(|self_type| cx.conforms_to_differentiable(self_type, signature));
        if !self_is_differentiable {
            return Err(error(
                codes::NO_PARAMETERS,
                format!(
                    "'{}' has no parameters to differentiate with respect to",
                    function.full_name()
                ),
                attr_span,
            ));
        }
    }

    if parsed.is_empty() {
        return Ok(ResolvedParameters::precomputed(infer_parameters(
            cx, function, signature,
        )));
    }

    let mut indices = IndexSubset::new(capacity);
    let mut spans = Vec::new();
    let mut last: Option<usize> = None;
    let out_of_order = |span| {
        error(
            codes::PARAMS_NOT_ORIGINAL_ORDER,
            "parameters must be specified in original order",
            span,
        )
    };
    for (position, param) in parsed.iter().enumerate() {
        let span = param.span.or(attr_span);
        let index = match &param.kind {
            ParsedParameterKind::Named(name) => {
                let Some(index) = function.params.iter().position(|decl| &decl.name == name)
                else {
                    return Err(error(
                        codes::UNKNOWN_PARAMETER_NAME,
                        format!("unknown parameter name '{name}'"),
                        span,
                    ));
                };
                if last.is_some_and(|last| index <= last) {
                    return Err(out_of_order(span));
                }
                last = Some(index);
                index
            }
            ParsedParameterKind::SelfParam => {
                if !is_instance {
                    return Err(error(
                        codes::SELF_INSTANCE_MEMBER_ONLY,
                        "a 'self' parameter can only be used in an instance declaration context",
                        span,
                    ));
                }
                if position > 0 {
                    return Err(error(
                        codes::SELF_MUST_BE_FIRST,
                        "'self' parameter must come first in the parameter list",
                        span,
                    ));
                }
                capacity - 1
            }
            ParsedParameterKind::Ordered(index) => {
                let index = *index;
                if index >= param_count {
                    return Err(error(
                        codes::PARAM_INDEX_OUT_OF_RANGE,
                        "parameter index is larger than total number of parameters",
                        span,
                    ));
                }
                if last.is_some_and(|last| index <= last) {
                    return Err(out_of_order(span));
                }
                last = Some(index);
                index
            }
        };
        indices.insert(index);
        if let Some(span) = param.span {
            spans.push((index, span));
        }
    }
    Ok(ResolvedParameters { indices, spans })
}

pub(crate) fn check_parameters(
    cx: &SemaContext<'_>,
    function: &FunctionDecl,
    resolved: &ResolvedParameters,
    signature: Option<&GenericSignature>,
    attr_span: Option<Span>,
) -> Result<(), Diagnostic> {
    if resolved.indices.is_empty() {
        return Err(error(
            codes::NO_INFERRED_PARAMETERS,
            "no differentiation parameters could be inferred; must differentiate with respect \
             to at least one parameter conforming to 'Differentiable'",
            attr_span,
        ));
    }
    let types = differentiation_param_types(function);
    for index in resolved.indices.iter() {
        let span = resolved.span_of(index).or(attr_span);
        let Some(ty) = types.get(index) else {
            return Err(error(
                codes::PARAM_INDEX_OUT_OF_RANGE,
                "parameter index is larger than total number of parameters",
                span,
            ));
        };
        if (!ty.has_type_parameters() && ty.is_class()) || ty.is_existential() {
            return Err(error(
                codes::WRT_OBJECT_OR_EXISTENTIAL,
                format!(
                    "class objects and protocol existentials ('{ty}') cannot be differentiated \
                     with respect to"
                ),
                span,
            ));
        }
        if ty.is_function() {
            return Err(error(
                codes::WRT_FUNCTION,
                format!("function type '{ty}' cannot be differentiated with respect to"),
                span,
            ));
        }
        if !cx.conforms_to_differentiable(ty, signature) {
            return Err(error(
                codes::PARAM_NOT_DIFFERENTIABLE,
                format!(
                    "can only differentiate with respect to parameters that conform to \
                     'Differentiable', but '{ty}' does not conform to 'Differentiable'"
                ),
                span,
            ));
        }
    }
    Ok(())
}
