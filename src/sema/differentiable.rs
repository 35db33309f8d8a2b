//! Validation of `@differentiable` attributes.

use crate::autodiff::{derivative_function_type, DerivativeFunctionKind};
use crate::decls::{
    AttrId, AttributeKind, Decl, DeclAttribute, DeclId, DifferentiableAttr, FunctionDecl,
};
use crate::diagnostics::Span;
use crate::types::{GenericSignature, Requirement, RequirementKind};

use super::diagnostics::{codes, error};
use super::lookup::{
    check_access, explain, find_function, function_signature_matches, has_valid_context,
    GenericCheck, LookupPurpose,
};
use super::params::{check_parameters, resolve_parameters, ResolvedParameters};
use super::registry::{DifferentiableAttrRegistry, RegisteredAttr};
use super::{AttrOutcome, Rejected, SemaContext};

pub(crate) fn check_differentiable(
    cx: &SemaContext<'_>,
    decl_id: DeclId,
    attribute: &DeclAttribute,
    attr: &DifferentiableAttr,
    registry: &mut DifferentiableAttrRegistry,
) -> Result<AttrOutcome, Rejected> {
    let span = attribute.span;
    let not_applicable = || {
        Rejected::remove(error(
            codes::INVALID_DECL_ATTRIBUTE,
            "'@differentiable' attribute cannot be applied to this declaration",
            span,
        ))
    };

    if attr.linear && attr.has_custom_derivative() {
        return Err(Rejected::remove(error(
            codes::LINEAR_WITH_CUSTOM_DERIVATIVE,
            "cannot specify 'vjp:' or 'jvp:' for linear functions; use '@transpose' attribute \
             for transpose registration instead",
            span,
        )));
    }

    let decl = cx.module.decl(decl_id).ok_or_else(not_applicable)?;
    let (original, is_storage) = match decl {
        Decl::Storage(storage) => {
            if storage.is_simple_stored() && attr.has_custom_derivative() {
                return Err(Rejected::remove(error(
                    codes::STORED_PROPERTY_CUSTOM_DERIVATIVE,
                    format!(
                        "cannot register custom derivatives for stored property '{}'",
                        storage.name
                    ),
                    span,
                )));
            }
            let getter = storage
                .getter
                .and_then(|getter| cx.module.function(getter))
                .ok_or_else(not_applicable)?;
            (getter, true)
        }
        Decl::Function(function) if function.is_setter() => return Err(not_applicable()),
        Decl::Function(function) => (function, false),
    };

    if original.context.is_class() {
        return Err(Rejected::remove(error(
            codes::CLASS_MEMBER_UNSUPPORTED,
            "class members cannot be marked with '@differentiable'",
            span,
        )));
    }

    if original.result.is_unit() {
        return Err(Rejected::invalid(error(
            codes::VOID_RESULT,
            format!("cannot differentiate void function '{}'", original.full_name()),
            span,
        )));
    }

    let mut attr = attr.clone();
    let signature = derivative_signature(original, &mut attr, span)?;
    attr.derivative_generic_signature = signature.clone();

    let resolved = match &attr.parameter_indices {
        Some(indices) => ResolvedParameters::precomputed(indices.clone()),
        None => resolve_parameters(cx, original, &attr.parsed_params, signature.as_ref(), span)
            .map_err(Rejected::invalid)?,
    };
    check_parameters(cx, original, &resolved, signature.as_ref(), span)
        .map_err(Rejected::invalid)?;
    let indices = resolved.indices;
    attr.parameter_indices = Some(indices.clone());

    if !cx.conforms_to_differentiable(&original.result, signature.as_ref()) {
        return Err(Rejected::invalid(error(
            codes::RESULT_NOT_DIFFERENTIABLE,
            format!(
                "can only differentiate functions with results that conform to \
                 'Differentiable', but '{}' does not conform to 'Differentiable'",
                original.result
            ),
            span,
        )));
    }

    let original_type = original.interface_type();
    for kind in [DerivativeFunctionKind::Jvp, DerivativeFunctionKind::Vjp] {
        let name = match kind {
            DerivativeFunctionKind::Jvp => attr.jvp.clone(),
            DerivativeFunctionKind::Vjp => attr.vjp.clone(),
        };
        let Some(name) = name else {
            continue;
        };
        let name_span = name.span.or(span);
        let expected = derivative_function_type(
            cx.resolver,
            &original_type,
            &indices,
            kind,
            signature.as_ref(),
            true,
        )
        .map_err(|err| {
            Rejected::invalid(error(codes::DERIVATIVE_TYPE_MISMATCH, err.to_string(), name_span))
        })?;
        let derivative = find_function(
            cx.module,
            &name.name,
            &original.context,
            |candidate| {
                function_signature_matches(
                    &expected,
                    &candidate.interface_type(),
                    &GenericCheck::Exact,
                )
            },
            |candidate| has_valid_context(original, candidate),
        )
        .map_err(|failure| {
            Rejected::invalid(explain(
                &failure,
                &name,
                &expected,
                LookupPurpose::Derivative,
                name_span,
            ))
        })?;
        if let Some(function) = cx.module.function(derivative) {
            check_access(original, function, &name, name_span).map_err(Rejected::invalid)?;
        }
        match kind {
            DerivativeFunctionKind::Jvp => attr.jvp_function = Some(derivative),
            DerivativeFunctionKind::Vjp => attr.vjp_function = Some(derivative),
        }
    }

    if is_storage {
        let moved = DeclAttribute {
            id: AttrId::fresh(),
            kind: AttributeKind::Differentiable(attr),
            span,
            invalid: false,
            implicit: true,
        };
        registry
            .register(original.id, &indices, RegisteredAttr { attr: moved.id, span })
            .map_err(|existing| duplicate(existing, span))?;
        return Ok(AttrOutcome::MoveToGetter {
            getter: original.id,
            attribute: moved,
        });
    }

    registry
        .register(
            decl_id,
            &indices,
            RegisteredAttr {
                attr: attribute.id,
                span,
            },
        )
        .map_err(|existing| duplicate(existing, span))?;
    Ok(AttrOutcome::Keep(DeclAttribute {
        kind: AttributeKind::Differentiable(attr),
        ..attribute.clone()
    }))
}

/// Signature the derivatives are checked in: the original's, extended by the
/// `where` clause or by requirements carried on a synthesized attribute.
fn derivative_signature(
    original: &FunctionDecl,
    attr: &mut DifferentiableAttr,
    span: Option<Span>,
) -> Result<Option<GenericSignature>, Rejected> {
    let Some(clause) = &attr.where_clause else {
        if attr.requirements.is_empty() {
            return Ok(original.generic_signature.clone());
        }
        let base = original.generic_signature.clone().unwrap_or_default();
        return Ok(Some(base.with_requirements(attr.requirements.clone())));
    };
    if clause.is_empty() {
        return Err(Rejected::invalid(error(
            codes::EMPTY_WHERE_CLAUSE,
            "empty 'where' clause in '@differentiable' attribute",
            span,
        )));
    }
    let Some(base) = original.generic_signature.as_ref() else {
        return Err(Rejected::invalid(error(
            codes::NONGENERIC_WHERE_CLAUSE,
            format!(
                "'where' clause is valid only when original function is generic '{}'",
                original.full_name()
            ),
            span,
        )));
    };
    if let Some(layout) = clause
        .iter()
        .find(|entry| entry.requirement.kind() == RequirementKind::Layout)
    {
        return Err(Rejected::invalid(error(
            codes::UNSUPPORTED_REQUIREMENT_KIND,
            "'@differentiable' attribute does not yet support layout requirements",
            layout.span.or(span),
        )));
    }
    let requirements: Vec<Requirement> =
        clause.iter().map(|entry| entry.requirement.clone()).collect();
    let signature = base.with_requirements(requirements.clone());
    attr.requirements = requirements;
    Ok(Some(signature))
}

pub(super) fn duplicate(existing: RegisteredAttr, span: Option<Span>) -> Rejected {
    let mut diagnostic = error(
        codes::DUPLICATE_ATTRIBUTE,
        "duplicate '@differentiable' attribute with same parameters",
        span,
    );
    diagnostic.add_note_at(existing.span, "other attribute declared here");
    Rejected::invalid(diagnostic)
}
