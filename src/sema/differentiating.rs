//! Validation of `@differentiating` attributes, which register a function as
//! the JVP or VJP of another.

use crate::autodiff::{linear_map_type, with_innermost_result, DerivativeFunctionKind, LinearMapKind};
use crate::decls::{AttributeKind, DeclAttribute, DeclId, DifferentiableAttr, DifferentiatingAttr};
use crate::types::{GenericSignature, Type};

use super::diagnostics::{codes, error};
use super::differentiable::duplicate;
use super::lookup::{
    explain, find_function, function_signature_matches, has_valid_context, GenericCheck,
    LookupFailure, LookupPurpose,
};
use super::params::{check_parameters, resolve_parameters};
use super::registry::{DifferentiableAttrRegistry, RegisteredAttr};
use super::{AttrOutcome, OriginalChange, Rejected, SemaContext};

const RESULT_SHAPE: &str = "'@differentiating' attribute requires function to return a \
     two-element tuple of type '(value: T..., pullback: (U.TangentVector) -> \
     T.TangentVector...)' or '(value: T..., differential: (T.TangentVector...) -> \
     U.TangentVector)'";

pub(crate) fn check_differentiating(
    cx: &SemaContext<'_>,
    decl_id: DeclId,
    attribute: &DeclAttribute,
    attr: &DifferentiatingAttr,
    registry: &mut DifferentiableAttrRegistry,
) -> Result<AttrOutcome, Rejected> {
    let span = attribute.span;
    let Some(derivative) = cx.module.function(decl_id) else {
        return Err(Rejected::remove(error(
            codes::INVALID_DECL_ATTRIBUTE,
            "'@differentiating' attribute cannot be applied to this declaration",
            span,
        )));
    };

    let Some([value, linear_map]) = derivative
        .result
        .as_tuple()
        .and_then(|tuple| <&[_; 2]>::try_from(tuple.elements.as_slice()).ok())
    else {
        return Err(Rejected::invalid(error(
            codes::EXPECTED_RESULT_TUPLE,
            RESULT_SHAPE,
            span,
        )));
    };
    if value.label.as_deref() != Some("value") {
        return Err(Rejected::invalid(error(
            codes::INVALID_VALUE_LABEL,
            "'@differentiating' attribute requires function to return a two-element tuple \
             (first element must have label 'value:')",
            span,
        )));
    }
    let Some(linear_map_kind) = linear_map.label.as_deref().and_then(LinearMapKind::from_label)
    else {
        return Err(Rejected::invalid(error(
            codes::INVALID_LINEAR_MAP_LABEL,
            "'@differentiating' attribute requires function to return a two-element tuple \
             (second element must have label 'pullback:' or 'differential:')",
            span,
        )));
    };
    let derivative_signature = derivative.generic_signature.as_ref();
    if !cx.conforms_to_differentiable(&value.ty, derivative_signature) {
        return Err(Rejected::invalid(error(
            codes::VALUE_NOT_DIFFERENTIABLE,
            format!(
                "'@differentiating' attribute requires function to return a two-element tuple \
                 (first element type '{}' must conform to 'Differentiable')",
                value.ty
            ),
            span,
        )));
    }

    let expected_original = with_innermost_result(&derivative.interface_type(), value.ty.clone());
    let env = cx.env;
    let satisfied = |source: Option<&GenericSignature>, target: Option<&GenericSignature>| {
        match (source, target) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(source), Some(target)) => target.is_satisfied_by(source, env),
        }
    };
    let name_span = attr.original.span.or(span);
    let original_id = find_function(
        cx.module,
        &attr.original.name,
        &derivative.context,
        |candidate| {
            function_signature_matches(
                &expected_original,
                &candidate.interface_type(),
                &GenericCheck::Satisfied(&satisfied),
            )
        },
        |candidate| has_valid_context(derivative, candidate),
    )
    .map_err(|failure| {
        Rejected::invalid(explain(
            &failure,
            &attr.original,
            &expected_original,
            LookupPurpose::Original,
            name_span,
        ))
    })?;
    let Some(original) = cx.module.function(original_id) else {
        return Err(Rejected::invalid(explain(
            &LookupFailure::NotFunction,
            &attr.original,
            &expected_original,
            LookupPurpose::Original,
            name_span,
        )));
    };

    if original.file != derivative.file {
        return Err(Rejected::remove(error(
            codes::NOT_IN_SAME_FILE,
            "derivative not in the same file as the original function",
            span,
        )));
    }

    let resolved =
        resolve_parameters(cx, derivative, &attr.parsed_params, derivative_signature, span)
            .map_err(Rejected::invalid)?;
    check_parameters(cx, original, &resolved, derivative_signature, span)
        .map_err(Rejected::invalid)?;
    let indices = resolved.indices;

    let expected_map = linear_map_type(
        cx.resolver,
        &original.interface_type(),
        &indices,
        linear_map_kind,
        derivative_signature,
        true,
    )
    .map_err(|err| {
        Rejected::invalid(error(codes::LINEAR_MAP_TYPE_MISMATCH, err.to_string(), span))
    })?;
    let expected_map = Type::Function(expected_map);
    if !linear_map.ty.matches_ignoring_labels(&expected_map) {
        let label = linear_map_kind.label();
        let mut diagnostic = error(
            codes::LINEAR_MAP_TYPE_MISMATCH,
            format!(
                "function result's '{label}' type does not match '{}'",
                original.full_name()
            ),
            span,
        );
        diagnostic.add_note(format!("'{label}' does not have expected type '{expected_map}'"));
        diagnostic.add_note_at(original.span, format!("'{}' defined here", original.full_name()));
        return Err(Rejected::invalid(diagnostic));
    }

    let kind = DerivativeFunctionKind::from(linear_map_kind);
    let updated = DeclAttribute {
        kind: AttributeKind::Differentiating(DifferentiatingAttr {
            original_function: Some(original_id),
            parameter_indices: Some(indices.clone()),
            ..attr.clone()
        }),
        ..attribute.clone()
    };

    let existing = original.attributes.iter().find(|candidate| {
        !candidate.invalid
            && candidate
                .as_differentiable()
                .is_some_and(|existing| existing.parameter_indices.as_ref() == Some(&indices))
    });
    if let Some(existing) = existing {
        let registered = existing.as_differentiable().is_some_and(|existing| match kind {
            DerivativeFunctionKind::Jvp => {
                existing.jvp.is_some()
                    || existing.jvp_function.is_some_and(|function| function != decl_id)
            }
            DerivativeFunctionKind::Vjp => {
                existing.vjp.is_some()
                    || existing.vjp_function.is_some_and(|function| function != decl_id)
            }
        });
        if registered {
            let mut diagnostic = error(
                codes::ORIGINAL_HAS_DERIVATIVE,
                format!(
                    "original function '{}' already has a derivative of kind '{kind}'",
                    original.full_name()
                ),
                span,
            );
            diagnostic.add_note_at(existing.span, "other attribute declared here");
            return Err(Rejected::remove(diagnostic));
        }
        return Ok(AttrOutcome::Register {
            updated,
            original: original_id,
            change: OriginalChange::Update {
                attr: existing.id,
                kind,
                derivative: decl_id,
            },
        });
    }

    let requirements = derivative_signature
        .map(|signature| signature.unsatisfied_in(original.generic_signature.as_ref(), cx.env))
        .unwrap_or_default();
    let mut created = DifferentiableAttr::new().with_parameter_indices(indices.clone());
    created.linear = attr.linear;
    if !requirements.is_empty() {
        created.derivative_generic_signature = derivative_signature.cloned();
    }
    created.requirements = requirements;
    match kind {
        DerivativeFunctionKind::Jvp => created.jvp_function = Some(decl_id),
        DerivativeFunctionKind::Vjp => created.vjp_function = Some(decl_id),
    }
    let mut created = DeclAttribute::differentiable(created).implicit();
    created.span = span;
    registry
        .register(
            original_id,
            &indices,
            RegisteredAttr {
                attr: created.id,
                span,
            },
        )
        .map_err(|existing| duplicate(existing, span))?;
    Ok(AttrOutcome::Register {
        updated,
        original: original_id,
        change: OriginalChange::Create(created),
    })
}
