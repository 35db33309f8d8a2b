//! Derivatives of calls inside a function being differentiated.

use std::collections::HashMap;

use super::activity::Activity;
use super::context::ADContext;
use super::diagnostics::{codes, Failure, Unsupported};
use super::invoker::DifferentiationInvoker;
use super::witness::{single_result_config, WitnessKey};
use crate::autodiff::{
    derivative_function_type, DerivativeFunctionKind, DerivativeTypeError, DifferentiabilityKind,
    IndexSubset,
};
use crate::diagnostics::Span;
use crate::ir::{BlockId, Inst, InstId, InstKind, IrFunction, ValueId};
use crate::types::{FunctionType, GenericSignature, SubstitutionMap, Type};

const NONDIFFERENTIABLE_ARGUMENT: &str =
    "cannot differentiate through a non-differentiable argument; do you want to use 'withoutDerivative(at:)'?";
const NONDIFFERENTIABLE_RESULT: &str =
    "cannot differentiate through a non-differentiable result; do you want to use 'withoutDerivative(at:)'?";

/// Where the derivative of a callee comes from.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum DerivativeSource {
    /// A JVP or VJP function, referenced by name.
    Function { name: String, ty: FunctionType },
    /// Extracted from a `@differentiable` function value.
    Bundle { function: ValueId, ty: Type },
}

/// Derivative requirements of one call inside a function being
/// differentiated. Recorded per request when the call is first resolved and
/// read back when its derivative is stitched in.
#[derive(Clone, Debug, PartialEq)]
pub struct NestedApplyInfo {
    /// Callee arguments that need tangents.
    pub parameter_indices: IndexSubset,
    pub result_index: usize,
    /// Linear map type before it was reduced to the caller's context; `None`
    /// when it needed no adjustment.
    pub original_pullback_type: Option<Type>,
    pub(crate) source: DerivativeSource,
    /// Callee parameters the derivative covers, ascending.
    pub(crate) wrt: Vec<usize>,
    pub(crate) substitutions: SubstitutionMap,
    /// Type of the differential or pullback the derivative returns.
    pub(crate) linear_map: Type,
}

impl NestedApplyInfo {
    /// Position of callee parameter `index` among the covered parameters.
    pub fn position(&self, index: usize) -> Option<usize> {
        self.wrt.iter().position(|covered| *covered == index)
    }
}

pub(crate) fn type_error(error: &DerivativeTypeError, span: Option<Span>) -> Unsupported {
    match error {
        DerivativeTypeError::NonDifferentiableParameter { .. } => {
            Unsupported::new(codes::NONDIFFERENTIABLE_ARGUMENT, NONDIFFERENTIABLE_ARGUMENT, span)
        }
        DerivativeTypeError::NonDifferentiableResult { .. } => {
            Unsupported::new(codes::NONDIFFERENTIABLE_RESULT, NONDIFFERENTIABLE_RESULT, span)
        }
        DerivativeTypeError::ParameterIndexOutOfRange { .. } => {
            Unsupported::new(codes::UNSUPPORTED_INSTRUCTION, error.to_string(), span)
        }
    }
}

/// The linear map element of a `(value:, differential|pullback:)` result.
pub(crate) fn linear_map_of(result: &Type) -> Option<Type> {
    result
        .as_tuple()
        .and_then(|tuple| tuple.elements.get(1))
        .map(|element| element.ty.clone())
}

impl ADContext<'_> {
    /// Resolve the derivative of every active call on the blocks of `order`,
    /// requesting nested witnesses as needed, and record the result for
    /// `parent`. Resolving again for another derivative kind replaces the
    /// record.
    pub(crate) fn resolve_nested_calls(
        &mut self,
        original: &IrFunction,
        parent: &WitnessKey,
        activity: &Activity,
        order: &[BlockId],
        kind: DerivativeFunctionKind,
    ) -> Result<&HashMap<InstId, NestedApplyInfo>, Failure> {
        let mut calls = HashMap::new();
        for block in order.iter().filter_map(|id| original.block(*id)) {
            for inst in &block.insts {
                let active = inst.result.is_some_and(|result| activity.is_active(result));
                if active && matches!(inst.kind, InstKind::Apply { .. }) {
                    let call = self.resolve_call(original, parent, activity, inst, kind)?;
                    calls.insert(inst.id, call);
                }
            }
        }
        Ok(self.record_nested_applies(parent.clone(), calls))
    }

    fn resolve_call(
        &mut self,
        original: &IrFunction,
        parent: &WitnessKey,
        activity: &Activity,
        inst: &Inst,
        kind: DerivativeFunctionKind,
    ) -> Result<NestedApplyInfo, Failure> {
        let InstKind::Apply {
            callee,
            args,
            substitutions,
        } = &inst.kind
        else {
            return Err(Unsupported::new(
                codes::UNSUPPORTED_INSTRUCTION,
                format!("cannot differentiate through '{}'", inst.kind.name()),
                inst.span,
            )
            .into());
        };
        let needed: Vec<usize> = args
            .iter()
            .enumerate()
            .filter(|(_, arg)| activity.is_varied(**arg))
            .map(|(index, _)| index)
            .collect();
        let caller_signature = parent
            .config
            .derivative_generic_signature
            .clone()
            .or_else(|| original.ty.generic_signature.clone());

        match original.defining_inst(*callee).map(|def| &def.kind) {
            Some(InstKind::FunctionRef { name }) => self.resolve_function_callee(
                original,
                parent,
                inst,
                name,
                &needed,
                substitutions,
                caller_signature.as_ref(),
                kind,
            ),
            _ => self.resolve_bundle_callee(
                original,
                inst,
                *callee,
                &needed,
                substitutions,
                caller_signature.as_ref(),
                kind,
            ),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn resolve_function_callee(
        &mut self,
        original: &IrFunction,
        parent: &WitnessKey,
        inst: &Inst,
        name: &str,
        needed: &[usize],
        substitutions: &SubstitutionMap,
        caller_signature: Option<&GenericSignature>,
        kind: DerivativeFunctionKind,
    ) -> Result<NestedApplyInfo, Failure> {
        let Some(callee) = self.module.function(name) else {
            return Err(Unsupported::new(
                codes::UNKNOWN_FUNCTION,
                format!("function '{name}' is not defined in this module"),
                inst.span,
            )
            .into());
        };
        let callee_ty = callee.ty.clone();
        let wanted = IndexSubset::from_indices(callee_ty.params.len(), needed.iter().copied());
        let declared = callee
            .differentiable
            .iter()
            .filter(|attr| wanted.is_subset_of(&attr.config.parameter_indices))
            .min_by_key(|attr| attr.config.parameter_indices.len())
            .map(|attr| attr.config.clone());
        let config = declared
            .or_else(|| {
                self.witnesses
                    .find_minimal_superset(name, &wanted)
                    .map(|witness| witness.config.clone())
            })
            .unwrap_or_else(|| single_result_config(wanted, callee_ty.generic_signature.clone()));

        let signature = config
            .derivative_generic_signature
            .as_ref()
            .or(callee_ty.generic_signature.as_ref());
        for index in needed {
            let differentiable = callee_ty
                .params
                .get(*index)
                .is_some_and(|param| self.resolver.is_differentiable(&param.ty, signature));
            if !differentiable {
                return Err(Unsupported::new(
                    codes::NONDIFFERENTIABLE_ARGUMENT,
                    NONDIFFERENTIABLE_ARGUMENT,
                    inst.span,
                )
                .into());
            }
        }
        if !self.resolver.is_differentiable(&callee_ty.result, signature) {
            return Err(Unsupported::new(
                codes::NONDIFFERENTIABLE_RESULT,
                NONDIFFERENTIABLE_RESULT,
                inst.span,
            )
            .into());
        }
        if let Some(derivative_signature) = &config.derivative_generic_signature {
            let context = caller_signature.cloned().unwrap_or_default();
            let unmet: Vec<String> = derivative_signature
                .requirements()
                .iter()
                .map(|requirement| requirement.subst(substitutions))
                .filter(|requirement| !context.satisfies(requirement, self.resolver.env()))
                .map(|requirement| requirement.to_string())
                .collect();
            if !unmet.is_empty() {
                return Err(Unsupported::new(
                    codes::UNMET_REQUIREMENTS,
                    format!(
                        "function call is not differentiable because generic requirements are not met: '{}'",
                        unmet.join(", ")
                    ),
                    inst.span,
                )
                .into());
            }
        }

        let key = WitnessKey::new(name, config.clone());
        let invoker = DifferentiationInvoker::IndirectDifferentiation {
            caller: original.name.clone(),
            apply: inst.id,
            span: inst.span,
            parent: parent.clone(),
        };
        let witness = self
            .ensure_witness(key, invoker)
            .map_err(|reported| reported.through(inst.span))?;
        let derivative = match kind {
            DerivativeFunctionKind::Jvp => witness.jvp,
            DerivativeFunctionKind::Vjp => witness.vjp,
        };
        let derivative_ty = match self.module.function(&derivative) {
            Some(function) => function.ty.clone(),
            None => derivative_function_type(
                self.resolver,
                &callee_ty,
                &config.parameter_indices,
                kind,
                signature,
                false,
            )
            .map_err(|error| type_error(&error, inst.span))?,
        };
        let natural = linear_map_of(&derivative_ty.result.subst(substitutions)).ok_or_else(|| {
            Unsupported::new(
                codes::UNSUPPORTED_INSTRUCTION,
                format!("derivative '{derivative}' does not return a linear map"),
                inst.span,
            )
        })?;
        let linear_map = self.resolver.reduce_tangent_members(&natural, caller_signature);
        let original_pullback_type = (linear_map != natural).then_some(natural);
        Ok(NestedApplyInfo {
            parameter_indices: IndexSubset::from_indices(callee_ty.params.len(), needed.iter().copied()),
            result_index: 0,
            original_pullback_type,
            source: DerivativeSource::Function {
                name: derivative,
                ty: derivative_ty,
            },
            wrt: config.parameter_indices.indices(),
            substitutions: substitutions.clone(),
            linear_map,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn resolve_bundle_callee(
        &mut self,
        original: &IrFunction,
        inst: &Inst,
        callee: ValueId,
        needed: &[usize],
        substitutions: &SubstitutionMap,
        caller_signature: Option<&GenericSignature>,
        kind: DerivativeFunctionKind,
    ) -> Result<NestedApplyInfo, Failure> {
        let function_ty = original
            .value_type(callee)
            .and_then(Type::as_function)
            .filter(|ty| ty.differentiability.is_differentiable())
            .cloned()
            .ok_or_else(|| {
                Unsupported::new(
                    codes::OPAQUE_FUNCTION_VALUE,
                    "opaque non-'@differentiable' function is not differentiable",
                    inst.span,
                )
            })?;
        let wrt: Vec<usize> = function_ty
            .params
            .iter()
            .enumerate()
            .filter(|(_, param)| !param.no_derivative)
            .map(|(index, _)| index)
            .collect();
        if needed.iter().any(|index| !wrt.contains(index)) {
            return Err(Unsupported::new(
                codes::NONDIFFERENTIABLE_ARGUMENT,
                NONDIFFERENTIABLE_ARGUMENT,
                inst.span,
            )
            .into());
        }
        let plain = function_ty
            .clone()
            .with_differentiability(DifferentiabilityKind::NonDifferentiable);
        let indices = IndexSubset::from_indices(plain.params.len(), wrt.iter().copied());
        let derivative = derivative_function_type(
            self.resolver,
            &plain,
            &indices,
            kind,
            caller_signature,
            false,
        )
        .map_err(|error| type_error(&error, inst.span))?
        .with_generic_signature(None);
        let linear_map = linear_map_of(&derivative.result).ok_or_else(|| {
            Unsupported::new(
                codes::UNSUPPORTED_INSTRUCTION,
                "derivative does not return a linear map",
                inst.span,
            )
        })?;
        Ok(NestedApplyInfo {
            parameter_indices: IndexSubset::from_indices(plain.params.len(), needed.iter().copied()),
            result_index: 0,
            original_pullback_type: None,
            source: DerivativeSource::Bundle {
                function: callee,
                ty: Type::Function(derivative),
            },
            wrt,
            substitutions: substitutions.clone(),
            linear_map,
        })
    }
}
