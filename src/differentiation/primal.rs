//! Re-emission of the original computation inside a JVP or VJP.
//!
//! The straight-line chain of blocks is flattened into the derivative's
//! entry block: block arguments alias the branch operands that feed them.

use std::collections::HashMap;

use super::calls::{DerivativeSource, NestedApplyInfo};
use super::diagnostics::{codes, Unsupported};
use crate::autodiff::{AutoDiffConfig, DerivativeFunctionKind, TangentSpaceResolver};
use crate::diagnostics::Span;
use crate::ir::{
    BlockId, Extractee, FunctionBuilder, Inst, InstId, InstKind, IrFunction, Terminator, ValueId,
};
use crate::types::{ConformanceLookup, GenericSignature, Type};

/// Original values as recomputed in the derivative function.
#[derive(Debug, Default)]
pub(crate) struct PrimalValues {
    map: HashMap<ValueId, ValueId>,
    /// Block argument to the branch operand that supplies it.
    aliases: HashMap<ValueId, ValueId>,
    /// Linear map closures returned by nested derivative calls.
    linear_maps: HashMap<InstId, ValueId>,
    /// Original returned value.
    pub result: Option<ValueId>,
}

impl PrimalValues {
    /// The derivative-side copy of original `value`.
    pub fn get(&self, value: ValueId) -> Option<ValueId> {
        self.map.get(&self.canonical(value)).copied()
    }

    /// Follow block-argument aliases back to the defining value.
    pub fn canonical(&self, mut value: ValueId) -> ValueId {
        for _ in 0..=self.aliases.len() {
            match self.aliases.get(&value) {
                Some(next) => value = *next,
                None => break,
            }
        }
        value
    }

    pub fn linear_map(&self, apply: InstId) -> Option<ValueId> {
        self.linear_maps.get(&apply).copied()
    }
}

fn undefined(value: ValueId) -> Unsupported {
    Unsupported::new(
        codes::UNSUPPORTED_INSTRUCTION,
        format!("use of undefined value {value}"),
        None,
    )
}

/// Clone the blocks of `order` from `original` into `builder`, whose entry
/// arguments must match the original parameters. Calls listed in `calls`
/// go through their derivatives instead.
pub(crate) fn clone_primal(
    original: &IrFunction,
    order: &[BlockId],
    builder: &mut FunctionBuilder,
    calls: &HashMap<InstId, NestedApplyInfo>,
    kind: DerivativeFunctionKind,
) -> Result<PrimalValues, Unsupported> {
    let mut primal = PrimalValues::default();
    for (param, arg) in original.params().iter().zip(builder.params()) {
        primal.map.insert(*param, arg);
    }

    for block in order.iter().filter_map(|id| original.block(*id)) {
        for inst in &block.insts {
            builder.at(inst.span);
            let mut missing = None;
            let mut kind_copy = inst.kind.clone();
            kind_copy.map_operands(|operand| match primal.get(operand) {
                Some(mapped) => mapped,
                None => {
                    missing.get_or_insert(operand);
                    operand
                }
            });
            if let Some(value) = missing {
                return Err(undefined(value));
            }

            if let Some(call) = calls.get(&inst.id) {
                let InstKind::Apply { args, .. } = kind_copy else {
                    return Err(unsupported_inst(inst));
                };
                let callee = match &call.source {
                    DerivativeSource::Function { name, ty } => builder.function_ref(name.clone(), ty.clone()),
                    DerivativeSource::Bundle { function, ty } => {
                        let bundle = primal.get(*function).ok_or_else(|| undefined(*function))?;
                        let extractee = match kind {
                            DerivativeFunctionKind::Jvp => Extractee::Jvp,
                            DerivativeFunctionKind::Vjp => Extractee::Vjp,
                        };
                        builder.differentiable_function_extract(bundle, extractee, Some(ty.clone()))
                    }
                };
                let value_ty = inst
                    .result
                    .and_then(|result| original.value_type(result).cloned())
                    .unwrap_or_else(Type::unit);
                let pair_ty = Type::labeled_tuple(vec![
                    ("value", value_ty),
                    (kind.linear_map_kind().label(), call.linear_map.clone()),
                ]);
                let apply = InstKind::Apply {
                    callee,
                    args,
                    substitutions: call.substitutions.clone(),
                };
                let Some(pair) = builder.append(apply, Some((pair_ty, false))) else {
                    return Err(unsupported_inst(inst));
                };
                let value = builder.tuple_extract(pair, 0);
                let linear_map = builder.tuple_extract(pair, 1);
                if let Some(result) = inst.result {
                    primal.map.insert(result, value);
                }
                primal.linear_maps.insert(inst.id, linear_map);
                continue;
            }

            let result = inst
                .result
                .and_then(|result| original.value(result).map(|info| (result, info)));
            let emitted = builder.append(
                kind_copy,
                result.map(|(_, info)| (info.ty.clone(), info.is_address)),
            );
            if let (Some((result, _)), Some(emitted)) = (result, emitted) {
                primal.map.insert(result, emitted);
            }
        }

        builder.at(block.terminator_span);
        match &block.terminator {
            Some(Terminator::Return(value)) => primal.result = Some(*value),
            Some(Terminator::Branch { target, args }) => {
                let params = original.block(*target).map(|block| block.args.clone()).unwrap_or_default();
                for (param, arg) in params.into_iter().zip(args) {
                    primal.aliases.insert(param, *arg);
                }
            }
            _ => {
                return Err(Unsupported::new(
                    codes::CONTROL_FLOW_UNSUPPORTED,
                    "differentiating control flow is not yet supported",
                    block.terminator_span,
                ));
            }
        }
    }
    if primal.result.is_none() {
        return Err(Unsupported::new(
            codes::MISSING_RETURN,
            "missing return for differentiation",
            original.span,
        ));
    }
    Ok(primal)
}

/// Primal values a linear map closes over, in parameter order.
#[derive(Debug, Default)]
pub(crate) struct Captures {
    slots: HashMap<ValueId, ValueId>,
    values: Vec<ValueId>,
}

impl Captures {
    /// The linear map's parameter holding derivative-side `value`, added on
    /// first use.
    pub fn capture(
        &mut self,
        linear: &mut FunctionBuilder,
        derivative: &FunctionBuilder,
        value: ValueId,
    ) -> ValueId {
        if let Some(slot) = self.slots.get(&value) {
            return *slot;
        }
        let slot = linear.add_param(derivative.value_type(value));
        self.slots.insert(value, slot);
        self.values.push(value);
        slot
    }

    pub fn values(&self) -> &[ValueId] {
        &self.values
    }
}

/// Name of a function generated for `original`, such as
/// `AD__f__vjp_src_0_wrt_0`.
pub(crate) fn generated_name(original: &str, role: &str, config: &AutoDiffConfig) -> String {
    format!("AD__{original}__{role}_{}", config.mangled_suffix())
}

pub(crate) fn tangent_of(
    resolver: &TangentSpaceResolver<'_>,
    ty: &Type,
    signature: Option<&GenericSignature>,
    span: Option<Span>,
) -> Result<Type, Unsupported> {
    resolver.tangent_type(ty, signature).ok_or_else(|| {
        Unsupported::new(
            codes::UNSUPPORTED_INSTRUCTION,
            format!("type '{ty}' has no tangent space"),
            span,
        )
    })
}

/// Type of property `field` on `tangent`, the tangent of some struct.
pub(crate) fn tangent_property(
    env: &dyn ConformanceLookup,
    tangent: &Type,
    field: &str,
    span: Option<Span>,
) -> Result<Type, Unsupported> {
    env.stored_properties(tangent)
        .and_then(|properties| {
            properties
                .into_iter()
                .find(|property| property.name == field)
                .map(|property| property.ty)
        })
        .ok_or_else(|| {
            Unsupported::new(
                codes::NO_TANGENT_PROPERTY,
                format!("property '{field}' has no corresponding property in tangent type '{tangent}'"),
                span,
            )
        })
}

pub(crate) fn unsupported_inst(inst: &Inst) -> Unsupported {
    Unsupported::new(
        codes::UNSUPPORTED_INSTRUCTION,
        format!("differentiating '{}' is not supported", inst.kind.name()),
        inst.span,
    )
}
