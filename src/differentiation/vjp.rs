//! Reverse-mode synthesis: a VJP returning the original value plus a
//! pullback closure.

use std::collections::HashMap;

use tracing::debug;

use super::activity::{is_no_derivative_field, Activity};
use super::calls::{type_error, NestedApplyInfo};
use super::context::ADContext;
use super::diagnostics::{codes, Failure, Unsupported};
use super::primal::{
    clone_primal, generated_name, tangent_of, tangent_property, unsupported_inst, Captures,
    PrimalValues,
};
use super::witness::WitnessKey;
use crate::autodiff::{
    derivative_function_type, DerivativeFunctionKind, TangentSpaceResolver, TupleTangentLayout,
};
use crate::diagnostics::Span;
use crate::ir::{BlockId, BuiltinOp, FunctionBuilder, Inst, InstId, InstKind, IrFunction, ValueId};
use crate::types::{FunctionType, GenericSignature, Type};

/// Synthesize the VJP of `original` for `key` and its pullback. Returns
/// the VJP's name.
pub(crate) fn emit_vjp(
    ctx: &mut ADContext<'_>,
    original: &IrFunction,
    key: &WitnessKey,
    activity: &Activity,
    order: &[BlockId],
) -> Result<String, Failure> {
    let config = &key.config;
    let resolver = ctx.resolver;
    let signature = config
        .derivative_generic_signature
        .as_ref()
        .or(original.ty.generic_signature.as_ref());
    let vjp_ty = derivative_function_type(
        resolver,
        &original.ty,
        &config.parameter_indices,
        DerivativeFunctionKind::Vjp,
        signature,
        false,
    )
    .map_err(|error| type_error(&error, original.span))?;
    let calls = ctx.resolve_nested_calls(original, key, activity, order, DerivativeFunctionKind::Vjp)?;

    let vjp_name = generated_name(&original.name, "vjp", config);
    let mut vjp = FunctionBuilder::new(vjp_name.clone(), vjp_ty);
    if let Some(span) = original.span {
        vjp.with_span(span);
    }
    let primal = clone_primal(original, order, &mut vjp, calls, DerivativeFunctionKind::Vjp)?;

    let result_tangent = tangent_of(resolver, original.ty.innermost_result(), signature, original.span)?;
    let wrt_tangents = config
        .parameter_indices
        .iter()
        .map(|index| match original.ty.params.get(index) {
            Some(param) => tangent_of(resolver, &param.ty, signature, original.span),
            None => Err(Unsupported::new(
                codes::UNSUPPORTED_INSTRUCTION,
                format!("parameter index {index} is out of range"),
                original.span,
            )),
        })
        .collect::<Result<Vec<_>, _>>()?;

    let pullback_name = generated_name(&original.name, "pullback", config);
    let mut emitter = PullbackEmitter {
        original,
        resolver,
        signature,
        activity,
        primal: &primal,
        calls,
        vjp: &vjp,
        pullback: FunctionBuilder::new(
            pullback_name.clone(),
            FunctionType::new(vec![result_tangent], Type::tuple_or_single(wrt_tangents.clone())),
        ),
        captures: Captures::default(),
        adjoints: HashMap::new(),
    };
    emitter.run(order, &config.parameter_indices.indices(), &wrt_tangents)?;
    let PullbackEmitter {
        pullback, captures, ..
    } = emitter;
    let pullback = pullback.finish();
    let pullback_ty = pullback.ty.clone();
    ctx.add_generated_function(pullback);

    vjp.at(original.span);
    let value = primal
        .result
        .and_then(|result| primal.get(result))
        .ok_or_else(|| Unsupported::new(codes::MISSING_RETURN, "missing return for differentiation", original.span))?;
    let pullback_ref = vjp.function_ref(pullback_name, pullback_ty);
    let closure = vjp.partial_apply(pullback_ref, captures.values().to_vec());
    let pair = vjp.labeled_tuple(vec![("value", value), ("pullback", closure)]);
    vjp.ret(pair);
    debug!(
        target: "autodiff.transform",
        original = %original.name,
        vjp = %vjp_name,
        captures = captures.values().len(),
        "synthesized vjp"
    );
    ctx.add_generated_function(vjp.finish());
    Ok(vjp_name)
}

struct PullbackEmitter<'r, 'e> {
    original: &'r IrFunction,
    resolver: &'r TangentSpaceResolver<'e>,
    signature: Option<&'r GenericSignature>,
    activity: &'r Activity,
    primal: &'r PrimalValues,
    calls: &'r HashMap<InstId, NestedApplyInfo>,
    vjp: &'r FunctionBuilder,
    pullback: FunctionBuilder,
    captures: Captures,
    /// Accumulated adjoint of each original value.
    adjoints: HashMap<ValueId, ValueId>,
}

impl PullbackEmitter<'_, '_> {
    fn run(&mut self, order: &[BlockId], wrt: &[usize], wrt_tangents: &[Type]) -> Result<(), Failure> {
        let seed = self.pullback.param(0);
        if let Some(result) = self.primal.result {
            self.accumulate(result, seed);
        }
        for block in order.iter().rev().filter_map(|id| self.original.block(*id)) {
            for inst in block.insts.iter().rev() {
                self.pullback.at(inst.span);
                self.emit(inst)?;
            }
        }

        self.pullback.at(self.original.span);
        let mut gradients = Vec::with_capacity(wrt.len());
        for (index, tangent) in wrt.iter().zip(wrt_tangents) {
            let adjoint = self
                .original
                .params()
                .get(*index)
                .and_then(|param| self.adjoint(*param));
            gradients.push(match adjoint {
                Some(adjoint) => adjoint,
                None => self.pullback.zero(tangent.clone()),
            });
        }
        let returned = if gradients.len() == 1 {
            gradients[0]
        } else {
            self.pullback.tuple(gradients)
        };
        self.pullback.ret(returned);
        Ok(())
    }

    fn adjoint(&self, value: ValueId) -> Option<ValueId> {
        self.adjoints.get(&self.primal.canonical(value)).copied()
    }

    fn accumulate(&mut self, value: ValueId, contribution: ValueId) {
        let value = self.primal.canonical(value);
        if !self.activity.is_varied(value) {
            return;
        }
        let total = match self.adjoints.get(&value) {
            Some(existing) => self.pullback.tangent_add(*existing, contribution),
            None => contribution,
        };
        self.adjoints.insert(value, total);
    }

    /// Pullback-side parameter carrying the primal value of original `value`.
    fn capture(&mut self, value: ValueId) -> Result<ValueId, Unsupported> {
        let primal = self.primal.get(value).ok_or_else(|| {
            Unsupported::new(
                codes::UNSUPPORTED_INSTRUCTION,
                format!("use of undefined value {value}"),
                None,
            )
        })?;
        Ok(self.captures.capture(&mut self.pullback, self.vjp, primal))
    }

    fn value_type(&self, value: ValueId) -> Type {
        self.original.value_type(value).cloned().unwrap_or_else(Type::unit)
    }

    fn tangent(&self, ty: &Type, span: Option<Span>) -> Result<Type, Unsupported> {
        tangent_of(self.resolver, ty, self.signature, span)
    }

    fn emit(&mut self, inst: &Inst) -> Result<(), Failure> {
        let Some(result) = inst.result else {
            return Ok(());
        };
        if !self.activity.is_active(result) {
            return Ok(());
        }
        let Some(seed) = self.adjoint(result) else {
            return Ok(());
        };
        match &inst.kind {
            InstKind::Builtin { op, args } => self.emit_builtin(inst, *op, args, result, seed)?,
            InstKind::Tuple { elements } => {
                let Some(tuple) = self.value_type(result).as_tuple().cloned() else {
                    return Err(unsupported_inst(inst).into());
                };
                let layout = TupleTangentLayout::of(&tuple, self.resolver, self.signature);
                for (element, position) in elements.iter().zip(&layout.positions) {
                    let Some(position) = position else { continue };
                    if !self.activity.is_varied(*element) {
                        continue;
                    }
                    let contribution = if layout.is_unwrapped() {
                        seed
                    } else {
                        self.pullback.tuple_extract(seed, *position)
                    };
                    self.accumulate(*element, contribution);
                }
            }
            InstKind::TupleExtract { tuple, index } => {
                let tuple_ty = self.value_type(*tuple);
                let Some(elements) = tuple_ty.as_tuple() else {
                    return Err(unsupported_inst(inst).into());
                };
                let layout = TupleTangentLayout::of(elements, self.resolver, self.signature);
                let Some(Some(position)) = layout.positions.get(*index).copied() else {
                    return Ok(());
                };
                let contribution = if layout.is_unwrapped() {
                    seed
                } else {
                    let tangent = self.tangent(&tuple_ty, inst.span)?;
                    let element_types: Vec<Type> = tangent
                        .as_tuple()
                        .map(|tuple| tuple.elements.iter().map(|element| element.ty.clone()).collect())
                        .unwrap_or_default();
                    let mut parts = Vec::with_capacity(element_types.len());
                    for (slot, ty) in element_types.into_iter().enumerate() {
                        parts.push(if slot == position {
                            seed
                        } else {
                            self.pullback.zero(ty)
                        });
                    }
                    self.pullback.tuple(parts)
                };
                self.accumulate(*tuple, contribution);
            }
            InstKind::Struct { fields } => {
                let struct_ty = self.value_type(result);
                let tangent = self.tangent(&struct_ty, inst.span)?;
                for (name, value) in fields {
                    if !self.activity.is_varied(*value)
                        || is_no_derivative_field(self.resolver.env(), &struct_ty, name)
                    {
                        continue;
                    }
                    let field_ty = tangent_property(self.resolver.env(), &tangent, name, inst.span)?;
                    let contribution = self.pullback.struct_extract(seed, name.clone(), field_ty);
                    self.accumulate(*value, contribution);
                }
            }
            InstKind::StructExtract { value, field } => {
                let struct_ty = self.value_type(*value);
                if is_no_derivative_field(self.resolver.env(), &struct_ty, field) {
                    return Ok(());
                }
                let tangent = self.tangent(&struct_ty, inst.span)?;
                tangent_property(self.resolver.env(), &tangent, field, inst.span)?;
                let properties = self.resolver.env().stored_properties(&tangent).unwrap_or_default();
                let mut parts = Vec::with_capacity(properties.len());
                for property in properties {
                    let part = if property.name == *field {
                        seed
                    } else {
                        self.pullback.zero(property.ty)
                    };
                    parts.push((property.name, part));
                }
                let contribution = self.pullback.struct_value(tangent, parts);
                self.accumulate(*value, contribution);
            }
            InstKind::Apply { args, .. } => {
                let (Some(call), Some(closure)) = (self.calls.get(&inst.id), self.primal.linear_map(inst.id)) else {
                    return Err(unsupported_inst(inst).into());
                };
                let closure = self.captures.capture(&mut self.pullback, self.vjp, closure);
                let gradients = self.pullback.apply(closure, vec![seed]);
                for (index, arg) in args.iter().enumerate() {
                    if !self.activity.is_varied(*arg) {
                        continue;
                    }
                    let Some(position) = call.position(index) else { continue };
                    let contribution = if call.wrt.len() == 1 {
                        gradients
                    } else {
                        self.pullback.tuple_extract(gradients, position)
                    };
                    self.accumulate(*arg, contribution);
                }
            }
            _ => return Err(unsupported_inst(inst).into()),
        }
        Ok(())
    }

    fn emit_builtin(
        &mut self,
        inst: &Inst,
        op: BuiltinOp,
        args: &[ValueId],
        result: ValueId,
        seed: ValueId,
    ) -> Result<(), Unsupported> {
        let (Some(&x), y) = (args.first(), args.get(1).copied()) else {
            return Err(unsupported_inst(inst));
        };
        let x_varied = self.activity.is_varied(x);
        let y_varied = y.is_some_and(|y| self.activity.is_varied(y));
        match (op, y) {
            (BuiltinOp::FAdd, Some(y)) => {
                self.accumulate(x, seed);
                self.accumulate(y, seed);
            }
            (BuiltinOp::FSub, Some(y)) => {
                self.accumulate(x, seed);
                if y_varied {
                    let negated = self.pullback.builtin(BuiltinOp::FNeg, vec![seed]);
                    self.accumulate(y, negated);
                }
            }
            (BuiltinOp::FNeg, _) => {
                let negated = self.pullback.builtin(BuiltinOp::FNeg, vec![seed]);
                self.accumulate(x, negated);
            }
            (BuiltinOp::FMul, Some(y)) => {
                if x_varied {
                    let other = self.capture(y)?;
                    let product = self.pullback.builtin(BuiltinOp::FMul, vec![seed, other]);
                    self.accumulate(x, product);
                }
                if y_varied {
                    let other = self.capture(x)?;
                    let product = self.pullback.builtin(BuiltinOp::FMul, vec![seed, other]);
                    self.accumulate(y, product);
                }
            }
            (BuiltinOp::FDiv, Some(y)) => {
                if x_varied {
                    let divisor = self.capture(y)?;
                    let quotient = self.pullback.builtin(BuiltinOp::FDiv, vec![seed, divisor]);
                    self.accumulate(x, quotient);
                }
                if y_varied {
                    // d(x / y)/dy = -(x / y) / y
                    let ratio = self.capture(result)?;
                    let divisor = self.capture(y)?;
                    let scaled = self.pullback.builtin(BuiltinOp::FMul, vec![seed, ratio]);
                    let quotient = self.pullback.builtin(BuiltinOp::FDiv, vec![scaled, divisor]);
                    let negated = self.pullback.builtin(BuiltinOp::FNeg, vec![quotient]);
                    self.accumulate(y, negated);
                }
            }
            (BuiltinOp::Sin, _) => {
                let input = self.capture(x)?;
                let cos = self.pullback.builtin(BuiltinOp::Cos, vec![input]);
                let product = self.pullback.builtin(BuiltinOp::FMul, vec![seed, cos]);
                self.accumulate(x, product);
            }
            (BuiltinOp::Cos, _) => {
                let input = self.capture(x)?;
                let sin = self.pullback.builtin(BuiltinOp::Sin, vec![input]);
                let product = self.pullback.builtin(BuiltinOp::FMul, vec![seed, sin]);
                let negated = self.pullback.builtin(BuiltinOp::FNeg, vec![product]);
                self.accumulate(x, negated);
            }
            (BuiltinOp::Exp, _) => {
                let output = self.capture(result)?;
                let product = self.pullback.builtin(BuiltinOp::FMul, vec![seed, output]);
                self.accumulate(x, product);
            }
            (BuiltinOp::Log, _) => {
                let input = self.capture(x)?;
                let quotient = self.pullback.builtin(BuiltinOp::FDiv, vec![seed, input]);
                self.accumulate(x, quotient);
            }
            _ => return Err(unsupported_inst(inst)),
        }
        Ok(())
    }
}
