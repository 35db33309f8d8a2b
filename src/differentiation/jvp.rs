//! Forward-mode synthesis: a JVP returning the original value plus a
//! differential closure.

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

fn jvp_type(
    ctx: &ADContext<'_>,
    original: &IrFunction,
    key: &WitnessKey,
) -> Result<FunctionType, Unsupported> {
    let config = &key.config;
    let signature = config
        .derivative_generic_signature
        .as_ref()
        .or(original.ty.generic_signature.as_ref());
    derivative_function_type(
        ctx.resolver,
        &original.ty,
        &config.parameter_indices,
        DerivativeFunctionKind::Jvp,
        signature,
        false,
    )
    .map_err(|error| type_error(&error, original.span))
}

/// A correctly typed JVP whose body traps, used while forward mode is
/// disabled.
pub(crate) fn emit_jvp_stub(
    ctx: &mut ADContext<'_>,
    original: &IrFunction,
    key: &WitnessKey,
) -> Result<String, Failure> {
    let name = generated_name(&original.name, "jvp", &key.config);
    let mut jvp = FunctionBuilder::new(name.clone(), jvp_type(ctx, original, key)?);
    if let Some(span) = original.span {
        jvp.with_span(span);
    }
    jvp.at(original.span);
    jvp.trap();
    jvp.unreachable();
    ctx.add_generated_function(jvp.finish());
    Ok(name)
}

/// Synthesize the JVP of `original` for `key` and its differential.
/// Returns the JVP's name.
pub(crate) fn emit_jvp(
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
    let jvp_ty = jvp_type(ctx, original, key)?;
    let calls = ctx.resolve_nested_calls(original, key, activity, order, DerivativeFunctionKind::Jvp)?;

    let jvp_name = generated_name(&original.name, "jvp", config);
    let mut jvp = FunctionBuilder::new(jvp_name.clone(), jvp_ty);
    if let Some(span) = original.span {
        jvp.with_span(span);
    }
    let primal = clone_primal(original, order, &mut jvp, calls, DerivativeFunctionKind::Jvp)?;

    let result_tangent = tangent_of(resolver, original.ty.innermost_result(), signature, original.span)?;
    let wrt = config.parameter_indices.indices();
    let mut wrt_tangents = Vec::with_capacity(wrt.len());
    for index in &wrt {
        let param = original.ty.params.get(*index).ok_or_else(|| {
            Unsupported::new(
                codes::UNSUPPORTED_INSTRUCTION,
                format!("parameter index {index} is out of range"),
                original.span,
            )
        })?;
        wrt_tangents.push(tangent_of(resolver, &param.ty, signature, original.span)?);
    }

    let differential_name = generated_name(&original.name, "differential", config);
    let mut emitter = DifferentialEmitter {
        original,
        resolver,
        signature,
        activity,
        primal: &primal,
        calls,
        jvp: &jvp,
        differential: FunctionBuilder::new(
            differential_name.clone(),
            FunctionType::new(wrt_tangents, result_tangent.clone()),
        ),
        captures: Captures::default(),
        tangents: HashMap::new(),
    };
    emitter.run(order, &wrt, &result_tangent)?;
    let DifferentialEmitter {
        differential,
        captures,
        ..
    } = emitter;
    let differential = differential.finish();
    let differential_ty = differential.ty.clone();
    ctx.add_generated_function(differential);

    jvp.at(original.span);
    let value = primal
        .result
        .and_then(|result| primal.get(result))
        .ok_or_else(|| Unsupported::new(codes::MISSING_RETURN, "missing return for differentiation", original.span))?;
    let differential_ref = jvp.function_ref(differential_name, differential_ty);
    let closure = jvp.partial_apply(differential_ref, captures.values().to_vec());
    let pair = jvp.labeled_tuple(vec![("value", value), ("differential", closure)]);
    jvp.ret(pair);
    debug!(
        target: "autodiff.transform",
        original = %original.name,
        jvp = %jvp_name,
        captures = captures.values().len(),
        "synthesized jvp"
    );
    ctx.add_generated_function(jvp.finish());
    Ok(jvp_name)
}

struct DifferentialEmitter<'r, 'e> {
    original: &'r IrFunction,
    resolver: &'r TangentSpaceResolver<'e>,
    signature: Option<&'r GenericSignature>,
    activity: &'r Activity,
    primal: &'r PrimalValues,
    calls: &'r HashMap<InstId, NestedApplyInfo>,
    jvp: &'r FunctionBuilder,
    differential: FunctionBuilder,
    captures: Captures,
    /// Tangent of each active original value.
    tangents: HashMap<ValueId, ValueId>,
}

impl DifferentialEmitter<'_, '_> {
    fn run(&mut self, order: &[BlockId], wrt: &[usize], result_tangent: &Type) -> Result<(), Failure> {
        for (position, index) in wrt.iter().enumerate() {
            let Some(param) = self.original.params().get(*index).copied() else { continue };
            if self.activity.is_varied(param) {
                let seed = self.differential.param(position);
                self.tangents.insert(param, seed);
            }
        }
        for block in order.iter().filter_map(|id| self.original.block(*id)) {
            for inst in &block.insts {
                self.differential.at(inst.span);
                self.emit(inst)?;
            }
        }
        self.differential.at(self.original.span);
        let returned = match self.primal.result.and_then(|result| self.tangent(result)) {
            Some(tangent) => tangent,
            None => self.differential.zero(result_tangent.clone()),
        };
        self.differential.ret(returned);
        Ok(())
    }

    fn tangent(&self, value: ValueId) -> Option<ValueId> {
        self.tangents.get(&self.primal.canonical(value)).copied()
    }

    /// Tangent of `value`, or zero when it does not vary.
    fn tangent_or_zero(&mut self, value: ValueId, span: Option<Span>) -> Result<ValueId, Unsupported> {
        if let Some(tangent) = self.tangent(value) {
            return Ok(tangent);
        }
        let ty = self.value_type(value);
        let tangent = self.tangent_type(&ty, span)?;
        Ok(self.differential.zero(tangent))
    }

    fn capture(&mut self, value: ValueId) -> Result<ValueId, Unsupported> {
        let primal = self.primal.get(value).ok_or_else(|| {
            Unsupported::new(
                codes::UNSUPPORTED_INSTRUCTION,
                format!("use of undefined value {value}"),
                None,
            )
        })?;
        Ok(self.captures.capture(&mut self.differential, self.jvp, primal))
    }

    fn value_type(&self, value: ValueId) -> Type {
        self.original.value_type(value).cloned().unwrap_or_else(Type::unit)
    }

    fn tangent_type(&self, ty: &Type, span: Option<Span>) -> Result<Type, Unsupported> {
        tangent_of(self.resolver, ty, self.signature, span)
    }

    fn emit(&mut self, inst: &Inst) -> Result<(), Failure> {
        let Some(result) = inst.result else {
            return Ok(());
        };
        if !self.activity.is_active(result) {
            return Ok(());
        }
        let tangent = match &inst.kind {
            InstKind::Builtin { op, args } => self.emit_builtin(inst, *op, args, result)?,
            InstKind::Tuple { elements } => {
                let Some(tuple) = self.value_type(result).as_tuple().cloned() else {
                    return Err(unsupported_inst(inst).into());
                };
                let layout = TupleTangentLayout::of(&tuple, self.resolver, self.signature);
                let mut parts = Vec::with_capacity(layout.tangent_count);
                for (element, position) in elements.iter().zip(&layout.positions) {
                    if position.is_some() {
                        parts.push(self.tangent_or_zero(*element, inst.span)?);
                    }
                }
                if parts.len() == 1 {
                    Some(parts[0])
                } else {
                    Some(self.differential.tuple(parts))
                }
            }
            InstKind::TupleExtract { tuple, index } => {
                let Some(elements) = self.value_type(*tuple).as_tuple().cloned() else {
                    return Err(unsupported_inst(inst).into());
                };
                let layout = TupleTangentLayout::of(&elements, self.resolver, self.signature);
                match (layout.positions.get(*index).copied().flatten(), self.tangent(*tuple)) {
                    (Some(_), Some(whole)) if layout.is_unwrapped() => Some(whole),
                    (Some(position), Some(whole)) => Some(self.differential.tuple_extract(whole, position)),
                    _ => None,
                }
            }
            InstKind::Struct { fields } => {
                let struct_ty = self.value_type(result);
                let tangent_ty = self.tangent_type(&struct_ty, inst.span)?;
                let env = self.resolver.env();
                for (name, value) in fields {
                    if self.activity.is_varied(*value) && !is_no_derivative_field(env, &struct_ty, name) {
                        tangent_property(env, &tangent_ty, name, inst.span)?;
                    }
                }
                let properties = env.stored_properties(&tangent_ty).unwrap_or_default();
                let mut parts = Vec::with_capacity(properties.len());
                for property in properties {
                    let source = fields
                        .iter()
                        .find(|(name, _)| *name == property.name)
                        .filter(|(name, _)| !is_no_derivative_field(env, &struct_ty, name))
                        .and_then(|(_, value)| self.tangent(*value));
                    let part = match source {
                        Some(tangent) => tangent,
                        None => self.differential.zero(property.ty),
                    };
                    parts.push((property.name, part));
                }
                Some(self.differential.struct_value(tangent_ty, parts))
            }
            InstKind::StructExtract { value, field } => {
                let struct_ty = self.value_type(*value);
                if is_no_derivative_field(self.resolver.env(), &struct_ty, field) {
                    return Ok(());
                }
                let tangent_ty = self.tangent_type(&struct_ty, inst.span)?;
                let field_ty = tangent_property(self.resolver.env(), &tangent_ty, field, inst.span)?;
                self.tangent(*value)
                    .map(|whole| self.differential.struct_extract(whole, field.clone(), field_ty))
            }
            InstKind::Apply { args, .. } => {
                let (Some(call), Some(closure)) = (self.calls.get(&inst.id), self.primal.linear_map(inst.id)) else {
                    return Err(unsupported_inst(inst).into());
                };
                let wrt = call.wrt.clone();
                let closure = self.captures.capture(&mut self.differential, self.jvp, closure);
                let mut inputs = Vec::with_capacity(wrt.len());
                for index in wrt {
                    let Some(arg) = args.get(index) else {
                        return Err(unsupported_inst(inst).into());
                    };
                    inputs.push(self.tangent_or_zero(*arg, inst.span)?);
                }
                Some(self.differential.apply(closure, inputs))
            }
            _ => return Err(unsupported_inst(inst).into()),
        };
        if let Some(tangent) = tangent {
            self.tangents.insert(result, tangent);
        }
        Ok(())
    }

    fn emit_builtin(
        &mut self,
        inst: &Inst,
        op: BuiltinOp,
        args: &[ValueId],
        result: ValueId,
    ) -> Result<Option<ValueId>, Unsupported> {
        let (Some(&x), y) = (args.first(), args.get(1).copied()) else {
            return Err(unsupported_inst(inst));
        };
        let dx = self.tangent(x);
        let dy = y.and_then(|y| self.tangent(y));
        let tangent = match (op, y) {
            (BuiltinOp::FAdd, Some(_)) => self.combine(dx, dy, BuiltinOp::FAdd),
            (BuiltinOp::FSub, Some(_)) => match (dx, dy) {
                (_, None) => dx,
                (None, Some(dy)) => Some(self.differential.builtin(BuiltinOp::FNeg, vec![dy])),
                (Some(dx), Some(dy)) => Some(self.differential.builtin(BuiltinOp::FSub, vec![dx, dy])),
            },
            (BuiltinOp::FNeg, _) => dx.map(|dx| self.differential.builtin(BuiltinOp::FNeg, vec![dx])),
            (BuiltinOp::FMul, Some(y)) => {
                let left = match dx {
                    Some(dx) => {
                        let factor = self.capture(y)?;
                        Some(self.differential.builtin(BuiltinOp::FMul, vec![dx, factor]))
                    }
                    None => None,
                };
                let right = match dy {
                    Some(dy) => {
                        let factor = self.capture(x)?;
                        Some(self.differential.builtin(BuiltinOp::FMul, vec![factor, dy]))
                    }
                    None => None,
                };
                self.combine(left, right, BuiltinOp::FAdd)
            }
            (BuiltinOp::FDiv, Some(y)) => {
                // d(x / y) = (dx - (x / y) * dy) / y
                let scaled = match dy {
                    Some(dy) => {
                        let ratio = self.capture(result)?;
                        Some(self.differential.builtin(BuiltinOp::FMul, vec![ratio, dy]))
                    }
                    None => None,
                };
                let numerator = match (dx, scaled) {
                    (numerator, None) => numerator,
                    (None, Some(scaled)) => Some(self.differential.builtin(BuiltinOp::FNeg, vec![scaled])),
                    (Some(dx), Some(scaled)) => {
                        Some(self.differential.builtin(BuiltinOp::FSub, vec![dx, scaled]))
                    }
                };
                match numerator {
                    Some(numerator) => {
                        let divisor = self.capture(y)?;
                        Some(self.differential.builtin(BuiltinOp::FDiv, vec![numerator, divisor]))
                    }
                    None => None,
                }
            }
            (BuiltinOp::Sin | BuiltinOp::Cos | BuiltinOp::Log, _) => match dx {
                Some(dx) => {
                    let input = self.capture(x)?;
                    Some(match op {
                        BuiltinOp::Sin => {
                            let cos = self.differential.builtin(BuiltinOp::Cos, vec![input]);
                            self.differential.builtin(BuiltinOp::FMul, vec![dx, cos])
                        }
                        BuiltinOp::Cos => {
                            let sin = self.differential.builtin(BuiltinOp::Sin, vec![input]);
                            let product = self.differential.builtin(BuiltinOp::FMul, vec![dx, sin]);
                            self.differential.builtin(BuiltinOp::FNeg, vec![product])
                        }
                        _ => self.differential.builtin(BuiltinOp::FDiv, vec![dx, input]),
                    })
                }
                None => None,
            },
            (BuiltinOp::Exp, _) => match dx {
                Some(dx) => {
                    let output = self.capture(result)?;
                    Some(self.differential.builtin(BuiltinOp::FMul, vec![dx, output]))
                }
                None => None,
            },
            _ => return Err(unsupported_inst(inst)),
        };
        Ok(tangent)
    }

    fn combine(&mut self, lhs: Option<ValueId>, rhs: Option<ValueId>, op: BuiltinOp) -> Option<ValueId> {
        match (lhs, rhs) {
            (Some(lhs), Some(rhs)) => Some(self.differential.builtin(op, vec![lhs, rhs])),
            (lhs, None) => lhs,
            (None, rhs) => rhs,
        }
    }
}
