use std::fmt::Write;

use super::{Block, Inst, InstKind, IrFunction, IrModule, Terminator, ValueId};

/// Render an IR module into a human-readable string.
#[must_use]
pub fn format_module(module: &IrModule) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "module {}", module.name);
    for global in module.globals() {
        let _ = writeln!(out, "global @{} : {}", global.name, global.ty);
    }
    for function in module.functions() {
        let _ = writeln!(out);
        out.push_str(&format_function(function));
    }
    out
}

#[must_use]
pub fn format_function(function: &IrFunction) -> String {
    let mut out = String::new();
    for attr in &function.differentiable {
        let _ = write!(
            out,
            "[differentiable wrt {}",
            attr.config.parameter_indices
        );
        if let Some(jvp) = &attr.jvp {
            let _ = write!(out, " jvp @{jvp}");
        }
        if let Some(vjp) = &attr.vjp {
            let _ = write!(out, " vjp @{vjp}");
        }
        let _ = writeln!(out, "]");
    }
    for semantics in &function.semantics {
        let _ = writeln!(out, "[semantics \"{semantics}\"]");
    }
    if function.is_declaration() {
        let _ = writeln!(out, "func @{} : {}", function.name, function.ty);
        return out;
    }
    let _ = writeln!(out, "func @{} : {} {{", function.name, function.ty);
    for block in &function.blocks {
        format_block(function, block, &mut out);
    }
    let _ = writeln!(out, "}}");
    out
}

fn format_block(function: &IrFunction, block: &Block, out: &mut String) {
    let args = block
        .args
        .iter()
        .map(|arg| format!("{arg} : {}", typed(function, *arg)))
        .collect::<Vec<_>>()
        .join(", ");
    if args.is_empty() {
        let _ = writeln!(out, "{}:", block.id);
    } else {
        let _ = writeln!(out, "{}({args}):", block.id);
    }
    for inst in &block.insts {
        format_inst(function, inst, out);
    }
    match &block.terminator {
        Some(terminator) => {
            let _ = writeln!(out, "  {}", format_terminator(terminator));
        }
        None => {
            let _ = writeln!(out, "  <missing terminator>");
        }
    }
}

fn typed(function: &IrFunction, value: ValueId) -> String {
    match function.value(value) {
        Some(info) if info.is_address => format!("*{}", info.ty),
        Some(info) => info.ty.to_string(),
        None => "<invalid>".into(),
    }
}

fn list(values: &[ValueId]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_inst(function: &IrFunction, inst: &Inst, out: &mut String) {
    let body = match &inst.kind {
        InstKind::FloatLiteral { value } => format!("float_literal {value:?}"),
        InstKind::IntLiteral { value } => format!("integer_literal {value}"),
        InstKind::BoolLiteral { value } => format!("bool_literal {value}"),
        InstKind::Builtin { op, args } => format!("builtin \"{}\"({})", op.name(), list(args)),
        InstKind::FunctionRef { name } => format!("function_ref @{name}"),
        InstKind::Apply {
            callee,
            args,
            substitutions,
        } => {
            if substitutions.is_empty() {
                format!("apply {callee}({})", list(args))
            } else {
                let subs = substitutions
                    .values()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("apply {callee}<{subs}>({})", list(args))
            }
        }
        InstKind::PartialApply { function, captured } => {
            format!("partial_apply {function}({})", list(captured))
        }
        InstKind::Tuple { elements } => format!("tuple ({})", list(elements)),
        InstKind::TupleExtract { tuple, index } => format!("tuple_extract {tuple}, {index}"),
        InstKind::Struct { fields } => {
            let fields = fields
                .iter()
                .map(|(name, value)| format!("{name}: {value}"))
                .collect::<Vec<_>>()
                .join(", ");
            format!("struct ({fields})")
        }
        InstKind::StructExtract { value, field } => format!("struct_extract {value}, #{field}"),
        InstKind::ClassFieldLoad { object, field } => {
            format!("ref_element_load {object}, #{field}")
        }
        InstKind::EnumCreate { case, payload } => match payload {
            Some(payload) => format!("enum #{case}({payload})"),
            None => format!("enum #{case}"),
        },
        InstKind::GlobalAddr { global } => format!("global_addr @{global}"),
        InstKind::Load { address } => format!("load {address}"),
        InstKind::Store { value, address } => format!("store {value} to {address}"),
        InstKind::DifferentiableFunction {
            original,
            parameter_indices,
            derivatives,
        } => match derivatives {
            Some((jvp, vjp)) => format!(
                "differentiable_function wrt {parameter_indices} {original} with_derivative {{{jvp}, {vjp}}}"
            ),
            None => format!("differentiable_function wrt {parameter_indices} {original}"),
        },
        InstKind::DifferentiableFunctionExtract {
            function,
            extractee,
        } => format!("differentiable_function_extract [{}] {function}", extractee.name()),
        InstKind::LinearFunction {
            original,
            transpose,
        } => match transpose {
            Some(transpose) => format!("linear_function {original} with_transpose {transpose}"),
            None => format!("linear_function {original}"),
        },
        InstKind::Zero => "zero".into(),
        InstKind::TangentAdd { lhs, rhs } => format!("tangent_add {lhs}, {rhs}"),
        InstKind::Trap => "trap".into(),
    };
    match inst.result {
        Some(result) => {
            let _ = writeln!(out, "  {result} = {body} : {}", typed(function, result));
        }
        None => {
            let _ = writeln!(out, "  {body}");
        }
    }
}

fn format_terminator(terminator: &Terminator) -> String {
    let with_args = |block: &super::BlockId, args: &[ValueId]| {
        if args.is_empty() {
            block.to_string()
        } else {
            format!("{block}({})", list(args))
        }
    };
    match terminator {
        Terminator::Return(value) => format!("return {value}"),
        Terminator::Branch { target, args } => format!("br {}", with_args(target, args)),
        Terminator::CondBranch {
            condition,
            then_block,
            then_args,
            else_block,
            else_args,
        } => format!(
            "cond_br {condition}, {}, {}",
            with_args(then_block, then_args),
            with_args(else_block, else_args)
        ),
        Terminator::SwitchEnum {
            value,
            cases,
            default,
        } => {
            let mut arms: Vec<String> = cases
                .iter()
                .map(|(case, block)| format!("case #{case}: {block}"))
                .collect();
            if let Some(default) = default {
                arms.push(format!("default {default}"));
            }
            format!("switch_enum {value}, {}", arms.join(", "))
        }
        Terminator::Unreachable => "unreachable".into(),
    }
}
