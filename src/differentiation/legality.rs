//! Classification of constructs that block derivative synthesis.
//!
//! Every failure here is permanent for the witness being synthesized.

use super::activity::Activity;
use super::diagnostics::{codes, Unsupported};
use crate::ir::cfg::{back_edges, reachable};
use crate::ir::{InstKind, IrFunction, Terminator, ValueId};
use crate::types::ParamConvention;

/// Check that `function` can be differentiated given its activity.
///
/// # Errors
///
/// Returns the first unsupported construct in block order.
pub fn check_function(function: &IrFunction, activity: &Activity) -> Result<(), Unsupported> {
    let live = reachable(function);
    let is_live = |index: usize| live.get(index).copied().unwrap_or(false);

    let returns = function
        .blocks
        .iter()
        .enumerate()
        .any(|(index, block)| is_live(index) && matches!(block.terminator, Some(Terminator::Return(_))));
    if !returns {
        return Err(Unsupported::new(
            codes::MISSING_RETURN,
            "missing return for differentiation",
            function.span,
        ));
    }

    if let Some((from, _)) = back_edges(function).first() {
        let span = function
            .block(*from)
            .and_then(|block| block.terminator_span)
            .or(function.span);
        return Err(Unsupported::new(
            codes::LOOPS_UNSUPPORTED,
            "differentiating loops is not yet supported",
            span,
        ));
    }

    for (index, block) in function.blocks.iter().enumerate() {
        if !is_live(index) {
            continue;
        }
        if matches!(
            block.terminator,
            Some(Terminator::CondBranch { .. } | Terminator::SwitchEnum { .. })
        ) {
            return Err(Unsupported::new(
                codes::CONTROL_FLOW_UNSUPPORTED,
                "differentiating control flow is not yet supported",
                block.terminator_span.or(function.span),
            ));
        }
    }

    for (index, block) in function.blocks.iter().enumerate() {
        if !is_live(index) {
            continue;
        }
        for inst in &block.insts {
            check_inst(function, activity, &inst.kind, inst.result)
                .map_err(|(code, message)| Unsupported::new(code, message, inst.span))?;
        }
    }
    Ok(())
}

fn check_inst(
    function: &IrFunction,
    activity: &Activity,
    kind: &InstKind,
    result: Option<ValueId>,
) -> Result<(), (&'static str, &'static str)> {
    const INOUT: (&str, &str) = (
        codes::INOUT_UNSUPPORTED,
        "cannot differentiate through 'inout' arguments",
    );
    let result_active = result.is_some_and(|result| activity.is_active(result));
    match kind {
        InstKind::Store { value, address } => {
            if activity.is_varied(*value) && is_inout_param(function, *address) {
                return Err(INOUT);
            }
            if activity.is_varied(*value) && is_global(function, *address) {
                return Err((
                    codes::GLOBAL_WRITE_UNSUPPORTED,
                    "cannot differentiate writes to global variables",
                ));
            }
        }
        InstKind::Load { address } if result_active && is_inout_param(function, *address) => {
            return Err(INOUT);
        }
        InstKind::Apply { args, .. } => {
            let inout_arg = args.iter().any(|arg| {
                activity.is_varied(*arg) && function.value(*arg).is_some_and(|info| info.is_address)
            });
            if inout_arg {
                return Err(INOUT);
            }
        }
        InstKind::ClassFieldLoad { object, .. } if result_active || activity.is_varied(*object) => {
            return Err((
                codes::CLASS_MEMBER_UNSUPPORTED,
                "differentiating class members is not yet supported",
            ));
        }
        InstKind::EnumCreate {
            payload: Some(payload),
            ..
        } if activity.is_active(*payload) || result_active => {
            return Err((
                codes::ENUM_UNSUPPORTED,
                "differentiating enum values is not yet supported",
            ));
        }
        _ => {}
    }
    Ok(())
}

fn is_inout_param(function: &IrFunction, value: ValueId) -> bool {
    function
        .params()
        .iter()
        .position(|param| *param == value)
        .and_then(|index| function.ty.params.get(index))
        .is_some_and(|param| param.convention == ParamConvention::Inout)
}

fn is_global(function: &IrFunction, value: ValueId) -> bool {
    matches!(
        function.defining_inst(value).map(|inst| &inst.kind),
        Some(InstKind::GlobalAddr { .. })
    )
}
