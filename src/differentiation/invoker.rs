use std::fmt;

use super::diagnostics::{EXPRESSION_NOT_DIFFERENTIABLE, FUNCTION_NOT_DIFFERENTIABLE};
use super::witness::WitnessKey;
use crate::diagnostics::Span;
use crate::ir::InstId;

/// Why a witness was requested. Each witness records exactly one invoker,
/// at first discovery.
#[derive(Clone, Debug, PartialEq)]
pub enum DifferentiationInvoker {
    /// A `differentiable_function` instruction in `function`.
    DifferentiableFunctionInst {
        function: String,
        inst: InstId,
        span: Option<Span>,
    },
    /// A call inside `caller` reached while synthesizing the derivative for
    /// `parent`.
    IndirectDifferentiation {
        caller: String,
        apply: InstId,
        span: Option<Span>,
        parent: WitnessKey,
    },
    /// A `[differentiable]` attribute on the original function.
    Witness { key: WitnessKey, span: Option<Span> },
}

impl DifferentiationInvoker {
    #[must_use]
    pub fn span(&self) -> Option<Span> {
        match self {
            DifferentiationInvoker::DifferentiableFunctionInst { span, .. }
            | DifferentiationInvoker::IndirectDifferentiation { span, .. }
            | DifferentiationInvoker::Witness { span, .. } => *span,
        }
    }

    /// The request this one was made on behalf of.
    #[must_use]
    pub fn parent(&self) -> Option<&WitnessKey> {
        match self {
            DifferentiationInvoker::IndirectDifferentiation { parent, .. } => Some(parent),
            _ => None,
        }
    }

    /// Primary message of a diagnostic rooted at this invoker.
    #[must_use]
    pub fn root_message(&self) -> &'static str {
        match self {
            DifferentiationInvoker::DifferentiableFunctionInst { .. } => EXPRESSION_NOT_DIFFERENTIABLE,
            _ => FUNCTION_NOT_DIFFERENTIABLE,
        }
    }
}

impl fmt::Display for DifferentiationInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DifferentiationInvoker::DifferentiableFunctionInst { function, inst, .. } => {
                write!(f, "differentiable_function {inst} in @{function}")
            }
            DifferentiationInvoker::IndirectDifferentiation { caller, apply, .. } => {
                write!(f, "call {apply} in @{caller}")
            }
            DifferentiationInvoker::Witness { key, .. } => write!(f, "witness for {key}"),
        }
    }
}
