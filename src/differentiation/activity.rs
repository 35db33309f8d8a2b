//! Activity analysis.
//!
//! A value is *varied* when it depends on a differentiation parameter and
//! has a tangent space, *useful* when the result depends on it, and *active*
//! when both hold. Only active values need derivatives.

use std::collections::HashSet;

use crate::autodiff::{IndexSubset, TangentSpaceResolver};
use crate::ir::{InstKind, IrFunction, Terminator, ValueId};
use crate::types::{ConformanceLookup, GenericSignature, Type};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Activity {
    varied: HashSet<ValueId>,
    useful: HashSet<ValueId>,
}

impl Activity {
    pub fn analyze(
        function: &IrFunction,
        parameters: &IndexSubset,
        resolver: &TangentSpaceResolver<'_>,
        signature: Option<&GenericSignature>,
    ) -> Self {
        let mut activity = Activity::default();
        activity.propagate_varied(function, parameters, resolver, signature);
        activity.propagate_useful(function);
        activity
    }

    #[must_use]
    pub fn is_varied(&self, value: ValueId) -> bool {
        self.varied.contains(&value)
    }

    #[must_use]
    pub fn is_useful(&self, value: ValueId) -> bool {
        self.useful.contains(&value)
    }

    #[must_use]
    pub fn is_active(&self, value: ValueId) -> bool {
        self.is_varied(value) && self.is_useful(value)
    }

    /// True when some returned value is varied.
    #[must_use]
    pub fn result_is_varied(&self, function: &IrFunction) -> bool {
        function.blocks.iter().any(|block| {
            matches!(block.terminator, Some(Terminator::Return(value)) if self.is_varied(value))
        })
    }

    fn propagate_varied(
        &mut self,
        function: &IrFunction,
        parameters: &IndexSubset,
        resolver: &TangentSpaceResolver<'_>,
        signature: Option<&GenericSignature>,
    ) {
        let differentiable = |value: ValueId| {
            function
                .value_type(value)
                .is_some_and(|ty| resolver.is_differentiable(ty, signature))
        };
        for (index, param) in function.params().iter().enumerate() {
            if parameters.contains(index) && differentiable(*param) {
                self.varied.insert(*param);
            }
        }
        let mut changed = true;
        while changed {
            changed = false;
            for block in &function.blocks {
                for inst in &block.insts {
                    match &inst.kind {
                        InstKind::Store { value, address } => {
                            if self.is_varied(*value) {
                                changed |= self.varied.insert(*address);
                            }
                        }
                        InstKind::StructExtract { value, field } => {
                            let exempt = function
                                .value_type(*value)
                                .is_some_and(|ty| is_no_derivative_field(resolver.env(), ty, field));
                            if let Some(result) = inst.result {
                                if !exempt && self.is_varied(*value) && differentiable(result) {
                                    changed |= self.varied.insert(result);
                                }
                            }
                        }
                        kind => {
                            let Some(result) = inst.result else { continue };
                            let operands = match kind {
                                InstKind::Apply { args, .. } => args.clone(),
                                other => other.operands(),
                            };
                            if operands.iter().any(|operand| self.is_varied(*operand))
                                && differentiable(result)
                            {
                                changed |= self.varied.insert(result);
                            }
                        }
                    }
                }
                if let Some(terminator) = &block.terminator {
                    for (target, args) in branch_edges(terminator) {
                        let Some(target) = function.block(target) else { continue };
                        for (arg, param) in args.iter().zip(&target.args) {
                            if self.is_varied(*arg) && differentiable(*param) {
                                changed |= self.varied.insert(*param);
                            }
                        }
                    }
                }
            }
        }
    }

    fn propagate_useful(&mut self, function: &IrFunction) {
        for block in &function.blocks {
            if let Some(Terminator::Return(value)) = block.terminator {
                self.useful.insert(value);
            }
        }
        let mut changed = true;
        while changed {
            changed = false;
            for block in function.blocks.iter().rev() {
                if let Some(terminator) = &block.terminator {
                    for (target, args) in branch_edges(terminator) {
                        let Some(target) = function.block(target) else { continue };
                        for (arg, param) in args.iter().zip(&target.args) {
                            if self.is_useful(*param) {
                                changed |= self.useful.insert(*arg);
                            }
                        }
                    }
                }
                for inst in block.insts.iter().rev() {
                    match &inst.kind {
                        InstKind::Store { value, address } => {
                            if self.is_useful(*address) {
                                changed |= self.useful.insert(*value);
                            }
                        }
                        kind => {
                            if inst.result.is_some_and(|result| self.is_useful(result)) {
                                for operand in kind.operands() {
                                    changed |= self.useful.insert(operand);
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

/// `(target, args)` of every edge that passes block arguments.
fn branch_edges(terminator: &Terminator) -> Vec<(crate::ir::BlockId, &[ValueId])> {
    match terminator {
        Terminator::Branch { target, args } => vec![(*target, args.as_slice())],
        Terminator::CondBranch {
            then_block,
            then_args,
            else_block,
            else_args,
            ..
        } => vec![
            (*then_block, then_args.as_slice()),
            (*else_block, else_args.as_slice()),
        ],
        Terminator::Return(_) | Terminator::SwitchEnum { .. } | Terminator::Unreachable => Vec::new(),
    }
}

/// True when `field` of `ty` is a `@noDerivative` stored property.
pub(crate) fn is_no_derivative_field(env: &dyn ConformanceLookup, ty: &Type, field: &str) -> bool {
    env.stored_properties(ty).is_some_and(|properties| {
        properties
            .iter()
            .any(|property| property.name == field && property.no_derivative)
    })
}
