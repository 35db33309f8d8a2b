//! Structural verification of IR functions.

use std::collections::HashSet;
use std::fmt;

use super::{BlockId, InstId, InstKind, IrFunction, IrModule, Terminator, ValueId};
use crate::types::Type;

/// Validate invariants for every defined function of `module`.
///
/// # Errors
///
/// Returns the offending function names paired with their errors.
pub fn verify_module(module: &IrModule) -> Result<(), Vec<(String, VerifyError)>> {
    let errors: Vec<(String, VerifyError)> = module
        .functions()
        .iter()
        .filter_map(|function| {
            verify_function(function)
                .err()
                .map(|errors| (function.name.clone(), errors))
        })
        .flat_map(|(name, errors)| errors.into_iter().map(move |error| (name.clone(), error)))
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate invariants for an IR function. Declarations always verify.
///
/// # Errors
///
/// Returns a list of [`VerifyError`] values when invariants are violated.
pub fn verify_function(function: &IrFunction) -> Result<(), Vec<VerifyError>> {
    Verifier::new(function).run()
}

#[derive(Debug)]
struct Verifier<'a> {
    function: &'a IrFunction,
    errors: Vec<VerifyError>,
    defined: HashSet<ValueId>,
}

impl<'a> Verifier<'a> {
    fn new(function: &'a IrFunction) -> Self {
        Self {
            function,
            errors: Vec::new(),
            defined: HashSet::new(),
        }
    }

    fn run(mut self) -> Result<(), Vec<VerifyError>> {
        if !self.function.is_declaration() {
            self.check_entry();
            self.collect_definitions();
            self.check_blocks();
        }
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }

    fn check_entry(&mut self) {
        let expected = self.function.ty.params.len();
        let actual = self.function.params().len();
        if expected != actual {
            self.errors
                .push(VerifyError::ArgumentCountMismatch { expected, actual });
        }
    }

    fn collect_definitions(&mut self) {
        let function = self.function;
        let block_args = function.blocks.iter().flat_map(|block| block.args.iter().copied());
        let results = function.insts().filter_map(|inst| inst.result);
        for value in block_args.chain(results) {
            if value.0 >= function.values.len() {
                self.errors.push(VerifyError::UnknownValue {
                    value,
                    context: "definition",
                });
            } else if !self.defined.insert(value) {
                self.errors.push(VerifyError::MultipleDefinitions { value });
            }
        }
    }

    fn check_blocks(&mut self) {
        let function = self.function;
        for (index, block) in function.blocks.iter().enumerate() {
            let block_id = BlockId(index);
            if block.id != block_id {
                self.errors.push(VerifyError::BlockIdMismatch {
                    expected: block_id,
                    actual: block.id,
                });
            }
            for inst in &block.insts {
                self.check_inst(inst.id, &inst.kind);
            }
            match &block.terminator {
                Some(terminator) => self.check_terminator(block_id, terminator),
                None => self
                    .errors
                    .push(VerifyError::MissingTerminator { block: block_id }),
            }
        }
    }

    fn check_use(&mut self, value: ValueId, context: &'static str) {
        if !self.defined.contains(&value) {
            self.errors.push(VerifyError::UnknownValue { value, context });
        }
    }

    fn is_address(&self, value: ValueId) -> bool {
        self.function
            .value(value)
            .is_some_and(|info| info.is_address)
    }

    fn check_inst(&mut self, inst: InstId, kind: &InstKind) {
        for operand in kind.operands() {
            self.check_use(operand, kind.name());
        }
        match kind {
            InstKind::Builtin { op, args } if args.len() != op.arity() => {
                self.errors.push(VerifyError::OperandCountMismatch {
                    inst,
                    expected: op.arity(),
                    actual: args.len(),
                });
            }
            InstKind::Apply { callee, args, .. } => {
                match self.function.value_type(*callee).and_then(Type::as_function) {
                    Some(ty) if ty.params.len() != args.len() => {
                        self.errors.push(VerifyError::OperandCountMismatch {
                            inst,
                            expected: ty.params.len(),
                            actual: args.len(),
                        });
                    }
                    Some(_) => {}
                    None => self.errors.push(VerifyError::CalleeNotFunction { inst }),
                }
            }
            InstKind::PartialApply { function, .. } => {
                if self
                    .function
                    .value_type(*function)
                    .and_then(Type::as_function)
                    .is_none()
                {
                    self.errors.push(VerifyError::CalleeNotFunction { inst });
                }
            }
            InstKind::Load { address } | InstKind::Store { address, .. } => {
                if !self.is_address(*address) {
                    self.errors.push(VerifyError::ExpectedAddress {
                        inst,
                        value: *address,
                    });
                }
            }
            _ => {}
        }
    }

    fn check_terminator(&mut self, block: BlockId, terminator: &Terminator) {
        for operand in terminator.operands() {
            self.check_use(operand, "terminator");
        }
        match terminator {
            Terminator::Return(value) => {
                let expected = &self.function.ty.result;
                if let Some(actual) = self.function.value_type(*value) {
                    if !actual.matches_ignoring_labels(expected) {
                        self.errors.push(VerifyError::ReturnTypeMismatch {
                            block,
                            expected: expected.to_string(),
                            actual: actual.to_string(),
                        });
                    }
                }
            }
            Terminator::Branch { target, args } => self.check_edge(*target, args.len()),
            Terminator::CondBranch {
                then_block,
                then_args,
                else_block,
                else_args,
                ..
            } => {
                self.check_edge(*then_block, then_args.len());
                self.check_edge(*else_block, else_args.len());
            }
            Terminator::SwitchEnum { .. } => {
                for target in terminator.successors() {
                    self.check_block_target(target, "switch_enum");
                }
            }
            Terminator::Unreachable => {}
        }
    }

    fn check_edge(&mut self, target: BlockId, arg_count: usize) {
        if !self.check_block_target(target, "branch") {
            return;
        }
        let expected = self.function.blocks[target.0].args.len();
        if expected != arg_count {
            self.errors.push(VerifyError::BranchArgumentMismatch {
                target,
                expected,
                actual: arg_count,
            });
        }
    }

    fn check_block_target(&mut self, block: BlockId, context: &'static str) -> bool {
        if block.0 < self.function.blocks.len() {
            true
        } else {
            self.errors
                .push(VerifyError::InvalidBlockTarget { context, block });
            false
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    MissingTerminator {
        block: BlockId,
    },
    BlockIdMismatch {
        expected: BlockId,
        actual: BlockId,
    },
    InvalidBlockTarget {
        context: &'static str,
        block: BlockId,
    },
    ArgumentCountMismatch {
        expected: usize,
        actual: usize,
    },
    BranchArgumentMismatch {
        target: BlockId,
        expected: usize,
        actual: usize,
    },
    UnknownValue {
        value: ValueId,
        context: &'static str,
    },
    MultipleDefinitions {
        value: ValueId,
    },
    OperandCountMismatch {
        inst: InstId,
        expected: usize,
        actual: usize,
    },
    CalleeNotFunction {
        inst: InstId,
    },
    ExpectedAddress {
        inst: InstId,
        value: ValueId,
    },
    ReturnTypeMismatch {
        block: BlockId,
        expected: String,
        actual: String,
    },
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyError::MissingTerminator { block } => write!(f, "{block} has no terminator"),
            VerifyError::BlockIdMismatch { expected, actual } => {
                write!(f, "block at position {expected} is labelled {actual}")
            }
            VerifyError::InvalidBlockTarget { context, block } => {
                write!(f, "{context} targets missing block {block}")
            }
            VerifyError::ArgumentCountMismatch { expected, actual } => write!(
                f,
                "entry block has {actual} arguments but the function takes {expected}"
            ),
            VerifyError::BranchArgumentMismatch {
                target,
                expected,
                actual,
            } => write!(f, "branch to {target} passes {actual} arguments, expected {expected}"),
            VerifyError::UnknownValue { value, context } => {
                write!(f, "{context} uses undefined value {value}")
            }
            VerifyError::MultipleDefinitions { value } => write!(f, "{value} is defined twice"),
            VerifyError::OperandCountMismatch {
                inst,
                expected,
                actual,
            } => write!(f, "{inst} has {actual} operands, expected {expected}"),
            VerifyError::CalleeNotFunction { inst } => {
                write!(f, "{inst} applies a value of non-function type")
            }
            VerifyError::ExpectedAddress { inst, value } => {
                write!(f, "{inst} expects {value} to be an address")
            }
            VerifyError::ReturnTypeMismatch {
                block,
                expected,
                actual,
            } => write!(f, "{block} returns '{actual}' but the function returns '{expected}'"),
        }
    }
}
