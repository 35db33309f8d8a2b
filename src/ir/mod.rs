//! SSA-style mid-level IR that the differentiation transform reads and
//! writes.
//!
//! Functions own their blocks and a value table; instructions carry a
//! module-independent [`InstId`] drawn from a monotonic counter, so an id is
//! never reused even after the instruction is deleted. IR is built directly
//! through [`FunctionBuilder`]; there is no lowering from declarations.

mod builder;
pub mod cfg;
mod pretty;
mod verify;


pub use builder::FunctionBuilder;
pub use pretty::{format_function, format_module};
pub use verify::{verify_function, verify_module, VerifyError};

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::autodiff::{AutoDiffConfig, IndexSubset};
use crate::diagnostics::Span;
use crate::types::{FunctionType, SubstitutionMap, Type};

/// Semantics tag marking a function whose body must not be differentiated.
pub const OPAQUE_SEMANTICS: &str = "autodiff.opaque";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// Index into the owning function's value table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub usize);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Stable instruction identity. Ids increase monotonically and are never
/// reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(pub u64);

static NEXT_INST_ID: AtomicU64 = AtomicU64::new(1);

impl InstId {
    #[must_use]
    pub fn fresh() -> Self {
        InstId(NEXT_INST_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for InstId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "inst#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BuiltinOp {
    FAdd,
    FSub,
    FMul,
    FDiv,
    FNeg,
    Sin,
    Cos,
    Exp,
    Log,
    FCmpLt,
}

impl BuiltinOp {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            BuiltinOp::FAdd => "fadd",
            BuiltinOp::FSub => "fsub",
            BuiltinOp::FMul => "fmul",
            BuiltinOp::FDiv => "fdiv",
            BuiltinOp::FNeg => "fneg",
            BuiltinOp::Sin => "sin",
            BuiltinOp::Cos => "cos",
            BuiltinOp::Exp => "exp",
            BuiltinOp::Log => "log",
            BuiltinOp::FCmpLt => "fcmp_olt",
        }
    }

    #[must_use]
    pub fn arity(self) -> usize {
        match self {
            BuiltinOp::FNeg | BuiltinOp::Sin | BuiltinOp::Cos | BuiltinOp::Exp | BuiltinOp::Log => 1,
            _ => 2,
        }
    }

    #[must_use]
    pub fn is_comparison(self) -> bool {
        matches!(self, BuiltinOp::FCmpLt)
    }
}

/// Component selected by `differentiable_function_extract`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Extractee {
    Original,
    Jvp,
    Vjp,
}

impl Extractee {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Extractee::Original => "original",
            Extractee::Jvp => "jvp",
            Extractee::Vjp => "vjp",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum InstKind {
    FloatLiteral {
        value: f64,
    },
    IntLiteral {
        value: i64,
    },
    BoolLiteral {
        value: bool,
    },
    Builtin {
        op: BuiltinOp,
        args: Vec<ValueId>,
    },
    FunctionRef {
        name: String,
    },
    Apply {
        callee: ValueId,
        args: Vec<ValueId>,
        substitutions: SubstitutionMap,
    },
    /// Bind trailing arguments of `function`, yielding a closure over the
    /// remaining ones.
    PartialApply {
        function: ValueId,
        captured: Vec<ValueId>,
    },
    Tuple {
        elements: Vec<ValueId>,
    },
    TupleExtract {
        tuple: ValueId,
        index: usize,
    },
    Struct {
        fields: Vec<(String, ValueId)>,
    },
    StructExtract {
        value: ValueId,
        field: String,
    },
    /// Load of a stored field through a class reference.
    ClassFieldLoad {
        object: ValueId,
        field: String,
    },
    EnumCreate {
        case: String,
        payload: Option<ValueId>,
    },
    GlobalAddr {
        global: String,
    },
    Load {
        address: ValueId,
    },
    Store {
        value: ValueId,
        address: ValueId,
    },
    /// Bundle an original function with its JVP and VJP. `derivatives` is
    /// filled in by the differentiation transform.
    DifferentiableFunction {
        original: ValueId,
        parameter_indices: IndexSubset,
        derivatives: Option<(ValueId, ValueId)>,
    },
    DifferentiableFunctionExtract {
        function: ValueId,
        extractee: Extractee,
    },
    LinearFunction {
        original: ValueId,
        transpose: Option<ValueId>,
    },
    /// `AdditiveArithmetic.zero` of the result type.
    Zero,
    /// `AdditiveArithmetic.+` on two tangent values.
    TangentAdd {
        lhs: ValueId,
        rhs: ValueId,
    },
    Trap,
}

impl InstKind {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            InstKind::FloatLiteral { .. } => "float_literal",
            InstKind::IntLiteral { .. } => "integer_literal",
            InstKind::BoolLiteral { .. } => "bool_literal",
            InstKind::Builtin { .. } => "builtin",
            InstKind::FunctionRef { .. } => "function_ref",
            InstKind::Apply { .. } => "apply",
            InstKind::PartialApply { .. } => "partial_apply",
            InstKind::Tuple { .. } => "tuple",
            InstKind::TupleExtract { .. } => "tuple_extract",
            InstKind::Struct { .. } => "struct",
            InstKind::StructExtract { .. } => "struct_extract",
            InstKind::ClassFieldLoad { .. } => "ref_element_load",
            InstKind::EnumCreate { .. } => "enum",
            InstKind::GlobalAddr { .. } => "global_addr",
            InstKind::Load { .. } => "load",
            InstKind::Store { .. } => "store",
            InstKind::DifferentiableFunction { .. } => "differentiable_function",
            InstKind::DifferentiableFunctionExtract { .. } => "differentiable_function_extract",
            InstKind::LinearFunction { .. } => "linear_function",
            InstKind::Zero => "zero",
            InstKind::TangentAdd { .. } => "tangent_add",
            InstKind::Trap => "trap",
        }
    }

    /// Values read by the instruction, in operand order.
    #[must_use]
    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            InstKind::FloatLiteral { .. }
            | InstKind::IntLiteral { .. }
            | InstKind::BoolLiteral { .. }
            | InstKind::FunctionRef { .. }
            | InstKind::GlobalAddr { .. }
            | InstKind::Zero
            | InstKind::Trap => Vec::new(),
            InstKind::Builtin { args, .. } => args.clone(),
            InstKind::Apply { callee, args, .. } => {
                std::iter::once(*callee).chain(args.iter().copied()).collect()
            }
            InstKind::PartialApply { function, captured } => {
                std::iter::once(*function).chain(captured.iter().copied()).collect()
            }
            InstKind::Tuple { elements } => elements.clone(),
            InstKind::TupleExtract { tuple, .. } => vec![*tuple],
            InstKind::Struct { fields } => fields.iter().map(|(_, value)| *value).collect(),
            InstKind::StructExtract { value, .. } => vec![*value],
            InstKind::ClassFieldLoad { object, .. } => vec![*object],
            InstKind::EnumCreate { payload, .. } => payload.iter().copied().collect(),
            InstKind::Load { address } => vec![*address],
            InstKind::Store { value, address } => vec![*value, *address],
            InstKind::DifferentiableFunction {
                original,
                derivatives,
                ..
            } => {
                let mut operands = vec![*original];
                if let Some((jvp, vjp)) = derivatives {
                    operands.push(*jvp);
                    operands.push(*vjp);
                }
                operands
            }
            InstKind::DifferentiableFunctionExtract { function, .. } => vec![*function],
            InstKind::LinearFunction {
                original,
                transpose,
            } => std::iter::once(*original).chain(transpose.iter().copied()).collect(),
            InstKind::TangentAdd { lhs, rhs } => vec![*lhs, *rhs],
        }
    }

    /// Rewrite every operand through `map`.
    pub fn map_operands(&mut self, mut map: impl FnMut(ValueId) -> ValueId) {
        let mut each = |values: &mut Vec<ValueId>| {
            for value in values.iter_mut() {
                *value = map(*value);
            }
        };
        match self {
            InstKind::FloatLiteral { .. }
            | InstKind::IntLiteral { .. }
            | InstKind::BoolLiteral { .. }
            | InstKind::FunctionRef { .. }
            | InstKind::GlobalAddr { .. }
            | InstKind::Zero
            | InstKind::Trap => {}
            InstKind::Builtin { args, .. } => each(args),
            InstKind::Apply { callee, args, .. } => {
                let mut all = vec![*callee];
                all.append(args);
                each(&mut all);
                *callee = all.remove(0);
                *args = all;
            }
            InstKind::PartialApply { function, captured } => {
                let mut all = vec![*function];
                all.append(captured);
                each(&mut all);
                *function = all.remove(0);
                *captured = all;
            }
            InstKind::Tuple { elements } => each(elements),
            InstKind::Struct { fields } => {
                let mut values: Vec<ValueId> = fields.iter().map(|(_, value)| *value).collect();
                each(&mut values);
                for ((_, slot), value) in fields.iter_mut().zip(values) {
                    *slot = value;
                }
            }
            InstKind::TupleExtract { tuple: value, .. }
            | InstKind::StructExtract { value, .. }
            | InstKind::ClassFieldLoad { object: value, .. }
            | InstKind::Load { address: value }
            | InstKind::DifferentiableFunctionExtract {
                function: value, ..
            } => {
                let mut all = vec![*value];
                each(&mut all);
                *value = all[0];
            }
            InstKind::EnumCreate { payload, .. } => {
                if let Some(payload) = payload {
                    let mut all = vec![*payload];
                    each(&mut all);
                    *payload = all[0];
                }
            }
            InstKind::Store { value, address } => {
                let mut all = vec![*value, *address];
                each(&mut all);
                *value = all[0];
                *address = all[1];
            }
            InstKind::DifferentiableFunction {
                original,
                derivatives,
                ..
            } => {
                let mut all = vec![*original];
                if let Some((jvp, vjp)) = derivatives {
                    all.push(*jvp);
                    all.push(*vjp);
                }
                each(&mut all);
                *original = all[0];
                if let Some((jvp, vjp)) = derivatives {
                    *jvp = all[1];
                    *vjp = all[2];
                }
            }
            InstKind::LinearFunction {
                original,
                transpose,
            } => {
                let mut all = vec![*original];
                all.extend(transpose.iter().copied());
                each(&mut all);
                *original = all[0];
                if let Some(transpose) = transpose {
                    *transpose = all[1];
                }
            }
            InstKind::TangentAdd { lhs, rhs } => {
                let mut all = vec![*lhs, *rhs];
                each(&mut all);
                *lhs = all[0];
                *rhs = all[1];
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Inst {
    pub id: InstId,
    pub kind: InstKind,
    pub result: Option<ValueId>,
    pub span: Option<Span>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Terminator {
    Return(ValueId),
    Branch {
        target: BlockId,
        args: Vec<ValueId>,
    },
    CondBranch {
        condition: ValueId,
        then_block: BlockId,
        then_args: Vec<ValueId>,
        else_block: BlockId,
        else_args: Vec<ValueId>,
    },
    SwitchEnum {
        value: ValueId,
        cases: Vec<(String, BlockId)>,
        default: Option<BlockId>,
    },
    Unreachable,
}

impl Terminator {
    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Return(_) | Terminator::Unreachable => Vec::new(),
            Terminator::Branch { target, .. } => vec![*target],
            Terminator::CondBranch {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            Terminator::SwitchEnum { cases, default, .. } => cases
                .iter()
                .map(|(_, block)| *block)
                .chain(default.iter().copied())
                .collect(),
        }
    }

    #[must_use]
    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            Terminator::Return(value) => vec![*value],
            Terminator::Branch { args, .. } => args.clone(),
            Terminator::CondBranch {
                condition,
                then_args,
                else_args,
                ..
            } => std::iter::once(*condition)
                .chain(then_args.iter().copied())
                .chain(else_args.iter().copied())
                .collect(),
            Terminator::SwitchEnum { value, .. } => vec![*value],
            Terminator::Unreachable => Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub id: BlockId,
    pub args: Vec<ValueId>,
    pub insts: Vec<Inst>,
    pub terminator: Option<Terminator>,
    pub terminator_span: Option<Span>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValueInfo {
    pub ty: Type,
    /// The value is the address of storage of type `ty`.
    pub is_address: bool,
    pub name: Option<String>,
}

/// `[differentiable]` attribute of an IR function: a configuration plus
/// optional custom derivative function names.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IrDifferentiableAttr {
    pub config: AutoDiffConfig,
    pub jvp: Option<String>,
    pub vjp: Option<String>,
    pub span: Option<Span>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IrFunction {
    pub name: String,
    pub ty: FunctionType,
    /// Empty for external declarations.
    pub blocks: Vec<Block>,
    pub values: Vec<ValueInfo>,
    pub span: Option<Span>,
    pub semantics: BTreeSet<String>,
    pub differentiable: Vec<IrDifferentiableAttr>,
}

impl IrFunction {
    #[must_use]
    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    #[must_use]
    pub fn is_opaque(&self) -> bool {
        self.semantics.contains(OPAQUE_SEMANTICS)
    }

    /// Entry block arguments; empty for declarations.
    #[must_use]
    pub fn params(&self) -> &[ValueId] {
        self.blocks.first().map_or(&[], |entry| entry.args.as_slice())
    }

    #[must_use]
    pub fn value(&self, value: ValueId) -> Option<&ValueInfo> {
        self.values.get(value.0)
    }

    #[must_use]
    pub fn value_type(&self, value: ValueId) -> Option<&Type> {
        self.value(value).map(|info| &info.ty)
    }

    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id.0)
    }

    pub fn insts(&self) -> impl Iterator<Item = &Inst> {
        self.blocks.iter().flat_map(|block| block.insts.iter())
    }

    /// Instruction defining `value`, if it is an instruction result.
    #[must_use]
    pub fn defining_inst(&self, value: ValueId) -> Option<&Inst> {
        self.insts().find(|inst| inst.result == Some(value))
    }

    #[must_use]
    pub fn find_inst(&self, id: InstId) -> Option<&Inst> {
        self.insts().find(|inst| inst.id == id)
    }

    pub fn find_inst_mut(&mut self, id: InstId) -> Option<&mut Inst> {
        self.blocks
            .iter_mut()
            .flat_map(|block| block.insts.iter_mut())
            .find(|inst| inst.id == id)
    }

    /// Position of an instruction as `(block, index)`.
    #[must_use]
    pub fn position_of(&self, id: InstId) -> Option<(BlockId, usize)> {
        self.blocks.iter().find_map(|block| {
            block
                .insts
                .iter()
                .position(|inst| inst.id == id)
                .map(|index| (block.id, index))
        })
    }

    /// Instructions using `value` as an operand.
    #[must_use]
    pub fn users(&self, value: ValueId) -> Vec<InstId> {
        self.insts()
            .filter(|inst| inst.kind.operands().contains(&value))
            .map(|inst| inst.id)
            .collect()
    }

    /// Replace every use of `from` with `to`, terminators included.
    pub fn replace_all_uses(&mut self, from: ValueId, to: ValueId) {
        let remap = |value: ValueId| if value == from { to } else { value };
        for block in &mut self.blocks {
            for inst in &mut block.insts {
                inst.kind.map_operands(remap);
            }
            if let Some(terminator) = &mut block.terminator {
                remap_terminator(terminator, remap);
            }
        }
    }

    pub fn remove_inst(&mut self, id: InstId) -> Option<Inst> {
        let (block, index) = self.position_of(id)?;
        Some(self.blocks[block.0].insts.remove(index))
    }

    /// Insert `kind` before the instruction at `(block, index)`, allocating a
    /// result of type `result` when given.
    pub fn insert_inst(
        &mut self,
        block: BlockId,
        index: usize,
        kind: InstKind,
        result: Option<Type>,
        span: Option<Span>,
    ) -> (InstId, Option<ValueId>) {
        let result = result.map(|ty| self.new_value(ty, false));
        let inst = Inst {
            id: InstId::fresh(),
            kind,
            result,
            span,
        };
        let id = inst.id;
        if let Some(target) = self.blocks.get_mut(block.0) {
            let index = index.min(target.insts.len());
            target.insts.insert(index, inst);
        }
        (id, result)
    }

    pub(crate) fn new_value(&mut self, ty: Type, is_address: bool) -> ValueId {
        let id = ValueId(self.values.len());
        self.values.push(ValueInfo {
            ty,
            is_address,
            name: None,
        });
        id
    }
}

pub(crate) fn remap_terminator(terminator: &mut Terminator, map: impl Fn(ValueId) -> ValueId) {
    match terminator {
        Terminator::Return(value) => *value = map(*value),
        Terminator::Branch { args, .. } => {
            for arg in args {
                *arg = map(*arg);
            }
        }
        Terminator::CondBranch {
            condition,
            then_args,
            else_args,
            ..
        } => {
            *condition = map(*condition);
            for arg in then_args.iter_mut().chain(else_args.iter_mut()) {
                *arg = map(*arg);
            }
        }
        Terminator::SwitchEnum { value, .. } => *value = map(*value),
        Terminator::Unreachable => {}
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Global {
    pub name: String,
    pub ty: Type,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct IrModule {
    pub name: String,
    functions: Vec<IrFunction>,
    globals: Vec<Global>,
}

impl IrModule {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
            globals: Vec::new(),
        }
    }

    /// Add `function`, replacing any existing function of the same name.
    pub fn add_function(&mut self, function: IrFunction) {
        match self.functions.iter_mut().find(|existing| existing.name == function.name) {
            Some(slot) => *slot = function,
            None => self.functions.push(function),
        }
    }

    #[must_use]
    pub fn function(&self, name: &str) -> Option<&IrFunction> {
        self.functions.iter().find(|function| function.name == name)
    }

    pub fn function_mut(&mut self, name: &str) -> Option<&mut IrFunction> {
        self.functions.iter_mut().find(|function| function.name == name)
    }

    pub fn remove_function(&mut self, name: &str) -> Option<IrFunction> {
        let index = self.functions.iter().position(|function| function.name == name)?;
        Some(self.functions.remove(index))
    }

    #[must_use]
    pub fn functions(&self) -> &[IrFunction] {
        &self.functions
    }

    #[must_use]
    pub fn function_names(&self) -> Vec<String> {
        self.functions.iter().map(|function| function.name.clone()).collect()
    }

    pub fn add_global(&mut self, name: impl Into<String>, ty: Type) {
        self.globals.push(Global {
            name: name.into(),
            ty,
        });
    }

    #[must_use]
    pub fn global(&self, name: &str) -> Option<&Global> {
        self.globals.iter().find(|global| global.name == name)
    }

    #[must_use]
    pub fn globals(&self) -> &[Global] {
        &self.globals
    }
}
