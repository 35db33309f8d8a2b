use std::collections::BTreeSet;

use super::{
    Block, BlockId, BuiltinOp, Extractee, Inst, InstId, InstKind, IrDifferentiableAttr,
    IrFunction, Terminator, ValueId, OPAQUE_SEMANTICS,
};
use crate::autodiff::{DifferentiabilityKind, IndexSubset};
use crate::diagnostics::Span;
use crate::types::{
    FunctionParam, FunctionType, ParamConvention, SubstitutionMap, TupleElement, TupleType, Type,
};

/// Incremental constructor for an [`IrFunction`].
///
/// The entry block is created up front with one argument per parameter;
/// `inout` parameters arrive as addresses. Result types are derived from the
/// operands where possible; ill-typed input is left for [`super::verify_function`]
/// to report.
#[derive(Debug)]
pub struct FunctionBuilder {
    function: IrFunction,
    current: BlockId,
    span: Option<Span>,
}

impl FunctionBuilder {
    #[must_use]
    pub fn new(name: impl Into<String>, ty: FunctionType) -> Self {
        let mut function = IrFunction {
            name: name.into(),
            ty: ty.clone(),
            blocks: Vec::new(),
            values: Vec::new(),
            span: None,
            semantics: BTreeSet::new(),
            differentiable: Vec::new(),
        };
        let args = ty
            .params
            .iter()
            .map(|param| {
                let id = function.new_value(param.ty.clone(), param.convention == ParamConvention::Inout);
                if let Some(label) = &param.label {
                    function.values[id.0].name = Some(label.clone());
                }
                id
            })
            .collect();
        function.blocks.push(Block {
            id: BlockId(0),
            args,
            insts: Vec::new(),
            terminator: None,
            terminator_span: None,
        });
        Self {
            function,
            current: BlockId(0),
            span: None,
        }
    }

    /// A body-less function whose definition lives elsewhere.
    #[must_use]
    pub fn declaration(name: impl Into<String>, ty: FunctionType) -> IrFunction {
        IrFunction {
            name: name.into(),
            ty,
            blocks: Vec::new(),
            values: Vec::new(),
            span: None,
            semantics: BTreeSet::new(),
            differentiable: Vec::new(),
        }
    }

    pub fn with_span(&mut self, span: Span) -> &mut Self {
        self.function.span = Some(span);
        self
    }

    /// Span attached to subsequently emitted instructions and terminators.
    pub fn at(&mut self, span: Option<Span>) -> &mut Self {
        self.span = span;
        self
    }

    pub fn opaque(&mut self) -> &mut Self {
        self.function.semantics.insert(OPAQUE_SEMANTICS.to_string());
        self
    }

    pub fn differentiable(&mut self, attr: IrDifferentiableAttr) -> &mut Self {
        self.function.differentiable.push(attr);
        self
    }

    #[must_use]
    pub fn param(&self, index: usize) -> ValueId {
        self.function.blocks[0].args[index]
    }

    #[must_use]
    pub fn params(&self) -> Vec<ValueId> {
        self.function.blocks[0].args.clone()
    }

    /// Append an unlabeled owned parameter, returning its entry argument.
    pub fn add_param(&mut self, ty: Type) -> ValueId {
        let value = self.function.new_value(ty.clone(), false);
        self.function.ty.params.push(FunctionParam::new(ty));
        if let Some(entry) = self.function.blocks.first_mut() {
            entry.args.push(value);
        }
        value
    }

    #[must_use]
    pub fn current_block(&self) -> BlockId {
        self.current
    }

    #[must_use]
    pub fn value_type(&self, value: ValueId) -> Type {
        self.function
            .value_type(value)
            .cloned()
            .unwrap_or_else(Type::unit)
    }

    pub fn name_value(&mut self, value: ValueId, name: impl Into<String>) {
        if let Some(info) = self.function.values.get_mut(value.0) {
            info.name = Some(name.into());
        }
    }

    pub fn create_block(&mut self, arg_types: Vec<Type>) -> BlockId {
        let id = BlockId(self.function.blocks.len());
        let args = arg_types
            .into_iter()
            .map(|ty| self.function.new_value(ty, false))
            .collect();
        self.function.blocks.push(Block {
            id,
            args,
            insts: Vec::new(),
            terminator: None,
            terminator_span: None,
        });
        id
    }

    pub fn switch_to(&mut self, block: BlockId) {
        self.current = block;
    }

    #[must_use]
    pub fn block_args(&self, block: BlockId) -> Vec<ValueId> {
        self.function
            .block(block)
            .map(|block| block.args.clone())
            .unwrap_or_default()
    }

    fn push(&mut self, kind: InstKind, result: Option<ValueId>) -> InstId {
        let inst = Inst {
            id: InstId::fresh(),
            kind,
            result,
            span: self.span,
        };
        let id = inst.id;
        if let Some(block) = self.function.blocks.get_mut(self.current.0) {
            block.insts.push(inst);
        }
        id
    }

    /// Emit an instruction with a result, returning both ids.
    pub fn inst(&mut self, kind: InstKind, ty: Type) -> (InstId, ValueId) {
        let result = self.function.new_value(ty, false);
        (self.push(kind, Some(result)), result)
    }

    /// Emit `kind` verbatim. `result` carries the result type and whether
    /// it is an address.
    pub fn append(&mut self, kind: InstKind, result: Option<(Type, bool)>) -> Option<ValueId> {
        let result = result.map(|(ty, is_address)| self.function.new_value(ty, is_address));
        self.push(kind, result);
        result
    }

    fn value(&mut self, kind: InstKind, ty: Type) -> ValueId {
        self.inst(kind, ty).1
    }

    pub fn float_literal(&mut self, value: f64, ty: Type) -> ValueId {
        self.value(InstKind::FloatLiteral { value }, ty)
    }

    pub fn int_literal(&mut self, value: i64) -> ValueId {
        self.value(InstKind::IntLiteral { value }, Type::int())
    }

    pub fn bool_literal(&mut self, value: bool) -> ValueId {
        self.value(InstKind::BoolLiteral { value }, Type::bool())
    }

    pub fn builtin(&mut self, op: BuiltinOp, args: Vec<ValueId>) -> ValueId {
        let ty = if op.is_comparison() {
            Type::bool()
        } else {
            args.first()
                .map(|arg| self.value_type(*arg))
                .unwrap_or_else(Type::float)
        };
        self.value(InstKind::Builtin { op, args }, ty)
    }

    pub fn function_ref(&mut self, name: impl Into<String>, ty: FunctionType) -> ValueId {
        self.value(InstKind::FunctionRef { name: name.into() }, Type::Function(ty))
    }

    pub fn apply(&mut self, callee: ValueId, args: Vec<ValueId>) -> ValueId {
        self.apply_with_substitutions(callee, args, SubstitutionMap::new())
    }

    pub fn apply_with_substitutions(
        &mut self,
        callee: ValueId,
        args: Vec<ValueId>,
        substitutions: SubstitutionMap,
    ) -> ValueId {
        let result = match self.value_type(callee) {
            Type::Function(function) => function.result.subst(&substitutions),
            _ => Type::unit(),
        };
        self.value(
            InstKind::Apply {
                callee,
                args,
                substitutions,
            },
            result,
        )
    }

    /// Close over the trailing `captured.len()` parameters of `function`.
    pub fn partial_apply(&mut self, function: ValueId, captured: Vec<ValueId>) -> ValueId {
        let ty = match self.value_type(function) {
            Type::Function(mut function) => {
                let keep = function.params.len().saturating_sub(captured.len());
                function.params.truncate(keep);
                function.generic_signature = None;
                Type::Function(function)
            }
            other => other,
        };
        self.value(InstKind::PartialApply { function, captured }, ty)
    }

    pub fn tuple(&mut self, elements: Vec<ValueId>) -> ValueId {
        let ty = Type::tuple(elements.iter().map(|element| self.value_type(*element)).collect());
        self.value(InstKind::Tuple { elements }, ty)
    }

    /// Tuple whose type carries the given element labels.
    pub fn labeled_tuple(&mut self, elements: Vec<(&str, ValueId)>) -> ValueId {
        let ty = Type::Tuple(TupleType {
            elements: elements
                .iter()
                .map(|(label, value)| TupleElement {
                    label: Some((*label).to_string()),
                    ty: self.value_type(*value),
                })
                .collect(),
        });
        let elements = elements.into_iter().map(|(_, value)| value).collect();
        self.value(InstKind::Tuple { elements }, ty)
    }

    pub fn tuple_extract(&mut self, tuple: ValueId, index: usize) -> ValueId {
        let ty = match self.value_type(tuple) {
            Type::Tuple(tuple) => tuple
                .elements
                .get(index)
                .map(|element| element.ty.clone())
                .unwrap_or_else(Type::unit),
            _ => Type::unit(),
        };
        self.value(InstKind::TupleExtract { tuple, index }, ty)
    }

    pub fn struct_value(&mut self, ty: Type, fields: Vec<(String, ValueId)>) -> ValueId {
        self.value(InstKind::Struct { fields }, ty)
    }

    pub fn struct_extract(&mut self, value: ValueId, field: impl Into<String>, ty: Type) -> ValueId {
        self.value(
            InstKind::StructExtract {
                value,
                field: field.into(),
            },
            ty,
        )
    }

    pub fn class_field_load(&mut self, object: ValueId, field: impl Into<String>, ty: Type) -> ValueId {
        self.value(
            InstKind::ClassFieldLoad {
                object,
                field: field.into(),
            },
            ty,
        )
    }

    pub fn enum_create(&mut self, ty: Type, case: impl Into<String>, payload: Option<ValueId>) -> ValueId {
        self.value(
            InstKind::EnumCreate {
                case: case.into(),
                payload,
            },
            ty,
        )
    }

    /// Address of a module global of type `ty`.
    pub fn global_addr(&mut self, global: impl Into<String>, ty: Type) -> ValueId {
        let result = self.function.new_value(ty, true);
        self.push(
            InstKind::GlobalAddr {
                global: global.into(),
            },
            Some(result),
        );
        result
    }

    pub fn load(&mut self, address: ValueId) -> ValueId {
        let ty = self.value_type(address);
        self.value(InstKind::Load { address }, ty)
    }

    pub fn store(&mut self, value: ValueId, address: ValueId) -> InstId {
        self.push(InstKind::Store { value, address }, None)
    }

    pub fn differentiable_function(
        &mut self,
        original: ValueId,
        parameter_indices: IndexSubset,
        derivatives: Option<(ValueId, ValueId)>,
    ) -> (InstId, ValueId) {
        let ty = match self.value_type(original) {
            Type::Function(function) => {
                Type::Function(function.with_differentiability(DifferentiabilityKind::Normal))
            }
            other => other,
        };
        self.inst(
            InstKind::DifferentiableFunction {
                original,
                parameter_indices,
                derivatives,
            },
            ty,
        )
    }

    /// Extract a component of a `@differentiable` function value. The JVP and
    /// VJP types depend on tangent spaces, so the caller supplies `ty`.
    pub fn differentiable_function_extract(
        &mut self,
        function: ValueId,
        extractee: Extractee,
        ty: Option<Type>,
    ) -> ValueId {
        let ty = ty.unwrap_or_else(|| match self.value_type(function) {
            Type::Function(function) => {
                Type::Function(function.with_differentiability(DifferentiabilityKind::NonDifferentiable))
            }
            other => other,
        });
        self.value(
            InstKind::DifferentiableFunctionExtract { function, extractee },
            ty,
        )
    }

    pub fn linear_function(&mut self, original: ValueId, transpose: Option<ValueId>) -> (InstId, ValueId) {
        let ty = match self.value_type(original) {
            Type::Function(function) => {
                Type::Function(function.with_differentiability(DifferentiabilityKind::Linear))
            }
            other => other,
        };
        self.inst(InstKind::LinearFunction { original, transpose }, ty)
    }

    pub fn zero(&mut self, ty: Type) -> ValueId {
        self.value(InstKind::Zero, ty)
    }

    pub fn tangent_add(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.value_type(lhs);
        self.value(InstKind::TangentAdd { lhs, rhs }, ty)
    }

    pub fn trap(&mut self) -> InstId {
        self.push(InstKind::Trap, None)
    }

    fn terminate(&mut self, terminator: Terminator) {
        let span = self.span;
        if let Some(block) = self.function.blocks.get_mut(self.current.0) {
            block.terminator = Some(terminator);
            block.terminator_span = span;
        }
    }

    pub fn ret(&mut self, value: ValueId) {
        self.terminate(Terminator::Return(value));
    }

    pub fn branch(&mut self, target: BlockId, args: Vec<ValueId>) {
        self.terminate(Terminator::Branch { target, args });
    }

    pub fn cond_branch(&mut self, condition: ValueId, then_block: BlockId, else_block: BlockId) {
        self.terminate(Terminator::CondBranch {
            condition,
            then_block,
            then_args: Vec::new(),
            else_block,
            else_args: Vec::new(),
        });
    }

    pub fn switch_enum(&mut self, value: ValueId, cases: Vec<(String, BlockId)>, default: Option<BlockId>) {
        self.terminate(Terminator::SwitchEnum {
            value,
            cases,
            default,
        });
    }

    pub fn unreachable(&mut self) {
        self.terminate(Terminator::Unreachable);
    }

    #[must_use]
    pub fn finish(self) -> IrFunction {
        self.function
    }
}
