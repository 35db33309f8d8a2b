//! Resolved declarations consumed by attribute checking.
//!
//! The front end hands over fully type-checked functions and storage
//! declarations grouped into a [`SourceModule`]; attribute checking mutates
//! only their attribute lists.

mod attributes;
mod module;

pub use attributes::{
    AttrId, AttributeKind, DeclAttribute, DeclNameRef, DifferentiableAttr, DifferentiatingAttr,
    WhereRequirement,
};
pub use module::{NameLookup, SourceModule};

use std::fmt;

use crate::diagnostics::{FileId, Span};
use crate::types::{FunctionParam, FunctionType, GenericSignature, NominalKind, Type};

/// Stable index of a declaration inside its [`SourceModule`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeclId(pub usize);

impl fmt::Display for DeclId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "decl#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum AccessLevel {
    Private,
    FilePrivate,
    #[default]
    Internal,
    Public,
    Open,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Access {
    pub level: AccessLevel,
    /// `@usableFromInline` or `@inlinable`.
    pub usable_from_inline: bool,
}

impl Access {
    #[must_use]
    pub fn new(level: AccessLevel) -> Self {
        Self {
            level,
            usable_from_inline: false,
        }
    }

    #[must_use]
    pub fn usable_from_inline(mut self) -> Self {
        self.usable_from_inline = true;
        self
    }

    /// Visible in the module's ABI.
    #[must_use]
    pub fn is_abi_public(self) -> bool {
        self.level >= AccessLevel::Public || self.usable_from_inline
    }
}

/// Nominal type a member is declared in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeContext {
    pub name: String,
    pub kind: NominalKind,
    pub self_type: Type,
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum DeclContext {
    #[default]
    Module,
    Type(TypeContext),
}

impl DeclContext {
    #[must_use]
    pub fn in_type(self_type: Type) -> Self {
        let (name, kind) = match &self_type {
            Type::Nominal(nominal) => (nominal.name.clone(), nominal.kind),
            other => (other.to_string(), NominalKind::Struct),
        };
        DeclContext::Type(TypeContext {
            name,
            kind,
            self_type,
        })
    }

    #[must_use]
    pub fn type_context(&self) -> Option<&TypeContext> {
        match self {
            DeclContext::Module => None,
            DeclContext::Type(context) => Some(context),
        }
    }

    #[must_use]
    pub fn is_class(&self) -> bool {
        self.type_context()
            .is_some_and(|context| context.kind == NominalKind::Class)
    }

    /// Both at module scope, or both members of the same nominal type.
    #[must_use]
    pub fn same_context(&self, other: &DeclContext) -> bool {
        match (self, other) {
            (DeclContext::Module, DeclContext::Module) => true,
            (DeclContext::Type(lhs), DeclContext::Type(rhs)) => lhs.name == rhs.name,
            _ => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamDecl {
    pub name: String,
    /// Argument label; `None` when it matches `name`.
    pub label: Option<String>,
    pub ty: Type,
    pub inout: bool,
    pub no_derivative: bool,
}

impl ParamDecl {
    #[must_use]
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            label: None,
            ty,
            inout: false,
            no_derivative: false,
        }
    }

    #[must_use]
    pub fn unlabeled(mut self) -> Self {
        self.label = Some("_".into());
        self
    }

    #[must_use]
    pub fn inout(mut self) -> Self {
        self.inout = true;
        self
    }

    #[must_use]
    pub fn no_derivative(mut self) -> Self {
        self.no_derivative = true;
        self
    }

    #[must_use]
    pub fn argument_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }

    fn as_function_param(&self) -> FunctionParam {
        let mut param = FunctionParam::new(self.ty.clone());
        if self.argument_label() != "_" {
            param = param.labeled(self.argument_label());
        }
        if self.inout {
            param = param.inout();
        }
        if self.no_derivative {
            param = param.no_derivative();
        }
        param
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessorKind {
    Getter,
    Setter,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccessorInfo {
    pub storage: DeclId,
    pub kind: AccessorKind,
}

#[derive(Clone, Debug)]
pub struct FunctionDecl {
    pub id: DeclId,
    pub name: String,
    pub params: Vec<ParamDecl>,
    pub result: Type,
    pub generic_signature: Option<GenericSignature>,
    pub context: DeclContext,
    pub is_static: bool,
    pub access: Access,
    pub file: FileId,
    pub span: Option<Span>,
    pub accessor: Option<AccessorInfo>,
    pub attributes: Vec<DeclAttribute>,
}

impl FunctionDecl {
    #[must_use]
    pub fn new(name: impl Into<String>, params: Vec<ParamDecl>, result: Type) -> Self {
        Self {
            id: DeclId(usize::MAX),
            name: name.into(),
            params,
            result,
            generic_signature: None,
            context: DeclContext::Module,
            is_static: false,
            access: Access::default(),
            file: FileId(0),
            span: None,
            accessor: None,
            attributes: Vec::new(),
        }
    }

    #[must_use]
    pub fn in_context(mut self, context: DeclContext) -> Self {
        self.context = context;
        self
    }

    #[must_use]
    pub fn static_member(mut self) -> Self {
        self.is_static = true;
        self
    }

    #[must_use]
    pub fn with_signature(mut self, signature: GenericSignature) -> Self {
        self.generic_signature = Some(signature);
        self
    }

    #[must_use]
    pub fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    #[must_use]
    pub fn in_file(mut self, file: FileId) -> Self {
        self.file = file;
        self
    }

    #[must_use]
    pub fn at(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, attribute: DeclAttribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Member with an implicit `self` parameter.
    #[must_use]
    pub fn is_instance_member(&self) -> bool {
        self.context.type_context().is_some() && !self.is_static
    }

    #[must_use]
    pub fn self_type(&self) -> Option<&Type> {
        self.context
            .type_context()
            .filter(|_| !self.is_static)
            .map(|context| &context.self_type)
    }

    #[must_use]
    pub fn is_setter(&self) -> bool {
        matches!(
            self.accessor,
            Some(AccessorInfo {
                kind: AccessorKind::Setter,
                ..
            })
        )
    }

    #[must_use]
    pub fn is_mutating(&self) -> bool {
        self.attributes
            .iter()
            .any(|attribute| attribute.kind == AttributeKind::Mutating)
    }

    /// The declaration's type; instance members curry `self` first:
    /// `(Self) -> (params) -> Result`.
    #[must_use]
    pub fn interface_type(&self) -> FunctionType {
        let inner = FunctionType::from_params(
            self.params.iter().map(ParamDecl::as_function_param).collect(),
            self.result.clone(),
        );
        let ty = match self.self_type() {
            Some(self_type) => {
                let mut self_param = FunctionParam::new(self_type.clone());
                if self.is_mutating() {
                    self_param = self_param.inout();
                }
                FunctionType::from_params(vec![self_param], Type::Function(inner))
            }
            None => inner,
        };
        ty.with_generic_signature(self.generic_signature.clone())
    }

    /// Name with argument labels, e.g. `foo(x:_:)`.
    #[must_use]
    pub fn full_name(&self) -> String {
        let labels: String = self
            .params
            .iter()
            .map(|param| format!("{}:", param.argument_label()))
            .collect();
        format!("{}({labels})", self.name)
    }

    /// Symbol of the lowered IR function.
    #[must_use]
    pub fn ir_name(&self) -> String {
        let base = match &self.accessor {
            Some(AccessorInfo {
                kind: AccessorKind::Getter,
                ..
            }) => format!("{}.get", self.full_name()),
            Some(AccessorInfo {
                kind: AccessorKind::Setter,
                ..
            }) => format!("{}.set", self.full_name()),
            None => self.full_name(),
        };
        match self.context.type_context() {
            Some(context) => format!("{}.{base}", context.name),
            None => base,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageKind {
    Stored,
    Computed,
    Subscript,
}

/// Property or subscript. Accessors are separate [`FunctionDecl`]s.
#[derive(Clone, Debug)]
pub struct StorageDecl {
    pub id: DeclId,
    pub name: String,
    pub kind: StorageKind,
    pub ty: Type,
    pub indices: Vec<ParamDecl>,
    pub context: DeclContext,
    pub is_static: bool,
    pub access: Access,
    pub file: FileId,
    pub span: Option<Span>,
    pub has_getter: bool,
    pub has_setter: bool,
    pub getter: Option<DeclId>,
    pub setter: Option<DeclId>,
    pub attributes: Vec<DeclAttribute>,
}

impl StorageDecl {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: StorageKind, ty: Type) -> Self {
        Self {
            id: DeclId(usize::MAX),
            name: name.into(),
            kind,
            ty,
            indices: Vec::new(),
            context: DeclContext::Module,
            is_static: false,
            access: Access::default(),
            file: FileId(0),
            span: None,
            has_getter: true,
            has_setter: false,
            getter: None,
            setter: None,
            attributes: Vec::new(),
        }
    }

    #[must_use]
    pub fn stored(name: impl Into<String>, ty: Type) -> Self {
        Self::new(name, StorageKind::Stored, ty)
    }

    #[must_use]
    pub fn computed(name: impl Into<String>, ty: Type) -> Self {
        Self::new(name, StorageKind::Computed, ty)
    }

    #[must_use]
    pub fn subscript(indices: Vec<ParamDecl>, ty: Type) -> Self {
        let mut decl = Self::new("subscript", StorageKind::Subscript, ty);
        decl.indices = indices;
        decl
    }

    #[must_use]
    pub fn in_context(mut self, context: DeclContext) -> Self {
        self.context = context;
        self
    }

    #[must_use]
    pub fn settable(mut self) -> Self {
        self.has_setter = true;
        self
    }

    /// No accessors at all, as for immutable globals.
    #[must_use]
    pub fn without_accessors(mut self) -> Self {
        self.has_getter = false;
        self.has_setter = false;
        self
    }

    #[must_use]
    pub fn in_file(mut self, file: FileId) -> Self {
        self.file = file;
        self
    }

    #[must_use]
    pub fn at(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, attribute: DeclAttribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    #[must_use]
    pub fn is_simple_stored(&self) -> bool {
        self.kind == StorageKind::Stored
    }
}

#[derive(Clone, Debug)]
pub enum Decl {
    Function(FunctionDecl),
    Storage(StorageDecl),
}

impl Decl {
    #[must_use]
    pub fn id(&self) -> DeclId {
        match self {
            Decl::Function(function) => function.id,
            Decl::Storage(storage) => storage.id,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Decl::Function(function) => &function.name,
            Decl::Storage(storage) => &storage.name,
        }
    }

    #[must_use]
    pub fn context(&self) -> &DeclContext {
        match self {
            Decl::Function(function) => &function.context,
            Decl::Storage(storage) => &storage.context,
        }
    }

    #[must_use]
    pub fn span(&self) -> Option<Span> {
        match self {
            Decl::Function(function) => function.span,
            Decl::Storage(storage) => storage.span,
        }
    }

    #[must_use]
    pub fn attributes(&self) -> &[DeclAttribute] {
        match self {
            Decl::Function(function) => &function.attributes,
            Decl::Storage(storage) => &storage.attributes,
        }
    }

    pub fn attributes_mut(&mut self) -> &mut Vec<DeclAttribute> {
        match self {
            Decl::Function(function) => &mut function.attributes,
            Decl::Storage(storage) => &mut storage.attributes,
        }
    }

    #[must_use]
    pub fn as_function(&self) -> Option<&FunctionDecl> {
        match self {
            Decl::Function(function) => Some(function),
            Decl::Storage(_) => None,
        }
    }

    #[must_use]
    pub fn as_storage(&self) -> Option<&StorageDecl> {
        match self {
            Decl::Function(_) => None,
            Decl::Storage(storage) => Some(storage),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point() -> Type {
        Type::structure("Point")
    }

    #[test]
    fn instance_methods_curry_self_first() {
        let method = FunctionDecl::new(
            "scaled",
            vec![ParamDecl::new("factor", Type::float()).unlabeled()],
            point(),
        )
        .in_context(DeclContext::in_type(point()));
        assert!(method.is_instance_member());
        assert_eq!(method.interface_type().to_string(), "(Point) -> (Float) -> Point");
        assert_eq!(method.full_name(), "scaled(_:)");
        assert_eq!(method.ir_name(), "Point.scaled(_:)");

        let factory = method.clone().static_member();
        assert!(!factory.is_instance_member());
        assert_eq!(factory.interface_type().to_string(), "(Float) -> Point");
    }

    #[test]
    fn abi_public_accounts_for_usable_from_inline() {
        assert!(Access::new(AccessLevel::Public).is_abi_public());
        assert!(Access::new(AccessLevel::Open).is_abi_public());
        assert!(!Access::new(AccessLevel::Internal).is_abi_public());
        assert!(Access::new(AccessLevel::Internal)
            .usable_from_inline()
            .is_abi_public());
    }

    #[test]
    fn contexts_compare_by_nominal_name() {
        let lhs = DeclContext::in_type(point());
        let rhs = DeclContext::in_type(point());
        assert!(lhs.same_context(&rhs));
        assert!(!lhs.same_context(&DeclContext::Module));
        assert!(DeclContext::in_type(Type::class("Layer")).is_class());
    }
}
