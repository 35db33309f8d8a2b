//! Resolved type model consumed by attribute checking and synthesis.
//!
//! Types arrive fully resolved from the front end. Generic parameters compare
//! by `(depth, index)` only, so two declarations spelling `T` and `U` for the
//! same position produce equal types.

mod conformance;
mod signature;

pub use conformance::{
    ADDITIVE_ARITHMETIC, Conformance, ConformanceLookup, ConformanceRecord, DIFFERENTIABLE,
    NominalDecl, StoredProperty, TANGENT_VECTOR, TypeEnvironment,
};
pub use signature::{GenericSignature, LayoutConstraint, Requirement, RequirementKind};

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::autodiff::DifferentiabilityKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NominalKind {
    Struct,
    Enum,
    Class,
    Protocol,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Type {
    Nominal(NominalType),
    Tuple(TupleType),
    Function(FunctionType),
    GenericParam(GenericParamType),
    DependentMember(DependentMemberType),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NominalType {
    pub name: String,
    pub kind: NominalKind,
    pub args: Vec<Type>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TupleElement {
    pub label: Option<String>,
    pub ty: Type,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TupleType {
    pub elements: Vec<TupleElement>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParamConvention {
    Owned,
    Inout,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionParam {
    pub label: Option<String>,
    pub ty: Type,
    pub convention: ParamConvention,
    pub no_derivative: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionType {
    pub params: Vec<FunctionParam>,
    pub result: Box<Type>,
    pub differentiability: DifferentiabilityKind,
    pub generic_signature: Option<GenericSignature>,
}

/// Generic parameter `τ_depth_index`; `name` is display sugar.
#[derive(Clone, Debug)]
pub struct GenericParamType {
    pub name: String,
    pub depth: u32,
    pub index: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DependentMemberType {
    pub base: Box<Type>,
    pub member: String,
}

/// Replacement types for generic parameters, keyed by `(depth, index)`.
pub type SubstitutionMap = BTreeMap<(u32, u32), Type>;

impl Type {
    #[must_use]
    pub fn named(name: impl Into<String>, kind: NominalKind) -> Self {
        Type::Nominal(NominalType {
            name: name.into(),
            kind,
            args: Vec::new(),
        })
    }

    #[must_use]
    pub fn structure(name: impl Into<String>) -> Self {
        Self::named(name, NominalKind::Struct)
    }

    #[must_use]
    pub fn class(name: impl Into<String>) -> Self {
        Self::named(name, NominalKind::Class)
    }

    #[must_use]
    pub fn enumeration(name: impl Into<String>) -> Self {
        Self::named(name, NominalKind::Enum)
    }

    #[must_use]
    pub fn existential(protocol: impl Into<String>) -> Self {
        Self::named(protocol, NominalKind::Protocol)
    }

    #[must_use]
    pub fn generic_struct(name: impl Into<String>, args: Vec<Type>) -> Self {
        Type::Nominal(NominalType {
            name: name.into(),
            kind: NominalKind::Struct,
            args,
        })
    }

    #[must_use]
    pub fn float() -> Self {
        Self::structure("Float")
    }

    #[must_use]
    pub fn double() -> Self {
        Self::structure("Double")
    }

    #[must_use]
    pub fn int() -> Self {
        Self::structure("Int")
    }

    #[must_use]
    pub fn bool() -> Self {
        Self::structure("Bool")
    }

    #[must_use]
    pub fn array(element: Type) -> Self {
        Self::generic_struct("Array", vec![element])
    }

    #[must_use]
    pub fn optional(wrapped: Type) -> Self {
        Type::Nominal(NominalType {
            name: "Optional".into(),
            kind: NominalKind::Enum,
            args: vec![wrapped],
        })
    }

    #[must_use]
    pub fn unit() -> Self {
        Type::Tuple(TupleType {
            elements: Vec::new(),
        })
    }

    #[must_use]
    pub fn generic(name: impl Into<String>, depth: u32, index: u32) -> Self {
        Type::GenericParam(GenericParamType {
            name: name.into(),
            depth,
            index,
        })
    }

    #[must_use]
    pub fn member(base: Type, member: impl Into<String>) -> Self {
        Type::DependentMember(DependentMemberType {
            base: Box::new(base),
            member: member.into(),
        })
    }

    /// Unlabeled tuple of `elements`.
    #[must_use]
    pub fn tuple(elements: Vec<Type>) -> Self {
        Type::Tuple(TupleType {
            elements: elements
                .into_iter()
                .map(|ty| TupleElement { label: None, ty })
                .collect(),
        })
    }

    /// Tuple of `elements`, except that a single element is returned as-is.
    #[must_use]
    pub fn tuple_or_single(mut elements: Vec<Type>) -> Self {
        if elements.len() == 1 {
            elements.remove(0)
        } else {
            Self::tuple(elements)
        }
    }

    #[must_use]
    pub fn labeled_tuple(elements: Vec<(&str, Type)>) -> Self {
        Type::Tuple(TupleType {
            elements: elements
                .into_iter()
                .map(|(label, ty)| TupleElement {
                    label: Some(label.to_string()),
                    ty,
                })
                .collect(),
        })
    }

    #[must_use]
    pub fn function(params: Vec<Type>, result: Type) -> Self {
        Type::Function(FunctionType::new(params, result))
    }

    #[must_use]
    pub fn is_unit(&self) -> bool {
        matches!(self, Type::Tuple(tuple) if tuple.elements.is_empty())
    }

    #[must_use]
    pub fn is_class(&self) -> bool {
        matches!(self, Type::Nominal(nominal) if nominal.kind == NominalKind::Class)
    }

    #[must_use]
    pub fn is_existential(&self) -> bool {
        matches!(self, Type::Nominal(nominal) if nominal.kind == NominalKind::Protocol)
    }

    #[must_use]
    pub fn is_function(&self) -> bool {
        matches!(self, Type::Function(_))
    }

    #[must_use]
    pub fn is_enum(&self) -> bool {
        matches!(self, Type::Nominal(nominal) if nominal.kind == NominalKind::Enum)
    }

    #[must_use]
    pub fn as_function(&self) -> Option<&FunctionType> {
        match self {
            Type::Function(function) => Some(function),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_tuple(&self) -> Option<&TupleType> {
        match self {
            Type::Tuple(tuple) => Some(tuple),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_nominal(&self) -> Option<&NominalType> {
        match self {
            Type::Nominal(nominal) => Some(nominal),
            _ => None,
        }
    }

    #[must_use]
    pub fn has_type_parameters(&self) -> bool {
        match self {
            Type::GenericParam(_) | Type::DependentMember(_) => true,
            Type::Nominal(nominal) => nominal.args.iter().any(Type::has_type_parameters),
            Type::Tuple(tuple) => tuple
                .elements
                .iter()
                .any(|element| element.ty.has_type_parameters()),
            Type::Function(function) => {
                function.result.has_type_parameters()
                    || function
                        .params
                        .iter()
                        .any(|param| param.ty.has_type_parameters())
            }
        }
    }

    /// Replace generic parameters found in `map`; others are left untouched.
    #[must_use]
    pub fn subst(&self, map: &SubstitutionMap) -> Type {
        match self {
            Type::GenericParam(param) => map
                .get(&(param.depth, param.index))
                .cloned()
                .unwrap_or_else(|| self.clone()),
            Type::DependentMember(member) => Type::DependentMember(DependentMemberType {
                base: Box::new(member.base.subst(map)),
                member: member.member.clone(),
            }),
            Type::Nominal(nominal) => Type::Nominal(NominalType {
                name: nominal.name.clone(),
                kind: nominal.kind,
                args: nominal.args.iter().map(|arg| arg.subst(map)).collect(),
            }),
            Type::Tuple(tuple) => Type::Tuple(TupleType {
                elements: tuple
                    .elements
                    .iter()
                    .map(|element| TupleElement {
                        label: element.label.clone(),
                        ty: element.ty.subst(map),
                    })
                    .collect(),
            }),
            Type::Function(function) => Type::Function(FunctionType {
                params: function
                    .params
                    .iter()
                    .map(|param| FunctionParam {
                        ty: param.ty.subst(map),
                        ..param.clone()
                    })
                    .collect(),
                result: Box::new(function.result.subst(map)),
                differentiability: function.differentiability,
                generic_signature: function.generic_signature.clone(),
            }),
        }
    }

    /// Structural equality that disregards tuple-element and argument labels
    /// and the generic signatures attached to function types.
    #[must_use]
    pub fn matches_ignoring_labels(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::Tuple(lhs), Type::Tuple(rhs)) => {
                lhs.elements.len() == rhs.elements.len()
                    && lhs
                        .elements
                        .iter()
                        .zip(&rhs.elements)
                        .all(|(l, r)| l.ty.matches_ignoring_labels(&r.ty))
            }
            (Type::Function(lhs), Type::Function(rhs)) => {
                lhs.differentiability == rhs.differentiability
                    && lhs.params.len() == rhs.params.len()
                    && lhs.params.iter().zip(&rhs.params).all(|(l, r)| {
                        l.convention == r.convention && l.ty.matches_ignoring_labels(&r.ty)
                    })
                    && lhs.result.matches_ignoring_labels(&rhs.result)
            }
            (Type::Nominal(lhs), Type::Nominal(rhs)) => {
                lhs.name == rhs.name
                    && lhs.kind == rhs.kind
                    && lhs.args.len() == rhs.args.len()
                    && lhs
                        .args
                        .iter()
                        .zip(&rhs.args)
                        .all(|(l, r)| l.matches_ignoring_labels(r))
            }
            (Type::DependentMember(lhs), Type::DependentMember(rhs)) => {
                lhs.member == rhs.member && lhs.base.matches_ignoring_labels(&rhs.base)
            }
            _ => self == other,
        }
    }
}

impl FunctionType {
    #[must_use]
    pub fn new(params: Vec<Type>, result: Type) -> Self {
        Self {
            params: params.into_iter().map(FunctionParam::new).collect(),
            result: Box::new(result),
            differentiability: DifferentiabilityKind::NonDifferentiable,
            generic_signature: None,
        }
    }

    #[must_use]
    pub fn from_params(params: Vec<FunctionParam>, result: Type) -> Self {
        Self {
            params,
            result: Box::new(result),
            differentiability: DifferentiabilityKind::NonDifferentiable,
            generic_signature: None,
        }
    }

    #[must_use]
    pub fn with_differentiability(mut self, kind: DifferentiabilityKind) -> Self {
        self.differentiability = kind;
        self
    }

    #[must_use]
    pub fn with_generic_signature(mut self, signature: Option<GenericSignature>) -> Self {
        self.generic_signature = signature;
        self
    }

    #[must_use]
    pub fn param_types(&self) -> Vec<Type> {
        self.params.iter().map(|param| param.ty.clone()).collect()
    }

    /// Result of the innermost curried layer.
    #[must_use]
    pub fn innermost_result(&self) -> &Type {
        match self.result.as_function() {
            Some(inner) => inner.innermost_result(),
            None => &self.result,
        }
    }

    /// Parameters of every curried layer, innermost layer first.
    #[must_use]
    pub fn flattened_params(&self) -> Vec<&FunctionParam> {
        let mut layers = vec![self];
        let mut current = self;
        while let Some(inner) = current.result.as_function() {
            layers.push(inner);
            current = inner;
        }
        layers
            .into_iter()
            .rev()
            .flat_map(|layer| layer.params.iter())
            .collect()
    }
}

impl FunctionParam {
    #[must_use]
    pub fn new(ty: Type) -> Self {
        Self {
            label: None,
            ty,
            convention: ParamConvention::Owned,
            no_derivative: false,
        }
    }

    #[must_use]
    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn inout(mut self) -> Self {
        self.convention = ParamConvention::Inout;
        self
    }

    #[must_use]
    pub fn no_derivative(mut self) -> Self {
        self.no_derivative = true;
        self
    }
}

impl TupleType {
    #[must_use]
    pub fn element_types(&self) -> Vec<Type> {
        self.elements
            .iter()
            .map(|element| element.ty.clone())
            .collect()
    }
}

impl PartialEq for GenericParamType {
    fn eq(&self, other: &Self) -> bool {
        self.depth == other.depth && self.index == other.index
    }
}

impl Eq for GenericParamType {}

impl Hash for GenericParamType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.depth.hash(state);
        self.index.hash(state);
    }
}

impl PartialOrd for GenericParamType {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GenericParamType {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.depth, self.index).cmp(&(other.depth, other.index))
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Nominal(nominal) => {
                f.write_str(&nominal.name)?;
                if !nominal.args.is_empty() {
                    f.write_str("<")?;
                    write_joined(f, &nominal.args)?;
                    f.write_str(">")?;
                }
                Ok(())
            }
            Type::Tuple(tuple) => write!(f, "{tuple}"),
            Type::Function(function) => write!(f, "{function}"),
            Type::GenericParam(param) => f.write_str(&param.name),
            Type::DependentMember(member) => write!(f, "{}.{}", member.base, member.member),
        }
    }
}

impl fmt::Display for TupleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (index, element) in self.elements.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            if let Some(label) = &element.label {
                write!(f, "{label}: ")?;
            }
            write!(f, "{}", element.ty)?;
        }
        f.write_str(")")
    }
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(signature) = &self.generic_signature {
            write!(f, "{signature} ")?;
        }
        match self.differentiability {
            DifferentiabilityKind::NonDifferentiable => {}
            DifferentiabilityKind::Normal => f.write_str("@differentiable ")?,
            DifferentiabilityKind::Linear => f.write_str("@differentiable(linear) ")?,
        }
        f.write_str("(")?;
        for (index, param) in self.params.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            if param.no_derivative {
                f.write_str("@noDerivative ")?;
            }
            if param.convention == ParamConvention::Inout {
                f.write_str("inout ")?;
            }
            write!(f, "{}", param.ty)?;
        }
        write!(f, ") -> {}", self.result)
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, types: &[Type]) -> fmt::Result {
    for (index, ty) in types.iter().enumerate() {
        if index > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{ty}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_params_compare_by_position() {
        let t = Type::generic("T", 0, 0);
        let u = Type::generic("U", 0, 0);
        assert_eq!(t, u);
        assert_ne!(t, Type::generic("T", 0, 1));
    }

    #[test]
    fn display_renders_nested_types() {
        let pullback = Type::function(vec![Type::float()], Type::tuple(vec![Type::float(), Type::double()]));
        let vjp = Type::function(
            vec![Type::float(), Type::double()],
            Type::labeled_tuple(vec![("value", Type::float()), ("pullback", pullback)]),
        );
        assert_eq!(
            vjp.to_string(),
            "(Float, Double) -> (value: Float, pullback: (Float) -> (Float, Double))"
        );
        assert_eq!(
            Type::member(Type::generic("T", 0, 0), "TangentVector").to_string(),
            "T.TangentVector"
        );
        assert_eq!(Type::array(Type::float()).to_string(), "Array<Float>");
    }

    #[test]
    fn label_insensitive_matching_recurses() {
        let labeled = Type::labeled_tuple(vec![("value", Type::float()), ("pullback", Type::function(vec![Type::float()], Type::float()))]);
        let plain = Type::tuple(vec![Type::float(), Type::function(vec![Type::float()], Type::float())]);
        assert!(labeled.matches_ignoring_labels(&plain));
        assert_ne!(labeled, plain);

        let swapped = Type::tuple(vec![Type::double(), Type::float()]);
        assert!(!Type::tuple(vec![Type::float(), Type::double()]).matches_ignoring_labels(&swapped));
    }

    #[test]
    fn subst_replaces_parameters_and_members() {
        let t = Type::generic("T", 0, 0);
        let ty = Type::function(vec![t.clone()], Type::member(t, "TangentVector"));
        let map = SubstitutionMap::from([((0, 0), Type::float())]);
        assert_eq!(
            ty.subst(&map).to_string(),
            "(Float) -> Float.TangentVector"
        );
        assert!(!ty.subst(&map).has_type_parameters());
    }

    #[test]
    fn flattened_params_list_inner_layer_first() {
        let inner = Type::function(vec![Type::float(), Type::double()], Type::float());
        let curried = FunctionType::new(vec![Type::structure("Point")], inner);
        let names: Vec<String> = curried
            .flattened_params()
            .iter()
            .map(|param| param.ty.to_string())
            .collect();
        assert_eq!(names, ["Float", "Double", "Point"]);
        assert_eq!(curried.innermost_result(), &Type::float());
    }

    #[test]
    fn tuple_or_single_unwraps_one_element() {
        assert_eq!(Type::tuple_or_single(vec![Type::float()]), Type::float());
        assert_eq!(
            Type::tuple_or_single(vec![Type::float(), Type::float()]).to_string(),
            "(Float, Float)"
        );
        assert!(Type::tuple_or_single(Vec::new()).is_unit());
    }
}
