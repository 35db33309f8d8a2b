use std::collections::BTreeMap;

use super::{
    GenericParamType, GenericSignature, NominalKind, NominalType, Requirement, SubstitutionMap,
    Type,
};

pub const DIFFERENTIABLE: &str = "Differentiable";
pub const ADDITIVE_ARITHMETIC: &str = "AdditiveArithmetic";
pub const TANGENT_VECTOR: &str = "TangentVector";

/// Proof that a type conforms to a protocol, with its associated type witnesses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Conformance {
    pub conforming: Type,
    pub protocol: String,
    type_witnesses: BTreeMap<String, Type>,
}

impl Conformance {
    #[must_use]
    pub fn type_witness(&self, name: &str) -> Option<&Type> {
        self.type_witnesses.get(name)
    }
}

/// Conformance oracle consumed by the tangent-space resolver and the checkers.
pub trait ConformanceLookup {
    fn lookup_conformance(
        &self,
        ty: &Type,
        protocol: &str,
        signature: Option<&GenericSignature>,
    ) -> Option<Conformance>;

    /// Stored properties of a nominal type with generic arguments applied.
    fn stored_properties(&self, _ty: &Type) -> Option<Vec<StoredProperty>> {
        None
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredProperty {
    pub name: String,
    pub ty: Type,
    pub no_derivative: bool,
}

impl StoredProperty {
    #[must_use]
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            no_derivative: false,
        }
    }

    #[must_use]
    pub fn no_derivative(mut self) -> Self {
        self.no_derivative = true;
        self
    }
}

/// A declared conformance, possibly conditional on the nominal's generic arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConformanceRecord {
    pub protocol: String,
    pub conditions: Vec<Requirement>,
    pub type_witnesses: BTreeMap<String, Type>,
}

impl ConformanceRecord {
    #[must_use]
    pub fn new(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            conditions: Vec::new(),
            type_witnesses: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_witness(mut self, name: impl Into<String>, ty: Type) -> Self {
        self.type_witnesses.insert(name.into(), ty);
        self
    }

    #[must_use]
    pub fn with_condition(mut self, requirement: Requirement) -> Self {
        self.conditions.push(requirement);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NominalDecl {
    pub name: String,
    pub kind: NominalKind,
    pub generic_params: Vec<GenericParamType>,
    pub stored_properties: Vec<StoredProperty>,
    pub conformances: Vec<ConformanceRecord>,
}

impl NominalDecl {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: NominalKind) -> Self {
        Self {
            name: name.into(),
            kind,
            generic_params: Vec::new(),
            stored_properties: Vec::new(),
            conformances: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_generic_param(mut self, name: impl Into<String>) -> Self {
        let index = u32::try_from(self.generic_params.len()).unwrap_or(u32::MAX);
        self.generic_params.push(GenericParamType {
            name: name.into(),
            depth: 0,
            index,
        });
        self
    }

    #[must_use]
    pub fn with_property(mut self, property: StoredProperty) -> Self {
        self.stored_properties.push(property);
        self
    }

    #[must_use]
    pub fn with_conformance(mut self, record: ConformanceRecord) -> Self {
        self.conformances.push(record);
        self
    }

    /// The declared type applied to its own generic parameters.
    #[must_use]
    pub fn declared_type(&self) -> Type {
        Type::Nominal(NominalType {
            name: self.name.clone(),
            kind: self.kind,
            args: self
                .generic_params
                .iter()
                .cloned()
                .map(Type::GenericParam)
                .collect(),
        })
    }
}

/// Table of nominal declarations and their conformances.
#[derive(Clone, Debug, Default)]
pub struct TypeEnvironment {
    nominals: BTreeMap<String, NominalDecl>,
}

impl TypeEnvironment {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a nominal declaration.
    pub fn declare(&mut self, decl: NominalDecl) {
        self.nominals.insert(decl.name.clone(), decl);
    }

    #[must_use]
    pub fn nominal(&self, name: &str) -> Option<&NominalDecl> {
        self.nominals.get(name)
    }

    /// Register a struct with stored properties, conforming to `Differentiable`
    /// through a memberwise `<Name>.TangentVector` struct that omits
    /// `@noDerivative` properties.
    pub fn declare_differentiable_struct(&mut self, name: &str, properties: Vec<StoredProperty>) {
        let tangent_name = format!("{name}.{TANGENT_VECTOR}");
        let tangent_type = Type::structure(tangent_name.clone());
        let tangent_properties: Vec<StoredProperty> = properties
            .iter()
            .filter(|property| !property.no_derivative)
            .map(|property| {
                let tangent = self
                    .lookup_conformance(&property.ty, DIFFERENTIABLE, None)
                    .and_then(|conformance| conformance.type_witness(TANGENT_VECTOR).cloned())
                    .unwrap_or_else(|| property.ty.clone());
                StoredProperty::new(property.name.clone(), tangent)
            })
            .collect();

        let mut tangent = NominalDecl::new(tangent_name, NominalKind::Struct)
            .with_conformance(
                ConformanceRecord::new(DIFFERENTIABLE)
                    .with_witness(TANGENT_VECTOR, tangent_type.clone()),
            )
            .with_conformance(ConformanceRecord::new(ADDITIVE_ARITHMETIC));
        tangent.stored_properties = tangent_properties;
        self.declare(tangent);

        let mut decl = NominalDecl::new(name, NominalKind::Struct).with_conformance(
            ConformanceRecord::new(DIFFERENTIABLE).with_witness(TANGENT_VECTOR, tangent_type),
        );
        decl.stored_properties = properties;
        self.declare(decl);
    }

    fn lookup_nominal(
        &self,
        ty: &Type,
        nominal: &NominalType,
        protocol: &str,
        signature: Option<&GenericSignature>,
    ) -> Option<Conformance> {
        let decl = self.nominals.get(&nominal.name)?;
        if decl.kind == NominalKind::Protocol {
            return None;
        }
        let record = decl
            .conformances
            .iter()
            .find(|record| record.protocol == protocol)?;
        let map = substitutions_for(decl, nominal);
        for condition in &record.conditions {
            if !self.holds(&condition.subst(&map), signature) {
                return None;
            }
        }
        Some(Conformance {
            conforming: ty.clone(),
            protocol: protocol.to_string(),
            type_witnesses: record
                .type_witnesses
                .iter()
                .map(|(name, witness)| (name.clone(), self.reduce_members(&witness.subst(&map), signature)))
                .collect(),
        })
    }

    fn lookup_abstract(
        &self,
        ty: &Type,
        protocol: &str,
        signature: Option<&GenericSignature>,
    ) -> Option<Conformance> {
        let signature = signature?;
        if let Some(concrete) = signature.concrete_type(ty) {
            return self.lookup_conformance(concrete, protocol, Some(signature));
        }
        let implied = match ty {
            Type::DependentMember(member) if member.member == TANGENT_VECTOR => {
                (protocol == DIFFERENTIABLE || protocol == ADDITIVE_ARITHMETIC)
                    && self
                        .lookup_conformance(&member.base, DIFFERENTIABLE, Some(signature))
                        .is_some()
            }
            _ => false,
        };
        if !implied && !signature.states_conformance(ty, protocol) {
            return None;
        }
        let mut type_witnesses = BTreeMap::new();
        if protocol == DIFFERENTIABLE {
            type_witnesses.insert(TANGENT_VECTOR.to_string(), abstract_tangent(ty, signature));
        }
        Some(Conformance {
            conforming: ty.clone(),
            protocol: protocol.to_string(),
            type_witnesses,
        })
    }

    /// Resolve `X.Member` of a concrete `X` through its `Differentiable`
    /// conformance.
    fn reduce_members(&self, ty: &Type, signature: Option<&GenericSignature>) -> Type {
        match ty {
            Type::DependentMember(member) if !member.base.has_type_parameters() => self
                .lookup_conformance(&member.base, DIFFERENTIABLE, signature)
                .and_then(|conformance| conformance.type_witness(&member.member).cloned())
                .unwrap_or_else(|| ty.clone()),
            Type::Nominal(nominal) => Type::Nominal(NominalType {
                args: nominal
                    .args
                    .iter()
                    .map(|arg| self.reduce_members(arg, signature))
                    .collect(),
                ..nominal.clone()
            }),
            _ => ty.clone(),
        }
    }

    fn holds(&self, requirement: &Requirement, signature: Option<&GenericSignature>) -> bool {
        match requirement {
            Requirement::Conformance { subject, protocol } => self
                .lookup_conformance(subject, protocol, signature)
                .is_some(),
            Requirement::SameType { first, second } => {
                let reduce = |ty: &Type| {
                    signature
                        .and_then(|signature| signature.concrete_type(ty))
                        .cloned()
                        .unwrap_or_else(|| ty.clone())
                };
                reduce(first) == reduce(second)
            }
            Requirement::Superclass { .. } | Requirement::Layout { .. } => signature
                .is_some_and(|signature| signature.requirements().contains(requirement)),
        }
    }
}

impl ConformanceLookup for TypeEnvironment {
    fn lookup_conformance(
        &self,
        ty: &Type,
        protocol: &str,
        signature: Option<&GenericSignature>,
    ) -> Option<Conformance> {
        match ty {
            Type::Nominal(nominal) => self.lookup_nominal(ty, nominal, protocol, signature),
            Type::GenericParam(_) | Type::DependentMember(_) => {
                self.lookup_abstract(ty, protocol, signature)
            }
            Type::Tuple(_) | Type::Function(_) => None,
        }
    }

    fn stored_properties(&self, ty: &Type) -> Option<Vec<StoredProperty>> {
        let nominal = ty.as_nominal()?;
        let decl = self.nominals.get(&nominal.name)?;
        let map = substitutions_for(decl, nominal);
        Some(
            decl.stored_properties
                .iter()
                .map(|property| StoredProperty {
                    ty: property.ty.subst(&map),
                    ..property.clone()
                })
                .collect(),
        )
    }
}

/// `T.TangentVector` for a type parameter; a tangent vector is its own tangent.
fn abstract_tangent(ty: &Type, signature: &GenericSignature) -> Type {
    let tangent = match ty {
        Type::DependentMember(member) if member.member == TANGENT_VECTOR => ty.clone(),
        _ => Type::member(ty.clone(), TANGENT_VECTOR),
    };
    signature.concrete_type(&tangent).cloned().unwrap_or(tangent)
}

fn substitutions_for(decl: &NominalDecl, nominal: &NominalType) -> SubstitutionMap {
    decl.generic_params
        .iter()
        .zip(&nominal.args)
        .map(|(param, arg)| ((param.depth, param.index), arg.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stdlib::standard_environment;

    fn t() -> Type {
        Type::generic("T", 0, 0)
    }

    fn signature(requirements: Vec<Requirement>) -> GenericSignature {
        GenericSignature::new(
            vec![GenericParamType {
                name: "T".into(),
                depth: 0,
                index: 0,
            }],
            requirements,
        )
    }

    #[test]
    fn scalar_conformances_expose_tangent_witness() {
        let env = standard_environment();
        let float = env
            .lookup_conformance(&Type::float(), DIFFERENTIABLE, None)
            .expect("Float is differentiable");
        assert_eq!(float.type_witness(TANGENT_VECTOR), Some(&Type::float()));
        assert!(env.lookup_conformance(&Type::int(), DIFFERENTIABLE, None).is_none());
    }

    #[test]
    fn existentials_tuples_and_functions_never_conform() {
        let env = standard_environment();
        for ty in [
            Type::existential("Differentiable"),
            Type::tuple(vec![Type::float(), Type::float()]),
            Type::function(vec![Type::float()], Type::float()),
        ] {
            assert!(env.lookup_conformance(&ty, DIFFERENTIABLE, None).is_none(), "{ty}");
        }
    }

    #[test]
    fn type_parameters_conform_through_the_signature() {
        let env = standard_environment();
        let constrained = signature(vec![Requirement::conformance(t(), DIFFERENTIABLE)]);
        let conformance = env
            .lookup_conformance(&t(), DIFFERENTIABLE, Some(&constrained))
            .expect("T: Differentiable");
        let tangent = conformance.type_witness(TANGENT_VECTOR).expect("witness");
        assert_eq!(tangent.to_string(), "T.TangentVector");

        let nested = env
            .lookup_conformance(tangent, DIFFERENTIABLE, Some(&constrained))
            .expect("T.TangentVector: Differentiable");
        assert_eq!(nested.type_witness(TANGENT_VECTOR), Some(tangent));
        assert!(env
            .lookup_conformance(tangent, ADDITIVE_ARITHMETIC, Some(&constrained))
            .is_some());
        assert!(env.lookup_conformance(&t(), DIFFERENTIABLE, Some(&signature(Vec::new()))).is_none());
        assert!(env.lookup_conformance(&t(), DIFFERENTIABLE, None).is_none());
    }

    #[test]
    fn conditional_conformance_checks_arguments() {
        let env = standard_environment();
        let floats = env
            .lookup_conformance(&Type::array(Type::float()), DIFFERENTIABLE, None)
            .expect("Array<Float>");
        assert_eq!(
            floats.type_witness(TANGENT_VECTOR).map(ToString::to_string),
            Some("Array.DifferentiableView<Float>".to_string())
        );
        assert!(env
            .lookup_conformance(&Type::array(Type::int()), DIFFERENTIABLE, None)
            .is_none());
    }

    #[test]
    fn differentiable_structs_get_memberwise_tangents() {
        let mut env = standard_environment();
        env.declare_differentiable_struct(
            "Model",
            vec![
                StoredProperty::new("weight", Type::float()),
                StoredProperty::new("steps", Type::int()).no_derivative(),
            ],
        );
        let model = Type::structure("Model");
        let tangent = env
            .lookup_conformance(&model, DIFFERENTIABLE, None)
            .and_then(|conformance| conformance.type_witness(TANGENT_VECTOR).cloned())
            .expect("tangent");
        let fields = env.stored_properties(&tangent).expect("tangent fields");
        assert_eq!(fields, vec![StoredProperty::new("weight", Type::float())]);
        assert_eq!(env.stored_properties(&model).map(|fields| fields.len()), Some(2));
    }
}
