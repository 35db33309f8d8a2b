use std::fmt;

use super::{ConformanceLookup, GenericParamType, SubstitutionMap, Type};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LayoutConstraint {
    Class,
    Trivial,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequirementKind {
    Conformance,
    Superclass,
    SameType,
    Layout,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Requirement {
    Conformance { subject: Type, protocol: String },
    Superclass { subject: Type, class: Type },
    SameType { first: Type, second: Type },
    Layout { subject: Type, layout: LayoutConstraint },
}

impl Requirement {
    #[must_use]
    pub fn conformance(subject: Type, protocol: impl Into<String>) -> Self {
        Requirement::Conformance {
            subject,
            protocol: protocol.into(),
        }
    }

    #[must_use]
    pub fn same_type(first: Type, second: Type) -> Self {
        Requirement::SameType { first, second }
    }

    #[must_use]
    pub fn kind(&self) -> RequirementKind {
        match self {
            Requirement::Conformance { .. } => RequirementKind::Conformance,
            Requirement::Superclass { .. } => RequirementKind::Superclass,
            Requirement::SameType { .. } => RequirementKind::SameType,
            Requirement::Layout { .. } => RequirementKind::Layout,
        }
    }

    /// The requirement with generic parameters replaced through `map`.
    #[must_use]
    pub fn subst(&self, map: &SubstitutionMap) -> Requirement {
        match self {
            Requirement::Conformance { subject, protocol } => Requirement::Conformance {
                subject: subject.subst(map),
                protocol: protocol.clone(),
            },
            Requirement::Superclass { subject, class } => Requirement::Superclass {
                subject: subject.subst(map),
                class: class.subst(map),
            },
            Requirement::SameType { first, second } => Requirement::SameType {
                first: first.subst(map),
                second: second.subst(map),
            },
            Requirement::Layout { subject, layout } => Requirement::Layout {
                subject: subject.subst(map),
                layout: *layout,
            },
        }
    }

    fn canonical(&self) -> Requirement {
        match self {
            Requirement::SameType { first, second } if second < first => Requirement::SameType {
                first: second.clone(),
                second: first.clone(),
            },
            other => other.clone(),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::Conformance { subject, protocol } => write!(f, "{subject}: {protocol}"),
            Requirement::Superclass { subject, class } => write!(f, "{subject}: {class}"),
            Requirement::SameType { first, second } => write!(f, "{first} == {second}"),
            Requirement::Layout { subject, layout } => {
                let layout = match layout {
                    LayoutConstraint::Class => "AnyObject",
                    LayoutConstraint::Trivial => "_Trivial",
                };
                write!(f, "{subject}: {layout}")
            }
        }
    }
}

/// Generic parameters plus requirements. Equality on two signatures is only
/// meaningful after `canonical()`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GenericSignature {
    params: Vec<GenericParamType>,
    requirements: Vec<Requirement>,
}

impl GenericSignature {
    #[must_use]
    pub fn new(params: Vec<GenericParamType>, requirements: Vec<Requirement>) -> Self {
        Self {
            params,
            requirements,
        }
        .canonical()
    }

    #[must_use]
    pub fn params(&self) -> &[GenericParamType] {
        &self.params
    }

    #[must_use]
    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Parameters sorted by position, requirements normalized, sorted and deduplicated.
    #[must_use]
    pub fn canonical(&self) -> GenericSignature {
        let mut params = self.params.clone();
        params.sort();
        params.dedup();
        let mut requirements: Vec<Requirement> =
            self.requirements.iter().map(Requirement::canonical).collect();
        requirements.sort();
        requirements.dedup();
        GenericSignature {
            params,
            requirements,
        }
    }

    /// Build a new canonical signature from `self` plus `extra` requirements.
    #[must_use]
    pub fn with_requirements(&self, extra: impl IntoIterator<Item = Requirement>) -> Self {
        let mut requirements = self.requirements.clone();
        requirements.extend(extra);
        GenericSignature {
            params: self.params.clone(),
            requirements,
        }
        .canonical()
    }

    /// Concrete type bound to `ty` through a same-type requirement, if any.
    #[must_use]
    pub fn concrete_type(&self, ty: &Type) -> Option<&Type> {
        self.requirements.iter().find_map(|requirement| match requirement {
            Requirement::SameType { first, second } if first == ty && !second.has_type_parameters() => {
                Some(second)
            }
            Requirement::SameType { first, second } if second == ty && !first.has_type_parameters() => {
                Some(first)
            }
            _ => None,
        })
    }

    /// Returns true when `ty` is stated to conform to `protocol`.
    #[must_use]
    pub fn states_conformance(&self, ty: &Type, protocol: &str) -> bool {
        self.requirements.iter().any(|requirement| {
            matches!(requirement, Requirement::Conformance { subject, protocol: p } if subject == ty && p == protocol)
        })
    }

    /// Returns true when `requirement` holds in this signature's context.
    #[must_use]
    pub fn satisfies(&self, requirement: &Requirement, env: &dyn ConformanceLookup) -> bool {
        let canonical = requirement.canonical();
        if self.requirements.contains(&canonical) {
            return true;
        }
        match requirement {
            Requirement::Conformance { subject, protocol } => env
                .lookup_conformance(subject, protocol, Some(self))
                .is_some(),
            Requirement::SameType { first, second } => {
                self.reduce(first) == self.reduce(second)
            }
            Requirement::Superclass { .. } | Requirement::Layout { .. } => false,
        }
    }

    /// Returns true when every requirement of `self` holds in `context`.
    #[must_use]
    pub fn is_satisfied_by(&self, context: &GenericSignature, env: &dyn ConformanceLookup) -> bool {
        self.requirements
            .iter()
            .all(|requirement| context.satisfies(requirement, env))
    }

    /// Requirements of `self` that do not hold in `context`.
    #[must_use]
    pub fn unsatisfied_in(
        &self,
        context: Option<&GenericSignature>,
        env: &dyn ConformanceLookup,
    ) -> Vec<Requirement> {
        let empty = GenericSignature::default();
        let context = context.unwrap_or(&empty);
        self.requirements
            .iter()
            .filter(|requirement| !context.satisfies(requirement, env))
            .cloned()
            .collect()
    }

    fn reduce(&self, ty: &Type) -> Type {
        self.concrete_type(ty).cloned().unwrap_or_else(|| ty.clone())
    }
}

impl fmt::Display for GenericSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<")?;
        for (index, param) in self.params.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            f.write_str(&param.name)?;
        }
        if !self.requirements.is_empty() {
            f.write_str(" where ")?;
            for (index, requirement) in self.requirements.iter().enumerate() {
                if index > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{requirement}")?;
            }
        }
        f.write_str(">")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stdlib::standard_environment;
    use crate::types::DIFFERENTIABLE;

    fn param(name: &str, index: u32) -> GenericParamType {
        GenericParamType {
            name: name.into(),
            depth: 0,
            index,
        }
    }

    #[test]
    fn canonical_form_ignores_order_and_spelling() {
        let t = Type::generic("T", 0, 0);
        let u = Type::generic("U", 0, 0);
        let lhs = GenericSignature::new(
            vec![param("T", 0)],
            vec![
                Requirement::same_type(Type::float(), Type::member(t.clone(), "TangentVector")),
                Requirement::conformance(t.clone(), DIFFERENTIABLE),
            ],
        );
        let rhs = GenericSignature::new(
            vec![param("U", 0)],
            vec![
                Requirement::conformance(u.clone(), DIFFERENTIABLE),
                Requirement::conformance(u.clone(), DIFFERENTIABLE),
                Requirement::same_type(Type::member(u, "TangentVector"), Type::float()),
            ],
        );
        assert_eq!(lhs, rhs);
        assert_eq!(rhs.requirements().len(), 2);
    }

    #[test]
    fn with_requirements_extends_and_canonicalizes() {
        let t = Type::generic("T", 0, 0);
        let base = GenericSignature::new(vec![param("T", 0)], Vec::new());
        let extended = base.with_requirements([Requirement::conformance(t.clone(), DIFFERENTIABLE)]);
        assert!(extended.states_conformance(&t, DIFFERENTIABLE));
        assert_eq!(extended.to_string(), "<T where T: Differentiable>");
        assert_ne!(base, extended);
    }

    #[test]
    fn satisfaction_uses_concrete_same_type_bindings() {
        let env = standard_environment();
        let t = Type::generic("T", 0, 0);
        let concrete = GenericSignature::new(
            vec![param("T", 0)],
            vec![Requirement::same_type(t.clone(), Type::float())],
        );
        let needs = Requirement::conformance(t.clone(), DIFFERENTIABLE);
        assert!(concrete.satisfies(&needs, &env));
        assert_eq!(concrete.concrete_type(&t), Some(&Type::float()));

        let bare = GenericSignature::new(vec![param("T", 0)], Vec::new());
        assert!(!bare.satisfies(&needs, &env));
        let derivative = bare.with_requirements([needs.clone()]);
        assert_eq!(derivative.unsatisfied_in(Some(&bare), &env), vec![needs]);
        assert!(bare.is_satisfied_by(&derivative, &env));
    }
}
