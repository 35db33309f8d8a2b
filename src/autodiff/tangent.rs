use std::cell::RefCell;
use std::collections::HashMap;

use tracing::trace;

use crate::types::{
    ConformanceLookup, DependentMemberType, DIFFERENTIABLE, FunctionParam, FunctionType,
    GenericSignature, NominalType, TANGENT_VECTOR, TupleElement, TupleType, Type,
};

/// The type perturbations of a value take.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TangentSpace {
    /// The `TangentVector` witness of a `Differentiable` conformance.
    TangentVector(Type),
    /// Tangent spaces of the differentiable elements of a tuple.
    Tuple(TupleType),
}

impl TangentSpace {
    #[must_use]
    pub fn ty(&self) -> Type {
        match self {
            TangentSpace::TangentVector(ty) => ty.clone(),
            TangentSpace::Tuple(tuple) => Type::Tuple(tuple.clone()),
        }
    }

    #[must_use]
    pub fn as_tangent_vector(&self) -> Option<&Type> {
        match self {
            TangentSpace::TangentVector(ty) => Some(ty),
            TangentSpace::Tuple(_) => None,
        }
    }

    #[must_use]
    pub fn as_tuple(&self) -> Option<&TupleType> {
        match self {
            TangentSpace::TangentVector(_) => None,
            TangentSpace::Tuple(tuple) => Some(tuple),
        }
    }
}

type CacheKey = (Type, Option<GenericSignature>);

/// Memoizing tangent-space resolver over a conformance oracle.
pub struct TangentSpaceResolver<'env> {
    env: &'env dyn ConformanceLookup,
    cache: RefCell<HashMap<CacheKey, Option<TangentSpace>>>,
}

impl<'env> TangentSpaceResolver<'env> {
    #[must_use]
    pub fn new(env: &'env dyn ConformanceLookup) -> Self {
        Self {
            env,
            cache: RefCell::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn env(&self) -> &'env dyn ConformanceLookup {
        self.env
    }

    /// Resolve the tangent space of `ty` in the context of `signature`.
    pub fn resolve(
        &self,
        ty: &Type,
        signature: Option<&GenericSignature>,
    ) -> Option<TangentSpace> {
        let key = (ty.clone(), signature.map(GenericSignature::canonical));
        if let Some(cached) = self.cache.borrow().get(&key) {
            return cached.clone();
        }
        let resolved = self.compute(ty, signature);
        trace!(
            target: "autodiff.tangent",
            ty = %ty,
            resolved = resolved.as_ref().map(|space| space.ty().to_string()).as_deref().unwrap_or("<none>"),
            "resolved tangent space"
        );
        self.cache.borrow_mut().insert(key, resolved.clone());
        resolved
    }

    /// Shorthand for `resolve(..).map(|space| space.ty())`.
    pub fn tangent_type(&self, ty: &Type, signature: Option<&GenericSignature>) -> Option<Type> {
        self.resolve(ty, signature).map(|space| space.ty())
    }

    pub fn is_differentiable(&self, ty: &Type, signature: Option<&GenericSignature>) -> bool {
        self.resolve(ty, signature).is_some()
    }

    /// `ty` with each `X.TangentVector` of a concrete `X` replaced by the
    /// tangent of `X`, as left behind by substitution.
    #[must_use]
    pub fn reduce_tangent_members(&self, ty: &Type, signature: Option<&GenericSignature>) -> Type {
        match ty {
            Type::GenericParam(_) => ty.clone(),
            Type::DependentMember(member) => {
                let base = self.reduce_tangent_members(&member.base, signature);
                if member.member == TANGENT_VECTOR && !base.has_type_parameters() {
                    if let Some(tangent) = self.tangent_type(&base, signature) {
                        return tangent;
                    }
                }
                Type::DependentMember(DependentMemberType {
                    base: Box::new(base),
                    member: member.member.clone(),
                })
            }
            Type::Nominal(nominal) => Type::Nominal(NominalType {
                args: nominal
                    .args
                    .iter()
                    .map(|arg| self.reduce_tangent_members(arg, signature))
                    .collect(),
                ..nominal.clone()
            }),
            Type::Tuple(tuple) => Type::Tuple(TupleType {
                elements: tuple
                    .elements
                    .iter()
                    .map(|element| TupleElement {
                        label: element.label.clone(),
                        ty: self.reduce_tangent_members(&element.ty, signature),
                    })
                    .collect(),
            }),
            Type::Function(function) => Type::Function(FunctionType {
                params: function
                    .params
                    .iter()
                    .map(|param| FunctionParam {
                        ty: self.reduce_tangent_members(&param.ty, signature),
                        ..param.clone()
                    })
                    .collect(),
                result: Box::new(self.reduce_tangent_members(&function.result, signature)),
                ..function.clone()
            }),
        }
    }

    /// Number of memoized entries.
    #[must_use]
    pub fn cached_entries(&self) -> usize {
        self.cache.borrow().len()
    }

    fn compute(&self, ty: &Type, signature: Option<&GenericSignature>) -> Option<TangentSpace> {
        if let Type::Tuple(tuple) = ty {
            let mut spaces: Vec<(&TupleElement, TangentSpace)> = tuple
                .elements
                .iter()
                .filter_map(|element| Some((element, self.resolve(&element.ty, signature)?)))
                .collect();
            if spaces.len() < 2 {
                // A lone differentiable element lends the tuple its own space.
                return spaces.pop().map(|(_, space)| space);
            }
            let elements = spaces
                .into_iter()
                .map(|(element, space)| TupleElement {
                    label: element.label.clone(),
                    ty: space.ty(),
                })
                .collect();
            return Some(TangentSpace::Tuple(TupleType { elements }));
        }
        let conformance = self.env.lookup_conformance(ty, DIFFERENTIABLE, signature)?;
        conformance
            .type_witness(TANGENT_VECTOR)
            .cloned()
            .map(TangentSpace::TangentVector)
    }
}

/// Position of each tuple element inside the tuple's tangent, `None` for
/// elements without a tangent space.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TupleTangentLayout {
    pub positions: Vec<Option<usize>>,
    pub tangent_count: usize,
}

impl TupleTangentLayout {
    pub fn of(
        tuple: &TupleType,
        resolver: &TangentSpaceResolver<'_>,
        signature: Option<&GenericSignature>,
    ) -> Self {
        let mut next = 0;
        let positions = tuple
            .elements
            .iter()
            .map(|element| {
                resolver.is_differentiable(&element.ty, signature).then(|| {
                    next += 1;
                    next - 1
                })
            })
            .collect();
        Self {
            positions,
            tangent_count: next,
        }
    }

    /// True when the tuple's tangent is a single element rather than a tuple.
    #[must_use]
    pub fn is_unwrapped(&self) -> bool {
        self.tangent_count == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stdlib::standard_environment;
    use crate::types::{
        ConformanceRecord, GenericParamType, NominalDecl, NominalKind, Requirement,
    };

    #[test]
    fn scalars_are_their_own_tangent() {
        let env = standard_environment();
        let resolver = TangentSpaceResolver::new(&env);
        assert_eq!(
            resolver.resolve(&Type::float(), None),
            Some(TangentSpace::TangentVector(Type::float()))
        );
        assert_eq!(resolver.resolve(&Type::int(), None), None);
    }

    #[test]
    fn tuples_drop_non_differentiable_elements() {
        let env = standard_environment();
        let resolver = TangentSpaceResolver::new(&env);
        let mixed = Type::labeled_tuple(vec![
            ("x", Type::float()),
            ("n", Type::int()),
            ("y", Type::double()),
        ]);
        let space = resolver.resolve(&mixed, None).expect("tuple tangent");
        assert_eq!(space.ty().to_string(), "(x: Float, y: Double)");
        assert!(space.as_tuple().is_some());

        let single = Type::tuple(vec![Type::int(), Type::float()]);
        assert_eq!(
            resolver.resolve(&single, None),
            Some(TangentSpace::TangentVector(Type::float()))
        );
        assert_eq!(resolver.resolve(&Type::tuple(vec![Type::int()]), None), None);
        assert_eq!(resolver.resolve(&Type::unit(), None), None);

        let nested = Type::tuple(vec![
            Type::int(),
            Type::tuple(vec![Type::float(), Type::double()]),
        ]);
        let space = resolver.resolve(&nested, None).expect("nested tangent");
        assert_eq!(space.ty().to_string(), "(Float, Double)");
        assert!(space.as_tuple().is_some());
    }

    #[test]
    fn lone_tuple_element_keeps_its_declared_tangent() {
        let mut env = standard_environment();
        env.declare(
            NominalDecl::new("Sketch", NominalKind::Struct).with_conformance(
                ConformanceRecord::new(DIFFERENTIABLE)
                    .with_witness(TANGENT_VECTOR, Type::structure("Sketch.Delta")),
            ),
        );
        let resolver = TangentSpaceResolver::new(&env);
        let pair = Type::tuple(vec![Type::int(), Type::structure("Sketch")]);
        assert_eq!(
            resolver.resolve(&pair, None),
            Some(TangentSpace::TangentVector(Type::structure("Sketch.Delta")))
        );
        assert_eq!(resolver.resolve(&Type::structure("Sketch.Delta"), None), None);
    }

    #[test]
    fn results_are_memoized_per_signature() {
        let env = standard_environment();
        let resolver = TangentSpaceResolver::new(&env);
        let t = Type::generic("T", 0, 0);
        let param = GenericParamType {
            name: "T".into(),
            depth: 0,
            index: 0,
        };
        let constrained = GenericSignature::new(
            vec![param.clone()],
            vec![Requirement::conformance(t.clone(), DIFFERENTIABLE)],
        );
        let bare = GenericSignature::new(vec![param], Vec::new());
        assert_eq!(
            resolver.tangent_type(&t, Some(&constrained)).map(|ty| ty.to_string()),
            Some("T.TangentVector".to_string())
        );
        assert_eq!(resolver.resolve(&t, Some(&bare)), None);
        let _ = resolver.resolve(&t, Some(&constrained));
        assert_eq!(resolver.cached_entries(), 2);
    }

    #[test]
    fn tuple_layout_skips_non_differentiable_elements() {
        let env = standard_environment();
        let resolver = TangentSpaceResolver::new(&env);
        let Type::Tuple(tuple) = Type::tuple(vec![Type::float(), Type::int(), Type::double()])
        else {
            unreachable!()
        };
        let layout = TupleTangentLayout::of(&tuple, &resolver, None);
        assert_eq!(layout.positions, vec![Some(0), None, Some(1)]);
        assert!(!layout.is_unwrapped());
    }
}
