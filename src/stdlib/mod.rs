//! Built-in differentiable types and the array derivative library.
//!
//! `Float` and `Double` are their own tangent vectors. `Array<Element>` is
//! differentiable when its element is, with `Array.DifferentiableView` of the
//! element tangents as its tangent vector. The array subscript getter and
//! concatenation come with registered custom derivatives so that code using
//! them can be differentiated without looking into their bodies.

use tracing::debug;

use crate::autodiff::{
    derivative_function_type, DerivativeFunctionKind, IndexSubset,
    TangentSpaceResolver,
};
use crate::differentiation::witness::single_result_config;
use crate::error::Result;
use crate::ir::{FunctionBuilder, IrDifferentiableAttr, IrModule};
use crate::types::{
    ConformanceLookup, ConformanceRecord, FunctionParam, FunctionType, GenericParamType,
    GenericSignature, NominalDecl, NominalKind, Requirement, StoredProperty, Type, TypeEnvironment,
    ADDITIVE_ARITHMETIC, DIFFERENTIABLE, TANGENT_VECTOR,
};

pub const DIFFERENTIABLE_VIEW: &str = "Array.DifferentiableView";
pub const ARRAY_SUBSCRIPT: &str = "Array.subscript(_:).get";
pub const ARRAY_CONCATENATE: &str = "Array.+(_:_:)";

/// Type environment with the scalar and array conformances.
#[must_use]
pub fn standard_environment() -> TypeEnvironment {
    let mut env = TypeEnvironment::new();
    for name in ["Float", "Double"] {
        let decl = NominalDecl::new(name, NominalKind::Struct)
            .with_conformance(ConformanceRecord::new(DIFFERENTIABLE).with_witness(TANGENT_VECTOR, Type::structure(name)))
            .with_conformance(ConformanceRecord::new(ADDITIVE_ARITHMETIC));
        env.declare(decl);
    }
    env.declare(
        NominalDecl::new("Int", NominalKind::Struct).with_conformance(ConformanceRecord::new(ADDITIVE_ARITHMETIC)),
    );
    env.declare(NominalDecl::new("Bool", NominalKind::Struct));

    let element = element();
    let element_tangent = Type::member(element.clone(), TANGENT_VECTOR);
    env.declare(
        NominalDecl::new("Array", NominalKind::Struct)
            .with_generic_param("Element")
            .with_conformance(
                ConformanceRecord::new(DIFFERENTIABLE)
                    .with_condition(Requirement::conformance(element.clone(), DIFFERENTIABLE))
                    .with_witness(
                        TANGENT_VECTOR,
                        Type::generic_struct(DIFFERENTIABLE_VIEW, vec![element_tangent]),
                    ),
            ),
    );
    let view = Type::generic_struct(DIFFERENTIABLE_VIEW, vec![element.clone()]);
    env.declare(
        NominalDecl::new(DIFFERENTIABLE_VIEW, NominalKind::Struct)
            .with_generic_param("Element")
            .with_property(StoredProperty::new("base", Type::array(element.clone())))
            .with_conformance(
                ConformanceRecord::new(DIFFERENTIABLE)
                    .with_condition(Requirement::conformance(element.clone(), DIFFERENTIABLE))
                    .with_witness(TANGENT_VECTOR, view),
            )
            .with_conformance(
                ConformanceRecord::new(ADDITIVE_ARITHMETIC)
                    .with_condition(Requirement::conformance(element, DIFFERENTIABLE)),
            ),
    );
    env
}

fn element() -> Type {
    Type::generic("Element", 0, 0)
}

fn element_signature(differentiable: bool) -> GenericSignature {
    let params = vec![GenericParamType {
        name: "Element".into(),
        depth: 0,
        index: 0,
    }];
    let requirements = if differentiable {
        vec![Requirement::conformance(element(), DIFFERENTIABLE)]
    } else {
        Vec::new()
    };
    GenericSignature::new(params, requirements)
}

/// Declare the array subscript getter and concatenation in `module`, each
/// with a `[differentiable]` attribute naming custom JVP and VJP
/// declarations. Returns the number of attributes registered.
pub fn install_array_derivatives(
    module: &mut IrModule,
    env: &dyn ConformanceLookup,
) -> Result<usize> {
    let resolver = TangentSpaceResolver::new(env);
    let array = Type::array(element());
    let subscript = FunctionType::from_params(
        vec![FunctionParam::new(Type::int()), FunctionParam::new(array.clone()).labeled("self")],
        element(),
    );
    let concatenate = FunctionType::new(vec![array.clone(), array.clone()], array);

    let entries = [
        (ARRAY_SUBSCRIPT, subscript, vec![1], "Subscript"),
        (ARRAY_CONCATENATE, concatenate, vec![0, 1], "Concatenate"),
    ];
    let mut installed = 0;
    for (name, ty, wrt, suffix) in entries {
        let ty = ty.with_generic_signature(Some(element_signature(false)));
        let derivative_signature = element_signature(true);
        let indices = IndexSubset::from_indices(ty.params.len(), wrt);
        let jvp_name = format!("Array._jvp{suffix}");
        let vjp_name = format!("Array._vjp{suffix}");
        let jvp_ty = derivative_function_type(
            &resolver,
            &ty,
            &indices,
            DerivativeFunctionKind::Jvp,
            Some(&derivative_signature),
            false,
        )?;
        let vjp_ty = derivative_function_type(
            &resolver,
            &ty,
            &indices,
            DerivativeFunctionKind::Vjp,
            Some(&derivative_signature),
            false,
        )?;
        let mut original = FunctionBuilder::declaration(name, ty);
        original.differentiable.push(IrDifferentiableAttr {
            config: single_result_config(indices, Some(derivative_signature)),
            jvp: Some(jvp_name.clone()),
            vjp: Some(vjp_name.clone()),
            span: None,
        });
        module.add_function(original);
        module.add_function(FunctionBuilder::declaration(jvp_name, jvp_ty));
        module.add_function(FunctionBuilder::declaration(vjp_name, vjp_ty));
        installed += 1;
    }
    debug!(target: "autodiff.stdlib", installed, "installed array derivatives");
    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_tangent_is_a_differentiable_view() {
        let env = standard_environment();
        let tangent = env
            .lookup_conformance(&Type::array(Type::double()), DIFFERENTIABLE, None)
            .and_then(|conformance| conformance.type_witness(TANGENT_VECTOR).cloned())
            .expect("Array<Double> is differentiable");
        assert_eq!(tangent.to_string(), "Array.DifferentiableView<Double>");
        assert!(env.lookup_conformance(&tangent, ADDITIVE_ARITHMETIC, None).is_some());
        assert!(env
            .lookup_conformance(&Type::int(), ADDITIVE_ARITHMETIC, None)
            .is_some());
        assert!(env.lookup_conformance(&Type::bool(), DIFFERENTIABLE, None).is_none());
    }

    #[test]
    fn array_derivatives_are_declared_with_custom_witnesses() {
        let env = standard_environment();
        let mut module = IrModule::new("stdlib");
        assert_eq!(install_array_derivatives(&mut module, &env).expect("install"), 2);

        let subscript = module.function(ARRAY_SUBSCRIPT).expect("subscript");
        assert!(subscript.is_declaration());
        let attr = &subscript.differentiable[0];
        assert_eq!(attr.config.parameter_indices.indices(), vec![1]);
        assert_eq!(attr.vjp.as_deref(), Some("Array._vjpSubscript"));

        let vjp = module.function("Array._vjpSubscript").expect("vjp");
        assert_eq!(
            vjp.ty.result.to_string(),
            "(value: Element, pullback: (Element.TangentVector) -> Array.DifferentiableView<Element.TangentVector>)"
        );
        let concatenate = module.function(ARRAY_CONCATENATE).expect("concatenate");
        assert_eq!(concatenate.differentiable[0].config.parameter_indices.len(), 2);
    }
}
