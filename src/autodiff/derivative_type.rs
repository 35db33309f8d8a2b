//! Derivative and linear-map function types.
//!
//! Parameter indices address the flattened parameter list of a (possibly
//! curried) function: innermost layer first, so `self` of a method is the
//! last index. Source-level derivative types list the `self` tangent first
//! when `make_self_param_first` is requested.

use std::fmt;

use super::{DerivativeFunctionKind, IndexSubset, LinearMapKind, TangentSpaceResolver};
use crate::types::{FunctionType, GenericSignature, Type};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DerivativeTypeError {
    ParameterIndexOutOfRange { index: usize, count: usize },
    NonDifferentiableParameter { index: usize, ty: Type },
    NonDifferentiableResult { ty: Type },
}

impl fmt::Display for DerivativeTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DerivativeTypeError::ParameterIndexOutOfRange { index, count } => write!(
                f,
                "parameter index {index} is out of range for a function with {count} parameters"
            ),
            DerivativeTypeError::NonDifferentiableParameter { index, ty } => {
                write!(f, "parameter {index} of type '{ty}' has no tangent space")
            }
            DerivativeTypeError::NonDifferentiableResult { ty } => {
                write!(f, "result type '{ty}' has no tangent space")
            }
        }
    }
}

impl std::error::Error for DerivativeTypeError {}

/// Type of the differential or pullback of `original` with respect to
/// `parameter_indices`.
pub fn linear_map_type(
    resolver: &TangentSpaceResolver<'_>,
    original: &FunctionType,
    parameter_indices: &IndexSubset,
    kind: LinearMapKind,
    signature: Option<&GenericSignature>,
    make_self_param_first: bool,
) -> Result<FunctionType, DerivativeTypeError> {
    let signature = signature.or(original.generic_signature.as_ref());
    let params = original.flattened_params();
    let count = params.len();
    let mut wrt_tangents = Vec::with_capacity(parameter_indices.len());
    for index in parameter_indices.iter() {
        let param = params
            .get(index)
            .ok_or(DerivativeTypeError::ParameterIndexOutOfRange { index, count })?;
        let tangent = resolver.tangent_type(&param.ty, signature).ok_or_else(|| {
            DerivativeTypeError::NonDifferentiableParameter {
                index,
                ty: param.ty.clone(),
            }
        })?;
        wrt_tangents.push(tangent);
    }
    let is_method = original.result.is_function();
    if make_self_param_first && is_method && count > 0 && parameter_indices.contains(count - 1) {
        if let Some(self_tangent) = wrt_tangents.pop() {
            wrt_tangents.insert(0, self_tangent);
        }
    }

    let result = original.innermost_result();
    let result_tangent = resolver
        .tangent_type(result, signature)
        .ok_or_else(|| DerivativeTypeError::NonDifferentiableResult { ty: result.clone() })?;

    Ok(match kind {
        LinearMapKind::Differential => FunctionType::new(wrt_tangents, result_tangent),
        LinearMapKind::Pullback => {
            FunctionType::new(vec![result_tangent], Type::tuple_or_single(wrt_tangents))
        }
    })
}

/// Type of the JVP or VJP of `original`: the original parameters returning
/// `(value: R, differential: ...)` or `(value: R, pullback: ...)`.
pub fn derivative_function_type(
    resolver: &TangentSpaceResolver<'_>,
    original: &FunctionType,
    parameter_indices: &IndexSubset,
    kind: DerivativeFunctionKind,
    signature: Option<&GenericSignature>,
    make_self_param_first: bool,
) -> Result<FunctionType, DerivativeTypeError> {
    let linear_map_kind = kind.linear_map_kind();
    let linear_map = linear_map_type(
        resolver,
        original,
        parameter_indices,
        linear_map_kind,
        signature,
        make_self_param_first,
    )?;
    let result = Type::labeled_tuple(vec![
        ("value", original.innermost_result().clone()),
        (linear_map_kind.label(), Type::Function(linear_map)),
    ]);
    let signature = signature
        .cloned()
        .or_else(|| original.generic_signature.clone());
    Ok(with_innermost_result(original, result).with_generic_signature(signature))
}

/// `function` with the result of its innermost curried layer replaced.
#[must_use]
pub fn with_innermost_result(function: &FunctionType, result: Type) -> FunctionType {
    let new_result = match function.result.as_function() {
        Some(inner) => Type::Function(with_innermost_result(inner, result)),
        None => result,
    };
    FunctionType {
        params: function.params.clone(),
        result: Box::new(new_result),
        differentiability: function.differentiability,
        generic_signature: function.generic_signature.clone(),
    }
}

/// Components of a derivative's `(value: R, <linear map label>: M)` result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DerivativeResult {
    pub value: Type,
    pub kind: LinearMapKind,
    pub linear_map: Type,
}

/// Split the innermost result of a derivative function type. Returns `None`
/// unless it is a two-element tuple labelled `value` and then `differential`
/// or `pullback`.
#[must_use]
pub fn split_derivative_result(derivative: &FunctionType) -> Option<DerivativeResult> {
    let tuple = derivative.innermost_result().as_tuple()?;
    let [value, linear_map] = tuple.elements.as_slice() else {
        return None;
    };
    if value.label.as_deref() != Some("value") {
        return None;
    }
    let kind = LinearMapKind::from_label(linear_map.label.as_deref()?)?;
    Some(DerivativeResult {
        value: value.ty.clone(),
        kind,
        linear_map: linear_map.ty.clone(),
    })
}

/// The original function type a derivative was declared for: the derivative
/// with its linear map stripped from the result.
#[must_use]
pub fn original_function_type(derivative: &FunctionType) -> Option<FunctionType> {
    let split = split_derivative_result(derivative)?;
    Some(with_innermost_result(derivative, split.value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stdlib::standard_environment;
    use crate::types::{GenericParamType, Requirement, DIFFERENTIABLE};

    fn f_x_y() -> FunctionType {
        FunctionType::new(vec![Type::float(), Type::double()], Type::float())
    }

    #[test]
    fn vjp_of_two_parameter_function() {
        let env = standard_environment();
        let resolver = TangentSpaceResolver::new(&env);
        let vjp = derivative_function_type(
            &resolver,
            &f_x_y(),
            &IndexSubset::full(2),
            DerivativeFunctionKind::Vjp,
            None,
            false,
        )
        .expect("vjp type");
        assert_eq!(
            vjp.to_string(),
            "(Float, Double) -> (value: Float, pullback: (Float) -> (Float, Double))"
        );
        let swapped = Type::function(
            vec![Type::float(), Type::double()],
            Type::tuple(vec![
                Type::float(),
                Type::function(vec![Type::float()], Type::tuple(vec![Type::double(), Type::float()])),
            ]),
        );
        assert!(!Type::Function(vjp.clone()).matches_ignoring_labels(&swapped));
        let unlabeled = Type::function(
            vec![Type::float(), Type::double()],
            Type::tuple(vec![
                Type::float(),
                Type::function(vec![Type::float()], Type::tuple(vec![Type::float(), Type::double()])),
            ]),
        );
        assert!(Type::Function(vjp).matches_ignoring_labels(&unlabeled));
    }

    #[test]
    fn jvp_with_single_parameter_keeps_scalar_differential() {
        let env = standard_environment();
        let resolver = TangentSpaceResolver::new(&env);
        let jvp = derivative_function_type(
            &resolver,
            &f_x_y(),
            &IndexSubset::from_indices(2, [1]),
            DerivativeFunctionKind::Jvp,
            None,
            false,
        )
        .expect("jvp type");
        assert_eq!(
            jvp.to_string(),
            "(Float, Double) -> (value: Float, differential: (Double) -> Float)"
        );
    }

    #[test]
    fn method_derivatives_put_self_tangent_first() {
        let mut env = standard_environment();
        env.declare_differentiable_struct(
            "Point",
            vec![crate::types::StoredProperty::new("x", Type::float())],
        );
        let resolver = TangentSpaceResolver::new(&env);
        let method = FunctionType::new(
            vec![Type::structure("Point")],
            Type::function(vec![Type::float()], Type::float()),
        );
        let pullback = linear_map_type(
            &resolver,
            &method,
            &IndexSubset::full(2),
            LinearMapKind::Pullback,
            None,
            true,
        )
        .expect("pullback");
        assert_eq!(pullback.to_string(), "(Float) -> (Point.TangentVector, Float)");
        let ir_order = linear_map_type(
            &resolver,
            &method,
            &IndexSubset::full(2),
            LinearMapKind::Pullback,
            None,
            false,
        )
        .expect("pullback");
        assert_eq!(ir_order.to_string(), "(Float) -> (Float, Point.TangentVector)");
    }

    #[test]
    fn generic_tangents_use_the_derivative_signature() {
        let env = standard_environment();
        let resolver = TangentSpaceResolver::new(&env);
        let t = Type::generic("T", 0, 0);
        let original = FunctionType::new(vec![t.clone()], t.clone());
        let signature = GenericSignature::new(
            vec![GenericParamType {
                name: "T".into(),
                depth: 0,
                index: 0,
            }],
            vec![Requirement::conformance(t, DIFFERENTIABLE)],
        );
        let err = linear_map_type(
            &resolver,
            &original,
            &IndexSubset::full(1),
            LinearMapKind::Differential,
            None,
            false,
        )
        .expect_err("unconstrained T");
        assert!(matches!(err, DerivativeTypeError::NonDifferentiableParameter { index: 0, .. }));
        let differential = linear_map_type(
            &resolver,
            &original,
            &IndexSubset::full(1),
            LinearMapKind::Differential,
            Some(&signature),
            false,
        )
        .expect("constrained T");
        assert_eq!(differential.to_string(), "(T.TangentVector) -> T.TangentVector");
    }

    #[test]
    fn original_type_strips_linear_map() {
        let vjp = FunctionType::new(
            vec![Type::float()],
            Type::labeled_tuple(vec![
                ("value", Type::float()),
                ("pullback", Type::function(vec![Type::float()], Type::float())),
            ]),
        );
        let split = split_derivative_result(&vjp).expect("derivative result");
        assert_eq!(split.kind, LinearMapKind::Pullback);
        assert_eq!(
            original_function_type(&vjp).map(|ty| ty.to_string()),
            Some("(Float) -> Float".to_string())
        );
        let mislabeled = FunctionType::new(
            vec![Type::float()],
            Type::labeled_tuple(vec![("value", Type::float()), ("adjoint", Type::float())]),
        );
        assert!(split_derivative_result(&mislabeled).is_none());
    }
}
