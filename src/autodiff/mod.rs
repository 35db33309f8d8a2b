//! Automatic-differentiation data model: kinds, index subsets, derivative
//! configurations, tangent spaces and derivative function types.

mod config;
mod derivative_type;
mod index_subset;
mod kinds;
mod parsed;
mod tangent;

pub use config::AutoDiffConfig;
pub use derivative_type::{
    DerivativeResult, DerivativeTypeError, derivative_function_type, linear_map_type,
    original_function_type, split_derivative_result, with_innermost_result,
};
pub use index_subset::IndexSubset;
pub use kinds::{DerivativeFunctionKind, DifferentiabilityKind, LinearMapKind, WitnessFunctionKind};
pub use parsed::{ParsedDifferentiationParameter, ParsedParameterKind};
pub use tangent::{TangentSpace, TangentSpaceResolver, TupleTangentLayout};
