#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

//! Automatic differentiation for a statically typed, SSA-based IR.
//!
//! The crate is layered bottom-up:
//!
//! * [`types`] and [`autodiff`] model types, generic signatures, tangent
//!   spaces and derivative configurations.
//! * [`decls`] and [`sema`] check `@differentiable` and `@differentiating`
//!   attributes on source declarations.
//! * [`ir`] holds the function-level IR that the transform rewrites.
//! * [`differentiation`] drives derivative synthesis and maintains the
//!   differentiability witness table.
//! * [`stdlib`] provides the built-in differentiable types and the array
//!   derivative library.

pub mod autodiff;
pub mod decls;
pub mod diagnostics;
pub mod differentiation;
pub mod error;
pub mod ir;
pub mod logging;
pub mod options;
pub mod sema;
pub mod stdlib;
pub mod types;

pub use error::{Error, Result};
