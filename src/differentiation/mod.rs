//! The differentiation transform.
//!
//! [`differentiate_module`] finds every `differentiable_function`
//! instruction and `[differentiable]` attribute in an [`crate::ir::IrModule`],
//! synthesizes the JVP and VJP each one needs, and records the results in a
//! [`WitnessTable`]. Requests discovered while synthesizing a derivative
//! (calls to other functions) are satisfied recursively. A failure is
//! reported to every request that reaches it, rooted at the construct that
//! started that request's chain, and everything generated on its behalf is
//! removed again.

pub mod activity;
mod calls;
pub mod context;
pub mod diagnostics;
pub mod invoker;
mod jvp;
pub mod legality;
mod primal;
mod transform;
mod vjp;
pub mod witness;


pub use activity::Activity;
pub use calls::NestedApplyInfo;
pub use context::{ADContext, WorkItem};
pub use diagnostics::codes;
pub use invoker::DifferentiationInvoker;
pub use transform::{differentiate_module, DifferentiationSummary};
pub use witness::{
    lower_differentiable_attributes, DifferentiabilityWitness, ExportedWitness, WitnessError,
    WitnessKey, WitnessTable,
};
