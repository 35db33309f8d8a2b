//! Attribute checking for differentiable programming.
//!
//! [`check_module`] validates every `@differentiable` and `@differentiating`
//! attribute of a [`SourceModule`], resolves their parameter indices and
//! derivative functions, and records the accepted ones in a
//! [`DifferentiableAttrRegistry`]. Modifier attributes (`final`, `mutating`,
//! `nonmutating`, `@noDerivative`) are placement-checked in the same walk.
//!
//! Each attribute is validated against an immutable view of the module and
//! yields an [`AttrOutcome`]; the outcome is then applied to the module.

pub mod diagnostics;
mod differentiable;
mod differentiating;
mod early;
pub mod lookup;
mod params;
mod registry;

#[cfg(test)]
mod tests;

use std::collections::HashSet;

use tracing::debug;

use crate::autodiff::{DerivativeFunctionKind, TangentSpaceResolver};
use crate::decls::{AttrId, AttributeKind, DeclAttribute, DeclId, SourceModule};
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::types::{ConformanceLookup, GenericSignature, Type, DIFFERENTIABLE};

pub use params::{differentiation_param_types, ResolvedParameters};
pub use registry::{DifferentiableAttrRegistry, RegisteredAttr};

/// Read-only state shared by the checks of one attribute.
pub(crate) struct SemaContext<'a> {
    pub module: &'a SourceModule,
    pub env: &'a dyn ConformanceLookup,
    pub resolver: &'a TangentSpaceResolver<'a>,
}

impl SemaContext<'_> {
    pub fn conforms_to_differentiable(
        &self,
        ty: &Type,
        signature: Option<&GenericSignature>,
    ) -> bool {
        self.env
            .lookup_conformance(ty, DIFFERENTIABLE, signature)
            .is_some()
    }
}

/// Change to the original function requested by a `@differentiating` attribute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OriginalChange {
    /// Add a synthesized `@differentiable` attribute.
    Create(DeclAttribute),
    /// Fill in a derivative of an existing `@differentiable` attribute.
    Update {
        attr: AttrId,
        kind: DerivativeFunctionKind,
        derivative: DeclId,
    },
}

/// Result of validating one attribute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttrOutcome {
    /// Keep the attribute, with its resolved fields filled in.
    Keep(DeclAttribute),
    /// Drop the attribute from a storage declaration and attach `attribute`
    /// to its getter instead.
    MoveToGetter {
        getter: DeclId,
        attribute: DeclAttribute,
    },
    Register {
        updated: DeclAttribute,
        original: DeclId,
        change: OriginalChange,
    },
}

/// A failed check: the diagnostic plus whether the attribute is removed or
/// merely marked invalid.
#[derive(Clone, Debug)]
pub(crate) struct Rejected {
    pub diagnostic: Diagnostic,
    pub remove: bool,
}

impl Rejected {
    pub fn invalid(diagnostic: Diagnostic) -> Self {
        Self {
            diagnostic,
            remove: false,
        }
    }

    pub fn remove(diagnostic: Diagnostic) -> Self {
        Self {
            diagnostic,
            remove: true,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Phase {
    Declarations,
    Derivatives,
}

/// Check every attribute of `module`. `@differentiating` attributes are
/// checked after all others so they can merge into explicit
/// `@differentiable` attributes of their originals.
pub fn check_module(
    module: &mut SourceModule,
    env: &dyn ConformanceLookup,
    registry: &mut DifferentiableAttrRegistry,
    sink: &mut DiagnosticSink,
) {
    let resolver = TangentSpaceResolver::new(env);
    let mut checked: HashSet<AttrId> = HashSet::new();
    let before = sink.error_count();
    for phase in [Phase::Declarations, Phase::Derivatives] {
        for decl in module.decl_ids() {
            let attrs: Vec<AttrId> = module
                .attributes(decl)
                .iter()
                .map(|attribute| attribute.id)
                .collect();
            for attr in attrs {
                if checked.contains(&attr) {
                    continue;
                }
                let Some(attribute) = module.attribute(decl, attr).cloned() else {
                    continue;
                };
                let is_derivative = matches!(attribute.kind, AttributeKind::Differentiating(_));
                if attribute.invalid || is_derivative != (phase == Phase::Derivatives) {
                    continue;
                }
                checked.insert(attr);
                let result = {
                    let cx = SemaContext {
                        module: &*module,
                        env,
                        resolver: &resolver,
                    };
                    check_attribute(&cx, decl, &attribute, registry)
                };
                match result {
                    Ok(Some(outcome)) => apply(module, decl, attr, outcome, &mut checked),
                    Ok(None) => {}
                    Err(rejected) => {
                        debug!(
                            target: "autodiff.sema",
                            decl = decl.0,
                            attribute = attribute.kind.spelling(),
                            code = rejected.diagnostic.code_str().unwrap_or(""),
                            removed = rejected.remove,
                            "rejected attribute"
                        );
                        sink.push(rejected.diagnostic);
                        if rejected.remove {
                            module.remove_attribute(decl, attr);
                        } else if let Some(slot) = module.attribute_mut(decl, attr) {
                            slot.invalid = true;
                        }
                    }
                }
            }
        }
    }
    debug!(
        target: "autodiff.sema",
        module = module.name(),
        registered = registry.len(),
        errors = sink.error_count() - before,
        "checked attributes"
    );
}

fn check_attribute(
    cx: &SemaContext<'_>,
    decl: DeclId,
    attribute: &DeclAttribute,
    registry: &mut DifferentiableAttrRegistry,
) -> Result<Option<AttrOutcome>, Rejected> {
    match &attribute.kind {
        AttributeKind::Differentiable(attr) => {
            differentiable::check_differentiable(cx, decl, attribute, attr, registry).map(Some)
        }
        AttributeKind::Differentiating(attr) => {
            differentiating::check_differentiating(cx, decl, attribute, attr, registry).map(Some)
        }
        _ => {
            let Some(target) = cx.module.decl(decl) else {
                return Ok(None);
            };
            match early::check_placement(cx, target, attribute) {
                Some(diagnostic) => Err(Rejected::remove(diagnostic)),
                None => Ok(None),
            }
        }
    }
}

fn apply(
    module: &mut SourceModule,
    decl: DeclId,
    checked_attr: AttrId,
    outcome: AttrOutcome,
    checked: &mut HashSet<AttrId>,
) {
    match outcome {
        AttrOutcome::Keep(attribute) => {
            module.replace_attribute(decl, attribute);
        }
        AttrOutcome::MoveToGetter { getter, attribute } => {
            debug!(target: "autodiff.sema", storage = decl.0, getter = getter.0, "moved attribute to getter");
            module.remove_attribute(decl, checked_attr);
            checked.insert(attribute.id);
            module.add_attribute(getter, attribute);
        }
        AttrOutcome::Register {
            updated,
            original,
            change,
        } => {
            module.replace_attribute(decl, updated);
            match change {
                OriginalChange::Create(attribute) => {
                    debug!(target: "autodiff.sema", derivative = decl.0, original = original.0, "synthesized differentiable attribute");
                    checked.insert(attribute.id);
                    module.add_attribute(original, attribute);
                }
                OriginalChange::Update {
                    attr,
                    kind,
                    derivative,
                } => {
                    if let Some(AttributeKind::Differentiable(existing)) = module
                        .attribute_mut(original, attr)
                        .map(|attribute| &mut attribute.kind)
                    {
                        match kind {
                            DerivativeFunctionKind::Jvp => existing.jvp_function = Some(derivative),
                            DerivativeFunctionKind::Vjp => existing.vjp_function = Some(derivative),
                        }
                    }
                    debug!(target: "autodiff.sema", attr = checked_attr.0, original = original.0, kind = %kind, "registered derivative");
                }
            }
        }
    }
}
