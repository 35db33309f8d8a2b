//! Placement checks for modifier attributes, run before derivative checking.
//! Each failure removes the attribute and offers a fix-it doing the same.

use crate::decls::{AttributeKind, Decl, DeclAttribute, StorageKind};
use crate::diagnostics::Diagnostic;
use crate::types::DIFFERENTIABLE;

use super::diagnostics::{codes, error_removing};
use super::SemaContext;

pub(crate) fn check_placement(
    cx: &SemaContext<'_>,
    decl: &Decl,
    attribute: &DeclAttribute,
) -> Option<Diagnostic> {
    if attribute.implicit {
        return None;
    }
    let span = attribute.span;
    let spelling = attribute.kind.spelling();
    let reject = |code, message: String| Some(error_removing(code, message, span, spelling));
    match &attribute.kind {
        AttributeKind::Final if !decl.context().is_class() => reject(
            codes::FINAL_OUTSIDE_CLASS,
            "only classes and class members may be marked 'final'".into(),
        ),
        AttributeKind::Mutating | AttributeKind::NonMutating => {
            if attribute.kind == AttributeKind::NonMutating
                && decl
                    .attributes()
                    .iter()
                    .any(|other| other.kind == AttributeKind::Mutating)
            {
                return reject(
                    codes::MUTATING_AND_NONMUTATING,
                    "method must not be declared both 'mutating' and 'nonmutating'".into(),
                );
            }
            if decl.context().type_context().is_none() {
                reject(
                    codes::MUTATING_AT_MODULE_SCOPE,
                    format!("'{spelling}' is only valid on methods"),
                )
            } else if decl.context().is_class() {
                reject(
                    codes::MUTATING_IN_CLASS,
                    format!("'{spelling}' isn't valid on methods in classes or class-bound protocols"),
                )
            } else if is_static(decl) {
                reject(
                    codes::STATIC_MUTATING,
                    format!("static functions must not be declared '{spelling}'"),
                )
            } else {
                None
            }
        }
        AttributeKind::NoDerivative if !is_differentiable_stored_property(cx, decl) => reject(
            codes::NO_DERIVATIVE_OUTSIDE_STORED_PROPERTY,
            "'@noDerivative' is only allowed on stored properties in structure types that \
             declare a conformance to 'Differentiable'"
                .into(),
        ),
        _ => None,
    }
}

fn is_static(decl: &Decl) -> bool {
    match decl {
        Decl::Function(function) => function.is_static,
        Decl::Storage(storage) => storage.is_static,
    }
}

fn is_differentiable_stored_property(cx: &SemaContext<'_>, decl: &Decl) -> bool {
    let Decl::Storage(storage) = decl else {
        return false;
    };
    if storage.kind != StorageKind::Stored || storage.is_static || storage.context.is_class() {
        return false;
    }
    storage.context.type_context().is_some_and(|context| {
        cx.env
            .lookup_conformance(&context.self_type, DIFFERENTIABLE, None)
            .is_some()
    })
}
