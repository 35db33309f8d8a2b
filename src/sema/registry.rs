use std::collections::HashMap;

use tracing::trace;

use crate::autodiff::IndexSubset;
use crate::decls::{AttrId, DeclId};
use crate::diagnostics::Span;

/// A validated `@differentiable` attribute as recorded in the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegisteredAttr {
    pub attr: AttrId,
    pub span: Option<Span>,
}

/// Uniquing table for `@differentiable` attributes of one compilation unit,
/// keyed by `(declaration, parameter indices)`. Created at the start of
/// attribute checking and passed explicitly to every check that registers or
/// queries attributes.
#[derive(Debug, Default)]
pub struct DifferentiableAttrRegistry {
    entries: HashMap<(DeclId, IndexSubset), RegisteredAttr>,
}

impl DifferentiableAttrRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `attr` for `(decl, indices)`. Re-registering the same attribute
    /// is accepted; a different attribute under the same key is rejected and
    /// the existing entry returned.
    pub fn register(
        &mut self,
        decl: DeclId,
        indices: &IndexSubset,
        attr: RegisteredAttr,
    ) -> Result<(), RegisteredAttr> {
        match self.entries.get(&(decl, indices.clone())) {
            Some(existing) if existing.attr != attr.attr => Err(*existing),
            Some(_) => Ok(()),
            None => {
                trace!(target: "autodiff.sema", decl = decl.0, indices = %indices, "registered differentiable attribute");
                self.entries.insert((decl, indices.clone()), attr);
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn get(&self, decl: DeclId, indices: &IndexSubset) -> Option<&RegisteredAttr> {
        self.entries.get(&(decl, indices.clone()))
    }

    /// Registered parameter-index subsets of `decl`, in ascending order.
    #[must_use]
    pub fn indices_for(&self, decl: DeclId) -> Vec<IndexSubset> {
        let mut indices: Vec<IndexSubset> = self
            .entries
            .keys()
            .filter(|(owner, _)| *owner == decl)
            .map(|(_, indices)| indices.clone())
            .collect();
        indices.sort();
        indices
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
