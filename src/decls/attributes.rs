use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::autodiff::{IndexSubset, ParsedDifferentiationParameter};
use crate::diagnostics::Span;
use crate::types::{GenericSignature, Requirement};

use super::DeclId;

/// Reference to a declaration by name, as written in an attribute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeclNameRef {
    pub name: String,
    pub span: Option<Span>,
}

impl DeclNameRef {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            span: None,
        }
    }

    #[must_use]
    pub fn at(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }
}

impl fmt::Display for DeclNameRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// One requirement of a `where` clause with its source location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WhereRequirement {
    pub requirement: Requirement,
    pub span: Option<Span>,
}

impl WhereRequirement {
    #[must_use]
    pub fn new(requirement: Requirement) -> Self {
        Self {
            requirement,
            span: None,
        }
    }
}

/// `@differentiable(linear, wrt: ..., jvp: ..., vjp: ... where ...)`.
///
/// The parsed fields are populated by the front end; the resolved fields
/// are filled in by attribute checking.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DifferentiableAttr {
    pub linear: bool,
    pub parsed_params: Vec<ParsedDifferentiationParameter>,
    /// `None` when no `where` clause was written.
    pub where_clause: Option<Vec<WhereRequirement>>,
    pub jvp: Option<DeclNameRef>,
    pub vjp: Option<DeclNameRef>,

    pub parameter_indices: Option<IndexSubset>,
    pub jvp_function: Option<DeclId>,
    pub vjp_function: Option<DeclId>,
    pub requirements: Vec<Requirement>,
    pub derivative_generic_signature: Option<GenericSignature>,
}

impl DifferentiableAttr {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn linear(mut self) -> Self {
        self.linear = true;
        self
    }

    #[must_use]
    pub fn wrt(mut self, params: Vec<ParsedDifferentiationParameter>) -> Self {
        self.parsed_params = params;
        self
    }

    #[must_use]
    pub fn with_jvp(mut self, name: DeclNameRef) -> Self {
        self.jvp = Some(name);
        self
    }

    #[must_use]
    pub fn with_vjp(mut self, name: DeclNameRef) -> Self {
        self.vjp = Some(name);
        self
    }

    #[must_use]
    pub fn with_where_clause(mut self, requirements: Vec<WhereRequirement>) -> Self {
        self.where_clause = Some(requirements);
        self
    }

    /// Pre-resolved parameter indices, as carried by synthesized attributes.
    #[must_use]
    pub fn with_parameter_indices(mut self, indices: IndexSubset) -> Self {
        self.parameter_indices = Some(indices);
        self
    }

    #[must_use]
    pub fn has_custom_derivative(&self) -> bool {
        self.jvp.is_some() || self.vjp.is_some()
    }
}

/// `@differentiating(original, wrt: ...)` on a derivative function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DifferentiatingAttr {
    pub original: DeclNameRef,
    pub parsed_params: Vec<ParsedDifferentiationParameter>,
    pub linear: bool,

    pub original_function: Option<DeclId>,
    pub parameter_indices: Option<IndexSubset>,
}

impl DifferentiatingAttr {
    #[must_use]
    pub fn new(original: DeclNameRef) -> Self {
        Self {
            original,
            parsed_params: Vec::new(),
            linear: false,
            original_function: None,
            parameter_indices: None,
        }
    }

    #[must_use]
    pub fn wrt(mut self, params: Vec<ParsedDifferentiationParameter>) -> Self {
        self.parsed_params = params;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttributeKind {
    Differentiable(DifferentiableAttr),
    Differentiating(DifferentiatingAttr),
    Final,
    Mutating,
    NonMutating,
    NoDerivative,
}

impl AttributeKind {
    #[must_use]
    pub fn spelling(&self) -> &'static str {
        match self {
            AttributeKind::Differentiable(_) => "@differentiable",
            AttributeKind::Differentiating(_) => "@differentiating",
            AttributeKind::Final => "final",
            AttributeKind::Mutating => "mutating",
            AttributeKind::NonMutating => "nonmutating",
            AttributeKind::NoDerivative => "@noDerivative",
        }
    }
}

/// Identity of one attribute instance; clones share it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttrId(pub u64);

static NEXT_ATTR_ID: AtomicU64 = AtomicU64::new(0);

impl AttrId {
    #[must_use]
    pub fn fresh() -> Self {
        AttrId(NEXT_ATTR_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeclAttribute {
    pub id: AttrId,
    pub kind: AttributeKind,
    pub span: Option<Span>,
    pub invalid: bool,
    /// Created by the compiler rather than written in source.
    pub implicit: bool,
}

impl DeclAttribute {
    #[must_use]
    pub fn new(kind: AttributeKind) -> Self {
        Self {
            id: AttrId::fresh(),
            kind,
            span: None,
            invalid: false,
            implicit: false,
        }
    }

    #[must_use]
    pub fn differentiable(attr: DifferentiableAttr) -> Self {
        Self::new(AttributeKind::Differentiable(attr))
    }

    #[must_use]
    pub fn differentiating(attr: DifferentiatingAttr) -> Self {
        Self::new(AttributeKind::Differentiating(attr))
    }

    #[must_use]
    pub fn at(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    #[must_use]
    pub fn implicit(mut self) -> Self {
        self.implicit = true;
        self
    }

    #[must_use]
    pub fn as_differentiable(&self) -> Option<&DifferentiableAttr> {
        match &self.kind {
            AttributeKind::Differentiable(attr) => Some(attr),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_differentiating(&self) -> Option<&DifferentiatingAttr> {
        match &self.kind {
            AttributeKind::Differentiating(attr) => Some(attr),
            _ => None,
        }
    }
}
