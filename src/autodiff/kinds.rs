use std::fmt;

use serde::{Deserialize, Serialize};

/// Differentiability of a function type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DifferentiabilityKind {
    #[default]
    NonDifferentiable,
    Normal,
    /// Transposable; custom JVP/VJP are not permitted.
    Linear,
}

impl DifferentiabilityKind {
    #[must_use]
    pub fn is_differentiable(self) -> bool {
        !matches!(self, DifferentiabilityKind::NonDifferentiable)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LinearMapKind {
    Differential,
    Pullback,
}

impl LinearMapKind {
    /// Tuple label used for the linear map in a derivative's result.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            LinearMapKind::Differential => "differential",
            LinearMapKind::Pullback => "pullback",
        }
    }

    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "differential" => Some(LinearMapKind::Differential),
            "pullback" => Some(LinearMapKind::Pullback),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DerivativeFunctionKind {
    Jvp,
    Vjp,
}

impl DerivativeFunctionKind {
    #[must_use]
    pub fn linear_map_kind(self) -> LinearMapKind {
        LinearMapKind::from(self)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DerivativeFunctionKind::Jvp => "jvp",
            DerivativeFunctionKind::Vjp => "vjp",
        }
    }
}

impl From<DerivativeFunctionKind> for LinearMapKind {
    fn from(kind: DerivativeFunctionKind) -> Self {
        match kind {
            DerivativeFunctionKind::Jvp => LinearMapKind::Differential,
            DerivativeFunctionKind::Vjp => LinearMapKind::Pullback,
        }
    }
}

impl From<LinearMapKind> for DerivativeFunctionKind {
    fn from(kind: LinearMapKind) -> Self {
        match kind {
            LinearMapKind::Differential => DerivativeFunctionKind::Jvp,
            LinearMapKind::Pullback => DerivativeFunctionKind::Vjp,
        }
    }
}

impl fmt::Display for DerivativeFunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Function slots of a differentiability witness.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WitnessFunctionKind {
    Jvp,
    Vjp,
    Transpose,
}

impl WitnessFunctionKind {
    #[must_use]
    pub fn as_derivative_function_kind(self) -> Option<DerivativeFunctionKind> {
        match self {
            WitnessFunctionKind::Jvp => Some(DerivativeFunctionKind::Jvp),
            WitnessFunctionKind::Vjp => Some(DerivativeFunctionKind::Vjp),
            WitnessFunctionKind::Transpose => None,
        }
    }
}

impl From<DerivativeFunctionKind> for WitnessFunctionKind {
    fn from(kind: DerivativeFunctionKind) -> Self {
        match kind {
            DerivativeFunctionKind::Jvp => WitnessFunctionKind::Jvp,
            DerivativeFunctionKind::Vjp => WitnessFunctionKind::Vjp,
        }
    }
}
