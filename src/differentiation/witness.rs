//! Differentiability witnesses: the table binding `(original, config)` to
//! JVP and VJP functions, its JSON export, and the lowering of checked
//! `@differentiable` attributes onto IR functions.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::diagnostics::{codes, error};
use crate::autodiff::{AutoDiffConfig, IndexSubset};
use crate::decls::SourceModule;
use crate::diagnostics::{Diagnostic, Span};
use crate::error::Result;
use crate::ir::{IrDifferentiableAttr, IrModule};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WitnessKey {
    pub original: String,
    pub config: AutoDiffConfig,
}

impl WitnessKey {
    #[must_use]
    pub fn new(original: impl Into<String>, config: AutoDiffConfig) -> Self {
        Self {
            original: original.into(),
            config,
        }
    }
}

impl fmt::Display for WitnessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.original, self.config)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DifferentiabilityWitness {
    pub original: String,
    pub config: AutoDiffConfig,
    pub jvp: String,
    pub vjp: String,
}

impl DifferentiabilityWitness {
    #[must_use]
    pub fn key(&self) -> WitnessKey {
        WitnessKey::new(self.original.clone(), self.config.clone())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WitnessError {
    Duplicate { key: WitnessKey },
}

impl WitnessError {
    #[must_use]
    pub fn into_diagnostic(self, span: Option<Span>) -> Diagnostic {
        error(codes::DUPLICATE_WITNESS, self.to_string(), span)
    }
}

impl fmt::Display for WitnessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WitnessError::Duplicate { key } => write!(
                f,
                "a differentiability witness for '{}' with parameter indices {} already exists",
                key.original, key.config.parameter_indices
            ),
        }
    }
}

impl std::error::Error for WitnessError {}

/// Witnesses in registration order, indexed by key.
#[derive(Clone, Debug, Default)]
pub struct WitnessTable {
    entries: Vec<DifferentiabilityWitness>,
    index: HashMap<WitnessKey, usize>,
}

impl WitnessTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `witness`. A second witness for an existing key is rejected
    /// and the first registration is left untouched.
    pub fn register(&mut self, witness: DifferentiabilityWitness) -> std::result::Result<(), WitnessError> {
        let key = witness.key();
        if self.index.contains_key(&key) {
            return Err(WitnessError::Duplicate { key });
        }
        trace!(target: "autodiff.witness", key = %key, jvp = %witness.jvp, vjp = %witness.vjp, "registered witness");
        self.index.insert(key, self.entries.len());
        self.entries.push(witness);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, key: &WitnessKey) -> Option<&DifferentiabilityWitness> {
        self.index.get(key).and_then(|&index| self.entries.get(index))
    }

    #[must_use]
    pub fn lookup(&self, original: &str, config: &AutoDiffConfig) -> Option<&DifferentiabilityWitness> {
        self.get(&WitnessKey::new(original, config.clone()))
    }

    #[must_use]
    pub fn contains(&self, key: &WitnessKey) -> bool {
        self.index.contains_key(key)
    }

    /// Witness of `original` with the fewest parameters among those covering
    /// `parameters`.
    #[must_use]
    pub fn find_minimal_superset(
        &self,
        original: &str,
        parameters: &IndexSubset,
    ) -> Option<&DifferentiabilityWitness> {
        self.entries
            .iter()
            .filter(|witness| witness.original == original)
            .filter(|witness| parameters.is_subset_of(&witness.config.parameter_indices))
            .min_by_key(|witness| witness.config.parameter_indices.len())
    }

    pub fn iter(&self) -> impl Iterator<Item = &DifferentiabilityWitness> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every witness registered after the first `len`, returning them.
    pub(crate) fn truncate(&mut self, len: usize) -> Vec<DifferentiabilityWitness> {
        if len >= self.entries.len() {
            return Vec::new();
        }
        let removed = self.entries.split_off(len);
        for witness in &removed {
            self.index.remove(&witness.key());
        }
        removed
    }

    #[must_use]
    pub fn export(&self) -> Vec<ExportedWitness> {
        self.entries.iter().map(ExportedWitness::from).collect()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.export())?)
    }

    /// Write the JSON export to `path`.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        fs::write(path, json)?;
        debug!(target: "autodiff.witness", path = %path.display(), witnesses = self.len(), "wrote witness table");
        Ok(())
    }
}

/// Serialized form of one witness.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedWitness {
    pub original: String,
    pub parameter_count: usize,
    pub parameter_indices: Vec<usize>,
    pub result_indices: Vec<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generic_signature: Option<String>,
    pub jvp: String,
    pub vjp: String,
}

impl ExportedWitness {
    pub fn parse_all(json: &str) -> Result<Vec<ExportedWitness>> {
        Ok(serde_json::from_str(json)?)
    }
}

impl From<&DifferentiabilityWitness> for ExportedWitness {
    fn from(witness: &DifferentiabilityWitness) -> Self {
        Self {
            original: witness.original.clone(),
            parameter_count: witness.config.parameter_indices.capacity(),
            parameter_indices: witness.config.parameter_indices.indices(),
            result_indices: witness.config.result_indices.indices(),
            generic_signature: witness
                .config
                .canonical_signature()
                .map(|signature| signature.to_string()),
            jvp: witness.jvp.clone(),
            vjp: witness.vjp.clone(),
        }
    }
}

/// Configuration of a single-result derivative.
#[must_use]
pub fn single_result_config(
    parameter_indices: IndexSubset,
    signature: Option<crate::types::GenericSignature>,
) -> AutoDiffConfig {
    AutoDiffConfig::new(parameter_indices, IndexSubset::from_indices(1, [0]), signature)
}

/// Copy checked `@differentiable` attributes onto the IR functions lowered
/// from their declarations. Setters and invalid attributes are skipped.
/// Returns the number of attributes lowered.
pub fn lower_differentiable_attributes(source: &SourceModule, module: &mut IrModule) -> usize {
    let mut lowered = 0;
    for function in source.functions() {
        if function.is_setter() {
            continue;
        }
        let name = function.ir_name();
        for attribute in &function.attributes {
            if attribute.invalid {
                continue;
            }
            let Some(attr) = attribute.as_differentiable() else {
                continue;
            };
            let Some(indices) = attr.parameter_indices.clone() else {
                continue;
            };
            let Some(target) = module.function_mut(&name) else {
                trace!(target: "autodiff.witness", function = %name, "no IR function for attribute");
                continue;
            };
            let config = single_result_config(indices, attr.derivative_generic_signature.clone());
            if target.differentiable.iter().any(|existing| existing.config == config) {
                continue;
            }
            let derivative_name = |id| source.function(id).map(|derivative| derivative.ir_name());
            target.differentiable.push(IrDifferentiableAttr {
                config,
                jvp: attr.jvp_function.and_then(derivative_name),
                vjp: attr.vjp_function.and_then(derivative_name),
                span: attribute.span,
            });
            lowered += 1;
        }
    }
    debug!(target: "autodiff.witness", lowered, "lowered differentiable attributes");
    lowered
}
