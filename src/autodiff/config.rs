use std::fmt;
use std::hash::{Hash, Hasher};

use super::IndexSubset;
use crate::types::GenericSignature;

/// Parameter indices, result indices and derivative generic signature of one
/// derivative specialization. Equality and hashing use the canonical signature.
#[derive(Clone, Debug)]
pub struct AutoDiffConfig {
    pub parameter_indices: IndexSubset,
    pub result_indices: IndexSubset,
    pub derivative_generic_signature: Option<GenericSignature>,
}

impl AutoDiffConfig {
    #[must_use]
    pub fn new(
        parameter_indices: IndexSubset,
        result_indices: IndexSubset,
        derivative_generic_signature: Option<GenericSignature>,
    ) -> Self {
        Self {
            parameter_indices,
            result_indices,
            derivative_generic_signature,
        }
    }

    /// Reserved key that never equals a real configuration.
    #[must_use]
    pub fn empty_key() -> Self {
        Self::new(
            IndexSubset::empty_sentinel(),
            IndexSubset::empty_sentinel(),
            None,
        )
    }

    /// Reserved key for erased entries; distinct from `empty_key()`.
    #[must_use]
    pub fn tombstone_key() -> Self {
        Self::new(
            IndexSubset::tombstone_sentinel(),
            IndexSubset::tombstone_sentinel(),
            None,
        )
    }

    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        self.parameter_indices.is_sentinel() || self.result_indices.is_sentinel()
    }

    #[must_use]
    pub fn canonical_signature(&self) -> Option<GenericSignature> {
        self.derivative_generic_signature
            .as_ref()
            .map(GenericSignature::canonical)
    }

    /// Suffix used when naming synthesized functions, e.g. `src_0_wrt_0_1`.
    #[must_use]
    pub fn mangled_suffix(&self) -> String {
        let join = |subset: &IndexSubset| {
            subset
                .iter()
                .map(|index| index.to_string())
                .collect::<Vec<_>>()
                .join("_")
        };
        format!(
            "src_{}_wrt_{}",
            join(&self.result_indices),
            join(&self.parameter_indices)
        )
    }
}

impl PartialEq for AutoDiffConfig {
    fn eq(&self, other: &Self) -> bool {
        self.parameter_indices == other.parameter_indices
            && self.result_indices == other.result_indices
            && self.canonical_signature() == other.canonical_signature()
    }
}

impl Eq for AutoDiffConfig {}

impl Hash for AutoDiffConfig {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.parameter_indices.hash(state);
        self.result_indices.hash(state);
        self.canonical_signature().hash(state);
    }
}

impl fmt::Display for AutoDiffConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(parameters={} results={}",
            self.parameter_indices, self.result_indices
        )?;
        if let Some(signature) = &self.derivative_generic_signature {
            write!(f, " where={signature}")?;
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GenericParamType, Requirement, Type, DIFFERENTIABLE};
    use std::collections::HashSet;

    fn signature(name: &str, reversed: bool) -> GenericSignature {
        let param = GenericParamType {
            name: name.into(),
            depth: 0,
            index: 0,
        };
        let ty = Type::GenericParam(param.clone());
        let mut requirements = vec![
            Requirement::conformance(ty.clone(), DIFFERENTIABLE),
            Requirement::same_type(Type::member(ty, "TangentVector"), Type::float()),
        ];
        if reversed {
            requirements.reverse();
        }
        GenericSignature::new(vec![param], requirements)
    }

    fn config(sig: Option<GenericSignature>) -> AutoDiffConfig {
        AutoDiffConfig::new(
            IndexSubset::from_indices(2, [0, 1]),
            IndexSubset::from_indices(1, [0]),
            sig,
        )
    }

    #[test]
    fn equivalent_signatures_collide() {
        let lhs = config(Some(signature("T", false)));
        let rhs = config(Some(signature("Scalar", true)));
        assert_eq!(lhs, rhs);
        let set: HashSet<AutoDiffConfig> = [lhs, rhs].into_iter().collect();
        assert_eq!(set.len(), 1);
        assert_ne!(config(None), config(Some(signature("T", false))));
    }

    #[test]
    fn sentinels_never_match_real_configs() {
        let empty = AutoDiffConfig::empty_key();
        let tombstone = AutoDiffConfig::tombstone_key();
        assert!(empty.is_sentinel() && tombstone.is_sentinel());
        assert_ne!(empty, tombstone);
        assert_ne!(empty, config(None));
        assert!(!config(None).is_sentinel());
    }

    #[test]
    fn mangled_suffix_lists_indices() {
        assert_eq!(config(None).mangled_suffix(), "src_0_wrt_0_1");
        assert_eq!(
            config(None).to_string(),
            "(parameters={0, 1} results={0})"
        );
    }
}
