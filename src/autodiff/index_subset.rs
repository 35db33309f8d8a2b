use std::fmt;

const WORD_BITS: usize = u64::BITS as usize;
const EMPTY_SENTINEL: usize = usize::MAX;
const TOMBSTONE_SENTINEL: usize = usize::MAX - 1;

/// Fixed-capacity set of parameter or result indices.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexSubset {
    capacity: usize,
    words: Vec<u64>,
}

impl IndexSubset {
    /// Empty subset able to hold indices `0..capacity`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity < TOMBSTONE_SENTINEL,
            "index subset capacity collides with a sentinel"
        );
        Self {
            capacity,
            words: vec![0; capacity.div_ceil(WORD_BITS)],
        }
    }

    #[must_use]
    pub fn from_indices(capacity: usize, indices: impl IntoIterator<Item = usize>) -> Self {
        let mut subset = Self::new(capacity);
        for index in indices {
            subset.insert(index);
        }
        subset
    }

    #[must_use]
    pub fn full(capacity: usize) -> Self {
        Self::from_indices(capacity, 0..capacity)
    }

    pub(crate) fn empty_sentinel() -> Self {
        Self {
            capacity: EMPTY_SENTINEL,
            words: Vec::new(),
        }
    }

    pub(crate) fn tombstone_sentinel() -> Self {
        Self {
            capacity: TOMBSTONE_SENTINEL,
            words: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        self.capacity >= TOMBSTONE_SENTINEL
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert `index`. Panics when `index` is outside the capacity.
    pub fn insert(&mut self, index: usize) {
        assert!(
            index < self.capacity,
            "index {index} out of range for subset of capacity {}",
            self.capacity
        );
        self.words[index / WORD_BITS] |= 1u64 << (index % WORD_BITS);
    }

    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        index < self.capacity
            && self
                .words
                .get(index / WORD_BITS)
                .is_some_and(|word| *word & (1u64 << (index % WORD_BITS)) != 0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|word| *word == 0)
    }

    /// Number of indices in the subset.
    #[must_use]
    pub fn len(&self) -> usize {
        self.words.iter().map(|word| word.count_ones() as usize).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.capacity.min(self.words.len() * WORD_BITS)).filter(|index| self.contains(*index))
    }

    #[must_use]
    pub fn indices(&self) -> Vec<usize> {
        self.iter().collect()
    }

    #[must_use]
    pub fn is_subset_of(&self, other: &IndexSubset) -> bool {
        self.iter().all(|index| other.contains(index))
    }

    /// Same indices with a different capacity.
    #[must_use]
    pub fn with_capacity(&self, capacity: usize) -> Self {
        Self::from_indices(capacity, self.iter().filter(|index| *index < capacity))
    }

    /// `S` for each set index and `U` for each unset one, as used in mangled names.
    #[must_use]
    pub fn bit_string(&self) -> String {
        (0..self.capacity)
            .map(|index| if self.contains(index) { 'S' } else { 'U' })
            .collect()
    }
}

impl fmt::Display for IndexSubset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (position, index) in self.iter().enumerate() {
            if position > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{index}")?;
        }
        f.write_str("}")
    }
}

impl fmt::Debug for IndexSubset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_sentinel() {
            return f.write_str("IndexSubset(<sentinel>)");
        }
        write!(f, "IndexSubset({}/{self})", self.capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_contains_and_iterate() {
        let subset = IndexSubset::from_indices(70, [0, 2, 65]);
        assert!(subset.contains(2));
        assert!(subset.contains(65));
        assert!(!subset.contains(1));
        assert!(!subset.contains(500));
        assert_eq!(subset.indices(), vec![0, 2, 65]);
        assert_eq!(subset.len(), 3);
        assert_eq!(subset.to_string(), "{0, 2, 65}");
    }

    #[test]
    fn subset_relations_and_bit_strings() {
        let small = IndexSubset::from_indices(3, [1]);
        let full = IndexSubset::full(3);
        assert!(small.is_subset_of(&full));
        assert!(!full.is_subset_of(&small));
        assert_eq!(small.bit_string(), "USU");
        assert_eq!(full.bit_string(), "SSS");
        assert!(IndexSubset::new(4).is_empty());
        assert_eq!(small.with_capacity(5).bit_string(), "USUUU");
    }

    #[test]
    fn capacity_participates_in_equality() {
        assert_ne!(
            IndexSubset::from_indices(2, [0]),
            IndexSubset::from_indices(3, [0])
        );
    }

    #[test]
    fn sentinels_are_distinct_from_real_subsets() {
        let empty = IndexSubset::empty_sentinel();
        let tombstone = IndexSubset::tombstone_sentinel();
        assert!(empty.is_sentinel() && tombstone.is_sentinel());
        assert_ne!(empty, tombstone);
        assert_ne!(empty, IndexSubset::new(0));
        assert!(empty.is_empty());
        assert_eq!(format!("{tombstone:?}"), "IndexSubset(<sentinel>)");
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn inserting_past_capacity_panics() {
        let mut subset = IndexSubset::new(2);
        subset.insert(2);
    }
}
