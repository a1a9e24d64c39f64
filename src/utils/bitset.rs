//! A fixed-capacity bit set.
//!
//! The importer keeps one bit per bytecode offset to mark block leaders, SSA promotion one
//! bit per block for definition and phi sets. Both need O(1) membership and an in-order
//! walk over the set bits, which [`BitSet::next_set`] provides by skipping whole zero words.

/// A set of small integers backed by 64-bit words.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BitSet {
    words: Vec<u64>,
    len: usize,
}

impl BitSet {
    /// Creates an empty set able to hold `0..capacity`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(64)],
            len: capacity,
        }
    }

    /// Returns `true` if no bit is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Sets bit `index`. Returns `true` if it was not set before.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not below the capacity.
    pub fn insert(&mut self, index: usize) -> bool {
        assert!(index < self.len, "index out of bounds");
        let mask = 1u64 << (index % 64);
        let word = &mut self.words[index / 64];
        let fresh = *word & mask == 0;
        *word |= mask;
        fresh
    }

    /// Returns `true` if bit `index` is set. Indices past the capacity are never set.
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        index < self.len && self.words[index / 64] & (1u64 << (index % 64)) != 0
    }

    /// Clears every bit.
    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    /// Smallest set bit that is `>= from`.
    #[must_use]
    pub fn next_set(&self, from: usize) -> Option<usize> {
        if from >= self.len {
            return None;
        }
        let mut word_idx = from / 64;
        let mut word = self.words[word_idx] & (u64::MAX << (from % 64));
        loop {
            if word != 0 {
                let index = word_idx * 64 + word.trailing_zeros() as usize;
                return (index < self.len).then_some(index);
            }
            word_idx += 1;
            word = *self.words.get(word_idx)?;
        }
    }

    /// Iterates over set bits in increasing order.
    pub fn iter(&self) -> BitSetIter<'_> {
        BitSetIter { set: self, next: 0 }
    }
}

impl std::fmt::Debug for BitSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Iterator over the set bits of a [`BitSet`].
pub struct BitSetIter<'a> {
    set: &'a BitSet,
    next: usize,
}

impl Iterator for BitSetIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let index = self.set.next_set(self.next)?;
        self.next = index + 1;
        Some(index)
    }
}
