//! Borrowed, hashable views of k-mer content

use crate::alphabet::Symbol;
use crate::hasher::SymbolHasher;
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// An immutable view of `length` symbols of a sequence
///
/// Equality and ordering compare content byte-wise. The hash is computed
/// once from the content at construction; the borrowed symbols cannot
/// change while the view exists, so the cached value stays consistent.
#[derive(Clone, Copy, Debug)]
pub struct Substring<'a> {
    symbols: &'a [Symbol],
    offset: usize,
    hash: u64,
}

impl<'a> Substring<'a> {
    /// View `length` symbols of `sequence` starting at `offset`
    ///
    /// # Panics
    /// Panics if the range is out of bounds.
    pub fn new(sequence: &'a [Symbol], offset: usize, length: usize, hasher: &SymbolHasher) -> Self {
        let symbols = &sequence[offset..offset + length];
        Self {
            symbols,
            offset,
            hash: hasher.hash_symbols(symbols),
        }
    }

    /// The viewed symbols
    #[inline]
    pub fn symbols(&self) -> &'a [Symbol] {
        self.symbols
    }

    /// Offset of the view in its sequence
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of symbols
    #[inline]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Whether the view is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Cached content hash
    #[inline]
    pub fn hash_value(&self) -> u64 {
        self.hash
    }
}

impl PartialEq for Substring<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.symbols == other.symbols
    }
}

impl Eq for Substring<'_> {}

impl PartialOrd for Substring<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Substring<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.symbols.cmp(other.symbols)
    }
}

impl Hash for Substring<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_content_at_different_offsets() {
        let hasher = SymbolHasher::default();
        let a = [0u8, 1, 2, 0, 1, 2];
        let b = [3u8, 0, 1, 2];
        let s1 = Substring::new(&a, 3, 3, &hasher);
        let s2 = Substring::new(&b, 1, 3, &hasher);
        assert_eq!(s1, s2);
        assert_eq!(s1.hash_value(), s2.hash_value());
        assert_ne!(s1.offset(), s2.offset());
    }

    #[test]
    fn test_ordering_is_bytewise() {
        let hasher = SymbolHasher::for_alphabet(4);
        let a = [0u8, 0, 1];
        let b = [0u8, 1, 0];
        let s1 = Substring::new(&a, 0, 3, &hasher);
        let s2 = Substring::new(&b, 0, 3, &hasher);
        assert!(s1 < s2);
        assert_ne!(s1, s2);
    }
}
