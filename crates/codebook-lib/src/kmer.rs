//! K-mer entities
//!
//! A [`Kmer`] is the canonical representative of one distinct k-mer string.
//! Entities live in an arena (a `Vec<Kmer>`) owned by a
//! [`KmerIndex`](crate::kmer_index::KmerIndex) or a
//! [`Codebook`](crate::codebook::Codebook) and are referred to by their
//! [`KmerId`], which is their position in that arena.
//!
//! Entities borrow their content and packed encoding from the owning
//! [`EncodedSequence`]; the borrow checker enforces that sequences outlive
//! every k-mer structure built over them.

use crate::alphabet::{Alphabet, KmerWord, Symbol};
use crate::hasher::SymbolHasher;
use crate::sequence::EncodedSequence;
use crate::substring::Substring;

/// Position of a [`Kmer`] in its arena (also its serial number)
pub type KmerId = usize;

/// One occurrence of a k-mer in the corpus
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Instance {
    /// Position of the sequence in the sequence collection
    pub sequence: usize,
    /// Offset of the k-mer in that sequence
    pub position: usize,
}

impl Instance {
    /// Create a new instance
    pub fn new(sequence: usize, position: usize) -> Self {
        Self { sequence, position }
    }
}

/// A distinct k-mer with all of its occurrences
#[derive(Clone, Debug)]
pub struct Kmer<'a> {
    substring: Substring<'a>,
    packed: &'a [KmerWord],
    instances: Vec<Instance>,
    serial: KmerId,
}

impl<'a> Kmer<'a> {
    /// Create the entity for the k-mer at `position` of `sequence`
    ///
    /// `sequence_index` is the position of `sequence` in its collection.
    pub fn new(
        sequence: &'a EncodedSequence,
        sequence_index: usize,
        position: usize,
        serial: KmerId,
        hasher: &SymbolHasher,
    ) -> Self {
        Self {
            substring: Substring::new(sequence.symbols(), position, sequence.k(), hasher),
            packed: sequence.encoded_kmer(position),
            instances: vec![Instance::new(sequence_index, position)],
            serial,
        }
    }

    /// Record another occurrence of the same content
    #[inline]
    pub fn add_instance(&mut self, instance: Instance) {
        self.instances.push(instance);
    }

    /// Content view
    #[inline]
    pub fn substring(&self) -> &Substring<'a> {
        &self.substring
    }

    /// Symbol codes of the k-mer
    #[inline]
    pub fn symbols(&self) -> &'a [Symbol] {
        self.substring.symbols()
    }

    /// K-mer length
    #[inline]
    pub fn len(&self) -> usize {
        self.substring.len()
    }

    /// Whether the k-mer is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.substring.is_empty()
    }

    /// Packed encoding, `⌈k/3⌉` words
    #[inline]
    pub fn packed_encoding(&self) -> &'a [KmerWord] {
        self.packed
    }

    /// Every occurrence of this k-mer
    #[inline]
    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    /// First recorded occurrence
    #[inline]
    pub fn first_instance(&self) -> Instance {
        self.instances[0]
    }

    /// Number of occurrences
    #[inline]
    pub fn num_instances(&self) -> usize {
        self.instances.len()
    }

    /// Serial number assigned when the entity was created
    #[inline]
    pub fn serial(&self) -> KmerId {
        self.serial
    }

    /// Decode to text
    pub fn to_string(&self, alphabet: &Alphabet) -> String {
        alphabet.decode_string(self.symbols())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kmer_from_sequence() {
        let dna = Alphabet::dna();
        let seq = EncodedSequence::encode("s", b"GATTACA", &dna, 3).unwrap();
        let hasher = SymbolHasher::for_alphabet(4);
        let mut kmer = Kmer::new(&seq, 0, 2, 5, &hasher);

        assert_eq!(kmer.to_string(&dna), "TTA");
        assert_eq!(kmer.serial(), 5);
        assert_eq!(kmer.len(), 3);
        assert_eq!(kmer.packed_encoding(), seq.encoded_kmer(2));
        assert_eq!(kmer.first_instance(), Instance::new(0, 2));

        kmer.add_instance(Instance::new(3, 9));
        assert_eq!(kmer.num_instances(), 2);
        assert_eq!(kmer.instances()[1], Instance::new(3, 9));
    }

    #[test]
    fn test_instance_ordering() {
        assert!(Instance::new(0, 5) < Instance::new(1, 0));
        assert!(Instance::new(1, 0) < Instance::new(1, 1));
    }
}
