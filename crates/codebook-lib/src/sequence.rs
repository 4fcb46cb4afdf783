//! Encoded sequences and the packed k-mer matrix
//!
//! An [`EncodedSequence`] stores its symbol codes together with a packed
//! k-mer matrix: row `p` holds the `⌈k/3⌉` words of the k-mer starting at
//! offset `p`, so the packed encoding of any k-mer is an O(1) slice.
//!
//! ```text
//! symbols:  s0 s1 s2 s3 s4 s5 s6 ...          (k = 5)
//! row 0:    [pack(s0 s1 s2), pack(s3 s4)]
//! row 1:    [pack(s1 s2 s3), pack(s4 s5)]
//! ```

use crate::alphabet::{pack, Alphabet, KmerWord, Symbol};
use crate::constants::{words_per_kmer, SYMBOLS_PER_WORD};
use crate::Result;
use ahash::AHashMap;

/// A sequence encoded over an alphabet, with its packed k-mer matrix
#[derive(Clone, Debug)]
pub struct EncodedSequence {
    id: String,
    symbols: Vec<Symbol>,
    k: usize,
    row_len: usize,
    packed: Vec<KmerWord>,
}

impl EncodedSequence {
    /// Encode `text` over `alphabet` and pack all of its k-mers
    ///
    /// # Errors
    /// Returns an error if `text` contains a character outside the alphabet
    /// or `k` is zero.
    pub fn encode(id: impl Into<String>, text: &[u8], alphabet: &Alphabet, k: usize) -> Result<Self> {
        let symbols = alphabet.encode_sequence(text)?;
        Self::from_symbols(id, symbols, alphabet.size(), k)
    }

    /// Build from symbol codes already in `[0, alphabet_size)`
    pub fn from_symbols(
        id: impl Into<String>,
        symbols: Vec<Symbol>,
        alphabet_size: usize,
        k: usize,
    ) -> Result<Self> {
        if k == 0 {
            return Err(crate::Error::config("k-mer length must be positive"));
        }
        let row_len = words_per_kmer(k);
        let num_kmers = kmer_count(symbols.len(), k);

        let mut packed = Vec::with_capacity(num_kmers * row_len);
        for pos in 0..num_kmers {
            let kmer = &symbols[pos..pos + k];
            packed.extend(kmer.chunks(SYMBOLS_PER_WORD).map(|c| pack(c, alphabet_size)));
        }

        Ok(Self {
            id: id.into(),
            symbols,
            k,
            row_len,
            packed,
        })
    }

    /// Sequence identifier
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Number of symbols
    #[inline]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Whether the sequence has no symbols
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Symbol codes
    #[inline]
    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// K-mer length of the packed matrix
    #[inline]
    pub fn k(&self) -> usize {
        self.k
    }

    /// Number of k-mers of length `k` (0 if the sequence is shorter than `k`)
    #[inline]
    pub fn kmer_count(&self, k: usize) -> usize {
        kmer_count(self.symbols.len(), k)
    }

    /// Symbols of the k-mer starting at `pos`
    #[inline]
    pub fn kmer_symbols(&self, pos: usize) -> &[Symbol] {
        &self.symbols[pos..pos + self.k]
    }

    /// Packed encoding of the k-mer starting at `pos`
    #[inline]
    pub fn encoded_kmer(&self, pos: usize) -> &[KmerWord] {
        &self.packed[pos * self.row_len..(pos + 1) * self.row_len]
    }
}

#[inline]
fn kmer_count(len: usize, k: usize) -> usize {
    if len >= k {
        len - k + 1
    } else {
        0
    }
}

/// Encode a batch of `(id, text)` records
pub fn encode_all<I, S>(records: I, alphabet: &Alphabet, k: usize) -> Result<Vec<EncodedSequence>>
where
    I: IntoIterator<Item = (S, Vec<u8>)>,
    S: Into<String>,
{
    records
        .into_iter()
        .map(|(id, text)| EncodedSequence::encode(id, &text, alphabet, k))
        .collect()
}

/// Identifier lookup over a borrowed sequence collection
#[derive(Clone, Debug)]
pub struct SequenceIndex<'a> {
    sequences: &'a [EncodedSequence],
    by_id: AHashMap<&'a str, usize>,
}

impl<'a> SequenceIndex<'a> {
    /// Index `sequences` by id; on duplicate ids the first occurrence wins
    pub fn new(sequences: &'a [EncodedSequence]) -> Self {
        let mut by_id = AHashMap::with_capacity(sequences.len());
        for (i, seq) in sequences.iter().enumerate() {
            by_id.entry(seq.id()).or_insert(i);
        }
        Self { sequences, by_id }
    }

    /// Position of the sequence with this id
    #[inline]
    pub fn position(&self, id: &str) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    /// Sequence with this id
    #[inline]
    pub fn get(&self, id: &str) -> Option<&'a EncodedSequence> {
        self.position(id).map(|i| &self.sequences[i])
    }

    /// The underlying sequences
    #[inline]
    pub fn sequences(&self) -> &'a [EncodedSequence] {
        self.sequences
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_counts_kmers() {
        let dna = Alphabet::dna();
        let seq = EncodedSequence::encode("s1", b"ACGTACGT", &dna, 7).unwrap();
        assert_eq!(seq.len(), 8);
        assert_eq!(seq.kmer_count(7), 2);
        assert_eq!(seq.kmer_count(9), 0);
    }

    #[test]
    fn test_short_sequence_has_no_rows() {
        let dna = Alphabet::dna();
        let seq = EncodedSequence::encode("short", b"ACG", &dna, 5).unwrap();
        assert_eq!(seq.kmer_count(5), 0);
        assert!(!seq.is_empty());
    }

    #[test]
    fn test_encoded_kmer_rows() {
        let dna = Alphabet::dna();
        let seq = EncodedSequence::encode("s", b"ACGTA", &dna, 4).unwrap();
        // ACGT -> [pack(A,C,G), pack(T)] = [6, 3]
        assert_eq!(seq.encoded_kmer(0), &[6, 3]);
        // CGTA -> [pack(C,G,T), pack(A)] = [1*16 + 2*4 + 3, 0]
        assert_eq!(seq.encoded_kmer(1), &[27, 0]);
        assert_eq!(seq.kmer_symbols(1), &[1, 2, 3, 0]);
    }

    #[test]
    fn test_invalid_character() {
        let dna = Alphabet::dna();
        assert!(EncodedSequence::encode("bad", b"ACGN", &dna, 2).is_err());
    }

    #[test]
    fn test_sequence_index_lookup() {
        let dna = Alphabet::dna();
        let seqs = encode_all(
            vec![("a", b"ACGT".to_vec()), ("b", b"TTTT".to_vec())],
            &dna,
            3,
        )
        .unwrap();
        let index = SequenceIndex::new(&seqs);
        assert_eq!(index.position("b"), Some(1));
        assert_eq!(index.get("a").unwrap().len(), 4);
        assert!(index.get("c").is_none());
    }
}
