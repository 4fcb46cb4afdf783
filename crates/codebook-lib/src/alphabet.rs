//! Symbol alphabets and word packing
//!
//! An alphabet maps characters to small integer codes (`Symbol`s) in
//! `[0, size)`. Up to three consecutive symbols are packed into one
//! [`KmerWord`] with Horner's scheme:
//!
//! ```text
//! pack(x_0, .., x_{n-1}) = Σ x_i · A^(n-1-i)
//! ```
//!
//! so that `unpack(pack(x), n) == x` for every tuple of length `n <= 3`.

use crate::constants::{MAX_ALPHABET_SIZE, SYMBOLS_PER_WORD};
use thiserror::Error;

/// Integer code of one alphabet character
pub type Symbol = u8;

/// Packed encoding of 1 to 3 consecutive symbols
pub type KmerWord = u16;

/// Error type for encoding operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    /// The input byte is not a character of the alphabet
    #[error("Invalid symbol: {:?}", *.0 as char)]
    InvalidSymbol(u8),
    /// The input sequence contains a character outside the alphabet
    #[error("Invalid sequence: {0}")]
    InvalidSequence(String),
    /// The input length does not match the expected k-mer length
    #[error("K-mer length mismatch: expected {expected}, got {actual}")]
    LengthMismatch {
        /// Expected k-mer length
        expected: usize,
        /// Actual length
        actual: usize,
    },
}

/// A finite alphabet of case-insensitive characters
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Alphabet {
    symbols: Vec<u8>,
    lookup: [Option<Symbol>; 256],
}

impl Alphabet {
    /// Nucleotides in code order: A=0, C=1, G=2, T=3
    pub const DNA: &'static str = "ACGT";

    /// Amino acids in BLOSUM62 row order
    pub const PROTEIN: &'static str = "ARNDCQEGHILKMFPSTWYVBZX*";

    /// Build an alphabet from its characters, in code order
    ///
    /// # Errors
    /// Returns a configuration error if the alphabet is empty, too large for
    /// 3-symbol words, or contains a repeated character.
    pub fn new(symbols: &str) -> crate::Result<Self> {
        let bytes: Vec<u8> = symbols.bytes().map(|b| b.to_ascii_uppercase()).collect();
        if bytes.is_empty() || bytes.len() > MAX_ALPHABET_SIZE {
            return Err(crate::Error::config(format!(
                "alphabet must have between 1 and {} symbols, got {}",
                MAX_ALPHABET_SIZE,
                bytes.len()
            )));
        }

        for (i, c) in bytes.iter().enumerate() {
            if bytes[..i].contains(c) {
                return Err(crate::Error::config(format!(
                    "alphabet repeats symbol {:?}",
                    *c as char
                )));
            }
        }
        Ok(Self::from_distinct(bytes))
    }

    /// Build the lookup table for upper-case symbols known to be distinct
    fn from_distinct(symbols: Vec<u8>) -> Self {
        let mut lookup = [None; 256];
        for (code, &c) in symbols.iter().enumerate() {
            lookup[c as usize] = Some(code as Symbol);
            lookup[c.to_ascii_lowercase() as usize] = Some(code as Symbol);
        }
        Self { symbols, lookup }
    }

    /// The four-letter nucleotide alphabet
    pub fn dna() -> Self {
        Self::from_distinct(Self::DNA.as_bytes().to_vec())
    }

    /// The BLOSUM62 amino-acid alphabet
    pub fn protein() -> Self {
        Self::from_distinct(Self::PROTEIN.as_bytes().to_vec())
    }

    /// Number of symbols
    #[inline]
    pub fn size(&self) -> usize {
        self.symbols.len()
    }

    /// Characters of the alphabet, in code order
    #[inline]
    pub fn symbols(&self) -> &[u8] {
        &self.symbols
    }

    /// Encode one character
    #[inline]
    pub fn encode(&self, c: u8) -> Result<Symbol, EncodingError> {
        self.lookup[c as usize].ok_or(EncodingError::InvalidSymbol(c))
    }

    /// Decode one symbol back to its (uppercase) character
    #[inline]
    pub fn decode(&self, s: Symbol) -> u8 {
        self.symbols[s as usize]
    }

    /// Encode a whole sequence
    pub fn encode_sequence(&self, sequence: &[u8]) -> Result<Vec<Symbol>, EncodingError> {
        sequence
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                self.encode(c).map_err(|_| {
                    EncodingError::InvalidSequence(format!(
                        "invalid symbol at position {}: {:?}",
                        i, c as char
                    ))
                })
            })
            .collect()
    }

    /// Decode a slice of symbols to a string
    pub fn decode_string(&self, symbols: &[Symbol]) -> String {
        symbols.iter().map(|&s| self.decode(s) as char).collect()
    }

    /// Pack up to three symbols into a word
    #[inline]
    pub fn pack(&self, tuple: &[Symbol]) -> KmerWord {
        pack(tuple, self.size())
    }
}

/// Pack a tuple of at most three symbols with Horner's scheme in base `alphabet_size`
#[inline]
pub fn pack(tuple: &[Symbol], alphabet_size: usize) -> KmerWord {
    debug_assert!(tuple.len() <= SYMBOLS_PER_WORD);
    let a = alphabet_size as KmerWord;
    tuple.iter().fold(0, |acc, &s| acc * a + s as KmerWord)
}

/// Inverse of [`pack`]: write the `out.len()` symbols encoded in `word`
#[inline]
pub fn unpack(word: KmerWord, alphabet_size: usize, out: &mut [Symbol]) {
    let a = alphabet_size as KmerWord;
    let mut w = word;
    for slot in out.iter_mut().rev() {
        *slot = (w % a) as Symbol;
        w /= a;
    }
}
