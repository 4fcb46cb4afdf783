//! Substitution matrices and raw symbol distances
//!
//! A [`SymbolDistance`] is the raw pairwise metric from which the
//! [`DistanceCache`](crate::distance_cache::DistanceCache) tables are built.
//! The set of metrics is small and closed, so it is an enum rather than a
//! trait hierarchy.

use crate::alphabet::{Alphabet, Symbol};
use crate::distance_cache::Distance;
use crate::{Error, Result};

const BLOSUM62: &str = "\
# Matrix made by matblas from blosum62.iij
#  BLOSUM Clustered Scoring Matrix in 1/2 Bit Units
   A  R  N  D  C  Q  E  G  H  I  L  K  M  F  P  S  T  W  Y  V  B  Z  X  *
A  4 -1 -2 -2  0 -1 -1  0 -2 -1 -1 -1 -1 -2 -1  1  0 -3 -2  0 -2 -1  0 -4
R -1  5  0 -2 -3  1  0 -2  0 -3 -2  2 -1 -3 -2 -1 -1 -3 -2 -3 -1  0 -1 -4
N -2  0  6  1 -3  0  0  0  1 -3 -3  0 -2 -3 -2  1  0 -4 -2 -3  3  0 -1 -4
D -2 -2  1  6 -3  0  2 -1 -1 -3 -4 -1 -3 -3 -1  0 -1 -4 -3 -3  4  1 -1 -4
C  0 -3 -3 -3  9 -3 -4 -3 -3 -1 -1 -3 -1 -2 -3 -1 -1 -2 -2 -1 -3 -3 -2 -4
Q -1  1  0  0 -3  5  2 -2  0 -3 -2  1  0 -3 -1  0 -1 -2 -1 -2  0  3 -1 -4
E -1  0  0  2 -4  2  5 -2  0 -3 -3  1 -2 -3 -1  0 -1 -3 -2 -2  1  4 -1 -4
G  0 -2  0 -1 -3 -2 -2  6 -2 -4 -4 -2 -3 -3 -2  0 -2 -2 -3 -3 -1 -2 -1 -4
H -2  0  1 -1 -3  0  0 -2  8 -3 -3 -1 -2 -1 -2 -1 -2 -2  2 -3  0  0 -1 -4
I -1 -3 -3 -3 -1 -3 -3 -4 -3  4  2 -3  1  0 -3 -2 -1 -3 -1  3 -3 -3 -1 -4
L -1 -2 -3 -4 -1 -2 -3 -4 -3  2  4 -2  2  0 -3 -2 -1 -2 -1  1 -4 -3 -1 -4
K -1  2  0 -1 -3  1  1 -2 -1 -3 -2  5 -1 -3 -1  0 -1 -3 -2 -2  0  1 -1 -4
M -1 -1 -2 -3 -1  0 -2 -3 -2  1  2 -1  5  0 -2 -1 -1 -1 -1  1 -3 -1 -1 -4
F -2 -3 -3 -3 -2 -3 -3 -3 -1  0  0 -3  0  6 -4 -2 -2  1  3 -1 -3 -3 -1 -4
P -1 -2 -2 -1 -3 -1 -1 -2 -2 -3 -3 -1 -2 -4  7 -1 -1 -4 -3 -2 -2 -1 -2 -4
S  1 -1  1  0 -1  0  0  0 -1 -2 -2  0 -1 -2 -1  4  1 -3 -2 -2  0  0  0 -4
T  0 -1  0 -1 -1 -1 -1 -2 -2 -1 -1 -1 -1 -2 -1  1  5 -2 -2  0 -1 -1  0 -4
W -3 -3 -4 -4 -2 -2 -3 -2 -2 -3 -2 -3 -1  1 -4 -3 -2 11  2 -3 -4 -3 -2 -4
Y -2 -2 -2 -3 -2 -1 -2 -3  2 -1 -1 -2 -1  3 -3 -2 -2  2  7 -1 -3 -2 -1 -4
V  0 -3 -3 -3 -1 -2 -2 -3 -3  3  1 -2  1 -1 -2 -2  0 -3 -1  4 -3 -2 -1 -4
B -2 -1  3  4 -3  0  1 -1  0 -3 -4  0 -3 -3 -2  0 -1 -4 -3 -3  4  1 -1 -4
Z -1  0  0  1 -3  3  4 -2  0 -3 -3  1 -1 -3 -1  0 -1 -3 -2 -2  1  4 -1 -4
X  0 -1 -1 -1 -2 -1 -1 -1 -1 -1 -1 -1 -1 -1 -2  0  0 -2 -1 -1 -1 -1 -1 -4
* -4 -4 -4 -4 -4 -4 -4 -4 -4 -4 -4 -4 -4 -4 -4 -4 -4 -4 -4 -4 -4 -4 -4  1
";

/// A square substitution (similarity) matrix over an alphabet
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimilarityMatrix {
    symbols: Vec<u8>,
    scores: Vec<i32>,
    max_score: i32,
}

impl SimilarityMatrix {
    /// The BLOSUM62 matrix, over [`Alphabet::PROTEIN`]
    pub fn blosum62() -> Self {
        Self::parse(BLOSUM62).expect("embedded BLOSUM62 is well formed")
    }

    /// Parse a matrix in NCBI text format
    ///
    /// Lines starting with `#` are comments. The first remaining line lists
    /// the column symbols; each following line is a row symbol followed by
    /// one integer score per column.
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text
            .lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty() && !l.trim_start().starts_with('#'));

        let (_, header) = lines
            .next()
            .ok_or_else(|| Error::parse(0, "", "matrix has no header row"))?;
        let symbols: Vec<u8> = header
            .split_whitespace()
            .map(|t| t.as_bytes()[0].to_ascii_uppercase())
            .collect();
        let n = symbols.len();

        let mut scores = vec![0i32; n * n];
        let mut seen = vec![false; n];
        let mut rows = 0;
        for (idx, line) in lines {
            let mut tokens = line.split_whitespace();
            let row_symbol = tokens
                .next()
                .map(|t| t.as_bytes()[0].to_ascii_uppercase())
                .ok_or_else(|| Error::parse(idx + 1, line, "empty row"))?;
            let row = symbols
                .iter()
                .position(|&c| c == row_symbol)
                .ok_or_else(|| Error::parse(idx + 1, line, "row symbol not in header"))?;
            if std::mem::replace(&mut seen[row], true) {
                return Err(Error::parse(idx + 1, line, "duplicate row"));
            }
            let values: Vec<i32> = tokens
                .map(|t| t.parse::<i32>())
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::parse(idx + 1, line, format!("invalid score: {e}")))?;
            if values.len() != n {
                return Err(Error::parse(
                    idx + 1,
                    line,
                    format!("expected {} scores, got {}", n, values.len()),
                ));
            }
            scores[row * n..(row + 1) * n].copy_from_slice(&values);
            rows += 1;
        }
        if rows != n {
            return Err(Error::parse(0, "", format!("expected {n} rows, got {rows}")));
        }

        let max_score = scores.iter().copied().max().unwrap_or(0);
        Ok(Self {
            symbols,
            scores,
            max_score,
        })
    }

    /// Column symbols, in order
    pub fn symbols(&self) -> &[u8] {
        &self.symbols
    }

    /// Score of the pair `(x, y)`, in matrix order
    #[inline]
    pub fn score(&self, x: Symbol, y: Symbol) -> i32 {
        self.scores[x as usize * self.symbols.len() + y as usize]
    }

    /// Largest score in the matrix
    pub fn max_score(&self) -> i32 {
        self.max_score
    }
}

/// Raw distance between two symbols
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SymbolDistance {
    /// Ungapped edit distance: 0 for equal symbols, 1 otherwise
    Hamming,
    /// `max(B) - B(x, y)`
    BlosumDifference(SimilarityMatrix),
    /// `B(x, x) + B(y, y) - 2 B(x, y)`, clamped at zero
    Halperin(SimilarityMatrix),
}

impl SymbolDistance {
    /// Check that the metric is defined over `alphabet`
    pub fn validate(&self, alphabet: &Alphabet) -> Result<()> {
        match self {
            SymbolDistance::Hamming => Ok(()),
            SymbolDistance::BlosumDifference(m) | SymbolDistance::Halperin(m) => {
                if m.symbols() == alphabet.symbols() {
                    Ok(())
                } else {
                    Err(Error::config(format!(
                        "matrix symbols {:?} do not match alphabet {:?}",
                        String::from_utf8_lossy(m.symbols()),
                        String::from_utf8_lossy(alphabet.symbols())
                    )))
                }
            }
        }
    }

    /// Distance between two symbols
    #[inline]
    pub fn evaluate(&self, x: Symbol, y: Symbol) -> Distance {
        match self {
            SymbolDistance::Hamming => (x != y) as Distance,
            SymbolDistance::BlosumDifference(m) => (m.max_score() - m.score(x, y)) as Distance,
            SymbolDistance::Halperin(m) => {
                let d = m.score(x, x) + m.score(y, y) - 2 * m.score(x, y);
                d.max(0) as Distance
            }
        }
    }

    /// Short name, used in logs and CLI flags
    pub fn name(&self) -> &'static str {
        match self {
            SymbolDistance::Hamming => "hamming",
            SymbolDistance::BlosumDifference(_) => "blosum-difference",
            SymbolDistance::Halperin(_) => "halperin",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blosum62_shape() {
        let m = SimilarityMatrix::blosum62();
        assert_eq!(m.symbols(), Alphabet::PROTEIN.as_bytes());
        assert_eq!(m.max_score(), 11);
        let protein = Alphabet::protein();
        let w = protein.encode(b'W').unwrap();
        let a = protein.encode(b'A').unwrap();
        assert_eq!(m.score(w, w), 11);
        assert_eq!(m.score(a, a), 4);
    }

    #[test]
    fn test_blosum62_symmetric() {
        let m = SimilarityMatrix::blosum62();
        let n = m.symbols().len() as u8;
        for x in 0..n {
            for y in 0..n {
                assert_eq!(m.score(x, y), m.score(y, x));
            }
        }
    }

    #[test]
    fn test_parse_rejects_short_row() {
        let text = "  A C\nA 1 0\nC 0\n";
        let err = SimilarityMatrix::parse(text).unwrap_err();
        assert!(err.to_string().contains("expected 2 scores"));
    }

    #[test]
    fn test_parse_rejects_duplicated_row() {
        // right number of rows, but C is given twice and G never
        let text = "  A C G\nA 1 0 0\nC 0 1 0\nC 0 1 0\n";
        let err = SimilarityMatrix::parse(text).unwrap_err();
        assert!(matches!(err, Error::Parse { line: 4, .. }), "{err}");
        assert!(err.to_string().contains("duplicate row"));
    }

    #[test]
    fn test_hamming() {
        let d = SymbolDistance::Hamming;
        assert_eq!(d.evaluate(1, 1), 0);
        assert_eq!(d.evaluate(1, 2), 1);
    }

    #[test]
    fn test_blosum_difference_self_distance_can_be_positive() {
        let protein = Alphabet::protein();
        let d = SymbolDistance::BlosumDifference(SimilarityMatrix::blosum62());
        let a = protein.encode(b'A').unwrap();
        let w = protein.encode(b'W').unwrap();
        assert_eq!(d.evaluate(w, w), 0);
        assert_eq!(d.evaluate(a, a), 7);
    }

    #[test]
    fn test_halperin_is_zero_on_diagonal() {
        let d = SymbolDistance::Halperin(SimilarityMatrix::blosum62());
        for x in 0..24u8 {
            assert_eq!(d.evaluate(x, x), 0);
        }
    }

    #[test]
    fn test_validate_alphabet_mismatch() {
        let d = SymbolDistance::Halperin(SimilarityMatrix::blosum62());
        assert!(d.validate(&Alphabet::protein()).is_ok());
        assert!(d.validate(&Alphabet::dna()).is_err());
        assert!(SymbolDistance::Hamming.validate(&Alphabet::dna()).is_ok());
    }
}
