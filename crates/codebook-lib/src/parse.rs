//! FASTA/FASTQ loading with automatic decompression
//!
//! Reads sequences with needletail (gzip, bzip2, xz and zstd are detected
//! transparently), validates every character against the clustering
//! alphabet and packs the k-mer matrix of each record.

use crate::alphabet::Alphabet;
use crate::sequence::EncodedSequence;
use anyhow::{Context, Result};
use needletail::parse_fastx_file;
use std::path::Path;

/// Parse a FASTA/FASTQ file and call a function for each record
///
/// The callback receives the record id (the header up to the first
/// whitespace) and the raw sequence bytes.
///
/// # Errors
/// Returns error if:
/// - File cannot be opened
/// - File format is invalid
/// - The callback fails
pub fn parse_sequences<P, F>(path: P, mut callback: F) -> Result<()>
where
    P: AsRef<Path>,
    F: FnMut(&str, &[u8]) -> Result<()>,
{
    let path = path.as_ref();

    let mut reader = parse_fastx_file(path)
        .with_context(|| format!("Failed to open sequence file: {}", path.display()))?;

    while let Some(record) = reader.next() {
        let record = record
            .with_context(|| format!("Failed to parse sequence record in {}", path.display()))?;
        let header = String::from_utf8_lossy(record.id());
        let id = header.split_whitespace().next().unwrap_or_default();
        let seq = record.seq();
        callback(id, &seq)?;
    }

    Ok(())
}

/// Load every record of `path`, encoded over `alphabet` and packed for `k`
///
/// # Errors
/// Fails on unreadable input or a character outside the alphabet; the
/// error names the offending record.
pub fn read_sequences<P: AsRef<Path>>(path: P, alphabet: &Alphabet, k: usize) -> Result<Vec<EncodedSequence>> {
    let path = path.as_ref();
    let mut sequences = Vec::new();
    parse_sequences(path, |id, seq| {
        let encoded = EncodedSequence::encode(id, seq, alphabet, k)
            .with_context(|| format!("Invalid sequence '{}' in {}", id, path.display()))?;
        sequences.push(encoded);
        Ok(())
    })?;
    tracing::info!(
        "Read {} sequences ({} symbols) from {}",
        sequences.len(),
        sequences.iter().map(EncodedSequence::len).sum::<usize>(),
        path.display()
    );
    Ok(sequences)
}

/// Count sequences and total symbols in a file
///
/// # Returns
/// `(num_sequences, total_symbols)`
pub fn count_sequences<P: AsRef<Path>>(path: P) -> Result<(usize, usize)> {
    let mut num_sequences = 0;
    let mut total_symbols = 0;

    parse_sequences(path, |_id, seq| {
        num_sequences += 1;
        total_symbols += seq.len();
        Ok(())
    })?;

    Ok((num_sequences, total_symbols))
}
