//! Streaming parser for the codebook text format
//!
//! Input is read in fixed-size chunks; a line cut by a chunk boundary is
//! carried over and completed by the next read, so files of any size are
//! parsed with bounded memory. Each line is split into tokens and handed to
//! a recursive-descent parser producing one [`Record`].

use crate::constants::{CLUSTER_TAG, DISTANCE_KEY, HEADER_TAG};
use crate::distance_cache::Distance;
use crate::{Error, Result};
use std::io::Read;

/// Reads newline-terminated lines through a fixed-size buffer
pub struct LineReader<R> {
    inner: R,
    chunk: Vec<u8>,
    pending: Vec<u8>,
    start: usize,
    line_number: usize,
    eof: bool,
}

impl<R: Read> LineReader<R> {
    /// Wrap `inner`, reading at most `capacity` bytes at a time
    pub fn with_capacity(capacity: usize, inner: R) -> Self {
        Self {
            inner,
            chunk: vec![0; capacity.max(1)],
            pending: Vec::new(),
            start: 0,
            line_number: 0,
            eof: false,
        }
    }

    /// 1-based number of the last line returned
    #[inline]
    pub fn line_number(&self) -> usize {
        self.line_number
    }

    /// Next line without its terminator (`\n` or `\r\n`) with its 1-based
    /// number, or `None` at end of input
    pub fn next_line(&mut self) -> Result<Option<(usize, &str)>> {
        loop {
            if let Some(rel) = self.pending[self.start..].iter().position(|&b| b == b'\n') {
                let begin = self.start;
                let end = begin + rel;
                self.start = end + 1;
                return self.emit(begin, end).map(Some);
            }
            if self.eof {
                if self.start < self.pending.len() {
                    let (begin, end) = (self.start, self.pending.len());
                    self.start = end;
                    return self.emit(begin, end).map(Some);
                }
                return Ok(None);
            }
            // carry the partial line to the front before refilling
            self.pending.drain(..self.start);
            self.start = 0;
            let n = self.inner.read(&mut self.chunk)?;
            if n == 0 {
                self.eof = true;
            } else {
                self.pending.extend_from_slice(&self.chunk[..n]);
            }
        }
    }

    fn emit(&mut self, begin: usize, mut end: usize) -> Result<(usize, &str)> {
        self.line_number += 1;
        if end > begin && self.pending[end - 1] == b'\r' {
            end -= 1;
        }
        let line_number = self.line_number;
        let bytes = &self.pending[begin..end];
        match std::str::from_utf8(bytes) {
            Ok(line) => Ok((line_number, line)),
            Err(_) => Err(Error::parse(
                line_number,
                String::from_utf8_lossy(bytes),
                "line is not valid UTF-8",
            )),
        }
    }
}

/// Token kinds of the codebook grammar
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    /// A run of characters other than separators
    Word,
    /// `,`
    Comma,
    /// `;`
    Semicolon,
    /// `:`
    Colon,
}

/// A token and its byte span in the line
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Token {
    /// Kind
    pub kind: TokenKind,
    /// Start offset
    pub start: usize,
    /// End offset (exclusive)
    pub end: usize,
}

/// Split a line into tokens
pub fn tokenize(line: &str) -> Vec<Token> {
    let bytes = line.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let kind = match bytes[i] {
            b',' => Some(TokenKind::Comma),
            b';' => Some(TokenKind::Semicolon),
            b':' => Some(TokenKind::Colon),
            _ => None,
        };
        match kind {
            Some(kind) => {
                tokens.push(Token { kind, start: i, end: i + 1 });
                i += 1;
            }
            None => {
                let start = i;
                while i < bytes.len() && !matches!(bytes[i], b',' | b';' | b':') {
                    i += 1;
                }
                tokens.push(Token { kind: TokenKind::Word, start, end: i });
            }
        }
    }
    tokens
}

/// A `sequenceId:offset` reference
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Locator<'l> {
    /// Sequence identifier (may itself contain `:`)
    pub id: &'l str,
    /// Offset of the k-mer in the sequence
    pub offset: usize,
}

/// One parsed line
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Record<'l> {
    /// `KmerLength,<k>`
    Header {
        /// K-mer length
        k: usize,
    },
    /// `Cluster,<size>,<id>:<offset>;<key>:<value>;...;`
    Cluster {
        /// Declared number of members
        size: usize,
        /// Prototype reference
        prototype: Locator<'l>,
        /// Metadata in file order
        metadata: Vec<(&'l str, &'l str)>,
    },
    /// `[distance:<d>;]<id>:<offset>`
    Member {
        /// Cached distance to the prototype, when recorded
        distance: Option<Distance>,
        /// Member reference
        locator: Locator<'l>,
    },
}

/// Parse one non-empty line
pub fn parse_record(line: &str, line_number: usize) -> Result<Record<'_>> {
    let tokens = tokenize(line);
    Parser {
        line,
        line_number,
        tokens: &tokens,
        pos: 0,
    }
    .record()
}

struct Parser<'l, 't> {
    line: &'l str,
    line_number: usize,
    tokens: &'t [Token],
    pos: usize,
}

impl<'l> Parser<'l, '_> {
    fn error(&self, message: impl Into<String>) -> Error {
        Error::parse(self.line_number, self.line, message)
    }

    fn peek(&self, ahead: usize) -> Option<Token> {
        self.tokens.get(self.pos + ahead).copied()
    }

    fn text(&self, token: Token) -> &'l str {
        &self.line[token.start..token.end]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token> {
        match self.peek(0) {
            Some(t) if t.kind == kind => {
                self.pos += 1;
                Ok(t)
            }
            Some(t) => Err(self.error(format!("expected {kind:?}, found '{}'", self.text(t)))),
            None => Err(self.error(format!("expected {kind:?}, found end of line"))),
        }
    }

    fn word(&mut self) -> Result<&'l str> {
        let t = self.expect(TokenKind::Word)?;
        Ok(self.text(t).trim())
    }

    fn number<T: std::str::FromStr>(&mut self, what: &str) -> Result<T> {
        let text = self.word()?;
        text.parse()
            .map_err(|_| self.error(format!("invalid {what} '{text}'")))
    }

    fn record(&mut self) -> Result<Record<'l>> {
        let first = self
            .peek(0)
            .ok_or_else(|| self.error("empty record"))?;
        let keyword = self.text(first).trim();
        let followed_by_comma = self.peek(1).is_some_and(|t| t.kind == TokenKind::Comma);

        let record = if first.kind == TokenKind::Word && followed_by_comma && keyword == HEADER_TAG {
            self.header()?
        } else if first.kind == TokenKind::Word && followed_by_comma && keyword == CLUSTER_TAG {
            self.cluster()?
        } else {
            self.member()?
        };
        if !self.at_end() {
            return Err(self.error("trailing characters after record"));
        }
        Ok(record)
    }

    fn header(&mut self) -> Result<Record<'l>> {
        self.word()?;
        self.expect(TokenKind::Comma)?;
        let k = self.number("k-mer length")?;
        Ok(Record::Header { k })
    }

    fn cluster(&mut self) -> Result<Record<'l>> {
        self.word()?;
        self.expect(TokenKind::Comma)?;
        let size = self.number("cluster size")?;
        self.expect(TokenKind::Comma)?;
        let prototype = self.locator()?;

        let mut metadata = Vec::new();
        if !self.at_end() {
            self.expect(TokenKind::Semicolon)?;
        }
        while !self.at_end() {
            let key = self.word()?;
            self.expect(TokenKind::Colon)?;
            let value = self.word()?;
            self.expect(TokenKind::Semicolon)?;
            metadata.push((key, value));
        }
        Ok(Record::Cluster {
            size,
            prototype,
            metadata,
        })
    }

    fn member(&mut self) -> Result<Record<'l>> {
        let has_distance = self.peek(0).is_some_and(|t| {
            t.kind == TokenKind::Word && self.text(t).trim() == DISTANCE_KEY
        }) && self.peek(1).is_some_and(|t| t.kind == TokenKind::Colon)
            && self.peek(3).is_some_and(|t| t.kind == TokenKind::Semicolon);

        let distance = if has_distance {
            self.word()?;
            self.expect(TokenKind::Colon)?;
            let d = self.number("distance")?;
            self.expect(TokenKind::Semicolon)?;
            Some(d)
        } else {
            None
        };
        let locator = self.locator()?;
        Ok(Record::Member { distance, locator })
    }

    /// Everything up to the next `;` (or end of line), split at its last `:`
    fn locator(&mut self) -> Result<Locator<'l>> {
        let first = self
            .peek(0)
            .ok_or_else(|| self.error("expected sequence reference, found end of line"))?;
        let mut last = first;
        while let Some(t) = self.peek(0) {
            if t.kind == TokenKind::Semicolon {
                break;
            }
            last = t;
            self.pos += 1;
        }
        let text = self.line[first.start..last.end].trim();
        let (id, offset) = text
            .rsplit_once(':')
            .ok_or_else(|| self.error(format!("expected <id>:<offset>, found '{text}'")))?;
        if id.is_empty() {
            return Err(self.error("empty sequence identifier"));
        }
        let offset = offset
            .trim()
            .parse()
            .map_err(|_| self.error(format!("invalid offset '{offset}'")))?;
        Ok(Locator { id, offset })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn lines(text: &str, capacity: usize) -> Vec<String> {
        let mut reader = LineReader::with_capacity(capacity, Cursor::new(text.as_bytes().to_vec()));
        let mut out = Vec::new();
        while let Some((_, line)) = reader.next_line().unwrap() {
            out.push(line.to_string());
        }
        out
    }

    #[test]
    fn test_lines_across_buffer_boundaries() {
        let text = "KmerLength,5\nCluster,2,seqA:10;purity:1;\r\ndistance:0;seqA:10\nseqB:3";
        let expected = vec![
            "KmerLength,5",
            "Cluster,2,seqA:10;purity:1;",
            "distance:0;seqA:10",
            "seqB:3",
        ];
        for capacity in [1, 2, 3, 7, 16, 1 << 20] {
            assert_eq!(lines(text, capacity), expected, "capacity {capacity}");
        }
    }

    #[test]
    fn test_line_numbers() {
        let mut reader = LineReader::with_capacity(4, Cursor::new(b"a\n\nb\n".to_vec()));
        assert_eq!(reader.next_line().unwrap(), Some((1, "a")));
        assert_eq!(reader.next_line().unwrap(), Some((2, "")));
        assert_eq!(reader.next_line().unwrap(), Some((3, "b")));
        assert_eq!(reader.line_number(), 3);
        assert_eq!(reader.next_line().unwrap(), None);
    }

    #[test]
    fn test_tokenize() {
        let kinds: Vec<TokenKind> = tokenize("a,b;c:d").iter().map(|t| t.kind).collect();
        use TokenKind::*;
        assert_eq!(kinds, vec![Word, Comma, Word, Semicolon, Word, Colon, Word]);
    }

    #[test]
    fn test_parse_header() {
        assert_eq!(parse_record("KmerLength,30", 1).unwrap(), Record::Header { k: 30 });
        assert!(parse_record("KmerLength,x", 1).is_err());
    }

    #[test]
    fn test_parse_cluster() {
        let record = parse_record("Cluster,12,sp|P1:kinase:7;mean:1.5000;class:kinase;", 2).unwrap();
        assert_eq!(
            record,
            Record::Cluster {
                size: 12,
                prototype: Locator { id: "sp|P1:kinase", offset: 7 },
                metadata: vec![("mean", "1.5000"), ("class", "kinase")],
            }
        );

        let bare = parse_record("Cluster,1,s:0", 2).unwrap();
        assert!(matches!(bare, Record::Cluster { metadata, .. } if metadata.is_empty()));
    }

    #[test]
    fn test_parse_member() {
        assert_eq!(
            parse_record("distance:4;seq9:12", 3).unwrap(),
            Record::Member {
                distance: Some(4),
                locator: Locator { id: "seq9", offset: 12 },
            }
        );
        assert_eq!(
            parse_record("seq9:12", 3).unwrap(),
            Record::Member {
                distance: None,
                locator: Locator { id: "seq9", offset: 12 },
            }
        );
        // a sequence named "distance" is still a plain reference
        assert_eq!(
            parse_record("distance:5", 3).unwrap(),
            Record::Member {
                distance: None,
                locator: Locator { id: "distance", offset: 5 },
            }
        );
    }

    #[test]
    fn test_parse_errors_report_line() {
        let err = parse_record("Cluster,abc,s:0;", 17).unwrap_err();
        match err {
            Error::Parse { line, content, .. } => {
                assert_eq!(line, 17);
                assert_eq!(content, "Cluster,abc,s:0;");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(parse_record("seq9", 1).is_err());
        assert!(parse_record("seq9:x", 1).is_err());
        assert!(parse_record("Cluster,1,s:0;key:value", 1).is_err());
        assert!(parse_record("distance:1;s:0;extra", 1).is_err());
    }
}
