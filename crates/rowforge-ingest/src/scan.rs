//! Byte-level scanning over streaming JSON input.
//!
//! The value decoder wants one complete object at a time, and the
//! column-order pass wants the same object's raw bytes. [`ObjectScanner`]
//! carves balanced `{...}` chunks out of an async byte stream without
//! parsing values, so both consumers share one read.

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use rowforge_core::{IngestError, IngestResult};

use crate::column_order::Tokenizer;

const READ_CHUNK: usize = 8 * 1024;

/// Shape of a JSON input document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Exactly one top-level JSON object.
    Object,
    /// A top-level JSON array of objects.
    Array,
    /// One object per line (NDJSON); blank lines are ignored.
    Lines,
}

fn is_ws(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n')
}

fn decode_err(details: String) -> IngestError {
    IngestError::Decode {
        details: details.into(),
    }
}

/// Incremental matcher for one balanced `{...}` span.
///
/// Feed it byte slices starting at the opening brace; it reports the
/// offset one past the closing brace once the span completes.
#[derive(Default)]
struct SpanState {
    depth: i64,
    in_str: bool,
    esc: bool,
    started: bool,
}

impl SpanState {
    /// Scan `buf[from..]`, returning the absolute offset one past the
    /// span's closing brace if it completes within `buf`.
    fn feed(&mut self, buf: &[u8], from: usize) -> Option<usize> {
        for (i, &b) in buf[from..].iter().enumerate() {
            if self.in_str {
                if self.esc {
                    self.esc = false;
                } else if b == b'\\' {
                    self.esc = true;
                } else if b == b'"' {
                    self.in_str = false;
                }
                continue;
            }
            match b {
                b'"' => self.in_str = true,
                b'{' | b'[' => {
                    self.depth += 1;
                    self.started = true;
                }
                b'}' | b']' => {
                    self.depth -= 1;
                    if self.started && self.depth == 0 {
                        return Some(from + i + 1);
                    }
                }
                _ => {}
            }
        }
        None
    }
}

/// Pulls balanced top-level objects off an async reader, retaining the raw
/// bytes of each.
pub struct ObjectScanner<R> {
    rdr: R,
    buf: BytesMut,
    eof: bool,
}

impl<R: AsyncRead + Unpin + Send> ObjectScanner<R> {
    pub fn new(rdr: R) -> Self {
        Self {
            rdr,
            buf: BytesMut::with_capacity(READ_CHUNK),
            eof: false,
        }
    }

    /// Read more input. Returns false once the source is exhausted.
    async fn fill(&mut self) -> IngestResult<bool> {
        if self.eof {
            return Ok(false);
        }
        let n = self.rdr.read_buf(&mut self.buf).await?;
        if n == 0 {
            self.eof = true;
            return Ok(false);
        }
        Ok(true)
    }

    /// Buffer up to `n` bytes from the head of the input without
    /// consuming them.
    pub async fn head(&mut self, n: usize) -> IngestResult<&[u8]> {
        while self.buf.len() < n && self.fill().await? {}
        let end = self.buf.len().min(n);
        Ok(&self.buf[..end])
    }

    /// Skip whitespace, then return the next byte without consuming it.
    /// `None` at end of input.
    pub async fn peek_nonws(&mut self) -> IngestResult<Option<u8>> {
        loop {
            while !self.buf.is_empty() && is_ws(self.buf[0]) {
                self.buf.advance(1);
            }
            if let Some(&b) = self.buf.first() {
                return Ok(Some(b));
            }
            if !self.fill().await? {
                return Ok(None);
            }
        }
    }

    /// Consume one byte. The caller must have peeked it first.
    pub fn bump(&mut self) {
        self.buf.advance(1);
    }

    /// Skip whitespace and require `expected` as the next byte, consuming
    /// it.
    pub async fn expect_byte(&mut self, expected: u8) -> IngestResult<()> {
        match self.peek_nonws().await? {
            Some(b) if b == expected => {
                self.bump();
                Ok(())
            }
            Some(b) => Err(decode_err(format!(
                "expected '{}' but found '{}'",
                expected as char, b as char
            ))),
            None => Err(decode_err(format!(
                "expected '{}' but input ended",
                expected as char
            ))),
        }
    }

    /// The raw bytes of the next balanced top-level object, or `None` at
    /// end of input. Leading whitespace (including newlines between NDJSON
    /// records) is discarded.
    pub async fn next_object(&mut self) -> IngestResult<Option<Bytes>> {
        let Some(first) = self.peek_nonws().await? else {
            return Ok(None);
        };
        if first != b'{' {
            return Err(decode_err(format!(
                "expected '{{' but found '{}'",
                first as char
            )));
        }

        let mut span = SpanState::default();
        let mut scanned = 0usize;
        loop {
            if let Some(end) = span.feed(&self.buf, scanned) {
                let chunk = self.buf.split_to(end).freeze();
                return Ok(Some(chunk));
            }
            scanned = self.buf.len();
            if !self.fill().await? {
                return Err(decode_err(
                    "unexpected end of input inside object".to_string(),
                ));
            }
        }
    }
}

/// Quick sanity check: true if two JSON tokens cannot be decoded from the
/// head of the input, in which case it cannot be JSON.
///
/// A decode failure at the very end of the head window is inconclusive
/// (the window may have cut a token short) and does not reject the input.
pub fn cannot_be_json(head: &[u8]) -> bool {
    let mut dec = Tokenizer::new(head);
    for _ in 0..2 {
        match dec.next_token() {
            Ok(Some(_)) => {}
            Ok(None) => return true,
            Err(_) => return dec.pos() < head.len(),
        }
    }
    false
}

/// Classify a byte prefix as one of the input dialects. `None` when the
/// head does not look like any JSON document shape.
pub fn sniff_dialect(head: &[u8]) -> Option<Dialect> {
    let start = head.iter().position(|b| !is_ws(*b))?;
    match head[start] {
        b'[' => Some(Dialect::Array),
        b'{' => {
            let mut span = SpanState::default();
            match span.feed(head, start) {
                Some(end) => {
                    let rest = &head[end..];
                    if rest.iter().any(|b| !is_ws(*b)) {
                        Some(Dialect::Lines)
                    } else {
                        Some(Dialect::Object)
                    }
                }
                // The head window cut the object short; a single object
                // is the conservative read.
                None => Some(Dialect::Object),
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(input: &str) -> Vec<String> {
        let mut scanner = ObjectScanner::new(input.as_bytes());
        let mut out = Vec::new();
        while let Some(chunk) = scanner.next_object().await.unwrap() {
            out.push(String::from_utf8(chunk.to_vec()).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn splits_ndjson() {
        let got = collect("{\"a\":1}\n\n{\"a\":2}\n").await;
        assert_eq!(got, vec!["{\"a\":1}", "{\"a\":2}"]);
    }

    #[tokio::test]
    async fn splits_concatenated_objects() {
        let got = collect(r#"{"a":[1,2]}{"a":{"k":3}}"#).await;
        assert_eq!(got, vec![r#"{"a":[1,2]}"#, r#"{"a":{"k":3}}"#]);
    }

    #[tokio::test]
    async fn braces_inside_strings_do_not_confuse() {
        let got = collect(r#"{"s":"}{"}{"t":"\"{"}"#).await;
        assert_eq!(got, vec![r#"{"s":"}{"}"#, r#"{"t":"\"{"}"#]);
    }

    #[tokio::test]
    async fn truncated_object_errors() {
        let mut scanner = ObjectScanner::new(&b"{\"a\": 1"[..]);
        let err = scanner.next_object().await.unwrap_err();
        assert!(err.to_string().contains("end of input"));
    }

    #[tokio::test]
    async fn non_object_head_errors() {
        let mut scanner = ObjectScanner::new(&b"[1,2]"[..]);
        let err = scanner.next_object().await.unwrap_err();
        assert!(err.to_string().contains("expected '{'"));
    }

    #[test]
    fn sanity_gate() {
        assert!(cannot_be_json(b""));
        assert!(cannot_be_json(b"hello world"));
        assert!(!cannot_be_json(b"{\"a\":1}"));
        assert!(!cannot_be_json(b"[{\"a\":1}]"));
    }

    #[test]
    fn dialect_sniffing() {
        assert_eq!(sniff_dialect(b" [{\"a\":1}]"), Some(Dialect::Array));
        assert_eq!(sniff_dialect(b"{\"a\":1}"), Some(Dialect::Object));
        assert_eq!(
            sniff_dialect(b"{\"a\":1}\n{\"a\":2}"),
            Some(Dialect::Lines)
        );
        assert_eq!(sniff_dialect(b"not json"), None);
        assert_eq!(sniff_dialect(b"   "), None);
    }
}
