//! Column-order reconstruction.
//!
//! The parsed representation of a JSON object is an unordered mapping, but
//! users expect columns in document-declared order. Rather than swapping in
//! an order-preserving decoder, a second token-level pass over the raw byte
//! chunk recovers the order, flattening nested paths with an underscore.

use std::borrow::Cow;

use rowforge_core::{IngestError, IngestResult};

/// Separator used when generating flat column names. An entity path
/// `name.first` becomes the column `name_first`.
pub const COL_SCOPE_SEP: &str = "_";

/// One JSON token, as produced by [`Tokenizer`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token<'a> {
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Str(String),
    /// A non-string scalar (number, bool, or null), kept as raw text.
    Scalar(&'a str),
}

impl Token<'_> {
    /// `"<type>: <value>"`, for decode errors.
    fn describe(&self) -> String {
        match self {
            Token::LBrace => "object start: {".to_string(),
            Token::RBrace => "object end: }".to_string(),
            Token::LBracket => "array start: [".to_string(),
            Token::RBracket => "array end: ]".to_string(),
            Token::Str(s) => format!("string: {s:?}"),
            Token::Scalar(raw) => {
                let kind = match raw.as_bytes().first() {
                    Some(b't') | Some(b'f') => "bool",
                    Some(b'n') => "null",
                    _ => "number",
                };
                format!("{kind}: {raw}")
            }
        }
    }
}

fn decode_err(details: impl Into<Cow<'static, str>>) -> IngestError {
    IngestError::Decode {
        details: details.into(),
    }
}

/// Minimal streaming token decoder over a complete byte chunk.
///
/// Structural commas and colons are skipped; the chunk has already been
/// parsed by the value decoder, so only shape matters here.
pub(crate) struct Tokenizer<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Offset of the next unread byte.
    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    pub(crate) fn next_token(&mut self) -> IngestResult<Option<Token<'a>>> {
        while self.pos < self.buf.len()
            && matches!(self.buf[self.pos], b' ' | b'\t' | b'\r' | b'\n' | b',' | b':')
        {
            self.pos += 1;
        }
        let Some(&b) = self.buf.get(self.pos) else {
            return Ok(None);
        };

        let tok = match b {
            b'{' => {
                self.pos += 1;
                Token::LBrace
            }
            b'}' => {
                self.pos += 1;
                Token::RBrace
            }
            b'[' => {
                self.pos += 1;
                Token::LBracket
            }
            b']' => {
                self.pos += 1;
                Token::RBracket
            }
            b'"' => Token::Str(self.read_string()?),
            _ => Token::Scalar(self.read_scalar()?),
        };
        Ok(Some(tok))
    }

    /// Decode a quoted string, including escapes. `pos` is on the opening
    /// quote.
    fn read_string(&mut self) -> IngestResult<String> {
        self.pos += 1; // opening quote
        let mut out = String::new();
        loop {
            let Some(&b) = self.buf.get(self.pos) else {
                return Err(decode_err("unterminated string"));
            };
            self.pos += 1;
            match b {
                b'"' => return Ok(out),
                b'\\' => {
                    let Some(&esc) = self.buf.get(self.pos) else {
                        return Err(decode_err("unterminated escape"));
                    };
                    self.pos += 1;
                    match esc {
                        b'"' => out.push('"'),
                        b'\\' => out.push('\\'),
                        b'/' => out.push('/'),
                        b'b' => out.push('\u{0008}'),
                        b'f' => out.push('\u{000C}'),
                        b'n' => out.push('\n'),
                        b'r' => out.push('\r'),
                        b't' => out.push('\t'),
                        b'u' => out.push(self.read_unicode_escape()?),
                        other => {
                            return Err(decode_err(format!(
                                "invalid escape \\{}",
                                other as char
                            )));
                        }
                    }
                }
                _ => {
                    // Copy the raw UTF-8 byte run untouched.
                    let start = self.pos - 1;
                    while self
                        .buf
                        .get(self.pos)
                        .is_some_and(|&c| c != b'"' && c != b'\\')
                    {
                        self.pos += 1;
                    }
                    let s = std::str::from_utf8(&self.buf[start..self.pos])
                        .map_err(|_| decode_err("invalid UTF-8 in string"))?;
                    out.push_str(s);
                }
            }
        }
    }

    fn read_unicode_escape(&mut self) -> IngestResult<char> {
        let first = self.read_hex4()?;
        // Surrogate pair?
        if (0xD800..=0xDBFF).contains(&first) {
            if self.buf.get(self.pos) == Some(&b'\\')
                && self.buf.get(self.pos + 1) == Some(&b'u')
            {
                self.pos += 2;
                let second = self.read_hex4()?;
                if (0xDC00..=0xDFFF).contains(&second) {
                    let c = 0x10000
                        + ((first - 0xD800) << 10)
                        + (second - 0xDC00);
                    return char::from_u32(c)
                        .ok_or_else(|| decode_err("invalid surrogate pair"));
                }
            }
            return Err(decode_err("lone surrogate in \\u escape"));
        }
        char::from_u32(first).ok_or_else(|| decode_err("invalid \\u escape"))
    }

    fn read_hex4(&mut self) -> IngestResult<u32> {
        let end = self.pos + 4;
        let slice = self
            .buf
            .get(self.pos..end)
            .ok_or_else(|| decode_err("truncated \\u escape"))?;
        let s = std::str::from_utf8(slice)
            .map_err(|_| decode_err("invalid \\u escape"))?;
        let v = u32::from_str_radix(s, 16)
            .map_err(|_| decode_err("invalid \\u escape"))?;
        self.pos = end;
        Ok(v)
    }

    fn read_scalar(&mut self) -> IngestResult<&'a str> {
        let start = self.pos;
        while self.pos < self.buf.len()
            && !matches!(
                self.buf[self.pos],
                b' ' | b'\t' | b'\r' | b'\n' | b',' | b':' | b'}' | b']'
            )
        {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(decode_err("empty scalar token"));
        }
        let s = std::str::from_utf8(&self.buf[start..self.pos])
            .map_err(|_| decode_err("invalid UTF-8 in scalar"))?;
        let valid = matches!(s, "true" | "false" | "null")
            || s.parse::<f64>().is_ok();
        if !valid {
            return Err(decode_err(format!("invalid JSON token {s:?}")));
        }
        Ok(s)
    }
}

/// Parse one raw top-level JSON object and return the flattened column
/// names in the order they appear, e.g.
///
/// ```text
/// {"a":1, "b": {"c":2, "d":3}}  -->  ["a", "b_c", "b_d"]
/// ```
///
/// Arrays become exactly one flat column, regardless of contents.
pub fn column_order_flat(chunk: &[u8]) -> IngestResult<Vec<String>> {
    let mut dec = Tokenizer::new(chunk);

    match dec.next_token()? {
        Some(Token::LBrace) => {}
        Some(other) => {
            return Err(decode_err(format!(
                "expected object start but got {}",
                other.describe()
            )));
        }
        None => return Err(decode_err("empty chunk")),
    }

    let mut cols = Vec::new();
    let mut stack: Vec<String> = Vec::new();

    loop {
        // Expect a field name, or else a terminating right-brace.
        let name = match dec.next_token()? {
            None => break,
            Some(Token::Str(s)) => s,
            Some(Token::RBrace) => {
                if stack.is_empty() {
                    break;
                }
                // End of a nested object.
                stack.pop();
                continue;
            }
            Some(other) => {
                return Err(decode_err(format!(
                    "expected string field name but got {}",
                    other.describe()
                )));
            }
        };
        stack.push(name);

        // Classify the field's value.
        match dec.next_token()? {
            Some(Token::Scalar(_)) | Some(Token::Str(_)) => {
                cols.push(stack.join(COL_SCOPE_SEP));
                stack.pop();
            }
            Some(Token::LBrace) => {
                // Descend into the nested object; the name stays on the
                // stack until its closing brace pops it.
            }
            Some(Token::LBracket) => {
                cols.push(stack.join(COL_SCOPE_SEP));
                stack.pop();
                skip_array(&mut dec)?;
            }
            Some(other) => {
                return Err(decode_err(format!(
                    "expected field value but got {}",
                    other.describe()
                )));
            }
            None => return Err(decode_err("unexpected end of chunk")),
        }
    }

    Ok(cols)
}

/// Fast-forward past an array whose opening bracket was just consumed,
/// tracking bracket nesting.
fn skip_array(dec: &mut Tokenizer<'_>) -> IngestResult<()> {
    let mut depth = 0usize;
    loop {
        match dec.next_token()? {
            Some(Token::LBracket) => depth += 1,
            Some(Token::RBracket) => {
                if depth == 0 {
                    return Ok(());
                }
                depth -= 1;
            }
            Some(_) => {}
            None => return Err(decode_err("unterminated array")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_object() {
        let cols = column_order_flat(br#"{"a":1, "b":"x", "c":true}"#).unwrap();
        assert_eq!(cols, vec!["a", "b", "c"]);
    }

    #[test]
    fn nested_objects_flatten() {
        let cols =
            column_order_flat(br#"{"a":1, "b": {"c":2, "d":3}}"#).unwrap();
        assert_eq!(cols, vec!["a", "b_c", "b_d"]);
    }

    #[test]
    fn deep_nesting() {
        let cols = column_order_flat(
            br#"{"x":{"y":{"z":1}},"w":2}"#,
        )
        .unwrap();
        assert_eq!(cols, vec!["x_y_z", "w"]);
    }

    #[test]
    fn array_emits_one_column() {
        let cols = column_order_flat(
            br#"{"a":[1, [2, {"deep":true}], 3], "b":2}"#,
        )
        .unwrap();
        assert_eq!(cols, vec!["a", "b"]);
    }

    #[test]
    fn array_of_objects_still_one_column() {
        let cols = column_order_flat(
            br#"{"items":[{"id":1},{"id":2}],"n":3}"#,
        )
        .unwrap();
        assert_eq!(cols, vec!["items", "n"]);
    }

    #[test]
    fn string_values_are_scalars() {
        let cols = column_order_flat(br#"{"s":"{not an object}"}"#).unwrap();
        assert_eq!(cols, vec!["s"]);
    }

    #[test]
    fn escaped_keys_decode() {
        let cols =
            column_order_flat(br#"{"a\u0041b":1,"t\tab":2}"#).unwrap();
        assert_eq!(cols, vec!["aAb", "t\tab"]);
    }

    #[test]
    fn non_string_field_name_is_typed_error() {
        let err = column_order_flat(br#"{42: "x"}"#).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("expected string field name"), "{msg}");
        assert!(msg.contains("number: 42"), "{msg}");
    }

    #[test]
    fn empty_nested_object() {
        let cols = column_order_flat(br#"{"a":{},"b":1}"#).unwrap();
        assert_eq!(cols, vec!["b"]);
    }
}
