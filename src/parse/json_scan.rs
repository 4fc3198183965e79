//! Incremental byte-level JSON scanning.
//!
//! The export files this crate ingests are frequently multi-GB, with one
//! enormous `messages` array inside an otherwise small object. Instead of
//! deserializing the whole document, parsers walk the top-level object
//! with [`JsonScanner`], capture small values whole, and pull array
//! elements out one at a time; each element is then handed to
//! `serde_json::from_slice`. Memory use is bounded by the largest single
//! element.
//!
//! The value walker is a brace/bracket-matching state machine that
//! respects string escapes, so content containing `{`, `]` or `"` never
//! desynchronizes the scan.

use std::io::Read;

use anyhow::{anyhow, bail, Result};

const CHUNK_SIZE: usize = 64 * 1024;

pub struct JsonScanner<R: Read> {
    reader: R,
    buf: Vec<u8>,
    pos: usize,
    len: usize,
    filled: u64,
}

impl<R: Read> JsonScanner<R> {
    pub fn new(reader: R) -> Self {
        JsonScanner {
            reader,
            buf: vec![0u8; CHUNK_SIZE],
            pos: 0,
            len: 0,
            filled: 0,
        }
    }

    /// Bytes handed out so far. Monotonic; used for progress reporting.
    pub fn bytes_consumed(&self) -> u64 {
        self.filled - (self.len - self.pos) as u64
    }

    fn refill(&mut self) -> Result<bool> {
        if self.pos < self.len {
            return Ok(true);
        }
        let n = self.reader.read(&mut self.buf)?;
        self.pos = 0;
        self.len = n;
        self.filled += n as u64;
        Ok(n > 0)
    }

    fn peek(&mut self) -> Result<Option<u8>> {
        if !self.refill()? {
            return Ok(None);
        }
        Ok(Some(self.buf[self.pos]))
    }

    fn bump(&mut self) -> Result<Option<u8>> {
        if !self.refill()? {
            return Ok(None);
        }
        let b = self.buf[self.pos];
        self.pos += 1;
        Ok(Some(b))
    }

    fn skip_ws(&mut self) -> Result<()> {
        while let Some(b) = self.peek()? {
            if b == b' ' || b == b'\t' || b == b'\n' || b == b'\r' {
                self.pos += 1;
            } else {
                break;
            }
        }
        Ok(())
    }

    fn expect(&mut self, want: u8) -> Result<()> {
        self.skip_ws()?;
        match self.bump()? {
            Some(b) if b == want => Ok(()),
            Some(b) => bail!(
                "expected '{}' at byte {}, found '{}'",
                want as char,
                self.bytes_consumed(),
                b as char
            ),
            None => bail!("unexpected end of input, expected '{}'", want as char),
        }
    }

    /// Consume the opening `{` of an object.
    pub fn begin_object(&mut self) -> Result<()> {
        self.expect(b'{')
    }

    /// Consume the opening `[` of an array.
    pub fn begin_array(&mut self) -> Result<()> {
        self.expect(b'[')
    }

    /// Next key of the current object, or `None` at the closing `}`.
    /// Leaves the scanner positioned on the key's value.
    pub fn next_key(&mut self) -> Result<Option<String>> {
        self.skip_ws()?;
        match self.peek()? {
            Some(b'}') => {
                self.pos += 1;
                return Ok(None);
            }
            Some(b',') => {
                self.pos += 1;
                self.skip_ws()?;
            }
            Some(b'"') => {}
            Some(b) => bail!("malformed object near byte {}: '{}'", self.bytes_consumed(), b as char),
            None => bail!("unexpected end of input inside object"),
        }
        let key = self.read_string()?;
        self.expect(b':')?;
        Ok(Some(key))
    }

    /// Capture the next array element into `out`, or consume the closing
    /// `]` and return false.
    pub fn next_element(&mut self, out: &mut Vec<u8>) -> Result<bool> {
        self.skip_ws()?;
        match self.peek()? {
            Some(b']') => {
                self.pos += 1;
                return Ok(false);
            }
            Some(b',') => {
                self.pos += 1;
            }
            Some(_) => {}
            None => bail!("unexpected end of input inside array"),
        }
        out.clear();
        self.walk_value(Some(out), usize::MAX)?;
        Ok(true)
    }

    /// Decode a JSON string. The scanner must be positioned at `"`.
    pub fn read_string(&mut self) -> Result<String> {
        self.skip_ws()?;
        self.expect(b'"')?;
        let mut raw: Vec<u8> = Vec::new();
        loop {
            match self.bump()? {
                Some(b'"') => break,
                Some(b'\\') => {
                    let esc = self
                        .bump()?
                        .ok_or_else(|| anyhow!("unterminated escape in string"))?;
                    match esc {
                        b'"' => raw.push(b'"'),
                        b'\\' => raw.push(b'\\'),
                        b'/' => raw.push(b'/'),
                        b'b' => raw.push(0x08),
                        b'f' => raw.push(0x0c),
                        b'n' => raw.push(b'\n'),
                        b'r' => raw.push(b'\r'),
                        b't' => raw.push(b'\t'),
                        b'u' => {
                            let first = self.read_hex4()?;
                            let ch = if (0xD800..0xDC00).contains(&first) {
                                // high surrogate: a \uXXXX low half must follow
                                if self.bump()? != Some(b'\\') || self.bump()? != Some(b'u') {
                                    bail!("lone surrogate in string escape");
                                }
                                let second = self.read_hex4()?;
                                let combined = 0x10000
                                    + ((first - 0xD800) << 10)
                                    + (second.checked_sub(0xDC00).ok_or_else(|| {
                                        anyhow!("invalid low surrogate in string escape")
                                    })?);
                                char::from_u32(combined)
                                    .ok_or_else(|| anyhow!("invalid surrogate pair"))?
                            } else {
                                char::from_u32(first)
                                    .ok_or_else(|| anyhow!("invalid \\u escape"))?
                            };
                            let mut utf8 = [0u8; 4];
                            raw.extend_from_slice(ch.encode_utf8(&mut utf8).as_bytes());
                        }
                        other => bail!("unknown escape '\\{}'", other as char),
                    }
                }
                Some(b) => raw.push(b),
                None => bail!("unterminated string"),
            }
        }
        String::from_utf8(raw).map_err(|_| anyhow!("string is not valid UTF-8"))
    }

    fn read_hex4(&mut self) -> Result<u32> {
        let mut value = 0u32;
        for _ in 0..4 {
            let b = self
                .bump()?
                .ok_or_else(|| anyhow!("truncated \\u escape"))?;
            let digit = (b as char)
                .to_digit(16)
                .ok_or_else(|| anyhow!("invalid hex digit in \\u escape"))?;
            value = value * 16 + digit;
        }
        Ok(value)
    }

    /// Skip the next value without retaining it.
    pub fn skip_value(&mut self) -> Result<()> {
        self.walk_value(None, usize::MAX)
    }

    /// Capture the raw bytes of the next value.
    pub fn capture_value(&mut self, out: &mut Vec<u8>) -> Result<()> {
        out.clear();
        self.walk_value(Some(out), usize::MAX)
    }

    /// Capture the next value, failing once it exceeds `max_bytes`.
    pub fn capture_value_bounded(&mut self, out: &mut Vec<u8>, max_bytes: usize) -> Result<()> {
        out.clear();
        self.walk_value(Some(out), max_bytes)
    }

    /// Deserialize the next value through a raw capture.
    pub fn read_value(&mut self) -> Result<serde_json::Value> {
        let mut raw = Vec::new();
        self.capture_value(&mut raw)?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Traverse one JSON value, optionally copying its bytes. Depth is
    /// tracked for containers; strings are walked escape-aware so
    /// structural bytes inside content never count.
    fn walk_value(&mut self, mut out: Option<&mut Vec<u8>>, max_bytes: usize) -> Result<()> {
        self.skip_ws()?;
        let mut depth: u32 = 0;
        let mut in_string = false;
        let mut escaped = false;
        let mut copied = 0usize;
        let mut first = true;

        loop {
            let b = match self.peek()? {
                Some(b) => b,
                None => {
                    if depth == 0 && !in_string && !first {
                        return Ok(());
                    }
                    bail!("unexpected end of input inside value");
                }
            };

            // scalar termination: value ends at a delimiter we don't own
            if !in_string && depth == 0 && !first && matches!(b, b',' | b'}' | b']') {
                return Ok(());
            }

            self.pos += 1;
            if let Some(out) = out.as_deref_mut() {
                out.push(b);
                copied += 1;
                if copied > max_bytes {
                    bail!("value exceeds {} byte bound", max_bytes);
                }
            }

            if in_string {
                if escaped {
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                } else if b == b'"' {
                    in_string = false;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                first = false;
                continue;
            }

            match b {
                b'"' => in_string = true,
                b'{' | b'[' => depth += 1,
                b'}' | b']' => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| anyhow!("unbalanced close at byte {}", self.bytes_consumed()))?;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                b' ' | b'\t' | b'\n' | b'\r' if depth == 0 && !first => return Ok(()),
                _ => {}
            }
            first = false;
        }
    }
}

/// Scan a file for one top-level key and return its raw value, bounded
/// by `max_bytes`. Used for sections (e.g. avatar maps) that live past
/// the head prefix of very large exports.
pub fn extract_section(
    path: &std::path::Path,
    key: &str,
    max_bytes: usize,
) -> Result<Option<Vec<u8>>> {
    let file = std::fs::File::open(path)?;
    let mut scanner = JsonScanner::new(file);
    scanner.begin_object()?;
    while let Some(k) = scanner.next_key()? {
        if k == key {
            let mut raw = Vec::new();
            scanner.capture_value_bounded(&mut raw, max_bytes)?;
            return Ok(Some(raw));
        }
        scanner.skip_value()?;
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(input: &str) -> JsonScanner<&[u8]> {
        JsonScanner::new(input.as_bytes())
    }

    #[test]
    fn walks_object_keys_in_order() {
        let mut s = scan(r#"{"a": 1, "b": [2, 3], "c": "x"}"#);
        s.begin_object().unwrap();
        let mut keys = Vec::new();
        while let Some(k) = s.next_key().unwrap() {
            keys.push(k);
            s.skip_value().unwrap();
        }
        assert_eq!(keys, ["a", "b", "c"]);
    }

    #[test]
    fn captures_nested_values_verbatim() {
        let mut s = scan(r#"{"meta": {"name": "G {not a brace}", "n": [1,2]}, "rest": 0}"#);
        s.begin_object().unwrap();
        assert_eq!(s.next_key().unwrap().as_deref(), Some("meta"));
        let v = s.read_value().unwrap();
        assert_eq!(v["name"], "G {not a brace}");
        assert_eq!(s.next_key().unwrap().as_deref(), Some("rest"));
    }

    #[test]
    fn array_elements_stream_one_at_a_time() {
        let mut s = scan(r#"[{"x": "a,b]"}, {"x": "\"quoted\""}, 7]"#);
        s.begin_array().unwrap();
        let mut out = Vec::new();
        let mut elements = Vec::new();
        while s.next_element(&mut out).unwrap() {
            elements.push(String::from_utf8(out.clone()).unwrap());
        }
        assert_eq!(elements.len(), 3);
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&elements[0]).unwrap()["x"],
            "a,b]"
        );
        assert_eq!(elements[2].trim(), "7");
    }

    #[test]
    fn string_escapes_decode() {
        let mut s = scan(r#""line\né😂""#);
        assert_eq!(s.read_string().unwrap(), "line\né😂");
    }

    #[test]
    fn scalar_values_terminate_at_delimiters() {
        let mut s = scan(r#"{"a": 12345, "b": true, "c": null}"#);
        s.begin_object().unwrap();
        s.next_key().unwrap();
        assert_eq!(s.read_value().unwrap(), serde_json::json!(12345));
        s.next_key().unwrap();
        assert_eq!(s.read_value().unwrap(), serde_json::json!(true));
        s.next_key().unwrap();
        assert_eq!(s.read_value().unwrap(), serde_json::json!(null));
        assert!(s.next_key().unwrap().is_none());
    }

    #[test]
    fn extract_section_finds_late_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.json");
        std::fs::write(
            &path,
            r#"{"messages": [{"content": "has \"avatars\": inside"}], "avatars": {"10": "data:image/png;base64,xy"}}"#,
        )
        .unwrap();
        let raw = extract_section(&path, "avatars", 1 << 20).unwrap().unwrap();
        let v: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(v["10"], "data:image/png;base64,xy");
    }

    #[test]
    fn bounded_capture_rejects_oversized_values() {
        let mut s = scan(r#"{"big": "aaaaaaaaaaaaaaaaaaaaaaaa"}"#);
        s.begin_object().unwrap();
        s.next_key().unwrap();
        let mut out = Vec::new();
        assert!(s.capture_value_bounded(&mut out, 8).is_err());
    }
}
