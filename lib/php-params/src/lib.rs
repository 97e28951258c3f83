//! Parser for `logging.log_params`, isolated from the reconstruction
//! algorithm per §9 ("an isolated parser module with the documented
//! sub-grammar"). Two encodings are supported:
//!
//! * the modern PHP-serialized form, starting with `a:` — a serialized
//!   associative array with keys `type`, `ids`, `old`, `new`;
//! * the legacy newline form, whose second line is the revision id and
//!   whose subsequent `ofield=`/`nfield=` lines carry the bitmasks.

use dispatch_core::HiddenFlags;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("unexpected end of input while parsing php-serialized value")]
    UnexpectedEof,
    #[error("unexpected byte `{0}` at offset {1}")]
    UnexpectedByte(char, usize),
    #[error("expected array at top level")]
    NotAnArray,
    #[error("legacy log_params is missing its revision id line")]
    MissingRevidLine,
    #[error("`{0}` is not a valid integer")]
    BadInteger(String),
}

/// The fields this module actually cares about out of a revision-deletion
/// `log_params` payload, regardless of which encoding produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionParams {
    pub kind: String,
    pub ids: Vec<u64>,
    pub old_flags: HiddenFlags,
    pub new_flags: HiddenFlags,
}

/// True when the raw `log_params` text contains the PHP-serialized-array
/// list idiom `i:<revid>;` for the given id — used to prefilter candidate
/// log rows before the full parse (§4.9 step 2).
pub fn mentions_revid(log_params: &str, revid: u64) -> bool {
    log_params.contains(&format!("i:{revid};"))
}

pub fn parse(log_params: &str) -> Result<DeletionParams, ParseError> {
    if log_params.trim_start().starts_with("a:") {
        parse_serialized(log_params)
    } else {
        parse_legacy(log_params)
    }
}

// --- PHP-serialize sub-grammar -----------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum PhpValue {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Array(Vec<(PhpValue, PhpValue)>),
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(s: &'a str) -> Self {
        Self {
            bytes: s.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn expect(&mut self, b: u8) -> Result<(), ParseError> {
        match self.peek() {
            Some(c) if c == b => {
                self.pos += 1;
                Ok(())
            }
            Some(c) => Err(ParseError::UnexpectedByte(c as char, self.pos)),
            None => Err(ParseError::UnexpectedEof),
        }
    }

    fn take_until(&mut self, b: u8) -> Result<&'a str, ParseError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == b {
                let s = std::str::from_utf8(&self.bytes[start..self.pos])
                    .map_err(|_| ParseError::UnexpectedEof)?;
                return Ok(s);
            }
            self.pos += 1;
        }
        Err(ParseError::UnexpectedEof)
    }

    fn parse_value(&mut self) -> Result<PhpValue, ParseError> {
        match self.peek().ok_or(ParseError::UnexpectedEof)? {
            b'N' => {
                self.pos += 1;
                self.expect(b';')?;
                Ok(PhpValue::Null)
            }
            b'b' => {
                self.pos += 1;
                self.expect(b':')?;
                let digit = self.take_until(b';')?;
                self.pos += digit.len();
                self.expect(b';')?;
                Ok(PhpValue::Bool(digit == "1"))
            }
            b'i' => {
                self.pos += 1;
                self.expect(b':')?;
                let digits = self.take_until(b';')?;
                self.pos += digits.len();
                self.expect(b';')?;
                let n: i64 = digits
                    .parse()
                    .map_err(|_| ParseError::BadInteger(digits.to_string()))?;
                Ok(PhpValue::Int(n))
            }
            b's' => {
                self.pos += 1;
                self.expect(b':')?;
                let len_str = self.take_until(b':')?;
                let len: usize = len_str
                    .parse()
                    .map_err(|_| ParseError::BadInteger(len_str.to_string()))?;
                self.pos += len_str.len();
                self.expect(b':')?;
                self.expect(b'"')?;
                if self.pos + len > self.bytes.len() {
                    return Err(ParseError::UnexpectedEof);
                }
                let s = std::str::from_utf8(&self.bytes[self.pos..self.pos + len])
                    .map_err(|_| ParseError::UnexpectedEof)?
                    .to_string();
                self.pos += len;
                self.expect(b'"')?;
                self.expect(b';')?;
                Ok(PhpValue::Str(s))
            }
            b'a' => {
                self.pos += 1;
                self.expect(b':')?;
                let count_str = self.take_until(b':')?;
                let count: usize = count_str
                    .parse()
                    .map_err(|_| ParseError::BadInteger(count_str.to_string()))?;
                self.pos += count_str.len();
                self.expect(b':')?;
                self.expect(b'{')?;
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    let key = self.parse_value()?;
                    let value = self.parse_value()?;
                    entries.push((key, value));
                }
                self.expect(b'}')?;
                Ok(PhpValue::Array(entries))
            }
            c => Err(ParseError::UnexpectedByte(c as char, self.pos)),
        }
    }
}

fn array_get<'a>(entries: &'a [(PhpValue, PhpValue)], key: &str) -> Option<&'a PhpValue> {
    entries.iter().find_map(|(k, v)| match k {
        PhpValue::Str(s) if s == key => Some(v),
        _ => None,
    })
}

fn as_u8(v: &PhpValue) -> u8 {
    match v {
        PhpValue::Int(n) => *n as u8,
        _ => 0,
    }
}

fn parse_serialized(log_params: &str) -> Result<DeletionParams, ParseError> {
    let mut cursor = Cursor::new(log_params.trim());
    let value = cursor.parse_value()?;
    let PhpValue::Array(entries) = value else {
        return Err(ParseError::NotAnArray);
    };
    let kind = match array_get(&entries, "type") {
        Some(PhpValue::Str(s)) => s.clone(),
        _ => String::new(),
    };
    let ids = match array_get(&entries, "ids") {
        Some(PhpValue::Array(items)) => items
            .iter()
            .filter_map(|(_, v)| match v {
                PhpValue::Int(n) => Some(*n as u64),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };
    let old_flags = array_get(&entries, "old")
        .map(as_u8)
        .map(HiddenFlags::from_bitmask)
        .unwrap_or_default();
    let new_flags = array_get(&entries, "new")
        .map(as_u8)
        .map(HiddenFlags::from_bitmask)
        .unwrap_or_default();
    Ok(DeletionParams {
        kind,
        ids,
        old_flags,
        new_flags,
    })
}

// --- legacy newline form -------------------------------------------------

fn parse_legacy(log_params: &str) -> Result<DeletionParams, ParseError> {
    let mut lines = log_params.lines();
    let _kind_line = lines.next().unwrap_or_default();
    let revid_line = lines.next().ok_or(ParseError::MissingRevidLine)?;
    let revid: u64 = revid_line
        .trim()
        .parse()
        .map_err(|_| ParseError::BadInteger(revid_line.to_string()))?;

    let mut old_flags = HiddenFlags::default();
    let mut new_flags = HiddenFlags::default();
    for line in lines {
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            let value = value.trim();
            let mask: u8 = value.parse().unwrap_or(0);
            match key {
                "ofield" => old_flags = HiddenFlags::from_bitmask(mask),
                "nfield" => new_flags = HiddenFlags::from_bitmask(mask),
                _ => {}
            }
        }
    }

    Ok(DeletionParams {
        kind: "revision".to_string(),
        ids: vec![revid],
        old_flags,
        new_flags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_serialized_array() {
        let raw = r#"a:4:{s:4:"type";s:8:"revision";s:3:"ids";a:2:{i:0;i:111;i:1;i:222;}s:3:"old";i:0;s:3:"new";i:3;}"#;
        let parsed = parse(raw).unwrap();
        assert_eq!(parsed.kind, "revision");
        assert_eq!(parsed.ids, vec![111, 222]);
        assert_eq!(parsed.new_flags, HiddenFlags::from_bitmask(3));
        assert!(parsed.new_flags.content);
        assert!(parsed.new_flags.comment);
        assert!(!parsed.new_flags.user);
    }

    #[test]
    fn parses_legacy_newline_form() {
        let raw = "revision\n12345\nofield=0\nnfield=5\n";
        let parsed = parse(raw).unwrap();
        assert_eq!(parsed.ids, vec![12345]);
        assert_eq!(parsed.old_flags, HiddenFlags::from_bitmask(0));
        assert_eq!(parsed.new_flags, HiddenFlags::from_bitmask(5));
        assert!(parsed.new_flags.content);
        assert!(parsed.new_flags.user);
    }

    #[test]
    fn mentions_revid_matches_list_idiom() {
        let raw = r#"a:1:{s:3:"ids";a:2:{i:0;i:111;i:1;i:222;}}"#;
        assert!(mentions_revid(raw, 111));
        assert!(mentions_revid(raw, 222));
        assert!(!mentions_revid(raw, 333));
    }

    #[test]
    fn rejects_malformed_serialized_value() {
        let raw = "a:1:{broken";
        assert!(parse(raw).is_err());
    }
}
