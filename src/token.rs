//! Placeholder tokens of the form `<Type_N>`
//!
//! Tokens are opaque to downstream consumers but structurally parseable
//! back into `(EntityType, N)`. The type part is restricted to ASCII
//! letters and digits so that a token's delimiters can never appear inside
//! it and scanning for tokens never needs backtracking.

use crate::error::{PiiError, Result};
use crate::types::EntityType;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

/// A placeholder identifier for one real value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Token {
    entity_type: EntityType,
    seq: u64,
}

impl Token {
    /// Create a token
    ///
    /// Fails for a sequence number of 0 or a type whose name would not scan
    /// back (see `EntityType::validate`).
    pub fn new(entity_type: EntityType, seq: u64) -> Result<Self> {
        entity_type.validate()?;
        if seq == 0 {
            return Err(PiiError::InvalidToken(format!("<{}_0>", entity_type)));
        }
        Ok(Self { entity_type, seq })
    }

    /// Token from an already validated type and a counter value (>= 1)
    pub(crate) fn assigned(entity_type: EntityType, seq: u64) -> Self {
        debug_assert!(seq > 0);
        Self { entity_type, seq }
    }

    /// Entity type encoded in the token
    pub fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    /// Sequence number, unique within the type and the assigning scope
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}_{}>", self.entity_type, self.seq)
    }
}

impl FromStr for Token {
    type Err = PiiError;

    fn from_str(s: &str) -> Result<Self> {
        match scan_at(s.as_bytes(), 0) {
            Some(end) if end == s.len() => {}
            _ => return Err(PiiError::InvalidToken(s.to_string())),
        }
        let inner = &s[1..s.len() - 1];
        let (name, digits) = inner
            .rsplit_once('_')
            .ok_or_else(|| PiiError::InvalidToken(s.to_string()))?;
        let seq: u64 = digits
            .parse()
            .map_err(|_| PiiError::InvalidToken(s.to_string()))?;
        let entity_type: EntityType = name.parse()?;
        // Spelling must be canonical so that parse and display agree byte for byte
        if entity_type.as_str() != name {
            return Err(PiiError::InvalidToken(s.to_string()));
        }
        Ok(Self { entity_type, seq })
    }
}

impl TryFrom<String> for Token {
    type Error = PiiError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Token> for String {
    fn from(value: Token) -> Self {
        value.to_string()
    }
}

/// Try to match `<Name_N>` starting exactly at `at`; returns the end offset
///
/// Name: ASCII letter followed by ASCII letters/digits.
/// N: ASCII digits without a leading zero.
fn scan_at(bytes: &[u8], at: usize) -> Option<usize> {
    let mut i = at;
    if bytes.get(i) != Some(&b'<') {
        return None;
    }
    i += 1;
    if !bytes.get(i)?.is_ascii_alphabetic() {
        return None;
    }
    while bytes.get(i)?.is_ascii_alphanumeric() {
        i += 1;
    }
    if bytes[i] != b'_' {
        return None;
    }
    i += 1;
    let digits_start = i;
    while bytes.get(i)?.is_ascii_digit() {
        i += 1;
    }
    let digits = &bytes[digits_start..i];
    if digits.is_empty() || digits[0] == b'0' || digits.len() > 19 {
        return None;
    }
    if bytes[i] != b'>' {
        return None;
    }
    Some(i + 1)
}

/// Iterator over non-overlapping token-shaped substrings, left to right
pub struct TokenMatches<'t> {
    text: &'t str,
    pos: usize,
}

impl<'t> Iterator for TokenMatches<'t> {
    type Item = (Range<usize>, &'t str);

    fn next(&mut self) -> Option<Self::Item> {
        let bytes = self.text.as_bytes();
        while self.pos < bytes.len() {
            let offset = self.text[self.pos..].find('<')?;
            let start = self.pos + offset;
            match scan_at(bytes, start) {
                Some(end) => {
                    self.pos = end;
                    return Some((start..end, &self.text[start..end]));
                }
                None => self.pos = start + 1,
            }
        }
        None
    }
}

/// Find token-shaped substrings in arbitrary text
pub fn find_tokens(text: &str) -> TokenMatches<'_> {
    TokenMatches { text, pos: 0 }
}

/// Tokens that already occur literally in `text`
///
/// Assigners skip these so that a restore pass cannot confuse a
/// pre-existing literal with a freshly assigned token.
pub fn reserved_in(text: &str) -> HashSet<Token> {
    find_tokens(text)
        .filter_map(|(_, raw)| raw.parse::<Token>().ok())
        .collect()
}
