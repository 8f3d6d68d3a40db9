//! Substitution engine
//!
//! Forward substitution is anchored on detector offsets: overlapping spans
//! are resolved first, then the text is rebuilt in one left-to-right pass.
//! Nothing is ever searched for by value on this path, so a short value that
//! is a substring of a longer one cannot be substituted in the wrong place.
//!
//! Reverse substitution scans for token syntax only. Value search
//! (`find_values`) exists for applying an existing registry to text that was
//! never run through a detector.

use crate::error::Result;
use crate::token::{find_tokens, Token};
use crate::types::{DetokenizeResult, Entity, Mapping};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::ops::Range;

/// Non-overlapping set of claimed byte ranges
#[derive(Debug, Default)]
struct ClaimedSpans {
    /// start → end
    spans: BTreeMap<usize, usize>,
}

impl ClaimedSpans {
    /// Claim `range` if it overlaps nothing claimed so far
    fn try_claim(&mut self, range: Range<usize>) -> bool {
        // Only the nearest claimed span starting before `range.end` can overlap
        if let Some((_, &end)) = self.spans.range(..range.end).next_back() {
            if end > range.start {
                return false;
            }
        }
        self.spans.insert(range.start, range.end);
        true
    }
}

/// Precedence for overlapping spans: higher confidence, then longer span,
/// then earlier start
fn precedence(a: &Entity, b: &Entity) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| b.len().cmp(&a.len()))
        .then_with(|| a.start.cmp(&b.start))
        .then_with(|| a.entity_type.cmp(&b.entity_type))
}

/// Entities split into those to substitute and those that lost an overlap
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolved {
    /// Non-overlapping winners, ordered by start offset
    pub accepted: Vec<Entity>,
    /// Losers, ordered by start offset
    pub suppressed: Vec<Entity>,
}

impl Resolved {
    /// Every entity acted on (winners and losers), ordered by start offset
    pub fn all(&self) -> Vec<Entity> {
        let mut all: Vec<Entity> = self
            .accepted
            .iter()
            .chain(self.suppressed.iter())
            .cloned()
            .collect();
        all.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.end.cmp(&b.end)));
        all
    }
}

/// Resolve overlapping spans deterministically
///
/// Exact duplicates (same span and type) collapse to the most confident
/// copy. Among overlapping spans the one with the highest confidence wins,
/// then the longest, then the earliest.
pub fn resolve_overlaps(mut entities: Vec<Entity>) -> Resolved {
    entities.sort_by(precedence);
    // First copy of a duplicate is the most confident one
    let mut seen = HashSet::new();
    entities.retain(|e| seen.insert((e.start, e.end, e.entity_type.clone())));

    let mut claimed = ClaimedSpans::default();
    let mut resolved = Resolved::default();
    for entity in entities {
        if claimed.try_claim(entity.start..entity.end) {
            resolved.accepted.push(entity);
        } else {
            resolved.suppressed.push(entity);
        }
    }
    resolved.accepted.sort_by_key(|e| e.start);
    resolved
        .suppressed
        .sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.end.cmp(&b.end)));
    resolved
}

/// Check that every entity slices `text` exactly
pub fn validate_spans(text: &str, entities: &[Entity]) -> Result<()> {
    entities.iter().try_for_each(|e| e.validate_in(text))
}

/// Rebuild `text` with each span replaced, in one pass
///
/// `spans` must be sorted by start, non-overlapping and on character
/// boundaries, which `resolve_overlaps` and `validate_spans` guarantee.
pub fn apply_spans<S: AsRef<str>>(text: &str, spans: &[(Range<usize>, S)]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for (range, replacement) in spans {
        out.push_str(&text[cursor..range.start]);
        out.push_str(replacement.as_ref());
        cursor = range.end;
    }
    out.push_str(&text[cursor..]);
    out
}

/// Replace every token found in `text` with its mapped value
///
/// Tokens without a mapping entry are left verbatim; well-formed ones are
/// reported in `unresolved` (once each, in order of first appearance).
pub fn restore(text: &str, mapping: &Mapping) -> DetokenizeResult {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    let mut replacements = 0;
    let mut unresolved: Vec<String> = Vec::new();

    for (range, raw) in find_tokens(text) {
        out.push_str(&text[cursor..range.start]);
        match mapping.get(raw) {
            Some(value) => {
                out.push_str(value);
                replacements += 1;
            }
            None => {
                out.push_str(raw);
                if raw.parse::<Token>().is_ok() && !unresolved.iter().any(|u| u == raw) {
                    unresolved.push(raw.to_string());
                }
            }
        }
        cursor = range.end;
    }
    out.push_str(&text[cursor..]);

    DetokenizeResult {
        text: out,
        replacements,
        unresolved,
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Whether `range` in `text` starts and ends on a word boundary
///
/// Only edges that are themselves word characters need a boundary, so
/// values like `+49 30 1234` still match after punctuation.
fn on_word_boundary(text: &str, range: &Range<usize>) -> bool {
    let value = &text[range.clone()];
    let starts_word = value.chars().next().is_some_and(is_word_char);
    let ends_word = value.chars().next_back().is_some_and(is_word_char);
    let before = text[..range.start].chars().next_back();
    let after = text[range.end..].chars().next();
    !(starts_word && before.is_some_and(is_word_char))
        && !(ends_word && after.is_some_and(is_word_char))
}

/// Locate known values in `text`, longest value first
///
/// Each occurrence claims its range; a shorter value can never claim bytes
/// already claimed by a longer one, and occurrences glued to surrounding
/// word characters (`Marie` inside `Mariella`) are skipped. Returns
/// entities with offsets into `text`, paired with their token, ordered by
/// start.
pub fn find_values(text: &str, values: &[(String, Token)]) -> Vec<(Entity, Token)> {
    let mut ordered: Vec<&(String, Token)> = values.iter().filter(|(v, _)| !v.is_empty()).collect();
    ordered.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.1.cmp(&b.1)));

    let mut claimed = ClaimedSpans::default();
    let mut found = Vec::new();
    for (value, token) in ordered {
        for (start, _) in text.match_indices(value.as_str()) {
            let range = start..start + value.len();
            if !on_word_boundary(text, &range) {
                continue;
            }
            if claimed.try_claim(range.clone()) {
                let entity = Entity::new(token.entity_type().clone(), value.clone(), range.start, range.end);
                found.push((entity, token.clone()));
            }
        }
    }
    found.sort_by_key(|(e, _)| e.start);
    found
}
