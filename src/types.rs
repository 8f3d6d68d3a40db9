//! Core entity and result types for the a3s-pii system
//!
//! All types use camelCase JSON serialization, matching the wire shape
//! callers persist mappings in.

use crate::error::{PiiError, Result};
use crate::token::Token;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Kind of sensitive value an entity carries
///
/// An open enumeration: well-known types have their own variant, anything
/// else is kept as `Custom` with a PascalCase name so that tokens built from
/// it stay parseable. Serialized as its canonical name (e.g. `"EmailAddress"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EntityType {
    Person,
    Organization,
    EmailAddress,
    PhoneNumber,
    SocialSecurityNumber,
    CreditCardNumber,
    Iban,
    DateOfBirth,
    Address,
    IpAddress,
    NationalIdNumber,
    MedicalRecordNumber,
    HealthInsuranceNumber,
    MedicalCondition,
    Medication,
    Url,
    Custom(String),
}

impl EntityType {
    /// Every well-known type, in declaration order
    pub const KNOWN: [EntityType; 16] = [
        EntityType::Person,
        EntityType::Organization,
        EntityType::EmailAddress,
        EntityType::PhoneNumber,
        EntityType::SocialSecurityNumber,
        EntityType::CreditCardNumber,
        EntityType::Iban,
        EntityType::DateOfBirth,
        EntityType::Address,
        EntityType::IpAddress,
        EntityType::NationalIdNumber,
        EntityType::MedicalRecordNumber,
        EntityType::HealthInsuranceNumber,
        EntityType::MedicalCondition,
        EntityType::Medication,
        EntityType::Url,
    ];

    /// Canonical name, used verbatim inside tokens
    pub fn as_str(&self) -> &str {
        match self {
            Self::Person => "Person",
            Self::Organization => "Organization",
            Self::EmailAddress => "EmailAddress",
            Self::PhoneNumber => "PhoneNumber",
            Self::SocialSecurityNumber => "SocialSecurityNumber",
            Self::CreditCardNumber => "CreditCardNumber",
            Self::Iban => "Iban",
            Self::DateOfBirth => "DateOfBirth",
            Self::Address => "Address",
            Self::IpAddress => "IpAddress",
            Self::NationalIdNumber => "NationalIdNumber",
            Self::MedicalRecordNumber => "MedicalRecordNumber",
            Self::HealthInsuranceNumber => "HealthInsuranceNumber",
            Self::MedicalCondition => "MedicalCondition",
            Self::Medication => "Medication",
            Self::Url => "Url",
            Self::Custom(name) => name,
        }
    }

    /// Create a custom type, normalizing the name to PascalCase
    ///
    /// Well-known names (in any spelling) resolve to their own variant.
    pub fn custom(name: &str) -> Result<Self> {
        name.parse()
    }

    /// Check that the type is spelled the way parsing would produce it
    ///
    /// A hand-built `Custom` must be PascalCase ASCII and must not shadow a
    /// well-known name; otherwise its tokens either cannot be scanned back
    /// or render identically to another type's tokens.
    pub fn validate(&self) -> Result<()> {
        match self.as_str().parse::<EntityType>() {
            Ok(parsed) if parsed == *self => Ok(()),
            _ => Err(PiiError::InvalidEntityType(self.as_str().to_string())),
        }
    }

    fn from_key(key: &str) -> Option<Self> {
        let ty = match key {
            "person" | "name" | "personname" | "fullname" => Self::Person,
            "organization" | "organisation" | "org" | "company" => Self::Organization,
            "emailaddress" | "email" => Self::EmailAddress,
            "phonenumber" | "phone" | "telephone" => Self::PhoneNumber,
            "socialsecuritynumber" | "ssn" => Self::SocialSecurityNumber,
            "creditcardnumber" | "creditcard" => Self::CreditCardNumber,
            "iban" => Self::Iban,
            "dateofbirth" | "dob" => Self::DateOfBirth,
            "address" | "streetaddress" => Self::Address,
            "ipaddress" | "ip" => Self::IpAddress,
            "nationalidnumber" | "nationalid" => Self::NationalIdNumber,
            "medicalrecordnumber" | "mrn" => Self::MedicalRecordNumber,
            "healthinsurancenumber" | "insurancenumber" => Self::HealthInsuranceNumber,
            "medicalcondition" | "condition" => Self::MedicalCondition,
            "medication" => Self::Medication,
            "url" => Self::Url,
            _ => return None,
        };
        Some(ty)
    }
}

/// Lowercase alphanumeric key shared by all spellings of a type name
fn normalize_key(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn pascal_case(name: &str) -> String {
    name.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

impl FromStr for EntityType {
    type Err = PiiError;

    fn from_str(s: &str) -> Result<Self> {
        let key = normalize_key(s);
        if key.is_empty() {
            return Err(PiiError::Config(format!(
                "Entity type name '{}' has no alphanumeric characters",
                s
            )));
        }
        if let Some(known) = Self::from_key(&key) {
            return Ok(known);
        }
        let name = pascal_case(s);
        if !name.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(PiiError::Config(format!(
                "Entity type name '{}' must be ASCII",
                s
            )));
        }
        if name.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(PiiError::Config(format!(
                "Entity type name '{}' must start with a letter",
                s
            )));
        }
        Ok(Self::Custom(name))
    }
}

impl TryFrom<String> for EntityType {
    type Error = PiiError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<EntityType> for String {
    fn from(value: EntityType) -> Self {
        match value {
            EntityType::Custom(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected sensitive span in a specific source text
///
/// Offsets are UTF-8 byte offsets into exactly the text the entity was
/// detected in; `start..end` must slice to `text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Classification assigned by the detector
    #[serde(rename = "type")]
    pub entity_type: EntityType,

    /// The real value as it appears in the source
    pub text: String,

    /// Byte offset of the first byte
    pub start: usize,

    /// Byte offset one past the last byte
    pub end: usize,

    /// Detector confidence in 0.0–1.0
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

fn default_confidence() -> f32 {
    1.0
}

impl Entity {
    /// Create an entity with full confidence
    pub fn new(entity_type: EntityType, text: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            entity_type,
            text: text.into(),
            start,
            end,
            confidence: 1.0,
        }
    }

    /// Build an entity by slicing `source` at byte offsets
    pub fn from_span(source: &str, entity_type: EntityType, start: usize, end: usize) -> Result<Self> {
        let text = source.get(start..end).ok_or_else(|| PiiError::InvalidSpan {
            start,
            end,
            reason: "span is out of range or not on a character boundary".to_string(),
        })?;
        Ok(Self::new(entity_type, text, start, end))
    }

    /// Build an entity from code-point offsets, converting them to byte offsets
    pub fn from_char_span(
        source: &str,
        entity_type: EntityType,
        char_start: usize,
        char_end: usize,
    ) -> Result<Self> {
        let to_byte = |char_idx: usize| {
            if char_idx == source.chars().count() {
                Some(source.len())
            } else {
                source.char_indices().nth(char_idx).map(|(b, _)| b)
            }
        };
        let invalid = || PiiError::InvalidSpan {
            start: char_start,
            end: char_end,
            reason: "character offsets out of range".to_string(),
        };
        let start = to_byte(char_start).ok_or_else(invalid)?;
        let end = to_byte(char_end).ok_or_else(invalid)?;
        Self::from_span(source, entity_type, start, end)
    }

    /// Set the detector confidence
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    /// Span length in bytes
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// True for a zero-length span
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether two spans share at least one byte
    pub fn overlaps(&self, other: &Entity) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Check that the entity describes a real, non-empty slice of `source`
    pub fn validate_in(&self, source: &str) -> Result<()> {
        self.entity_type.validate()?;
        let invalid = |reason: &str| PiiError::InvalidSpan {
            start: self.start,
            end: self.end,
            reason: reason.to_string(),
        };
        if self.start >= self.end {
            return Err(invalid("span is empty or reversed"));
        }
        let slice = source
            .get(self.start..self.end)
            .ok_or_else(|| invalid("span is out of range or not on a character boundary"))?;
        if slice != self.text {
            return Err(invalid("span text does not match the source"));
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(invalid("confidence must be within 0.0..=1.0"));
        }
        Ok(())
    }
}

/// Token → real value correspondence needed to reverse a tokenization
///
/// Keys are token strings (`<Person_1>`). Serialized as a flat JSON object so
/// a mapping can be stored next to the tokenized text and fed back later.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mapping(BTreeMap<String, String>);

impl Mapping {
    /// Create an empty mapping
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a token to its real value, returning the previous value if any
    pub fn insert(&mut self, token: &Token, value: impl Into<String>) -> Option<String> {
        self.0.insert(token.to_string(), value.into())
    }

    /// Real value for a token string
    pub fn get(&self, token: &str) -> Option<&str> {
        self.0.get(token).map(String::as_str)
    }

    /// Whether a token string is bound
    pub fn contains_token(&self, token: &str) -> bool {
        self.0.contains_key(token)
    }

    /// Number of bindings
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if no bindings
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate `(token, value)` pairs in token order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Merge another mapping into this one; later bindings win
    ///
    /// Returns the tokens whose value changed, so callers can tell when two
    /// independently numbered mappings reused the same token.
    pub fn update(&mut self, other: &Mapping) -> Vec<String> {
        let mut rebound = Vec::new();
        for (token, value) in &other.0 {
            if let Some(previous) = self.0.insert(token.clone(), value.clone()) {
                if previous != *value {
                    rebound.push(token.clone());
                }
            }
        }
        rebound
    }

    /// Reverse view: real value → token
    pub fn inverse(&self) -> HashMap<&str, &str> {
        self.0.iter().map(|(k, v)| (v.as_str(), k.as_str())).collect()
    }
}

impl FromIterator<(String, String)> for Mapping {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<HashMap<String, String>> for Mapping {
    fn from(map: HashMap<String, String>) -> Self {
        map.into_iter().collect()
    }
}

/// Output of a reversible tokenization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenizeResult {
    /// Text with each substituted span replaced by its token
    pub text: String,

    /// Bindings for every token present in `text`
    pub mapping: Mapping,

    /// All entities acted on, ordered by start offset
    ///
    /// Includes entities that lost an overlap and were not substituted.
    pub entities: Vec<Entity>,

    /// Entities dropped from substitution because a stronger entity overlapped them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suppressed: Vec<Entity>,
}

impl TokenizeResult {
    /// Number of entities actually substituted
    pub fn entities_count(&self) -> usize {
        self.entities.len() - self.suppressed.len()
    }
}

/// Output of a one-way redaction; no mapping is kept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactResult {
    /// Text with each substituted span replaced by a redaction marker
    pub text: String,

    /// All entities acted on, ordered by start offset
    pub entities: Vec<Entity>,

    /// Entities dropped from substitution because a stronger entity overlapped them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suppressed: Vec<Entity>,
}

impl RedactResult {
    /// Number of entities actually redacted
    pub fn entities_count(&self) -> usize {
        self.entities.len() - self.suppressed.len()
    }
}

/// Output of restoring tokens to real values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetokenizeResult {
    /// Restored text
    pub text: String,

    /// Number of token occurrences replaced
    pub replacements: usize,

    /// Well-formed tokens found in the text with no mapping entry, left verbatim
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved: Vec<String>,
}

impl DetokenizeResult {
    /// True when every token in the text was restored
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}
