//! Entity detection seam
//!
//! Detection itself is an external capability (an NLP service, a hosted
//! recognizer). The engine only needs "given text and a type filter, return
//! entities with spans", expressed by `EntityDetector`. `RegexDetector` is
//! the built-in local-mode implementation for structured identifiers.

use crate::error::{PiiError, Result};
use crate::policy::TypeFilter;
use crate::types::{Entity, EntityType};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Something that finds sensitive spans in text
///
/// Implementations may be slow (network calls); the engine never holds the
/// registry lock while awaiting them. Returned offsets must be byte offsets
/// into exactly `text`.
#[async_trait]
pub trait EntityDetector: Send + Sync {
    /// Detect entities whose type passes `filter`
    async fn detect(&self, text: &str, filter: &TypeFilter) -> Result<Vec<Entity>>;

    /// Detector name, for logs
    fn name(&self) -> &str;
}

/// A regex rule producing entities of one type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionRule {
    pub entity_type: EntityType,
    pub pattern: String,
    #[serde(default = "default_rule_confidence")]
    pub confidence: f32,
}

fn default_rule_confidence() -> f32 {
    0.8
}

impl DetectionRule {
    pub fn new(entity_type: EntityType, pattern: impl Into<String>, confidence: f32) -> Self {
        Self {
            entity_type,
            pattern: pattern.into(),
            confidence,
        }
    }
}

/// Built-in rules for structured identifiers
pub fn default_detection_rules() -> Vec<DetectionRule> {
    vec![
        DetectionRule::new(
            EntityType::EmailAddress,
            r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
            0.95,
        ),
        DetectionRule::new(
            EntityType::Iban,
            r"\b[A-Z]{2}\d{2}(?: ?[A-Z0-9]{4}){2,7}(?: ?[A-Z0-9]{1,3})?\b",
            0.95,
        ),
        DetectionRule::new(
            EntityType::CreditCardNumber,
            r"\b\d{4}[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{4}\b",
            0.9,
        ),
        DetectionRule::new(
            EntityType::SocialSecurityNumber,
            r"\b\d{3}-\d{2}-\d{4}\b",
            0.9,
        ),
        DetectionRule::new(
            EntityType::PhoneNumber,
            r"(?:\+\d{1,3}[\s.-])?\b\d{3}[-.\s]?\d{3}[-.\s]?\d{4}\b",
            0.75,
        ),
        DetectionRule::new(
            EntityType::IpAddress,
            r"\b(?:(?:25[0-5]|2[0-4]\d|1?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|1?\d?\d)\b",
            0.8,
        ),
    ]
}

/// Local-mode detector driven by regex rules
///
/// Rules may overlap (a card number also looks like a phone number); the
/// engine's overlap resolution keeps the more confident match.
pub struct RegexDetector {
    rules: Vec<(EntityType, Regex, f32)>,
}

impl RegexDetector {
    /// Compile a set of rules
    pub fn new(rules: &[DetectionRule]) -> Result<Self> {
        let compiled = rules
            .iter()
            .map(|rule| {
                rule.entity_type.validate()?;
                if !rule.confidence.is_finite() || !(0.0..=1.0).contains(&rule.confidence) {
                    return Err(PiiError::Config(format!(
                        "Rule for {} has confidence {} outside 0.0..=1.0",
                        rule.entity_type, rule.confidence
                    )));
                }
                let regex = Regex::new(&rule.pattern).map_err(|e| {
                    PiiError::Config(format!("Invalid pattern for {}: {}", rule.entity_type, e))
                })?;
                Ok((rule.entity_type.clone(), regex, rule.confidence))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { rules: compiled })
    }

    /// Detector with the built-in rules
    pub fn with_default_rules() -> Result<Self> {
        Self::new(&default_detection_rules())
    }

    /// Entity types this detector can produce
    pub fn entity_types(&self) -> Vec<EntityType> {
        let mut types: Vec<EntityType> = self.rules.iter().map(|(t, _, _)| t.clone()).collect();
        types.sort();
        types.dedup();
        types
    }

    /// Synchronous matching, used by the async trait impl
    pub fn find(&self, text: &str, filter: &TypeFilter) -> Vec<Entity> {
        let mut entities = Vec::new();
        for (entity_type, regex, confidence) in &self.rules {
            if !filter.allows(entity_type) {
                continue;
            }
            for mat in regex.find_iter(text) {
                entities.push(
                    Entity::new(entity_type.clone(), mat.as_str(), mat.start(), mat.end())
                        .with_confidence(*confidence),
                );
            }
        }
        entities.sort_by_key(|e| e.start);
        entities
    }
}

#[async_trait]
impl EntityDetector for RegexDetector {
    async fn detect(&self, text: &str, filter: &TypeFilter) -> Result<Vec<Entity>> {
        Ok(self.find(text, filter))
    }

    fn name(&self) -> &str {
        "regex"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> RegexDetector {
        RegexDetector::with_default_rules().unwrap()
    }

    fn types_in(text: &str) -> Vec<EntityType> {
        detector()
            .find(text, &TypeFilter::All)
            .into_iter()
            .map(|e| e.entity_type)
            .collect()
    }

    #[test]
    fn test_detects_email() {
        let text = "Contact hans.mueller@example.de today";
        let found = detector().find(text, &TypeFilter::All);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].entity_type, EntityType::EmailAddress);
        assert_eq!(&text[found[0].start..found[0].end], "hans.mueller@example.de");
        assert!(found[0].validate_in(text).is_ok());
    }

    #[test]
    fn test_detects_ssn_and_ip() {
        assert!(types_in("SSN 123-45-6789").contains(&EntityType::SocialSecurityNumber));
        assert!(types_in("from 192.168.1.20").contains(&EntityType::IpAddress));
        assert!(!types_in("version 999.1.1.1").contains(&EntityType::IpAddress));
    }

    #[test]
    fn test_detects_iban() {
        let found = types_in("Pay to DE89 3704 0044 0532 0130 00 please");
        assert!(found.contains(&EntityType::Iban));
    }

    #[test]
    fn test_detects_card_and_phone() {
        assert!(types_in("card 4111-1111-1111-1111").contains(&EntityType::CreditCardNumber));
        assert!(types_in("call 555-123-4567").contains(&EntityType::PhoneNumber));
        assert!(types_in("call +1 555 123 4567").contains(&EntityType::PhoneNumber));
    }

    #[test]
    fn test_filter_skips_rules() {
        let filter = TypeFilter::only([EntityType::PhoneNumber]);
        let found = detector().find("mail a@b.de or 555-123-4567", &filter);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].entity_type, EntityType::PhoneNumber);
    }

    #[test]
    fn test_nothing_in_plain_text() {
        assert!(types_in("called about invoice 123.").is_empty());
        assert!(types_in("[REDACTED:EmailAddress] <Person_1>").is_empty());
    }

    #[test]
    fn test_invalid_rules_rejected() {
        let bad_pattern = DetectionRule::new(EntityType::Url, "(", 0.5);
        assert!(matches!(RegexDetector::new(&[bad_pattern]), Err(PiiError::Config(_))));

        let bad_confidence = DetectionRule::new(EntityType::Url, "x", 2.0);
        assert!(RegexDetector::new(&[bad_confidence]).is_err());

        let bad_type = DetectionRule::new(EntityType::Custom("Employee_Id".into()), "x", 0.5);
        assert!(matches!(
            RegexDetector::new(&[bad_type]),
            Err(PiiError::InvalidEntityType(_))
        ));
    }

    #[test]
    fn test_custom_rule() {
        let rule = DetectionRule::new(EntityType::Custom("BadgeNumber".into()), r"\bB-\d{5}\b", 0.7);
        let detector = RegexDetector::new(&[rule]).unwrap();
        let found = detector.find("badge B-12345 issued", &TypeFilter::All);
        assert_eq!(found[0].text, "B-12345");
        assert_eq!(found[0].confidence, 0.7);
        assert_eq!(detector.entity_types(), vec![EntityType::Custom("BadgeNumber".into())]);
    }

    #[tokio::test]
    async fn test_async_detect() {
        let found = detector()
            .detect("a@b.de", &TypeFilter::All)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(detector().name(), "regex");
    }
}
