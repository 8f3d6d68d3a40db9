//! High-level PII engine
//!
//! `PiiEngine` owns a detector (plus optional per-region detectors), a
//! shared `TokenRegistry`, and the engine configuration. Every operation
//! follows the same order:
//!
//! 1. resolve the policy (unknown names fail here, before detection)
//! 2. run the detector, with no lock held
//! 3. filter by type and confidence, validate spans
//! 4. resolve overlaps and assign tokens (the only registry write)
//! 5. rebuild the text in one pass

use crate::assigner::{TokenAssigner, TokenScope};
use crate::config::EngineConfig;
use crate::detector::{EntityDetector, RegexDetector};
use crate::error::{PiiError, Result};
use crate::policy::{self, PolicySelector, Region, ResolvedPolicy, TypeFilter};
use crate::registry::TokenRegistry;
use crate::substitute;
use crate::token::{reserved_in, Token};
use crate::types::{DetokenizeResult, Entity, Mapping, RedactResult, TokenizeResult};
use std::collections::HashMap;
use std::sync::Arc;

/// Reversible tokenization, redaction, and restoration of PII in text
pub struct PiiEngine {
    detector: Arc<dyn EntityDetector>,
    regional: HashMap<Region, Arc<dyn EntityDetector>>,
    registry: Arc<TokenRegistry>,
    config: EngineConfig,
}

impl PiiEngine {
    /// Engine with the given default detector, a fresh registry, and default config
    pub fn new(detector: Arc<dyn EntityDetector>) -> Self {
        Self {
            detector,
            regional: HashMap::new(),
            registry: Arc::new(TokenRegistry::new()),
            config: EngineConfig::default(),
        }
    }

    /// Engine backed by the built-in regex detector
    pub fn local() -> Result<Self> {
        Ok(Self::new(Arc::new(RegexDetector::with_default_rules()?)))
    }

    /// Replace the configuration, validating it first
    pub fn with_config(mut self, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// Share an existing registry (e.g. one loaded from a store)
    pub fn with_registry(mut self, registry: Arc<TokenRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Route policies tagged with `region` to a dedicated detector
    pub fn with_region_detector(mut self, region: Region, detector: Arc<dyn EntityDetector>) -> Self {
        self.regional.insert(region, detector);
        self
    }

    pub fn registry(&self) -> &Arc<TokenRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Resolve a selector against the built-in policies and the configured default
    pub fn resolve_policy(&self, selector: &PolicySelector) -> Result<ResolvedPolicy> {
        policy::resolve(selector, &self.config.default_policy)
    }

    fn detector_for(&self, region: Option<&Region>) -> &Arc<dyn EntityDetector> {
        match region {
            Some(region) => self.regional.get(region).unwrap_or_else(|| {
                tracing::debug!(%region, "No regional detector, using default");
                &self.detector
            }),
            None => &self.detector,
        }
    }

    /// Run detection for a resolved policy and keep what the policy acts on
    pub(crate) async fn detect(&self, text: &str, policy: &ResolvedPolicy) -> Result<Vec<Entity>> {
        let detector = self.detector_for(policy.region.as_ref());
        let call = detector.detect(text, &policy.types);
        let detected = match self.config.detection_timeout() {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                PiiError::Detection(format!(
                    "Detector '{}' timed out after {}ms",
                    detector.name(),
                    limit.as_millis()
                ))
            })??,
            None => call.await?,
        };

        let total = detected.len();
        let entities = self.admit(text, detected, &policy.types)?;
        tracing::debug!(
            detector = detector.name(),
            policy = %policy.name,
            detected = total,
            kept = entities.len(),
            "Detection complete"
        );
        Ok(entities)
    }

    /// Apply the type and confidence filters, then validate the survivors
    fn admit(&self, text: &str, entities: Vec<Entity>, types: &TypeFilter) -> Result<Vec<Entity>> {
        let kept: Vec<Entity> = entities
            .into_iter()
            .filter(|e| types.allows(&e.entity_type) && e.confidence >= self.config.min_confidence)
            .collect();
        substitute::validate_spans(text, &kept)?;
        Ok(kept)
    }

    /// Detect and tokenize
    ///
    /// In `TokenScope::Registry` tokens come from the shared registry, so the
    /// same value receives the same token in every call. If detection fails
    /// the registry is untouched.
    pub async fn tokenize(
        &self,
        text: &str,
        selector: &PolicySelector,
        scope: TokenScope,
    ) -> Result<TokenizeResult> {
        let policy = self.resolve_policy(selector)?;
        let entities = self.detect(text, &policy).await?;
        self.tokenize_detected(text, entities, scope)
    }

    /// Tokenize caller-supplied entities, skipping detection
    pub fn tokenize_entities(
        &self,
        text: &str,
        entities: Vec<Entity>,
        scope: TokenScope,
    ) -> Result<TokenizeResult> {
        let entities = self.admit(text, entities, &TypeFilter::All)?;
        self.tokenize_detected(text, entities, scope)
    }

    /// Assign tokens and substitute; `entities` must already be validated
    pub(crate) fn tokenize_detected(
        &self,
        text: &str,
        entities: Vec<Entity>,
        scope: TokenScope,
    ) -> Result<TokenizeResult> {
        let resolved = substitute::resolve_overlaps(entities);
        let accepted: Vec<&Entity> = resolved.accepted.iter().collect();

        let reserved = reserved_in(text);
        let tokens = TokenAssigner::for_scope(scope, &self.registry).assign(&accepted, &reserved)?;

        let mut mapping = Mapping::new();
        let mut spans = Vec::with_capacity(tokens.len());
        for (entity, token) in accepted.iter().zip(&tokens) {
            mapping.insert(token, entity.text.clone());
            spans.push((entity.start..entity.end, token.to_string()));
        }
        let output = substitute::apply_spans(text, &spans);

        tracing::debug!(
            scope = ?scope,
            substituted = spans.len(),
            suppressed = resolved.suppressed.len(),
            tokens = mapping.len(),
            "Text tokenized"
        );
        Ok(TokenizeResult {
            text: output,
            mapping,
            entities: resolved.all(),
            suppressed: resolved.suppressed,
        })
    }

    /// Restore tokens using a mapping; independent of the registry
    pub fn detokenize(&self, text: &str, mapping: &Mapping) -> DetokenizeResult {
        let result = substitute::restore(text, mapping);
        if !result.unresolved.is_empty() {
            tracing::warn!(
                unresolved = result.unresolved.len(),
                replacements = result.replacements,
                "Tokens without mapping entries left in place"
            );
        }
        result
    }

    /// Detect and redact; one way, nothing is recorded
    pub async fn redact(&self, text: &str, selector: &PolicySelector) -> Result<RedactResult> {
        let policy = self.resolve_policy(selector)?;
        let entities = self.detect(text, &policy).await?;
        Ok(self.redact_detected(text, entities))
    }

    /// Redact caller-supplied entities, skipping detection
    pub fn redact_entities(&self, text: &str, entities: Vec<Entity>) -> Result<RedactResult> {
        let entities = self.admit(text, entities, &TypeFilter::All)?;
        Ok(self.redact_detected(text, entities))
    }

    pub(crate) fn redact_detected(&self, text: &str, entities: Vec<Entity>) -> RedactResult {
        let resolved = substitute::resolve_overlaps(entities);
        let spans: Vec<_> = resolved
            .accepted
            .iter()
            .map(|e| (e.start..e.end, self.config.redaction.marker(&e.entity_type)))
            .collect();
        let output = substitute::apply_spans(text, &spans);

        tracing::debug!(
            redacted = spans.len(),
            suppressed = resolved.suppressed.len(),
            "Text redacted"
        );
        RedactResult {
            text: output,
            entities: resolved.all(),
            suppressed: resolved.suppressed,
        }
    }

    /// Tokenize text that was never run through a detector, using values
    /// already in the registry
    ///
    /// Known values are located longest first at word boundaries; nothing new
    /// is registered. Fails with `TokenCollision` if a token that would be
    /// used already occurs literally in `text`.
    pub fn apply_registry(&self, text: &str) -> Result<TokenizeResult> {
        let known = self.registry.known_values();
        let found = substitute::find_values(text, &known);

        let reserved = reserved_in(text);
        if let Some((_, token)) = found.iter().find(|(_, t)| reserved.contains(t)) {
            return Err(PiiError::TokenCollision(token.to_string()));
        }

        let mut mapping = Mapping::new();
        let mut spans = Vec::with_capacity(found.len());
        let mut entities = Vec::with_capacity(found.len());
        for (entity, token) in found {
            mapping.insert(&token, entity.text.clone());
            spans.push((entity.start..entity.end, token.to_string()));
            entities.push(entity);
        }
        let output = substitute::apply_spans(text, &spans);

        tracing::debug!(
            known = known.len(),
            substituted = spans.len(),
            "Registry applied"
        );
        Ok(TokenizeResult {
            text: output,
            mapping,
            entities,
            suppressed: Vec::new(),
        })
    }

    /// Token the registry holds for `value`, if any
    pub fn token_for(&self, value: &str) -> Option<Token> {
        self.registry.lookup_token(value)
    }
}
