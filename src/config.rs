//! Engine configuration

use crate::error::{PiiError, Result};
use crate::policy;
use crate::types::EntityType;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How redacted spans are rendered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RedactionStyle {
    /// `[REDACTED:Person]`
    TypeLabel,
    /// The same fixed marker for every type
    Fixed(String),
}

impl Default for RedactionStyle {
    fn default() -> Self {
        Self::TypeLabel
    }
}

impl RedactionStyle {
    /// Marker substituted for an entity of `entity_type`
    pub fn marker(&self, entity_type: &EntityType) -> String {
        match self {
            Self::TypeLabel => format!("[REDACTED:{}]", entity_type),
            Self::Fixed(marker) => marker.clone(),
        }
    }
}

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Policy used when a call names none
    #[serde(default = "default_policy")]
    pub default_policy: String,

    /// Entities below this confidence are ignored
    #[serde(default)]
    pub min_confidence: f32,

    /// Redaction marker style
    #[serde(default)]
    pub redaction: RedactionStyle,

    /// Maximum detector calls in flight during a batch
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,

    /// Upper bound on a single detector call; unbounded when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection_timeout_ms: Option<u64>,
}

fn default_policy() -> String {
    "basic".to_string()
}

fn default_batch_concurrency() -> usize {
    8
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_policy: default_policy(),
            min_confidence: 0.0,
            redaction: RedactionStyle::default(),
            batch_concurrency: default_batch_concurrency(),
            detection_timeout_ms: None,
        }
    }
}

impl EngineConfig {
    /// Detector call deadline, if configured
    pub fn detection_timeout(&self) -> Option<Duration> {
        self.detection_timeout_ms.map(Duration::from_millis)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        policy::lookup(&self.default_policy).map_err(|_| {
            PiiError::Config(format!(
                "Default policy '{}' is not a built-in policy",
                self.default_policy
            ))
        })?;
        if !self.min_confidence.is_finite() || !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(PiiError::Config(format!(
                "minConfidence must be within 0.0..=1.0, got {}",
                self.min_confidence
            )));
        }
        if self.batch_concurrency == 0 {
            return Err(PiiError::Config(
                "batchConcurrency must be at least 1".to_string(),
            ));
        }
        if self.detection_timeout_ms == Some(0) {
            return Err(PiiError::Config(
                "detectionTimeoutMs must be positive".to_string(),
            ));
        }
        if let RedactionStyle::Fixed(marker) = &self.redaction {
            if marker.is_empty() {
                return Err(PiiError::Config("Fixed redaction marker is empty".to_string()));
            }
        }
        Ok(())
    }
}
