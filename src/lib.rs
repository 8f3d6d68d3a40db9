//! # a3s-pii
//!
//! Reversible PII tokenization, stable token registry, and redaction for the A3S ecosystem.
//!
//! ## Overview
//!
//! `a3s-pii` replaces detected sensitive spans with placeholder tokens such
//! as `<Person_1>`, keeps the mapping needed to restore them exactly, and
//! guarantees through a shared registry that the same real value receives
//! the same token across documents, batches, and conversation turns.
//! Detection is pluggable: bring a remote recognizer behind
//! [`EntityDetector`] or use the built-in [`RegexDetector`].
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_pii::{PiiEngine, PolicySelector, TokenScope};
//!
//! # async fn example() -> a3s_pii::Result<()> {
//! let engine = PiiEngine::local()?;
//!
//! let result = engine
//!     .tokenize(
//!         "Mail hans.mueller@example.de or call 555-123-4567",
//!         &PolicySelector::named("basic"),
//!         TokenScope::Registry,
//!     )
//!     .await?;
//! assert_eq!(result.text, "Mail <EmailAddress_1> or call <PhoneNumber_1>");
//!
//! // Send `result.text` downstream, then restore the reply
//! let restored = engine.detokenize(&result.text, &result.mapping);
//! assert_eq!(restored.text, "Mail hans.mueller@example.de or call 555-123-4567");
//! # Ok(())
//! # }
//! ```
//!
//! ## Policies
//!
//! - **basic**: names, email addresses, phone numbers, card numbers
//! - **strict**: every entity type
//! - **gdpr_eu**: EU personal data, routed to the `eu` detector
//! - **hipaa_us**: HIPAA identifiers, routed to the `us` detector
//!
//! ## Architecture
//!
//! - **PiiEngine**: high-level API: tokenize, detokenize, redact, batches
//! - **TokenRegistry**: thread-safe value ↔ token store, persisted via `RegistryStore`
//! - **EntityDetector** trait: external detection capability
//! - **ConversationState**: per-session mapping accumulator

pub mod assigner;
pub mod batch;
pub mod config;
pub mod crypto;
pub mod detector;
pub mod engine;
pub mod error;
pub mod policy;
pub mod registry;
pub mod session;
pub mod store;
pub mod substitute;
pub mod token;
pub mod types;

// Re-export core types
pub use assigner::{TokenAssigner, TokenScope};
pub use batch::{BatchItem, BatchResult};
pub use config::{EngineConfig, RedactionStyle};
pub use crypto::{Aes256GcmEncryptor, EncryptedSnapshot, SnapshotEncryptor};
pub use detector::{default_detection_rules, DetectionRule, EntityDetector, RegexDetector};
pub use engine::PiiEngine;
pub use error::{PiiError, Result};
pub use policy::{PolicySelector, Region, ResolvedPolicy, TypeFilter};
pub use registry::{
    ConflictKind, MergeConflict, MergeReport, RegistryEntry, RegistrySnapshot, TokenRegistry,
};
pub use session::ConversationState;
pub use store::{FileRegistryStore, MemoryRegistryStore, RegistryStore};
pub use token::Token;
pub use types::{DetokenizeResult, Entity, EntityType, Mapping, RedactResult, TokenizeResult};
