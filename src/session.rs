//! Conversation state
//!
//! A multi-turn exchange tokenizes each outgoing message separately but must
//! restore replies that may mention tokens from any earlier turn. The caller
//! keeps a `ConversationState` for the session and absorbs every turn's
//! mapping into it.

use crate::substitute;
use crate::types::{DetokenizeResult, Mapping, TokenizeResult};

/// Accumulated mapping for one conversation
///
/// Grows only. Absorbing a mapping that binds an already-known token to a
/// different value keeps the newer value (per-call numbering restarts each
/// turn, so this happens unless the engine runs in registry scope) and
/// counts the rebind.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    mapping: Mapping,
    turns: usize,
    rebinds: usize,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one turn's mapping
    pub fn absorb(&mut self, mapping: &Mapping) {
        let rebound = self.mapping.update(mapping);
        self.turns += 1;
        if !rebound.is_empty() {
            self.rebinds += rebound.len();
            tracing::warn!(
                turn = self.turns,
                tokens = ?rebound,
                "Conversation tokens rebound to new values, use registry scope for stable tokens"
            );
        }
    }

    /// Merge the mapping of a tokenization result
    pub fn absorb_result(&mut self, result: &TokenizeResult) {
        self.absorb(&result.mapping);
    }

    /// Restore a reply using everything seen so far
    pub fn detokenize(&self, text: &str) -> DetokenizeResult {
        substitute::restore(text, &self.mapping)
    }

    pub fn mapping(&self) -> &Mapping {
        &self.mapping
    }

    /// Number of mappings absorbed
    pub fn turns(&self) -> usize {
        self.turns
    }

    /// Number of token bindings replaced by a later turn
    pub fn rebinds(&self) -> usize {
        self.rebinds
    }

    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }
}
