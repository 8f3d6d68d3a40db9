//! Token registry: one stable token per distinct real value
//!
//! The registry is the only shared mutable state in the engine. All
//! mutations (existence check, counter increment, dual-map insert) happen
//! inside a single write-lock critical section, so two callers that see the
//! same new value at the same time always receive the same token.
//!
//! Every mutation computes its full effect before touching the maps and then
//! commits with infallible inserts. A panic can therefore never leave the
//! maps half-updated, and a poisoned lock is safe to recover.

use crate::error::{PiiError, Result};
use crate::store::RegistryStore;
use crate::token::Token;
use crate::types::{Entity, EntityType, Mapping};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Default)]
struct RegistryState {
    /// real value → token
    forward: HashMap<String, Token>,
    /// token → real value
    reverse: HashMap<Token, String>,
    /// last sequence number handed out per type
    counters: HashMap<EntityType, u64>,
}

impl RegistryState {
    fn next_free(&self, entity_type: &EntityType, after: u64, reserved: &HashSet<Token>) -> u64 {
        let mut seq = after + 1;
        loop {
            let candidate = Token::assigned(entity_type.clone(), seq);
            if !reserved.contains(&candidate) && !self.reverse.contains_key(&candidate) {
                return seq;
            }
            seq += 1;
        }
    }

    fn bind(&mut self, value: String, token: Token) {
        let counter = self.counters.entry(token.entity_type().clone()).or_insert(0);
        if token.seq() > *counter {
            *counter = token.seq();
        }
        self.reverse.insert(token.clone(), value.clone());
        self.forward.insert(value, token);
    }
}

/// Persistable form of a registry: all bindings plus per-type counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySnapshot {
    /// Snapshot format version
    #[serde(default = "default_version")]
    pub version: u32,

    /// Bindings, ordered by token
    pub entries: Vec<RegistryEntry>,

    /// Last sequence number handed out per type
    ///
    /// May run ahead of the highest token in `entries` (numbers skipped
    /// because they collided with literal text); restoring it keeps those
    /// numbers from ever being handed out.
    #[serde(default)]
    pub counters: BTreeMap<EntityType, u64>,
}

fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

impl Default for RegistrySnapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            entries: Vec::new(),
            counters: BTreeMap::new(),
        }
    }
}

/// One real value ↔ token binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    pub token: Token,
    pub value: String,
}

/// Why an imported binding was not applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictKind {
    /// The value is already bound to a different token
    ValueBound { existing: Token },
    /// The token is already bound to a different value
    TokenBound,
    /// The mapping key is not a well-formed token
    MalformedToken,
}

/// An imported binding that was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeConflict {
    pub token: String,
    pub kind: ConflictKind,
}

/// Outcome of merging bindings into a registry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Bindings newly added
    pub added: usize,
    /// Bindings already present with identical value and token
    pub unchanged: usize,
    /// Bindings rejected, registry untouched for each
    pub conflicts: Vec<MergeConflict>,
}

impl MergeReport {
    /// True if every imported binding was applied or already present
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Treat any conflict as an error, for callers that require a clean import
    pub fn into_result(self) -> Result<Self> {
        match self.conflicts.first() {
            None => Ok(self),
            Some(conflict) => Err(PiiError::RegistryConflict {
                token: conflict.token.clone(),
                reason: match &conflict.kind {
                    ConflictKind::ValueBound { existing } => {
                        format!("value already bound to {}", existing)
                    }
                    ConflictKind::TokenBound => "token already bound to another value".to_string(),
                    ConflictKind::MalformedToken => "not a well-formed token".to_string(),
                },
            }),
        }
    }
}

/// Thread-safe store of real value ↔ token bindings
///
/// Share it across engines and tasks with `Arc<TokenRegistry>`.
#[derive(Debug, Default)]
pub struct TokenRegistry {
    state: RwLock<RegistryState>,
}

impl TokenRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Token for `value`, allocating the next number for `entity_type` if new
    ///
    /// Idempotent: once a value has a token, every later call returns it,
    /// whatever type is passed. Fails with `InvalidEntityType` for a
    /// hand-built type whose tokens would not scan back.
    pub fn get_or_create(&self, value: &str, entity_type: EntityType) -> Result<Token> {
        entity_type.validate()?;
        if let Some(token) = self.read().forward.get(value) {
            return Ok(token.clone());
        }

        let mut state = self.write();
        // Re-check: another writer may have registered it between the locks
        if let Some(token) = state.forward.get(value) {
            return Ok(token.clone());
        }
        let last = state.counters.get(&entity_type).copied().unwrap_or(0);
        let seq = state.next_free(&entity_type, last, &HashSet::new());
        let token = Token::assigned(entity_type, seq);
        state.bind(value.to_string(), token.clone());
        tracing::debug!(token = %token, "Registered new value");
        Ok(token)
    }

    /// Tokens for every entity of one document, committed as a unit
    ///
    /// Returns one token per input entity, in order. Entities with
    /// byte-identical text share a token. New numbers skip anything in
    /// `reserved`. If a value already bound in the registry maps to a
    /// reserved token, nothing is registered and `TokenCollision` is returned.
    pub fn assign_all(&self, entities: &[&Entity], reserved: &HashSet<Token>) -> Result<Vec<Token>> {
        for entity in entities {
            entity.entity_type.validate()?;
        }
        {
            let state = self.read();
            let mut tokens = Vec::with_capacity(entities.len());
            for entity in entities {
                match state.forward.get(&entity.text) {
                    Some(token) if reserved.contains(token) => {
                        return Err(PiiError::TokenCollision(token.to_string()));
                    }
                    Some(token) => tokens.push(token.clone()),
                    None => break,
                }
            }
            if tokens.len() == entities.len() {
                return Ok(tokens);
            }
        }

        let mut state = self.write();
        let mut pending: HashMap<&str, Token> = HashMap::new();
        let mut counters: HashMap<EntityType, u64> = HashMap::new();
        let mut tokens = Vec::with_capacity(entities.len());

        for entity in entities {
            if let Some(token) = state.forward.get(&entity.text) {
                if reserved.contains(token) {
                    return Err(PiiError::TokenCollision(token.to_string()));
                }
                tokens.push(token.clone());
                continue;
            }
            if let Some(token) = pending.get(entity.text.as_str()) {
                tokens.push(token.clone());
                continue;
            }
            let last = counters
                .get(&entity.entity_type)
                .or_else(|| state.counters.get(&entity.entity_type))
                .copied()
                .unwrap_or(0);
            let seq = state.next_free(&entity.entity_type, last, reserved);
            counters.insert(entity.entity_type.clone(), seq);
            let token = Token::assigned(entity.entity_type.clone(), seq);
            pending.insert(entity.text.as_str(), token.clone());
            tokens.push(token);
        }

        let added = pending.len();
        for (value, token) in pending {
            state.bind(value.to_string(), token);
        }
        // Skipped numbers stay consumed
        for (entity_type, seq) in counters {
            let counter = state.counters.entry(entity_type).or_insert(0);
            if seq > *counter {
                *counter = seq;
            }
        }
        if added > 0 {
            tracing::debug!(added, total = state.forward.len(), "Registry updated");
        }
        Ok(tokens)
    }

    /// Token bound to `value`, if any
    pub fn lookup_token(&self, value: &str) -> Option<Token> {
        self.read().forward.get(value).cloned()
    }

    /// Real value bound to `token`, if any
    pub fn lookup_value(&self, token: &Token) -> Option<String> {
        self.read().reverse.get(token).cloned()
    }

    /// Number of bindings
    pub fn len(&self) -> usize {
        self.read().forward.len()
    }

    /// True if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.read().forward.is_empty()
    }

    /// Last sequence number handed out for a type (0 if none)
    pub fn counter(&self, entity_type: &EntityType) -> u64 {
        self.read().counters.get(entity_type).copied().unwrap_or(0)
    }

    /// All bindings as `(value, token)`, longest value first
    pub fn known_values(&self) -> Vec<(String, Token)> {
        let state = self.read();
        let mut values: Vec<(String, Token)> = state
            .forward
            .iter()
            .map(|(v, t)| (v.clone(), t.clone()))
            .collect();
        values.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.1.cmp(&b.1)));
        values
    }

    /// Full registry as a token → value mapping
    pub fn to_mapping(&self) -> Mapping {
        let state = self.read();
        let mut mapping = Mapping::new();
        for (token, value) in &state.reverse {
            mapping.insert(token, value.clone());
        }
        mapping
    }

    /// Capture bindings and counters for persistence
    pub fn snapshot(&self) -> RegistrySnapshot {
        let state = self.read();
        let mut entries: Vec<RegistryEntry> = state
            .reverse
            .iter()
            .map(|(token, value)| RegistryEntry {
                token: token.clone(),
                value: value.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.token.cmp(&b.token));
        RegistrySnapshot {
            version: SNAPSHOT_VERSION,
            entries,
            counters: state
                .counters
                .iter()
                .map(|(t, n)| (t.clone(), *n))
                .collect(),
        }
    }

    /// Rebuild a registry from a snapshot
    ///
    /// Rejects snapshots whose bindings are not a bijection. A counter that
    /// trails its highest token is raised to it.
    pub fn from_snapshot(snapshot: RegistrySnapshot) -> Result<Self> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(PiiError::Registry(format!(
                "Unsupported snapshot version {} (expected {})",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }

        let mut state = RegistryState::default();
        for (entity_type, seq) in snapshot.counters {
            state.counters.insert(entity_type, seq);
        }
        for entry in snapshot.entries {
            if state.reverse.contains_key(&entry.token) {
                return Err(PiiError::Registry(format!(
                    "Duplicate token {} in snapshot",
                    entry.token
                )));
            }
            if let Some(existing) = state.forward.get(&entry.value) {
                return Err(PiiError::Registry(format!(
                    "Value bound to both {} and {} in snapshot",
                    existing, entry.token
                )));
            }
            let counter = state.counters.get(entry.token.entity_type()).copied().unwrap_or(0);
            if counter < entry.token.seq() {
                tracing::warn!(
                    entity_type = %entry.token.entity_type(),
                    counter,
                    token = %entry.token,
                    "Snapshot counter behind its tokens, raising"
                );
            }
            state.bind(entry.value, entry.token);
        }

        Ok(Self {
            state: RwLock::new(state),
        })
    }

    /// Load a registry from a store (empty if the store holds nothing)
    pub fn load_from(store: &dyn RegistryStore) -> Result<Self> {
        let snapshot = store.load()?;
        let registry = Self::from_snapshot(snapshot)?;
        tracing::info!(entries = registry.len(), "Registry loaded");
        Ok(registry)
    }

    /// Persist the current bindings and counters to a store
    pub fn flush_to(&self, store: &dyn RegistryStore) -> Result<()> {
        let snapshot = self.snapshot();
        store.save(&snapshot)?;
        tracing::debug!(entries = snapshot.entries.len(), "Registry flushed");
        Ok(())
    }

    /// Import bindings from another registry
    pub fn merge(&self, other: &TokenRegistry) -> MergeReport {
        self.merge_snapshot(&other.snapshot())
    }

    /// Import bindings and counters from a snapshot
    ///
    /// Conflicting bindings are reported and skipped; everything else is
    /// applied. Counters only ever move forward.
    pub fn merge_snapshot(&self, snapshot: &RegistrySnapshot) -> MergeReport {
        let pairs = snapshot
            .entries
            .iter()
            .map(|e| (e.token.to_string(), Some(e.token.clone()), e.value.as_str()));
        self.merge_pairs(pairs, &snapshot.counters)
    }

    /// Import bindings from a token → value mapping
    pub fn merge_mapping(&self, mapping: &Mapping) -> MergeReport {
        let pairs = mapping
            .iter()
            .map(|(raw, value)| (raw.to_string(), raw.parse::<Token>().ok(), value));
        self.merge_pairs(pairs, &BTreeMap::new())
    }

    /// Apply imported bindings, then imported counters, in one critical section
    fn merge_pairs<'v>(
        &self,
        pairs: impl Iterator<Item = (String, Option<Token>, &'v str)>,
        counters: &BTreeMap<EntityType, u64>,
    ) -> MergeReport {
        let mut report = MergeReport::default();
        let mut state = self.write();

        for (raw, token, value) in pairs {
            let Some(token) = token else {
                report.conflicts.push(MergeConflict {
                    token: raw,
                    kind: ConflictKind::MalformedToken,
                });
                continue;
            };
            let bound_token = state.forward.get(value).cloned();
            let token_taken = state.reverse.contains_key(&token);
            match (bound_token, token_taken) {
                (Some(existing), _) if existing == token => report.unchanged += 1,
                (Some(existing), _) => report.conflicts.push(MergeConflict {
                    token: raw,
                    kind: ConflictKind::ValueBound { existing },
                }),
                (None, true) => report.conflicts.push(MergeConflict {
                    token: raw,
                    kind: ConflictKind::TokenBound,
                }),
                (None, false) => {
                    state.bind(value.to_string(), token);
                    report.added += 1;
                }
            }
        }
        for (entity_type, seq) in counters {
            let counter = state.counters.entry(entity_type.clone()).or_insert(0);
            if *seq > *counter {
                *counter = *seq;
            }
        }
        drop(state);

        if !report.conflicts.is_empty() {
            tracing::warn!(
                conflicts = report.conflicts.len(),
                added = report.added,
                "Registry merge skipped conflicting bindings"
            );
        }
        report
    }
}
