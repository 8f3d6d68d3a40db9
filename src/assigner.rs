//! Token assignment for per-call and registry scope

use crate::error::Result;
use crate::registry::TokenRegistry;
use crate::token::Token;
use crate::types::{Entity, EntityType};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Where token numbers come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenScope {
    /// Fresh counters for every call; identical values share a token only within the call
    #[default]
    PerCall,
    /// Numbers come from the shared registry; identical values share a token everywhere
    Registry,
}

/// Counters and value table local to one call
#[derive(Debug, Default)]
struct PerCallAssigner {
    tokens: HashMap<String, Token>,
    counters: HashMap<EntityType, u64>,
}

impl PerCallAssigner {
    fn assign(&mut self, entity: &Entity, reserved: &HashSet<Token>) -> Token {
        if let Some(token) = self.tokens.get(&entity.text) {
            return token.clone();
        }
        let counter = self.counters.entry(entity.entity_type.clone()).or_insert(0);
        let token = loop {
            *counter += 1;
            let candidate = Token::assigned(entity.entity_type.clone(), *counter);
            if !reserved.contains(&candidate) {
                break candidate;
            }
        };
        self.tokens.insert(entity.text.clone(), token.clone());
        token
    }
}

/// Hands out tokens for the entities of one document
pub enum TokenAssigner<'r> {
    PerCall,
    Registry(&'r TokenRegistry),
}

impl<'r> TokenAssigner<'r> {
    /// Assigner for the given scope backed by `registry`
    pub fn for_scope(scope: TokenScope, registry: &'r TokenRegistry) -> Self {
        match scope {
            TokenScope::PerCall => Self::PerCall,
            TokenScope::Registry => Self::Registry(registry),
        }
    }

    /// One token per entity, in input order
    ///
    /// Byte-identical values receive the same token; the type of the first
    /// occurrence decides. Numbers in `reserved` are never handed out.
    pub fn assign(&self, entities: &[&Entity], reserved: &HashSet<Token>) -> Result<Vec<Token>> {
        match self {
            Self::PerCall => {
                for entity in entities {
                    entity.entity_type.validate()?;
                }
                let mut assigner = PerCallAssigner::default();
                Ok(entities
                    .iter()
                    .map(|entity| assigner.assign(entity, reserved))
                    .collect())
            }
            Self::Registry(registry) => registry.assign_all(entities, reserved),
        }
    }
}
