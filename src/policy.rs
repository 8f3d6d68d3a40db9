//! Policy resolution
//!
//! A policy turns a caller's selection (a named policy, an explicit list of
//! entity types, or both) into the type filter applied to detector output,
//! plus the region whose detector should run.
//!
//! Named policies form a closed, built-in table:
//!
//! | Name       | Types                                      | Region |
//! |------------|--------------------------------------------|--------|
//! | `basic`    | names, email, phone, card numbers          |        |
//! | `strict`   | every type                                 |        |
//! | `gdpr_eu`  | EU personal data set                       | `eu`   |
//! | `hipaa_us` | HIPAA identifiers                          | `us`   |

use crate::error::{PiiError, Result};
use crate::types::EntityType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Which entity types a call acts on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "types")]
pub enum TypeFilter {
    /// Every type, including custom ones
    All,
    /// Only the listed types
    Only(BTreeSet<EntityType>),
}

impl TypeFilter {
    /// Filter accepting exactly `types`
    pub fn only(types: impl IntoIterator<Item = EntityType>) -> Self {
        Self::Only(types.into_iter().collect())
    }

    /// Whether entities of `entity_type` pass the filter
    pub fn allows(&self, entity_type: &EntityType) -> bool {
        match self {
            Self::All => true,
            Self::Only(types) => types.contains(entity_type),
        }
    }
}

/// Detector routing tag (e.g. `eu`, `us`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Region(String);

impl Region {
    /// Region from a tag, lowercased
    pub fn new(tag: impl AsRef<str>) -> Self {
        Self(tag.as_ref().trim().to_ascii_lowercase())
    }

    pub fn eu() -> Self {
        Self::new("eu")
    }

    pub fn us() -> Self {
        Self::new("us")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A caller's policy choice
///
/// An explicit entity list overrides the named policy's types; the named
/// policy still supplies the region unless one is given.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySelector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities: Option<Vec<EntityType>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<Region>,
}

impl PolicySelector {
    /// Select a named policy
    pub fn named(policy: impl Into<String>) -> Self {
        Self {
            policy: Some(policy.into()),
            ..Default::default()
        }
    }

    /// Select an explicit list of types
    pub fn entities(types: impl IntoIterator<Item = EntityType>) -> Self {
        Self {
            entities: Some(types.into_iter().collect()),
            ..Default::default()
        }
    }

    /// Override the type list
    pub fn with_entities(mut self, types: impl IntoIterator<Item = EntityType>) -> Self {
        self.entities = Some(types.into_iter().collect());
        self
    }

    /// Override the region
    pub fn in_region(mut self, region: Region) -> Self {
        self.region = Some(region);
        self
    }
}

impl From<&str> for PolicySelector {
    fn from(policy: &str) -> Self {
        Self::named(policy)
    }
}

/// A built-in named policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDefinition {
    pub name: &'static str,
    pub types: TypeFilter,
    pub region: Option<Region>,
}

/// The outcome of resolving a selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPolicy {
    /// Named policy the selection started from
    pub name: String,
    pub types: TypeFilter,
    pub region: Option<Region>,
}

/// The closed table of built-in policies
pub fn builtin_policies() -> Vec<PolicyDefinition> {
    use EntityType::*;
    vec![
        PolicyDefinition {
            name: "basic",
            types: TypeFilter::only([Person, EmailAddress, PhoneNumber, CreditCardNumber]),
            region: None,
        },
        PolicyDefinition {
            name: "strict",
            types: TypeFilter::All,
            region: None,
        },
        PolicyDefinition {
            name: "gdpr_eu",
            types: TypeFilter::only([
                Person,
                EmailAddress,
                PhoneNumber,
                Iban,
                Address,
                DateOfBirth,
                NationalIdNumber,
                CreditCardNumber,
                IpAddress,
            ]),
            region: Some(Region::eu()),
        },
        PolicyDefinition {
            name: "hipaa_us",
            types: TypeFilter::only([
                Person,
                EmailAddress,
                PhoneNumber,
                SocialSecurityNumber,
                DateOfBirth,
                Address,
                MedicalRecordNumber,
                HealthInsuranceNumber,
                IpAddress,
                Url,
            ]),
            region: Some(Region::us()),
        },
    ]
}

/// Look up a built-in policy by name
pub fn lookup(name: &str) -> Result<PolicyDefinition> {
    builtin_policies()
        .into_iter()
        .find(|p| p.name == name)
        .ok_or_else(|| PiiError::UnknownPolicy(name.to_string()))
}

/// Resolve a selector against the built-in table
///
/// A selector without a policy name falls back to `default_policy`. An
/// unknown name is an error even when an explicit list would override it.
pub fn resolve(selector: &PolicySelector, default_policy: &str) -> Result<ResolvedPolicy> {
    let name = selector.policy.as_deref().unwrap_or(default_policy);
    let definition = lookup(name)?;

    let types = match &selector.entities {
        Some(list) => TypeFilter::only(list.iter().cloned()),
        None => definition.types,
    };
    let region = selector.region.clone().or(definition.region);

    Ok(ResolvedPolicy {
        name: name.to_string(),
        types,
        region,
    })
}
