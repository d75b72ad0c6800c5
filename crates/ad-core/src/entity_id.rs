//! Entity ID type representing a domain.object_id pair

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::DOMAIN_SEPARATOR;

/// Error type for invalid entity IDs
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EntityIdError {
    #[error("entity_id '{0}' must contain exactly one '.' separator")]
    InvalidFormat(String),

    #[error("domain cannot be empty in '{0}'")]
    EmptyDomain(String),

    #[error("object_id cannot be empty in '{0}'")]
    EmptyObjectId(String),
}

/// An AppDaemon entity ID (e.g., "light.living_room")
///
/// Unlike Home Assistant proper, AppDaemon does not police the character set
/// of either half; the only rule is a single separator with both sides
/// non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId {
    domain: String,
    object_id: String,
}

impl EntityId {
    /// Create a new EntityId from domain and object_id parts
    pub fn new(
        domain: impl Into<String>,
        object_id: impl Into<String>,
    ) -> Result<Self, EntityIdError> {
        let domain = domain.into();
        let object_id = object_id.into();

        if domain.is_empty() {
            return Err(EntityIdError::EmptyDomain(format!(".{object_id}")));
        }
        if object_id.is_empty() {
            return Err(EntityIdError::EmptyObjectId(format!("{domain}.")));
        }
        if domain.contains(DOMAIN_SEPARATOR) || object_id.contains(DOMAIN_SEPARATOR) {
            return Err(EntityIdError::InvalidFormat(format!("{domain}.{object_id}")));
        }

        Ok(Self { domain, object_id })
    }

    /// Get the domain part of the entity ID
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Get the object_id part of the entity ID
    pub fn object_id(&self) -> &str {
        &self.object_id
    }
}

impl FromStr for EntityId {
    type Err = EntityIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(DOMAIN_SEPARATOR).collect();
        if parts.len() != 2 {
            return Err(EntityIdError::InvalidFormat(s.to_string()));
        }
        Self::new(parts[0], parts[1])
    }
}

impl TryFrom<String> for EntityId {
    type Error = EntityIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> String {
        id.to_string()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.domain, self.object_id)
    }
}

/// Whether a reference names a single entity rather than a whole domain
pub fn is_fully_qualified(entity_ref: &str) -> bool {
    entity_ref.contains(DOMAIN_SEPARATOR)
}

/// Domain portion of a fully-qualified entity id
///
/// Returns `None` when the id does not split into exactly two parts.
pub fn domain_of(entity_id: &str) -> Option<&str> {
    let (domain, object_id) = entity_id.split_once(DOMAIN_SEPARATOR)?;
    if object_id.contains(DOMAIN_SEPARATOR) {
        return None;
    }
    Some(domain)
}
