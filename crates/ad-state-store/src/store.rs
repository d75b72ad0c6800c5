//! Entity attribute store with domain indexing

use ad_core::{
    default_attributes, domain_of, is_fully_qualified, or_default, Attributes, ATTR_ALL,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::{Map, Value};
use tracing::{instrument, trace};

/// The entity store tracks every entity's attribute mapping
///
/// The EntityStore is responsible for:
/// - Storing the attribute mapping of all entities
/// - Auto-creating entities as `{"state": null}` on first access
/// - Maintaining a domain index so domain-wide reads keep insertion order
///
/// It never dispatches anything. Callers must not hold on to values across
/// re-entrant writes; every accessor returns owned copies.
#[derive(Default)]
pub struct EntityStore {
    /// Attribute mappings keyed by entity_id string
    states: DashMap<String, Attributes>,
    /// Index of entity_ids by domain, in creation order
    domain_index: DashMap<String, Vec<String>>,
}

impl EntityStore {
    /// Create an empty entity store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure an entity exists, creating it with the default mapping
    fn ensure(&self, entity_id: &str) {
        if self.states.contains_key(entity_id) {
            return;
        }
        self.insert_new(entity_id, default_attributes());
    }

    fn insert_new(&self, entity_id: &str, attributes: Attributes) {
        match self.states.entry(entity_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                occupied.insert(attributes);
            }
            Entry::Vacant(vacant) => {
                trace!(entity_id, "Creating entity");
                vacant.insert(attributes);
                if let Some(domain) = domain_of(entity_id) {
                    self.domain_index
                        .entry(domain.to_string())
                        .or_default()
                        .push(entity_id.to_string());
                }
            }
        }
    }

    /// Read an entity or a whole domain
    ///
    /// For a fully-qualified `entity_ref` this returns the attribute value,
    /// or the entire mapping as an object when `attribute` is `"all"`. For a
    /// bare domain it returns an object of entity_id -> value for every
    /// entity in that domain. When `default` is given and not null, falsy
    /// values are replaced by it.
    pub fn read(&self, entity_ref: &str, attribute: &str, default: Option<&Value>) -> Value {
        let default = default.filter(|d| !d.is_null());
        let project = |entity_id: &str| {
            let value = self.get(entity_id, attribute);
            match default {
                Some(default) => or_default(value, default),
                None => value,
            }
        };

        if is_fully_qualified(entity_ref) {
            return project(entity_ref);
        }

        let matched: Map<String, Value> = self
            .entity_ids(entity_ref)
            .iter()
            .map(|entity_id| (entity_id.clone(), project(entity_id)))
            .collect();
        Value::Object(matched)
    }

    /// Value of one attribute, or the full mapping for `"all"`
    ///
    /// Missing attributes read as null; missing entities are created.
    pub fn get(&self, entity_id: &str, attribute: &str) -> Value {
        let attributes = self.attributes(entity_id);
        if attribute == ATTR_ALL {
            Value::Object(attributes)
        } else {
            attributes.get(attribute).cloned().unwrap_or(Value::Null)
        }
    }

    /// Copy of an entity's attribute mapping, creating the entity if absent
    pub fn attributes(&self, entity_id: &str) -> Attributes {
        self.ensure(entity_id);
        self.states
            .get(entity_id)
            .map(|a| a.clone())
            .unwrap_or_else(default_attributes)
    }

    /// Value of an attribute without creating the entity
    pub fn peek(&self, entity_id: &str, attribute: &str) -> Option<Value> {
        let attributes = self.states.get(entity_id)?;
        if attribute == ATTR_ALL {
            Some(Value::Object(attributes.clone()))
        } else {
            attributes.get(attribute).cloned()
        }
    }

    /// Unconditionally set an attribute, creating the entity if absent
    #[instrument(skip(self, value))]
    pub fn write(&self, entity_id: &str, attribute: &str, value: Value) {
        self.ensure(entity_id);
        if let Some(mut attributes) = self.states.get_mut(entity_id) {
            attributes.insert(attribute.to_string(), value);
        }
    }

    /// Replace an entity's whole attribute mapping
    pub fn seed(&self, entity_id: &str, attributes: Attributes) {
        self.insert_new(entity_id, attributes);
    }

    /// Whether the entity has been created
    pub fn contains(&self, entity_id: &str) -> bool {
        self.states.contains_key(entity_id)
    }

    /// All entity ids of a domain, in creation order
    pub fn entity_ids(&self, domain: &str) -> Vec<String> {
        self.domain_index
            .get(domain)
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }

    /// Every entity and its attribute mapping
    pub fn snapshot(&self) -> Map<String, Value> {
        self.states
            .iter()
            .map(|r| (r.key().clone(), Value::Object(r.value().clone())))
            .collect()
    }

    /// Number of entities
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether no entity exists yet
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Drop every entity
    pub fn clear(&self) {
        self.states.clear();
        self.domain_index.clear();
    }
}
