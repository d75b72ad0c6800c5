//! Core types for the AppDaemon test double
//!
//! This crate provides the fundamental types shared by the simulated
//! runtime: EntityId, attribute values and keyword payloads, and the
//! payloads handed to state, event and timer callbacks.

mod callback;
mod entity_id;
mod value;

pub use callback::{
    EventCallback, FiredEvent, StateCallback, StateChange, TimerCallback,
};
pub use entity_id::{domain_of, is_fully_qualified, EntityId, EntityIdError};
pub use value::{default_attributes, is_truthy, or_default, Attributes, Kwargs};

/// Attribute that holds an entity's primary state value
pub const ATTR_STATE: &str = "state";

/// Sentinel attribute name meaning "every attribute of the entity"
pub const ATTR_ALL: &str = "all";

/// Keyword that asks `listen_state` to fire once at registration time
pub const KWARG_IMMEDIATE: &str = "immediate";

/// Separator between domain and object id in an entity id
pub const DOMAIN_SEPARATOR: char = '.';
