//! Entity state storage and state-change subscriptions
//!
//! This crate provides the two passive halves of the simulated state
//! machine: the [`EntityStore`], which holds every entity's attribute
//! mapping, and the [`SubscriptionRegistry`], which holds `listen_state`
//! subscriptions keyed by domain or entity id. Neither dispatches callbacks;
//! the driver decides when a write is a change and who hears about it.

mod store;
mod subscriptions;

pub use store::EntityStore;
pub use subscriptions::{
    ListenOptions, StateSubscription, SubscriptionHandle, SubscriptionRegistry,
};
