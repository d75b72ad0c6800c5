//! `listen_state` subscription registry

use ad_core::{is_truthy, Kwargs, StateCallback, ATTR_ALL, ATTR_STATE, KWARG_IMMEDIATE};
use dashmap::DashMap;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, instrument, trace};

/// A unique identifier for a state subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(u64);

/// Options for a `listen_state` registration
#[derive(Debug, Clone, Default)]
pub struct ListenOptions {
    /// Attribute to watch; `None` means `"state"`
    pub attribute: Option<String>,
    /// Only fire when the new value equals this
    pub new: Option<Value>,
    /// Only fire when the old value equals this
    pub old: Option<Value>,
    /// Extra keywords handed back to the callback
    pub kwargs: Kwargs,
}

impl ListenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    /// Watch every attribute (`attribute="all"`)
    pub fn all(self) -> Self {
        self.attribute(ATTR_ALL)
    }

    pub fn new_value(mut self, value: impl Into<Value>) -> Self {
        self.new = Some(value.into());
        self
    }

    pub fn old_value(mut self, value: impl Into<Value>) -> Self {
        self.old = Some(value.into());
        self
    }

    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    /// Fire once at registration with the current value
    pub fn immediate(self) -> Self {
        self.kwarg(KWARG_IMMEDIATE, true)
    }
}

/// A registered `listen_state` subscription
#[derive(Clone)]
pub struct StateSubscription {
    pub handle: SubscriptionHandle,
    pub callback: StateCallback,
    /// Watched attribute name, or `"all"`
    pub attribute: String,
    pub new: Option<Value>,
    pub old: Option<Value>,
    pub kwargs: Kwargs,
}

impl StateSubscription {
    /// Whether this subscription watches every attribute
    pub fn is_all(&self) -> bool {
        self.attribute == ATTR_ALL
    }

    /// Whether the extra keywords ask for an immediate first call
    pub fn is_immediate(&self) -> bool {
        self.kwargs.get(KWARG_IMMEDIATE).is_some_and(is_truthy)
    }

    /// Whether a write of `attribute` from `old` to `new` satisfies the filters
    pub fn matches(&self, attribute: &str, new: &Value, old: &Value) -> bool {
        let sat_attr = self.attribute == attribute || self.is_all();
        let sat_new = self.new.as_ref().map_or(true, |filter| filter == new);
        let sat_old = self.old.as_ref().map_or(true, |filter| filter == old);
        sat_attr && sat_new && sat_old
    }
}

impl fmt::Debug for StateSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateSubscription")
            .field("handle", &self.handle)
            .field("attribute", &self.attribute)
            .field("new", &self.new)
            .field("old", &self.old)
            .field("kwargs", &self.kwargs)
            .finish_non_exhaustive()
    }
}

/// Registry of state subscriptions keyed by scope
///
/// A scope is either a domain (`"light"`) or a fully-qualified entity id
/// (`"light.kitchen"`). Within a scope, subscriptions keep registration
/// order.
pub struct SubscriptionRegistry {
    scopes: DashMap<String, Vec<StateSubscription>>,
    next_handle: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            scopes: DashMap::new(),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Register a subscription under `scope`
    ///
    /// Returns a copy of the stored record; its handle cancels it.
    #[instrument(skip(self, callback, options))]
    pub fn subscribe(
        &self,
        scope: &str,
        callback: StateCallback,
        options: ListenOptions,
    ) -> StateSubscription {
        let attribute = options
            .attribute
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| ATTR_STATE.to_string());

        let subscription = StateSubscription {
            handle: SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::SeqCst)),
            callback,
            attribute,
            new: options.new,
            old: options.old,
            kwargs: options.kwargs,
        };

        debug!(
            scope,
            handle = subscription.handle.0,
            attribute = %subscription.attribute,
            "Registering state subscription"
        );

        self.scopes
            .entry(scope.to_string())
            .or_default()
            .push(subscription.clone());

        subscription
    }

    /// Remove a subscription by handle
    ///
    /// Drops the scope entry once it is empty. Unknown handles are ignored;
    /// returns whether anything was removed.
    pub fn cancel(&self, handle: SubscriptionHandle) -> bool {
        let scope = self.scopes.iter().find_map(|entry| {
            entry
                .value()
                .iter()
                .any(|s| s.handle == handle)
                .then(|| entry.key().clone())
        });

        let Some(scope) = scope else {
            trace!(handle = handle.0, "Cancel of unknown subscription ignored");
            return false;
        };

        let now_empty = match self.scopes.get_mut(&scope) {
            Some(mut subscriptions) => {
                if let Some(pos) = subscriptions.iter().position(|s| s.handle == handle) {
                    subscriptions.remove(pos);
                }
                subscriptions.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.scopes.remove_if(&scope, |_, subscriptions| subscriptions.is_empty());
        }

        debug!(scope = %scope, handle = handle.0, "Cancelled state subscription");
        true
    }

    /// Number of live subscriptions under a scope
    pub fn count(&self, scope: &str) -> usize {
        self.scopes.get(scope).map(|s| s.len()).unwrap_or(0)
    }

    /// Snapshot of the subscriptions registered under a scope
    pub fn scope(&self, scope: &str) -> Vec<StateSubscription> {
        self.scopes
            .get(scope)
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Subscriptions that should hear about a write, in dispatch order
    ///
    /// Domain-scoped subscriptions come first, then entity-scoped ones, each
    /// group in registration order. The result is a snapshot: callbacks may
    /// freely subscribe or cancel while it is being dispatched.
    pub fn matching(
        &self,
        domain: &str,
        entity_id: &str,
        attribute: &str,
        new: &Value,
        old: &Value,
    ) -> Vec<StateSubscription> {
        let mut candidates = self.scope(domain);
        candidates.extend(self.scope(entity_id));
        candidates.retain(|s| s.matches(attribute, new, old));
        candidates
    }

    /// Drop every subscription
    pub fn clear(&self) {
        self.scopes.clear();
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ad_core::StateChange;
    use serde_json::json;
    use std::sync::Arc;

    fn noop() -> StateCallback {
        Arc::new(|_: &StateChange| {})
    }

    #[test]
    fn test_default_attribute_is_state() {
        let registry = SubscriptionRegistry::new();
        let sub = registry.subscribe("light.1", noop(), ListenOptions::new());
        assert_eq!(sub.attribute, "state");

        let sub = registry.subscribe("light.1", noop(), ListenOptions::new().attribute(""));
        assert_eq!(sub.attribute, "state");
    }

    #[test]
    fn test_count_and_cancel() {
        let registry = SubscriptionRegistry::new();
        assert_eq!(registry.count("light"), 0);

        let first = registry.subscribe("light", noop(), ListenOptions::new());
        let second = registry.subscribe("light", noop(), ListenOptions::new().attribute("brightness"));
        assert_eq!(registry.count("light"), 2);

        assert!(registry.cancel(first.handle));
        assert_eq!(registry.count("light"), 1);
        assert!(!registry.cancel(first.handle));
        assert_eq!(registry.count("light"), 1);

        assert!(registry.cancel(second.handle));
        assert_eq!(registry.count("light"), 0);
        assert!(registry.scope("light").is_empty());
    }

    #[test]
    fn test_identical_subscriptions_are_distinct() {
        let registry = SubscriptionRegistry::new();
        let callback = noop();
        let a = registry.subscribe("light.1", callback.clone(), ListenOptions::new());
        let b = registry.subscribe("light.1", callback, ListenOptions::new());
        assert_ne!(a.handle, b.handle);

        registry.cancel(b.handle);
        let remaining = registry.scope("light.1");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].handle, a.handle);
    }

    #[test]
    fn test_filters() {
        let registry = SubscriptionRegistry::new();
        let sub = registry.subscribe(
            "media_player.tv",
            noop(),
            ListenOptions::new().attribute("source").new_value("Spotify"),
        );
        assert!(sub.matches("source", &json!("Spotify"), &json!("YouTube")));
        assert!(!sub.matches("source", &json!("YouTube"), &json!(null)));
        assert!(!sub.matches("state", &json!("Spotify"), &json!(null)));

        let sub = registry.subscribe(
            "media_player.tv",
            noop(),
            ListenOptions::new().attribute("source").old_value("Spotify"),
        );
        assert!(sub.matches("source", &json!("TV"), &json!("Spotify")));
        assert!(!sub.matches("source", &json!("Spotify"), &json!("TV")));

        let sub = registry.subscribe("media_player.tv", noop(), ListenOptions::new().all());
        assert!(sub.is_all());
        assert!(sub.matches("volume", &json!(3), &json!(2)));
    }

    #[test]
    fn test_matching_orders_domain_before_entity() {
        let registry = SubscriptionRegistry::new();
        let entity_first = registry.subscribe("light.1", noop(), ListenOptions::new());
        let domain = registry.subscribe("light", noop(), ListenOptions::new());
        let entity_second = registry.subscribe("light.1", noop(), ListenOptions::new());
        registry.subscribe("light.2", noop(), ListenOptions::new());
        registry.subscribe("light.1", noop(), ListenOptions::new().attribute("brightness"));

        let handles: Vec<_> = registry
            .matching("light", "light.1", "state", &json!("on"), &json!("off"))
            .into_iter()
            .map(|s| s.handle)
            .collect();
        assert_eq!(handles, vec![domain.handle, entity_first.handle, entity_second.handle]);
    }

    #[test]
    fn test_immediate_flag() {
        let registry = SubscriptionRegistry::new();
        let sub = registry.subscribe("light", noop(), ListenOptions::new().immediate());
        assert!(sub.is_immediate());

        let sub = registry.subscribe("light", noop(), ListenOptions::new().kwarg("immediate", false));
        assert!(!sub.is_immediate());
        assert!(!registry.subscribe("light", noop(), ListenOptions::new()).is_immediate());
    }
}
