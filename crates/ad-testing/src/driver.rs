//! The simulated runtime: state/event broker and virtual clock
//!
//! [`HassDriver`] owns every piece of simulated state (entities,
//! subscriptions, event listeners, the clock and its deferred calls) and is
//! the only thing that mutates them. Tests drive it directly; automations
//! reach it through the [`Hass`] adapter returned by [`HassDriver::inject`].
//!
//! Callbacks run inline on the calling thread and may re-enter the driver:
//! a state callback can write state, subscribe, fire events or schedule
//! calls. No lock or map reference is held while a callback runs.

use ad_config::DriverConfig;
use ad_core::{
    is_fully_qualified, Attributes, EntityId, EventCallback, FiredEvent, Kwargs, StateCallback,
    StateChange, TimerCallback, ATTR_STATE,
};
use ad_event_bus::{EventHandle, EventRegistry};
use ad_scheduler::{PendingCall, Scheduler, TimerHandle};
use ad_state_store::{
    EntityStore, ListenOptions, StateSubscription, SubscriptionHandle, SubscriptionRegistry,
};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument, trace};

use crate::error::DriverResult;
use crate::hass::Hass;
use crate::recorder::{CallRecorder, MethodCalls};

/// A state write with its optional overrides
#[derive(Debug, Clone)]
pub struct StateWrite {
    entity_id: String,
    value: Value,
    attribute: String,
    previous: Option<Value>,
    trigger: Option<bool>,
}

impl StateWrite {
    /// Write `value` to the `state` attribute of `entity_id`
    pub fn new(entity_id: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            entity_id: entity_id.into(),
            value: value.into(),
            attribute: ATTR_STATE.to_string(),
            previous: None,
            trigger: None,
        }
    }

    /// Write to another attribute
    pub fn attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = attribute.into();
        self
    }

    /// Pretend the attribute held `previous` before this write
    pub fn previous(mut self, previous: impl Into<Value>) -> Self {
        self.previous = Some(previous.into());
        self
    }

    /// Force listeners to be notified (or not), regardless of setup mode
    pub fn trigger(mut self, trigger: bool) -> Self {
        self.trigger = Some(trigger);
        self
    }
}

struct DriverInner {
    states: EntityStore,
    state_listeners: SubscriptionRegistry,
    events: EventRegistry,
    scheduler: Scheduler,
    /// Number of live setup guards
    setup_depth: AtomicUsize,
    recorder: CallRecorder,
}

/// Simulated AppDaemon runtime
///
/// Cloning a driver yields another handle to the same simulated world. Each
/// test should construct its own driver.
#[derive(Clone)]
pub struct HassDriver {
    inner: Arc<DriverInner>,
}

impl HassDriver {
    /// Create an empty world with the clock at zero
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DriverInner {
                states: EntityStore::new(),
                state_listeners: SubscriptionRegistry::new(),
                events: EventRegistry::new(),
                scheduler: Scheduler::new(),
                setup_depth: AtomicUsize::new(0),
                recorder: CallRecorder::new(),
            }),
        }
    }

    /// Create a world seeded from a configuration
    pub fn from_config(config: &DriverConfig) -> DriverResult<Self> {
        config.validate()?;
        let driver = Self::new();
        driver.set_clock_time(config.clock_time);
        for (entity_id, attributes) in &config.states {
            driver.inner.states.seed(entity_id, attributes.clone());
        }
        Ok(driver)
    }

    /// Return the world to its freshly constructed state
    ///
    /// Drops entities, subscriptions, listeners, pending calls and recorded
    /// calls, and resets the clock. Bindings are kept. Setup mode ends too;
    /// guards still alive when this runs leave it ended when they drop.
    pub fn reset(&self) {
        debug!("Resetting driver");
        self.inner.states.clear();
        self.inner.state_listeners.clear();
        self.inner.events.clear();
        self.inner.scheduler.clear();
        self.inner.recorder.clear();
        self.inner.setup_depth.store(0, Ordering::SeqCst);
    }

    // ------------------------------------------------------------------
    // Runtime bindings
    // ------------------------------------------------------------------

    /// Bind an additional runtime method name
    pub fn bind(&self, name: &str) {
        self.inner.recorder.bind(name);
    }

    /// Validate the bindings and hand out the runtime adapter
    ///
    /// Fails with [`DriverError::UnknownMethod`](crate::DriverError::UnknownMethod)
    /// if any bound name is not part of the AppDaemon runtime surface.
    pub fn inject(&self) -> DriverResult<Hass> {
        self.inner.recorder.validate()?;
        for name in self.inner.recorder.bound() {
            trace!(method = %name, "Binding runtime method");
        }
        Ok(Hass::new(self.clone()))
    }

    /// Calls recorded for a bound runtime method
    pub fn calls(&self, method: &str) -> DriverResult<MethodCalls> {
        self.inner.recorder.calls(method)
    }

    pub(crate) fn recorder(&self) -> &CallRecorder {
        &self.inner.recorder
    }

    // ------------------------------------------------------------------
    // Setup mode
    // ------------------------------------------------------------------

    /// Enter setup mode until the returned guard is dropped
    ///
    /// While in setup mode, state writes update entities but never notify
    /// `listen_state` callbacks (unless a write forces `trigger`).
    ///
    /// ```ignore
    /// {
    ///     let _setup = driver.setup();
    ///     driver.set_state("binary_sensor.motion_detected", "off");
    /// }
    /// // Listeners hear about this one
    /// driver.set_state("binary_sensor.motion_detected", "on");
    /// ```
    #[must_use = "setup mode ends as soon as the guard is dropped"]
    pub fn setup(&self) -> SetupGuard<'_> {
        self.inner.setup_depth.fetch_add(1, Ordering::SeqCst);
        debug!("Entering setup mode");
        SetupGuard { driver: self }
    }

    /// Run `f` in setup mode
    pub fn setup_with<R>(&self, f: impl FnOnce(&Self) -> R) -> R {
        let _guard = self.setup();
        f(self)
    }

    /// Whether a setup block is active
    pub fn in_setup(&self) -> bool {
        self.inner.setup_depth.load(Ordering::SeqCst) > 0
    }

    // ------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------

    /// Replace entities' attribute mappings directly
    ///
    /// No change detection and no dispatch; use this to build the starting
    /// world of a test.
    pub fn seed_states<I, K>(&self, states: I) -> DriverResult<()>
    where
        I: IntoIterator<Item = (K, Attributes)>,
        K: Into<String>,
    {
        for (entity_id, attributes) in states {
            let entity_id = entity_id.into();
            entity_id.parse::<EntityId>()?;
            self.inner.states.seed(&entity_id, attributes);
        }
        Ok(())
    }

    /// Every entity and its attribute mapping
    pub fn states(&self) -> Map<String, Value> {
        self.inner.states.snapshot()
    }

    /// Read the `state` attribute of an entity, or of every entity in a domain
    pub fn get_state(&self, entity_ref: &str) -> Value {
        self.get_state_with(entity_ref, ATTR_STATE, None)
    }

    /// Read an attribute (or `"all"`) with an optional default for falsy values
    ///
    /// # Panics
    ///
    /// Panics if `entity_ref` contains a `.` but is not a valid entity id.
    pub fn get_state_with(&self, entity_ref: &str, attribute: &str, default: Option<Value>) -> Value {
        trace!(entity_ref, attribute, "Getting state");
        if is_fully_qualified(entity_ref) {
            if let Err(e) = entity_ref.parse::<EntityId>() {
                panic!("invalid entity id passed to get_state: {e}");
            }
        }
        self.inner.states.read(entity_ref, attribute, default.as_ref())
    }

    /// Set the `state` attribute of an entity
    pub fn set_state(&self, entity_id: impl Into<String>, value: impl Into<Value>) {
        self.write(StateWrite::new(entity_id, value));
    }

    /// Apply a state write and notify matching listeners
    ///
    /// Writing the value an attribute already holds does nothing. Otherwise
    /// the entity is updated, and unless setup mode is active (or `trigger`
    /// says otherwise) every matching `listen_state` subscription is called:
    /// domain-scoped ones first, then entity-scoped ones, each in
    /// registration order.
    ///
    /// # Panics
    ///
    /// Panics if the entity id does not contain exactly one `.` separator.
    #[instrument(skip(self, write), fields(entity_id = %write.entity_id, attribute = %write.attribute))]
    pub fn write(&self, write: StateWrite) {
        let StateWrite {
            entity_id,
            value: new,
            attribute,
            previous,
            trigger,
        } = write;

        let parsed: EntityId = match entity_id.parse() {
            Ok(parsed) => parsed,
            Err(e) => panic!("invalid entity id passed to set_state: {e}"),
        };

        let before = self.inner.states.attributes(&entity_id);
        let old = previous
            .unwrap_or_else(|| before.get(&attribute).cloned().unwrap_or(Value::Null));

        if old == new {
            trace!("Value unchanged, nothing to do");
            return;
        }

        self.inner.states.write(&entity_id, &attribute, new.clone());

        let trigger = trigger.unwrap_or_else(|| !self.in_setup());
        if !trigger {
            debug!("State written without notifying listeners");
            return;
        }

        let matched = self.inner.state_listeners.matching(
            parsed.domain(),
            &entity_id,
            &attribute,
            &new,
            &old,
        );
        debug!(listeners = matched.len(), "State changed");
        if matched.is_empty() {
            return;
        }

        let after = self.inner.states.attributes(&entity_id);
        for subscription in matched {
            let change = if subscription.is_all() {
                StateChange {
                    entity_id: entity_id.clone(),
                    attribute: None,
                    old: Value::Object(before.clone()),
                    new: Value::Object(after.clone()),
                    kwargs: subscription.kwargs.clone(),
                }
            } else {
                StateChange {
                    entity_id: entity_id.clone(),
                    attribute: Some(attribute.clone()),
                    old: old.clone(),
                    new: new.clone(),
                    kwargs: subscription.kwargs.clone(),
                }
            };
            (subscription.callback)(&change);
        }
    }

    /// Subscribe to state changes of an entity or a whole domain
    pub fn listen_state<F>(&self, callback: F, scope: &str, options: ListenOptions) -> SubscriptionHandle
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        self.subscribe_state(Arc::new(callback), scope, options)
    }

    pub(crate) fn subscribe_state(
        &self,
        callback: StateCallback,
        scope: &str,
        options: ListenOptions,
    ) -> SubscriptionHandle {
        let subscription = self.inner.state_listeners.subscribe(scope, callback, options);
        if subscription.is_immediate() {
            self.fire_immediate(scope, &subscription);
        }
        subscription.handle
    }

    /// Call an `immediate` subscription with the scope's current value
    fn fire_immediate(&self, scope: &str, subscription: &StateSubscription) {
        // A bare domain has no value of its own
        let current = if is_fully_qualified(scope) {
            self.inner.states.get(scope, &subscription.attribute)
        } else {
            self.inner
                .states
                .peek(scope, &subscription.attribute)
                .unwrap_or(Value::Null)
        };

        if subscription.new.as_ref().is_some_and(|filter| *filter != current) {
            trace!(scope, "Immediate call skipped by new-value filter");
            return;
        }

        debug!(scope, "Firing immediate state callback");
        let change = StateChange {
            entity_id: scope.to_string(),
            attribute: (!subscription.is_all()).then(|| subscription.attribute.clone()),
            old: subscription.old.clone().unwrap_or(Value::Null),
            new: current,
            kwargs: subscription.kwargs.clone(),
        };
        (subscription.callback)(&change);
    }

    /// Remove a state subscription; unknown handles are ignored
    pub fn cancel_listen_state(&self, handle: SubscriptionHandle) {
        self.inner.state_listeners.cancel(handle);
    }

    /// Number of live subscriptions registered under a domain or entity id
    pub fn state_callback_count(&self, scope: &str) -> usize {
        self.inner.state_listeners.count(scope)
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Listen for a named event
    pub fn listen_event<F>(&self, callback: F, event_name: &str) -> EventHandle
    where
        F: Fn(&FiredEvent) + Send + Sync + 'static,
    {
        self.subscribe_event(Arc::new(callback), event_name)
    }

    pub(crate) fn subscribe_event(&self, callback: EventCallback, event_name: &str) -> EventHandle {
        self.inner.events.subscribe(event_name, callback).handle
    }

    /// Remove an event listener; unknown handles are ignored
    pub fn cancel_listen_event(&self, handle: EventHandle) {
        self.inner.events.cancel(handle);
    }

    /// Fire a named event
    ///
    /// Only the first listener registered for `event_name` is called (see
    /// [`EventRegistry::first`]). Firing with no listener is a no-op.
    #[instrument(skip(self, data))]
    pub fn fire_event(&self, event_name: &str, data: Kwargs) {
        let Some(listener) = self.inner.events.first(event_name) else {
            return;
        };
        let event = FiredEvent {
            event_name: event_name.to_string(),
            data,
        };
        (listener.callback)(&event);
    }

    // ------------------------------------------------------------------
    // Time
    // ------------------------------------------------------------------

    /// Current virtual clock reading in seconds
    pub fn clock_time(&self) -> u64 {
        self.inner.scheduler.now()
    }

    /// Set the virtual clock without running anything
    pub fn set_clock_time(&self, seconds: u64) {
        self.inner.scheduler.set_time(seconds);
    }

    /// Advance the virtual clock and run every deferred call now due
    ///
    /// Due calls run once each, in the order they were scheduled. Calls
    /// scheduled by those callbacks wait for a later advance.
    pub fn advance_time(&self, seconds: u64) {
        for call in self.inner.scheduler.advance(seconds) {
            trace!(due = call.due, "Running deferred call");
            (call.callback)(&call.kwargs);
        }
    }

    /// Schedule `callback` to run `delay` seconds from now
    pub fn run_in<F>(&self, callback: F, delay: u64, kwargs: Kwargs) -> TimerHandle
    where
        F: Fn(&Kwargs) + Send + Sync + 'static,
    {
        self.schedule(Arc::new(callback), delay, kwargs)
    }

    pub(crate) fn schedule(&self, callback: TimerCallback, delay: u64, kwargs: Kwargs) -> TimerHandle {
        self.inner.scheduler.run_in(callback, delay, kwargs)
    }

    /// Drop a pending deferred call; unknown handles are ignored
    pub fn cancel_timer(&self, handle: TimerHandle) {
        self.inner.scheduler.cancel(handle);
    }

    /// Deferred calls still waiting for their due time
    pub fn run_in_simulations(&self) -> Vec<PendingCall> {
        self.inner.scheduler.pending()
    }

    pub(crate) fn time_of_day(&self) -> chrono::NaiveTime {
        self.inner.scheduler.time_of_day()
    }
}

impl Default for HassDriver {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps a driver in setup mode while alive
///
/// Dropping the guard, including during a panic unwind, leaves setup mode.
pub struct SetupGuard<'a> {
    driver: &'a HassDriver,
}

impl Drop for SetupGuard<'_> {
    fn drop(&mut self) {
        // reset() may already have zeroed the depth under a live guard
        let _ = self
            .driver
            .inner
            .setup_depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |depth| depth.checked_sub(1));
        debug!("Leaving setup mode");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn recording() -> (Arc<Mutex<Vec<StateChange>>>, impl Fn(&StateChange) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |change: &StateChange| sink.lock().unwrap().push(change.clone()))
    }

    #[test]
    fn test_no_op_write_does_not_dispatch() {
        let driver = HassDriver::new();
        let (seen, callback) = recording();
        driver.listen_state(callback, "sensor.temp", ListenOptions::new());

        driver.set_state("sensor.temp", Value::Null);
        assert!(seen.lock().unwrap().is_empty());

        driver.set_state("sensor.temp", 21);
        driver.set_state("sensor.temp", 21);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_forced_previous_value() {
        let driver = HassDriver::new();
        let (seen, callback) = recording();
        driver.listen_state(callback, "switch.fan", ListenOptions::new().old_value("off"));

        driver.write(StateWrite::new("switch.fan", "on").previous("off"));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].old, json!("off"));
        assert_eq!(seen[0].new, json!("on"));
    }

    #[test]
    fn test_forced_previous_equal_to_new_is_a_no_op() {
        let driver = HassDriver::new();
        driver.write(StateWrite::new("switch.fan", "on").previous("on"));
        assert_eq!(driver.get_state("switch.fan"), Value::Null);
    }

    #[test]
    fn test_trigger_override() {
        let driver = HassDriver::new();
        let (seen, callback) = recording();
        driver.listen_state(callback, "switch", ListenOptions::new());

        driver.write(StateWrite::new("switch.fan", "on").trigger(false));
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(driver.get_state("switch.fan"), json!("on"));

        {
            let _setup = driver.setup();
            driver.write(StateWrite::new("switch.fan", "off").trigger(true));
        }
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_setup_guard_nesting_and_unwind() {
        let driver = HassDriver::new();
        {
            let _outer = driver.setup();
            {
                let _inner = driver.setup();
                assert!(driver.in_setup());
            }
            assert!(driver.in_setup());
        }
        assert!(!driver.in_setup());

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            driver.setup_with(|_| panic!("setup body failed"));
        }));
        assert!(result.is_err());
        assert!(!driver.in_setup());
    }

    #[test]
    fn test_reset_inside_setup_block() {
        let driver = HassDriver::new();
        {
            let _setup = driver.setup();
            driver.reset();
            assert!(!driver.in_setup());
        }
        assert!(!driver.in_setup());

        let (seen, callback) = recording();
        driver.listen_state(callback, "light.1", ListenOptions::new());
        driver.set_state("light.1", "on");
        assert_eq!(seen.lock().unwrap().len(), 1);

        // Setup mode still works afterwards
        driver.setup_with(|d| d.set_state("light.1", "off"));
        assert!(!driver.in_setup());
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    #[should_panic(expected = "invalid entity id passed to set_state")]
    fn test_malformed_entity_id_panics() {
        HassDriver::new().set_state("no_separator", "on");
    }

    #[test]
    #[should_panic(expected = "invalid entity id passed to get_state")]
    fn test_malformed_entity_ref_panics_on_read() {
        HassDriver::new().get_state("light.kitchen.ceiling");
    }

    #[test]
    fn test_reentrant_callback_writes_state() {
        let driver = HassDriver::new();
        let handle = driver.clone();
        driver.listen_state(
            move |change: &StateChange| {
                if change.new == json!("on") {
                    handle.set_state("light.hall", "on");
                }
            },
            "binary_sensor.motion",
            ListenOptions::new(),
        );
        let (seen, callback) = recording();
        driver.listen_state(callback, "light.hall", ListenOptions::new());

        driver.set_state("binary_sensor.motion", "on");
        assert_eq!(driver.get_state("light.hall"), json!("on"));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_reset() {
        let driver = HassDriver::new();
        let (seen, callback) = recording();
        driver.listen_state(callback, "light", ListenOptions::new());
        driver.set_clock_time(50);
        driver.run_in(|_: &Kwargs| {}, 10, Kwargs::new());
        driver.set_state("light.1", "on");

        driver.reset();
        assert!(driver.states().is_empty());
        assert_eq!(driver.clock_time(), 0);
        assert!(driver.run_in_simulations().is_empty());
        assert_eq!(driver.state_callback_count("light"), 0);

        driver.set_state("light.1", "on");
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_from_config() {
        let mut attributes = Attributes::new();
        attributes.insert("state".into(), json!("off"));
        attributes.insert("linkquality".into(), json!(60));
        let config = DriverConfig::new()
            .with_clock_time(120)
            .with_state("light.1", attributes);

        let driver = HassDriver::from_config(&config).unwrap();
        assert_eq!(driver.clock_time(), 120);
        assert_eq!(driver.get_state_with("light.1", "linkquality", None), json!(60));
    }

    #[test]
    fn test_seed_states_rejects_bad_id() {
        let driver = HassDriver::new();
        let err = driver
            .seed_states([("light", Attributes::new())])
            .unwrap_err();
        assert!(matches!(err, crate::DriverError::InvalidEntityId(_)));
    }
}
