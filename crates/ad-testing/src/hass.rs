//! Runtime adapter injected into automations
//!
//! Automations written against AppDaemon call methods on their `hassapi.Hass`
//! base class. Here they receive a [`Hass`] handle instead. Every call is
//! recorded on the driver; state, event and `run_in` calls are routed to the
//! simulated world, and the rest (service calls, notifications, calendar
//! scheduling) are recorded stubs.

use ad_core::{FiredEvent, Kwargs, StateChange, ATTR_STATE};
use ad_event_bus::EventHandle;
use ad_scheduler::TimerHandle;
use ad_state_store::{ListenOptions, SubscriptionHandle};
use chrono::{NaiveDateTime, NaiveTime};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::driver::HassDriver;
use crate::recorder::RecordedCall;

/// Handle to the simulated runtime, as seen by an automation
#[derive(Clone)]
pub struct Hass {
    driver: HassDriver,
}

impl Hass {
    pub(crate) fn new(driver: HassDriver) -> Self {
        Self { driver }
    }

    /// The driver behind this adapter
    pub fn driver(&self) -> &HassDriver {
        &self.driver
    }

    fn record(&self, method: &str, call: RecordedCall) {
        self.driver.recorder().record(method, call);
    }

    // ------------------------------------------------------------------
    // Logging
    // ------------------------------------------------------------------

    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        info!(target: "appdaemon", "{message}");
        self.record("log", RecordedCall::new([message]));
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        error!(target: "appdaemon", "{message}");
        self.record("error", RecordedCall::new([message]));
    }

    // ------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------

    /// `state` of an entity, or of every entity in a domain
    pub fn get_state(&self, entity_ref: &str) -> Value {
        self.record("get_state", RecordedCall::new([entity_ref]));
        self.driver.get_state(entity_ref)
    }

    /// An attribute (or `"all"`) of an entity or domain, with a default for falsy values
    pub fn get_attribute(&self, entity_ref: &str, attribute: &str, default: Option<Value>) -> Value {
        let mut call = RecordedCall::new([entity_ref]).kwarg("attribute", attribute);
        if let Some(default) = &default {
            call = call.kwarg("default", default.clone());
        }
        self.record("get_state", call);
        self.driver.get_state_with(entity_ref, attribute, default)
    }

    /// Set an entity's `state`
    ///
    /// Like AppDaemon's own `set_state` seen from inside an app, this updates
    /// the entity without notifying `listen_state` callbacks.
    pub fn set_state(&self, entity_id: &str, state: impl Into<Value>) {
        self.set_state_attribute(entity_id, ATTR_STATE, state);
    }

    /// Set one attribute of an entity without notifying listeners
    pub fn set_state_attribute(&self, entity_id: &str, attribute: &str, value: impl Into<Value>) {
        let value = value.into();
        let mut call = RecordedCall::new([entity_id]).kwarg("state", value.clone());
        if attribute != ATTR_STATE {
            call = call.kwarg("attribute_name", attribute);
        }
        self.record("set_state", call);
        self.driver
            .write(crate::StateWrite::new(entity_id, value).attribute(attribute).trigger(false));
    }

    /// Subscribe to state changes of an entity or domain
    ///
    /// The recorded call carries the scope and the non-default options; the
    /// callback itself is not recorded.
    pub fn listen_state<F>(&self, callback: F, scope: &str, options: ListenOptions) -> SubscriptionHandle
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        let mut kwargs = options.kwargs.clone();
        if let Some(attribute) = &options.attribute {
            kwargs.insert("attribute".into(), attribute.clone().into());
        }
        if let Some(new) = &options.new {
            kwargs.insert("new".into(), new.clone());
        }
        if let Some(old) = &options.old {
            kwargs.insert("old".into(), old.clone());
        }
        self.record("listen_state", RecordedCall::new([scope]).with_kwargs(kwargs));
        self.driver.subscribe_state(Arc::new(callback), scope, options)
    }

    pub fn cancel_listen_state(&self, handle: SubscriptionHandle) {
        self.record("cancel_listen_state", RecordedCall::default());
        self.driver.cancel_listen_state(handle);
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    pub fn listen_event<F>(&self, callback: F, event_name: &str) -> EventHandle
    where
        F: Fn(&FiredEvent) + Send + Sync + 'static,
    {
        self.record("listen_event", RecordedCall::new([event_name]));
        self.driver.subscribe_event(Arc::new(callback), event_name)
    }

    /// Fire a named event; only its first listener is called
    pub fn fire_event(&self, event_name: &str, data: Kwargs) {
        self.record(
            "fire_event",
            RecordedCall::new([event_name]).with_kwargs(data.clone()),
        );
        self.driver.fire_event(event_name, data);
    }

    // ------------------------------------------------------------------
    // Services (recorded only)
    // ------------------------------------------------------------------

    pub fn call_service(&self, service: &str, data: Kwargs) {
        debug!(service, "Recording service call");
        self.record("call_service", RecordedCall::new([service]).with_kwargs(data));
    }

    pub fn turn_on(&self, entity_id: &str) {
        self.turn_on_with(entity_id, Kwargs::new());
    }

    pub fn turn_on_with(&self, entity_id: &str, data: Kwargs) {
        self.record("turn_on", RecordedCall::new([entity_id]).with_kwargs(data));
    }

    pub fn turn_off(&self, entity_id: &str) {
        self.turn_off_with(entity_id, Kwargs::new());
    }

    pub fn turn_off_with(&self, entity_id: &str, data: Kwargs) {
        self.record("turn_off", RecordedCall::new([entity_id]).with_kwargs(data));
    }

    pub fn notify(&self, message: &str, data: Kwargs) {
        self.record("notify", RecordedCall::new([message]).with_kwargs(data));
    }

    // ------------------------------------------------------------------
    // Time
    // ------------------------------------------------------------------

    /// Run `callback` after `delay` virtual seconds
    pub fn run_in<F>(&self, callback: F, delay: u64, kwargs: Kwargs) -> TimerHandle
    where
        F: Fn(&Kwargs) + Send + Sync + 'static,
    {
        self.record(
            "run_in",
            RecordedCall::new([delay]).with_kwargs(kwargs.clone()),
        );
        self.driver.schedule(Arc::new(callback), delay, kwargs)
    }

    pub fn cancel_timer(&self, handle: TimerHandle) {
        self.record("cancel_timer", RecordedCall::default());
        self.driver.cancel_timer(handle);
    }

    /// Virtual clock as a time of day
    pub fn time(&self) -> NaiveTime {
        self.record("time", RecordedCall::default());
        self.driver.time_of_day()
    }

    // Calendar and solar scheduling is recorded but never fires.

    pub fn run_at<F>(&self, _callback: F, start: NaiveDateTime, kwargs: Kwargs)
    where
        F: Fn(&Kwargs) + Send + Sync + 'static,
    {
        self.record("run_at", RecordedCall::new([start.to_string()]).with_kwargs(kwargs));
    }

    pub fn run_daily<F>(&self, _callback: F, start: NaiveTime, kwargs: Kwargs)
    where
        F: Fn(&Kwargs) + Send + Sync + 'static,
    {
        self.record("run_daily", RecordedCall::new([start.to_string()]).with_kwargs(kwargs));
    }

    pub fn run_hourly<F>(&self, _callback: F, start: NaiveTime, kwargs: Kwargs)
    where
        F: Fn(&Kwargs) + Send + Sync + 'static,
    {
        self.record("run_hourly", RecordedCall::new([start.to_string()]).with_kwargs(kwargs));
    }

    pub fn run_minutely<F>(&self, _callback: F, start: NaiveTime, kwargs: Kwargs)
    where
        F: Fn(&Kwargs) + Send + Sync + 'static,
    {
        self.record("run_minutely", RecordedCall::new([start.to_string()]).with_kwargs(kwargs));
    }

    pub fn run_every<F>(&self, _callback: F, start: NaiveDateTime, interval: u64, kwargs: Kwargs)
    where
        F: Fn(&Kwargs) + Send + Sync + 'static,
    {
        self.record(
            "run_every",
            RecordedCall::new([Value::from(start.to_string()), Value::from(interval)])
                .with_kwargs(kwargs),
        );
    }

    pub fn run_at_sunrise<F>(&self, _callback: F, kwargs: Kwargs)
    where
        F: Fn(&Kwargs) + Send + Sync + 'static,
    {
        self.record("run_at_sunrise", RecordedCall::default().with_kwargs(kwargs));
    }

    pub fn run_at_sunset<F>(&self, _callback: F, kwargs: Kwargs)
    where
        F: Fn(&Kwargs) + Send + Sync + 'static,
    {
        self.record("run_at_sunset", RecordedCall::default().with_kwargs(kwargs));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::call;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn hass() -> Hass {
        HassDriver::new().inject().unwrap()
    }

    #[test]
    fn test_log_and_error_are_recorded() {
        let hass = hass();
        hass.log("This is a log");
        hass.error("This is an error");

        let driver = hass.driver();
        driver.calls("log").unwrap().assert_called_once_with(&call(["This is a log"]));
        driver.calls("error").unwrap().assert_called_once_with(&call(["This is an error"]));
    }

    #[test]
    fn test_set_state_does_not_notify() {
        let hass = hass();
        let driver = hass.driver().clone();
        {
            let _setup = driver.setup();
            driver.set_state("domain.sensor", "my_state");
        }
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        hass.listen_state(
            move |_: &StateChange| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            "domain.sensor",
            ListenOptions::new(),
        );

        hass.set_state("domain.sensor", "my_new_state");
        assert_eq!(
            Value::Object(driver.states()),
            json!({"domain.sensor": {"state": "my_new_state"}})
        );
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        driver
            .calls("set_state")
            .unwrap()
            .assert_called_once_with(&call(["domain.sensor"]).kwarg("state", "my_new_state"));
    }

    #[test]
    fn test_listen_state_records_options() {
        let hass = hass();
        hass.listen_state(
            |_: &StateChange| {},
            "light.1",
            ListenOptions::new().attribute("brightness").new_value(50),
        );
        hass.driver().calls("listen_state").unwrap().assert_called_once_with(
            &call(["light.1"])
                .kwarg("attribute", "brightness")
                .kwarg("new", 50),
        );
    }

    #[test]
    fn test_fire_event_reaches_listener() {
        let hass = hass();
        let seen = Arc::new(std::sync::Mutex::new(None));
        let sink = seen.clone();
        hass.listen_event(
            move |event: &FiredEvent| {
                *sink.lock().unwrap() = Some(event.clone());
            },
            "my_event",
        );

        let mut data = Kwargs::new();
        data.insert("source".into(), json!("test"));
        hass.fire_event("my_event", data.clone());

        let event = seen.lock().unwrap().clone().unwrap();
        assert_eq!(event.event_name, "my_event");
        assert_eq!(event.data, data);
        hass.driver()
            .calls("listen_event")
            .unwrap()
            .assert_called_once_with(&call(["my_event"]));
    }

    #[test]
    fn test_service_stubs_record() {
        let hass = hass();
        let mut data = Kwargs::new();
        data.insert("entity_id".into(), json!("light.1"));
        hass.call_service("light/turn_on", data.clone());
        hass.turn_off("light.2");
        hass.notify("hello", Kwargs::new());

        let driver = hass.driver();
        driver
            .calls("call_service")
            .unwrap()
            .assert_called_once_with(&call(["light/turn_on"]).with_kwargs(data));
        driver.calls("turn_off").unwrap().assert_called_once_with(&call(["light.2"]));
        assert_eq!(driver.calls("notify").unwrap().call_count(), 1);
        driver.calls("turn_on").unwrap().assert_not_called();
    }

    #[test]
    fn test_run_in_and_time() {
        let hass = hass();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let handle = hass.run_in(
            move |_: &Kwargs| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            90,
            Kwargs::new(),
        );
        hass.run_in(
            |_: &Kwargs| panic!("cancelled timers must not fire"),
            90,
            Kwargs::new(),
        );
        let cancelled = hass.driver().run_in_simulations()[1].handle;
        hass.cancel_timer(cancelled);

        hass.driver().advance_time(90);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(hass.time(), NaiveTime::from_hms_opt(0, 1, 30).unwrap());
        assert_ne!(handle, cancelled);
    }

    #[test]
    fn test_calendar_scheduling_is_recorded_only() {
        let hass = hass();
        let start = NaiveTime::from_hms_opt(7, 0, 0).unwrap();
        hass.run_daily(|_: &Kwargs| panic!("never fires"), start, Kwargs::new());
        hass.run_at_sunset(|_: &Kwargs| panic!("never fires"), Kwargs::new());

        hass.driver().advance_time(86_400);
        hass.driver()
            .calls("run_daily")
            .unwrap()
            .assert_called_once_with(&call(["07:00:00"]));
        assert_eq!(hass.driver().calls("run_at_sunset").unwrap().call_count(), 1);
        assert!(hass.driver().run_in_simulations().is_empty());
    }
}
