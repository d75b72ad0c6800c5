//! Recording of runtime method calls
//!
//! Every method of the [`Hass`](crate::Hass) adapter records its arguments
//! here under the method's name, whether it does real work (`get_state`,
//! `run_in`, ...) or is a passthrough stub (`turn_on`, `call_service`, ...).
//! Tests then assert on the recorded calls.

use ad_core::Kwargs;
use dashmap::DashMap;
use serde_json::Value;
use std::fmt;

use crate::error::{DriverError, DriverResult};

/// Methods of the AppDaemon `hassapi.Hass` surface a driver may bind
pub const HOST_METHODS: &[&str] = &[
    "anyone_home",
    "call_service",
    "cancel_listen_event",
    "cancel_listen_state",
    "cancel_timer",
    "entity_exists",
    "error",
    "everyone_home",
    "fire_event",
    "get_state",
    "get_trackers",
    "listen_event",
    "listen_state",
    "log",
    "noone_home",
    "notify",
    "run_at",
    "run_at_sunrise",
    "run_at_sunset",
    "run_daily",
    "run_every",
    "run_hourly",
    "run_in",
    "run_minutely",
    "run_once",
    "select_option",
    "set_state",
    "set_value",
    "sun_down",
    "sun_up",
    "time",
    "toggle",
    "turn_off",
    "turn_on",
];

/// Methods bound on every new driver
pub const DEFAULT_BINDINGS: &[&str] = &[
    "log",
    "error",
    "call_service",
    "cancel_listen_state",
    "cancel_timer",
    "get_state",
    "listen_event",
    "fire_event",
    "listen_state",
    "notify",
    "run_at",
    "run_at_sunrise",
    "run_at_sunset",
    "run_daily",
    "run_every",
    "run_hourly",
    "run_in",
    "run_minutely",
    "set_state",
    "time",
    "turn_off",
    "turn_on",
];

/// One recorded invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordedCall {
    /// Positional arguments, callbacks omitted
    pub args: Vec<Value>,
    /// Keyword arguments
    pub kwargs: Kwargs,
}

impl RecordedCall {
    /// A call with the given positional arguments and no keywords
    pub fn new<I, V>(args: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            kwargs: Kwargs::new(),
        }
    }

    /// Add a keyword argument
    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    /// Replace all keyword arguments
    pub fn with_kwargs(mut self, kwargs: Kwargs) -> Self {
        self.kwargs = kwargs;
        self
    }
}

impl fmt::Display for RecordedCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self.args.iter().map(|a| a.to_string()).collect();
        parts.extend(self.kwargs.iter().map(|(k, v)| format!("{k}={v}")));
        write!(f, "call({})", parts.join(", "))
    }
}

/// Shorthand for [`RecordedCall::new`]
pub fn call<I, V>(args: I) -> RecordedCall
where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
{
    RecordedCall::new(args)
}

/// Per-method call log, keyed by bound method name
pub struct CallRecorder {
    calls: DashMap<String, Vec<RecordedCall>>,
}

impl CallRecorder {
    /// Create a recorder with [`DEFAULT_BINDINGS`] bound
    pub fn new() -> Self {
        let recorder = Self {
            calls: DashMap::new(),
        };
        for name in DEFAULT_BINDINGS {
            recorder.bind(name);
        }
        recorder
    }

    /// Bind a method name so its calls can be recorded and inspected
    pub fn bind(&self, name: &str) {
        self.calls.entry(name.to_string()).or_default();
    }

    /// Bound method names, sorted
    pub fn bound(&self) -> Vec<String> {
        let mut names: Vec<String> = self.calls.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    /// Check every bound name against [`HOST_METHODS`]
    pub fn validate(&self) -> DriverResult<()> {
        match self
            .bound()
            .into_iter()
            .find(|name| !HOST_METHODS.contains(&name.as_str()))
        {
            Some(name) => Err(DriverError::UnknownMethod { name }),
            None => Ok(()),
        }
    }

    /// Append a call to a method's log
    pub fn record(&self, name: &str, call: RecordedCall) {
        self.calls.entry(name.to_string()).or_default().push(call);
    }

    /// Snapshot of the calls made to a bound method
    pub fn calls(&self, name: &str) -> DriverResult<MethodCalls> {
        self.calls
            .get(name)
            .map(|calls| MethodCalls {
                name: name.to_string(),
                calls: calls.clone(),
            })
            .ok_or_else(|| DriverError::NotBound {
                name: name.to_string(),
            })
    }

    /// Forget recorded calls, keeping bindings
    pub fn clear(&self) {
        for mut calls in self.calls.iter_mut() {
            calls.clear();
        }
    }
}

impl Default for CallRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Calls made to one method, with mock-style assertions
#[derive(Debug, Clone)]
pub struct MethodCalls {
    name: String,
    calls: Vec<RecordedCall>,
}

impl MethodCalls {
    /// Number of recorded calls
    pub fn call_count(&self) -> usize {
        self.calls.len()
    }

    /// Whether the method was called at all
    pub fn called(&self) -> bool {
        !self.calls.is_empty()
    }

    /// Whether any recorded call equals `expected`
    pub fn called_with(&self, expected: &RecordedCall) -> bool {
        self.calls.iter().any(|call| call == expected)
    }

    /// The recorded calls in order
    pub fn calls(&self) -> &[RecordedCall] {
        &self.calls
    }

    /// The most recent call
    pub fn last(&self) -> Option<&RecordedCall> {
        self.calls.last()
    }

    /// Assert the method was never called
    pub fn assert_not_called(&self) {
        assert!(
            self.calls.is_empty(),
            "Expected '{}' to not have been called, but it was called {} times",
            self.name,
            self.calls.len()
        );
    }

    /// Assert the method was called exactly once, with `expected`
    pub fn assert_called_once_with(&self, expected: &RecordedCall) {
        assert_eq!(
            self.calls.len(),
            1,
            "Expected '{}' to be called once, but it was called {} times",
            self.name,
            self.calls.len()
        );
        assert_eq!(
            &self.calls[0], expected,
            "Expected '{}' to be called with {}, but it was called with {}",
            self.name, expected, self.calls[0]
        );
    }

    /// Assert the expected calls appear consecutively in the call log
    pub fn assert_has_calls(&self, expected: &[RecordedCall]) {
        let found = expected.is_empty()
            || self
                .calls
                .windows(expected.len())
                .any(|window| window == expected);
        assert!(
            found,
            "Expected '{}' to have calls [{}], but calls were [{}]",
            self.name,
            join(expected),
            join(&self.calls)
        );
    }
}

fn join(calls: &[RecordedCall]) -> String {
    calls
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
