//! Shared helpers for driver integration tests

#![allow(dead_code)]

use ad_testing::{Attributes, HassDriver, StateChange};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

/// Records every state callback invocation it receives
#[derive(Clone, Default)]
pub struct StateSpy {
    calls: Arc<Mutex<Vec<StateChange>>>,
}

impl StateSpy {
    pub fn new() -> Self {
        Self::default()
    }

    /// A callback that feeds this spy
    pub fn callback(&self) -> impl Fn(&StateChange) + Send + Sync + 'static {
        let calls = self.calls.clone();
        move |change: &StateChange| calls.lock().unwrap().push(change.clone())
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<StateChange> {
        self.calls.lock().unwrap().clone()
    }

    pub fn assert_called_once_with(
        &self,
        entity_id: &str,
        attribute: Option<&str>,
        old: Value,
        new: Value,
    ) {
        let calls = self.calls();
        assert_eq!(calls.len(), 1, "expected one callback, got {calls:?}");
        let change = &calls[0];
        assert_eq!(change.entity_id, entity_id);
        assert_eq!(change.attribute.as_deref(), attribute);
        assert_eq!(change.old, old);
        assert_eq!(change.new, new);
    }
}

fn attributes(value: Value) -> Attributes {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

/// A driver holding two lights and a media player
pub fn driver_with_initialized_states() -> HassDriver {
    let driver = HassDriver::new();
    driver
        .seed_states([
            ("light.1", attributes(json!({"state": "off", "linkquality": 60}))),
            (
                "light.2",
                attributes(json!({"state": "on", "linkquality": 10, "brightness": 60})),
            ),
            (
                "media_player.smart_tv",
                attributes(json!({"state": "on", "source": null})),
            ),
        ])
        .unwrap();
    driver
}
