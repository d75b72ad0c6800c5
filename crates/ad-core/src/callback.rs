//! Callback signatures and the payloads they receive

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::Kwargs;

/// Arguments of a `listen_state` callback
///
/// For subscriptions on the `"all"` attribute, `attribute` is `None` and
/// `old`/`new` hold the full attribute mappings as JSON objects.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateChange {
    /// Entity whose attribute changed
    pub entity_id: String,
    /// Attribute that changed
    pub attribute: Option<String>,
    /// Value before the write
    pub old: Value,
    /// Value after the write
    pub new: Value,
    /// Extra keywords given at subscription time
    pub kwargs: Kwargs,
}

/// Arguments of a `listen_event` callback
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FiredEvent {
    /// Name the event was fired under
    pub event_name: String,
    /// Keyword data given to `fire_event`
    pub data: Kwargs,
}

/// Callback invoked on matching state changes
pub type StateCallback = Arc<dyn Fn(&StateChange) + Send + Sync>;

/// Callback invoked when a named event fires
pub type EventCallback = Arc<dyn Fn(&FiredEvent) + Send + Sync>;

/// Callback invoked when a deferred call comes due
pub type TimerCallback = Arc<dyn Fn(&Kwargs) + Send + Sync>;
