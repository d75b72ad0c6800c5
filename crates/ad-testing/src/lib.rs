//! Unit-testing harness for AppDaemon automations
//!
//! This crate simulates the slice of the AppDaemon runtime that automations
//! touch: entity state, `listen_state` subscriptions, named events and
//! `run_in` timers on a virtual clock. Automations are handed a [`Hass`]
//! adapter instead of talking to a live Home Assistant, and every runtime
//! call they make is recorded for assertions.
//!
//! # Example
//!
//! ```ignore
//! use ad_testing::{call, AutomationFixture, HassDriver};
//!
//! let driver = HassDriver::new();
//! let app = AutomationFixture::new(&driver)
//!     .arg("motion_entity", "binary_sensor.motion_detected")
//!     .arg("light_entities", json!(["light.1", "light.2"]))
//!     .build(LivingRoomMotion::new)?;
//!
//! driver.setup_with(|d| d.set_state("binary_sensor.motion_detected", "off"));
//! driver.set_state("binary_sensor.motion_detected", "on");
//!
//! driver.calls("turn_on")?.assert_has_calls(&[call(["light.1"]), call(["light.2"])]);
//! ```

mod driver;
mod error;
mod fixture;
mod hass;
pub mod logging;
mod recorder;

pub use driver::{HassDriver, SetupGuard, StateWrite};
pub use error::{DriverError, DriverResult};
pub use fixture::{AppArgs, Automation, AutomationFixture};
pub use hass::Hass;
pub use logging::init_test_logging;
pub use recorder::{
    call, CallRecorder, MethodCalls, RecordedCall, DEFAULT_BINDINGS, HOST_METHODS,
};

// Re-exports so tests only need this crate
pub use ad_config::{load_config, load_config_str, ConfigError, DriverConfig};
pub use ad_core::{
    Attributes, EntityId, FiredEvent, Kwargs, StateChange, ATTR_ALL, ATTR_STATE,
};
pub use ad_event_bus::EventHandle;
pub use ad_scheduler::{PendingCall, TimerHandle};
pub use ad_state_store::{ListenOptions, SubscriptionHandle};
