//! Construction of automations under test
//!
//! An automation receives the [`Hass`] adapter and its arguments at
//! construction, and registers its callbacks in [`Automation::initialize`].
//! [`AutomationFixture`] wires both up against a driver.

use ad_core::Kwargs;
use anyhow::Context as _;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::driver::HassDriver;
use crate::hass::Hass;

/// An AppDaemon-style automation
pub trait Automation {
    /// Register listeners and timers
    fn initialize(&mut self) -> anyhow::Result<()>;
}

/// Arguments an automation was configured with
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppArgs(Kwargs);

impl AppArgs {
    pub fn new(args: Kwargs) -> Self {
        Self(args)
    }

    /// Deserialize one argument
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<T> {
        let value = self
            .0
            .get(key)
            .with_context(|| format!("missing app argument '{key}'"))?;
        serde_json::from_value(value.clone())
            .with_context(|| format!("invalid app argument '{key}'"))
    }

    /// Raw argument value
    pub fn raw(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_kwargs(&self) -> &Kwargs {
        &self.0
    }
}

/// Builder that constructs an automation against a driver
///
/// ```ignore
/// let app = AutomationFixture::new(&driver)
///     .arg("motion_entity", "binary_sensor.motion_detected")
///     .build(LivingRoomMotion::new)?;
/// ```
pub struct AutomationFixture<'a> {
    driver: &'a HassDriver,
    args: Kwargs,
    initialize: bool,
}

impl<'a> AutomationFixture<'a> {
    pub fn new(driver: &'a HassDriver) -> Self {
        Self {
            driver,
            args: Kwargs::new(),
            initialize: true,
        }
    }

    /// Replace all arguments
    pub fn args(mut self, args: Kwargs) -> Self {
        self.args = args;
        self
    }

    /// Add one argument
    pub fn arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    /// Whether `build` calls `initialize` (default: true)
    ///
    /// Turn this off when the test has to seed state before the automation
    /// registers its listeners, then call `initialize` by hand.
    pub fn initialize(mut self, initialize: bool) -> Self {
        self.initialize = initialize;
        self
    }

    /// Inject the adapter, construct the automation and optionally initialize it
    pub fn build<A, F>(self, construct: F) -> anyhow::Result<A>
    where
        A: Automation,
        F: FnOnce(Hass, AppArgs) -> A,
    {
        let hass = self.driver.inject()?;
        let mut app = construct(hass, AppArgs::new(self.args));
        debug!(
            app = std::any::type_name::<A>(),
            initialize = self.initialize,
            "Constructed automation"
        );
        if self.initialize {
            app.initialize()
                .with_context(|| format!("{} failed to initialize", std::any::type_name::<A>()))?;
        }
        Ok(app)
    }
}
