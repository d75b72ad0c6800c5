//! YAML configuration for seeding a driver
//!
//! A driver configuration describes the world a test starts in: the virtual
//! clock reading and the attribute mapping of each entity.
//!
//! # Example
//!
//! ```ignore
//! use ad_config::load_config_str;
//!
//! let config = load_config_str(
//!     r#"
//! clock_time: 3600
//! states:
//!   light.1:
//!     state: "off"
//!     linkquality: 60
//! "#,
//! )?;
//! ```

mod error;
mod loader;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_config, load_config_str, DriverConfig};
