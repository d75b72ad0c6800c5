//! Error types for the driver

use ad_config::ConfigError;
use ad_core::EntityIdError;
use thiserror::Error;

/// Result type for driver operations
pub type DriverResult<T> = Result<T, DriverError>;

/// Errors raised while configuring or inspecting a driver
#[derive(Debug, Error)]
pub enum DriverError {
    /// A binding names a method the AppDaemon runtime does not have
    #[error("attempt to mock non existing method: {name}")]
    UnknownMethod { name: String },

    /// Recorded calls were requested for a method that is not bound
    #[error("method '{name}' is not bound on this driver")]
    NotBound { name: String },

    /// An entity id given for seeding is malformed
    #[error(transparent)]
    InvalidEntityId(#[from] EntityIdError),

    /// The driver configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),
}
