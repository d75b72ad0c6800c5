//! Error types for driver configuration loading

use ad_core::EntityIdError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur while loading a driver configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a file
    #[error("failed to read file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML
    #[error("failed to parse YAML in {origin}: {source}")]
    ParseYaml {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// An entity id under `states` is malformed
    #[error("invalid entity id '{entity_id}' in states: {source}")]
    InvalidEntityId {
        entity_id: String,
        #[source]
        source: EntityIdError,
    },
}
