//! Driver configuration model and YAML loader

use crate::error::{ConfigError, ConfigResult};
use ad_core::{Attributes, EntityId};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Initial conditions for a driver
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriverConfig {
    /// Virtual clock reading in seconds
    pub clock_time: u64,
    /// Attribute mapping per entity id, in file order
    pub states: IndexMap<String, Attributes>,
}

impl DriverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the starting clock reading
    pub fn with_clock_time(mut self, seconds: u64) -> Self {
        self.clock_time = seconds;
        self
    }

    /// Seed one entity's attribute mapping
    pub fn with_state(mut self, entity_id: impl Into<String>, attributes: Attributes) -> Self {
        self.states.insert(entity_id.into(), attributes);
        self
    }

    /// Check every entity id under `states`
    pub fn validate(&self) -> ConfigResult<()> {
        for entity_id in self.states.keys() {
            entity_id
                .parse::<EntityId>()
                .map_err(|source| ConfigError::InvalidEntityId {
                    entity_id: entity_id.clone(),
                    source,
                })?;
        }
        Ok(())
    }
}

/// Load and validate a configuration file
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<DriverConfig> {
    let path = path.as_ref();
    debug!("Loading driver config: {:?}", path);

    let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&content, &path.display().to_string())
}

/// Load and validate a configuration from a YAML string
pub fn load_config_str(content: &str) -> ConfigResult<DriverConfig> {
    parse(content, "<string>")
}

fn parse(content: &str, origin: &str) -> ConfigResult<DriverConfig> {
    // An empty document is an empty configuration
    if content.trim().is_empty() {
        return Ok(DriverConfig::default());
    }

    let config: DriverConfig =
        serde_yaml::from_str(content).map_err(|source| ConfigError::ParseYaml {
            origin: origin.to_string(),
            source,
        })?;
    config.validate()?;

    debug!(
        clock_time = config.clock_time,
        entities = config.states.len(),
        "Loaded driver config"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_load_from_string() {
        let config = load_config_str(
            r#"
clock_time: 3600
states:
  light.1:
    state: "off"
    linkquality: 60
  media_player.smart_tv:
    state: "on"
    source: null
"#,
        )
        .unwrap();

        assert_eq!(config.clock_time, 3600);
        let ids: Vec<_> = config.states.keys().cloned().collect();
        assert_eq!(ids, vec!["light.1", "media_player.smart_tv"]);
        assert_eq!(
            serde_json::Value::Object(config.states["light.1"].clone()),
            json!({"state": "off", "linkquality": 60})
        );
        assert_eq!(config.states["media_player.smart_tv"]["source"], json!(null));
    }

    #[test]
    fn test_empty_document() {
        assert_eq!(load_config_str("").unwrap(), DriverConfig::default());
        assert_eq!(load_config_str("clock_time: 5").unwrap().clock_time, 5);
    }

    #[test]
    fn test_invalid_entity_id() {
        let err = load_config_str("states:\n  light:\n    state: on\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEntityId { ref entity_id, .. } if entity_id == "light"));
        assert!(err.to_string().contains("invalid entity id 'light'"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = load_config_str("clock: 5\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseYaml { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "states:\n  binary_sensor.motion:\n    state: \"off\"").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.states["binary_sensor.motion"]["state"], json!("off"));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_builder() {
        let mut attributes = Attributes::new();
        attributes.insert("state".into(), json!("on"));
        let config = DriverConfig::new()
            .with_clock_time(10)
            .with_state("switch.kitchen", attributes);
        assert!(config.validate().is_ok());
        assert_eq!(config.states.len(), 1);
    }
}
