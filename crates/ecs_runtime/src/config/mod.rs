//! Configuration system

pub use serde::{Deserialize, Serialize};

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

        // Try different formats
        if path.ends_with(".toml") {
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.ends_with(".ron") {
            ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A value is outside the range the runtime accepts
    #[error("Invalid value for {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// Limits and start-up behavior of an [`EntityManager`](crate::ecs::EntityManager)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityManagerConfig {
    /// Number of data slots every entity carries (one per registered data type)
    pub max_entity_data: usize,

    /// Number of depth buckets used to order the alive list
    pub max_entity_depth: usize,

    /// Entities to reserve room for up front
    pub initial_entity_capacity: usize,

    /// Register the built-in transform, visibility, lighting, culling and mesh systems
    pub register_default_systems: bool,
}

impl Default for EntityManagerConfig {
    fn default() -> Self {
        Self {
            max_entity_data: 64,
            max_entity_depth: 256,
            initial_entity_capacity: 0,
            register_default_systems: true,
        }
    }
}

impl Config for EntityManagerConfig {}

impl EntityManagerConfig {
    /// Config without the built-in systems, useful when a caller wants full control of order
    pub fn bare() -> Self {
        Self {
            register_default_systems: false,
            ..Self::default()
        }
    }

    /// Check the limits are usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entity_data == 0 {
            return Err(ConfigError::Invalid {
                field: "max_entity_data",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_entity_depth == 0 {
            return Err(ConfigError::Invalid {
                field: "max_entity_depth",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let config = EntityManagerConfig::default();
        assert_eq!(config.max_entity_data, 64);
        assert_eq!(config.max_entity_depth, 256);
        assert!(config.register_default_systems);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_limits_rejected() {
        let config = EntityManagerConfig {
            max_entity_depth: 0,
            ..EntityManagerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "max_entity_depth", .. })
        ));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: EntityManagerConfig = toml::from_str("max_entity_data = 16").unwrap();
        assert_eq!(config.max_entity_data, 16);
        assert_eq!(config.max_entity_depth, 256);
    }

    #[test]
    fn test_ron_roundtrip_through_file() {
        let path = std::env::temp_dir().join("ecs_runtime_config_test.ron");
        let path = path.to_string_lossy().to_string();

        let config = EntityManagerConfig {
            initial_entity_capacity: 128,
            ..EntityManagerConfig::bare()
        };
        config.save_to_file(&path).unwrap();
        let loaded = EntityManagerConfig::load_from_file(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_unknown_extension() {
        let err = EntityManagerConfig::load_from_file("settings.ini").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_) | ConfigError::UnsupportedFormat(_)));
    }
}
