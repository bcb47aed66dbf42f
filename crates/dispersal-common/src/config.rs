//! Configuration types for Dispersal
//!
//! The configuration supplies the level specification list at startup.
//! A topology is either generated from the levels or given explicitly as a
//! tree; runtime reconfiguration means loading a new `Config` and building
//! a new topology from it.

use crate::error::{Error, Result};
use crate::types::{DomainSpec, LevelSpec, ReplacementPolicy, WeightSpec, validate_levels};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration for Dispersal
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Width of fragment identifiers in bits
    #[serde(default = "default_identifier_bits")]
    pub identifier_bits: u32,
    /// Seed for sampling `[min, max]` capacity weights (random if unset)
    #[serde(default)]
    pub seed: Option<u64>,
    /// Hierarchy levels, root side first
    #[serde(default = "default_levels")]
    pub levels: Vec<LevelSpec>,
    /// Explicit topology tree; generated from `levels` if unset
    #[serde(default)]
    pub topology: Option<DomainSpec>,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            identifier_bits: default_identifier_bits(),
            seed: None,
            levels: default_levels(),
            topology: None,
            logging: LoggingConfig::default(),
        }
    }
}

const fn default_identifier_bits() -> u32 {
    32
}

/// Reference layout: 3 racks of 3 servers of 5 drives, 24 of 32 bits
fn default_levels() -> Vec<LevelSpec> {
    vec![
        LevelSpec::new("Rack", 3, 6),
        LevelSpec::new("Server", 3, 8).with_policy(ReplacementPolicy::WithoutReplacement),
        LevelSpec::new("Drive", 5, 10)
            .with_weight(WeightSpec::Range([0.2, 1.5]))
            .with_policy(ReplacementPolicy::WithoutReplacement),
    ]
}

impl Config {
    /// Parse a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::configuration(e.to_string()))
    }

    /// Load from a TOML file, falling back to defaults if it does not exist
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Run every build-time check without building anything
    pub fn validate(&self) -> Result<()> {
        validate_levels(&self.levels, self.identifier_bits)?;
        if self.topology.is_none() {
            if let Some(level) = self.levels.iter().find(|l| l.count == 0) {
                return Err(Error::invalid_spec(format!(
                    "level {}: child count must be positive",
                    level.label
                )));
            }
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive (overridden by `RUST_LOG`)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.identifier_bits, 32);
        assert_eq!(config.levels.len(), 3);
        assert_eq!(config.levels.iter().map(|l| l.bits).sum::<u32>(), 24);
        assert!(config.levels[0].replacement);
        assert!(!config.levels[2].replacement);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_levels() {
        let config = Config::from_toml_str(
            r#"
            identifier_bits = 32
            seed = 7

            [[levels]]
            label = "Rack"
            count = 2
            bits = 4

            [[levels]]
            label = "Drive"
            count = 4
            bits = 8
            weight = [0.5, 2.0]
            replacement = false
            "#,
        )
        .unwrap();

        assert_eq!(config.seed, Some(7));
        assert_eq!(config.levels[1].weight, Some(WeightSpec::Range([0.5, 2.0])));
        assert_eq!(config.levels[1].policy(), ReplacementPolicy::WithoutReplacement);
        assert!(config.levels[0].replacement);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_explicit_topology() {
        let config = Config::from_toml_str(
            r#"
            [[levels]]
            label = "Rack"
            bits = 4

            [[levels]]
            label = "Server"
            bits = 8

            [topology]
            id = "root"

            [[topology.children]]
            id = "Rack1"

            [[topology.children.children]]
            id = "server1-1"
            weight = 10

            [[topology.children.children]]
            id = "server1-2"
            weight = 20.5
            "#,
        )
        .unwrap();

        let root = config.topology.as_ref().unwrap();
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].children[1].weight, Some(20.5));
        // child counts are not needed for explicit trees
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_specs() {
        let mut config = Config::default();
        config.levels[2].weight = Some(WeightSpec::Range([1.5, 0.2]));
        assert!(matches!(config.validate(), Err(Error::InvalidSpec(_))));

        let mut config = Config::default();
        config.identifier_bits = 16;
        assert!(matches!(config.validate(), Err(Error::InvalidSpec(_))));

        // fits the levels but is not a whole number of hex digits
        let mut config = Config::default();
        config.identifier_bits = 30;
        assert!(matches!(config.validate(), Err(Error::InvalidSpec(_))));

        let mut config = Config::default();
        config.levels[1].count = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidSpec(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "identifier_bits = 64\n[logging]\nlevel = \"debug\"\n"
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.identifier_bits, 64);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.levels, Config::default().levels);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_rejects_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "levels = 3").unwrap();
        assert!(matches!(
            Config::load(file.path()),
            Err(Error::Configuration(_))
        ));
    }
}
