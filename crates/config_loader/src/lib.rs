//! # Config Loader
//!
//! Configuration loading and parsing module.
//!
//! Responsibilities:
//! - Parse YAML/TOML/JSON configuration files
//! - Validate configuration legality
//! - Generate `RelayConfig`
//!
//! # Example
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let config = ConfigLoader::load_from_path(Path::new("relay.yaml")).unwrap();
//! println!("Flows: {}", config.flows.len());
//! ```

mod parser;
mod validator;

pub use contracts::RelayConfig;
pub use parser::ConfigFormat;
pub use validator::{validate_flow, OUTPUT_SCHEMES};

use contracts::ContractError;
use std::path::Path;

/// Configuration loader
///
/// Provides static methods to load configuration from files or strings.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file path
    ///
    /// Automatically detects format from file extension (.yaml / .yml / .toml / .json).
    ///
    /// # Errors
    /// - File read failure
    /// - Unsupported format
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_path(path: &Path) -> Result<RelayConfig, ContractError> {
        let format = Self::detect_format(path)?;
        let content = Self::read_file(path)?;
        Self::load_from_str(&content, format)
    }

    /// Load configuration from string
    ///
    /// # Errors
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_str(content: &str, format: ConfigFormat) -> Result<RelayConfig, ContractError> {
        let config = parser::parse(content, format)?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate an already built configuration (e.g. assembled from CLI flags)
    pub fn validate(config: &RelayConfig) -> Result<(), ContractError> {
        validator::validate(config)
    }

    /// Serialize RelayConfig to YAML string
    pub fn to_yaml(config: &RelayConfig) -> Result<String, ContractError> {
        serde_yaml::to_string(config)
            .map_err(|e| ContractError::config_parse(format!("YAML serialize error: {e}")))
    }

    /// Serialize RelayConfig to JSON string
    pub fn to_json(config: &RelayConfig) -> Result<String, ContractError> {
        serde_json::to_string_pretty(config)
            .map_err(|e| ContractError::config_parse(format!("JSON serialize error: {e}")))
    }
}

impl ConfigLoader {
    /// Infer configuration format from file extension
    fn detect_format(path: &Path) -> Result<ConfigFormat, ContractError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            ContractError::config_parse("cannot determine file format from extension")
        })?;

        ConfigFormat::from_extension(ext).ok_or_else(|| {
            ContractError::config_parse(format!("unsupported config format: .{ext}"))
        })
    }

    /// Read configuration file content
    fn read_file(path: &Path) -> Result<String, ContractError> {
        Ok(std::fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL_YAML: &str = r#"
identifier: gw
flows:
  - identifier: main
    inputs:
      - url: "rist://@0.0.0.0:5000"
    outputs:
      - identifier: local
        url: "udp://127.0.0.1:6000"
"#;

    #[test]
    fn test_load_from_str_yaml() {
        let result = ConfigLoader::load_from_str(MINIMAL_YAML, ConfigFormat::Yaml);
        assert!(result.is_ok(), "Failed: {:?}", result.err());
        let config = result.unwrap();
        assert_eq!(config.flows[0].identifier, "main");
    }

    #[test]
    fn test_yaml_to_json_preserves_equality() {
        let config = ConfigLoader::load_from_str(MINIMAL_YAML, ConfigFormat::Yaml).unwrap();
        let json = ConfigLoader::to_json(&config).unwrap();
        let reloaded = ConfigLoader::load_from_str(&json, ConfigFormat::Json).unwrap();
        assert_eq!(config, reloaded);
    }

    #[test]
    fn test_validation_runs_after_parse() {
        let content = r#"
identifier: gw
flows:
  - identifier: a
    inputs:
      - url: "rist://@0.0.0.0:5000"
  - identifier: a
    inputs:
      - url: "rist://@0.0.0.0:5001"
"#;
        let result = ConfigLoader::load_from_str(content, ConfigFormat::Yaml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("duplicate"));
    }

    #[test]
    fn test_load_from_path_detects_format() {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        file.write_all(MINIMAL_YAML.as_bytes()).unwrap();
        let config = ConfigLoader::load_from_path(file.path()).unwrap();
        assert_eq!(config.identifier, "gw");

        let unknown = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(ConfigLoader::load_from_path(unknown.path()).is_err());
    }
}
