//! Where the running configuration comes from
//!
//! Either a config file, re-read on every reload, or a single flow built
//! from command-line flags.

use std::path::PathBuf;

use config_loader::ConfigLoader;
use contracts::{parse_endpoint_url, query_param, FlowConfig, InputConfig, OutputConfig, RelayConfig};
use tracing::info;

use crate::cli::RunArgs;
use crate::error::{CliError, Result};

#[derive(Debug, Clone)]
pub enum ConfigSource {
    File(PathBuf),
    Flags(RelayConfig),
}

impl ConfigSource {
    pub fn from_args(args: &RunArgs) -> Result<Self> {
        if let Some(path) = &args.config {
            return Ok(Self::File(path.clone()));
        }
        if args.inputs.is_empty() {
            return Err(CliError::NoConfigSource);
        }
        Ok(Self::Flags(flags_config(args)))
    }

    /// Load and validate the configuration
    pub fn load(&self) -> Result<RelayConfig> {
        match self {
            Self::File(path) => {
                if !path.exists() {
                    return Err(CliError::config_not_found(path.display().to_string()));
                }
                let config = ConfigLoader::load_from_path(path)?;
                info!(
                    config = %path.display(),
                    identifier = %config.identifier,
                    flows = config.flows.len(),
                    "Configuration loaded"
                );
                Ok(config)
            }
            Self::Flags(config) => {
                ConfigLoader::validate(config)?;
                Ok(config.clone())
            }
        }
    }

    pub fn reloadable(&self) -> bool {
        matches!(self, Self::File(_))
    }
}

fn flags_config(args: &RunArgs) -> RelayConfig {
    let mut flow = FlowConfig::new(args.identifier.clone());
    flow.latency = args.rist_recoverysize;
    flow.stats_stdout = args.stats_stdout;
    flow.stats_file = args.stats_file.clone();
    flow.inputs = args
        .inputs
        .iter()
        .map(|url| InputConfig { url: url.clone() })
        .collect();
    flow.outputs = args
        .outputs
        .iter()
        .map(|url| OutputConfig {
            identifier: output_identifier(url),
            url: url.clone(),
        })
        .collect();

    RelayConfig {
        identifier: args.identifier.clone(),
        listen_http: args.listen_http.clone(),
        telemetry: None,
        flows: vec![flow],
    }
}

/// Label taken from the `identifier` query parameter, if any
fn output_identifier(raw: &str) -> String {
    parse_endpoint_url(raw)
        .ok()
        .and_then(|url| query_param(&url, "identifier"))
        .unwrap_or_default()
}
