//! `validate` command implementation.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use contracts::RelayConfig;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    identifier: String,
    flow_count: usize,
    input_count: usize,
    output_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    listen_http: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    telemetry_listen: Option<String>,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(config) => {
            let warnings = collect_warnings(&config);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(summarize(&config)),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

fn summarize(config: &RelayConfig) -> ConfigSummary {
    ConfigSummary {
        identifier: config.identifier.clone(),
        flow_count: config.flows.len(),
        input_count: config.flows.iter().map(|f| f.inputs.len()).sum(),
        output_count: config.flows.iter().map(|f| f.outputs.len()).sum(),
        listen_http: config.listen_http.clone(),
        telemetry_listen: config.telemetry.as_ref().map(|t| t.listen.clone()),
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(config: &RelayConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.flows.is_empty() {
        warnings.push("No flows configured".to_string());
    }

    for flow in &config.flows {
        if flow.outputs.is_empty() {
            warnings.push(format!(
                "Flow '{}' has no outputs - received data will be dropped",
                flow.identifier
            ));
        }
    }

    if config.listen_http.is_none() {
        warnings.push("listen_http not set - status endpoint disabled".to_string());
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Identifier: {}", summary.identifier);
            println!("  Flows: {}", summary.flow_count);
            println!("  Inputs: {}", summary.input_count);
            println!("  Outputs: {}", summary.output_count);
            if let Some(ref listen) = summary.listen_http {
                println!("  Status endpoint: {}", listen);
            }
            if let Some(ref listen) = summary.telemetry_listen {
                println!("  Metrics exporter: {}", listen);
            }
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn args(path: PathBuf) -> ValidateArgs {
        ValidateArgs {
            config: path,
            json: true,
        }
    }

    #[test]
    fn test_valid_config_summary_and_warnings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.yaml");
        std::fs::write(
            &path,
            "identifier: gw\nflows:\n  - identifier: a\n    inputs:\n      - url: rist://@0.0.0.0:5000\n",
        )
        .unwrap();

        let result = validate_config(&args(path));
        assert!(result.valid);
        let summary = result.summary.unwrap();
        assert_eq!(summary.flow_count, 1);
        assert_eq!(summary.input_count, 1);
        assert_eq!(summary.output_count, 0);
        let warnings = result.warnings.unwrap();
        assert!(warnings.iter().any(|w| w.contains("'a' has no outputs")));
        assert!(warnings.iter().any(|w| w.contains("listen_http")));
    }

    #[test]
    fn test_invalid_config_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.yaml");
        std::fs::write(&path, "identifier: gw\nflows:\n  - identifier: a\n").unwrap();

        let result = validate_config(&args(path));
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("inputs"));
    }

    #[test]
    fn test_missing_file() {
        let result = validate_config(&args(PathBuf::from("/nonexistent/relay.yaml")));
        assert!(!result.valid);
        assert!(run_validate(&args(PathBuf::from("/nonexistent/relay.yaml"))).is_err());
    }
}
