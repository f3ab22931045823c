//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Relay Gateway - live media fan-out relay
#[derive(Parser, Debug)]
#[command(
    name = "relay-gateway",
    author,
    version,
    about = "Live media relay gateway",
    long_about = "Receives live transport streams on RIST/UDP inputs and fans every packet\n\
                  out to UDP, RTP, SRT and DekTec ASI outputs.\n\n\
                  The config file is re-read on SIGHUP and applied in place."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "RELAY_GATEWAY_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "RELAY_GATEWAY_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the relay
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (YAML, TOML or JSON)
    #[arg(short, long, env = "RELAY_GATEWAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Input URL, e.g. rist://@0.0.0.0:5000 (repeatable, replaces --config)
    #[arg(short, long = "input", conflicts_with = "config")]
    pub inputs: Vec<String>,

    /// Output URL, e.g. udp://239.0.0.1:1234 (repeatable)
    #[arg(short, long = "output", requires = "inputs")]
    pub outputs: Vec<String>,

    /// Instance identifier, also the flow name when built from flags
    #[arg(long, default_value = "relay-gateway", env = "RELAY_GATEWAY_IDENTIFIER")]
    pub identifier: String,

    /// Receiver recovery buffer in milliseconds
    #[arg(long, default_value_t = contracts::FlowConfig::DEFAULT_LATENCY_MS, requires = "inputs")]
    pub rist_recoverysize: u32,

    /// Interval between stats reports, in seconds
    #[arg(long, default_value = "10", env = "RELAY_GATEWAY_STATS_INTERVAL")]
    pub stats_interval: u64,

    /// Append stats as JSON lines to this file (rotated daily)
    #[arg(long, requires = "inputs")]
    pub stats_file: Option<PathBuf>,

    /// Print stats as JSON lines to stdout
    #[arg(long, requires = "inputs")]
    pub stats_stdout: bool,

    /// Status endpoint bind address, e.g. 0.0.0.0:8080
    #[arg(long, env = "RELAY_GATEWAY_LISTEN_HTTP", requires = "inputs")]
    pub listen_http: Option<String>,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "config.yaml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}
