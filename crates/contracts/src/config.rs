//! RelayConfig - Config Loader output
//!
//! Describes the complete gateway configuration: flows, their inputs and
//! outputs, health thresholds, telemetry and the status endpoint. All entities
//! are value snapshots compared by structural equality during reconciliation.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Complete gateway configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Instance identifier
    pub identifier: String,

    /// Status endpoint bind address (e.g. "0.0.0.0:8080")
    #[serde(default, alias = "listenhttp", skip_serializing_if = "Option::is_none")]
    pub listen_http: Option<String>,

    /// Telemetry exporter settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<TelemetryConfig>,

    /// Flow definitions
    #[serde(default)]
    pub flows: Vec<FlowConfig>,
}

/// Input transport profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportProfile {
    #[default]
    Simple,
    Main,
    Advanced,
}

/// One input-to-outputs relay unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Flow identifier (unique)
    pub identifier: String,

    /// Input transport type, only "RIST" is supported
    #[serde(rename = "type", default = "default_input_type")]
    pub input_type: String,

    /// Transport profile
    #[serde(default, alias = "ristprofile")]
    pub profile: TransportProfile,

    /// Recovery latency in ms (0 = default)
    #[serde(default)]
    pub latency: u32,

    /// Stream id, used as destination port unless profile is simple
    #[serde(default, alias = "streamid")]
    pub stream_id: u32,

    #[serde(default)]
    pub inputs: Vec<InputConfig>,

    #[serde(default)]
    pub outputs: Vec<OutputConfig>,

    /// Write stats records to stdout
    #[serde(default, alias = "statsstdout")]
    pub stats_stdout: bool,

    /// Write stats records to this file (rotated daily)
    #[serde(default, alias = "statsfile", skip_serializing_if = "Option::is_none")]
    pub stats_file: Option<PathBuf>,

    /// Minimal acceptable bitrate in bps (0 = unchecked)
    #[serde(default, alias = "minimalbitrate")]
    pub minimal_bitrate: u64,

    /// Maximal acceptable gap between packets in ms (0 = unchecked)
    #[serde(default, alias = "maxpackettime")]
    pub max_packet_time_ms: u64,
}

fn default_input_type() -> String {
    FlowConfig::INPUT_TYPE_RIST.to_string()
}

impl FlowConfig {
    pub const INPUT_TYPE_RIST: &'static str = "RIST";
    pub const DEFAULT_LATENCY_MS: u32 = 1000;

    /// Minimal flow with the given identifier and no inputs/outputs
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            input_type: default_input_type(),
            profile: TransportProfile::default(),
            latency: 0,
            stream_id: 0,
            inputs: Vec::new(),
            outputs: Vec::new(),
            stats_stdout: false,
            stats_file: None,
            minimal_bitrate: 0,
            max_packet_time_ms: 0,
        }
    }

    /// Recovery latency with the default applied
    pub fn effective_latency(&self) -> u32 {
        if self.latency == 0 {
            Self::DEFAULT_LATENCY_MS
        } else {
            self.latency
        }
    }

    /// Receiver destination port; the simple profile has none
    pub fn destination_port(&self) -> u16 {
        match self.profile {
            TransportProfile::Simple => 0,
            _ => self.stream_id as u16,
        }
    }

    /// Whether switching to `other` needs a fresh receiver
    pub fn identity_differs(&self, other: &FlowConfig) -> bool {
        self.effective_latency() != other.effective_latency()
            || self.profile != other.profile
            || self.stream_id != other.stream_id
    }

    /// Both health thresholds configured
    pub fn has_health_thresholds(&self) -> bool {
        self.minimal_bitrate > 0 && self.max_packet_time_ms > 0
    }
}

/// Input peer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputConfig {
    pub url: String,
}

/// Output destination
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputConfig {
    /// User supplied label, reported with stats
    #[serde(default)]
    pub identifier: String,
    pub url: String,
}

/// Metrics exporter settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Prometheus exporter bind address
    pub listen: String,

    #[serde(default = "default_stream_measurement", alias = "srt")]
    pub stream_measurement: String,

    #[serde(default = "default_input_measurement", alias = "ristrx")]
    pub input_measurement: String,

    #[serde(default = "default_asi_measurement")]
    pub asi_measurement: String,
}

fn default_stream_measurement() -> String {
    "srt".to_string()
}

fn default_input_measurement() -> String {
    "rist_receive".to_string()
}

fn default_asi_measurement() -> String {
    "dektecasi".to_string()
}

impl TelemetryConfig {
    pub fn new(listen: impl Into<String>) -> Self {
        Self {
            listen: listen.into(),
            stream_measurement: default_stream_measurement(),
            input_measurement: default_input_measurement(),
            asi_measurement: default_asi_measurement(),
        }
    }
}
