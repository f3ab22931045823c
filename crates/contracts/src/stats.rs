//! Telemetry records and the stats handler interface

use serde::Serialize;
use url::Url;

/// Streaming-transport connection statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StreamStats {
    pub bytes_sent_total: u64,
    pub packets_sent_total: u64,
    /// Bytes sent since the previous poll
    pub bytes_sent: u64,
    pub packets_sent: u64,
    pub send_rate_mbps: f64,
    pub rtt_ms: f64,
}

/// Input flow statistics reported by the receiver
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InputFlowStats {
    pub cname: String,
    pub peers: u32,
    pub bandwidth_bps: u64,
    pub received: u64,
    pub missing: u64,
    pub recovered: u64,
    pub lost: u64,
    pub quality: f64,
}

/// Hardware ASI port statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AsiStats {
    pub port: u16,
    pub fifo_bytes: i64,
    pub bytes_written_total: u64,
    /// Bytes written since the previous poll
    pub bytes_written: u64,
}

/// Tagged union of every stats record
///
/// Serializes as the bare body; [`StatsRecord::kind`] carries the tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatsRecord {
    Stream(StreamStats),
    InputFlow(InputFlowStats),
    Asi(AsiStats),
}

impl StatsRecord {
    /// Record type label
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stream(_) => "stream",
            Self::InputFlow(_) => "input-flow",
            Self::Asi(_) => "asi",
        }
    }

    /// Numeric fields, for gauges
    pub fn numeric_fields(&self) -> Vec<(&'static str, f64)> {
        match self {
            Self::Stream(s) => vec![
                ("bytes_sent_total", s.bytes_sent_total as f64),
                ("packets_sent_total", s.packets_sent_total as f64),
                ("bytes_sent", s.bytes_sent as f64),
                ("packets_sent", s.packets_sent as f64),
                ("send_rate_mbps", s.send_rate_mbps),
                ("rtt_ms", s.rtt_ms),
            ],
            Self::InputFlow(s) => vec![
                ("peers", f64::from(s.peers)),
                ("bandwidth_bps", s.bandwidth_bps as f64),
                ("received", s.received as f64),
                ("missing", s.missing as f64),
                ("recovered", s.recovered as f64),
                ("lost", s.lost as f64),
                ("quality", s.quality),
            ],
            Self::Asi(s) => vec![
                ("fifo_bytes", s.fifo_bytes as f64),
                ("bytes_written_total", s.bytes_written_total as f64),
                ("bytes_written", s.bytes_written as f64),
            ],
        }
    }
}

/// Telemetry collaborator
pub trait StatsHandler: Send + Sync {
    fn handle_stats(
        &self,
        remote_host: &str,
        output_identifier: &str,
        local_url: Option<&Url>,
        record: StatsRecord,
    );
}

/// Handler that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStats;

impl StatsHandler for NoopStats {
    fn handle_stats(&self, _: &str, _: &str, _: Option<&Url>, _: StatsRecord) {}
}
