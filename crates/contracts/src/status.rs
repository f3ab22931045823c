//! Flow health snapshot

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Overall classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthState {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "NOT-OK")]
    NotOk,
}

impl HealthState {
    pub fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Point-in-time status of one flow, recomputed on every query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowStatus {
    pub status: HealthState,
    #[serde(rename = "lastpackettimestamp")]
    pub last_packet_time: DateTime<Utc>,
    #[serde(rename = "mssincelastpacket")]
    pub ms_since_last_packet: u64,
    #[serde(rename = "packetcount")]
    pub packet_count: u64,
    #[serde(rename = "packetssince")]
    pub packets_since: u64,
    #[serde(rename = "outputcount")]
    pub output_count: usize,
    /// Bits per second since the previous poll
    pub bitrate: u64,
}

impl FlowStatus {
    pub fn ok(&self) -> bool {
        self.status.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_json_shape() {
        let status = FlowStatus {
            status: HealthState::NotOk,
            last_packet_time: DateTime::<Utc>::UNIX_EPOCH,
            ms_since_last_packet: 12,
            packet_count: 100,
            packets_since: 10,
            output_count: 2,
            bitrate: 800_000,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "NOT-OK");
        assert_eq!(json["mssincelastpacket"], 12);
        assert_eq!(json["packetcount"], 100);
        assert_eq!(json["packetssince"], 10);
        assert_eq!(json["outputcount"], 2);
        assert_eq!(json["bitrate"], 800_000);
        assert!(json["lastpackettimestamp"].is_string());
    }
}
