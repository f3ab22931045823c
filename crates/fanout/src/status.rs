//! Input counters, bitrate computation and health classification

use std::time::Instant;

use chrono::{DateTime, Utc};
use contracts::{FlowStatus, HealthState};

/// Bits per second for `bytes` received over `micros` microseconds
///
/// `bytes * 8 * 1_000_000 / micros` with integer division; zero elapsed time
/// yields zero.
pub fn compute_bitrate(bytes: u64, micros: u64) -> u64 {
    if micros == 0 {
        return 0;
    }
    let bits = u128::from(bytes) * 8 * 1_000_000;
    u64::try_from(bits / u128::from(micros)).unwrap_or(u64::MAX)
}

/// Override OK with NOT-OK when both thresholds are set and either is violated
pub fn apply_thresholds(
    mut status: FlowStatus,
    minimal_bitrate: u64,
    max_packet_time_ms: u64,
) -> FlowStatus {
    if minimal_bitrate > 0
        && max_packet_time_ms > 0
        && (status.bitrate < minimal_bitrate || status.ms_since_last_packet > max_packet_time_ms)
    {
        status.status = HealthState::NotOk;
    }
    status
}

/// Detects gaps in the input sequence
#[derive(Debug, Default, Clone)]
pub struct SequenceTracker {
    expected: Option<u32>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe one block; true if it is a discontinuity
    pub fn observe(&mut self, seq: u32, flagged: bool) -> bool {
        let gap = self.expected.is_some_and(|expected| expected != seq);
        self.expected = Some(seq.wrapping_add(1));
        flagged || gap
    }
}

/// Counters guarded by the status lock
#[derive(Debug)]
pub(crate) struct InputStatus {
    pub packet_count: u64,
    pub packets_since: u64,
    pub bytes_since: u64,
    pub discontinuity_count: u64,
    pub output_count: usize,
    last_packet_at: Instant,
    last_packet_wall: DateTime<Utc>,
    last_status_call: Instant,
}

impl InputStatus {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            packet_count: 0,
            packets_since: 0,
            bytes_since: 0,
            discontinuity_count: 0,
            output_count: 0,
            last_packet_at: now,
            last_packet_wall: Utc::now(),
            last_status_call: now,
        }
    }

    pub fn record_packet(&mut self, len: usize) {
        self.packet_count += 1;
        self.packets_since += 1;
        self.bytes_since += len as u64;
        self.last_packet_at = Instant::now();
        self.last_packet_wall = Utc::now();
    }

    /// Build a snapshot and reset the since-last-poll counters
    pub fn poll(&mut self, running: bool) -> FlowStatus {
        let now = Instant::now();
        let micros = now.duration_since(self.last_status_call).as_micros() as u64;
        let status = FlowStatus {
            status: if running {
                HealthState::Ok
            } else {
                HealthState::NotOk
            },
            last_packet_time: self.last_packet_wall,
            ms_since_last_packet: now.duration_since(self.last_packet_at).as_millis() as u64,
            packet_count: self.packet_count,
            packets_since: self.packets_since,
            output_count: self.output_count,
            bitrate: compute_bitrate(self.bytes_since, micros),
        };
        self.bytes_since = 0;
        self.packets_since = 0;
        self.last_status_call = now;
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_with(bitrate: u64, ms_since_last_packet: u64) -> FlowStatus {
        FlowStatus {
            status: HealthState::Ok,
            last_packet_time: Utc::now(),
            ms_since_last_packet,
            packet_count: 1,
            packets_since: 1,
            output_count: 1,
            bitrate,
        }
    }

    #[test]
    fn test_compute_bitrate() {
        assert_eq!(compute_bitrate(125_000, 1_000_000), 1_000_000);
        assert_eq!(compute_bitrate(1, 3), 2_666_666);
        assert_eq!(compute_bitrate(1316, 1_000), 10_528_000);
        assert_eq!(compute_bitrate(0, 5_000), 0);
        assert_eq!(compute_bitrate(1_000, 0), 0);
    }

    #[test]
    fn test_thresholds() {
        let low_bitrate = apply_thresholds(status_with(400_000, 0), 500_000, 2000);
        assert_eq!(low_bitrate.status, HealthState::NotOk);

        let gap = apply_thresholds(status_with(600_000, 3000), 500_000, 2000);
        assert_eq!(gap.status, HealthState::NotOk);

        let healthy = apply_thresholds(status_with(600_000, 100), 500_000, 2000);
        assert_eq!(healthy.status, HealthState::Ok);
    }

    #[test]
    fn test_thresholds_need_both_values() {
        let status = apply_thresholds(status_with(0, 10_000), 500_000, 0);
        assert!(status.ok());
        let status = apply_thresholds(status_with(0, 10_000), 0, 2000);
        assert!(status.ok());
    }

    #[test]
    fn test_thresholds_keep_engine_failure() {
        let mut status = status_with(600_000, 100);
        status.status = HealthState::NotOk;
        let status = apply_thresholds(status, 500_000, 2000);
        assert!(!status.ok());
    }

    fn count(seqs: &[(u32, bool)]) -> usize {
        let mut tracker = SequenceTracker::new();
        seqs.iter()
            .filter(|(seq, flag)| tracker.observe(*seq, *flag))
            .count()
    }

    #[test]
    fn test_discontinuity_detection() {
        assert_eq!(count(&[(1, false), (2, false), (4, false)]), 1);
        assert_eq!(count(&[(1, false), (2, false), (3, false)]), 0);
        assert_eq!(count(&[(1, false), (2, true), (3, false)]), 1);
        assert_eq!(count(&[(u32::MAX, false), (0, false)]), 0);
    }

    #[test]
    fn test_poll_resets_since_counters() {
        let mut input = InputStatus::new();
        input.record_packet(188);
        input.record_packet(188);
        let first = input.poll(true);
        assert_eq!(first.packet_count, 2);
        assert_eq!(first.packets_since, 2);
        let second = input.poll(true);
        assert_eq!(second.packet_count, 2);
        assert_eq!(second.packets_since, 0);
        assert_eq!(second.bitrate, 0);
        assert!(!input.poll(false).ok());
    }
}
