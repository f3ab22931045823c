//! RTP framing for MPEG-TS over datagrams

use std::sync::atomic::{AtomicU16, Ordering};

pub const RTP_HEADER_LEN: usize = 12;

/// Payload type for MPEG-TS (RFC 3551)
const PAYLOAD_TYPE_MP2T: u8 = 0x21;

/// Scale a 32.32 fixed-point timestamp to the 90 kHz RTP clock
pub fn rtp_timestamp(timestamp: u64) -> u32 {
    ((u128::from(timestamp) * 90_000) >> 32) as u32
}

/// Per-output header state: sequence counter and session identifier
#[derive(Debug)]
pub struct RtpFramer {
    seq: AtomicU16,
    ssrc: u32,
}

impl RtpFramer {
    pub fn new(ssrc: u32) -> Self {
        Self {
            seq: AtomicU16::new(0),
            ssrc,
        }
    }

    /// Framer with a random SSRC
    pub fn random() -> Self {
        Self::new(rand::random())
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Header for the next packet; advances the sequence counter
    pub fn next_header(&self, timestamp: u64) -> [u8; RTP_HEADER_LEN] {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let ts = rtp_timestamp(timestamp);

        let mut header = [0u8; RTP_HEADER_LEN];
        header[0] = 0x80;
        header[1] = PAYLOAD_TYPE_MP2T & 0x7f;
        header[2..4].copy_from_slice(&seq.to_be_bytes());
        header[4..8].copy_from_slice(&ts.to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        header
    }
}
