//! RTP de-framing and sequence handling for received datagrams

use std::ops::Range;

const RTP_VERSION: u8 = 2;
const RTP_FIXED_HEADER: usize = 12;

/// Sequence number and payload range of an RTP v2 packet
///
/// Returns `None` for anything that is not a well-formed RTP v2 packet.
pub fn parse_rtp(buf: &[u8]) -> Option<(u16, Range<usize>)> {
    if buf.len() < RTP_FIXED_HEADER || buf[0] >> 6 != RTP_VERSION {
        return None;
    }
    let csrc_count = usize::from(buf[0] & 0x0f);
    let has_extension = buf[0] & 0x10 != 0;
    let has_padding = buf[0] & 0x20 != 0;

    let mut start = RTP_FIXED_HEADER + csrc_count * 4;
    if has_extension {
        let words = buf.get(start + 2..start + 4)?;
        start += 4 + usize::from(u16::from_be_bytes([words[0], words[1]])) * 4;
    }
    let mut end = buf.len();
    if has_padding {
        end = end.checked_sub(usize::from(buf[end - 1]))?;
    }
    if start > end {
        return None;
    }

    let seq = u16::from_be_bytes([buf[2], buf[3]]);
    Some((seq, start..end))
}

/// Outcome of offering a sequence number to a [`SequenceWindow`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// New packet; `lost` sequence numbers were skipped before it
    Deliver { seq: u32, lost: u64 },
    /// Already delivered or older than the newest delivered packet
    Stale,
}

/// Extends 16-bit RTP sequence numbers to `u32` and drops duplicates
///
/// Shared by all peers of a receiver so a packet arriving on several paths
/// is delivered once.
#[derive(Debug, Default, Clone)]
pub struct SequenceWindow {
    last: Option<u32>,
}

impl SequenceWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admit(&mut self, seq: u16) -> Admission {
        let Some(last) = self.last else {
            self.last = Some(u32::from(seq));
            return Admission::Deliver {
                seq: u32::from(seq),
                lost: 0,
            };
        };

        let delta = seq.wrapping_sub(last as u16) as i16;
        if delta <= 0 {
            return Admission::Stale;
        }
        let extended = last.wrapping_add_signed(i32::from(delta));
        self.last = Some(extended);
        Admission::Deliver {
            seq: extended,
            lost: u64::from(delta as u16 - 1),
        }
    }
}
