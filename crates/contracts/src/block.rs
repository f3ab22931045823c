//! DataBlock - one unit of received payload shared across fan-out targets.
//!
//! Every clone is one reference. The backing payload and the release hook
//! belong to a single shared allocation; the hook runs exactly once, when the
//! last reference is dropped.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

type ReleaseHook = Box<dyn FnOnce() + Send + Sync>;

struct BlockInner {
    payload: Bytes,
    seq: u32,
    discontinuity: bool,
    timestamp: u64,
    release: Option<ReleaseHook>,
}

impl Drop for BlockInner {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Reference-counted received payload
#[derive(Clone)]
pub struct DataBlock {
    inner: Arc<BlockInner>,
}

impl DataBlock {
    /// Block with payload and sequence number, no discontinuity, zero timestamp
    pub fn new(payload: impl Into<Bytes>, seq: u32) -> Self {
        Self::builder(payload).seq(seq).build()
    }

    pub fn builder(payload: impl Into<Bytes>) -> DataBlockBuilder {
        DataBlockBuilder {
            payload: payload.into(),
            seq: 0,
            discontinuity: false,
            timestamp: 0,
            release: None,
        }
    }

    pub fn payload(&self) -> &Bytes {
        &self.inner.payload
    }

    pub fn data(&self) -> &[u8] {
        &self.inner.payload
    }

    pub fn len(&self) -> usize {
        self.inner.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.payload.is_empty()
    }

    pub fn seq(&self) -> u32 {
        self.inner.seq
    }

    /// Receiver marked a break before this block
    pub fn discontinuity(&self) -> bool {
        self.inner.discontinuity
    }

    /// Capture timestamp, NTP 32.32 fixed point
    pub fn timestamp(&self) -> u64 {
        self.inner.timestamp
    }

    /// Number of live references to this block
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl fmt::Debug for DataBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataBlock")
            .field("seq", &self.inner.seq)
            .field("len", &self.inner.payload.len())
            .field("discontinuity", &self.inner.discontinuity)
            .field("timestamp", &self.inner.timestamp)
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// Builder for [`DataBlock`]
pub struct DataBlockBuilder {
    payload: Bytes,
    seq: u32,
    discontinuity: bool,
    timestamp: u64,
    release: Option<ReleaseHook>,
}

impl DataBlockBuilder {
    pub fn seq(mut self, seq: u32) -> Self {
        self.seq = seq;
        self
    }

    pub fn discontinuity(mut self, discontinuity: bool) -> Self {
        self.discontinuity = discontinuity;
        self
    }

    pub fn timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Hook invoked once when the last reference is released
    pub fn on_release(mut self, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.release = Some(Box::new(release));
        self
    }

    pub fn build(self) -> DataBlock {
        DataBlock {
            inner: Arc::new(BlockInner {
                payload: self.payload,
                seq: self.seq,
                discontinuity: self.discontinuity,
                timestamp: self.timestamp,
                release: self.release,
            }),
        }
    }
}
