//! OutputConnection trait - fan-out destination interface

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::DataBlock;

/// Write-path failure of an output
#[derive(Debug, Error)]
pub enum OutputError {
    /// Output was closed locally
    #[error("output closed")]
    Closed,

    /// Peer went away
    #[error("connection lost: {0}")]
    Disconnected(String),

    /// Socket level error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Hardware driver reported an error
    #[error("driver error: {0}")]
    Driver(String),
}

/// Writable fan-out destination
///
/// Implementations own their reconnect policy. A write error tells the
/// engine to evict this registration; outputs that recover re-register
/// themselves once reconnected.
#[async_trait]
pub trait OutputConnection: Send + Sync {
    /// Write one block, returning bytes written
    async fn write(&self, block: &DataBlock) -> Result<usize, OutputError>;

    /// Tear down the connection and stop any background task
    async fn close(&self) -> Result<(), OutputError>;

    /// Human readable description, never contains secrets
    fn describe(&self) -> String;

    /// Connected peers behind this output
    fn active_connection_count(&self) -> usize {
        1
    }
}

/// Identity comparison of two output registrations
pub fn same_output(a: &Arc<dyn OutputConnection>, b: &Arc<dyn OutputConnection>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
