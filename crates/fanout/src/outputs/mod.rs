//! OutputConnection variants
//!
//! Each constructor sets up its connection and registers itself with the
//! engine once it is writable. Outputs that recover on their own (floating
//! datagram, streaming caller) re-register after reconnecting.

pub mod asi;
#[cfg(feature = "dektec")]
mod asi_ffi;
pub mod datagram;
pub mod iface;
pub mod rtp;
pub mod stream;
mod vectorio;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use contracts::{endpoint_host, StatsHandler};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use url::Url;

use crate::engine::EngineHandle;
use crate::error::FanoutError;

pub use self::asi::{AsiDriver, AsiDriverFactory, AsiDriverStats, AsiOutput, DektecAsiFactory};
pub use self::datagram::{DatagramDialer, DatagramOutput, DialTarget, SystemDialer};
pub use self::stream::{
    redact_url, setup_stream, StreamCaller, StreamListener, StreamListenerOutput, StreamOptions,
    StreamSocket, StreamTransport, TcpStreamTransport,
};

/// Pluggable I/O backends used by output setup
#[derive(Clone)]
pub struct OutputBackends {
    pub dialer: Arc<dyn DatagramDialer>,
    pub transport: Arc<dyn StreamTransport>,
    pub asi: Arc<dyn AsiDriverFactory>,
}

impl Default for OutputBackends {
    fn default() -> Self {
        Self {
            dialer: Arc::new(SystemDialer),
            transport: Arc::new(TcpStreamTransport),
            asi: Arc::new(DektecAsiFactory),
        }
    }
}

/// Everything an output needs from its flow
#[derive(Clone)]
pub struct OutputContext {
    /// Flow identifier
    pub flow: String,
    /// User-supplied output identifier
    pub output_identifier: String,
    pub engine: EngineHandle,
    /// Flow scope; outputs derive their own child scope
    pub cancel: CancellationToken,
    /// Tracks background tasks (reconnect, accept, stats) of the flow
    pub tracker: TaskTracker,
    pub stats: Arc<dyn StatsHandler>,
    pub stats_interval: Duration,
    pub backends: OutputBackends,
}

/// Resolve the URL's host and port, looking up names if needed
pub(crate) async fn resolve_endpoint(url: &Url) -> Result<SocketAddr, FanoutError> {
    let raw = url.as_str();
    let port = url
        .port()
        .ok_or_else(|| FanoutError::invalid_param(raw, "port", "missing port"))?;
    let host = endpoint_host(url);
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| FanoutError::output_setup(raw, e.to_string()))?
        .next()
        .ok_or_else(|| FanoutError::output_setup(raw, format!("no address for host '{host}'")))
}
