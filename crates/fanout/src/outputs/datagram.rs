//! Datagram output (`udp://`, `rtp://`), unicast or multicast
//!
//! With `float` set, a destination that is not reachable yet (address not
//! available, network unreachable) is retried every 50 ms instead of failing
//! setup, and any write error drops the output back into that retry loop.

use std::io::{self, IoSlice};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use contracts::{query_flag, query_param, DataBlock, OutputConnection, OutputError};
use parking_lot::RwLock;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::iface::resolve_source;
use super::rtp::RtpFramer;
use super::vectorio::send_vectored;
use super::{resolve_endpoint, OutputContext};
use crate::engine::EngineHandle;
use crate::error::FanoutError;

pub const DEFAULT_TTL: u32 = 255;
pub const FLOAT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Where and how to connect a datagram socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialTarget {
    pub source: Option<SocketAddr>,
    pub target: SocketAddr,
    pub ttl: u32,
}

/// Opens connected datagram sockets
#[async_trait]
pub trait DatagramDialer: Send + Sync {
    async fn dial(&self, target: &DialTarget) -> io::Result<UdpSocket>;
}

/// Dialer backed by the OS network stack
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDialer;

#[async_trait]
impl DatagramDialer for SystemDialer {
    async fn dial(&self, target: &DialTarget) -> io::Result<UdpSocket> {
        let bind = target.source.unwrap_or_else(|| match target.target {
            SocketAddr::V4(_) => SocketAddr::from(([0, 0, 0, 0], 0)),
            SocketAddr::V6(_) => SocketAddr::from(([0u16; 8], 0)),
        });
        let socket = UdpSocket::bind(bind).await?;

        match target.target.ip() {
            IpAddr::V4(ip) => {
                socket.set_ttl(target.ttl)?;
                if ip.is_multicast() {
                    socket.set_multicast_ttl_v4(target.ttl)?;
                }
            }
            IpAddr::V6(ip) if ip.is_multicast() => set_multicast_hops_v6(&socket, target.ttl)?,
            IpAddr::V6(_) => {}
        }

        socket.connect(target.target).await?;
        Ok(socket)
    }
}

fn set_multicast_hops_v6(socket: &UdpSocket, hops: u32) -> io::Result<()> {
    socket2::SockRef::from(socket).set_multicast_hops_v6(hops)
}

/// Destination-unreachable class errors on a connected socket
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::PermissionDenied | io::ErrorKind::ConnectionRefused
    )
}

/// Setup errors a floating output retries instead of failing
fn is_float_retryable(e: &io::Error) -> bool {
    if matches!(
        e.kind(),
        io::ErrorKind::AddrNotAvailable | io::ErrorKind::NetworkUnreachable
    ) {
        return true;
    }
    #[cfg(unix)]
    if matches!(e.raw_os_error(), Some(libc::EADDRNOTAVAIL) | Some(libc::ENETUNREACH)) {
        return true;
    }
    false
}

pub struct DatagramOutput {
    name: String,
    flow: String,
    dial: DialTarget,
    float: bool,
    rtp: Option<RtpFramer>,
    socket: RwLock<Option<Arc<UdpSocket>>>,
    reconnecting: AtomicBool,
    engine: EngineHandle,
    cancel: CancellationToken,
    tracker: TaskTracker,
    dialer: Arc<dyn DatagramDialer>,
    self_ref: Weak<DatagramOutput>,
}

impl DatagramOutput {
    /// Parse the URL, connect, and register with the engine
    ///
    /// A floating output whose first connect fails with a retryable error is
    /// returned unregistered; it joins the engine once the retry loop
    /// succeeds.
    #[instrument(name = "datagram_output_setup", skip(url, ctx), fields(flow = %ctx.flow, url = %url))]
    pub async fn setup(url: &Url, ctx: &OutputContext) -> Result<Arc<Self>, FanoutError> {
        info!("Setting up datagram output");
        let raw = url.as_str();

        let rtp = match url.scheme() {
            "rtp" => Some(RtpFramer::random()),
            "udp" => None,
            other => return Err(FanoutError::UnsupportedScheme(other.to_string())),
        };
        let float = query_flag(url, "float");
        let ttl = match query_param(url, "ttl") {
            Some(value) => value
                .parse::<u32>()
                .map_err(|e| FanoutError::invalid_param(raw, "ttl", e.to_string()))?,
            None => DEFAULT_TTL,
        };
        let source = query_param(url, "iface")
            .map(|iface| resolve_source(&iface))
            .transpose()
            .map_err(|e| FanoutError::invalid_param(raw, "iface", e.to_string()))?;
        let target = resolve_endpoint(url).await?;

        let output = Arc::new_cyclic(|self_ref| Self {
            name: raw.to_string(),
            flow: ctx.flow.clone(),
            dial: DialTarget {
                source,
                target,
                ttl,
            },
            float,
            rtp,
            socket: RwLock::new(None),
            reconnecting: AtomicBool::new(false),
            engine: ctx.engine.clone(),
            cancel: ctx.cancel.child_token(),
            tracker: ctx.tracker.clone(),
            dialer: Arc::clone(&ctx.backends.dialer),
            self_ref: self_ref.clone(),
        });

        match output.connect().await {
            Ok(()) => {
                output.engine.add_output(output.clone()).await;
            }
            Err(e) if output.float && is_float_retryable(&e) => {
                info!(error = %e, "Floating datagram output pending, retrying in background");
                output.start_reconnect();
            }
            Err(e) => return Err(FanoutError::output_setup(raw, e.to_string())),
        }

        Ok(output)
    }

    pub fn target(&self) -> SocketAddr {
        self.dial.target
    }

    pub fn is_connected(&self) -> bool {
        self.socket.read().is_some()
    }

    async fn connect(&self) -> io::Result<()> {
        let socket = self.dialer.dial(&self.dial).await?;
        *self.socket.write() = Some(Arc::new(socket));
        Ok(())
    }

    fn start_reconnect(&self) {
        if self.reconnecting.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(this) = self.self_ref.upgrade() else {
            self.reconnecting.store(false, Ordering::Release);
            return;
        };
        self.tracker.spawn(this.reconnect_loop());
    }

    #[instrument(name = "datagram_output_reconnect", skip(self), fields(flow = %self.flow, output = %self.name))]
    async fn reconnect_loop(self: Arc<Self>) {
        while !self.cancel.is_cancelled() {
            match self.connect().await {
                Ok(()) => {
                    info!("Floating datagram output entered active state");
                    self.reconnecting.store(false, Ordering::Release);
                    self.engine.add_output(self.clone()).await;
                    return;
                }
                Err(e) => debug!(error = %e, "Connect attempt failed"),
            }
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(FLOAT_RETRY_INTERVAL) => {}
            }
        }
        self.reconnecting.store(false, Ordering::Release);
    }
}

#[async_trait]
impl OutputConnection for DatagramOutput {
    async fn write(&self, block: &DataBlock) -> Result<usize, OutputError> {
        let socket = self.socket.read().clone();
        let Some(socket) = socket else {
            return Err(OutputError::Closed);
        };

        let result = match &self.rtp {
            Some(framer) => {
                let header = framer.next_header(block.timestamp());
                send_vectored(&socket, &[IoSlice::new(&header), IoSlice::new(block.data())]).await
            }
            None => socket.send(block.data()).await,
        };

        match result {
            Ok(written) => Ok(written),
            Err(e) if is_transient(&e) => Ok(0),
            Err(e) => {
                if self.float && !self.cancel.is_cancelled() {
                    warn!(flow = %self.flow, output = %self.name, error = %e, "Floating datagram output entered inactive state");
                    self.socket.write().take();
                    self.start_reconnect();
                }
                Err(OutputError::Io(e))
            }
        }
    }

    async fn close(&self) -> Result<(), OutputError> {
        self.cancel.cancel();
        self.socket.write().take();
        Ok(())
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}
