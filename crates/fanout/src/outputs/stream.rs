//! Streaming-transport output (`srt://`)
//!
//! An unspecified host (`srt://:9000`, `srt://0.0.0.0:9000`) selects the
//! listener role: every accepted client becomes its own engine output. A
//! concrete host selects the caller role: one outbound connection that
//! reconnects forever after losing its peer.
//!
//! The wire protocol sits behind [`StreamTransport`]; [`TcpStreamTransport`]
//! is the built-in byte-stream implementation.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use contracts::{
    is_unspecified_host, DataBlock, OutputConnection, OutputError, StatsHandler, StatsRecord,
    StreamStats,
};
use parking_lot::{Mutex, RwLock};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use super::{resolve_endpoint, OutputContext};
use crate::engine::EngineHandle;
use crate::error::FanoutError;

/// Caller reconnect backoff
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

const REDACTED: &str = "REDACTED";

/// Transport options taken from the URL query
pub type StreamOptions = BTreeMap<String, String>;

/// One connected stream
#[async_trait]
pub trait StreamSocket: Send + Sync {
    async fn send(&self, data: &[u8]) -> io::Result<usize>;

    /// Counters since the previous call
    ///
    /// Fails with `NotConnected` once the socket is gone.
    fn stats(&self) -> io::Result<StreamStats>;

    async fn shutdown(&self);
}

#[async_trait]
pub trait StreamListener: Send + Sync {
    async fn accept(&self) -> io::Result<(Arc<dyn StreamSocket>, SocketAddr)>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Wire protocol backend
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn listen(
        &self,
        addr: SocketAddr,
        options: &StreamOptions,
    ) -> io::Result<Box<dyn StreamListener>>;

    async fn connect(
        &self,
        addr: SocketAddr,
        options: &StreamOptions,
    ) -> io::Result<Arc<dyn StreamSocket>>;
}

/// Replace a `passphrase` query value with `REDACTED`
pub fn redact_url(url: &Url) -> Url {
    if !url.query_pairs().any(|(k, _)| k == "passphrase") {
        return url.clone();
    }
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "passphrase" {
                REDACTED.to_string()
            } else {
                v.into_owned()
            };
            (k.into_owned(), v)
        })
        .collect();
    let mut redacted = url.clone();
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted
}

fn transport_options(url: &Url, listener: bool) -> StreamOptions {
    let mut options: StreamOptions = url
        .query_pairs()
        .filter(|(k, _)| k != "identifier")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    options.insert("transtype".into(), "live".into());
    if listener {
        options.insert("mode".into(), "listener".into());
    }
    options
}

/// Errors meaning the connection is already gone
fn is_gone(e: &io::Error) -> bool {
    if e.kind() == io::ErrorKind::NotConnected {
        return true;
    }
    #[cfg(unix)]
    if e.raw_os_error() == Some(libc::EBADF) {
        return true;
    }
    false
}

// ---------------------------------------------------------------------------
// TCP transport
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy)]
pub struct TcpStreamTransport;

#[async_trait]
impl StreamTransport for TcpStreamTransport {
    async fn listen(
        &self,
        addr: SocketAddr,
        options: &StreamOptions,
    ) -> io::Result<Box<dyn StreamListener>> {
        debug!(%addr, ?options, "Binding stream listener");
        let inner = TcpListener::bind(addr).await?;
        Ok(Box::new(TcpStreamListener { inner }))
    }

    async fn connect(
        &self,
        addr: SocketAddr,
        options: &StreamOptions,
    ) -> io::Result<Arc<dyn StreamSocket>> {
        debug!(%addr, ?options, "Connecting stream");
        let stream = TcpStream::connect(addr).await?;
        Ok(Arc::new(TcpStreamSocket::new(stream)?))
    }
}

struct TcpStreamListener {
    inner: TcpListener,
}

#[async_trait]
impl StreamListener for TcpStreamListener {
    async fn accept(&self) -> io::Result<(Arc<dyn StreamSocket>, SocketAddr)> {
        let (stream, peer) = self.inner.accept().await?;
        Ok((Arc::new(TcpStreamSocket::new(stream)?), peer))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

#[derive(Debug)]
struct SendCounters {
    bytes_total: u64,
    packets_total: u64,
    bytes_since: u64,
    packets_since: u64,
    last_poll: Instant,
}

struct TcpStreamSocket {
    stream: tokio::sync::Mutex<TcpStream>,
    counters: Mutex<SendCounters>,
    closed: AtomicBool,
    // Second handle on the same socket, usable while a writer holds the lock
    shutdown_handle: socket2::Socket,
}

impl TcpStreamSocket {
    fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        let shutdown_handle = socket2::SockRef::from(&stream).try_clone()?;
        Ok(Self {
            stream: tokio::sync::Mutex::new(stream),
            counters: Mutex::new(SendCounters {
                bytes_total: 0,
                packets_total: 0,
                bytes_since: 0,
                packets_since: 0,
                last_poll: Instant::now(),
            }),
            closed: AtomicBool::new(false),
            shutdown_handle,
        })
    }
}

#[async_trait]
impl StreamSocket for TcpStreamSocket {
    async fn send(&self, data: &[u8]) -> io::Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(io::ErrorKind::NotConnected.into());
        }
        let result = self.stream.lock().await.write_all(data).await;
        if let Err(e) = result {
            self.closed.store(true, Ordering::Release);
            return Err(e);
        }

        let mut counters = self.counters.lock();
        counters.bytes_total += data.len() as u64;
        counters.packets_total += 1;
        counters.bytes_since += data.len() as u64;
        counters.packets_since += 1;
        Ok(data.len())
    }

    fn stats(&self) -> io::Result<StreamStats> {
        if self.closed.load(Ordering::Acquire) {
            return Err(io::ErrorKind::NotConnected.into());
        }
        let mut counters = self.counters.lock();
        let elapsed = counters.last_poll.elapsed().as_secs_f64();
        let send_rate_mbps = if elapsed > 0.0 {
            counters.bytes_since as f64 * 8.0 / elapsed / 1_000_000.0
        } else {
            0.0
        };
        let stats = StreamStats {
            bytes_sent_total: counters.bytes_total,
            packets_sent_total: counters.packets_total,
            bytes_sent: counters.bytes_since,
            packets_sent: counters.packets_since,
            send_rate_mbps,
            rtt_ms: 0.0,
        };
        counters.bytes_since = 0;
        counters.packets_since = 0;
        counters.last_poll = Instant::now();
        Ok(stats)
    }

    async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Unblocks a writer stuck on a full send buffer
        let _ = self.shutdown_handle.shutdown(std::net::Shutdown::Both);
    }
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// Settings shared by a stream output and every client it spawns
struct StreamCommon {
    flow: String,
    output_identifier: String,
    redacted: Url,
    addr: SocketAddr,
    options: StreamOptions,
    engine: EngineHandle,
    tracker: TaskTracker,
    stats: Arc<dyn StatsHandler>,
    stats_interval: Duration,
    transport: Arc<dyn StreamTransport>,
}

/// Set up a streaming-transport output in the role its URL selects
pub async fn setup_stream(
    url: &Url,
    ctx: &OutputContext,
) -> Result<Arc<dyn OutputConnection>, FanoutError> {
    let output: Arc<dyn OutputConnection> = if is_unspecified_host(url) {
        StreamListenerOutput::setup(url, ctx).await?
    } else {
        StreamCaller::setup(url, ctx).await?
    };
    Ok(output)
}

async fn common_from(
    url: &Url,
    ctx: &OutputContext,
    listener: bool,
) -> Result<Arc<StreamCommon>, FanoutError> {
    if url.scheme() != "srt" {
        return Err(FanoutError::UnsupportedScheme(url.scheme().to_string()));
    }
    let addr = resolve_endpoint(url).await?;
    Ok(Arc::new(StreamCommon {
        flow: ctx.flow.clone(),
        output_identifier: ctx.output_identifier.clone(),
        redacted: redact_url(url),
        addr,
        options: transport_options(url, listener),
        engine: ctx.engine.clone(),
        tracker: ctx.tracker.clone(),
        stats: Arc::clone(&ctx.stats),
        stats_interval: ctx.stats_interval,
        transport: Arc::clone(&ctx.backends.transport),
    }))
}

/// Periodic connection stats for one socket
///
/// Ends silently once the socket reports it is gone.
async fn stats_loop(
    common: Arc<StreamCommon>,
    host: String,
    socket: Arc<dyn StreamSocket>,
    cancel: CancellationToken,
) {
    let period = common.stats_interval;
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match socket.stats() {
            Ok(stats) => common.stats.handle_stats(
                &host,
                &common.output_identifier,
                Some(&common.redacted),
                StatsRecord::Stream(stats),
            ),
            Err(e) if is_gone(&e) => break,
            Err(e) => {
                error!(flow = %common.flow, output = %common.redacted, client = %host, error = %e, "Stream stats poll failed");
                break;
            }
        }
    }
}

type ClientMap = Mutex<HashMap<u64, Arc<StreamClient>>>;

/// Listener role: accepts clients and registers each with the engine
pub struct StreamListenerOutput {
    common: Arc<StreamCommon>,
    cancel: CancellationToken,
    clients: Arc<ClientMap>,
    local_addr: SocketAddr,
}

impl StreamListenerOutput {
    #[instrument(name = "stream_listener_setup", skip(url, ctx), fields(flow = %ctx.flow, url = %redact_url(url)))]
    pub async fn setup(url: &Url, ctx: &OutputContext) -> Result<Arc<Self>, FanoutError> {
        info!("Setting up stream output (listener)");
        let common = common_from(url, ctx, true).await?;
        let listener = common
            .transport
            .listen(common.addr, &common.options)
            .await
            .map_err(|e| FanoutError::output_setup(common.redacted.as_str(), e.to_string()))?;
        let local_addr = listener.local_addr()?;

        let output = Arc::new(Self {
            common: Arc::clone(&common),
            cancel: ctx.cancel.child_token(),
            clients: Arc::new(Mutex::new(HashMap::new())),
            local_addr,
        });
        let tracker = common.tracker.clone();
        tracker.spawn(accept_loop(
            common,
            listener,
            Arc::clone(&output.clients),
            output.cancel.clone(),
        ));
        Ok(output)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[instrument(name = "stream_accept_loop", skip_all, fields(flow = %common.flow, output = %common.redacted))]
async fn accept_loop(
    common: Arc<StreamCommon>,
    listener: Box<dyn StreamListener>,
    clients: Arc<ClientMap>,
    cancel: CancellationToken,
) {
    let mut next_index = 0u64;
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (socket, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(error = %e, "Error in stream listener accept");
                break;
            }
        };

        let client = Arc::new(StreamClient {
            common: Arc::clone(&common),
            index: next_index,
            host: peer.ip().to_string(),
            socket: Arc::clone(&socket),
            clients: Arc::downgrade(&clients),
            cancel: cancel.child_token(),
        });
        next_index += 1;
        info!(client = %client.host, index = client.index, "Stream client connected");

        clients.lock().insert(client.index, Arc::clone(&client));
        common.engine.add_output(client.clone()).await;
        common.tracker.spawn(stats_loop(
            Arc::clone(&common),
            client.host.clone(),
            socket,
            client.cancel.clone(),
        ));
    }

    drop(listener);
    let remaining: Vec<Arc<StreamClient>> = clients.lock().drain().map(|(_, c)| c).collect();
    for client in &remaining {
        let _ = client.close().await;
        common.engine.remove_output(client.clone()).await;
    }
    info!(closed = remaining.len(), "Stream listener stopped");
}

#[async_trait]
impl OutputConnection for StreamListenerOutput {
    /// The listener itself carries no data; its clients do
    async fn write(&self, _block: &DataBlock) -> Result<usize, OutputError> {
        Err(OutputError::Closed)
    }

    async fn close(&self) -> Result<(), OutputError> {
        self.cancel.cancel();
        Ok(())
    }

    fn describe(&self) -> String {
        format!("srt: {}@{}", self.common.addr.ip(), self.common.redacted)
    }

    fn active_connection_count(&self) -> usize {
        self.clients.lock().len()
    }
}

/// One accepted client of a listener
pub struct StreamClient {
    common: Arc<StreamCommon>,
    index: u64,
    host: String,
    socket: Arc<dyn StreamSocket>,
    clients: Weak<ClientMap>,
    cancel: CancellationToken,
}

#[async_trait]
impl OutputConnection for StreamClient {
    async fn write(&self, block: &DataBlock) -> Result<usize, OutputError> {
        if self.cancel.is_cancelled() {
            return Err(OutputError::Closed);
        }
        match self.socket.send(block.data()).await {
            Ok(written) => Ok(written),
            Err(e) => {
                info!(flow = %self.common.flow, output = %self.common.redacted, client = %self.host, "Stream client disconnected");
                if let Some(clients) = self.clients.upgrade() {
                    clients.lock().remove(&self.index);
                }
                self.cancel.cancel();
                self.socket.shutdown().await;
                Err(OutputError::Disconnected(e.to_string()))
            }
        }
    }

    async fn close(&self) -> Result<(), OutputError> {
        self.cancel.cancel();
        self.socket.shutdown().await;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("srt: {}@{}", self.host, self.common.redacted)
    }
}

/// Caller role: one outbound connection with unbounded reconnect
pub struct StreamCaller {
    common: Arc<StreamCommon>,
    cancel: CancellationToken,
    socket: RwLock<Option<Arc<dyn StreamSocket>>>,
    reconnecting: AtomicBool,
    self_ref: Weak<StreamCaller>,
}

impl StreamCaller {
    /// Connect and register; a refused first connect moves to the background
    /// reconnect loop instead of failing setup
    #[instrument(name = "stream_caller_setup", skip(url, ctx), fields(flow = %ctx.flow, url = %redact_url(url)))]
    pub async fn setup(url: &Url, ctx: &OutputContext) -> Result<Arc<Self>, FanoutError> {
        info!("Setting up stream output (caller)");
        let common = common_from(url, ctx, false).await?;
        let output = Arc::new_cyclic(|self_ref| Self {
            common,
            cancel: ctx.cancel.child_token(),
            socket: RwLock::new(None),
            reconnecting: AtomicBool::new(false),
            self_ref: self_ref.clone(),
        });

        match output.connect().await {
            Ok(()) => {
                info!(server = %output.common.addr, "Stream connected");
                output.common.engine.add_output(output.clone()).await;
            }
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                warn!(error = %e, "Stream server refused connection, reconnecting in background");
                output.start_reconnect();
            }
            Err(e) => {
                return Err(FanoutError::output_setup(
                    output.common.redacted.as_str(),
                    e.to_string(),
                ))
            }
        }
        Ok(output)
    }

    pub fn is_connected(&self) -> bool {
        self.socket.read().is_some()
    }

    async fn connect(&self) -> io::Result<()> {
        let socket = self
            .common
            .transport
            .connect(self.common.addr, &self.common.options)
            .await?;
        *self.socket.write() = Some(Arc::clone(&socket));
        self.common.tracker.spawn(stats_loop(
            Arc::clone(&self.common),
            self.common.addr.ip().to_string(),
            socket,
            self.cancel.clone(),
        ));
        Ok(())
    }

    fn start_reconnect(&self) {
        if self.cancel.is_cancelled() || self.reconnecting.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(this) = self.self_ref.upgrade() else {
            self.reconnecting.store(false, Ordering::Release);
            return;
        };
        self.common.tracker.spawn(this.reconnect_loop());
    }

    #[instrument(name = "stream_caller_reconnect", skip(self), fields(flow = %self.common.flow, output = %self.common.redacted))]
    async fn reconnect_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(RECONNECT_INTERVAL) => {}
            }
            match self.connect().await {
                Ok(()) => {
                    info!(server = %self.common.addr, "Stream reconnected");
                    self.reconnecting.store(false, Ordering::Release);
                    self.common.engine.add_output(self.clone()).await;
                    return;
                }
                Err(e) => debug!(error = %e, "Reconnect attempt failed"),
            }
        }
        self.reconnecting.store(false, Ordering::Release);
    }
}

#[async_trait]
impl OutputConnection for StreamCaller {
    async fn write(&self, block: &DataBlock) -> Result<usize, OutputError> {
        let socket = self.socket.read().clone();
        let Some(socket) = socket else {
            return Err(OutputError::Closed);
        };
        match socket.send(block.data()).await {
            Ok(written) => Ok(written),
            Err(e) => {
                info!(flow = %self.common.flow, output = %self.common.redacted, server = %self.common.addr, error = %e, "Lost connection to stream server");
                self.socket.write().take();
                socket.shutdown().await;
                self.start_reconnect();
                Err(OutputError::Disconnected(e.to_string()))
            }
        }
    }

    async fn close(&self) -> Result<(), OutputError> {
        self.cancel.cancel();
        let socket = self.socket.write().take();
        if let Some(socket) = socket {
            socket.shutdown().await;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("srt: {}", self.common.redacted)
    }
}
