//! DatagramReceiver - best-effort UDP/RTP input receiver
//!
//! Each configured input URL binds one socket served by its own receive
//! task. RTP v2 datagrams are stripped of their header and deduplicated
//! across peers by sequence number; raw datagrams are numbered locally.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_channel::{Sender, TrySendError};
use async_trait::async_trait;
use bytes::Bytes;
use contracts::{
    endpoint_host, ContractError, DataBlock, InputFlowStats, PeerId, Receiver, ReceiverFactory,
    ReceiverFlow, ReceiverSettings, StatsHandler, StatsRecord,
};
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::{IngestionMetrics, MetricsSnapshot, ReceiverConfig};
use crate::error::{IngestionError, Result};
use crate::rtp::{parse_rtp, Admission, SequenceWindow};

/// Current wall clock as 32.32 fixed-point seconds
fn ntp_timestamp_now() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let fraction = (u64::from(now.subsec_nanos()) << 32) / 1_000_000_000;
    (now.as_secs() << 32) | fraction
}

/// Local bind address for an input URL
///
/// `@host:port` and plain `host:port` both bind; a multicast host binds the
/// wildcard address and joins the group.
fn bind_target(url: &Url) -> Result<(SocketAddr, Option<IpAddr>)> {
    let raw = url.as_str();
    let port = url
        .port()
        .ok_or_else(|| IngestionError::invalid_url(raw, "missing port"))?;
    let host = endpoint_host(url);
    let ip: IpAddr = if host.is_empty() {
        IpAddr::from([0, 0, 0, 0])
    } else {
        host.parse()
            .map_err(|_| IngestionError::invalid_url(raw, format!("host '{host}' is not an ip address")))?
    };

    if ip.is_multicast() {
        let any = match ip {
            IpAddr::V4(_) => IpAddr::from([0, 0, 0, 0]),
            IpAddr::V6(_) => IpAddr::from([0u16; 8]),
        };
        Ok((SocketAddr::new(any, port), Some(ip)))
    } else {
        Ok((SocketAddr::new(ip, port), None))
    }
}

/// State shared between the receiver handle and its peer tasks
struct Shared {
    identifier: String,
    tx: Sender<DataBlock>,
    metrics: IngestionMetrics,
    window: Mutex<SequenceWindow>,
    raw_seq: AtomicU32,
    active_peers: AtomicU32,
}

impl Shared {
    fn forward(&self, payload: Bytes, seq: u32) -> bool {
        let len = payload.len();
        let block = DataBlock::builder(payload)
            .seq(seq)
            .timestamp(ntp_timestamp_now())
            .build();
        match self.tx.try_send(block) {
            Ok(()) => {
                self.metrics.record_received(len);
                true
            }
            Err(TrySendError::Full(_)) => {
                self.metrics.record_dropped();
                metrics::counter!("relay_input_dropped_total", "flow" => self.identifier.clone())
                    .increment(1);
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Returns false once the data channel is closed
    fn on_datagram(&self, datagram: &[u8]) -> bool {
        match parse_rtp(datagram) {
            Some((seq16, range)) => match self.window.lock().admit(seq16) {
                Admission::Deliver { seq, lost } => {
                    if lost > 0 {
                        self.metrics.record_lost(lost);
                    }
                    self.forward(Bytes::copy_from_slice(&datagram[range]), seq)
                }
                Admission::Stale => {
                    self.metrics.record_duplicate();
                    true
                }
            },
            None => {
                let seq = self.raw_seq.fetch_add(1, Ordering::Relaxed);
                self.forward(Bytes::copy_from_slice(datagram), seq)
            }
        }
    }
}

struct Peer {
    url: Url,
    cancel: CancellationToken,
}

/// Best-effort datagram receiver
pub struct DatagramReceiver {
    settings: ReceiverSettings,
    config: ReceiverConfig,
    shared: Arc<Shared>,
    rx: async_channel::Receiver<DataBlock>,
    peers: Mutex<HashMap<PeerId, Peer>>,
    next_peer: AtomicU64,
    started: AtomicBool,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl DatagramReceiver {
    pub fn new(settings: ReceiverSettings, config: ReceiverConfig) -> Self {
        let (tx, rx) = async_channel::bounded(config.channel_capacity);
        let shared = Arc::new(Shared {
            identifier: settings.identifier.clone(),
            tx,
            metrics: IngestionMetrics::new(),
            window: Mutex::new(SequenceWindow::new()),
            raw_seq: AtomicU32::new(0),
            active_peers: AtomicU32::new(0),
        });
        Self {
            settings,
            config,
            shared,
            rx,
            peers: Mutex::new(HashMap::new()),
            next_peer: AtomicU64::new(0),
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    /// Local address a peer is bound to
    pub fn peer_url(&self, peer: PeerId) -> Option<Url> {
        self.peers.lock().get(&peer).map(|p| p.url.clone())
    }

    async fn bind(&self, url: &Url) -> Result<UdpSocket> {
        let (addr, group) = bind_target(url)?;
        let bind_err = |source| IngestionError::Bind {
            url: url.to_string(),
            source,
        };
        let socket = UdpSocket::bind(addr).await.map_err(bind_err)?;
        match group {
            Some(IpAddr::V4(group)) => socket
                .join_multicast_v4(group, std::net::Ipv4Addr::UNSPECIFIED)
                .map_err(bind_err)?,
            Some(IpAddr::V6(group)) => socket.join_multicast_v6(&group, 0).map_err(bind_err)?,
            None => {}
        }
        Ok(socket)
    }
}

/// Input stats for one interval of counter deltas
fn input_flow_stats(
    cname: &str,
    peers: u32,
    delta: &MetricsSnapshot,
    elapsed_secs: f64,
) -> InputFlowStats {
    let expected = delta.packets_received + delta.packets_lost;
    let quality = if expected == 0 {
        100.0
    } else {
        delta.packets_received as f64 * 100.0 / expected as f64
    };
    let bandwidth_bps = if elapsed_secs > 0.0 {
        (delta.bytes_received as f64 * 8.0 / elapsed_secs) as u64
    } else {
        0
    };
    InputFlowStats {
        cname: cname.to_string(),
        peers,
        bandwidth_bps,
        received: delta.packets_received,
        missing: delta.packets_lost,
        recovered: delta.duplicates,
        lost: delta.packets_lost,
        quality,
    }
}

async fn stats_loop(
    shared: Arc<Shared>,
    stats: Arc<dyn StatsHandler>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut previous = shared.metrics.snapshot();
    let mut previous_at = Instant::now();
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let current = shared.metrics.snapshot();
        let record = input_flow_stats(
            &shared.identifier,
            shared.active_peers.load(Ordering::Relaxed),
            &current.since(&previous),
            previous_at.elapsed().as_secs_f64(),
        );
        previous = current;
        previous_at = Instant::now();
        stats.handle_stats("", &shared.identifier, None, StatsRecord::InputFlow(record));
    }
}

#[instrument(name = "datagram_peer_loop", skip(shared, socket, cancel, buffer_size), fields(flow = %shared.identifier))]
async fn peer_loop(
    peer: PeerId,
    shared: Arc<Shared>,
    socket: UdpSocket,
    cancel: CancellationToken,
    buffer_size: usize,
) {
    let mut buf = vec![0u8; buffer_size];
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => received,
        };
        match received {
            Ok((len, _from)) => {
                if len == 0 {
                    continue;
                }
                if !shared.on_datagram(&buf[..len]) {
                    debug!("Data channel closed");
                    break;
                }
            }
            Err(e) => warn!(error = %e, "Input receive error"),
        }
    }
    debug!("Peer receive loop stopped");
}

#[async_trait]
impl Receiver for DatagramReceiver {
    #[instrument(name = "datagram_receiver_start", skip(self), fields(flow = %self.settings.identifier))]
    async fn start(&self) -> std::result::Result<(), ContractError> {
        if self.cancel.is_cancelled() {
            return Err(IngestionError::Destroyed.into());
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!(
            profile = ?self.settings.profile,
            latency_ms = self.settings.recovery_latency_ms,
            "Receiver started"
        );

        self.tracker.spawn(stats_loop(
            Arc::clone(&self.shared),
            Arc::clone(&self.settings.stats),
            self.settings.stats_interval,
            self.cancel.clone(),
        ));
        Ok(())
    }

    #[instrument(name = "datagram_receiver_add_peer", skip(self, url), fields(flow = %self.settings.identifier, url = %url))]
    async fn add_peer(&self, url: &Url) -> std::result::Result<PeerId, ContractError> {
        if !self.started.load(Ordering::Acquire) {
            return Err(IngestionError::NotStarted.into());
        }
        let socket = self.bind(url).await?;
        let peer = self.next_peer.fetch_add(1, Ordering::Relaxed);
        let cancel = self.cancel.child_token();
        info!(peer, local = ?socket.local_addr().ok(), "Input peer bound");

        self.tracker.spawn(peer_loop(
            peer,
            Arc::clone(&self.shared),
            socket,
            cancel.clone(),
            self.config.recv_buffer_size,
        ));
        self.peers.lock().insert(
            peer,
            Peer {
                url: url.clone(),
                cancel,
            },
        );
        self.shared.active_peers.fetch_add(1, Ordering::Relaxed);
        Ok(peer)
    }

    async fn remove_peer(&self, peer: PeerId) -> std::result::Result<(), ContractError> {
        let removed = self.peers.lock().remove(&peer);
        match removed {
            Some(p) => {
                p.cancel.cancel();
                self.shared.active_peers.fetch_sub(1, Ordering::Relaxed);
                info!(flow = %self.settings.identifier, peer, url = %p.url, "Input peer removed");
                Ok(())
            }
            None => Err(IngestionError::UnknownPeer(peer).into()),
        }
    }

    async fn configure_flow(
        &self,
        destination_port: u16,
    ) -> std::result::Result<ReceiverFlow, ContractError> {
        if self.cancel.is_cancelled() {
            return Err(IngestionError::Destroyed.into());
        }
        debug!(flow = %self.settings.identifier, destination_port, "Flow configured");
        Ok(ReceiverFlow::new(destination_port, self.rx.clone()))
    }

    #[instrument(name = "datagram_receiver_destroy", skip(self), fields(flow = %self.settings.identifier))]
    async fn destroy(&self) {
        self.cancel.cancel();
        self.peers.lock().clear();
        self.shared.active_peers.store(0, Ordering::Relaxed);
        self.tracker.close();
        self.tracker.wait().await;
        self.shared.tx.close();
        info!("Receiver destroyed");
    }
}

/// Default receiver factory
#[derive(Debug, Default, Clone)]
pub struct DatagramReceiverFactory {
    config: ReceiverConfig,
}

impl DatagramReceiverFactory {
    pub fn new(config: ReceiverConfig) -> Self {
        Self { config }
    }
}

impl ReceiverFactory for DatagramReceiverFactory {
    fn create(
        &self,
        settings: ReceiverSettings,
    ) -> std::result::Result<Arc<dyn Receiver>, ContractError> {
        Ok(Arc::new(DatagramReceiver::new(settings, self.config.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{parse_endpoint_url, NoopStats, TransportProfile};
    use std::time::Duration;

    fn settings(stats: Arc<dyn StatsHandler>) -> ReceiverSettings {
        ReceiverSettings {
            identifier: "input-test".to_string(),
            profile: TransportProfile::Main,
            recovery_latency_ms: 1000,
            stats,
            stats_interval: Duration::from_millis(50),
        }
    }

    async fn started_receiver() -> DatagramReceiver {
        let receiver = DatagramReceiver::new(settings(Arc::new(NoopStats)), ReceiverConfig::default());
        receiver.start().await.unwrap();
        receiver
    }

    /// Bind a peer on an ephemeral loopback port and return its address
    async fn add_loopback_peer(receiver: &DatagramReceiver) -> (PeerId, SocketAddr) {
        // Reserve a free port first; the receiver binds it right after
        let port = UdpSocket::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap().port();
        let url = parse_endpoint_url(&format!("rist://@127.0.0.1:{port}")).unwrap();
        let peer = receiver.add_peer(&url).await.unwrap();
        (peer, SocketAddr::from(([127, 0, 0, 1], port)))
    }

    fn rtp(seq: u16, payload: &[u8]) -> Vec<u8> {
        let mut packet = vec![0x80, 0x21];
        packet.extend_from_slice(&seq.to_be_bytes());
        packet.extend_from_slice(&[0; 8]);
        packet.extend_from_slice(payload);
        packet
    }

    async fn recv(flow: &ReceiverFlow) -> DataBlock {
        tokio::time::timeout(Duration::from_secs(2), flow.data_channel().recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_bind_target_forms() {
        let url = parse_endpoint_url("rist://@:5000").unwrap();
        assert_eq!(bind_target(&url).unwrap().0, "0.0.0.0:5000".parse().unwrap());

        let url = parse_endpoint_url("udp://@239.1.1.1:5000").unwrap();
        let (addr, group) = bind_target(&url).unwrap();
        assert_eq!(addr, "0.0.0.0:5000".parse().unwrap());
        assert_eq!(group, Some("239.1.1.1".parse().unwrap()));

        let url = parse_endpoint_url("rist://@example.com:5000").unwrap();
        assert!(matches!(bind_target(&url), Err(IngestionError::InvalidUrl { .. })));
    }

    #[tokio::test]
    async fn test_raw_datagrams_get_local_sequence() {
        let receiver = started_receiver().await;
        let (_, addr) = add_loopback_peer(&receiver).await;
        let flow = receiver.configure_flow(0).await.unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for _ in 0..3 {
            sender.send_to(&[0x47u8; 188], addr).await.unwrap();
        }
        for expected in 0..3u32 {
            let block = recv(&flow).await;
            assert_eq!(block.seq(), expected);
            assert_eq!(block.len(), 188);
            assert!(block.timestamp() > 0);
        }
        receiver.destroy().await;
    }

    #[tokio::test]
    async fn test_rtp_is_stripped_and_deduplicated_across_peers() {
        let receiver = started_receiver().await;
        let (_, first) = add_loopback_peer(&receiver).await;
        let (_, second) = add_loopback_peer(&receiver).await;
        assert_eq!(receiver.peer_count(), 2);
        let flow = receiver.configure_flow(0).await.unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(&rtp(100, &[0x47, 1]), first).await.unwrap();
        let block = recv(&flow).await;
        assert_eq!(block.seq(), 100);
        assert_eq!(block.data(), &[0x47, 1]);

        // Same packet over the second path is dropped
        sender.send_to(&rtp(100, &[0x47, 1]), second).await.unwrap();
        sender.send_to(&rtp(101, &[0x47, 2]), second).await.unwrap();
        let block = recv(&flow).await;
        assert_eq!(block.seq(), 101);
        assert_eq!(receiver.metrics().duplicates, 1);
        receiver.destroy().await;
    }

    #[tokio::test]
    async fn test_remove_peer_and_unknown_peer() {
        let receiver = started_receiver().await;
        let (peer, _) = add_loopback_peer(&receiver).await;
        receiver.remove_peer(peer).await.unwrap();
        assert_eq!(receiver.peer_count(), 0);
        assert!(receiver.remove_peer(peer).await.is_err());
        receiver.destroy().await;
    }

    #[tokio::test]
    async fn test_add_peer_requires_start() {
        let receiver = DatagramReceiver::new(settings(Arc::new(NoopStats)), ReceiverConfig::default());
        let url = parse_endpoint_url("rist://@127.0.0.1:0").unwrap();
        assert!(receiver.add_peer(&url).await.is_err());
    }

    #[tokio::test]
    async fn test_destroy_closes_data_channel() {
        let receiver = started_receiver().await;
        let flow = receiver.configure_flow(0).await.unwrap();
        receiver.destroy().await;
        assert!(flow.data_channel().recv().await.is_err());
        assert!(receiver.configure_flow(0).await.is_err());
    }

    #[tokio::test]
    async fn test_full_channel_drops() {
        let config = ReceiverConfig {
            channel_capacity: 2,
            ..ReceiverConfig::default()
        };
        let receiver = DatagramReceiver::new(settings(Arc::new(NoopStats)), config);
        receiver.start().await.unwrap();
        let (_, addr) = add_loopback_peer(&receiver).await;

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for _ in 0..5 {
            sender.send_to(&[0x47u8; 188], addr).await.unwrap();
        }
        for _ in 0..200 {
            let m = receiver.metrics();
            if m.packets_received + m.packets_dropped == 5 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let m = receiver.metrics();
        assert_eq!(m.packets_received, 2);
        assert_eq!(m.packets_dropped, 3);
        receiver.destroy().await;
    }

    #[test]
    fn test_input_flow_stats() {
        let delta = MetricsSnapshot {
            packets_received: 90,
            bytes_received: 125_000,
            packets_dropped: 0,
            duplicates: 4,
            packets_lost: 10,
        };
        let stats = input_flow_stats("flow", 2, &delta, 1.0);
        assert_eq!(stats.peers, 2);
        assert_eq!(stats.bandwidth_bps, 1_000_000);
        assert_eq!(stats.lost, 10);
        assert_eq!(stats.recovered, 4);
        assert!((stats.quality - 90.0).abs() < f64::EPSILON);
    }
}
