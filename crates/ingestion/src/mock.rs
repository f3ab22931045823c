//! Mock 接收器
//!
//! 用于无真实输入传输环境的测试：记录所有生命周期调用，
//! 并允许测试直接向数据通道注入数据块。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use contracts::{
    parse_endpoint_url, ContractError, DataBlock, PeerId, Receiver, ReceiverFactory, ReceiverFlow, ReceiverSettings,
};
use parking_lot::Mutex;
use tracing::debug;
use url::Url;

use crate::config::DATA_CHANNEL_CAPACITY;
use crate::error::IngestionError;

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Mock 接收器
pub struct MockReceiver {
    instance: u64,
    settings: ReceiverSettings,
    tx: async_channel::Sender<DataBlock>,
    rx: async_channel::Receiver<DataBlock>,
    peers: Mutex<HashMap<PeerId, Url>>,
    removed: Mutex<Vec<Url>>,
    next_peer: AtomicU64,
    configured_port: Mutex<Option<u16>>,
    started: AtomicBool,
    destroyed: AtomicBool,
    fail_start: AtomicBool,
    failing_peers: Mutex<HashSet<String>>,
}

impl MockReceiver {
    pub fn new(settings: ReceiverSettings) -> Self {
        let (tx, rx) = async_channel::bounded(DATA_CHANNEL_CAPACITY);
        Self {
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
            settings,
            tx,
            rx,
            peers: Mutex::new(HashMap::new()),
            removed: Mutex::new(Vec::new()),
            next_peer: AtomicU64::new(0),
            configured_port: Mutex::new(None),
            started: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            failing_peers: Mutex::new(HashSet::new()),
        }
    }

    /// 进程内唯一实例号，用于判断接收器是否被重建
    pub fn instance(&self) -> u64 {
        self.instance
    }

    pub fn settings(&self) -> &ReceiverSettings {
        &self.settings
    }

    /// 数据注入端
    pub fn sender(&self) -> async_channel::Sender<DataBlock> {
        self.tx.clone()
    }

    /// 当前输入 URL（按添加顺序）
    pub fn peer_urls(&self) -> Vec<String> {
        let peers = self.peers.lock();
        let mut ids: Vec<_> = peers.keys().copied().collect();
        ids.sort_unstable();
        ids.iter().map(|id| peers[id].to_string()).collect()
    }

    pub fn removed_urls(&self) -> Vec<String> {
        self.removed.lock().iter().map(Url::to_string).collect()
    }

    pub fn configured_port(&self) -> Option<u16> {
        *self.configured_port.lock()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// 令下一次 start 失败
    pub fn fail_start(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }

    /// 令指定 URL 的 add_peer 失败
    pub fn fail_peer(&self, url: &str) {
        let normalized = parse_endpoint_url(url)
            .map(String::from)
            .unwrap_or_else(|_| url.to_string());
        self.failing_peers.lock().insert(normalized);
    }
}

#[async_trait]
impl Receiver for MockReceiver {
    async fn start(&self) -> Result<(), ContractError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(ContractError::receiver("mock start failure"));
        }
        self.started.store(true, Ordering::SeqCst);
        debug!(flow = %self.settings.identifier, instance = self.instance, "mock receiver started");
        Ok(())
    }

    async fn add_peer(&self, url: &Url) -> Result<PeerId, ContractError> {
        if !self.is_started() {
            return Err(IngestionError::NotStarted.into());
        }
        if self.failing_peers.lock().contains(url.as_str()) {
            return Err(ContractError::peer_setup(url.as_str(), "mock peer failure"));
        }
        let peer = self.next_peer.fetch_add(1, Ordering::Relaxed);
        self.peers.lock().insert(peer, url.clone());
        Ok(peer)
    }

    async fn remove_peer(&self, peer: PeerId) -> Result<(), ContractError> {
        let url = self
            .peers
            .lock()
            .remove(&peer)
            .ok_or(IngestionError::UnknownPeer(peer))?;
        self.removed.lock().push(url);
        Ok(())
    }

    async fn configure_flow(&self, destination_port: u16) -> Result<ReceiverFlow, ContractError> {
        if self.is_destroyed() {
            return Err(IngestionError::Destroyed.into());
        }
        *self.configured_port.lock() = Some(destination_port);
        Ok(ReceiverFlow::new(destination_port, self.rx.clone()))
    }

    async fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        self.peers.lock().clear();
        self.tx.close();
        debug!(flow = %self.settings.identifier, instance = self.instance, "mock receiver destroyed");
    }
}

/// Mock 接收器工厂，记录创建的全部接收器
#[derive(Default)]
pub struct MockReceiverFactory {
    created: Mutex<Vec<Arc<MockReceiver>>>,
    fail_create: AtomicBool,
}

impl MockReceiverFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 令后续 create 失败
    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn created(&self) -> Vec<Arc<MockReceiver>> {
        self.created.lock().clone()
    }

    /// 指定 flow 最近创建的接收器
    pub fn latest(&self, identifier: &str) -> Option<Arc<MockReceiver>> {
        self.created
            .lock()
            .iter()
            .rev()
            .find(|r| r.settings.identifier == identifier)
            .cloned()
    }
}

impl ReceiverFactory for MockReceiverFactory {
    fn create(&self, settings: ReceiverSettings) -> Result<Arc<dyn Receiver>, ContractError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ContractError::receiver("mock create failure"));
        }
        let receiver = Arc::new(MockReceiver::new(settings));
        self.created.lock().push(Arc::clone(&receiver));
        Ok(receiver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{NoopStats, TransportProfile};
    use std::time::Duration;

    fn settings(identifier: &str) -> ReceiverSettings {
        ReceiverSettings {
            identifier: identifier.to_string(),
            profile: TransportProfile::Simple,
            recovery_latency_ms: 1000,
            stats: Arc::new(NoopStats),
            stats_interval: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_mock_receiver_lifecycle() {
        let factory = MockReceiverFactory::new();
        let receiver = factory.create(settings("a")).unwrap();
        let mock = factory.latest("a").unwrap();

        let url = Url::parse("rist://@0.0.0.0:5000").unwrap();
        assert!(receiver.add_peer(&url).await.is_err());

        receiver.start().await.unwrap();
        let peer = receiver.add_peer(&url).await.unwrap();
        assert_eq!(mock.peer_urls(), vec![url.to_string()]);

        let flow = receiver.configure_flow(7).await.unwrap();
        assert_eq!(mock.configured_port(), Some(7));

        mock.sender().send(DataBlock::new(vec![1u8, 2, 3], 0)).await.unwrap();
        assert_eq!(flow.data_channel().recv().await.unwrap().len(), 3);

        receiver.remove_peer(peer).await.unwrap();
        assert_eq!(mock.removed_urls(), vec![url.to_string()]);
        assert!(receiver.remove_peer(peer).await.is_err());

        receiver.destroy().await;
        assert!(mock.is_destroyed());
        assert!(flow.data_channel().recv().await.is_err());
    }

    #[tokio::test]
    async fn test_mock_failure_injection() {
        let factory = MockReceiverFactory::new();
        factory.fail_create(true);
        assert!(factory.create(settings("a")).is_err());
        factory.fail_create(false);

        let receiver = factory.create(settings("a")).unwrap();
        let mock = factory.latest("a").unwrap();
        mock.fail_peer("rist://@0.0.0.0:5000");
        receiver.start().await.unwrap();
        let bad = Url::parse("rist://@0.0.0.0:5000").unwrap();
        let good = Url::parse("rist://@0.0.0.0:5001").unwrap();
        assert!(receiver.add_peer(&bad).await.is_err());
        assert!(receiver.add_peer(&good).await.is_ok());

        let other = factory.create(settings("b")).unwrap();
        assert_ne!(factory.latest("b").unwrap().instance(), mock.instance());
        factory.latest("b").unwrap().fail_start();
        assert!(other.start().await.is_err());
    }
}
