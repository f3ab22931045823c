//! Receiver trait - input transport collaborator
//!
//! The reliable input transport is external. A flow drives it through this
//! narrow interface and consumes blocks from the channel it exposes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::{ContractError, DataBlock, StatsHandler, TransportProfile};

/// Handle of a configured input peer
pub type PeerId = u64;

/// Data side of a started receiver
#[derive(Debug, Clone)]
pub struct ReceiverFlow {
    destination_port: u16,
    data: async_channel::Receiver<DataBlock>,
}

impl ReceiverFlow {
    pub fn new(destination_port: u16, data: async_channel::Receiver<DataBlock>) -> Self {
        Self {
            destination_port,
            data,
        }
    }

    pub fn destination_port(&self) -> u16 {
        self.destination_port
    }

    /// Channel of received blocks, closed when the receiver stops
    pub fn data_channel(&self) -> async_channel::Receiver<DataBlock> {
        self.data.clone()
    }
}

/// Settings handed to a [`ReceiverFactory`]
#[derive(Clone)]
pub struct ReceiverSettings {
    /// Flow identifier (used for logging/stats)
    pub identifier: String,
    pub profile: TransportProfile,
    /// Recovery buffer size in milliseconds
    pub recovery_latency_ms: u32,
    /// Periodic stats sink
    pub stats: Arc<dyn StatsHandler>,
    pub stats_interval: Duration,
}

/// Input transport receiver
#[async_trait]
pub trait Receiver: Send + Sync {
    async fn start(&self) -> Result<(), ContractError>;

    /// Configure one input peer
    async fn add_peer(&self, url: &Url) -> Result<PeerId, ContractError>;

    async fn remove_peer(&self, peer: PeerId) -> Result<(), ContractError>;

    /// Open the data flow for the given destination port (0 = any)
    async fn configure_flow(&self, destination_port: u16) -> Result<ReceiverFlow, ContractError>;

    /// Release every resource; closes the data channel
    async fn destroy(&self);
}

/// Creates receivers for flows
pub trait ReceiverFactory: Send + Sync {
    fn create(&self, settings: ReceiverSettings) -> Result<Arc<dyn Receiver>, ContractError>;
}
