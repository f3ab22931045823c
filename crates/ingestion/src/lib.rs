//! # Ingestion
//!
//! 输入接收模块。
//!
//! 负责：
//! - 实现 `contracts::Receiver`，将输入 URL 绑定为接收端
//! - 去除 RTP 头并按序号跨多路输入去重
//! - 数据通道满时丢弃新数据块并计数
//! - 周期性上报输入统计
//!
//! ## Usage Example
//!
//! ```ignore
//! use ingestion::DatagramReceiverFactory;
//! use contracts::ReceiverFactory;
//!
//! let factory = DatagramReceiverFactory::default();
//! let receiver = factory.create(settings)?;
//! receiver.start().await?;
//! receiver.add_peer(&url).await?;
//! let flow = receiver.configure_flow(0).await?;
//! while let Ok(block) = flow.data_channel().recv().await {
//!     // hand to the fanout engine
//! }
//! ```
//!
//! ## Mock Testing
//!
//! `MockReceiverFactory` records every created receiver so tests can inject
//! blocks and inspect peer bookkeeping without opening sockets.

mod config;
mod datagram;
mod error;
mod mock;
mod rtp;

pub use config::{IngestionMetrics, MetricsSnapshot, ReceiverConfig, DATA_CHANNEL_CAPACITY};
pub use datagram::{DatagramReceiver, DatagramReceiverFactory};
pub use error::{IngestionError, Result};
pub use mock::{MockReceiver, MockReceiverFactory};
pub use rtp::{parse_rtp, Admission, SequenceWindow};
