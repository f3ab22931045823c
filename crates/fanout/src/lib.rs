//! # Fanout
//!
//! 数据扇出模块。
//!
//! 负责：
//! - 消费接收端的 `DataBlock`
//! - Fan-out 到每个 output 的独立有界队列 (256)
//! - 隔离慢 output：队列满则只丢弃该 output 的数据，不阻塞主链路
//! - 写失败的 output 自行驱逐
//!
//! ```text
//! Receiver ──► FanoutEngine ──┬──► queue(256) ──► delivery task ──► OutputConnection
//!                             ├──► queue(256) ──► delivery task ──► OutputConnection
//!                             └──► ...
//! ```
//!
//! `outputs` 模块包含各类连接：datagram (`udp`, `rtp`)、streaming transport
//! (`srt`, listener / caller) 以及硬件 ASI。

mod delivery;
mod engine;
mod error;
mod metrics;
pub mod outputs;
mod status;

pub use delivery::OUTPUT_QUEUE_CAPACITY;
pub use engine::{EngineHandle, FanoutEngine, COMMAND_QUEUE_CAPACITY};
pub use error::FanoutError;
pub use metrics::{DeliveryMetrics, DeliverySnapshot};
pub use outputs::{OutputBackends, OutputContext};
pub use status::{apply_thresholds, compute_bitrate, SequenceTracker};
