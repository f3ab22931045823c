//! # Contracts
//!
//! Frozen interface contracts shared by every crate of the relay gateway.
//! Business crates depend on this crate only; reverse dependencies are prohibited.
//!
//! ## Time Model
//! - Block timestamps are NTP-style 32.32 fixed point (seconds in the high word)
//! - Sequence numbers are receiver-extended `u32` and wrap

mod block;
mod config;
mod endpoint;
mod error;
mod output;
mod receiver;
mod stats;
mod status;

pub use block::{DataBlock, DataBlockBuilder};
pub use config::*;
pub use endpoint::{
    endpoint_host, endpoint_ip, is_unspecified_host, parse_endpoint_url, query_flag, query_param,
    UNSPECIFIED_HOST,
};
pub use error::*;
pub use output::{same_output, OutputConnection, OutputError};
pub use receiver::{PeerId, Receiver, ReceiverFactory, ReceiverFlow, ReceiverSettings};
pub use stats::*;
pub use status::{FlowStatus, HealthState};
