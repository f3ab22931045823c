//! Flow 编排与配置协调
//!
//! - [`Flow`]：单个 flow 的接收器、引擎和输入输出生命周期
//! - [`Supervisor`]：整份配置的校验、差异比对与应用
//! - [`HttpServer`]：`/status` 状态查询端点

mod error;
mod flow;
mod http;
mod input;
mod output;
mod supervisor;

pub use error::{FlowError, Result};
pub use flow::{Flow, FlowDeps, DEFAULT_STATS_INTERVAL, RESTART_WAIT};
pub use http::{router, HttpServer};
pub use output::OutputHandle;
pub use supervisor::{FlowRegistry, StatusReport, Supervisor, FLOW_REMOVE_WAIT, SHUTDOWN_WAIT};
