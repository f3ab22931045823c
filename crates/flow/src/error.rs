//! Flow 错误类型定义

use contracts::ContractError;
use fanout::FanoutError;
use thiserror::Error;

/// Flow / Supervisor 错误
#[derive(Debug, Error)]
pub enum FlowError {
    /// 配置校验失败
    #[error("config validation failed: {0}")]
    Validation(#[source] ContractError),

    /// 统计输出初始化失败
    #[error("failed to set up stats for flow '{flow}': {source}")]
    Stats {
        flow: String,
        #[source]
        source: anyhow::Error,
    },

    /// 接收器创建/启动/配置失败
    #[error("receiver error in flow '{flow}': {source}")]
    Receiver {
        flow: String,
        #[source]
        source: ContractError,
    },

    /// 输入建立失败
    #[error("failed to set up input '{url}': {source}")]
    Input {
        url: String,
        #[source]
        source: ContractError,
    },

    /// 输出建立失败
    #[error("couldn't set up output '{url}': {source}")]
    Output {
        url: String,
        #[source]
        source: FanoutError,
    },

    /// URL 解析失败
    #[error("couldn't parse url '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// 遥测配置失败
    #[error("telemetry setup failed: {0}")]
    Telemetry(String),

    /// 状态 HTTP 服务失败
    #[error("status endpoint '{addr}' failed: {source}")]
    Http {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Supervisor 已关闭
    #[error("supervisor is shut down")]
    ShutDown,
}

impl FlowError {
    pub fn receiver(flow: impl Into<String>, source: ContractError) -> Self {
        Self::Receiver {
            flow: flow.into(),
            source,
        }
    }

    pub fn output(url: impl Into<String>, source: FanoutError) -> Self {
        Self::Output {
            url: url.into(),
            source,
        }
    }
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, FlowError>;
