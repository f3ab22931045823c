//! Ingestion 错误类型

use contracts::{ContractError, PeerId};
use thiserror::Error;

/// Ingestion 错误
#[derive(Debug, Error)]
pub enum IngestionError {
    /// 输入 URL 无法解析或不受支持
    #[error("invalid input url '{url}': {message}")]
    InvalidUrl {
        /// 输入 URL
        url: String,
        /// 错误消息
        message: String,
    },

    /// 绑定 socket 失败
    #[error("failed to bind input '{url}': {source}")]
    Bind {
        /// 输入 URL
        url: String,
        #[source]
        source: std::io::Error,
    },

    /// 未知 peer
    #[error("peer {0} not found")]
    UnknownPeer(PeerId),

    /// 接收端尚未启动
    #[error("receiver not started")]
    NotStarted,

    /// 接收端已销毁
    #[error("receiver destroyed")]
    Destroyed,
}

impl IngestionError {
    /// 创建 URL 错误
    pub fn invalid_url(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            message: message.into(),
        }
    }
}

impl From<IngestionError> for ContractError {
    fn from(e: IngestionError) -> Self {
        match e {
            IngestionError::InvalidUrl { url, message } => ContractError::peer_setup(url, message),
            IngestionError::Bind { url, source } => ContractError::peer_setup(url, source.to_string()),
            other => ContractError::receiver(other.to_string()),
        }
    }
}

/// Ingestion Result 类型别名
pub type Result<T> = std::result::Result<T, IngestionError>;
