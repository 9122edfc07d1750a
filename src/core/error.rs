//! 中继错误类型
//!
//! 调用方只关心成功/失败；各变体携带描述性原因，仅用于日志。

use thiserror::Error;

/// 处理单条消息过程中可能出现的错误（发送、后端、持久化、导出等）
#[derive(Error, Debug)]
pub enum RelayError {
    /// 消息通道发送/回复失败
    #[error("Transport error: {0}")]
    Transport(String),

    /// 补全 / 图片 / 转写等后端调用失败
    #[error("Backend error: {0}")]
    Backend(String),

    /// 暂停状态存储读写失败
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("Exporter error: {0}")]
    Exporter(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn exporter(msg: impl Into<String>) -> Self {
        Self::Exporter(msg.into())
    }
}
