//! Chat Relay - 聊天中继
//!
//! 把一对一聊天消息转发给 OpenAI 兼容后端，并把回复送回同一联系人。
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、有界重试、并发扇出、优雅关闭
//! - **exporter**: 从本地聊天库导出微调数据集
//! - **integrations**: 控制台通道
//! - **llm**: 后端抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 对话轮次与按联系人分片的会话缓存
//! - **observability**: tracing 初始化
//! - **relay**: 入站消息、指令识别、按类型分发
//! - **store**: 暂停状态持久化

pub mod config;
pub mod core;
pub mod exporter;
pub mod integrations;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod relay;
pub mod store;

pub use relay::{Dispatcher, DispatcherSettings, Message, MessageKind, Transport};
