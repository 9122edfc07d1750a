//! 入站消息与消息通道接口
//!
//! 通道（登录、扫码、收发）不在本 crate 内实现，这里只定义中继消费的消息结构
//! 和中继需要的发送能力。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::RelayError;

/// 文件传输助手（本人自用通道）的用户名
pub const FILE_HELPER: &str = "filehelper";

/// 消息类型（对应通道的数字类型码）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Voice,
    Verify,
    PossibleFriend,
    ShareCard,
    Video,
    Emoticon,
    Location,
    App,
    Voip,
    /// 状态同步通知（类型码 51），一律忽略
    StatusNotify,
    VoipNotify,
    VoipInvite,
    MicroVideo,
    Sys,
    Recalled,
    Unknown(u32),
}

impl MessageKind {
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => Self::Text,
            3 => Self::Image,
            34 => Self::Voice,
            37 => Self::Verify,
            40 => Self::PossibleFriend,
            42 => Self::ShareCard,
            43 => Self::Video,
            47 => Self::Emoticon,
            48 => Self::Location,
            49 => Self::App,
            50 => Self::Voip,
            51 => Self::StatusNotify,
            52 => Self::VoipNotify,
            53 => Self::VoipInvite,
            62 => Self::MicroVideo,
            10000 => Self::Sys,
            10002 => Self::Recalled,
            other => Self::Unknown(other),
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            Self::Text => 1,
            Self::Image => 3,
            Self::Voice => 34,
            Self::Verify => 37,
            Self::PossibleFriend => 40,
            Self::ShareCard => 42,
            Self::Video => 43,
            Self::Emoticon => 47,
            Self::Location => 48,
            Self::App => 49,
            Self::Voip => 50,
            Self::StatusNotify => 51,
            Self::VoipNotify => 52,
            Self::VoipInvite => 53,
            Self::MicroVideo => 62,
            Self::Sys => 10000,
            Self::Recalled => 10002,
            Self::Unknown(code) => *code,
        }
    }
}

/// 一条入站消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub kind: MessageKind,
    pub content: String,
    /// 发送方 ID（会话与暂停状态的唯一键）
    pub sender_id: String,
    /// 接收方用户名；发给文件传输助手时为 `filehelper`
    pub receiver_id: String,
    /// 接收方昵称（本人发出的消息用于防回环判断）
    #[serde(default)]
    pub receiver_nickname: String,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub is_self_sent: bool,
    /// 名片消息携带的用户名
    #[serde(default)]
    pub card_id: Option<String>,
}

impl Message {
    /// 构造一条发给本人的文本消息（测试与控制台通道使用）
    pub fn text(sender_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: MessageKind::Text,
            content: content.into(),
            sender_id: sender_id.into(),
            receiver_id: "self".to_string(),
            receiver_nickname: String::new(),
            is_group: false,
            is_self_sent: false,
            card_id: None,
        }
    }

    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = kind;
        self
    }

    /// 是否发往文件传输助手
    pub fn to_file_helper(&self) -> bool {
        self.receiver_id == FILE_HELPER
    }
}

/// 消息通道的发送能力；每个方法只尝试一次，重试由调用方负责
#[async_trait]
pub trait Transport: Send + Sync {
    /// 回复文本给消息发送方
    async fn reply_text(&self, msg: &Message, text: &str) -> Result<(), RelayError>;

    /// 回复图片给消息发送方
    async fn reply_image(&self, msg: &Message, image: Vec<u8>) -> Result<(), RelayError>;

    /// 发送文本到文件传输助手
    async fn send_text_to_self(&self, text: &str) -> Result<(), RelayError>;

    /// 发送图片到文件传输助手
    async fn send_image_to_self(&self, image: Vec<u8>) -> Result<(), RelayError>;

    /// 下载语音消息的音频
    async fn fetch_voice(&self, msg: &Message) -> Result<Vec<u8>, RelayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes() {
        for code in [1, 3, 34, 37, 40, 42, 43, 47, 48, 49, 50, 51, 52, 53, 62, 10000, 10002] {
            assert_eq!(MessageKind::from_code(code).code(), code);
        }
        assert_eq!(MessageKind::from_code(51), MessageKind::StatusNotify);
        assert_eq!(MessageKind::from_code(9999), MessageKind::Unknown(9999));
    }

    #[test]
    fn test_file_helper_detection() {
        let mut msg = Message::text("me", "hi");
        assert!(!msg.to_file_helper());
        msg.receiver_id = FILE_HELPER.to_string();
        assert!(msg.to_file_helper());
    }

    #[test]
    fn test_message_deserializes_with_defaults() {
        let msg: Message = serde_json::from_str(
            r#"{"id":"1","kind":"text","content":"hi","sender_id":"a","receiver_id":"b"}"#,
        )
        .unwrap();
        assert_eq!(msg.kind, MessageKind::Text);
        assert!(!msg.is_group);
        assert!(msg.card_id.is_none());
    }
}
