//! 推理后端抽象
//!
//! 中继只依赖这里的能力：对话补全、图片生成、语音转写、下载图片，
//! 以及微调数据集的上传 / 启动 / 列表。

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::RelayError;
use crate::memory::Turn;

/// 上传后的文件信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub id: String,
    #[serde(rename = "filename")]
    pub file_name: String,
}

/// 微调任务事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FineTuneEvent {
    pub message: String,
}

/// 微调任务
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FineTuneJob {
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub fine_tuned_model: Option<String>,
    #[serde(default)]
    pub events: Vec<FineTuneEvent>,
}

/// 推理后端
#[async_trait]
pub trait Backend: Send + Sync {
    /// 按顺序发送若干轮对话，返回回复文本
    async fn complete(&self, turns: &[Turn], user_id: &str) -> Result<String, RelayError>;

    /// 根据提示生成图片，返回图片 URL 列表
    async fn generate_image(&self, prompt: &str, user_id: &str) -> Result<Vec<String>, RelayError>;

    /// 语音转文字
    async fn transcribe(&self, audio: Vec<u8>) -> Result<String, RelayError>;

    /// 下载远程图片
    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>, RelayError>;

    /// 上传微调数据集文件
    async fn upload_dataset(&self, path: &Path, file_name: &str) -> Result<UploadedFile, RelayError>;

    /// 以已上传文件启动微调，`suffix` 用于区分联系人
    async fn create_fine_tune(&self, file_id: &str, suffix: &str) -> Result<FineTuneJob, RelayError>;

    async fn list_fine_tunes(&self) -> Result<Vec<FineTuneJob>, RelayError>;
}
