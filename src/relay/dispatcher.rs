//! 消息分发
//!
//! 每条入站消息一个任务，按顺序：
//! 1. 过滤（状态通知、群消息、本人发给具名联系人的消息）
//! 2. 指令识别：暂停 / 恢复 / 导出 / 列表直接处理后结束；引用回复改写内容后继续
//! 3. 暂停中的联系人：静默结束
//! 4. 按消息类型分派到文本 / 图片 / 语音 / 名片等处理
//!
//! 处理失败时向同一联系人发一条兜底提示。

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::core::{best_effort_fan_out, FanOutHandle, RelayError, RetryPolicy};
use crate::exporter::DatasetExporter;
use crate::llm::Backend;
use crate::memory::{SessionCache, Turn};
use crate::relay::command::{message_body, recognize, Command};
use crate::relay::message::{Message, MessageKind, Transport};
use crate::store::FreezeStore;

/// 兜底提示
pub const OOPS: &str = "oops, something went wrong";
/// 暂停确认
pub const PAUSE_ACK: &str = "received, type start to resume";
/// 恢复确认
pub const RESUME_ACK: &str = "received, type stop to terminate";
/// 图片 / 视频 / 表情的固定回复
pub const DOGE: &str = "[旺柴]";
/// 撤回消息的固定回复
pub const RECALLED_REPLY: &str = "你干嘛要撤回";

/// 分发参数
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    /// 发送给后端的最近轮数
    pub history_window: usize,
    pub retry: RetryPolicy,
    /// 文本中包含任一关键词时改走图片生成
    pub image_keywords: Vec<String>,
    /// 导出数据集时使用的聊天关键词
    pub export_keyword: String,
    /// 新会话的 system 提示（按顺序）
    pub persona: Vec<String>,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl DispatcherSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            history_window: cfg.app.history_window,
            retry: cfg.retry.policy(),
            image_keywords: cfg.app.image_keywords.clone(),
            export_keyword: cfg.exporter.keyword.clone(),
            persona: cfg.llm.persona.clone(),
        }
    }
}

/// 单条消息的处理结果（用于日志与测试）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// 被过滤，无回复无状态变化
    Rejected,
    /// 指令已处理
    Command(Command),
    /// 联系人处于暂停状态
    Frozen,
    /// 已按类型处理
    Handled(MessageKind),
}

/// 消息分发器：持有后端、通道、暂停状态库、导出器与会话缓存
pub struct Dispatcher {
    backend: Arc<dyn Backend>,
    transport: Arc<dyn Transport>,
    freeze: Arc<dyn FreezeStore>,
    exporter: Arc<dyn DatasetExporter>,
    sessions: SessionCache,
    settings: DispatcherSettings,
}

impl Dispatcher {
    pub fn new(
        backend: Arc<dyn Backend>,
        transport: Arc<dyn Transport>,
        freeze: Arc<dyn FreezeStore>,
        exporter: Arc<dyn DatasetExporter>,
        settings: DispatcherSettings,
    ) -> Self {
        let seed = settings.persona.iter().map(Turn::system).collect();
        Self {
            backend,
            transport,
            freeze,
            exporter,
            sessions: SessionCache::new(seed),
            settings,
        }
    }

    pub fn sessions(&self) -> &SessionCache {
        &self.sessions
    }

    /// 为每条入站消息启动一个独立任务
    pub fn spawn(self: &Arc<Self>, msg: Message) -> JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move { dispatcher.on_message(msg).await })
    }

    /// 处理一条消息；失败时尽力发一条兜底提示
    pub async fn on_message(&self, msg: Message) {
        match self.handle(msg.clone()).await {
            Ok(outcome) => {
                tracing::debug!(msg_id = %msg.id, sender = %msg.sender_id, ?outcome, "message done");
            }
            Err(e) => {
                tracing::error!(msg_id = %msg.id, sender = %msg.sender_id, "handler failed: {}", e);
                if let Err(e) = self.reply_text(&msg, OOPS).await {
                    tracing::warn!(sender = %msg.sender_id, "fallback notice not delivered: {}", e);
                }
            }
        }
    }

    /// 分发状态机：遇到第一个适用的分支即结束
    pub async fn handle(&self, mut msg: Message) -> Result<Outcome, RelayError> {
        if Self::should_reject(&msg) {
            return Ok(Outcome::Rejected);
        }

        let command = recognize(&msg.content);
        match &command {
            Command::Pause => {
                self.freeze.pause(&msg.sender_id).await?;
                tracing::info!(sender = %msg.sender_id, "paused");
                self.reply_text(&msg, PAUSE_ACK).await?;
                return Ok(Outcome::Command(Command::Pause));
            }
            Command::Resume => {
                self.freeze.resume(&msg.sender_id).await?;
                tracing::info!(sender = %msg.sender_id, "resumed");
                self.reply_text(&msg, RESUME_ACK).await?;
                return Ok(Outcome::Command(Command::Resume));
            }
            Command::ExportDataset => {
                self.handle_export(&msg).await?;
                return Ok(Outcome::Command(Command::ExportDataset));
            }
            Command::ListExports => {
                self.handle_list_exports(&msg).await?;
                return Ok(Outcome::Command(Command::ListExports));
            }
            Command::Rewrite(quoted) => {
                tracing::debug!(sender = %msg.sender_id, "quoted message resubmitted");
                msg.content = quoted.clone();
            }
            Command::Plain => {
                let body = message_body(&msg.content).to_string();
                if body != msg.content {
                    msg.content = body;
                }
            }
        }

        if self.freeze.is_paused(&msg.sender_id).await? {
            return Ok(Outcome::Frozen);
        }

        match msg.kind {
            MessageKind::Text => {
                if self.wants_image(&msg.content) {
                    // 图片逐张后台发送，不等待
                    self.handle_image(&msg).await?.detach("image");
                } else {
                    let content = msg.content.clone();
                    self.handle_text(&msg, &content).await?;
                }
            }
            MessageKind::Image | MessageKind::Video | MessageKind::Emoticon => {
                self.reply_text(&msg, DOGE).await?;
            }
            MessageKind::Voice => self.handle_voice(&msg).await?,
            MessageKind::ShareCard => {
                let card = msg.card_id.clone().unwrap_or_else(|| msg.content.clone());
                self.reply_text(&msg, &card).await?;
            }
            MessageKind::Recalled => {
                self.reply_text(&msg, RECALLED_REPLY).await?;
            }
            MessageKind::Verify
            | MessageKind::PossibleFriend
            | MessageKind::Location
            | MessageKind::App
            | MessageKind::Voip
            | MessageKind::VoipNotify
            | MessageKind::VoipInvite
            | MessageKind::MicroVideo
            | MessageKind::Sys
            | MessageKind::StatusNotify
            | MessageKind::Unknown(_) => {}
        }
        Ok(Outcome::Handled(msg.kind))
    }

    /// 状态通知、群消息、本人发给具名联系人的消息一律忽略
    fn should_reject(msg: &Message) -> bool {
        msg.kind == MessageKind::StatusNotify
            || msg.is_group
            || (msg.is_self_sent && !msg.receiver_nickname.is_empty())
    }

    fn wants_image(&self, content: &str) -> bool {
        self.settings
            .image_keywords
            .iter()
            .any(|k| !k.is_empty() && content.contains(k.as_str()))
    }

    /// 发文本：发给文件传输助手的消息回到助手，其余回复发送方
    pub async fn reply_text(&self, msg: &Message, text: &str) -> Result<(), RelayError> {
        let transport = &self.transport;
        if msg.to_file_helper() {
            self.settings
                .retry
                .run(|| transport.send_text_to_self(text))
                .await
        } else {
            self.settings
                .retry
                .run(|| transport.reply_text(msg, text))
                .await
        }
    }

    /// 文本对话：追加用户发言，取最近窗口请求后端，记录并发送回复
    pub async fn handle_text(&self, msg: &Message, content: &str) -> Result<(), RelayError> {
        let content = content.trim();
        if content.is_empty() {
            return Ok(());
        }

        let session = self.sessions.get_or_create(&msg.sender_id).await;
        let window = {
            let mut session = session.lock().await;
            session.push(Turn::user(content));
            session.last_n(self.settings.history_window)
        };

        let backend = &self.backend;
        let user = msg.sender_id.as_str();
        let reply = self
            .settings
            .retry
            .run(|| backend.complete(&window, user))
            .await?;
        let reply = reply.trim().to_string();

        session.lock().await.push(Turn::assistant(reply.clone()));
        self.reply_text(msg, &reply).await
    }

    /// 图片生成：一次请求，每张图独立下载并发送；单张失败只记日志
    pub async fn handle_image(&self, msg: &Message) -> Result<FanOutHandle, RelayError> {
        let prompt = msg.content.trim();
        let backend = &self.backend;
        let user = msg.sender_id.as_str();
        let urls = self
            .settings
            .retry
            .run(|| backend.generate_image(prompt, user))
            .await?;
        tracing::info!(sender = %msg.sender_id, images = urls.len(), "images generated");

        let tasks = urls.into_iter().map(|url| {
            let backend = Arc::clone(&self.backend);
            let transport = Arc::clone(&self.transport);
            let retry = self.settings.retry;
            let msg = msg.clone();
            async move {
                let image = retry.run(|| backend.fetch_image(&url)).await?;
                if msg.to_file_helper() {
                    retry.run(|| transport.send_image_to_self(image.clone())).await
                } else {
                    retry.run(|| transport.reply_image(&msg, image.clone())).await
                }
            }
        });
        Ok(best_effort_fan_out("image", tasks))
    }

    /// 语音：下载、转写，然后按文本消息处理
    pub async fn handle_voice(&self, msg: &Message) -> Result<(), RelayError> {
        let transport = &self.transport;
        let backend = &self.backend;
        let audio = self.settings.retry.run(|| transport.fetch_voice(msg)).await?;
        let text = self
            .settings
            .retry
            .run(|| backend.transcribe(audio.clone()))
            .await?;
        tracing::debug!(sender = %msg.sender_id, chars = text.chars().count(), "voice transcribed");
        self.handle_text(msg, &text).await
    }

    /// 导出聊天记录 -> 上传 -> 启动微调；数据集文件在结束时删除
    async fn handle_export(&self, msg: &Message) -> Result<(), RelayError> {
        let dataset = self
            .exporter
            .generate_dataset(&self.settings.export_keyword)
            .await?;

        let backend = &self.backend;
        let file_name = format!("{}_ft_ds.json", msg.sender_id);
        let uploaded = self
            .settings
            .retry
            .run(|| backend.upload_dataset(dataset.path(), &file_name))
            .await?;
        let reply = format!("上传成功\nName: {}\nID: {}", uploaded.file_name, uploaded.id);
        self.reply_text(msg, &reply).await?;

        let suffix = msg.sender_id.as_str();
        let job = self
            .settings
            .retry
            .run(|| backend.create_fine_tune(&uploaded.id, suffix))
            .await?;
        let events: Vec<&str> = job.events.iter().map(|e| e.message.as_str()).collect();
        let reply = format!("fine tuning is started\nID: {}\n{}", job.id, events.join("\n"));
        self.reply_text(msg, reply.trim()).await
    }

    async fn handle_list_exports(&self, msg: &Message) -> Result<(), RelayError> {
        let backend = &self.backend;
        let jobs = self.settings.retry.run(|| backend.list_fine_tunes()).await?;
        let text = serde_json::to_string_pretty(&jobs)
            .map_err(|e| RelayError::backend(e.to_string()))?;
        self.reply_text(msg, &text).await
    }
}
