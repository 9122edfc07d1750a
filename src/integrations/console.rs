//! 控制台通道：标准输入的每一行作为一条文本消息，回复写到标准输出
//!
//! 只有一个联系人；图片写入临时目录后打印路径。没有语音输入。
//! 标准输入在独立线程上阻塞读取，经 channel 交给消息循环，关闭时不必等待读取返回。

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::core::RelayError;
use crate::relay::{Dispatcher, Message, Transport};

/// 控制台联系人的 ID
pub const CONSOLE_SENDER: &str = "console";

pub struct ConsoleTransport<W> {
    out: Mutex<W>,
    image_dir: PathBuf,
}

impl ConsoleTransport<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout(), std::env::temp_dir())
    }
}

impl<W: AsyncWrite + Unpin + Send> ConsoleTransport<W> {
    pub fn new(out: W, image_dir: impl Into<PathBuf>) -> Self {
        Self {
            out: Mutex::new(out),
            image_dir: image_dir.into(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }

    async fn write_line(&self, line: &str) -> Result<(), RelayError> {
        let mut out = self.out.lock().await;
        out.write_all(line.as_bytes()).await?;
        out.write_all(b"\n").await?;
        out.flush().await?;
        Ok(())
    }

    async fn save_image(&self, image: Vec<u8>) -> Result<PathBuf, RelayError> {
        tokio::fs::create_dir_all(&self.image_dir).await?;
        let path = self.image_dir.join(format!("relay_img_{}.png", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, image).await?;
        Ok(path)
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> Transport for ConsoleTransport<W> {
    async fn reply_text(&self, _msg: &Message, text: &str) -> Result<(), RelayError> {
        self.write_line(&format!("< {}", text)).await
    }

    async fn reply_image(&self, _msg: &Message, image: Vec<u8>) -> Result<(), RelayError> {
        let path = self.save_image(image).await?;
        self.write_line(&format!("< [image] {}", path.display())).await
    }

    async fn send_text_to_self(&self, text: &str) -> Result<(), RelayError> {
        self.write_line(&format!("<< {}", text)).await
    }

    async fn send_image_to_self(&self, image: Vec<u8>) -> Result<(), RelayError> {
        let path = self.save_image(image).await?;
        self.write_line(&format!("<< [image] {}", path.display())).await
    }

    async fn fetch_voice(&self, _msg: &Message) -> Result<Vec<u8>, RelayError> {
        Err(RelayError::transport("console has no voice input"))
    }
}

/// 在独立线程上逐行读取 `input`，读到 EOF 或接收端关闭时结束
pub fn spawn_line_reader<R>(input: R) -> mpsc::Receiver<String>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(64);
    let spawned = std::thread::Builder::new()
        .name("console-input".to_string())
        .spawn(move || {
            for line in input.lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("console input error: {}", e);
                        break;
                    }
                }
            }
        });
    if let Err(e) = spawned {
        tracing::error!("failed to start console input thread: {}", e);
    }
    rx
}

/// 标准输入的逐行读取
pub fn stdin_lines() -> mpsc::Receiver<String> {
    spawn_line_reader(std::io::BufReader::new(std::io::stdin()))
}

/// 消费输入直到 EOF 或取消；每行非空输入交给分发器独立处理，返回已接收的消息数
///
/// EOF 时等待已接收的消息处理完；取消时立即返回。
pub async fn run_console(
    dispatcher: Arc<Dispatcher>,
    mut lines: mpsc::Receiver<String>,
    token: CancellationToken,
) -> usize {
    let mut tasks = Vec::new();
    loop {
        let line = tokio::select! {
            _ = token.cancelled() => {
                tracing::info!(received = tasks.len(), "console loop cancelled");
                return tasks.len();
            }
            line = lines.recv() => line,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        tasks.push(dispatcher.spawn(Message::text(CONSOLE_SENDER, line)));
    }

    let received = tasks.len();
    tracing::info!(received, "console input closed, waiting for in-flight messages");
    for result in futures_util::future::join_all(tasks).await {
        if let Err(e) = result {
            tracing::error!("message task panicked: {}", e);
        }
    }
    received
}
