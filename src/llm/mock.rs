//! Mock 后端（用于测试，无需 API）
//!
//! 补全默认回显最后一条 User 消息；也可预置一串结果（含失败）按顺序消费。
//! 记录每次补全收到的对话，便于断言窗口大小与顺序。

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::RelayError;
use crate::llm::{Backend, FineTuneEvent, FineTuneJob, UploadedFile};
use crate::memory::{Role, Turn};

#[derive(Debug, Default)]
pub struct MockBackend {
    completions: Mutex<VecDeque<Result<String, String>>>,
    complete_calls: Mutex<Vec<Vec<Turn>>>,
    image_urls: Mutex<Vec<String>>,
    /// url -> 图片内容；不在表中的 url 下载失败
    images: Mutex<HashMap<String, Vec<u8>>>,
    transcription: Mutex<Option<String>>,
    uploads: Mutex<Vec<String>>,
    jobs: Mutex<Vec<FineTuneJob>>,
    image_requests: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置下一次补全的结果
    pub fn push_completion(&self, result: Result<&str, &str>) {
        if let Ok(mut queue) = self.completions.lock() {
            queue.push_back(result.map(String::from).map_err(String::from));
        }
    }

    /// 预置图片生成结果；`content` 为 None 的 url 下载会失败
    pub fn with_images(self, images: Vec<(&str, Option<Vec<u8>>)>) -> Self {
        if let (Ok(mut urls), Ok(mut map)) = (self.image_urls.lock(), self.images.lock()) {
            for (url, content) in images {
                urls.push(url.to_string());
                if let Some(bytes) = content {
                    map.insert(url.to_string(), bytes);
                }
            }
        }
        self
    }

    pub fn with_transcription(self, text: &str) -> Self {
        if let Ok(mut t) = self.transcription.lock() {
            *t = Some(text.to_string());
        }
        self
    }

    pub fn with_jobs(self, jobs: Vec<FineTuneJob>) -> Self {
        if let Ok(mut j) = self.jobs.lock() {
            *j = jobs;
        }
        self
    }

    /// 每次补全收到的对话
    pub fn complete_calls(&self) -> Vec<Vec<Turn>> {
        self.complete_calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn image_requests(&self) -> usize {
        self.image_requests.load(Ordering::SeqCst)
    }

    /// 已上传的文件内容
    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().map(|u| u.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn complete(&self, turns: &[Turn], _user_id: &str) -> Result<String, RelayError> {
        if let Ok(mut calls) = self.complete_calls.lock() {
            calls.push(turns.to_vec());
        }
        let scripted = self.completions.lock().ok().and_then(|mut q| q.pop_front());
        match scripted {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(e)) => Err(RelayError::backend(e)),
            None => {
                let last_user = turns
                    .iter()
                    .rev()
                    .find(|t| t.role == Role::User)
                    .map(|t| t.content.as_str())
                    .unwrap_or("(no input)");
                Ok(format!("Echo from Mock: {}", last_user))
            }
        }
    }

    async fn generate_image(&self, _prompt: &str, _user_id: &str) -> Result<Vec<String>, RelayError> {
        self.image_requests.fetch_add(1, Ordering::SeqCst);
        Ok(self.image_urls.lock().map(|u| u.clone()).unwrap_or_default())
    }

    async fn transcribe(&self, _audio: Vec<u8>) -> Result<String, RelayError> {
        self.transcription
            .lock()
            .ok()
            .and_then(|t| t.clone())
            .ok_or_else(|| RelayError::backend("no transcription"))
    }

    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>, RelayError> {
        self.images
            .lock()
            .ok()
            .and_then(|m| m.get(url).cloned())
            .ok_or_else(|| RelayError::backend(format!("download failed: {}", url)))
    }

    async fn upload_dataset(&self, path: &Path, file_name: &str) -> Result<UploadedFile, RelayError> {
        let content = tokio::fs::read_to_string(path).await?;
        let id = match self.uploads.lock() {
            Ok(mut uploads) => {
                uploads.push(content);
                format!("file-{}", uploads.len())
            }
            Err(_) => return Err(RelayError::backend("mock poisoned")),
        };
        Ok(UploadedFile {
            id,
            file_name: file_name.to_string(),
        })
    }

    async fn create_fine_tune(&self, file_id: &str, suffix: &str) -> Result<FineTuneJob, RelayError> {
        let job = FineTuneJob {
            id: format!("ftjob-{}", suffix),
            status: "queued".to_string(),
            fine_tuned_model: None,
            events: vec![FineTuneEvent {
                message: format!("Created fine-tuning job from {}", file_id),
            }],
        };
        if let Ok(mut jobs) = self.jobs.lock() {
            jobs.push(job.clone());
        }
        Ok(job)
    }

    async fn list_fine_tunes(&self) -> Result<Vec<FineTuneJob>, RelayError> {
        Ok(self.jobs.lock().map(|j| j.clone()).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_echoes_last_user_turn() {
        let backend = MockBackend::new();
        let reply = backend
            .complete(&[Turn::system("s"), Turn::user("ping")], "u")
            .await
            .unwrap();
        assert_eq!(reply, "Echo from Mock: ping");
        assert_eq!(backend.complete_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_mock_scripted_results_in_order() {
        let backend = MockBackend::new();
        backend.push_completion(Err("boom"));
        backend.push_completion(Ok("fine"));
        assert!(backend.complete(&[], "u").await.is_err());
        assert_eq!(backend.complete(&[], "u").await.unwrap(), "fine");
    }
}
