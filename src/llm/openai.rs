//! OpenAI 兼容后端
//!
//! 对话补全走 async_openai；图片生成、语音转写、文件与微调接口直接用 reqwest 调 HTTP 端点。
//! 所有请求共用同一个带代理的 HTTP 客户端。

use std::path::Path;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use crate::config::LlmSection;
use crate::core::RelayError;
use crate::llm::{Backend, FineTuneEvent, FineTuneJob, UploadedFile};
use crate::memory::{Role, Turn};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

#[derive(Debug, Deserialize)]
struct ImageData {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    data: Vec<T>,
}

/// OpenAI 兼容后端：持有补全客户端、HTTP 客户端与模型配置
pub struct OpenAiBackend {
    client: Client<OpenAIConfig>,
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    settings: LlmSection,
}

impl OpenAiBackend {
    /// `proxy` 为出站代理地址（如 `http://127.0.0.1:7890`）
    pub fn new(settings: LlmSection, api_key: &str, proxy: Option<&str>) -> Result<Self, RelayError> {
        let mut builder = reqwest::Client::builder();
        if let Some(proxy) = proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| RelayError::Config(format!("invalid proxy: {}", e)))?;
            builder = builder.proxy(proxy);
        }
        let http = builder
            .build()
            .map_err(|e| RelayError::Config(format!("http client: {}", e)))?;

        let api_base = settings
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();

        let config = OpenAIConfig::new()
            .with_api_base(api_base.clone())
            .with_api_key(api_key);

        Ok(Self {
            client: Client::with_config(config).with_http_client(http.clone()),
            http,
            api_base,
            api_key: api_key.to_string(),
            settings,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path)
    }

    fn to_openai_messages(turns: &[Turn]) -> Result<Vec<ChatCompletionRequestMessage>, RelayError> {
        turns
            .iter()
            .map(|t| {
                let message = match t.role {
                    Role::System => ChatCompletionRequestSystemMessageArgs::default()
                        .content(t.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::System),
                    Role::User => ChatCompletionRequestUserMessageArgs::default()
                        .content(t.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::User),
                    Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                        .content(t.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::Assistant),
                };
                message.map_err(|e| RelayError::backend(e.to_string()))
            })
            .collect()
    }

    /// 非 2xx 时读出响应体作为错误原因
    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, RelayError> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Err(RelayError::backend(format!("{}: {}", status, body)))
    }

    async fn fine_tune_events(&self, job_id: &str) -> Result<Vec<FineTuneEvent>, RelayError> {
        let resp = self
            .http
            .get(self.url(&format!("fine_tuning/jobs/{}/events", job_id)))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| RelayError::backend(e.to_string()))?;
        let list: ListResponse<FineTuneEvent> = Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e| RelayError::backend(e.to_string()))?;
        Ok(list.data)
    }
}

#[async_trait]
impl Backend for OpenAiBackend {
    async fn complete(&self, turns: &[Turn], user_id: &str) -> Result<String, RelayError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.settings.model)
            .messages(Self::to_openai_messages(turns)?)
            .build()
            .map_err(|e| RelayError::backend(e.to_string()))?;

        tracing::debug!(user = user_id, turns = turns.len(), "chat completion");
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| RelayError::backend(e.to_string()))?;

        response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| RelayError::backend("empty completion"))
    }

    async fn generate_image(&self, prompt: &str, user_id: &str) -> Result<Vec<String>, RelayError> {
        let body = serde_json::json!({
            "prompt": prompt,
            "n": 1,
            "size": self.settings.image_size,
            "response_format": "url",
            "user": user_id,
        });
        let resp = self
            .http
            .post(self.url("images/generations"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RelayError::backend(e.to_string()))?;
        let images: ImageResponse = Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e| RelayError::backend(e.to_string()))?;
        Ok(images.data.into_iter().filter_map(|d| d.url).collect())
    }

    async fn transcribe(&self, audio: Vec<u8>) -> Result<String, RelayError> {
        let file = Part::bytes(audio)
            .file_name("voice.mp3")
            .mime_str("audio/mpeg")
            .map_err(|e| RelayError::backend(e.to_string()))?;
        let form = Form::new()
            .text("model", self.settings.transcription_model.clone())
            .part("file", file);
        let resp = self
            .http
            .post(self.url("audio/transcriptions"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| RelayError::backend(e.to_string()))?;
        let out: TranscriptionResponse = Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e| RelayError::backend(e.to_string()))?;
        Ok(out.text)
    }

    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>, RelayError> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| RelayError::backend(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(RelayError::backend(format!(
                "received non 200 response code: {}",
                resp.status()
            )));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| RelayError::backend(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn upload_dataset(&self, path: &Path, file_name: &str) -> Result<UploadedFile, RelayError> {
        let content = tokio::fs::read(path).await?;
        let form = Form::new()
            .text("purpose", "fine-tune")
            .part("file", Part::bytes(content).file_name(file_name.to_string()));
        let resp = self
            .http
            .post(self.url("files"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| RelayError::backend(e.to_string()))?;
        Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e| RelayError::backend(e.to_string()))
    }

    async fn create_fine_tune(&self, file_id: &str, suffix: &str) -> Result<FineTuneJob, RelayError> {
        let body = serde_json::json!({
            "training_file": file_id,
            "model": self.settings.fine_tune_model,
            "suffix": suffix,
        });
        let resp = self
            .http
            .post(self.url("fine_tuning/jobs"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RelayError::backend(e.to_string()))?;
        let mut job: FineTuneJob = Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e| RelayError::backend(e.to_string()))?;

        // 事件只用于回复展示，拉取失败不影响任务本身
        match self.fine_tune_events(&job.id).await {
            Ok(events) => job.events = events,
            Err(e) => tracing::warn!(job = %job.id, "failed to load fine-tune events: {}", e),
        }
        Ok(job)
    }

    async fn list_fine_tunes(&self) -> Result<Vec<FineTuneJob>, RelayError> {
        let resp = self
            .http
            .get(self.url("fine_tuning/jobs"))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| RelayError::backend(e.to_string()))?;
        let list: ListResponse<FineTuneJob> = Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e| RelayError::backend(e.to_string()))?;
        Ok(list.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turns_map_to_openai_roles() {
        let turns = vec![
            Turn::system("persona"),
            Turn::user("hi"),
            Turn::assistant("hello"),
        ];
        let messages = OpenAiBackend::to_openai_messages(&turns).unwrap();
        assert_eq!(messages.len(), 3);
        assert!(matches!(messages[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(messages[1], ChatCompletionRequestMessage::User(_)));
        assert!(matches!(messages[2], ChatCompletionRequestMessage::Assistant(_)));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let settings = LlmSection {
            base_url: Some("http://localhost:8080/v1/".to_string()),
            ..LlmSection::default()
        };
        let backend = OpenAiBackend::new(settings, "sk-test", None).unwrap();
        assert_eq!(backend.url("files"), "http://localhost:8080/v1/files");
    }

    #[test]
    fn test_fine_tune_job_deserializes_minimal() {
        let job: FineTuneJob = serde_json::from_str(r#"{"id":"ftjob-1","status":"queued"}"#).unwrap();
        assert_eq!(job.id, "ftjob-1");
        assert!(job.events.is_empty());
        assert!(job.fine_tuned_model.is_none());
    }
}
