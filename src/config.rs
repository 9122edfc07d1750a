//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `RELAY__*` 覆盖（双下划线表示嵌套，如 `RELAY__RETRY__MAX_ATTEMPTS=5`）。
//! 出站代理与后端凭据不在这里，由进程环境变量 `proxy` / `token` 提供。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::RetryPolicy;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub retry: RetrySection,
    pub llm: LlmSection,
    pub exporter: ExporterSection,
}

/// [app] 段：暂停状态库路径、对话窗口、图片关键词
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub db_path: PathBuf,
    /// 每次发给后端的最近轮数
    pub history_window: usize,
    pub image_keywords: Vec<String>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("db/freeze.sqlite3"),
            history_window: 5,
            image_keywords: vec!["图".into(), "照片".into()],
        }
    }
}

/// [retry] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: usize,
    pub delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 500,
        }
    }
}

impl RetrySection {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.delay_ms))
    }
}

/// [llm] 段：OpenAI 兼容端点与各能力的模型
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 未设置时用官方端点
    pub base_url: Option<String>,
    pub model: String,
    pub image_size: String,
    pub transcription_model: String,
    pub fine_tune_model: String,
    /// 每个新会话开头的 system 提示
    pub persona: Vec<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            base_url: None,
            model: "gpt-3.5-turbo".to_string(),
            image_size: "512x512".to_string(),
            transcription_model: "whisper-1".to_string(),
            fine_tune_model: "gpt-3.5-turbo".to_string(),
            persona: vec![
                "You are ChatGPT, a large language model trained by OpenAI. Answer as concisely as possible.\nKnowledge cutoff: 2021-09-01\nCurrent date: 2023-03-02".to_string(),
                "Please use chinese.".to_string(),
            ],
        }
    }
}

/// [exporter] 段：本地聊天库位置与密钥
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExporterSection {
    /// 聊天库根目录；未设置时用桌面客户端在 `$HOME` 下的容器目录
    pub home: Option<PathBuf>,
    /// 加密库的十六进制密钥
    pub key: Option<String>,
    /// 用于定位目标聊天的关键词
    pub keyword: String,
}

impl Default for ExporterSection {
    fn default() -> Self {
        Self {
            home: None,
            key: None,
            keyword: "keyword".to_string(),
        }
    }
}

impl ExporterSection {
    pub fn home_dir(&self) -> PathBuf {
        if let Some(home) = &self.home {
            return home.clone();
        }
        let user_home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default();
        user_home.join(
            "Library/Containers/com.tencent.xinWeChat/Data/Library/Application Support/com.tencent.xinWeChat",
        )
    }
}

/// 从 config 目录加载配置，环境变量 RELAY__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 RELAY__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("RELAY")
            .prefix_separator("__")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("app.image_keywords")
            .with_list_parse_key("llm.persona")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
