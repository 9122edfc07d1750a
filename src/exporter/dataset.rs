//! 微调数据集导出
//!
//! 扫描桌面客户端的本地聊天库（`msg_*.db`），找到包含关键词的那段聊天，
//! 把「对方一句 + 自己紧接着的一句」组成 `{prompt, completion}`，按行写成 JSONL 临时文件。

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::core::RelayError;

/// 一条训练样本
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptCompletion {
    pub prompt: String,
    pub completion: String,
}

/// 聊天库中的一行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    /// 是否为本人发出
    pub is_self: bool,
    pub content: String,
}

/// 导出的临时数据集文件；drop 时删除
#[derive(Debug)]
pub struct DatasetFile {
    path: PathBuf,
}

impl DatasetFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DatasetFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), "failed to remove dataset: {}", e);
            }
        }
    }
}

/// 数据集导出接口
#[async_trait]
pub trait DatasetExporter: Send + Sync {
    async fn generate_dataset(&self, keyword: &str) -> Result<DatasetFile, RelayError>;
}

/// 把相邻的（对方, 本人）消息组成样本写入 `out`，返回样本数
pub fn compose_dataset<W: Write>(lines: &[ChatLine], out: W) -> Result<usize, RelayError> {
    let mut writer = BufWriter::new(out);
    let mut count = 0;
    for pair in lines.windows(2) {
        let (prompt, completion) = (&pair[0], &pair[1]);
        if !prompt.is_self && completion.is_self {
            let sample = PromptCompletion {
                prompt: prompt.content.clone(),
                completion: completion.content.clone(),
            };
            let json = serde_json::to_string(&sample)
                .map_err(|e| RelayError::exporter(e.to_string()))?;
            writeln!(writer, "{}", json)?;
            count += 1;
        }
    }
    writer.flush()?;
    Ok(count)
}

/// 本地聊天库导出器
#[derive(Debug, Clone)]
pub struct ChatDbExporter {
    home: PathBuf,
    key: Option<String>,
}

impl ChatDbExporter {
    /// `home` 为聊天库根目录；`key` 为加密库的十六进制密钥（可选）
    pub fn new(home: impl Into<PathBuf>, key: Option<String>) -> Self {
        Self {
            home: home.into(),
            key,
        }
    }

    /// 查找所有 `msg_*.db`
    fn database_paths(&self) -> Result<Vec<PathBuf>, RelayError> {
        let mut paths = Vec::new();
        for entry in WalkDir::new(&self.home) {
            let entry = entry.map_err(|e| RelayError::exporter(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if name.starts_with("msg_") && name.ends_with(".db") {
                paths.push(entry.into_path());
            }
        }
        paths.sort();
        Ok(paths)
    }

    fn export_blocking(&self, keyword: &str) -> Result<DatasetFile, RelayError> {
        for path in self.database_paths()? {
            tracing::info!(db = %path.display(), "searching chat database");
            if let Some(lines) = scan_database(&path, self.key.as_deref(), keyword)? {
                tracing::info!(messages = lines.len(), "chat found");
                let out = std::env::temp_dir().join(format!("ft_ds_{}.jsonl", uuid::Uuid::new_v4()));
                let file = DatasetFile::new(out);
                let samples = compose_dataset(&lines, std::fs::File::create(file.path())?)?;
                tracing::info!(samples, path = %file.path().display(), "dataset written");
                return Ok(file);
            }
        }
        Err(RelayError::exporter("chat not found"))
    }
}

#[async_trait]
impl DatasetExporter for ChatDbExporter {
    async fn generate_dataset(&self, keyword: &str) -> Result<DatasetFile, RelayError> {
        let exporter = self.clone();
        let keyword = keyword.to_string();
        tokio::task::spawn_blocking(move || exporter.export_blocking(&keyword))
            .await
            .map_err(|e| RelayError::exporter(e.to_string()))?
    }
}

/// 用十六进制原始密钥解锁 SQLCipher 库（客户端使用 v3 兼容格式）
fn apply_key(conn: &Connection, key: &str) -> Result<(), RelayError> {
    if !key.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(RelayError::exporter("database key must be hex"));
    }
    conn.execute_batch(&format!(
        "PRAGMA key = \"x'{}'\"; PRAGMA cipher_compatibility = 3;",
        key
    ))?;
    Ok(())
}

/// 在单个库里找到第一张包含关键词的聊天表
fn scan_database(path: &Path, key: Option<&str>, keyword: &str) -> Result<Option<Vec<ChatLine>>, RelayError> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    if let Some(key) = key {
        apply_key(&conn, key)?;
    }

    let tables: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table'
               AND name NOT LIKE 'sqlite_%'
               AND name LIKE 'Chat_%'
               AND name NOT LIKE '%_dels'",
        )?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let names = rows.collect::<Result<Vec<String>, _>>()?;
        names
    };

    for table in tables {
        if let Some(lines) = scan_table(&conn, &table, keyword)? {
            return Ok(Some(lines));
        }
    }
    Ok(None)
}

/// 顺序读取聊天表，跳过 XML 类消息，读到包含关键词的一行为止
fn scan_table(conn: &Connection, table: &str, keyword: &str) -> Result<Option<Vec<ChatLine>>, RelayError> {
    let sql = format!(
        "SELECT msgContent, mesDes FROM \"{}\"",
        table.replace('"', "\"\"")
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;

    let mut lines = Vec::new();
    while let Some(row) = rows.next()? {
        let content: String = row.get(0)?;
        let des: i64 = row.get(1)?;
        if content.contains("<?xml") || content.contains("<msg>") {
            continue;
        }
        let hit = content.contains(keyword);
        lines.push(ChatLine {
            is_self: des == 0,
            content,
        });
        if hit {
            return Ok(Some(lines));
        }
    }
    Ok(None)
}
