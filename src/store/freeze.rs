//! 暂停状态存储
//!
//! 每个联系人一个键 `<id>_freeze`，值固定为 `"true"`；键存在即暂停，键不存在即正常。
//! 查询时只有「未找到」被视为未暂停，其余存储错误一律向上返回。

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use crate::core::RelayError;

/// 暂停标记的值
pub const FREEZE_MARKER: &str = "true";

/// 联系人对应的存储键
pub fn freeze_key(id: &str) -> String {
    format!("{}_freeze", id)
}

/// 暂停状态存储接口
#[async_trait]
pub trait FreezeStore: Send + Sync {
    async fn is_paused(&self, id: &str) -> Result<bool, RelayError>;

    /// 写入暂停标记（重复写入无副作用）
    async fn pause(&self, id: &str) -> Result<(), RelayError>;

    /// 删除暂停标记（键不存在时也视为成功）
    async fn resume(&self, id: &str) -> Result<(), RelayError>;

    /// 进程退出前关闭底层存储
    async fn close(&self) -> Result<(), RelayError> {
        Ok(())
    }
}

fn store_unavailable(reason: &str) -> RelayError {
    RelayError::Io(std::io::Error::other(format!("freeze store {}", reason)))
}

/// SQLite 实现：单表有序 KV（主键 B-Tree）
pub struct SqliteFreezeStore {
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteFreezeStore {
    /// 打开（或创建）数据库文件；父目录不存在时自动创建
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RelayError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// 内存数据库（测试用）
    pub fn open_in_memory() -> Result<Self, RelayError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, RelayError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            ) WITHOUT ROWID;",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    /// 在阻塞线程池上执行一次数据库操作
    async fn with_conn<T, F>(&self, f: F) -> Result<T, RelayError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| store_unavailable("lock poisoned"))?;
            let conn = guard.as_ref().ok_or_else(|| store_unavailable("closed"))?;
            f(conn).map_err(RelayError::from)
        })
        .await
        .map_err(|e| store_unavailable(&e.to_string()))?
    }
}

#[async_trait]
impl FreezeStore for SqliteFreezeStore {
    async fn is_paused(&self, id: &str) -> Result<bool, RelayError> {
        let key = freeze_key(id);
        let value: Option<String> = self
            .with_conn(move |conn| {
                conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                    row.get(0)
                })
                .optional()
            })
            .await?;
        Ok(value.is_some())
    }

    async fn pause(&self, id: &str) -> Result<(), RelayError> {
        let key = freeze_key(id);
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, FREEZE_MARKER],
            )
        })
        .await?;
        Ok(())
    }

    async fn resume(&self, id: &str) -> Result<(), RelayError> {
        let key = freeze_key(id);
        self.with_conn(move |conn| conn.execute("DELETE FROM kv WHERE key = ?1", params![key]))
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), RelayError> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| store_unavailable("lock poisoned"))?;
            match guard.take() {
                Some(conn) => conn.close().map_err(|(_, e)| RelayError::from(e)),
                None => Ok(()),
            }
        })
        .await
        .map_err(|e| store_unavailable(&e.to_string()))?
    }
}

/// 内存实现（测试与无持久化场景）
#[derive(Debug, Default)]
pub struct MemoryFreezeStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryFreezeStore {
    /// 当前所有键（按序）
    pub fn keys(&self) -> Vec<String> {
        self.entries
            .lock()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl FreezeStore for MemoryFreezeStore {
    async fn is_paused(&self, id: &str) -> Result<bool, RelayError> {
        let entries = self.entries.lock().map_err(|_| store_unavailable("lock poisoned"))?;
        Ok(entries.contains_key(&freeze_key(id)))
    }

    async fn pause(&self, id: &str) -> Result<(), RelayError> {
        let mut entries = self.entries.lock().map_err(|_| store_unavailable("lock poisoned"))?;
        entries.insert(freeze_key(id), FREEZE_MARKER.to_string());
        Ok(())
    }

    async fn resume(&self, id: &str) -> Result<(), RelayError> {
        let mut entries = self.entries.lock().map_err(|_| store_unavailable("lock poisoned"))?;
        entries.remove(&freeze_key(id));
        Ok(())
    }
}
