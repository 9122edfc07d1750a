//! 会话缓存：联系人 ID -> 对话记录
//!
//! 分片 map，每个分片一把读写锁；每个会话自带一把互斥锁，持有者为当前处理该联系人消息的任务。
//! 同一联系人的两条消息若被并发处理，追加顺序可能交错，这里不做额外串行化。

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use super::conversation::{Session, Turn};

/// 会话句柄：多个任务共享同一份对话
pub type SessionHandle = Arc<Mutex<Session>>;

const DEFAULT_SHARDS: usize = 16;

/// 并发安全的会话缓存；新会话以固定 system 提示开头
pub struct SessionCache {
    shards: Vec<RwLock<HashMap<String, SessionHandle>>>,
    seed: Vec<Turn>,
}

impl SessionCache {
    pub fn new(seed: Vec<Turn>) -> Self {
        Self::with_shards(seed, DEFAULT_SHARDS)
    }

    pub fn with_shards(seed: Vec<Turn>, shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|_| RwLock::new(HashMap::new())).collect(),
            seed,
        }
    }

    fn shard(&self, id: &str) -> &RwLock<HashMap<String, SessionHandle>> {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        let index = (hasher.finish() % self.shards.len() as u64) as usize;
        &self.shards[index]
    }

    /// 获取或创建会话；首次创建时写入种子提示
    pub async fn get_or_create(&self, id: &str) -> SessionHandle {
        let shard = self.shard(id);
        {
            let sessions = shard.read().await;
            if let Some(session) = sessions.get(id) {
                return Arc::clone(session);
            }
        }

        let mut sessions = shard.write().await;
        if let Some(session) = sessions.get(id) {
            return Arc::clone(session);
        }

        tracing::debug!(correspondent = id, seed = self.seed.len(), "new session");
        let session = Arc::new(Mutex::new(Session::seeded(&self.seed)));
        sessions.insert(id.to_string(), Arc::clone(&session));
        session
    }

    /// 获取会话（不创建）
    pub async fn get(&self, id: &str) -> Option<SessionHandle> {
        self.shard(id).read().await.get(id).cloned()
    }

    /// 追加一轮发言（会话不存在时先创建并写入种子）
    pub async fn append(&self, id: &str, turn: Turn) {
        let session = self.get_or_create(id).await;
        session.lock().await.push(turn);
    }

    /// 最近 `n` 轮；会话不存在时返回空
    pub async fn last_n(&self, id: &str, n: usize) -> Vec<Turn> {
        match self.get(id).await {
            Some(session) => session.lock().await.last_n(n),
            None => Vec::new(),
        }
    }

    /// 当前缓存的会话数
    pub async fn len(&self) -> usize {
        let mut total = 0;
        for shard in &self.shards {
            total += shard.read().await.len();
        }
        total
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
