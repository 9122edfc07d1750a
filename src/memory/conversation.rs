//! 对话记录：角色、单轮发言、会话
//!
//! 会话只追加、不删除、不重排；发送给后端时才按窗口截取最近 N 条。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// 单轮发言
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 取切片末尾最多 `n` 个元素；不足 `n` 时返回全部
pub fn last_n<T>(items: &[T], n: usize) -> &[T] {
    &items[items.len().saturating_sub(n)..]
}

/// 单个联系人的完整对话（进程内存活，不落盘）
#[derive(Clone, Debug, Default)]
pub struct Session {
    turns: Vec<Turn>,
}

impl Session {
    /// 以固定的 system 提示开头创建会话
    pub fn seeded(seed: &[Turn]) -> Self {
        Self {
            turns: seed.to_vec(),
        }
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last_n(&self, n: usize) -> Vec<Turn> {
        last_n(&self.turns, n).to_vec()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
