//! 有界重试
//!
//! 固定次数、固定间隔，不区分错误类型，也不做指数退避。
//! 所有对外调用（后端请求、消息发送）都经过这里。

use std::future::Future;
use std::time::Duration;

/// 默认最大尝试次数
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// 默认重试间隔
pub const DEFAULT_DELAY: Duration = Duration::from_millis(500);

/// 重试策略：最大尝试次数 + 每次失败后的固定等待
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// 最多调用 `max_attempts` 次；首次成功立即返回，全部失败返回最后一次的错误
    pub async fn run<T, E, F, Fut>(&self, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        retry(self.max_attempts, self.delay, op).await
    }

    /// 无上限重试，直到成功（失败不会返回给调用方）
    pub async fn once<T, E, F, Fut>(&self, op: F) -> T
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        once(self.delay, op).await
    }
}

/// 有界重试：共尝试 `max_attempts` 次，两次尝试之间 sleep `delay`；最后一次失败后立即返回
pub async fn retry<T, E, F, Fut>(max_attempts: usize, delay: Duration, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                tracing::warn!(attempt, max_attempts, "operation failed: {}", e);
                if attempt >= max_attempts {
                    return Err(e);
                }
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// 无限重试：只用于「最终一定会成功、且失败无处可报」的场景
pub async fn once<T, E, F, Fut>(delay: Duration, mut op: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    loop {
        match op().await {
            Ok(value) => return value,
            Err(e) => {
                tracing::warn!("operation failed, retrying: {}", e);
                tokio::time::sleep(delay).await;
            }
        }
    }
}
