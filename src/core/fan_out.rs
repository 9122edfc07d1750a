//! 尽力而为的并发扇出
//!
//! 每个任务独立 spawn，彼此互不取消；单个任务的失败只记日志，不向调用方传播。
//! 返回的句柄可以 `detach`（任务继续在后台运行），也可以 `join` 等待全部结束。

use std::future::Future;

use tokio::task::JoinHandle;

/// 扇出任务句柄
#[derive(Debug, Default)]
pub struct FanOutHandle {
    handles: Vec<JoinHandle<bool>>,
}

impl FanOutHandle {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// 放弃等待：任务继续在后台运行，结果只体现在日志里
    pub fn detach(self, label: &'static str) {
        tracing::debug!(label, tasks = self.handles.len(), "fan-out detached");
    }

    /// 等待全部任务结束，返回成功的任务数
    pub async fn join(self) -> usize {
        let results = futures_util::future::join_all(self.handles).await;
        results
            .into_iter()
            .filter(|r| matches!(r, Ok(true)))
            .count()
    }
}

/// 为每个 future 启动一个独立任务；错误被吞掉（warn 日志），不影响其它任务
pub fn best_effort_fan_out<I, Fut, E>(label: &'static str, tasks: I) -> FanOutHandle
where
    I: IntoIterator<Item = Fut>,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let handles = tasks
        .into_iter()
        .enumerate()
        .map(|(index, task)| {
            tokio::spawn(async move {
                match task.await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(label, index, "fan-out task dropped: {}", e);
                        false
                    }
                }
            })
        })
        .collect();
    FanOutHandle { handles }
}
