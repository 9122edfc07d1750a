//! 核心层：错误类型、有界重试、并发扇出、优雅关闭

pub mod error;
pub mod fan_out;
pub mod retry;
pub mod shutdown;

pub use error::RelayError;
pub use fan_out::{best_effort_fan_out, FanOutHandle};
pub use retry::{once, retry, RetryPolicy};
pub use shutdown::{
    run_with_graceful_shutdown, FreezeStoreCleanup, ShutdownCleanup, ShutdownCoordinator,
    ShutdownManager, ShutdownReason,
};
