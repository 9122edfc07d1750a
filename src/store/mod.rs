//! 持久化：联系人暂停状态

pub mod freeze;

pub use freeze::{freeze_key, FreezeStore, MemoryFreezeStore, SqliteFreezeStore, FREEZE_MARKER};
