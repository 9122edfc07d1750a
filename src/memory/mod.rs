//! 记忆层：对话记录与按联系人划分的会话缓存

pub mod conversation;
pub mod session_cache;

pub use conversation::{last_n, Role, Session, Turn};
pub use session_cache::{SessionCache, SessionHandle};
