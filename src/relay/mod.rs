//! 中继：入站消息、指令识别、按类型分发

pub mod command;
pub mod dispatcher;
pub mod message;

pub use command::{message_body, recognize, Command};
pub use dispatcher::{Dispatcher, DispatcherSettings, Outcome};
pub use message::{Message, MessageKind, Transport, FILE_HELPER};
