//! 外部集成：控制台通道（真实聊天通道的协议不在本 crate 内）

pub mod console;

pub use console::{run_console, spawn_line_reader, stdin_lines, ConsoleTransport, CONSOLE_SENDER};
