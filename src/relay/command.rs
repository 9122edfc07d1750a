//! 指令识别
//!
//! 对原始文本做 trim + 小写后精确匹配暂停 / 恢复 / 导出 / 列表指令；
//! 都不匹配时再检查引用回复格式，尾部为空或 `repeat|重复|ref` 时用被引用的内容替换本条消息；
//! 其它尾部文本则作为本条消息的实际内容（见 [`message_body`]）。

use std::sync::OnceLock;

use regex::Regex;

/// 暂停同义词
pub const PAUSE_WORDS: &[&str] = &["end", "stop", "break", "暂停", "停止", "停", "停停", "停停停", "停停停停"];

/// 恢复同义词
pub const RESUME_WORDS: &[&str] = &["begin", "start", "resume", "continue", "继续", "开始"];

pub const EXPORT_DATASET: &str = "create fine tune";
pub const LIST_EXPORTS: &str = "list fine tune";

/// 引用回复时表示「重新提交被引用内容」的尾部词
pub const REFERENCE_WORDS: &[&str] = &["repeat", "重复", "ref"];

/// 识别结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Pause,
    Resume,
    ExportDataset,
    ListExports,
    /// 用被引用的内容替换本条消息
    Rewrite(String),
    Plain,
}

static QUOTE_RE: OnceLock<Regex> = OnceLock::new();

/// 引用回复格式：`「发送者：内容」` + 一行由空格分隔的短横线 + 尾部文本
fn quote_pattern() -> &'static Regex {
    QUOTE_RE.get_or_init(|| Regex::new(r"「([^：」\n]+)：([^」\n]+)」\n-(?: -)+\n(?s:(.*))").unwrap())
}

/// 对一条原始文本做指令识别
pub fn recognize(text: &str) -> Command {
    let folded = text.trim().to_lowercase();
    let folded = folded.as_str();

    if PAUSE_WORDS.contains(&folded) {
        return Command::Pause;
    }
    if RESUME_WORDS.contains(&folded) {
        return Command::Resume;
    }
    if folded == EXPORT_DATASET {
        return Command::ExportDataset;
    }
    if folded == LIST_EXPORTS {
        return Command::ListExports;
    }

    if let Some(caps) = quote_pattern().captures(text) {
        let trailer = caps.get(3).map(|m| m.as_str().trim()).unwrap_or_default();
        if trailer.is_empty() || REFERENCE_WORDS.contains(&trailer) {
            if let Some(quoted) = caps.get(2) {
                return Command::Rewrite(quoted.as_str().to_string());
            }
        }
    }

    Command::Plain
}

/// 普通消息的实际内容：引用回复只取分隔线之后的文本，其余原样返回
pub fn message_body(text: &str) -> &str {
    quote_pattern()
        .captures(text)
        .and_then(|caps| caps.get(3))
        .map(|m| m.as_str().trim())
        .filter(|trailer| !trailer.is_empty())
        .unwrap_or(text)
}
