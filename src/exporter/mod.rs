//! 微调数据集导出

pub mod dataset;

pub use dataset::{compose_dataset, ChatDbExporter, ChatLine, DatasetExporter, DatasetFile, PromptCompletion};
