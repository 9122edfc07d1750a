//! 推理后端：抽象与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::MockBackend;
pub use openai::OpenAiBackend;
pub use traits::{Backend, FineTuneEvent, FineTuneJob, UploadedFile};
