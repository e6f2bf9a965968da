//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock / Scripted）实现 LlmClient；一次 complete 即一次后端往返。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::session::Message;

/// 一次往返的结果：文本与本次 token 用量
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl LlmResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 后端标识，写入 execution_metadata.backend
    fn backend_id(&self) -> String;

    async fn complete(&self, messages: &[Message]) -> Result<LlmResponse, String>;
}
