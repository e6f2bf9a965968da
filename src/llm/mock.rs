//! 无需 API 的后端
//!
//! MockLlmClient：没有 API Key 时使用，回显最后一条 user 消息并按约定结构返回。
//! ScriptedLlmClient：按顺序返回预置回复，记录每次收到的消息，用于确定性测试。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::llm::{LlmClient, LlmResponse};
use crate::session::{Message, Role};

#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    fn backend_id(&self) -> String {
        "mock".to_string()
    }

    async fn complete(&self, messages: &[Message]) -> Result<LlmResponse, String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        let body = json!({
            "result": format!("Echo from mock backend: {last_user}"),
            "metadata": { "backend": "mock" },
            "limitations": "The mock backend did not inspect anything; results are not verified.",
        });
        Ok(LlmResponse {
            content: body.to_string(),
            prompt_tokens: messages.iter().map(|m| m.content.len() as u64 / 4).sum(),
            completion_tokens: 0,
        })
    }
}

/// 预置回复的后端；回复耗尽后返回错误
pub struct ScriptedLlmClient {
    responses: Mutex<VecDeque<Result<String, String>>>,
    calls: AtomicUsize,
    seen: Mutex<Vec<Vec<Message>>>,
    delay: Option<Duration>,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(|s| Ok(s.into())).collect()),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// 每次往返前等待，用于并发与超时测试
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 追加一条失败回复
    pub fn push_error(&self, message: impl Into<String>) {
        if let Ok(mut q) = self.responses.lock() {
            q.push_back(Err(message.into()));
        }
    }

    pub fn push(&self, response: impl Into<String>) {
        if let Ok(mut q) = self.responses.lock() {
            q.push_back(Ok(response.into()));
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 每次调用收到的完整消息列表
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    fn backend_id(&self) -> String {
        "scripted".to_string()
    }

    async fn complete(&self, messages: &[Message]) -> Result<LlmResponse, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(messages.to_vec());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self
            .responses
            .lock()
            .map_err(|_| "script poisoned".to_string())?
            .pop_front()
            .unwrap_or_else(|| Err("script exhausted".to_string()))?;
        Ok(LlmResponse {
            prompt_tokens: messages.iter().map(|m| m.content.len() as u64).sum(),
            completion_tokens: next.len() as u64,
            content: next,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_in_order_then_exhausted() {
        let llm = ScriptedLlmClient::new(["one", "two"]);
        assert_eq!(llm.complete(&[Message::user("a")]).await.unwrap().content, "one");
        assert_eq!(llm.complete(&[Message::user("b")]).await.unwrap().content, "two");
        assert!(llm.complete(&[]).await.is_err());
        assert_eq!(llm.call_count(), 3);
        assert_eq!(llm.requests()[1][0].content, "b");
    }

    #[tokio::test]
    async fn test_mock_echoes_last_user_message() {
        let out = MockLlmClient
            .complete(&[Message::system("sys"), Message::user("hello")])
            .await
            .unwrap();
        let v: serde_json::Value = serde_json::from_str(&out.content).unwrap();
        assert!(v["result"].as_str().unwrap().contains("hello"));
    }
}
