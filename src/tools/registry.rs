//! 进程内工具注册表
//!
//! 宿主内实现的工具（Tool trait）按名注册到 ToolRegistry，再由 InProcessProvider
//! 包装成与子进程提供者相同的 ToolProvider，路由层不区分两者。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::AgentError;
use crate::tools::{ToolDescriptor, ToolProvider};

/// 工具 trait：名称、描述、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// 工具描述（写入工具目录，供模型理解）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认不限参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String>;
}

/// 按名称存储 Arc<dyn Tool>；BTreeMap 保证目录顺序稳定
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools
            .values()
            .map(|tool| ToolDescriptor {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.parameters_schema(),
            })
            .collect()
    }
}

/// 进程内提供者
pub struct InProcessProvider {
    id: String,
    registry: ToolRegistry,
}

impl InProcessProvider {
    pub fn new(id: impl Into<String>, registry: ToolRegistry) -> Self {
        Self {
            id: id.into(),
            registry,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }
}

#[async_trait]
impl ToolProvider for InProcessProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, AgentError> {
        Ok(self.registry.descriptors())
    }

    async fn call_tool(&self, name: &str, args: Value) -> Result<String, AgentError> {
        let tool = self
            .registry
            .get(name)
            .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))?;
        tool.execute(args)
            .await
            .map_err(|message| AgentError::ToolExecutionError {
                tool: name.to_string(),
                message,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Upper;

    #[async_trait]
    impl Tool for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn description(&self) -> &str {
            "Uppercase text"
        }

        async fn execute(&self, args: Value) -> Result<String, String> {
            args.get("text")
                .and_then(Value::as_str)
                .map(str::to_uppercase)
                .ok_or_else(|| "missing text".to_string())
        }
    }

    #[tokio::test]
    async fn test_in_process_provider_lists_and_calls() {
        let provider = InProcessProvider::new("local", ToolRegistry::new().with(Upper));
        let tools = provider.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "upper");
        assert_eq!(provider.call_tool("upper", json!({"text": "ok"})).await.unwrap(), "OK");
    }

    #[tokio::test]
    async fn test_unknown_and_failing_tools() {
        let provider = InProcessProvider::new("local", ToolRegistry::new().with(Upper));
        let err = provider.call_tool("lower", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), "tool_not_found");
        let err = provider.call_tool("upper", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), "tool_execution_error");
    }
}
