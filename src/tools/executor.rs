//! 工具执行器
//!
//! 包装 ToolRouter：每次调用输出一条结构化审计日志（JSON），并把结果整理成 ToolInvocation 记录。
//! 普通失败只记入记录；熔断属于致命错误，直接向上返回。

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::AgentError;
use crate::tools::{alias, ToolRouter};

/// 一次工具调用的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success { content: String },
    Error { kind: String, message: String },
}

/// 一次工具调用的完整记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub requested_name: String,
    pub tool: String,
    pub arguments: Value,
    pub provider_id: Option<String>,
    pub outcome: ToolOutcome,
    pub duration_ms: u64,
}

impl ToolInvocation {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Success { .. })
    }

    /// 成功内容或错误信息，用于追加 tool 轮次
    pub fn render(&self) -> String {
        match &self.outcome {
            ToolOutcome::Success { content } => format!("[{}] {}", self.tool, content),
            ToolOutcome::Error { kind, message } => {
                format!("[{}] error ({kind}): {message}", self.tool)
            }
        }
    }

    /// 未进入路由就被拒绝的调用（例如当前模式不允许该工具）
    pub fn rejected(name: &str, args: Value, err: &AgentError) -> Self {
        let (tool, arguments) = alias::canonicalize(name, args);
        Self {
            requested_name: name.to_string(),
            tool,
            arguments,
            provider_id: None,
            outcome: ToolOutcome::Error {
                kind: err.kind().to_string(),
                message: err.to_string(),
            },
            duration_ms: 0,
        }
    }
}

pub struct ToolExecutor {
    router: Arc<ToolRouter>,
}

impl ToolExecutor {
    pub fn new(router: Arc<ToolRouter>) -> Self {
        Self { router }
    }

    pub fn router(&self) -> &Arc<ToolRouter> {
        &self.router
    }

    /// 执行工具；只有致命错误（熔断）返回 Err
    pub async fn execute(&self, tool_name: &str, args: Value) -> Result<ToolInvocation, AgentError> {
        let start = Instant::now();
        let preview = args_preview(&args);
        let result = self.router.invoke(tool_name, args.clone()).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let invocation = match result {
            Ok(call) => ToolInvocation {
                requested_name: tool_name.to_string(),
                tool: call.canonical_name,
                arguments: call.arguments,
                provider_id: Some(call.provider_id),
                outcome: ToolOutcome::Success { content: call.content },
                duration_ms,
            },
            Err(e) => {
                let mut invocation = ToolInvocation::rejected(tool_name, args, &e);
                invocation.duration_ms = duration_ms;
                invocation.provider_id = self
                    .router
                    .tool(&invocation.tool)
                    .map(|t| t.provider_id.clone())
                    .or_else(|| self.router.cached_provider(&invocation.tool));
                self.audit(&invocation, &preview);
                if e.is_fatal() {
                    return Err(e);
                }
                return Ok(invocation);
            }
        };
        self.audit(&invocation, &preview);
        Ok(invocation)
    }

    fn audit(&self, invocation: &ToolInvocation, args_preview: &str) {
        let outcome = match &invocation.outcome {
            ToolOutcome::Success { .. } => "ok",
            ToolOutcome::Error { kind, .. } => kind.as_str(),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": invocation.tool,
            "requested": invocation.requested_name,
            "provider": invocation.provider_id,
            "ok": invocation.is_success(),
            "outcome": outcome,
            "duration_ms": invocation.duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit, "tool");
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{InProcessProvider, RouterOptions, Tool, ToolProvider, ToolRegistry};
    use async_trait::async_trait;
    use serde_json::json;

    struct Fails;

    #[async_trait]
    impl Tool for Fails {
        fn name(&self) -> &str {
            "flaky"
        }

        fn description(&self) -> &str {
            "always fails"
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            Err("boom".to_string())
        }
    }

    async fn executor() -> ToolExecutor {
        let provider: Arc<dyn ToolProvider> =
            Arc::new(InProcessProvider::new("local", ToolRegistry::new().with(Fails)));
        ToolExecutor::new(Arc::new(ToolRouter::discover(vec![provider], RouterOptions::default()).await))
    }

    #[tokio::test]
    async fn test_failures_recorded_until_breaker_trips() {
        let executor = executor().await;
        for _ in 0..4 {
            let inv = executor.execute("flaky", json!({})).await.unwrap();
            assert!(!inv.is_success());
            assert_eq!(inv.provider_id.as_deref(), Some("local"));
            assert!(inv.render().contains("boom"));
        }
        let err = executor.execute("flaky", json!({})).await.unwrap_err();
        assert!(err.is_fatal());
        let err = executor.execute("flaky", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), "circuit_breaker_tripped");
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let v = serde_json::to_value(ToolOutcome::Success { content: "x".into() }).unwrap();
        assert_eq!(v, json!({"status": "success", "content": "x"}));
    }
}
