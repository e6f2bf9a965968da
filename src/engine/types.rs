//! 执行请求与结果

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::agents::DEFAULT_MODE;
use crate::refinement::RefinementSummary;
use crate::tools::ToolInvocation;
use crate::validation::{HonestyAssessment, QualityAssessment};

/// 执行上下文中识别的键
pub const CONTEXT_MODE: &str = "mode";
pub const CONTEXT_SESSION_ID: &str = "session_id";
pub const CONTEXT_TASK: &str = "task";
/// 协调者上下文中按子 Agent id 覆盖输入字段：`{"child_inputs": {"<agent_id>": {...}}}`
pub const CONTEXT_CHILD_INPUTS: &str = "child_inputs";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub agent_id: String,
    #[serde(default)]
    pub input: Map<String, Value>,
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl ExecutionRequest {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            ..Self::default()
        }
    }

    pub fn with_input(mut self, key: impl Into<String>, value: Value) -> Self {
        self.input.insert(key.into(), value);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn mode(&self) -> &str {
        context_mode(&self.context)
    }
}

pub(crate) fn context_mode(context: &Map<String, Value>) -> &str {
    context
        .get(CONTEXT_MODE)
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_MODE)
}

/// 修正计数使用的任务标识：context.task，否则为序列化后的输入
pub(crate) fn context_task(context: &Map<String, Value>, input: &Map<String, Value>) -> String {
    context
        .get(CONTEXT_TASK)
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| serde_json::to_string(input).unwrap_or_default())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub agent_id: String,
    pub output_data: Map<String, Value>,
    pub execution_metadata: Map<String, Value>,
    pub quality_score: f64,
    pub quality: QualityAssessment,
    pub honesty: HonestyAssessment,
    #[serde(default)]
    pub tool_invocations: Vec<ToolInvocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refinement: Option<RefinementSummary>,
}

impl ExecutionResult {
    pub fn session_id(&self) -> Option<&str> {
        self.execution_metadata.get("session_id").and_then(Value::as_str)
    }

    /// 对外 API 的三元组形态
    pub fn to_api_json(&self) -> Value {
        serde_json::json!({
            "output_data": self.output_data,
            "execution_metadata": self.execution_metadata,
            "quality_score": self.quality_score,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChildStatus {
    Succeeded,
    Failed,
}

/// 协调器中一个子 Agent 的记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildRecord {
    pub agent_id: String,
    pub status: ChildStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}
