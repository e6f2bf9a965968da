//! Agent 规格描述与输入校验
//!
//! 描述文件由外部编写流程产出：`{agent_id, input_schema, algorithm, tools: {mode: [tool, ...]}}`。
//! 输入校验在任何后端调用之前完成，失败时不产生 token 消耗与会话修改。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::AgentError;

/// 未指定 mode 时使用的工具列表键
pub const DEFAULT_MODE: &str = "default";

/// 字段类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Enum,
    Object,
    Array,
    Boolean,
    Integer,
}

impl FieldType {
    fn matches(self, value: &Value) -> bool {
        match self {
            FieldType::String | FieldType::Enum => value.is_string(),
            FieldType::Object => value.is_object(),
            FieldType::Array => value.is_array(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Enum => "enum",
            FieldType::Object => "object",
            FieldType::Array => "array",
            FieldType::Boolean => "boolean",
            FieldType::Integer => "integer",
        }
    }
}

/// 单个输入字段的约束
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    /// 允许的取值集合（enum 类型必填，string 类型可选）
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Agent 角色：加载时解析，运行时不再按字符串分派
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    #[default]
    Specialist,
    /// 协调者：扇出到多个子 Agent 并汇总
    Orchestrator,
}

/// Agent 规格（启动时载入，之后只读）
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentSpecification {
    pub agent_id: String,
    #[serde(default)]
    pub description: String,
    /// 字段名 -> 约束；BTreeMap 保证校验顺序稳定
    #[serde(default)]
    pub input_schema: BTreeMap<String, FieldSpec>,
    /// 用于构造 system prompt 的算法描述
    #[serde(default)]
    pub algorithm: String,
    /// mode -> 允许使用的工具名
    #[serde(default)]
    pub tools: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub role: AgentRole,
    /// 约定必须至少调用一次工具
    #[serde(default)]
    pub requires_action: bool,
    /// 覆盖全局质量阈值
    #[serde(default)]
    pub pass_threshold: Option<f64>,
}

impl AgentSpecification {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            description: String::new(),
            input_schema: BTreeMap::new(),
            algorithm: String::new(),
            tools: BTreeMap::new(),
            role: AgentRole::Specialist,
            requires_action: false,
            pass_threshold: None,
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.input_schema.insert(name.into(), spec);
        self
    }

    pub fn with_algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.algorithm = algorithm.into();
        self
    }

    pub fn with_tools(mut self, mode: impl Into<String>, tools: Vec<String>) -> Self {
        self.tools.insert(mode.into(), tools);
        self
    }

    pub fn with_role(mut self, role: AgentRole) -> Self {
        self.role = role;
        self
    }

    pub fn requiring_action(mut self) -> Self {
        self.requires_action = true;
        self
    }

    pub fn is_orchestrator(&self) -> bool {
        self.role == AgentRole::Orchestrator
    }

    /// 某个 mode 下允许的工具；mode 不存在时为空
    pub fn tools_for_mode(&self, mode: &str) -> &[String] {
        self.tools.get(mode).map(Vec::as_slice).unwrap_or(&[])
    }

    /// 按 schema 校验输入：必填、类型、枚举成员
    pub fn validate_input(&self, input: &Map<String, Value>) -> Result<(), AgentError> {
        for (name, field) in &self.input_schema {
            let value = match input.get(name) {
                Some(Value::Null) | None => {
                    if field.required {
                        return Err(invalid(name, "required field missing"));
                    }
                    continue;
                }
                Some(v) => v,
            };

            if !field.field_type.matches(value) {
                return Err(invalid(
                    name,
                    format!("expected {}, got {}", field.field_type.name(), json_type(value)),
                ));
            }

            if let (Some(allowed), Some(s)) = (&field.allowed, value.as_str()) {
                if !allowed.iter().any(|a| a == s) {
                    return Err(invalid(
                        name,
                        format!("'{s}' is not one of [{}]", allowed.join(", ")),
                    ));
                }
            } else if field.field_type == FieldType::Enum {
                return Err(invalid(name, "enum field declares no allowed values"));
            }
        }
        Ok(())
    }
}

impl FieldSpec {
    pub fn required(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: true,
            allowed: None,
            description: None,
        }
    }

    pub fn optional(field_type: FieldType) -> Self {
        Self {
            required: false,
            ..Self::required(field_type)
        }
    }

    pub fn with_allowed(mut self, values: &[&str]) -> Self {
        self.allowed = Some(values.iter().map(|v| v.to_string()).collect());
        self
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> AgentError {
    AgentError::ValidationError {
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
