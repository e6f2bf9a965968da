//! 工具调用格式的 JSON Schema（schemars 生成），拼入 system prompt 以减少格式错误

use schemars::{schema_for, JsonSchema};
use serde_json::Value;
use std::collections::HashMap;

/// 模型输出的工具调用格式：与 engine::parse 接受的 `{"tool": "...", "args": {...}}` 一致
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 工具名，必须是当前模式允许的工具之一
    pub tool: String,
    /// 工具参数，依工具不同而不同（path、command、pattern、url 等）
    pub args: HashMap<String, Value>,
}

/// 返回工具调用的 JSON Schema 字符串
pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolCallFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_names_both_fields() {
        let schema = tool_call_schema_json();
        assert!(schema.contains("\"tool\""));
        assert!(schema.contains("\"args\""));
    }
}
