//! 工具提供者线协议
//!
//! 每行一个 JSON 文档：请求 `{"jsonrpc":"2.0","id":N,"method":..,"params":..}`，
//! 响应 `{"id":N,"result":..}` 或 `{"id":N,"error":{"code":..,"message":..}}`。
//! 单帧长度上限 MAX_FRAME_BYTES，超长帧由读端丢弃。

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::tools::ToolDescriptor;

/// initialize 握手中声明的协议版本
pub const PROTOCOL_VERSION: &str = "2024-11-05";
/// 单帧最大字节数（不含换行）
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";

/// 请求帧；id 为空时是通知，不等待响应
#[derive(Debug, Clone, Serialize)]
pub struct WireRequest {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: String,
    pub params: Value,
}

impl WireRequest {
    pub fn call(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id: None,
            method: method.into(),
            params,
        }
    }
}

/// 响应帧（也可能是服务端主动发来的通知，此时 method 非空）
#[derive(Debug, Clone, Deserialize)]
pub struct WireResponse {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<WireError>,
    #[serde(default)]
    pub method: Option<String>,
}

impl WireResponse {
    /// 仅接受数字 id；其它形式的 id 无法与待决请求关联
    pub fn numeric_id(&self) -> Option<u64> {
        self.id.as_ref().and_then(Value::as_u64)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

/// 编码为一行文本（不含结尾换行，由 LinesCodec 追加）
pub fn encode_frame(request: &WireRequest) -> Result<String, String> {
    let line = serde_json::to_string(request).map_err(|e| format!("encode {}: {e}", request.method))?;
    if line.len() > MAX_FRAME_BYTES {
        return Err(format!(
            "frame for {} exceeds {} bytes",
            request.method, MAX_FRAME_BYTES
        ));
    }
    Ok(line)
}

pub fn decode_frame(line: &str) -> Result<WireResponse, String> {
    if line.len() > MAX_FRAME_BYTES {
        return Err(format!("frame exceeds {MAX_FRAME_BYTES} bytes"));
    }
    serde_json::from_str(line).map_err(|e| format!("decode frame: {e}"))
}

/// initialize 参数：协议版本、能力、客户端信息
pub fn initialize_params(client_name: &str, client_version: &str) -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": { "tools": {} },
        "clientInfo": { "name": client_name, "version": client_version },
    })
}

/// 解析 tools/list 结果
pub fn parse_tool_list(result: &Value) -> Result<Vec<ToolDescriptor>, String> {
    let tools = result
        .get("tools")
        .and_then(Value::as_array)
        .ok_or_else(|| "tools/list result has no 'tools' array".to_string())?;
    Ok(tools
        .iter()
        .filter_map(|t| {
            let name = t.get("name")?.as_str()?.to_string();
            Some(ToolDescriptor {
                name,
                description: t
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                input_schema: t.get("inputSchema").cloned().unwrap_or_else(|| json!({})),
            })
        })
        .collect())
}

/// 提取 tools/call 结果中的文本；isError 为真时作为错误返回
pub fn extract_call_content(result: &Value) -> Result<String, String> {
    let text = match result.get("content").and_then(Value::as_array) {
        Some(items) => items
            .iter()
            .filter_map(|c| c.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        None => result.to_string(),
    };
    if result.get("isError").and_then(Value::as_bool).unwrap_or(false) {
        Err(text)
    } else {
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_has_no_id() {
        let line = encode_frame(&WireRequest::notification(METHOD_INITIALIZED, json!({}))).unwrap();
        let v: Value = serde_json::from_str(&line).unwrap();
        assert!(v.get("id").is_none());
        assert_eq!(v["method"], METHOD_INITIALIZED);
        assert!(!line.contains('\n'));
    }

    #[test]
    fn test_decode_error_response() {
        let resp = decode_frame(r#"{"id":7,"error":{"code":-32601,"message":"no such method"}}"#).unwrap();
        assert_eq!(resp.numeric_id(), Some(7));
        assert_eq!(resp.error.unwrap().message, "no such method");
    }

    #[test]
    fn test_string_id_not_correlated() {
        let resp = decode_frame(r#"{"id":"abc","result":{}}"#).unwrap();
        assert_eq!(resp.numeric_id(), None);
    }

    #[test]
    fn test_parse_tool_list_skips_nameless() {
        let tools = parse_tool_list(&json!({
            "tools": [
                {"name": "read_text_file", "description": "read", "inputSchema": {"type": "object"}},
                {"description": "broken"}
            ]
        }))
        .unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "read_text_file");
    }

    #[test]
    fn test_call_content_is_error() {
        let err = extract_call_content(&json!({
            "content": [{"type": "text", "text": "permission denied"}],
            "isError": true
        }))
        .unwrap_err();
        assert_eq!(err, "permission denied");
    }
}
