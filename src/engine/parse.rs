//! 解析后端回复：工具调用、结构化输出与剩余文本
//!
//! 接受的工具调用形态：`{"tool": .., "args": {..}}`（别名 `name` / `arguments`）、它们组成的数组、
//! `{"tool_calls": [..]}`（元素可以是 `{"function": {"name", "arguments"}}`，arguments 可为 JSON 字符串），
//! 裸写或放在 ```json 代码块里。不是工具调用的第一个 JSON 对象作为结构化输出；其余文本为 prose。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 模型请求的一次工具调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedReply {
    pub prose: String,
    pub tool_calls: Vec<ToolCall>,
    pub structured: Option<Map<String, Value>>,
}

enum Classified {
    Calls(Vec<ToolCall>),
    Structured(Map<String, Value>),
    Other,
}

pub fn parse_reply(raw: &str) -> ParsedReply {
    let mut reply = ParsedReply::default();
    let without_fences = extract_fences(raw, &mut reply);
    let prose = extract_inline(&without_fences, &mut reply);
    reply.prose = collapse_blank_lines(&prose);
    reply
}

/// 处理 ``` 代码块：能解析为 JSON 的块被取走，其余原样保留
fn extract_fences(raw: &str, reply: &mut ParsedReply) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("```") {
        let after_ticks = &rest[start + 3..];
        let Some(end) = after_ticks.find("```") else {
            break;
        };
        let block = &after_ticks[..end];
        // 去掉语言标记（json / JSON / 空）
        let body = match block.find('\n') {
            Some(nl) if !block[..nl].trim_start().starts_with(['{', '[']) => &block[nl + 1..],
            _ => block,
        };
        match serde_json::from_str::<Value>(body.trim()) {
            Ok(value) if absorb(value.clone(), reply) => {
                out.push_str(&rest[..start]);
            }
            _ => {
                out.push_str(&rest[..start + 3 + end + 3]);
            }
        }
        rest = &after_ticks[end + 3..];
    }
    out.push_str(rest);
    out
}

/// 扫描裸 JSON：从每个 `{` / `[` 尝试解析一个完整值
fn extract_inline(text: &str, reply: &mut ParsedReply) -> String {
    let mut out = String::with_capacity(text.len());
    let mut copied_to = 0;
    let mut skip_until = 0;
    for (i, c) in text.char_indices() {
        if i < skip_until || (c != '{' && c != '[') {
            continue;
        }
        let mut stream = serde_json::Deserializer::from_str(&text[i..]).into_iter::<Value>();
        let Some(Ok(value)) = stream.next() else {
            continue;
        };
        let end = i + stream.byte_offset();
        if absorb(value, reply) {
            out.push_str(&text[copied_to..i]);
            copied_to = end;
        }
        skip_until = end;
    }
    out.push_str(&text[copied_to..]);
    out
}

/// 识别并收下一个 JSON 值；返回是否应从 prose 中移除
fn absorb(value: Value, reply: &mut ParsedReply) -> bool {
    match classify(value) {
        Classified::Calls(calls) => {
            reply.tool_calls.extend(calls);
            true
        }
        Classified::Structured(map) if reply.structured.is_none() => {
            reply.structured = Some(map);
            true
        }
        _ => false,
    }
}

fn classify(value: Value) -> Classified {
    match value {
        Value::Object(map) => {
            if let Some(Value::Array(items)) = map.get("tool_calls") {
                let calls: Vec<ToolCall> = items.iter().filter_map(as_tool_call).collect();
                if !calls.is_empty() {
                    return Classified::Calls(calls);
                }
            }
            match as_tool_call(&Value::Object(map.clone())) {
                Some(call) => Classified::Calls(vec![call]),
                None => Classified::Structured(map),
            }
        }
        Value::Array(items) if !items.is_empty() => {
            let calls: Vec<ToolCall> = items.iter().filter_map(as_tool_call).collect();
            if calls.len() == items.len() {
                Classified::Calls(calls)
            } else {
                Classified::Other
            }
        }
        _ => Classified::Other,
    }
}

/// `tool` 必须是非空字符串；`name` 只有同时带 args / arguments 才算工具调用
fn as_tool_call(value: &Value) -> Option<ToolCall> {
    let obj = value.as_object()?;
    if let Some(function) = obj.get("function").and_then(Value::as_object) {
        let name = function.get("name")?.as_str()?;
        return Some(ToolCall {
            tool: name.to_string(),
            args: normalize_args(function.get("arguments")),
        });
    }
    let args = obj.get("args").or_else(|| obj.get("arguments"));
    let name = match obj.get("tool").and_then(Value::as_str) {
        Some(tool) => tool,
        None if args.is_some() => obj.get("name")?.as_str()?,
        None => return None,
    };
    if name.trim().is_empty() {
        return None;
    }
    Some(ToolCall {
        tool: name.to_string(),
        args: normalize_args(args),
    })
}

/// 参数统一为对象；字符串形式的 JSON 先解析
fn normalize_args(args: Option<&Value>) -> Value {
    match args {
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(v @ Value::Object(_)) => v,
            _ => Value::Object(Map::new()),
        },
        Some(v @ Value::Object(_)) => v.clone(),
        _ => Value::Object(Map::new()),
    }
}

fn collapse_blank_lines(text: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    for line in text.lines().map(str::trim_end) {
        if line.trim().is_empty() && lines.last().is_some_and(|l| l.trim().is_empty()) {
            continue;
        }
        lines.push(line);
    }
    lines.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_prose() {
        let r = parse_reply("Nothing to do here.");
        assert_eq!(r.prose, "Nothing to do here.");
        assert!(r.tool_calls.is_empty());
        assert!(r.structured.is_none());
    }

    #[test]
    fn test_fenced_tool_call() {
        let r = parse_reply("Let me look.\n```json\n{\"tool\": \"Read\", \"args\": {\"file_path\": \"src/lib.rs\"}}\n```\n");
        assert_eq!(r.prose, "Let me look.");
        assert_eq!(r.tool_calls.len(), 1);
        assert_eq!(r.tool_calls[0].tool, "Read");
        assert_eq!(r.tool_calls[0].args, json!({"file_path": "src/lib.rs"}));
    }

    #[test]
    fn test_inline_name_arguments_and_structured() {
        let r = parse_reply(
            r#"Plan: {"name": "list_directory", "arguments": {"path": "."}} then report {"result": "ok", "analysis": {"n": 1}}"#,
        );
        assert_eq!(r.tool_calls[0].tool, "list_directory");
        assert_eq!(r.structured.as_ref().unwrap()["result"], "ok");
        assert_eq!(r.prose, "Plan:  then report");
    }

    #[test]
    fn test_tool_calls_array_with_function_shape() {
        let r = parse_reply(
            r#"{"tool_calls": [{"function": {"name": "search_files", "arguments": "{\"pattern\": \"TODO\"}"}}, {"tool": "fetch", "args": {"url": "https://x"}}]}"#,
        );
        assert_eq!(r.tool_calls.len(), 2);
        assert_eq!(r.tool_calls[0].args, json!({"pattern": "TODO"}));
        assert_eq!(r.tool_calls[1].tool, "fetch");
        assert!(r.prose.is_empty());
    }

    #[test]
    fn test_bare_array_of_calls() {
        let r = parse_reply(r#"[{"tool": "a"}, {"tool": "b", "args": {"x": 1}}]"#);
        assert_eq!(r.tool_calls.len(), 2);
        assert_eq!(r.tool_calls[0].args, json!({}));
    }

    #[test]
    fn test_non_json_brackets_stay_in_prose() {
        let r = parse_reply("See [1] and {not json} for details.");
        assert!(r.tool_calls.is_empty());
        // [1] 可以解析但不是工具调用，保留在 prose 中
        assert_eq!(r.prose, "See [1] and {not json} for details.");
    }

    #[test]
    fn test_name_without_args_is_structured() {
        let r = parse_reply(r#"{"name": "security report", "result": "clean"}"#);
        assert!(r.tool_calls.is_empty());
        assert_eq!(r.structured.unwrap()["name"], "security report");
    }
}
