//! System prompt 拼装与上下文裁剪

use std::fmt::Write as _;

use serde_json::{Map, Value};

use crate::agents::AgentSpecification;
use crate::session::{Message, Role};
use crate::tools::{alias, tool_call_schema_json, ToolRouter};

/// 由 algorithm 与当前模式允许的工具生成 system prompt
pub fn system_prompt(spec: &AgentSpecification, mode: &str, router: &ToolRouter) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "You are the `{}` agent.", spec.agent_id);
    if !spec.description.is_empty() {
        let _ = writeln!(prompt, "{}", spec.description);
    }
    if !spec.algorithm.trim().is_empty() {
        let _ = writeln!(prompt, "\n## Procedure\n{}", spec.algorithm.trim());
    }

    let tools = spec.tools_for_mode(mode);
    if tools.is_empty() {
        prompt.push_str("\n## Tools\nNo tools are available in this mode; answer directly.\n");
    } else {
        prompt.push_str("\n## Tools\n");
        for name in tools {
            let (canonical, _) = alias::canonicalize(name, Value::Null);
            let description = router
                .tool(&canonical)
                .map(|t| t.description.as_str())
                .unwrap_or("(routed on demand)");
            let _ = writeln!(prompt, "- {name}: {description}");
        }
        let _ = writeln!(
            prompt,
            "\nTo call tools, emit JSON matching this schema (one object, or an array of them):\n{}",
            tool_call_schema_json()
        );
        if spec.requires_action {
            prompt.push_str("You must call at least one tool.\n");
        }
    }

    prompt.push_str(
        "\n## Output\nReturn a JSON object with `result`, `analysis`, `recommendations` and `metadata`. \
         Cite the files, lines or command output behind each finding, and state any limitations or \
         assumptions explicitly.\n",
    );
    prompt
}

/// 首个 user 轮次：任务输入与上下文
pub fn task_message(input: &Map<String, Value>, context: &Map<String, Value>) -> String {
    let mut text = format!(
        "Input:\n{}",
        serde_json::to_string_pretty(input).unwrap_or_default()
    );
    if let Some(task) = context.get("task").and_then(Value::as_str) {
        text = format!("Task: {task}\n\n{text}");
    }
    text
}

/// 发给后端的消息按字符数裁剪：保留开头的 system 轮次和尽可能多的最新轮次，至少保留最后一轮
pub fn fit_to_budget(messages: &[Message], max_chars: usize) -> Vec<Message> {
    let total: usize = messages.iter().map(|m| m.content.chars().count()).sum();
    if total <= max_chars {
        return messages.to_vec();
    }

    let (system, rest) = match messages.first() {
        Some(first) if first.role == Role::System => (Some(first), &messages[1..]),
        _ => (None, messages),
    };
    let mut budget = max_chars.saturating_sub(system.map(|m| m.content.chars().count()).unwrap_or(0));
    let mut kept: Vec<&Message> = Vec::new();
    for m in rest.iter().rev() {
        let len = m.content.chars().count();
        if len > budget && !kept.is_empty() {
            break;
        }
        budget = budget.saturating_sub(len);
        kept.push(m);
    }
    tracing::debug!(
        dropped = rest.len() - kept.len(),
        max_chars,
        "context trimmed for backend"
    );
    system
        .into_iter()
        .chain(kept.into_iter().rev())
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_keeps_system_and_newest() {
        let messages = vec![
            Message::system("sys"),
            Message::user("a".repeat(50)),
            Message::assistant("b".repeat(50)),
            Message::user("c".repeat(20)),
        ];
        let fitted = fit_to_budget(&messages, 80);
        assert_eq!(fitted.len(), 3);
        assert_eq!(fitted[0].role, Role::System);
        assert!(fitted[1].content.starts_with('b'));
        assert!(fitted[2].content.starts_with('c'));
    }

    #[test]
    fn test_fit_always_keeps_last_turn() {
        let messages = vec![Message::system("sys"), Message::user("x".repeat(500))];
        let fitted = fit_to_budget(&messages, 10);
        assert_eq!(fitted.len(), 2);
    }

    #[test]
    fn test_under_budget_untouched() {
        let messages = vec![Message::user("hi"), Message::assistant("there")];
        assert_eq!(fit_to_budget(&messages, 100), messages);
    }

    #[test]
    fn test_task_message_includes_task() {
        let input = serde_json::json!({"analysis_scope": "auth"});
        let ctx = serde_json::json!({"task": "review login"});
        let text = task_message(input.as_object().unwrap(), ctx.as_object().unwrap());
        assert!(text.starts_with("Task: review login"));
        assert!(text.contains("analysis_scope"));
    }
}
