//! 工具别名映射
//!
//! 模型按提示词使用的工具名/参数名（如 `Read {file_path}`）映射为提供者的规范名/参数名
//! （`read_text_file {path}`）。纯函数，与提供者是否在线无关。

use serde_json::{Map, Value};

struct AliasRule {
    alias: &'static str,
    canonical: &'static str,
    /// (别名参数键, 规范参数键)
    args: &'static [(&'static str, &'static str)],
}

const ALIASES: &[AliasRule] = &[
    AliasRule { alias: "Read", canonical: "read_text_file", args: &[("file_path", "path")] },
    AliasRule { alias: "read_file", canonical: "read_text_file", args: &[("file_path", "path")] },
    AliasRule { alias: "cat", canonical: "read_text_file", args: &[("file", "path")] },
    AliasRule { alias: "Write", canonical: "write_file", args: &[("file_path", "path")] },
    AliasRule {
        alias: "create_file",
        canonical: "write_file",
        args: &[("file_path", "path"), ("text", "content")],
    },
    AliasRule { alias: "ls", canonical: "list_directory", args: &[("dir", "path"), ("directory", "path")] },
    AliasRule { alias: "LS", canonical: "list_directory", args: &[("dir", "path")] },
    AliasRule { alias: "Bash", canonical: "execute_command", args: &[("cmd", "command")] },
    AliasRule { alias: "shell", canonical: "execute_command", args: &[("cmd", "command")] },
    AliasRule { alias: "run_command", canonical: "execute_command", args: &[("cmd", "command")] },
    AliasRule { alias: "Grep", canonical: "search_files", args: &[("query", "pattern")] },
    AliasRule { alias: "grep", canonical: "search_files", args: &[("query", "pattern")] },
    AliasRule { alias: "WebFetch", canonical: "fetch", args: &[("link", "url")] },
    AliasRule { alias: "fetch_url", canonical: "fetch", args: &[("link", "url")] },
];

/// 返回 (规范名, 规范参数)；未登记的名称原样返回
pub fn canonicalize(name: &str, args: Value) -> (String, Value) {
    let Some(rule) = ALIASES.iter().find(|r| r.alias == name) else {
        return (name.to_string(), args);
    };
    let args = match args {
        Value::Object(map) => Value::Object(rename_keys(map, rule.args)),
        other => other,
    };
    (rule.canonical.to_string(), args)
}

/// 已存在规范键时不覆盖
fn rename_keys(mut map: Map<String, Value>, renames: &[(&str, &str)]) -> Map<String, Value> {
    for (from, to) in renames {
        if map.contains_key(*to) {
            continue;
        }
        if let Some(v) = map.remove(*from) {
            map.insert(to.to_string(), v);
        }
    }
    map
}

/// 全部已登记的别名（用于提示词与诊断）
pub fn aliases() -> impl Iterator<Item = (&'static str, &'static str)> {
    ALIASES.iter().map(|r| (r.alias, r.canonical))
}
