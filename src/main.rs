//! Hive - 多 Agent 执行核心
//!
//! 入口：加载配置、初始化日志、构建引擎，执行一次 Agent 请求并把结果 JSON 打印到 stdout。
//!
//! 用法：`hive <agent_id> [input-json] [context-json]`

use anyhow::{bail, Context};
use hive::{build_runtime, config::load_config, observability};
use serde_json::{Map, Value};

fn parse_object(label: &str, raw: Option<String>) -> anyhow::Result<Map<String, Value>> {
    let Some(raw) = raw else {
        return Ok(Map::new());
    };
    match serde_json::from_str::<Value>(&raw).with_context(|| format!("{label} is not valid JSON"))? {
        Value::Object(map) => Ok(map),
        other => bail!("{label} must be a JSON object, got {other}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let Some(agent_id) = args.next() else {
        eprintln!("usage: hive <agent_id> [input-json] [context-json]");
        std::process::exit(2);
    };
    let input = parse_object("input", args.next())?;
    let context = parse_object("context", args.next())?;

    let config_path = std::env::var("HIVE_CONFIG").ok().map(Into::into);
    let cfg = load_config(config_path).context("Failed to load config")?;
    observability::init(&cfg.app.log_level);

    let engine = build_runtime(cfg).await.context("Failed to build runtime")?;
    match engine.execute(&agent_id, input, context).await {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result.to_api_json())?);
            Ok(())
        }
        Err(e) => {
            tracing::error!(agent_id = %agent_id, kind = e.kind(), error = %e, "execution failed");
            let body = serde_json::json!({ "error": { "kind": e.kind(), "message": e.to_string() } });
            println!("{}", serde_json::to_string_pretty(&body)?);
            std::process::exit(1);
        }
    }
}
