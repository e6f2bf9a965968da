//! 集成测试共用的配置、回复样本与引擎构建
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use hive::agents::{AgentRegistry, AgentSpecification, FieldSpec, FieldType};
use hive::config::AppConfig;
use hive::llm::LlmClient;
use hive::{ExecutionEngine, RuntimeBuilder};

/// 结构完整、引用文件、披露局限：质量约 0.97，诚实度合规
pub const GOOD_REPLY: &str = r#"{
  "result": "Reviewed src/auth/login.rs and src/auth/token.rs. Fix the expiry check, add a regression test, update config/app.toml, then run the suite and validate the fix.",
  "analysis": {"files": ["src/auth/login.rs", "src/auth/token.rs", "config/app.toml"], "risk": "medium"},
  "recommendations": ["Fix the expiry comparison in src/auth/token.rs line 42", "Add a test under tests/auth_expiry.rs"],
  "metadata": {
    "evidence": "Based on the diff, verified against test results; see line 42, confirmed by the source: cargo test output.",
    "limitations": "Limitation: the network layer is out of scope and could not be exercised; one assumption about clock skew remains."
  }
}"#;

/// 只有一句散文：质量 0.30（可修正），诚实度不合规
pub const WEAK_REPLY: &str = "Looks fine overall; I reviewed the module.";

/// 质量 0.12，低于可修正下限
pub const POOR_REPLY: &str = "ok";

pub fn config(dir: &Path) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.app.workspace_root = Some(dir.join("ws"));
    cfg.session.dir = Some(dir.join("sessions"));
    cfg.llm.provider = "mock".to_string();
    cfg
}

pub fn reviewer() -> AgentSpecification {
    AgentSpecification::new("security_reviewer")
        .with_field("analysis_scope", FieldSpec::required(FieldType::String))
        .with_field(
            "depth",
            FieldSpec::optional(FieldType::Enum).with_allowed(&["quick", "full"]),
        )
        .with_algorithm("Read the analysis scope and report findings with file references.")
        .with_tools("default", vec!["read_text_file".to_string()])
}

pub async fn engine(
    cfg: AppConfig,
    specs: Vec<AgentSpecification>,
    llm: Arc<dyn LlmClient>,
) -> Arc<ExecutionEngine> {
    RuntimeBuilder::new(cfg)
        .with_registry(AgentRegistry::from_specs(specs).unwrap())
        .with_llm(llm)
        .build()
        .await
        .unwrap()
}

pub fn input(scope: &str) -> serde_json::Map<String, serde_json::Value> {
    serde_json::json!({ "analysis_scope": scope })
        .as_object()
        .cloned()
        .unwrap()
}
