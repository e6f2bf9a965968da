//! 执行引擎集成测试：输入校验、会话、strict / gated 策略、修正流程、工具调用

mod common;

use std::sync::Arc;

use common::{config, engine, input, reviewer, GOOD_REPLY, POOR_REPLY, WEAK_REPLY};
use hive::agents::AgentSpecification;
use hive::config::QualityPolicy;
use hive::core::SessionLimitKind;
use hive::llm::ScriptedLlmClient;
use hive::refinement::{RefinementOutcome, Trend};
use hive::session::Role;
use hive::tools::ToolOutcome;
use hive::AgentError;
use serde_json::{json, Map};

#[tokio::test]
async fn test_invalid_input_never_reaches_backend() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedLlmClient::new([GOOD_REPLY]));
    let engine = engine(config(dir.path()), vec![reviewer()], llm.clone()).await;

    let err = engine
        .execute("security_reviewer", Map::new(), Map::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::ValidationError { ref field, .. } if field == "analysis_scope"));

    let bad_enum = json!({"analysis_scope": "src", "depth": "deep"}).as_object().cloned().unwrap();
    let err = engine
        .execute("security_reviewer", bad_enum, Map::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation_error");

    assert_eq!(llm.call_count(), 0);
    assert_eq!(engine.sessions().active_count().await, 0);
    assert_eq!(engine.sessions().completed_count().await, 0);
}

#[tokio::test]
async fn test_unknown_agent() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedLlmClient::new([GOOD_REPLY]));
    let engine = engine(config(dir.path()), vec![reviewer()], llm.clone()).await;
    let err = engine.execute("ghost", input("src"), Map::new()).await.unwrap_err();
    assert!(matches!(err, AgentError::SpecNotFound(ref id) if id == "ghost"));
    assert_eq!(llm.call_count(), 0);
}

#[tokio::test]
async fn test_passing_reply_completes_session() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedLlmClient::new([GOOD_REPLY]));
    let engine = engine(config(dir.path()), vec![reviewer()], llm.clone()).await;

    let result = engine
        .execute("security_reviewer", input("src/auth"), Map::new())
        .await
        .unwrap();
    assert!(result.quality.passed);
    assert!(result.honesty.compliant);
    assert!(result.quality_score > 0.9);
    assert!(result.refinement.is_none());
    assert_eq!(result.execution_metadata["backend"], "scripted");
    assert_eq!(result.execution_metadata["attempts"], 1);
    assert_eq!(result.execution_metadata["mode"], "default");

    let session_id = result.session_id().unwrap().to_string();
    let session = engine.sessions().get(&session_id).await.unwrap();
    assert!(session.completed);
    assert_eq!(session.call_count, 1);
    let roles: Vec<Role> = session.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
    assert!(dir
        .path()
        .join("sessions/completed")
        .join(format!("{session_id}.json"))
        .exists());

    let api = result.to_api_json();
    assert!(api["output_data"]["recommendations"].is_array());
    assert!(api["quality_score"].as_f64().unwrap() > 0.9);
}

#[tokio::test]
async fn test_requires_action_without_tool_call() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedLlmClient::new([GOOD_REPLY]));
    let spec = reviewer().requiring_action();
    let engine = engine(config(dir.path()), vec![spec], llm).await;
    let err = engine
        .execute("security_reviewer", input("src"), Map::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::NoActionProduced(ref id) if id == "security_reviewer"));
}

#[tokio::test]
async fn test_backend_failure_is_backend_error() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedLlmClient::new(Vec::<String>::new()));
    llm.push_error("upstream 503");
    let engine = engine(config(dir.path()), vec![reviewer()], llm).await;
    let err = engine
        .execute("security_reviewer", input("src"), Map::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::BackendError(ref m) if m.contains("503")));
}

#[tokio::test]
async fn test_strict_rejection_keeps_session_resumable() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.quality.policy = QualityPolicy::Strict;
    let llm = Arc::new(ScriptedLlmClient::new([WEAK_REPLY, GOOD_REPLY]));
    let engine = engine(cfg, vec![reviewer()], llm.clone()).await;

    let err = engine
        .execute("security_reviewer", input("src"), Map::new())
        .await
        .unwrap_err();
    let (score, threshold, reasons) = match err {
        AgentError::QualityRejected { score, threshold, reasons, .. } => (score, threshold, reasons),
        other => panic!("expected quality rejection, got {other:?}"),
    };
    assert!((score - 0.30).abs() < 1e-9);
    assert!((threshold - 0.70).abs() < 1e-9);
    assert!(reasons.iter().any(|r| r.starts_with("evidence")));
    assert_eq!(engine.sessions().active_count().await, 1);

    let active = {
        let dir = dir.path().join("sessions/active");
        let entry = std::fs::read_dir(dir).unwrap().next().unwrap().unwrap();
        entry.path().file_stem().unwrap().to_string_lossy().to_string()
    };

    let context = json!({ "session_id": active }).as_object().cloned().unwrap();
    let result = engine
        .execute("security_reviewer", input("src"), context.clone())
        .await
        .unwrap();
    assert_eq!(result.session_id(), Some(active.as_str()));
    // system, user, assistant(弱回复), 新 user
    assert_eq!(llm.requests()[1].len(), 4);

    let err = engine
        .execute("security_reviewer", input("src"), context)
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::SessionCompleted(_)));
}

#[tokio::test]
async fn test_strict_rejects_unsupported_claims() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.quality.policy = QualityPolicy::Strict;
    let reply = json!({
        "result": "Reviewed src/a.rs, src/b.rs, src/c.rs, src/d.rs and src/e.rs. Fix, add, update, run and test them. It should work.",
        "analysis": {"files": ["src/a.rs"]},
        "recommendations": ["Fix src/a.rs"],
        "metadata": {"note": "none"}
    })
    .to_string();
    let llm = Arc::new(ScriptedLlmClient::new([reply]));
    let engine = engine(cfg, vec![reviewer()], llm).await;

    let err = engine
        .execute("security_reviewer", input("src"), Map::new())
        .await
        .unwrap_err();
    let violations = match err {
        AgentError::HonestyRejected { violations, .. } => violations,
        other => panic!("expected honesty rejection, got {other:?}"),
    };
    assert!(violations.iter().any(|v| v.contains("should work")));
}

#[tokio::test]
async fn test_session_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedLlmClient::new([GOOD_REPLY]));
    let engine = engine(config(dir.path()), vec![reviewer()], llm.clone()).await;
    let context = json!({ "session_id": "missing" }).as_object().cloned().unwrap();
    let err = engine
        .execute("security_reviewer", input("src"), context)
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::SessionNotFound(_)));
    assert_eq!(llm.call_count(), 0);
}

#[tokio::test]
async fn test_session_resumed_only_by_owning_agent() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.quality.policy = QualityPolicy::Strict;
    let llm = Arc::new(ScriptedLlmClient::new([WEAK_REPLY, GOOD_REPLY]));
    let specs = vec![reviewer(), AgentSpecification::new("code_reviewer")];
    let engine = engine(cfg, specs, llm.clone()).await;

    assert!(engine
        .execute("security_reviewer", input("src"), Map::new())
        .await
        .is_err());
    let active = {
        let dir = dir.path().join("sessions/active");
        let entry = std::fs::read_dir(dir).unwrap().next().unwrap().unwrap();
        entry.path().file_stem().unwrap().to_string_lossy().to_string()
    };

    let context = json!({ "session_id": active }).as_object().cloned().unwrap();
    let err = engine
        .execute("code_reviewer", input("src"), context)
        .await
        .unwrap_err();
    match err {
        AgentError::ValidationError { field, reason } => {
            assert_eq!(field, "session_id");
            assert!(reason.contains("security_reviewer"));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
    assert_eq!(llm.call_count(), 1);
    let session = engine.sessions().get(&active).await.unwrap();
    assert_eq!(session.agent_id, "security_reviewer");
    assert_eq!(session.messages.len(), 3);
    assert!(!session.completed);
}

#[tokio::test]
async fn test_gated_refinement_recovers() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedLlmClient::new([WEAK_REPLY, GOOD_REPLY]));
    let engine = engine(config(dir.path()), vec![reviewer()], llm.clone()).await;

    let result = engine
        .execute("security_reviewer", input("src"), Map::new())
        .await
        .unwrap();
    assert!(result.quality.passed);
    let refinement = result.refinement.clone().unwrap();
    assert_eq!(refinement.outcome, RefinementOutcome::Passed);
    assert_eq!(refinement.attempts, 1);
    assert_eq!(refinement.history.len(), 1);
    assert_eq!(result.execution_metadata["attempts"], 2);
    assert_eq!(llm.call_count(), 2);
    // 两次往返的 token 计数来自 LlmResponse 并累加
    assert_eq!(
        result.execution_metadata["completion_tokens"],
        (WEAK_REPLY.len() + GOOD_REPLY.len()) as u64
    );

    let second = &llm.requests()[1];
    let correction = second.last().unwrap();
    assert_eq!(correction.role, Role::User);
    assert!(correction.content.contains("Previous response"));
    assert!(correction.content.contains(WEAK_REPLY));
    assert_eq!(engine.refinement().active_count(), 0);
}

#[tokio::test]
async fn test_gated_exhausts_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.refinement.max_attempts = 2;
    let llm = Arc::new(ScriptedLlmClient::new([WEAK_REPLY, WEAK_REPLY, WEAK_REPLY]));
    let engine = engine(cfg, vec![reviewer()], llm.clone()).await;

    let result = engine
        .execute("security_reviewer", input("src"), Map::new())
        .await
        .unwrap();
    assert!(!result.quality.passed);
    let refinement = result.refinement.unwrap();
    assert_eq!(refinement.outcome, RefinementOutcome::Exhausted);
    assert_eq!(refinement.attempts, 2);
    assert_eq!(refinement.trend, Trend::Stable);
    assert_eq!(llm.call_count(), 3);
}

#[tokio::test]
async fn test_gated_stops_when_score_declines() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedLlmClient::new([WEAK_REPLY, POOR_REPLY, GOOD_REPLY]));
    let engine = engine(config(dir.path()), vec![reviewer()], llm.clone()).await;

    let result = engine
        .execute("security_reviewer", input("src"), Map::new())
        .await
        .unwrap();
    assert_eq!(result.refinement.unwrap().outcome, RefinementOutcome::Declining);
    assert_eq!(llm.call_count(), 2);
}

#[tokio::test]
async fn test_gated_low_score_is_unrefinable() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedLlmClient::new([POOR_REPLY]));
    let engine = engine(config(dir.path()), vec![reviewer()], llm.clone()).await;

    let result = engine
        .execute("security_reviewer", input("src"), Map::new())
        .await
        .unwrap();
    let refinement = result.refinement.unwrap();
    assert_eq!(refinement.outcome, RefinementOutcome::Unrefinable);
    assert_eq!(refinement.attempts, 0);
    assert_eq!(llm.call_count(), 1);
}

#[tokio::test]
async fn test_refinement_ceiling_per_task() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.session.max_refinement_iterations = 1;
    let llm = Arc::new(ScriptedLlmClient::new([WEAK_REPLY, WEAK_REPLY, WEAK_REPLY]));
    let engine = engine(cfg, vec![reviewer()], llm.clone()).await;

    let err = engine
        .execute("security_reviewer", input("src"), Map::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AgentError::SessionLimitExceeded { kind: SessionLimitKind::Refinements, limit: 1, .. }
    ));
    assert_eq!(llm.call_count(), 2);
    assert_eq!(engine.refinement().active_count(), 0);
}

#[tokio::test]
async fn test_call_ceiling_stops_refinement() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.session.max_total_calls = 2;
    cfg.refinement.max_attempts = 5;
    let llm = Arc::new(ScriptedLlmClient::new([WEAK_REPLY, WEAK_REPLY, WEAK_REPLY]));
    let engine = engine(cfg, vec![reviewer()], llm.clone()).await;

    let err = engine
        .execute("security_reviewer", input("src"), Map::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AgentError::SessionLimitExceeded { kind: SessionLimitKind::Calls, limit: 2, .. }
    ));
    assert_eq!(llm.call_count(), 2);
}

#[tokio::test]
async fn test_tool_call_through_alias() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.refinement.max_attempts = 0;
    std::fs::create_dir_all(dir.path().join("ws")).unwrap();
    std::fs::write(dir.path().join("ws/notes.txt"), "alpha beta").unwrap();
    let llm = Arc::new(ScriptedLlmClient::new([
        r#"Reading the notes first. {"tool": "Read", "args": {"file_path": "notes.txt"}}"#,
    ]));
    let engine = engine(cfg, vec![reviewer()], llm.clone()).await;

    let result = engine
        .execute("security_reviewer", input("notes.txt"), Map::new())
        .await
        .unwrap();
    assert_eq!(result.tool_invocations.len(), 1);
    let invocation = &result.tool_invocations[0];
    assert_eq!(invocation.requested_name, "Read");
    assert_eq!(invocation.tool, "read_text_file");
    assert_eq!(invocation.provider_id.as_deref(), Some("filesystem"));
    assert_eq!(
        invocation.outcome,
        ToolOutcome::Success { content: "alpha beta".into() }
    );
    assert_eq!(result.output_data["tool_results"][0]["content"], "alpha beta");
    assert_eq!(result.output_data["result"], "Reading the notes first.");
    assert_eq!(result.execution_metadata["tool_call_count"], 1);

    let session = engine.sessions().get(result.session_id().unwrap()).await.unwrap();
    let tool_turn = session.messages.iter().find(|m| m.role == Role::Tool).unwrap();
    assert!(tool_turn.content.contains("alpha beta"));
}

#[tokio::test]
async fn test_tool_outside_mode_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.refinement.max_attempts = 0;
    let llm = Arc::new(ScriptedLlmClient::new([
        r#"{"tool": "write_file", "args": {"path": "x.txt", "content": "nope"}}"#,
    ]));
    let engine = engine(cfg, vec![reviewer()], llm).await;

    let result = engine
        .execute("security_reviewer", input("src"), Map::new())
        .await
        .unwrap();
    let invocation = &result.tool_invocations[0];
    assert!(!invocation.is_success());
    assert!(matches!(&invocation.outcome, ToolOutcome::Error { kind, .. } if kind == "tool_not_found"));
    assert!(!dir.path().join("ws/x.txt").exists());
    assert_eq!(engine.tools().router().breaker().consecutive_failures(), 0);
}

#[tokio::test]
async fn test_descriptor_threshold_applies() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.quality.policy = QualityPolicy::Strict;
    let mut lenient = AgentSpecification::new("note_taker");
    lenient.pass_threshold = Some(0.25);
    let llm = Arc::new(ScriptedLlmClient::new([WEAK_REPLY]));
    let engine = engine(cfg, vec![lenient], llm).await;

    let err = engine
        .execute("note_taker", Map::new(), Map::new())
        .await
        .unwrap_err();
    // 质量 0.30 已过 0.25，剩下的是诚实度
    assert_eq!(err.kind(), "honesty_rejected");
}
