//! 多 Agent 协调器
//!
//! 协调者先做一次自身的后端往返得到计划，从计划文本和工具输出中识别需要的子 Agent，
//! 每个子 Agent 在独立任务里先取调度槽位再执行；单个失败只记入结果，不取消其它子任务。
//!
//! 子 Agent 的输入是协调者输入的副本，再叠加上下文 `child_inputs.<agent_id>` 中的字段；
//! 子 Agent 的 input_schema 要求而两处都没有的字段会使该子 Agent 以 validation_error 失败。

use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use serde_json::{json, Map, Value};

use crate::agents::{AgentRegistry, AgentSpecification};
use crate::core::AgentError;
use crate::engine::executor::{build_output, RoundTrip};
use crate::engine::types::{ChildRecord, ChildStatus, CONTEXT_CHILD_INPUTS, CONTEXT_SESSION_ID, CONTEXT_TASK};
use crate::engine::{ExecutionEngine, ExecutionResult};
use crate::session::Message;
use crate::tools::ToolOutcome;

const SUMMARY_CHARS: usize = 240;

/// 在文本中查找其它 Agent 的 id（大小写无关，`_` / `-` 也可写成空格）；按注册顺序，排除协调者
pub fn detect_required_agents(
    registry: &AgentRegistry,
    orchestrator_id: &str,
    text: &str,
) -> Vec<Arc<AgentSpecification>> {
    let haystack = text.to_lowercase();
    registry
        .iter()
        .filter(|spec| spec.agent_id != orchestrator_id && !spec.is_orchestrator())
        .filter(|spec| {
            let id = spec.agent_id.to_lowercase();
            let spaced = id.replace(['_', '-'], " ");
            haystack.contains(&id) || haystack.contains(&spaced)
        })
        .collect()
}

fn plan_text(plan: &RoundTrip) -> String {
    let mut parts = vec![plan.reply.prose.clone()];
    if let Some(structured) = &plan.reply.structured {
        parts.push(Value::Object(structured.clone()).to_string());
    }
    for inv in &plan.invocations {
        if let ToolOutcome::Success { content } = &inv.outcome {
            parts.push(content.clone());
        }
    }
    parts.join("\n")
}

fn summarize(output: &Map<String, Value>) -> String {
    let text = match output.get("result") {
        Some(Value::String(s)) => s.clone(),
        _ => Value::Object(output.clone()).to_string(),
    };
    if text.chars().count() > SUMMARY_CHARS {
        format!("{}...", text.chars().take(SUMMARY_CHARS).collect::<String>())
    } else {
        text
    }
}

/// 协调者输入叠加该子 Agent 的专属字段（同名时专属字段优先）
fn child_input(agent_id: &str, input: &Map<String, Value>, overrides: Option<&Value>) -> Map<String, Value> {
    let mut merged = input.clone();
    if let Some(Value::Object(fields)) = overrides.and_then(|o| o.get(agent_id)) {
        merged.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    merged
}

pub(crate) async fn coordinate(
    engine: &Arc<ExecutionEngine>,
    spec: Arc<AgentSpecification>,
    input: Map<String, Value>,
    context: Map<String, Value>,
) -> Result<ExecutionResult, AgentError> {
    let started = Instant::now();
    let (run, pending) = engine.begin(spec.clone(), &input, context).await?;
    let plan = engine.round_trip(&run, pending).await?;

    let children = detect_required_agents(engine.registry(), &spec.agent_id, &plan_text(&plan));
    tracing::info!(
        orchestrator = %spec.agent_id,
        session_id = %run.session_id,
        children = children.len(),
        pool = engine.scheduler().capacity(),
        "dispatching child agents"
    );

    let mut child_context = run.context.clone();
    child_context.remove(CONTEXT_SESSION_ID);
    let overrides = child_context.remove(CONTEXT_CHILD_INPUTS);
    child_context
        .entry(CONTEXT_TASK)
        .or_insert_with(|| Value::String(run.task.clone()));
    child_context.insert("parent_session_id".into(), Value::String(run.session_id.clone()));

    let handles: Vec<_> = children
        .iter()
        .map(|child| {
            let engine = Arc::clone(engine);
            let scheduler = engine.scheduler().clone();
            let agent_id = child.agent_id.clone();
            let input = child_input(&agent_id, &input, overrides.as_ref());
            let context = child_context.clone();
            tokio::spawn(async move {
                let _permit = scheduler.acquire_agent_slot().await?;
                let started = Instant::now();
                let result = engine.run_specialist(&agent_id, input, context).await;
                result.map(|r| (r, started.elapsed().as_millis() as u64))
            })
        })
        .collect();
    let joined = join_all(handles).await;

    let mut records = Vec::with_capacity(children.len());
    let mut recommendations: Vec<Value> = Vec::new();
    let mut fatal: Option<AgentError> = None;
    for (child, outcome) in children.iter().zip(joined) {
        let record = match outcome {
            Ok(Ok((result, duration_ms))) => {
                if let Some(Value::Array(items)) = result.output_data.get("recommendations") {
                    recommendations.extend(items.iter().cloned());
                }
                ChildRecord {
                    agent_id: child.agent_id.clone(),
                    status: ChildStatus::Succeeded,
                    quality_score: Some(result.quality_score),
                    summary: Some(summarize(&result.output_data)),
                    error_kind: None,
                    error: None,
                    duration_ms,
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(agent_id = %child.agent_id, error = %e, "child agent failed");
                let record = failed_record(&child.agent_id, e.kind(), e.to_string());
                if e.is_fatal() && fatal.is_none() {
                    fatal = Some(e);
                }
                record
            }
            Err(join_err) => {
                tracing::error!(agent_id = %child.agent_id, error = %join_err, "child task aborted");
                failed_record(&child.agent_id, "join_error", join_err.to_string())
            }
        };
        records.push(record);
    }
    if let Some(e) = fatal {
        return Err(e);
    }

    let total = records.len();
    let succeeded = records.iter().filter(|r| r.status == ChildStatus::Succeeded).count();
    let failed = total - succeeded;
    for r in records.iter().filter(|r| r.status == ChildStatus::Failed) {
        recommendations.push(json!(format!(
            "Re-run {} after resolving: {}",
            r.agent_id,
            r.error.as_deref().unwrap_or("unknown error")
        )));
    }

    let plan_output = build_output(&plan.reply, &plan.invocations);
    let mut output = Map::new();
    output.insert(
        "result".into(),
        json!(format!(
            "Coordinated {total} agents for {}: {succeeded} succeeded, {failed} failed.",
            spec.agent_id
        )),
    );
    output.insert(
        "analysis".into(),
        json!({
            "plan": plan_output,
            "selected_agents": children.iter().map(|c| c.agent_id.clone()).collect::<Vec<_>>(),
        }),
    );
    output.insert(
        "agents".into(),
        json!({ "total": total, "succeeded": succeeded, "failed": failed }),
    );
    output.insert("agent_results".into(), serde_json::to_value(&records).unwrap_or_default());
    output.insert("recommendations".into(), Value::Array(recommendations));

    let (quality, honesty) = engine.score(&spec, &output);
    engine
        .sessions()
        .append(&run.session_id, vec![Message::assistant(Value::Object(output.clone()).to_string())])
        .await?;
    engine.sessions().complete(&run.session_id).await?;

    let mut metadata = engine.metadata(
        &run,
        1,
        plan.invocations.len(),
        (plan.prompt_tokens, plan.completion_tokens),
        started,
    );
    metadata.insert("children".into(), json!(total));
    metadata.insert("pool_size".into(), json!(engine.scheduler().capacity()));
    tracing::info!(
        orchestrator = %spec.agent_id,
        total,
        succeeded,
        failed,
        duration_ms = started.elapsed().as_millis() as u64,
        "coordination finished"
    );

    Ok(ExecutionResult {
        agent_id: spec.agent_id.clone(),
        quality_score: quality.overall,
        output_data: output,
        execution_metadata: metadata,
        quality,
        honesty,
        tool_invocations: plan.invocations,
        refinement: None,
    })
}

fn failed_record(agent_id: &str, kind: &str, message: String) -> ChildRecord {
    ChildRecord {
        agent_id: agent_id.to_string(),
        status: ChildStatus::Failed,
        quality_score: None,
        summary: None,
        error_kind: Some(kind.to_string()),
        error: Some(message),
        duration_ms: 0,
    }
}
