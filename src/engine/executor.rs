//! 行为执行引擎
//!
//! 一次 execute：查规格 → 校验输入（失败时不访问后端、不动会话）→ 协调者转交协调器 →
//! 建立/恢复会话 → 后端往返（计数、超时、解析、工具调用、追加轮次）→ 质量与诚实度评分 →
//! strict 直接拒绝，gated 进入修正循环 → 会话标记完成。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Map, Value};

use crate::agents::{AgentRegistry, AgentSpecification};
use crate::config::{AppConfig, QualityPolicy};
use crate::core::{AgentError, TaskScheduler};
use crate::engine::types::{context_mode, context_task, CONTEXT_SESSION_ID};
use crate::engine::{coordinator, parse, prompt, ExecutionRequest, ExecutionResult};
use crate::llm::LlmClient;
use crate::refinement::{RefinementAssessment, RefinementManager, RefinementOutcome, RefinementSummary, Trend};
use crate::session::{Message, SessionManager};
use crate::tools::{alias, ToolExecutor, ToolInvocation, ToolOutcome};
use crate::validation::{HonestyAssessment, HonestyValidator, QualityAssessment, QualityValidator};

/// tool_results 中单条内容的最大字符数
const TOOL_RESULT_PREVIEW_CHARS: usize = 2000;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub policy: QualityPolicy,
    pub request_timeout: Duration,
    pub max_context_size: usize,
}

impl EngineSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            policy: cfg.quality.policy,
            request_timeout: Duration::from_secs(cfg.llm.timeouts.request),
            max_context_size: cfg.app.max_context_size,
        }
    }
}

/// 一次执行的会话与模式
pub(crate) struct ActiveRun {
    pub spec: Arc<AgentSpecification>,
    pub mode: String,
    pub session_id: String,
    pub task: String,
    pub context: Map<String, Value>,
}

/// 一次后端往返的产物
pub(crate) struct RoundTrip {
    pub raw: String,
    pub reply: parse::ParsedReply,
    pub invocations: Vec<ToolInvocation>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

pub struct ExecutionEngine {
    registry: Arc<AgentRegistry>,
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolExecutor>,
    sessions: Arc<SessionManager>,
    quality: QualityValidator,
    honesty: HonestyValidator,
    refinement: RefinementManager,
    scheduler: TaskScheduler,
    settings: EngineSettings,
}

impl ExecutionEngine {
    pub fn new(
        registry: Arc<AgentRegistry>,
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolExecutor>,
        sessions: Arc<SessionManager>,
        cfg: &AppConfig,
    ) -> Result<Self, AgentError> {
        Ok(Self {
            registry,
            llm,
            tools,
            sessions,
            quality: QualityValidator::from_config(&cfg.quality)?,
            honesty: HonestyValidator::new()?,
            refinement: RefinementManager::from_config(&cfg.refinement),
            scheduler: TaskScheduler::new(cfg.app.max_parallel_agents),
            settings: EngineSettings::from_config(cfg),
        })
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn tools(&self) -> &Arc<ToolExecutor> {
        &self.tools
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    pub fn refinement(&self) -> &RefinementManager {
        &self.refinement
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub async fn execute_request(self: &Arc<Self>, request: ExecutionRequest) -> Result<ExecutionResult, AgentError> {
        self.execute(&request.agent_id, request.input, request.context).await
    }

    pub async fn execute(
        self: &Arc<Self>,
        agent_id: &str,
        input: Map<String, Value>,
        context: Map<String, Value>,
    ) -> Result<ExecutionResult, AgentError> {
        let spec = self.registry.get(agent_id)?;
        spec.validate_input(&input)?;
        // 熔断作用于单次顶层执行（含其全部子 Agent）；同一引擎上并发的顶层执行共享同一个熔断器
        self.tools.router().breaker().reset();
        if spec.is_orchestrator() {
            return coordinator::coordinate(self, spec, input, context).await;
        }
        self.run_agent(spec, input, context).await
    }

    /// 子 Agent 入口：只执行 specialist，不会再次进入协调器
    pub(crate) async fn run_specialist(
        &self,
        agent_id: &str,
        input: Map<String, Value>,
        context: Map<String, Value>,
    ) -> Result<ExecutionResult, AgentError> {
        let spec = self.registry.get(agent_id)?;
        spec.validate_input(&input)?;
        self.run_agent(spec, input, context).await
    }

    async fn run_agent(
        &self,
        spec: Arc<AgentSpecification>,
        input: Map<String, Value>,
        context: Map<String, Value>,
    ) -> Result<ExecutionResult, AgentError> {
        let started = Instant::now();
        let (run, pending) = self.begin(spec, &input, context).await?;
        tracing::info!(
            agent_id = %run.spec.agent_id,
            session_id = %run.session_id,
            mode = %run.mode,
            "execution started"
        );

        let result = self.gate_loop(&run, pending, started).await;
        if result.is_err() {
            self.refinement.discard(&run.session_id, &run.spec.agent_id);
        }
        let result = result?;
        self.sessions.complete(&run.session_id).await?;
        tracing::info!(
            agent_id = %run.spec.agent_id,
            session_id = %run.session_id,
            quality = result.quality_score,
            passed = result.quality.passed,
            duration_ms = started.elapsed().as_millis() as u64,
            "execution finished"
        );
        Ok(result)
    }

    /// 建立或恢复会话；返回首轮待追加的轮次（在第一次调用计数之后才写入）
    pub(crate) async fn begin(
        &self,
        spec: Arc<AgentSpecification>,
        input: &Map<String, Value>,
        context: Map<String, Value>,
    ) -> Result<(ActiveRun, Vec<Message>), AgentError> {
        let mode = context_mode(&context).to_string();
        let task = context_task(&context, input);
        let user_turn = Message::user(prompt::task_message(input, &context));

        let (session_id, pending) = match context.get(CONTEXT_SESSION_ID).and_then(Value::as_str) {
            Some(id) => {
                let session = self
                    .sessions
                    .get(id)
                    .await
                    .ok_or_else(|| AgentError::SessionNotFound(id.to_string()))?;
                if session.completed {
                    return Err(AgentError::SessionCompleted(id.to_string()));
                }
                // 会话只能由创建它的 Agent 恢复
                if session.agent_id != spec.agent_id {
                    return Err(AgentError::ValidationError {
                        field: CONTEXT_SESSION_ID.to_string(),
                        reason: format!(
                            "session {id} belongs to agent '{}', not '{}'",
                            session.agent_id, spec.agent_id
                        ),
                    });
                }
                (id.to_string(), vec![user_turn])
            }
            None => {
                let id = self.sessions.create(&spec.agent_id).await;
                let system = prompt::system_prompt(&spec, &mode, self.tools.router());
                (id, vec![Message::system(system), user_turn])
            }
        };

        Ok((
            ActiveRun {
                spec,
                mode,
                session_id,
                task,
                context,
            },
            pending,
        ))
    }

    /// 一次后端往返：计数 → 追加待发轮次 → 裁剪上下文 → 调用后端 → 解析 → 执行工具 → 追加轮次
    pub(crate) async fn round_trip(&self, run: &ActiveRun, pending: Vec<Message>) -> Result<RoundTrip, AgentError> {
        self.sessions.track_call(&run.session_id).await?;
        self.sessions.append(&run.session_id, pending).await?;

        let history = self.sessions.messages(&run.session_id).await?;
        let messages = prompt::fit_to_budget(&history, self.settings.max_context_size);
        let response = match tokio::time::timeout(self.settings.request_timeout, self.llm.complete(&messages)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(AgentError::BackendError(e)),
            Err(_) => {
                return Err(AgentError::BackendError(format!(
                    "no response within {}s",
                    self.settings.request_timeout.as_secs_f64()
                )))
            }
        };
        if response.content.trim().is_empty() {
            return Err(AgentError::BackendError("empty response".to_string()));
        }
        tracing::debug!(
            session_id = %run.session_id,
            prompt_tokens = response.prompt_tokens,
            completion_tokens = response.completion_tokens,
            "backend round trip"
        );

        let reply = parse::parse_reply(&response.content);
        let mut turns = vec![Message::assistant(response.content.clone())];
        if run.spec.requires_action && reply.tool_calls.is_empty() {
            self.sessions.append(&run.session_id, turns).await?;
            return Err(AgentError::NoActionProduced(run.spec.agent_id.clone()));
        }

        let mut invocations = Vec::with_capacity(reply.tool_calls.len());
        for call in &reply.tool_calls {
            let invocation = if is_permitted(&run.spec, &run.mode, &call.tool) {
                match self.tools.execute(&call.tool, call.args.clone()).await {
                    Ok(invocation) => invocation,
                    Err(fatal) => {
                        turns.push(Message::tool(format!("[{}] aborted: {fatal}", call.tool)));
                        self.sessions.append(&run.session_id, turns).await?;
                        return Err(fatal);
                    }
                }
            } else {
                tracing::warn!(tool = %call.tool, mode = %run.mode, "tool not permitted in mode");
                ToolInvocation::rejected(
                    &call.tool,
                    call.args.clone(),
                    &AgentError::ToolNotFound(format!("{} (not permitted in mode '{}')", call.tool, run.mode)),
                )
            };
            turns.push(Message::tool(invocation.render()));
            invocations.push(invocation);
        }
        self.sessions.append(&run.session_id, turns).await?;

        Ok(RoundTrip {
            raw: response.content,
            reply,
            invocations,
            prompt_tokens: response.prompt_tokens,
            completion_tokens: response.completion_tokens,
        })
    }

    pub(crate) fn score(&self, spec: &AgentSpecification, output: &Map<String, Value>) -> (QualityAssessment, HonestyAssessment) {
        let threshold = self.quality.threshold_for(spec);
        (self.quality.validate(output, threshold), self.honesty.validate(output))
    }

    /// 往返 + 评分；gated 策略下失败时追加修正提示并重试
    async fn gate_loop(
        &self,
        run: &ActiveRun,
        mut pending: Vec<Message>,
        started: Instant,
    ) -> Result<ExecutionResult, AgentError> {
        let agent_id = run.spec.agent_id.as_str();
        let mut attempts = 0u32;
        let mut invocations: Vec<ToolInvocation> = Vec::new();
        let mut tokens = (0u64, 0u64);
        let mut prior: Option<RefinementAssessment> = None;
        let mut summary: Option<RefinementSummary> = None;

        loop {
            attempts += 1;
            let trip = self.round_trip(run, std::mem::take(&mut pending)).await?;
            tokens.0 += trip.prompt_tokens;
            tokens.1 += trip.completion_tokens;
            let output = build_output(&trip.reply, &trip.invocations);
            invocations.extend(trip.invocations.iter().cloned());
            let (quality, honesty) = self.score(&run.spec, &output);

            let finished = |summary: Option<RefinementSummary>| {
                let metadata = self.metadata(run, attempts, invocations.len(), tokens, started);
                ExecutionResult {
                    agent_id: agent_id.to_string(),
                    quality_score: quality.overall,
                    output_data: output.clone(),
                    execution_metadata: metadata,
                    quality: quality.clone(),
                    honesty: honesty.clone(),
                    tool_invocations: invocations.clone(),
                    refinement: summary,
                }
            };

            if self.settings.policy == QualityPolicy::Strict {
                if !quality.passed {
                    return Err(AgentError::QualityRejected {
                        agent_id: agent_id.to_string(),
                        score: quality.overall,
                        threshold: quality.threshold,
                        reasons: quality.failure_reasons.clone(),
                    });
                }
                if !honesty.compliant {
                    return Err(AgentError::HonestyRejected {
                        agent_id: agent_id.to_string(),
                        violations: honesty.failure_reasons(),
                    });
                }
                return Ok(finished(None));
            }

            let assessment = RefinementAssessment::from_assessments(
                &quality,
                &honesty,
                &output,
                self.refinement.min_refinable_score(),
            );
            if assessment.passed {
                if prior.is_some() {
                    summary = Some(self.refinement.finish(&run.session_id, agent_id, RefinementOutcome::Passed));
                }
                return Ok(finished(summary));
            }

            if let Some(prior) = &prior {
                let progress = self.refinement.assess_success(&run.session_id, agent_id, prior, &assessment);
                if !progress.should_continue {
                    let outcome = if progress.trend == Trend::Declining {
                        RefinementOutcome::Declining
                    } else {
                        RefinementOutcome::Exhausted
                    };
                    summary = Some(self.refinement.finish(&run.session_id, agent_id, outcome));
                    return Ok(finished(summary));
                }
            }

            if !self.refinement.needs_refinement(&run.session_id, agent_id, &assessment) {
                let outcome = if !assessment.critical_issues.is_empty() || !assessment.refinement_likely_helpful {
                    RefinementOutcome::Unrefinable
                } else {
                    RefinementOutcome::Exhausted
                };
                summary = Some(self.refinement.finish(&run.session_id, agent_id, outcome));
                return Ok(finished(summary));
            }

            self.sessions
                .track_refinement(&run.session_id, agent_id, &run.task)
                .await?;
            self.refinement
                .track_attempt(&run.session_id, agent_id, assessment.score, assessment.summary());
            let correction = self
                .refinement
                .generate_prompt(&assessment, &run.context, &run.task, &trip.raw);
            pending = vec![Message::user(correction)];
            prior = Some(assessment);
        }
    }

    pub(crate) fn metadata(
        &self,
        run: &ActiveRun,
        attempts: u32,
        tool_call_count: usize,
        tokens: (u64, u64),
        started: Instant,
    ) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("backend".into(), json!(self.llm.backend_id()));
        m.insert("prompt_tokens".into(), json!(tokens.0));
        m.insert("completion_tokens".into(), json!(tokens.1));
        m.insert("tool_call_count".into(), json!(tool_call_count));
        m.insert("duration_ms".into(), json!(started.elapsed().as_millis() as u64));
        m.insert("session_id".into(), json!(run.session_id));
        m.insert("attempts".into(), json!(attempts));
        m.insert("mode".into(), json!(run.mode));
        m
    }
}

/// 名称或其规范名出现在当前模式的工具列表中
fn is_permitted(spec: &AgentSpecification, mode: &str, tool: &str) -> bool {
    let permitted = spec.tools_for_mode(mode);
    if permitted.iter().any(|p| p == tool) {
        return true;
    }
    let (canonical, _) = alias::canonicalize(tool, Value::Null);
    permitted
        .iter()
        .any(|p| alias::canonicalize(p, Value::Null).0 == canonical)
}

/// 结构化对象优先，否则 `{"result": prose}`；有工具调用时附加 tool_results
pub(crate) fn build_output(reply: &parse::ParsedReply, invocations: &[ToolInvocation]) -> Map<String, Value> {
    let mut output = reply.structured.clone().unwrap_or_default();
    if !reply.prose.is_empty() && !output.contains_key("result") {
        output.insert("result".into(), Value::String(reply.prose.clone()));
    }
    if !invocations.is_empty() {
        let results: Vec<Value> = invocations
            .iter()
            .map(|inv| match &inv.outcome {
                ToolOutcome::Success { content } => json!({
                    "tool": inv.tool,
                    "status": "success",
                    "content": content.chars().take(TOOL_RESULT_PREVIEW_CHARS).collect::<String>(),
                }),
                ToolOutcome::Error { kind, message } => json!({
                    "tool": inv.tool,
                    "status": "error",
                    "kind": kind,
                    "message": message,
                }),
            })
            .collect();
        output.insert("tool_results".into(), Value::Array(results));
    }
    output
}
