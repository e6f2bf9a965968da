//! 错误分类
//!
//! 所有核心组件（执行引擎、协调器、工具路由、会话管理）共用 AgentError；
//! 每个变体都携带足够的结构（类型 + 出错的字段/名称），调用方无需翻日志即可渲染。

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 会话上限类型：总调用次数 / 同一任务的修正次数
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionLimitKind {
    Calls,
    Refinements,
}

impl fmt::Display for SessionLimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionLimitKind::Calls => write!(f, "calls"),
            SessionLimitKind::Refinements => write!(f, "refinements"),
        }
    }
}

/// 执行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Agent specification not found: {0}")]
    SpecNotFound(String),

    /// 输入参数不满足 schema；field 为出错字段名
    #[error("Validation error on field '{field}': {reason}")]
    ValidationError { field: String, reason: String },

    /// 后端超时或空响应
    #[error("Backend error: {0}")]
    BackendError(String),

    /// 约定必须调用工具的 Agent 没有产生任何 Tool Call
    #[error("Agent '{0}' produced no tool call")]
    NoActionProduced(String),

    #[error("Quality rejected for '{agent_id}': score {score:.2} below {threshold:.2} ({})", .reasons.join("; "))]
    QualityRejected {
        agent_id: String,
        score: f64,
        threshold: f64,
        reasons: Vec<String>,
    },

    #[error("Honesty rejected for '{agent_id}': {}", .violations.join("; "))]
    HonestyRejected {
        agent_id: String,
        violations: Vec<String>,
    },

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool refused as unsafe: {0}")]
    ToolUnsafe(String),

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecutionError { tool: String, message: String },

    /// 连续工具失败达到阈值，整个运行必须终止
    #[error("Circuit breaker tripped after {failures} consecutive tool failures")]
    CircuitBreakerTripped { failures: u32 },

    #[error("Session limit exceeded ({kind}) for session {session_id}: limit {limit}")]
    SessionLimitExceeded {
        session_id: String,
        kind: SessionLimitKind,
        limit: u32,
    },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session already completed: {0}")]
    SessionCompleted(String),

    #[error("Persistence error: {0}")]
    PersistenceError(String),

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl AgentError {
    /// 稳定的错误类型名，用于结构化输出（协调器子任务记录、审计日志）
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::SpecNotFound(_) => "spec_not_found",
            AgentError::ValidationError { .. } => "validation_error",
            AgentError::BackendError(_) => "backend_error",
            AgentError::NoActionProduced(_) => "no_action_produced",
            AgentError::QualityRejected { .. } => "quality_rejected",
            AgentError::HonestyRejected { .. } => "honesty_rejected",
            AgentError::ToolNotFound(_) => "tool_not_found",
            AgentError::ToolUnsafe(_) => "tool_unsafe",
            AgentError::ToolExecutionError { .. } => "tool_execution_error",
            AgentError::CircuitBreakerTripped { .. } => "circuit_breaker_tripped",
            AgentError::SessionLimitExceeded { .. } => "session_limit_exceeded",
            AgentError::SessionNotFound(_) => "session_not_found",
            AgentError::SessionCompleted(_) => "session_completed",
            AgentError::PersistenceError(_) => "persistence_error",
            AgentError::ConfigError(_) => "config_error",
        }
    }

    /// 是否必须终止整个运行（而不仅是当前尝试）
    pub fn is_fatal(&self) -> bool {
        matches!(self, AgentError::CircuitBreakerTripped { .. })
    }
}
