//! Hive - 行为驱动的多 Agent 执行核心
//!
//! 模块划分：
//! - **agents**: Agent 规格描述与只读注册表
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、子 Agent 调度池、运行时构建
//! - **engine**: 单 Agent 执行引擎与多 Agent 协调器
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **observability**: 日志初始化
//! - **refinement**: 评分失败后的修正流程
//! - **session**: 会话记录、调用上限与持久化
//! - **tools**: 工具路由、线协议、熔断与回退
//! - **validation**: 质量与诚实度评分

pub mod agents;
pub mod config;
pub mod core;
pub mod engine;
pub mod llm;
pub mod observability;
pub mod refinement;
pub mod session;
pub mod tools;
pub mod validation;

pub use crate::core::{build_runtime, AgentError, RuntimeBuilder};
pub use crate::engine::{ExecutionEngine, ExecutionRequest, ExecutionResult};
