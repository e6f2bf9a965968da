//! 核心层：错误类型、子 Agent 调度池、运行时构建

pub mod builder;
pub mod error;
pub mod task_scheduler;

pub use builder::{build_runtime, create_llm_from_config, RuntimeBuilder};
pub use error::{AgentError, SessionLimitKind};
pub use task_scheduler::TaskScheduler;
