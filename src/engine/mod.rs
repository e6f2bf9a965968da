//! 执行层：单 Agent 行为执行引擎与多 Agent 协调器

pub mod coordinator;
pub mod executor;
pub mod parse;
pub mod prompt;
pub mod types;

pub use coordinator::detect_required_agents;
pub use executor::{EngineSettings, ExecutionEngine};
pub use parse::{parse_reply, ParsedReply, ToolCall};
pub use types::{ChildRecord, ChildStatus, ExecutionRequest, ExecutionResult};
