//! Agent 规格：描述文件、输入 schema、只读注册表

pub mod registry;
pub mod spec;

pub use registry::AgentRegistry;
pub use spec::{AgentRole, AgentSpecification, FieldSpec, FieldType, DEFAULT_MODE};
