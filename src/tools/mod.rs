//! 工具路由层：提供者、线协议、别名、安全标记、熔断、兜底路由与审计执行器

pub mod alias;
pub mod circuit;
pub mod executor;
pub mod filesystem;
pub mod protocol;
pub mod provider;
pub mod registry;
pub mod router;
pub mod safety;
pub mod schema;

pub use circuit::CircuitBreaker;
pub use executor::{ToolExecutor, ToolInvocation, ToolOutcome};
pub use filesystem::{filesystem_provider, SafeFs, FILESYSTEM_PROVIDER_ID};
pub use provider::{Connection, RpcProvider, ToolDescriptor, ToolProvider};
pub use registry::{InProcessProvider, Tool, ToolRegistry};
pub use router::{DiscoveredTool, RoutedCall, RouterOptions, ToolRouter};
pub use safety::SafetyPolicy;
pub use schema::tool_call_schema_json;
