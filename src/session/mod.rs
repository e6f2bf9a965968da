//! 会话层：轮次、持久化、会话管理与上限

pub mod manager;
pub mod message;
pub mod store;

pub use manager::{ConversationSession, SessionId, SessionLimits, SessionManager};
pub use message::{Message, Role};
pub use store::SessionStore;
