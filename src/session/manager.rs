//! 会话管理
//!
//! 持有全部会话的内存映射与持久化存储，所有修改都在同一把锁下完成，
//! 因此同一会话内的轮次严格有序。会话标识必须由调用方显式传递，查找失败是硬错误。

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::core::{AgentError, SessionLimitKind};
use crate::session::{Message, SessionStore};

/// 会话 ID
pub type SessionId = String;

/// 单个会话（持久化记录）
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationSession {
    pub id: SessionId,
    pub agent_id: String,
    /// 轮次列表，只追加不重排
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed: bool,
    /// 已记录的后端调用次数
    #[serde(default)]
    pub call_count: u32,
    /// (agent 类型, 任务) -> 修正次数
    #[serde(default)]
    pub refinement_counts: BTreeMap<String, u32>,
}

impl ConversationSession {
    pub fn new(agent_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: format!("session_{}", uuid::Uuid::new_v4()),
            agent_id: agent_id.into(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            completed: false,
            call_count: 0,
            refinement_counts: BTreeMap::new(),
        }
    }

    fn touch(&mut self) {
        let now = Utc::now();
        if now > self.updated_at {
            self.updated_at = now;
        }
    }
}

/// 两个互相独立的会话上限
#[derive(Clone, Copy, Debug)]
pub struct SessionLimits {
    pub max_total_calls: u32,
    pub max_refinement_iterations: u32,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_total_calls: 50,
            max_refinement_iterations: 3,
        }
    }
}

/// 会话管理器
pub struct SessionManager {
    store: SessionStore,
    sessions: Mutex<HashMap<SessionId, ConversationSession>>,
    limits: SessionLimits,
}

impl SessionManager {
    /// 打开存储目录并把全部记录载入内存
    pub async fn open(root: impl AsRef<Path>, limits: SessionLimits) -> Result<Self, AgentError> {
        let store = SessionStore::new(root);
        let loaded = store.load_all().await?;
        tracing::info!(
            root = %store.root().display(),
            sessions = loaded.len(),
            "session store loaded"
        );
        let sessions = loaded.into_iter().map(|s| (s.id.clone(), s)).collect();
        Ok(Self {
            store,
            sessions: Mutex::new(sessions),
            limits,
        })
    }

    pub fn limits(&self) -> SessionLimits {
        self.limits
    }

    /// 新建会话，返回显式句柄
    pub async fn create(&self, agent_id: &str) -> SessionId {
        let session = ConversationSession::new(agent_id);
        let id = session.id.clone();
        let mut sessions = self.sessions.lock().await;
        self.persist(&session).await;
        sessions.insert(id.clone(), session);
        tracing::debug!(session_id = %id, agent_id, "session created");
        id
    }

    /// 追加若干轮次
    pub async fn append(&self, session_id: &str, messages: Vec<Message>) -> Result<(), AgentError> {
        if messages.is_empty() {
            return Ok(());
        }
        self.mutate(session_id, |s| {
            s.messages.extend(messages);
            Ok(())
        })
        .await
    }

    /// 记录一次后端调用；超过 max_total_calls 时报错且不计数
    pub async fn track_call(&self, session_id: &str) -> Result<u32, AgentError> {
        let limit = self.limits.max_total_calls;
        self.mutate(session_id, |s| {
            if s.call_count >= limit {
                return Err(AgentError::SessionLimitExceeded {
                    session_id: s.id.clone(),
                    kind: SessionLimitKind::Calls,
                    limit,
                });
            }
            s.call_count += 1;
            Ok(s.call_count)
        })
        .await
    }

    /// 记录一次针对 (agent 类型, 任务) 的修正；超过 max_refinement_iterations 时报错
    pub async fn track_refinement(
        &self,
        session_id: &str,
        agent_type: &str,
        task: &str,
    ) -> Result<u32, AgentError> {
        let limit = self.limits.max_refinement_iterations;
        let key = format!("{agent_type}::{task}");
        self.mutate(session_id, |s| {
            let count = s.refinement_counts.get(&key).copied().unwrap_or(0);
            if count >= limit {
                return Err(AgentError::SessionLimitExceeded {
                    session_id: s.id.clone(),
                    kind: SessionLimitKind::Refinements,
                    limit,
                });
            }
            s.refinement_counts.insert(key, count + 1);
            Ok(count + 1)
        })
        .await
    }

    /// 标记完成（终态），记录移入 completed/
    pub async fn complete(&self, session_id: &str) -> Result<(), AgentError> {
        self.mutate(session_id, |s| {
            s.completed = true;
            Ok(())
        })
        .await
    }

    pub async fn messages(&self, session_id: &str) -> Result<Vec<Message>, AgentError> {
        self.sessions
            .lock()
            .await
            .get(session_id)
            .map(|s| s.messages.clone())
            .ok_or_else(|| AgentError::SessionNotFound(session_id.to_string()))
    }

    pub async fn get(&self, session_id: &str) -> Option<ConversationSession> {
        self.sessions.lock().await.get(session_id).cloned()
    }

    pub async fn active_count(&self) -> usize {
        self.sessions
            .lock()
            .await
            .values()
            .filter(|s| !s.completed)
            .count()
    }

    pub async fn completed_count(&self) -> usize {
        self.sessions
            .lock()
            .await
            .values()
            .filter(|s| s.completed)
            .count()
    }

    /// 在锁内修改会话并持久化；已完成的会话拒绝修改
    async fn mutate<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut ConversationSession) -> Result<T, AgentError>,
    ) -> Result<T, AgentError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| AgentError::SessionNotFound(session_id.to_string()))?;
        if session.completed {
            return Err(AgentError::SessionCompleted(session_id.to_string()));
        }
        let out = f(session)?;
        session.touch();
        let snapshot = session.clone();
        self.persist(&snapshot).await;
        Ok(out)
    }

    /// 持久化失败只记录告警，不影响已完成的内存修改
    async fn persist(&self, session: &ConversationSession) {
        if let Err(e) = self.store.save(session).await {
            tracing::warn!(session_id = %session.id, error = %e, "session persistence failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn manager(limits: SessionLimits) -> (tempfile::TempDir, SessionManager) {
        let dir = tempfile::tempdir().unwrap();
        let mgr = SessionManager::open(dir.path(), limits).await.unwrap();
        (dir, mgr)
    }

    #[tokio::test]
    async fn test_unknown_session_is_hard_error() {
        let (_dir, mgr) = manager(SessionLimits::default()).await;
        let err = mgr.append("missing", vec![Message::user("x")]).await.unwrap_err();
        assert!(matches!(err, AgentError::SessionNotFound(_)));
        assert_eq!(mgr.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_completed_session_is_immutable() {
        let (_dir, mgr) = manager(SessionLimits::default()).await;
        let id = mgr.create("writer").await;
        mgr.append(&id, vec![Message::user("a")]).await.unwrap();
        mgr.complete(&id).await.unwrap();
        let err = mgr.append(&id, vec![Message::user("b")]).await.unwrap_err();
        assert!(matches!(err, AgentError::SessionCompleted(_)));
        assert_eq!(mgr.messages(&id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_turn_order_preserved() {
        let (_dir, mgr) = manager(SessionLimits::default()).await;
        let id = mgr.create("writer").await;
        mgr.append(&id, vec![Message::system("s"), Message::user("u")])
            .await
            .unwrap();
        mgr.append(&id, vec![Message::assistant("a"), Message::tool("t")])
            .await
            .unwrap();
        let contents: Vec<_> = mgr
            .messages(&id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["s", "u", "a", "t"]);
    }

    #[tokio::test]
    async fn test_call_ceiling() {
        let (_dir, mgr) = manager(SessionLimits {
            max_total_calls: 5,
            max_refinement_iterations: 2,
        })
        .await;
        let id = mgr.create("planner").await;
        for expected in 1..=5 {
            assert_eq!(mgr.track_call(&id).await.unwrap(), expected);
        }
        let err = mgr.track_call(&id).await.unwrap_err();
        assert!(matches!(
            err,
            AgentError::SessionLimitExceeded {
                kind: SessionLimitKind::Calls,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_refinement_ceiling_per_task() {
        let (_dir, mgr) = manager(SessionLimits {
            max_total_calls: 5,
            max_refinement_iterations: 2,
        })
        .await;
        let id = mgr.create("planner").await;
        mgr.track_refinement(&id, "planner", "task-a").await.unwrap();
        mgr.track_refinement(&id, "planner", "task-a").await.unwrap();
        let err = mgr
            .track_refinement(&id, "planner", "task-a")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AgentError::SessionLimitExceeded {
                kind: SessionLimitKind::Refinements,
                ..
            }
        ));
        // 不同任务独立计数
        assert_eq!(
            mgr.track_refinement(&id, "planner", "task-b").await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_reload_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let mgr = SessionManager::open(dir.path(), SessionLimits::default())
                .await
                .unwrap();
            let id = mgr.create("reviewer").await;
            mgr.append(&id, vec![Message::user("persist me")]).await.unwrap();
            mgr.track_call(&id).await.unwrap();
            id
        };
        let mgr = SessionManager::open(dir.path(), SessionLimits::default())
            .await
            .unwrap();
        let session = mgr.get(&id).await.unwrap();
        assert_eq!(session.messages, vec![Message::user("persist me")]);
        assert_eq!(session.call_count, 1);
        assert!(!session.completed);
    }
}
