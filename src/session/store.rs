//! 会话持久化
//!
//! 每个会话一个 JSON 文件，按状态分 active/ 与 completed/ 两个目录；
//! 写入先落临时文件再 rename，进程崩溃时不会留下半截记录。

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::core::AgentError;
use crate::session::ConversationSession;

const ACTIVE_DIR: &str = "active";
const COMPLETED_DIR: &str = "completed";

/// 文件持久化：root/active/<id>.json 与 root/completed/<id>.json
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn active_path(&self, id: &str) -> PathBuf {
        self.root.join(ACTIVE_DIR).join(format!("{id}.json"))
    }

    fn completed_path(&self, id: &str) -> PathBuf {
        self.root.join(COMPLETED_DIR).join(format!("{id}.json"))
    }

    /// 原子写入；已完成的会话写入 completed/ 并删除 active/ 中的旧文件
    pub async fn save(&self, session: &ConversationSession) -> Result<(), AgentError> {
        let target = if session.completed {
            self.completed_path(&session.id)
        } else {
            self.active_path(&session.id)
        };
        let data = serde_json::to_vec_pretty(session)
            .map_err(|e| AgentError::PersistenceError(format!("serialize {}: {e}", session.id)))?;
        write_atomic(&target, &data).await?;

        if session.completed {
            match fs::remove_file(self.active_path(&session.id)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(AgentError::PersistenceError(format!(
                        "remove active record {}: {e}",
                        session.id
                    )))
                }
            }
        }
        Ok(())
    }

    /// 读取两个目录中的全部会话；损坏的文件记录告警后跳过
    pub async fn load_all(&self) -> Result<Vec<ConversationSession>, AgentError> {
        let mut sessions = Vec::new();
        for dir in [ACTIVE_DIR, COMPLETED_DIR] {
            let dir = self.root.join(dir);
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(AgentError::PersistenceError(format!(
                        "read {}: {e}",
                        dir.display()
                    )))
                }
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| AgentError::PersistenceError(e.to_string()))?
            {
                let path = entry.path();
                if path.extension().and_then(|s| s.to_str()) != Some("json") {
                    continue;
                }
                let raw = match fs::read(&path).await {
                    Ok(raw) => raw,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "session record unreadable");
                        continue;
                    }
                };
                match serde_json::from_slice::<ConversationSession>(&raw) {
                    Ok(session) => sessions.push(session),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "session record corrupt, skipped")
                    }
                }
            }
        }
        Ok(sessions)
    }
}

async fn write_atomic(target: &Path, data: &[u8]) -> Result<(), AgentError> {
    let parent = target
        .parent()
        .ok_or_else(|| AgentError::PersistenceError(format!("no parent: {}", target.display())))?;
    fs::create_dir_all(parent)
        .await
        .map_err(|e| AgentError::PersistenceError(format!("mkdir {}: {e}", parent.display())))?;

    let file_name = target
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("session.json");
    let tmp = parent.join(format!(".{file_name}.tmp"));
    fs::write(&tmp, data)
        .await
        .map_err(|e| AgentError::PersistenceError(format!("write {}: {e}", tmp.display())))?;
    fs::rename(&tmp, target)
        .await
        .map_err(|e| AgentError::PersistenceError(format!("rename {}: {e}", target.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Message;

    #[tokio::test]
    async fn test_save_moves_completed_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let mut session = ConversationSession::new("planner");
        session.messages.push(Message::user("hello"));

        store.save(&session).await.unwrap();
        assert!(dir.path().join("active").join(format!("{}.json", session.id)).exists());

        session.completed = true;
        store.save(&session).await.unwrap();
        assert!(!dir.path().join("active").join(format!("{}.json", session.id)).exists());
        assert!(dir.path().join("completed").join(format!("{}.json", session.id)).exists());

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].completed);
        assert_eq!(loaded[0].messages, session.messages);
    }

    #[tokio::test]
    async fn test_corrupt_record_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("active")).unwrap();
        std::fs::write(dir.path().join("active").join("broken.json"), b"{not json").unwrap();
        let store = SessionStore::new(dir.path());
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let session = ConversationSession::new("writer");
        store.save(&session).await.unwrap();
        let names: Vec<_> = std::fs::read_dir(dir.path().join("active"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec![format!("{}.json", session.id)]);
    }
}
