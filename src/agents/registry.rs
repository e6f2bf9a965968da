//! Agent 规格注册表
//!
//! 启动时从描述文件目录（*.json / *.toml）一次性加载，之后只读，多任务共享无需加锁。

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::agents::AgentSpecification;
use crate::core::AgentError;

/// 只读注册表：agent_id -> 规格；保留加载顺序，协调器按此顺序选择子 Agent
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    specs: HashMap<String, Arc<AgentSpecification>>,
    order: Vec<String>,
}

impl AgentRegistry {
    /// 从内存中的规格列表构建；重复的 agent_id 视为配置错误
    pub fn from_specs(specs: Vec<AgentSpecification>) -> Result<Self, AgentError> {
        let mut registry = Self::default();
        for spec in specs {
            if spec.agent_id.trim().is_empty() {
                return Err(AgentError::ConfigError("agent_id must not be empty".into()));
            }
            if registry.specs.contains_key(&spec.agent_id) {
                return Err(AgentError::ConfigError(format!(
                    "duplicate agent_id: {}",
                    spec.agent_id
                )));
            }
            registry.order.push(spec.agent_id.clone());
            registry.specs.insert(spec.agent_id.clone(), Arc::new(spec));
        }
        Ok(registry)
    }

    /// 加载目录下全部描述文件（按文件名排序）；目录不存在时返回空注册表
    pub fn load_dir(dir: &Path) -> Result<Self, AgentError> {
        if !dir.exists() {
            tracing::warn!(dir = %dir.display(), "agents directory not found, registry empty");
            return Ok(Self::default());
        }
        let mut paths = Vec::new();
        for ext in ["json", "toml"] {
            let pattern = dir.join(format!("*.{ext}"));
            let entries = glob::glob(&pattern.to_string_lossy())
                .map_err(|e| AgentError::ConfigError(format!("bad agents pattern: {e}")))?;
            paths.extend(entries.filter_map(Result::ok));
        }
        paths.sort();

        let mut specs = Vec::with_capacity(paths.len());
        for path in paths {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| AgentError::ConfigError(format!("read {}: {e}", path.display())))?;
            let spec: AgentSpecification = match path.extension().and_then(|s| s.to_str()) {
                Some("toml") => toml::from_str(&raw)
                    .map_err(|e| AgentError::ConfigError(format!("{}: {e}", path.display())))?,
                _ => serde_json::from_str(&raw)
                    .map_err(|e| AgentError::ConfigError(format!("{}: {e}", path.display())))?,
            };
            specs.push(spec);
        }
        let registry = Self::from_specs(specs)?;
        tracing::info!(dir = %dir.display(), agents = registry.len(), "agent registry loaded");
        Ok(registry)
    }

    pub fn get(&self, agent_id: &str) -> Result<Arc<AgentSpecification>, AgentError> {
        self.specs
            .get(agent_id)
            .cloned()
            .ok_or_else(|| AgentError::SpecNotFound(agent_id.to_string()))
    }

    /// 按加载顺序返回全部 agent_id
    pub fn agent_ids(&self) -> &[String] {
        &self.order
    }

    pub fn iter(&self) -> impl Iterator<Item = Arc<AgentSpecification>> + '_ {
        self.order.iter().filter_map(|id| self.specs.get(id).cloned())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentRole;

    #[test]
    fn test_duplicate_agent_rejected() {
        let err = AgentRegistry::from_specs(vec![
            AgentSpecification::new("a"),
            AgentSpecification::new("a"),
        ])
        .unwrap_err();
        assert_eq!(err.kind(), "config_error");
    }

    #[test]
    fn test_unknown_agent() {
        let registry = AgentRegistry::from_specs(vec![AgentSpecification::new("a")]).unwrap();
        assert!(matches!(
            registry.get("b").unwrap_err(),
            AgentError::SpecNotFound(id) if id == "b"
        ));
    }

    #[test]
    fn test_load_json_and_toml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("01_orchestrator.json"),
            r#"{"agent_id": "orchestrator", "role": "orchestrator", "algorithm": "delegate"}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("02_security_reviewer.toml"),
            r#"
agent_id = "security_reviewer"
algorithm = "Review the code for vulnerabilities."
requires_action = true

[input_schema.analysis_scope]
type = "string"
required = true

[tools]
default = ["read_text_file", "search_files"]
"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.md"), "ignored").unwrap();

        let registry = AgentRegistry::load_dir(dir.path()).unwrap();
        assert_eq!(registry.agent_ids(), ["orchestrator", "security_reviewer"]);
        assert_eq!(registry.get("orchestrator").unwrap().role, AgentRole::Orchestrator);
        let reviewer = registry.get("security_reviewer").unwrap();
        assert!(reviewer.requires_action);
        assert!(reviewer.input_schema["analysis_scope"].required);
    }
}
