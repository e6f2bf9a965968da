//! 工具安全标记：按工具名匹配允许/拒绝正则
//!
//! 显式允许优先于拒绝；两者都不匹配时视为安全。

use regex::Regex;

use crate::config::SafetySection;
use crate::core::AgentError;

#[derive(Debug, Clone, Default)]
pub struct SafetyPolicy {
    allow: Vec<Regex>,
    deny: Vec<Regex>,
}

impl SafetyPolicy {
    pub fn new(allow: &[String], deny: &[String]) -> Result<Self, AgentError> {
        Ok(Self {
            allow: compile(allow)?,
            deny: compile(deny)?,
        })
    }

    pub fn from_config(section: &SafetySection) -> Result<Self, AgentError> {
        Self::new(&section.allow, &section.deny)
    }

    pub fn is_safe(&self, tool_name: &str) -> bool {
        if self.allow.iter().any(|r| r.is_match(tool_name)) {
            return true;
        }
        !self.deny.iter().any(|r| r.is_match(tool_name))
    }
}

fn compile(patterns: &[String]) -> Result<Vec<Regex>, AgentError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| AgentError::ConfigError(format!("bad safety pattern {p}: {e}")))
        })
        .collect()
}
