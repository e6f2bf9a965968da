//! 工具路由
//!
//! 启动时从每个提供者拉取工具目录并打上安全标记；调用时依次经过熔断检查、别名映射、
//! 安全拒绝、目录查找或前缀兜底，最后把结果计入熔断器。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::config::{FallbackEntry, ToolsSection, DEFAULT_CIRCUIT_BREAKER_THRESHOLD, DEFAULT_TOOL_TIMEOUT_SECS};
use crate::core::AgentError;
use crate::tools::{alias, CircuitBreaker, SafetyPolicy, ToolProvider};

/// 路由选项
#[derive(Debug, Clone)]
pub struct RouterOptions {
    pub safety: SafetyPolicy,
    pub fallback: Vec<FallbackEntry>,
    pub breaker_threshold: u32,
    pub call_timeout: Duration,
}

impl RouterOptions {
    pub fn from_config(section: &ToolsSection) -> Result<Self, AgentError> {
        Ok(Self {
            safety: SafetyPolicy::from_config(&section.safety)?,
            fallback: section.fallback.clone(),
            breaker_threshold: section.circuit_breaker_threshold,
            call_timeout: Duration::from_secs(section.tool_timeout_secs),
        })
    }
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            safety: SafetyPolicy::default(),
            fallback: Vec::new(),
            breaker_threshold: DEFAULT_CIRCUIT_BREAKER_THRESHOLD,
            call_timeout: Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS),
        }
    }
}

/// 目录中的一个工具（对外名称可能带提供者前缀）
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredTool {
    pub name: String,
    pub original_name: String,
    pub description: String,
    pub input_schema: Value,
    pub provider_id: String,
    pub safe: bool,
}

/// 一次成功路由的结果
#[derive(Debug, Clone)]
pub struct RoutedCall {
    pub content: String,
    pub provider_id: String,
    pub canonical_name: String,
    pub arguments: Value,
}

pub struct ToolRouter {
    providers: Vec<Arc<dyn ToolProvider>>,
    catalog: Vec<DiscoveredTool>,
    index: HashMap<String, usize>,
    options: RouterOptions,
    breaker: CircuitBreaker,
    /// 兜底路由成功后的缓存：工具名 -> 提供者 id
    fallback_cache: Mutex<HashMap<String, String>>,
}

impl ToolRouter {
    /// 按声明顺序拉取各提供者的目录；列目录失败的提供者仍保留给兜底路由
    pub async fn discover(providers: Vec<Arc<dyn ToolProvider>>, options: RouterOptions) -> Self {
        let mut catalog: Vec<DiscoveredTool> = Vec::new();
        let mut index = HashMap::new();

        for provider in &providers {
            let tools = match provider.list_tools().await {
                Ok(tools) => tools,
                Err(e) => {
                    tracing::warn!(provider = %provider.id(), error = %e, "tools/list failed, provider kept for fallback only");
                    continue;
                }
            };
            for tool in tools {
                let exposed = if index.contains_key(&tool.name) {
                    format!("{}_{}", provider.id(), tool.name)
                } else {
                    tool.name.clone()
                };
                if index.contains_key(&exposed) {
                    tracing::warn!(provider = %provider.id(), tool = %tool.name, "duplicate tool name dropped");
                    continue;
                }
                let safe = options.safety.is_safe(&tool.name) && options.safety.is_safe(&exposed);
                if !safe {
                    tracing::info!(provider = %provider.id(), tool = %exposed, "tool flagged unsafe");
                }
                index.insert(exposed.clone(), catalog.len());
                catalog.push(DiscoveredTool {
                    name: exposed,
                    original_name: tool.name,
                    description: tool.description,
                    input_schema: tool.input_schema,
                    provider_id: provider.id().to_string(),
                    safe,
                });
            }
        }

        tracing::info!(providers = providers.len(), tools = catalog.len(), "tool discovery complete");
        Self {
            breaker: CircuitBreaker::new(options.breaker_threshold),
            providers,
            catalog,
            index,
            options,
            fallback_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn tools(&self) -> &[DiscoveredTool] {
        &self.catalog
    }

    pub fn tool(&self, name: &str) -> Option<&DiscoveredTool> {
        self.index.get(name).map(|&i| &self.catalog[i])
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn provider_ids(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.id()).collect()
    }

    /// 已缓存的兜底提供者
    pub fn cached_provider(&self, name: &str) -> Option<String> {
        self.fallback_cache
            .lock()
            .ok()
            .and_then(|cache| cache.get(name).cloned())
    }

    /// 调用工具；ToolUnsafe / ToolNotFound 不计入熔断
    pub async fn invoke(&self, name: &str, args: Value) -> Result<RoutedCall, AgentError> {
        self.breaker.check()?;
        let (canonical, args) = alias::canonicalize(name, args);

        if let Some(tool) = self.tool(&canonical) {
            if !tool.safe {
                tracing::warn!(tool = %canonical, "unsafe tool refused");
                return Err(AgentError::ToolUnsafe(canonical));
            }
            let provider = self.provider(&tool.provider_id).ok_or_else(|| {
                AgentError::ToolNotFound(canonical.clone())
            })?;
            let result = self.call(provider, &tool.original_name, args.clone()).await;
            return self.settle(result, provider.id(), canonical, args);
        }

        if !self.options.safety.is_safe(&canonical) {
            tracing::warn!(tool = %canonical, "unsafe tool refused");
            return Err(AgentError::ToolUnsafe(canonical));
        }
        let candidates = self.fallback_candidates(&canonical);
        if candidates.is_empty() {
            return Err(AgentError::ToolNotFound(canonical));
        }

        let mut last_err = None;
        for provider in candidates {
            tracing::debug!(tool = %canonical, provider = %provider.id(), "fallback routing attempt");
            match self.call(provider, &canonical, args.clone()).await {
                Ok(content) => {
                    if let Ok(mut cache) = self.fallback_cache.lock() {
                        cache.insert(canonical.clone(), provider.id().to_string());
                    }
                    return self.settle(Ok(content), provider.id(), canonical, args);
                }
                Err(AgentError::ToolNotFound(_)) if last_err.is_some() => {}
                Err(e) => last_err = Some((provider.id().to_string(), e)),
            }
        }
        match last_err {
            // 候选都不认识这个名字：与目录未命中同等对待，不计入熔断
            Some((_, AgentError::ToolNotFound(_))) | None => Err(AgentError::ToolNotFound(canonical)),
            Some((provider_id, err)) => self.settle(Err(err), &provider_id, canonical, args),
        }
    }

    fn provider(&self, id: &str) -> Option<&Arc<dyn ToolProvider>> {
        self.providers.iter().find(|p| p.id() == id)
    }

    /// 缓存的提供者优先，其次按前缀规则声明顺序，去重
    fn fallback_candidates(&self, name: &str) -> Vec<&Arc<dyn ToolProvider>> {
        let mut ids: Vec<String> = self.cached_provider(name).into_iter().collect();
        for rule in self.options.fallback.iter().filter(|r| name.starts_with(&r.prefix)) {
            for id in &rule.providers {
                if !ids.contains(id) {
                    ids.push(id.clone());
                }
            }
        }
        ids.iter().filter_map(|id| self.provider(id)).collect()
    }

    async fn call(
        &self,
        provider: &Arc<dyn ToolProvider>,
        name: &str,
        args: Value,
    ) -> Result<String, AgentError> {
        match tokio::time::timeout(self.options.call_timeout, provider.call_tool(name, args)).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::ToolExecutionError {
                tool: name.to_string(),
                message: format!(
                    "timed out after {}s",
                    self.options.call_timeout.as_secs_f64()
                ),
            }),
        }
    }

    /// 成功清零，失败计数；达到阈值时以 CircuitBreakerTripped 取代原错误
    fn settle(
        &self,
        result: Result<String, AgentError>,
        provider_id: &str,
        canonical_name: String,
        arguments: Value,
    ) -> Result<RoutedCall, AgentError> {
        match result {
            Ok(content) => {
                self.breaker.record_success();
                Ok(RoutedCall {
                    content,
                    provider_id: provider_id.to_string(),
                    canonical_name,
                    arguments,
                })
            }
            Err(e) => {
                self.breaker.record_failure()?;
                Err(e)
            }
        }
    }
}
