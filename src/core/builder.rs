//! 运行时构建器：统一的引擎初始化逻辑
//!
//! 顺序：LLM 后端 → Agent 注册表 → 工具提供者（外部进程 + 内置文件系统）→ 路由发现 → 会话存储 → 引擎。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::agents::AgentRegistry;
use crate::config::AppConfig;
use crate::engine::ExecutionEngine;
use crate::llm::{create_deepseek_client, LlmClient, MockLlmClient, OpenAiClient, DEEPSEEK_CHAT};
use crate::session::{SessionLimits, SessionManager};
use crate::tools::{
    filesystem_provider, RouterOptions, RpcProvider, ToolExecutor, ToolProvider, ToolRouter,
    FILESYSTEM_PROVIDER_ID,
};

/// 根据配置与环境变量选择 LLM 后端；无可用 Key 时退回 Mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let has_deepseek = std::env::var("DEEPSEEK_API_KEY").is_ok();
    let has_openai = std::env::var("OPENAI_API_KEY").is_ok();

    match provider.as_str() {
        "mock" => {
            tracing::info!("Using Mock LLM");
            Arc::new(MockLlmClient)
        }
        "deepseek" if has_deepseek => {
            let model = if cfg.llm.model.is_empty() { DEEPSEEK_CHAT } else { cfg.llm.model.as_str() };
            tracing::info!(model, "Using DeepSeek LLM");
            Arc::new(create_deepseek_client(Some(model)))
        }
        _ if has_openai => {
            tracing::info!(model = %cfg.llm.model, "Using OpenAI-compatible LLM");
            Arc::new(OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                std::env::var("OPENAI_API_KEY").ok().as_deref(),
            ))
        }
        _ if has_deepseek => {
            tracing::info!(model = DEEPSEEK_CHAT, "Using DeepSeek LLM");
            Arc::new(create_deepseek_client(None))
        }
        _ => {
            tracing::warn!(provider = %provider, "No API key set, using Mock LLM");
            Arc::new(MockLlmClient)
        }
    }
}

/// 引擎构建器：可替换 LLM 与额外的工具提供者（测试、嵌入场景）
pub struct RuntimeBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    registry: Option<AgentRegistry>,
    extra_providers: Vec<Arc<dyn ToolProvider>>,
}

impl RuntimeBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            registry: None,
            extra_providers: Vec::new(),
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_registry(mut self, registry: AgentRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn ToolProvider>) -> Self {
        self.extra_providers.push(provider);
        self
    }

    fn workspace(&self) -> PathBuf {
        self.config
            .app
            .workspace_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("workspace"))
    }

    /// 按声明顺序启动外部提供者；启动失败的跳过并记录，内置文件系统提供者在未被同名覆盖时追加
    async fn build_providers(&self, workspace: &Path) -> Vec<Arc<dyn ToolProvider>> {
        let timeout = Duration::from_secs(self.config.tools.tool_timeout_secs);
        let mut providers: Vec<Arc<dyn ToolProvider>> = Vec::new();
        for entry in &self.config.tools.providers {
            match RpcProvider::spawn(entry, workspace, timeout).await {
                Ok(p) => providers.push(Arc::new(p)),
                Err(e) => tracing::warn!(provider = %entry.id, error = %e, "tool provider unavailable"),
            }
        }
        providers.extend(self.extra_providers.iter().cloned());
        if !providers.iter().any(|p| p.id() == FILESYSTEM_PROVIDER_ID) {
            providers.push(Arc::new(filesystem_provider(workspace)));
        }
        providers
    }

    pub async fn build(self) -> anyhow::Result<Arc<ExecutionEngine>> {
        let workspace = self.workspace();
        tokio::fs::create_dir_all(&workspace)
            .await
            .with_context(|| format!("create workspace {}", workspace.display()))?;

        let llm = match &self.llm {
            Some(llm) => llm.clone(),
            None => create_llm_from_config(&self.config),
        };

        let registry = match self.registry.clone() {
            Some(registry) => registry,
            None => {
                let dir = self
                    .config
                    .app
                    .agents_dir
                    .clone()
                    .unwrap_or_else(|| PathBuf::from("config/agents"));
                AgentRegistry::load_dir(&dir)
                    .with_context(|| format!("load agent descriptors from {}", dir.display()))?
            }
        };

        let providers = self.build_providers(&workspace).await;
        let options = RouterOptions::from_config(&self.config.tools).context("tool safety policy")?;
        let router = ToolRouter::discover(providers, options).await;
        tracing::info!(
            agents = registry.len(),
            tools = router.tools().len(),
            providers = ?router.provider_ids(),
            "runtime assembled"
        );

        let session_dir = self
            .config
            .session
            .dir
            .clone()
            .unwrap_or_else(|| workspace.join("sessions"));
        let limits = SessionLimits {
            max_total_calls: self.config.session.max_total_calls,
            max_refinement_iterations: self.config.session.max_refinement_iterations,
        };
        let sessions = SessionManager::open(&session_dir, limits)
            .await
            .with_context(|| format!("open session store {}", session_dir.display()))?;

        let engine = ExecutionEngine::new(
            Arc::new(registry),
            llm,
            Arc::new(ToolExecutor::new(Arc::new(router))),
            Arc::new(sessions),
            &self.config,
        )?;
        Ok(Arc::new(engine))
    }
}

/// 以默认组件从配置构建引擎
pub async fn build_runtime(config: AppConfig) -> anyhow::Result<Arc<ExecutionEngine>> {
    RuntimeBuilder::new(config).build().await
}
