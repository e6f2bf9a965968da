//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__QUALITY__POLICY=strict`）。

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::validation::QualityWeights;

/// 质量评分通过阈值默认值
pub const DEFAULT_PASS_THRESHOLD: f64 = 0.70;
/// 连续工具失败多少次后熔断
pub const DEFAULT_CIRCUIT_BREAKER_THRESHOLD: u32 = 5;
/// 单次工具调用默认超时（秒）
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub quality: QualitySection,
    pub refinement: RefinementSection,
    pub session: SessionSection,
    pub tools: ToolsSection,
}

/// [app] 段：工作目录、并发、上下文上限、日志级别
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    /// 工作根目录，未设置时用 ./workspace
    pub workspace_root: Option<PathBuf>,
    /// Agent 描述文件目录（*.json / *.toml），未设置时用 config/agents
    pub agents_dir: Option<PathBuf>,
    /// 协调器同时运行的子 Agent 数
    pub max_parallel_agents: usize,
    /// 发送给后端的上下文字符数上限
    pub max_context_size: usize,
    pub log_level: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            workspace_root: None,
            agents_dir: None,
            max_parallel_agents: 4,
            max_context_size: 64_000,
            log_level: "info".to_string(),
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    /// 单次后端往返超时（秒）
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 60 }
    }
}

/// 质量门未通过时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QualityPolicy {
    /// 任何失败直接报错
    Strict,
    /// 失败进入修正流程，追加修正提示后重新执行
    #[default]
    Gated,
}

/// [quality] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QualitySection {
    pub pass_threshold: f64,
    pub policy: QualityPolicy,
    /// 按 Agent 覆盖通过阈值（agent_id -> threshold）
    pub agent_thresholds: HashMap<String, f64>,
    /// [quality.weights] 证据 / 可执行性 / 结构化 三项权重
    pub weights: QualityWeights,
}

impl Default for QualitySection {
    fn default() -> Self {
        Self {
            pass_threshold: DEFAULT_PASS_THRESHOLD,
            policy: QualityPolicy::default(),
            agent_thresholds: HashMap::new(),
            weights: QualityWeights::default(),
        }
    }
}

/// [refinement] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RefinementSection {
    pub max_attempts: u32,
    /// 低于此分数时认为修正无望，直接终止
    pub min_refinable_score: f64,
}

impl Default for RefinementSection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_refinable_score: 0.2,
        }
    }
}

/// [session] 段：持久化目录与会话上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// 会话存储目录，未设置时用 <workspace>/sessions
    pub dir: Option<PathBuf>,
    pub max_total_calls: u32,
    pub max_refinement_iterations: u32,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            dir: None,
            max_total_calls: 50,
            max_refinement_iterations: 3,
        }
    }
}

/// [tools] 段：超时、熔断、工具提供者进程、安全规则、兜底路由
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub tool_timeout_secs: u64,
    pub circuit_breaker_threshold: u32,
    pub providers: Vec<ProviderEntry>,
    pub safety: SafetySection,
    pub fallback: Vec<FallbackEntry>,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: DEFAULT_TOOL_TIMEOUT_SECS,
            circuit_breaker_threshold: DEFAULT_CIRCUIT_BREAKER_THRESHOLD,
            providers: Vec::new(),
            safety: SafetySection::default(),
            fallback: default_fallback_rules(),
        }
    }
}

/// [[tools.providers]]：一个工具提供者子进程
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEntry {
    pub id: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// [tools.safety]：按工具名匹配的允许/拒绝正则
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SafetySection {
    pub allow: Vec<String>,
    pub deny: Vec<String>,
}

impl Default for SafetySection {
    fn default() -> Self {
        Self {
            allow: Vec::new(),
            deny: vec![
                r"(?i)(^|_)(rm|rmdir|delete|remove|drop|truncate|kill|format|shutdown|reboot)(_|$)".into(),
                r"(?i)sudo".into(),
                r"(?i)(^|_)(chmod|chown)(_|$)".into(),
            ],
        }
    }
}

/// [[tools.fallback]]：未发现的工具名按前缀猜测候选提供者
#[derive(Debug, Clone, Deserialize)]
pub struct FallbackEntry {
    pub prefix: String,
    pub providers: Vec<String>,
}

fn default_fallback_rules() -> Vec<FallbackEntry> {
    let rule = |prefix: &str, provider: &str| FallbackEntry {
        prefix: prefix.to_string(),
        providers: vec![provider.to_string()],
    };
    vec![
        rule("read_", "filesystem"),
        rule("write_", "filesystem"),
        rule("list_", "filesystem"),
        rule("search_", "filesystem"),
        rule("execute_", "shell"),
        rule("run_", "shell"),
        rule("fetch", "web"),
        rule("http_", "web"),
    ]
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
