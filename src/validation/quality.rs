//! 质量评分
//!
//! 对序列化后的 output_data 做三项纯计算：证据密度（路径/文件名）、可执行性（动作动词）、
//! 结构化程度；总分是三项的加权和。相同输入永远得到相同结果。

use std::collections::{BTreeSet, HashMap};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::agents::AgentSpecification;
use crate::config::QualitySection;
use crate::core::AgentError;

pub const EVIDENCE_WEIGHT: f64 = 0.40;
pub const ACTIONABILITY_WEIGHT: f64 = 0.30;
pub const STRUCTURE_WEIGHT: f64 = 0.30;
/// 单项低于此分数时写入失败原因
pub const CATEGORY_FLOOR: f64 = 0.6;

const EVIDENCE_PATTERN: &str = r"(?:[\w.-]+/)+[\w.-]+|\b[\w-]+\.(?:rs|go|py|ts|js|md|json|ya?ml|toml|txt|sh|html|css|sql|java|c|h|cpp)\b";

const ACTION_VERBS: &[&str] = &[
    "create", "modify", "execute", "implement", "configure", "update", "delete", "add", "remove",
    "refactor", "fix", "install", "deploy", "test", "run", "write", "build", "migrate", "validate",
    "review",
];

const STRUCTURE_KEYS: &[&str] = &["result", "metadata", "analysis", "recommendations"];

/// 三项权重
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityWeights {
    pub evidence: f64,
    pub actionability: f64,
    pub structure: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            evidence: EVIDENCE_WEIGHT,
            actionability: ACTIONABILITY_WEIGHT,
            structure: STRUCTURE_WEIGHT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityCategory {
    Evidence,
    Actionability,
    Structure,
}

impl QualityCategory {
    pub fn name(self) -> &'static str {
        match self {
            QualityCategory::Evidence => "evidence",
            QualityCategory::Actionability => "actionability",
            QualityCategory::Structure => "structure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryScore {
    pub category: QualityCategory,
    pub score: f64,
    /// 命中次数（结构化一项为命中的结构键数）
    pub count: usize,
    pub feedback: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub overall: f64,
    pub categories: Vec<CategoryScore>,
    pub passed: bool,
    pub threshold: f64,
    pub failure_reasons: Vec<String>,
}

impl QualityAssessment {
    pub fn category(&self, category: QualityCategory) -> Option<&CategoryScore> {
        self.categories.iter().find(|c| c.category == category)
    }

    pub fn failed_categories(&self) -> impl Iterator<Item = &CategoryScore> {
        self.categories.iter().filter(|c| c.score < CATEGORY_FLOOR)
    }
}

/// 0 → 0.0，1..=2 → 0.6，3..=4 → 0.8，≥5 → 1.0
pub fn bucket(count: usize) -> f64 {
    match count {
        0 => 0.0,
        1..=2 => 0.6,
        3..=4 => 0.8,
        _ => 1.0,
    }
}

pub struct QualityValidator {
    weights: QualityWeights,
    default_threshold: f64,
    agent_thresholds: HashMap<String, f64>,
    evidence: Regex,
}

impl QualityValidator {
    pub fn new(weights: QualityWeights, default_threshold: f64) -> Result<Self, AgentError> {
        let evidence = Regex::new(EVIDENCE_PATTERN)
            .map_err(|e| AgentError::ConfigError(format!("evidence pattern: {e}")))?;
        Ok(Self {
            weights,
            default_threshold,
            agent_thresholds: HashMap::new(),
            evidence,
        })
    }

    pub fn from_config(section: &QualitySection) -> Result<Self, AgentError> {
        let mut validator = Self::new(section.weights, section.pass_threshold)?;
        validator.agent_thresholds = section.agent_thresholds.clone();
        Ok(validator)
    }

    /// 配置中的 agent_thresholds 优先，其次描述文件中的 pass_threshold，最后全局阈值
    pub fn threshold_for(&self, spec: &AgentSpecification) -> f64 {
        self.agent_thresholds
            .get(&spec.agent_id)
            .copied()
            .or(spec.pass_threshold)
            .unwrap_or(self.default_threshold)
    }

    pub fn weights(&self) -> QualityWeights {
        self.weights
    }

    pub fn validate(&self, output: &Map<String, Value>, threshold: f64) -> QualityAssessment {
        let text = serde_json::to_string(output).unwrap_or_default();

        let evidence_count = self.evidence.find_iter(&text).count();
        let verbs = distinct_action_verbs(&text);
        let (structure_score, structure_keys) = structuredness(output);

        let categories = vec![
            CategoryScore {
                category: QualityCategory::Evidence,
                score: bucket(evidence_count),
                count: evidence_count,
                feedback: if evidence_count == 0 {
                    "cite concrete files or paths that support the findings".to_string()
                } else {
                    format!("{evidence_count} file/path references")
                },
            },
            CategoryScore {
                category: QualityCategory::Actionability,
                score: bucket(verbs.len()),
                count: verbs.len(),
                feedback: if verbs.is_empty() {
                    "state concrete actions (create, fix, test, ...)".to_string()
                } else {
                    format!("actions: {}", verbs.iter().copied().collect::<Vec<_>>().join(", "))
                },
            },
            CategoryScore {
                category: QualityCategory::Structure,
                score: structure_score,
                count: structure_keys,
                feedback: if structure_keys == 0 {
                    format!("organize output under keys such as {}", STRUCTURE_KEYS.join(", "))
                } else {
                    format!("{structure_keys} standard sections present")
                },
            },
        ];

        let overall = self.weights.evidence * categories[0].score
            + self.weights.actionability * categories[1].score
            + self.weights.structure * categories[2].score;
        let passed = overall >= threshold;

        let mut failure_reasons: Vec<String> = categories
            .iter()
            .filter(|c| c.score < CATEGORY_FLOOR)
            .map(|c| format!("{} {:.2}: {}", c.category.name(), c.score, c.feedback))
            .collect();
        if !passed {
            failure_reasons.push(format!("overall {overall:.2} below threshold {threshold:.2}"));
        }

        QualityAssessment {
            overall,
            categories,
            passed,
            threshold,
            failure_reasons,
        }
    }
}

/// 大小写无关；允许 -s / -es / -d / -ed / -ing 词尾，含去 e（creating）与双写辅音（running）
fn distinct_action_verbs(text: &str) -> BTreeSet<&'static str> {
    let mut found = BTreeSet::new();
    for word in text.split(|c: char| !c.is_ascii_alphabetic()) {
        if word.len() < 3 {
            continue;
        }
        let word = word.to_ascii_lowercase();
        for verb in ACTION_VERBS {
            if is_inflection_of(&word, verb) {
                found.insert(*verb);
            }
        }
    }
    found
}

fn is_inflection_of(word: &str, verb: &str) -> bool {
    if let Some(rest) = word.strip_prefix(verb) {
        if matches!(rest, "" | "s" | "es" | "d" | "ed" | "ing") {
            return true;
        }
        let mut chars = rest.chars();
        if let (Some(doubled), Some(last)) = (chars.next(), verb.chars().last()) {
            if doubled == last && !"aeiouwxy".contains(last) && matches!(chars.as_str(), "ed" | "ing") {
                return true;
            }
        }
    }
    match verb.strip_suffix('e') {
        Some(stem) => word.strip_prefix(stem) == Some("ing"),
        None => false,
    }
}

/// 非空 +0.3，含嵌套对象/数组 +0.2，每个标准键 +0.1，上限 1.0
fn structuredness(output: &Map<String, Value>) -> (f64, usize) {
    if output.is_empty() {
        return (0.0, 0);
    }
    let mut score = 0.3;
    if output.values().any(|v| v.is_object() || v.is_array()) {
        score += 0.2;
    }
    let keys = STRUCTURE_KEYS.iter().filter(|k| output.contains_key(**k)).count();
    score += 0.1 * keys as f64;
    (score.min(1.0), keys)
}
