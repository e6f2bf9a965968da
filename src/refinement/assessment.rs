//! 修正评估：把质量评分与诚实度评分合并成一个可修正性判断

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::validation::honesty::COMPLIANCE_FLOOR;
use crate::validation::{HonestyAssessment, QualityAssessment, QualityCategory};

/// 一条未通过的规则及修正建议
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleFailure {
    pub rule: String,
    pub feedback: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementAssessment {
    pub score: f64,
    pub threshold: f64,
    pub passed: bool,
    pub failures: Vec<RuleFailure>,
    pub suggestions: Vec<String>,
    /// 修正无法解决的问题（例如完全没有输出）
    pub critical_issues: Vec<String>,
    pub refinement_likely_helpful: bool,
}

impl RefinementAssessment {
    pub fn from_assessments(
        quality: &QualityAssessment,
        honesty: &HonestyAssessment,
        output: &Map<String, Value>,
        min_refinable_score: f64,
    ) -> Self {
        let mut failures: Vec<RuleFailure> = quality
            .failed_categories()
            .map(|c| RuleFailure {
                rule: format!("quality.{}", c.category.name()),
                feedback: c.feedback.clone(),
            })
            .collect();
        if !quality.passed {
            failures.push(RuleFailure {
                rule: "quality.overall".to_string(),
                feedback: format!(
                    "overall {:.2} is below the pass threshold {:.2}",
                    quality.overall, quality.threshold
                ),
            });
        }
        if !honesty.compliant {
            failures.extend(honesty.failure_reasons().into_iter().map(|feedback| RuleFailure {
                rule: "honesty".to_string(),
                feedback,
            }));
        }

        let mut suggestions = Vec::new();
        for c in quality.failed_categories() {
            suggestions.push(match c.category {
                QualityCategory::Evidence => "Reference the exact files and paths you inspected or changed.",
                QualityCategory::Actionability => {
                    "List concrete next actions using verbs such as create, fix, test, review."
                }
                QualityCategory::Structure => {
                    "Return a JSON object with result, analysis, recommendations and metadata keys."
                }
            }
            .to_string());
        }
        if !honesty.violations.is_empty() {
            suggestions.push("Replace unsupported confidence claims with evidence or explicit uncertainty.".to_string());
        }
        if honesty.limitation_score < COMPLIANCE_FLOOR {
            suggestions.push("State what you could not verify and what is out of scope.".to_string());
        }
        if honesty.evidence_score < COMPLIANCE_FLOOR {
            suggestions.push("Cite where each finding comes from (file, line, command output).".to_string());
        }

        let mut critical_issues = Vec::new();
        let empty = output.is_empty()
            || output
                .values()
                .all(|v| v.is_null() || v.as_str().is_some_and(|s| s.trim().is_empty()));
        if empty {
            critical_issues.push("empty output".to_string());
        }

        Self {
            score: quality.overall,
            threshold: quality.threshold,
            passed: quality.passed && honesty.compliant,
            failures,
            suggestions,
            critical_issues,
            refinement_likely_helpful: quality.overall >= min_refinable_score,
        }
    }

    /// 单行原因，记录到修正历史
    pub fn summary(&self) -> String {
        self.failures
            .iter()
            .map(|f| f.rule.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}
