//! 修正管理器
//!
//! 按 (session, agent) 记录修正尝试次数与分数历史；状态机
//! `active → retrying* → passed | exhausted | declining`，进入终态后状态被丢弃。

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::RefinementSection;
use crate::refinement::RefinementAssessment;
use crate::validation::quality::{ACTIONABILITY_WEIGHT, EVIDENCE_WEIGHT, STRUCTURE_WEIGHT};

/// 分数变化小于此值视为持平
const TREND_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Declining,
    #[default]
    Stable,
}

impl Trend {
    pub fn between(prior: f64, new: f64) -> Self {
        let delta = new - prior;
        if delta > TREND_EPSILON {
            Trend::Improving
        } else if delta < -TREND_EPSILON {
            Trend::Declining
        } else {
            Trend::Stable
        }
    }
}

/// 修正流程的终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefinementOutcome {
    Passed,
    Exhausted,
    Declining,
    /// 存在关键问题或分数过低，不值得修正
    Unrefinable,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefinementState {
    pub attempt: u32,
    pub history: Vec<f64>,
    pub trend: Trend,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SuccessAssessment {
    pub improvement: f64,
    pub trend: Trend,
    pub should_continue: bool,
}

/// 返回给调用方的修正摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementSummary {
    pub outcome: RefinementOutcome,
    pub attempts: u32,
    pub history: Vec<f64>,
    pub trend: Trend,
}

type StateKey = (String, String);

pub struct RefinementManager {
    max_attempts: u32,
    min_refinable_score: f64,
    states: Mutex<HashMap<StateKey, RefinementState>>,
}

impl RefinementManager {
    pub fn new(max_attempts: u32, min_refinable_score: f64) -> Self {
        Self {
            max_attempts,
            min_refinable_score,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(section: &RefinementSection) -> Self {
        Self::new(section.max_attempts, section.min_refinable_score)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn min_refinable_score(&self) -> f64 {
        self.min_refinable_score
    }

    fn key(session_id: &str, agent_id: &str) -> StateKey {
        (session_id.to_string(), agent_id.to_string())
    }

    /// 当前状态快照
    pub fn state(&self, session_id: &str, agent_id: &str) -> Option<RefinementState> {
        self.states
            .lock()
            .ok()
            .and_then(|states| states.get(&Self::key(session_id, agent_id)).cloned())
    }

    fn attempts(&self, session_id: &str, agent_id: &str) -> u32 {
        self.state(session_id, agent_id).map(|s| s.attempt).unwrap_or(0)
    }

    /// 已通过、存在关键问题、次数用尽或分数过低时不再修正
    pub fn needs_refinement(&self, session_id: &str, agent_id: &str, assessment: &RefinementAssessment) -> bool {
        if assessment.passed || !assessment.critical_issues.is_empty() {
            return false;
        }
        if !assessment.refinement_likely_helpful {
            return false;
        }
        self.attempts(session_id, agent_id) < self.max_attempts
    }

    /// 生成修正提示，原样作为下一条 user 轮次追加
    pub fn generate_prompt(
        &self,
        assessment: &RefinementAssessment,
        context: &Map<String, Value>,
        original_task: &str,
        prior_response: &str,
    ) -> String {
        let mut prompt = String::new();
        let _ = writeln!(
            prompt,
            "Your previous response scored {:.2}; the pass threshold is {:.2}. Revise it.",
            assessment.score, assessment.threshold
        );
        if !assessment.failures.is_empty() {
            prompt.push_str("\nFailed checks:\n");
            for f in &assessment.failures {
                let _ = writeln!(prompt, "- [{}] {}", f.rule, f.feedback);
            }
        }
        if !assessment.suggestions.is_empty() {
            prompt.push_str("\nHow to improve:\n");
            for s in &assessment.suggestions {
                let _ = writeln!(prompt, "- {s}");
            }
        }
        let _ = writeln!(prompt, "\nOriginal task:\n{original_task}");
        if !context.is_empty() {
            let _ = writeln!(
                prompt,
                "\nContext:\n{}",
                serde_json::to_string(context).unwrap_or_default()
            );
        }
        let _ = writeln!(prompt, "\nPrevious response:\n{prior_response}");
        let _ = write!(
            prompt,
            "\nQuality criteria: evidence (files/paths, weight {EVIDENCE_WEIGHT:.2}), \
             actionability (concrete action verbs, weight {ACTIONABILITY_WEIGHT:.2}), \
             structure (result / analysis / recommendations / metadata, weight {STRUCTURE_WEIGHT:.2}); \
             disclose limitations and cite evidence; avoid unsupported certainty."
        );
        prompt
    }

    /// 记录一次修正尝试，返回更新后的状态
    pub fn track_attempt(&self, session_id: &str, agent_id: &str, score: f64, reason: impl Into<String>) -> RefinementState {
        let Ok(mut states) = self.states.lock() else {
            return RefinementState::default();
        };
        let state = states.entry(Self::key(session_id, agent_id)).or_default();
        if let Some(&last) = state.history.last() {
            state.trend = Trend::between(last, score);
        }
        state.history.push(score);
        state.attempt += 1;
        state.reason = Some(reason.into());
        tracing::info!(
            session_id,
            agent_id,
            attempt = state.attempt,
            score,
            trend = ?state.trend,
            "refinement attempt"
        );
        state.clone()
    }

    /// 比较修正前后的评估
    pub fn assess_success(
        &self,
        session_id: &str,
        agent_id: &str,
        prior: &RefinementAssessment,
        new: &RefinementAssessment,
    ) -> SuccessAssessment {
        let trend = Trend::between(prior.score, new.score);
        let should_continue = !new.passed
            && trend != Trend::Declining
            && self.attempts(session_id, agent_id) < self.max_attempts;
        SuccessAssessment {
            improvement: new.score - prior.score,
            trend,
            should_continue,
        }
    }

    /// 进入终态：丢弃状态并返回摘要
    pub fn finish(&self, session_id: &str, agent_id: &str, outcome: RefinementOutcome) -> RefinementSummary {
        let state = self
            .states
            .lock()
            .ok()
            .and_then(|mut states| states.remove(&Self::key(session_id, agent_id)))
            .unwrap_or_default();
        tracing::info!(session_id, agent_id, ?outcome, attempts = state.attempt, "refinement finished");
        RefinementSummary {
            outcome,
            attempts: state.attempt,
            history: state.history,
            trend: state.trend,
        }
    }

    /// 执行出错时丢弃状态（不产生摘要）
    pub fn discard(&self, session_id: &str, agent_id: &str) {
        if let Ok(mut states) = self.states.lock() {
            states.remove(&Self::key(session_id, agent_id));
        }
    }

    pub fn active_count(&self) -> usize {
        self.states.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refinement::RuleFailure;
    use serde_json::json;

    fn assessment(score: f64, passed: bool) -> RefinementAssessment {
        RefinementAssessment {
            score,
            threshold: 0.7,
            passed,
            failures: vec![RuleFailure {
                rule: "quality.evidence".into(),
                feedback: "cite files".into(),
            }],
            suggestions: vec!["Reference the exact files".into()],
            critical_issues: vec![],
            refinement_likely_helpful: score >= 0.2,
        }
    }

    #[test]
    fn test_increasing_scores_improving() {
        let m = RefinementManager::new(5, 0.2);
        m.track_attempt("s", "a", 0.3, "low");
        m.track_attempt("s", "a", 0.5, "low");
        let state = m.track_attempt("s", "a", 0.6, "low");
        assert_eq!(state.trend, Trend::Improving);
        assert_eq!(state.history, vec![0.3, 0.5, 0.6]);
        let s = m.assess_success("s", "a", &assessment(0.5, false), &assessment(0.6, false));
        assert!(s.should_continue);
        assert!((s.improvement - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_declining_stops() {
        let m = RefinementManager::new(5, 0.2);
        m.track_attempt("s", "a", 0.6, "low");
        let state = m.track_attempt("s", "a", 0.4, "low");
        assert_eq!(state.trend, Trend::Declining);
        let s = m.assess_success("s", "a", &assessment(0.6, false), &assessment(0.4, false));
        assert_eq!(s.trend, Trend::Declining);
        assert!(!s.should_continue);
    }

    #[test]
    fn test_attempts_never_exceed_max() {
        let m = RefinementManager::new(2, 0.2);
        let a = assessment(0.5, false);
        let mut attempts = 0;
        while m.needs_refinement("s", "a", &a) {
            m.track_attempt("s", "a", 0.5, "still low");
            attempts += 1;
            assert!(attempts <= 10);
        }
        assert_eq!(attempts, 2);
        let summary = m.finish("s", "a", RefinementOutcome::Exhausted);
        assert_eq!(summary.attempts, 2);
        assert_eq!(m.active_count(), 0);
    }

    #[test]
    fn test_needs_refinement_guards() {
        let m = RefinementManager::new(3, 0.2);
        assert!(!m.needs_refinement("s", "a", &assessment(0.9, true)));
        assert!(!m.needs_refinement("s", "a", &assessment(0.1, false)));
        let mut critical = assessment(0.5, false);
        critical.critical_issues.push("empty output".into());
        assert!(!m.needs_refinement("s", "a", &critical));
        assert!(m.needs_refinement("s", "a", &assessment(0.5, false)));
    }

    #[test]
    fn test_state_is_per_session_and_agent() {
        let m = RefinementManager::new(3, 0.2);
        m.track_attempt("s1", "a", 0.5, "x");
        assert!(m.state("s2", "a").is_none());
        assert!(m.state("s1", "b").is_none());
        assert_eq!(m.state("s1", "a").unwrap().attempt, 1);
    }

    #[test]
    fn test_prompt_contents() {
        let m = RefinementManager::new(3, 0.2);
        let prompt = m.generate_prompt(
            &assessment(0.42, false),
            json!({"mode": "review"}).as_object().unwrap(),
            "Review the auth module",
            "Looks good.",
        );
        assert!(prompt.contains("0.42"));
        assert!(prompt.contains("0.70"));
        assert!(prompt.contains("[quality.evidence] cite files"));
        assert!(prompt.contains("Reference the exact files"));
        assert!(prompt.contains("Review the auth module"));
        assert!(prompt.contains("Looks good."));
        assert!(prompt.contains("Quality criteria"));
    }
}
