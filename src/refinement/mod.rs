//! 迭代修正：评估合并、尝试计数、趋势判断与修正提示生成

pub mod assessment;
pub mod manager;

pub use assessment::{RefinementAssessment, RuleFailure};
pub use manager::{
    RefinementManager, RefinementOutcome, RefinementState, RefinementSummary, SuccessAssessment,
    Trend,
};
