//! 输出校验：质量评分与诚实度评分，均为纯函数

pub mod honesty;
pub mod quality;

pub use honesty::{HonestyAssessment, HonestyValidator};
pub use quality::{
    bucket, CategoryScore, QualityAssessment, QualityCategory, QualityValidator, QualityWeights,
};
