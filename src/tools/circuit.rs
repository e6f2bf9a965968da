//! 熔断器：连续工具失败计数
//!
//! 中间没有成功的连续失败达到阈值即熔断，此后所有调用立即返回 CircuitBreakerTripped；
//! 任何一次成功都把计数清零。熔断状态只由 reset 解除。

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::config::DEFAULT_CIRCUIT_BREAKER_THRESHOLD;
use crate::core::AgentError;

#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    consecutive_failures: AtomicU32,
    tripped: AtomicBool,
}

impl CircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive_failures: AtomicU32::new(0),
            tripped: AtomicBool::new(false),
        }
    }

    /// 调用前检查；已熔断则直接失败
    pub fn check(&self) -> Result<(), AgentError> {
        if self.tripped.load(Ordering::SeqCst) {
            return Err(AgentError::CircuitBreakerTripped {
                failures: self.consecutive_failures.load(Ordering::SeqCst),
            });
        }
        Ok(())
    }

    pub fn record_success(&self) {
        if !self.tripped.load(Ordering::SeqCst) {
            self.consecutive_failures.store(0, Ordering::SeqCst);
        }
    }

    /// 记录一次失败；达到阈值时返回 CircuitBreakerTripped
    pub fn record_failure(&self) -> Result<(), AgentError> {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.threshold {
            self.tripped.store(true, Ordering::SeqCst);
            tracing::error!(failures, threshold = self.threshold, "tool circuit breaker tripped");
            return Err(AgentError::CircuitBreakerTripped { failures });
        }
        tracing::warn!(failures, threshold = self.threshold, "tool invocation failed");
        Ok(())
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// 清零并解除熔断；引擎在每次顶层执行开始时调用
    pub fn reset(&self) {
        if self.tripped.swap(false, Ordering::SeqCst) {
            tracing::info!("tool circuit breaker reset");
        }
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_CIRCUIT_BREAKER_THRESHOLD)
    }
}
