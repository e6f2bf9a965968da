//! 任务调度：子 Agent 并发池
//!
//! 协调器为每个子 Agent 启动独立任务，任务开始前必须从固定大小的 Semaphore 获取槽位，
//! 完成后随 permit 释放；其余逻辑（单 Agent 执行、校验、修正记账）都在调用方任务上同步运行。

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::core::AgentError;

/// 子 Agent 调度器
#[derive(Clone, Debug)]
pub struct TaskScheduler {
    agent_semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl TaskScheduler {
    pub fn new(max_parallel_agents: usize) -> Self {
        let capacity = max_parallel_agents.max(1);
        Self {
            agent_semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// 获取子 Agent 执行槽位；阻塞直到有空闲槽位
    pub async fn acquire_agent_slot(&self) -> Result<OwnedSemaphorePermit, AgentError> {
        self.agent_semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AgentError::ConfigError("agent pool closed".to_string()))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 当前空闲槽位数
    pub fn available(&self) -> usize {
        self.agent_semaphore.available_permits()
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(4)
    }
}
