//! # Worker Dispatcher Module
//!
//! Off-loads CPU-heavy analytics computations to a fixed pool of worker
//! threads that exchange only owned JSON messages with the caller.
//!
//! ## 模块结构
//!
//! - `protocol`: 请求/响应消息
//! - `worker`: 工作线程与任务处理器
//! - `pool`: 调度器 (队列、槽位状态、超时)

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{validate_non_zero, validate_ratio, ValidateConfig};
use crate::error::Result;

pub mod pool;
pub mod protocol;
pub mod worker;

pub use pool::{DispatcherStats, SlotState, WorkerDispatcher};
pub use protocol::{TaskId, WorkerRequest, WorkerResponse};
pub use worker::{AnalyticsTaskHandler, HandlerFactory, TaskHandler};

/// Dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Worker threads started at construction
    pub workers: usize,
    /// Items per `processBatch` task
    pub batch_size: usize,
    /// Caller-side wait limit per task (ms); none by default
    pub task_timeout_ms: Option<u64>,
    /// Monitoring interval (s)
    pub monitor_interval_secs: u64,
    /// Queue length above which a warning is logged
    pub queue_warn_threshold: usize,
    /// Busy/available ratio above which a warning is logged
    pub utilization_warn_ratio: f64,
    /// Data sets up to this size are processed inline
    pub inline_threshold: usize,
    /// Data sets above this size go through `batch_process`
    pub batch_threshold: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            batch_size: 100,
            task_timeout_ms: None,
            monitor_interval_secs: 30,
            queue_warn_threshold: 50,
            utilization_warn_ratio: 0.8,
            inline_threshold: 100,
            batch_threshold: 1000,
        }
    }
}

impl DispatcherConfig {
    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_ms.map(Duration::from_millis)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }
}

impl ValidateConfig for DispatcherConfig {
    fn validate(&self) -> Result<()> {
        // zero workers is allowed: dispatch then fails with DispatcherUnavailable
        validate_non_zero(self.batch_size as u64, "dispatcher.batch_size")?;
        validate_non_zero(self.monitor_interval_secs, "dispatcher.monitor_interval_secs")?;
        if let Some(ms) = self.task_timeout_ms {
            validate_non_zero(ms, "dispatcher.task_timeout_ms")?;
        }
        validate_ratio(self.utilization_warn_ratio, "dispatcher.utilization_warn_ratio")?;
        if self.inline_threshold > self.batch_threshold {
            return Err(crate::config::validation_error(
                "dispatcher.inline_threshold cannot exceed dispatcher.batch_threshold",
            ));
        }
        Ok(())
    }
}
