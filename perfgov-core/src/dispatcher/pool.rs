//! # Worker Dispatcher
//!
//! 固定大小的工作线程池，用于卸载 CPU 密集型分析任务。
//!
//! ## 调度模型
//!
//! ```text
//! dispatch_task ──► queue ──► process_queue ──► worker thread (Busy)
//!                                   ▲                   │
//!                                   └── pump ◄── response (Idle)
//! ```
//!
//! - 任务先入队，`process_queue` 把队首任务分配给空闲槽位并标记为 Busy
//! - 响应由后台 pump 任务接收：槽位回到 Idle，按 id 唤醒等待者，再次调度队列
//! - 工作线程创建失败只会缩小线程池，不是致命错误
//! - 设置 `task_timeout` 时等待者会超时返回，但槽位直到工作线程真正应答前保持 Busy
//! - 超时或被取消的任务若仍在队列中则被移除，不再分派

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::protocol::{TaskId, WorkerRequest, WorkerResponse};
use super::worker::{self, HandlerFactory};
use super::DispatcherConfig;
use crate::error::{GovernorError, Result};

type Reply = oneshot::Sender<Result<Value>>;

/// 槽位状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SlotState {
    Idle,
    Busy,
}

/// 线程池中的一个工作线程
struct WorkerSlot {
    index: usize,
    state: SlotState,
    current: Option<TaskId>,
    sender: mpsc::UnboundedSender<WorkerRequest>,
}

struct QueuedTask {
    request: WorkerRequest,
    reply: Reply,
}

struct PendingTask {
    kind: String,
    reply: Reply,
}

#[derive(Default)]
struct DispatchState {
    slots: Vec<WorkerSlot>,
    queue: VecDeque<QueuedTask>,
    /// 已分派、等待响应的任务
    pending: HashMap<TaskId, PendingTask>,
    threads: Vec<JoinHandle<()>>,
    shut_down: bool,
}

impl DispatchState {
    /// 把队首任务分配给空闲槽位，直到没有空闲槽位或队列为空
    ///
    /// 等待者已离开 (超时或被取消) 的任务直接丢弃，不占用工作线程。
    fn process_queue(&mut self) {
        let before = self.queue.len();
        self.queue.retain(|task| !task.reply.is_closed());
        let abandoned = before - self.queue.len();
        if abandoned > 0 {
            debug!("Dropped {} abandoned queued tasks", abandoned);
        }

        while !self.queue.is_empty() {
            let Some(pos) = self.slots.iter().position(|s| s.state == SlotState::Idle) else {
                break;
            };
            let Some(task) = self.queue.pop_front() else {
                break;
            };

            let id = task.request.id;
            let kind = task.request.kind.clone();
            match self.slots[pos].sender.send(task.request) {
                Ok(()) => {
                    let slot = &mut self.slots[pos];
                    slot.state = SlotState::Busy;
                    slot.current = Some(id);
                    debug!("Dispatched task {} ({}) to worker {}", id, kind, slot.index);
                    self.pending.insert(
                        id,
                        PendingTask {
                            kind,
                            reply: task.reply,
                        },
                    );
                }
                Err(mpsc::error::SendError(request)) => {
                    // 工作线程已退出：移除槽位，任务放回队首
                    let slot = self.slots.remove(pos);
                    warn!(
                        "Worker {} is gone, pool reduced to {} workers",
                        slot.index,
                        self.slots.len()
                    );
                    self.queue.push_front(QueuedTask {
                        request,
                        reply: task.reply,
                    });
                    if self.slots.is_empty() {
                        self.reject_queued("no live workers");
                    }
                }
            }
        }
    }

    fn complete(&mut self, index: usize, response: WorkerResponse) {
        if let Some(slot) = self.slots.iter_mut().find(|s| s.index == index) {
            slot.state = SlotState::Idle;
            slot.current = None;
        }

        let id = response.id();
        match self.pending.remove(&id) {
            Some(task) => {
                let outcome = match response {
                    WorkerResponse::Success { result, .. } => Ok(result),
                    WorkerResponse::Failure { error, .. } => {
                        Err(GovernorError::task_failed(task.kind, error))
                    }
                };
                // 等待者可能已超时离开
                let _ = task.reply.send(outcome);
            }
            None => debug!("Response for unknown task {}", id),
        }
    }

    fn reject_queued(&mut self, reason: &str) {
        for task in self.queue.drain(..) {
            let _ = task
                .reply
                .send(Err(GovernorError::dispatcher_unavailable(reason)));
        }
    }
}

/// 线程池统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    /// 配置的工作线程数
    pub total: usize,
    /// 存活的工作线程数
    pub available: usize,
    pub busy: usize,
    pub queued: usize,
}

impl DispatcherStats {
    /// 忙碌槽位占存活槽位的比例
    pub fn utilization(&self) -> f64 {
        if self.available == 0 {
            0.0
        } else {
            self.busy as f64 / self.available as f64
        }
    }
}

/// 工作线程调度器
///
/// 必须在 tokio runtime 中创建 (响应 pump 是一个 tokio 任务)。
pub struct WorkerDispatcher {
    config: DispatcherConfig,
    state: Arc<Mutex<DispatchState>>,
    pump: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl std::fmt::Debug for WorkerDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerDispatcher")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl WorkerDispatcher {
    /// 创建调度器并启动 `config.workers` 个工作线程
    pub fn new(config: DispatcherConfig, factory: HandlerFactory) -> Self {
        let (response_tx, mut response_rx) = mpsc::unbounded_channel();
        let mut state = DispatchState::default();

        for index in 0..config.workers {
            let handler = match factory(index) {
                Ok(handler) => handler,
                Err(e) => {
                    warn!("Failed to create worker {}: {}", index, e);
                    continue;
                }
            };

            let (request_tx, request_rx) = mpsc::unbounded_channel();
            let responses = response_tx.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("perfgov-worker-{}", index))
                .spawn(move || worker::run(index, handler, request_rx, responses));

            match spawned {
                Ok(thread) => {
                    state.slots.push(WorkerSlot {
                        index,
                        state: SlotState::Idle,
                        current: None,
                        sender: request_tx,
                    });
                    state.threads.push(thread);
                }
                Err(e) => warn!("Failed to spawn worker {}: {}", index, e),
            }
        }
        // pump 在所有工作线程退出后结束
        drop(response_tx);

        info!(
            "Worker dispatcher started with {}/{} workers",
            state.slots.len(),
            config.workers
        );

        let state = Arc::new(Mutex::new(state));
        let pump_state = Arc::clone(&state);
        let pump = tokio::spawn(async move {
            while let Some((index, response)) = response_rx.recv().await {
                let mut state = pump_state.lock();
                state.complete(index, response);
                state.process_queue();
            }
            debug!("Worker response pump stopped");
        });

        Self {
            config,
            state,
            pump: Mutex::new(Some(pump)),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// 分派任务并等待结果
    ///
    /// - 工作线程报告失败时返回 `TaskExecutionFailed`
    /// - 没有存活的工作线程时返回 `DispatcherUnavailable`
    /// - 配置了超时且超时时返回 `TaskTimedOut`
    pub async fn dispatch_task(&self, kind: &str, payload: Value) -> Result<Value> {
        let (reply, response) = oneshot::channel();
        let request = WorkerRequest::new(kind, payload);
        let id = request.id;
        {
            let mut state = self.state.lock();
            if state.shut_down {
                return Err(GovernorError::dispatcher_unavailable(
                    "dispatcher is shut down",
                ));
            }
            if state.slots.is_empty() {
                return Err(GovernorError::dispatcher_unavailable("no live workers"));
            }

            state.queue.push_back(QueuedTask { request, reply });
            let queued = state.queue.len();
            if queued > self.config.queue_warn_threshold {
                warn!("Task queue length is high: {}", queued);
            }
            state.process_queue();
        }

        let outcome = match self.config.task_timeout() {
            Some(timeout) => match tokio::time::timeout(timeout, response).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!("Task {} timed out after {:?}", kind, timeout);
                    self.state.lock().queue.retain(|t| t.request.id != id);
                    return Err(GovernorError::TaskTimedOut {
                        kind: kind.to_string(),
                        timeout,
                    });
                }
            },
            None => response.await,
        };

        outcome.unwrap_or_else(|_| {
            Err(GovernorError::dispatcher_unavailable(
                "worker dropped the task",
            ))
        })
    }

    /// 分派队列中的任务到空闲槽位
    ///
    /// 入队和每次任务完成后都会自动调用。
    pub fn process_queue(&self) {
        self.state.lock().process_queue();
    }

    /// 分批执行 `processBatch`，按顺序拼接各批次的 `items`
    pub async fn batch_process(&self, items: Vec<Value>, batch_size: usize) -> Result<Vec<Value>> {
        let batch_size = batch_size.max(1);
        let mut results = Vec::with_capacity(items.len());

        for chunk in items.chunks(batch_size) {
            let batch = self
                .dispatch_task("processBatch", Value::Array(chunk.to_vec()))
                .await?;
            match batch {
                Value::Object(mut fields) => match fields.remove("items") {
                    Some(Value::Array(processed)) => results.extend(processed),
                    _ => {
                        return Err(GovernorError::task_failed(
                            "processBatch",
                            "result has no items array",
                        ))
                    }
                },
                _ => {
                    return Err(GovernorError::task_failed(
                        "processBatch",
                        "result is not an object",
                    ))
                }
            }
        }

        Ok(results)
    }

    /// 获取线程池统计
    pub fn stats(&self) -> DispatcherStats {
        let state = self.state.lock();
        DispatcherStats {
            total: self.config.workers,
            available: state.slots.len(),
            busy: state
                .slots
                .iter()
                .filter(|s| s.state == SlotState::Busy)
                .count(),
            queued: state.queue.len(),
        }
    }

    /// 定期监控：队列过长或利用率过高时告警
    pub fn monitor(&self) -> DispatcherStats {
        let stats = self.stats();
        if stats.queued > self.config.queue_warn_threshold {
            warn!("High task queue length: {}", stats.queued);
        }
        let utilization = stats.utilization();
        if utilization > self.config.utilization_warn_ratio {
            warn!("High worker utilization: {:.1}%", utilization * 100.0);
        }
        stats
    }

    /// 各槽位状态 (按工作线程编号)
    pub fn slot_states(&self) -> Vec<(usize, SlotState)> {
        self.state
            .lock()
            .slots
            .iter()
            .map(|s| (s.index, s.state))
            .collect()
    }

    /// 关闭线程池
    ///
    /// 拒绝排队中和进行中的任务，关闭工作线程通道并等待线程退出。
    pub async fn shutdown(&self) {
        let threads = {
            let mut state = self.state.lock();
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            state.reject_queued("dispatcher is shut down");
            for (_, task) in state.pending.drain() {
                let _ = task
                    .reply
                    .send(Err(GovernorError::dispatcher_unavailable(
                        "dispatcher is shut down",
                    )));
            }
            // 丢弃发送端，工作线程在当前任务结束后退出
            state.slots.clear();
            std::mem::take(&mut state.threads)
        };

        let joined = tokio::task::spawn_blocking(move || {
            for thread in threads {
                if thread.join().is_err() {
                    warn!("Worker thread panicked during shutdown");
                }
            }
        })
        .await;
        if let Err(e) = joined {
            warn!("Failed to join worker threads: {}", e);
        }

        let pump = self.pump.lock().take();
        if let Some(pump) = pump {
            let _ = pump.await;
        }

        info!("Worker dispatcher shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::worker::{AnalyticsTaskHandler, TaskHandler};
    use serde_json::json;

    fn dispatcher(workers: usize) -> WorkerDispatcher {
        let config = DispatcherConfig {
            workers,
            ..Default::default()
        };
        WorkerDispatcher::new(config, AnalyticsTaskHandler::factory())
    }

    /// `sleep` kind blocks the worker for `payload` milliseconds
    struct SlowHandler;

    impl TaskHandler for SlowHandler {
        fn handle(&mut self, kind: &str, payload: Value) -> std::result::Result<Value, String> {
            if kind == "sleep" {
                let ms = payload.as_u64().unwrap_or(0);
                std::thread::sleep(Duration::from_millis(ms));
            }
            Ok(payload)
        }
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let dispatcher = dispatcher(2);
        let result = dispatcher
            .dispatch_task("computeStats", json!([1, 2, 3]))
            .await
            .unwrap();
        assert_eq!(result["processed"], 3);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_failure_keeps_pool_usable() {
        let dispatcher = dispatcher(1);

        let err = dispatcher
            .dispatch_task("rankStudents", json!([]))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GovernorError::task_failed("rankStudents", "Unknown task: rankStudents")
        );

        let echoed = dispatcher.dispatch_task("echo", json!("ok")).await.unwrap();
        assert_eq!(echoed, json!("ok"));
        assert_eq!(dispatcher.stats().busy, 0);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_queue_drains_with_single_worker() {
        let dispatcher = dispatcher(1);
        let tasks = (0..5).map(|i| dispatcher.dispatch_task("echo", json!(i)));
        let results = futures::future::join_all(tasks).await;

        let values: Vec<Value> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, (0..5).map(|i| json!(i)).collect::<Vec<_>>());

        let stats = dispatcher.stats();
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.busy, 0);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_factory_failure_reduces_pool() {
        let factory: HandlerFactory = Arc::new(|index| {
            if index == 1 {
                Err(GovernorError::other("sandbox unavailable"))
            } else {
                Ok(Box::new(AnalyticsTaskHandler) as Box<dyn TaskHandler>)
            }
        });
        let config = DispatcherConfig {
            workers: 3,
            ..Default::default()
        };
        let dispatcher = WorkerDispatcher::new(config, factory);

        let stats = dispatcher.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.available, 2);
        assert_eq!(
            dispatcher.slot_states(),
            vec![(0, SlotState::Idle), (2, SlotState::Idle)]
        );
        assert!(dispatcher.dispatch_task("echo", json!(1)).await.is_ok());
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_zero_workers_unavailable() {
        let dispatcher = dispatcher(0);
        let err = dispatcher.dispatch_task("echo", json!(1)).await.unwrap_err();
        assert!(matches!(err, GovernorError::DispatcherUnavailable(_)));
        assert_eq!(err.http_status(), 503);
    }

    #[tokio::test]
    async fn test_batch_process() {
        let dispatcher = dispatcher(2);
        let items: Vec<Value> = (0..7).map(|i| json!({ "id": i })).collect();

        let processed = dispatcher.batch_process(items, 3).await.unwrap();
        assert_eq!(processed.len(), 7);
        assert_eq!(processed[6], json!({"id": 6, "processed": true}));
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_timeout_keeps_slot_busy_until_answer() {
        let config = DispatcherConfig {
            workers: 1,
            task_timeout_ms: Some(50),
            ..Default::default()
        };
        let factory: HandlerFactory =
            Arc::new(|_| Ok(Box::new(SlowHandler) as Box<dyn TaskHandler>));
        let dispatcher = WorkerDispatcher::new(config, factory);

        let err = dispatcher.dispatch_task("sleep", json!(300)).await.unwrap_err();
        assert!(matches!(err, GovernorError::TaskTimedOut { .. }));
        assert_eq!(dispatcher.stats().busy, 1);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(dispatcher.stats().busy, 0);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_timed_out_queued_tasks_never_run() {
        let config = DispatcherConfig {
            workers: 1,
            task_timeout_ms: Some(50),
            ..Default::default()
        };
        let factory: HandlerFactory =
            Arc::new(|_| Ok(Box::new(SlowHandler) as Box<dyn TaskHandler>));
        let dispatcher = WorkerDispatcher::new(config, factory);

        let burst = (0..5).map(|_| dispatcher.dispatch_task("sleep", json!(200)));
        let results = futures::future::join_all(burst).await;
        assert!(results
            .iter()
            .all(|r| matches!(r, Err(GovernorError::TaskTimedOut { .. }))));
        assert_eq!(dispatcher.stats().queued, 0);

        // only the first task reached the worker
        tokio::time::sleep(Duration::from_millis(300)).await;
        let echoed = dispatcher.dispatch_task("echo", json!(1)).await.unwrap();
        assert_eq!(echoed, json!(1));
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancelled_waiter_task_is_skipped() {
        let factory: HandlerFactory =
            Arc::new(|_| Ok(Box::new(SlowHandler) as Box<dyn TaskHandler>));
        let config = DispatcherConfig {
            workers: 1,
            ..Default::default()
        };
        let dispatcher = WorkerDispatcher::new(config, factory);

        let blocker = dispatcher.dispatch_task("sleep", json!(100));
        let abandoned = dispatcher.dispatch_task("sleep", json!(5000));
        let (first, second) = tokio::join!(blocker, async {
            tokio::time::timeout(Duration::from_millis(20), abandoned).await
        });
        assert_eq!(first.unwrap(), json!(100));
        assert!(second.is_err());

        let started = std::time::Instant::now();
        assert_eq!(dispatcher.dispatch_task("echo", json!(2)).await.unwrap(), json!(2));
        assert!(started.elapsed() < Duration::from_secs(2));
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_rejects_queued_and_in_flight() {
        let factory: HandlerFactory =
            Arc::new(|_| Ok(Box::new(SlowHandler) as Box<dyn TaskHandler>));
        let config = DispatcherConfig {
            workers: 1,
            ..Default::default()
        };
        let dispatcher = Arc::new(WorkerDispatcher::new(config, factory));

        let in_flight = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.dispatch_task("sleep", json!(200)).await })
        };
        let queued = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.dispatch_task("echo", json!(1)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(dispatcher.stats().busy, 1);
        assert_eq!(dispatcher.stats().queued, 1);

        dispatcher.shutdown().await;
        for handle in [in_flight, queued] {
            let err = handle.await.unwrap().unwrap_err();
            assert!(matches!(err, GovernorError::DispatcherUnavailable(_)));
        }
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_tasks() {
        let dispatcher = dispatcher(2);
        dispatcher.shutdown().await;

        let err = dispatcher.dispatch_task("echo", json!(1)).await.unwrap_err();
        assert!(matches!(err, GovernorError::DispatcherUnavailable(_)));
        assert_eq!(dispatcher.stats().available, 0);
    }
}
