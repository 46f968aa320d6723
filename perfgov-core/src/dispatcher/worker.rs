//! # Worker Threads
//!
//! Each worker is an OS thread that owns one [`TaskHandler`] and processes
//! requests one at a time. A handler panic is caught and reported as a
//! failure; the thread keeps serving.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::protocol::{WorkerRequest, WorkerResponse};
use crate::error::Result;

/// CPU-heavy task executor living on a worker thread
pub trait TaskHandler: Send {
    /// Run task `kind` on `payload`; an `Err` becomes a `Failure` response
    fn handle(&mut self, kind: &str, payload: Value) -> std::result::Result<Value, String>;
}

/// Builds the handler for worker `index`; an error drops that slot
pub type HandlerFactory = Arc<dyn Fn(usize) -> Result<Box<dyn TaskHandler>> + Send + Sync>;

/// Built-in analytics tasks
#[derive(Debug, Default, Clone, Copy)]
pub struct AnalyticsTaskHandler;

impl AnalyticsTaskHandler {
    pub fn factory() -> HandlerFactory {
        Arc::new(|_| Ok(Box::new(AnalyticsTaskHandler) as Box<dyn TaskHandler>))
    }

    fn compute_stats(payload: &Value) -> Value {
        let processed = payload.as_array().map_or(0, Vec::len);
        json!({
            "processed": processed,
            "timestamp": Utc::now().timestamp_millis(),
        })
    }

    fn process_batch(payload: Value) -> Value {
        let items: Vec<Value> = match payload {
            Value::Array(items) => items.into_iter().map(mark_processed).collect(),
            _ => Vec::new(),
        };
        let count = items.len();
        json!({ "items": items, "count": count })
    }
}

/// `{...item, processed: true}`; non-object items are wrapped as `value`
pub(crate) fn mark_processed(item: Value) -> Value {
    let mut fields = match item {
        Value::Object(fields) => fields,
        other => {
            let mut fields = Map::new();
            fields.insert("value".to_string(), other);
            fields
        }
    };
    fields.insert("processed".to_string(), Value::Bool(true));
    Value::Object(fields)
}

impl TaskHandler for AnalyticsTaskHandler {
    fn handle(&mut self, kind: &str, payload: Value) -> std::result::Result<Value, String> {
        match kind {
            "computeStats" => Ok(Self::compute_stats(&payload)),
            "processBatch" => Ok(Self::process_batch(payload)),
            "echo" => Ok(payload),
            other => Err(format!("Unknown task: {}", other)),
        }
    }
}

/// Run one request through the handler, turning panics into failures
pub(crate) fn execute(handler: &mut dyn TaskHandler, request: WorkerRequest) -> WorkerResponse {
    let WorkerRequest { id, kind, payload } = request;

    match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&kind, payload))) {
        Ok(Ok(result)) => WorkerResponse::Success { id, result },
        Ok(Err(error)) => WorkerResponse::Failure { id, error },
        Err(panic) => {
            let error = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "worker panicked".to_string());
            warn!("Task {} ({}) panicked: {}", id, kind, error);
            WorkerResponse::Failure { id, error }
        }
    }
}

/// Worker thread main loop; ends when the request channel closes
pub(crate) fn run(
    index: usize,
    mut handler: Box<dyn TaskHandler>,
    mut requests: mpsc::UnboundedReceiver<WorkerRequest>,
    responses: mpsc::UnboundedSender<(usize, WorkerResponse)>,
) {
    debug!("Worker {} started", index);

    while let Some(request) = requests.blocking_recv() {
        let response = execute(handler.as_mut(), request);
        if responses.send((index, response)).is_err() {
            break;
        }
    }

    debug!("Worker {} shutting down", index);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PanickingHandler;

    impl TaskHandler for PanickingHandler {
        fn handle(&mut self, _kind: &str, _payload: Value) -> std::result::Result<Value, String> {
            panic!("grade table corrupted");
        }
    }

    #[test]
    fn test_compute_stats() {
        let mut handler = AnalyticsTaskHandler;
        let result = handler
            .handle("computeStats", json!([{"id": 1}, {"id": 2}, {"id": 3}]))
            .unwrap();
        assert_eq!(result["processed"], 3);
        assert!(result["timestamp"].is_i64());
    }

    #[test]
    fn test_process_batch() {
        let mut handler = AnalyticsTaskHandler;
        let result = handler
            .handle("processBatch", json!([{"id": 1}, 7]))
            .unwrap();
        assert_eq!(result["count"], 2);
        assert_eq!(result["items"][0], json!({"id": 1, "processed": true}));
        assert_eq!(result["items"][1], json!({"value": 7, "processed": true}));
    }

    #[test]
    fn test_unknown_task() {
        let mut handler = AnalyticsTaskHandler;
        let err = handler.handle("rankStudents", json!([])).unwrap_err();
        assert_eq!(err, "Unknown task: rankStudents");
    }

    #[test]
    fn test_execute_catches_panic() {
        let request = WorkerRequest::new("computeStats", json!([]));
        let id = request.id;
        let response = execute(&mut PanickingHandler, request);
        assert_eq!(
            response,
            WorkerResponse::Failure {
                id,
                error: "grade table corrupted".to_string()
            }
        );
    }

    #[test]
    fn test_worker_loop_answers_until_closed() {
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (resp_tx, mut resp_rx) = mpsc::unbounded_channel();

        let thread = std::thread::spawn(move || {
            run(3, Box::new(AnalyticsTaskHandler), req_rx, resp_tx)
        });

        let request = WorkerRequest::new("echo", json!({"term": 1}));
        let id = request.id;
        req_tx.send(request).unwrap();
        drop(req_tx);

        let (index, response) = resp_rx.blocking_recv().unwrap();
        assert_eq!(index, 3);
        assert_eq!(
            response,
            WorkerResponse::Success {
                id,
                result: json!({"term": 1})
            }
        );
        thread.join().unwrap();
    }
}
