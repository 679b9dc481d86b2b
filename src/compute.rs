//! Bounded worker pool for planning requests.
//!
//! Requests are keyed (one per user, screen, etc.). Submitting under a key
//! that already has a request in flight supersedes the older one: its token
//! is stopped and its handle resolves as [`ComputeStatus::Superseded`]
//! without a result. A handle that outlives its deadline stops the job and
//! resolves with the caller's fallback instead of an error.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ComputeConfig;
use crate::context::{CancelReason, CancelToken, RunContext};
use crate::error::{PlannerError, Result};

/// Message a worker sends back to the waiting handle.
///
/// Serialized as `{"type":"progress","value":0.4}`,
/// `{"type":"result","data":..}` or `{"type":"error","message":".."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ComputeEvent<T> {
    Progress { value: f64 },
    Result { data: T },
    Error { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputeStatus {
    Completed,
    TimedOut,
    Failed,
    Cancelled,
    Superseded,
}

/// How a request ended. `TimedOut` and `Failed` carry the fallback result;
/// `Cancelled` and `Superseded` never carry one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComputeOutcome<T> {
    pub status: ComputeStatus,
    pub result: Option<T>,
    pub error: Option<String>,
}

impl<T> ComputeOutcome<T> {
    fn completed(data: T) -> Self {
        Self {
            status: ComputeStatus::Completed,
            result: Some(data),
            error: None,
        }
    }

    fn stopped(reason: CancelReason) -> Self {
        let status = match reason {
            CancelReason::Cancelled => ComputeStatus::Cancelled,
            CancelReason::Superseded => ComputeStatus::Superseded,
            CancelReason::TimedOut => ComputeStatus::TimedOut,
        };
        Self {
            status,
            result: None,
            error: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == ComputeStatus::Completed
    }
}

struct ActiveRequest {
    generation: u64,
    token: CancelToken,
}

type ActiveMap = Arc<Mutex<HashMap<String, ActiveRequest>>>;

pub struct ComputeHost {
    pool: ThreadPool,
    timeout: Duration,
    active: ActiveMap,
    generations: AtomicU64,
}

impl ComputeHost {
    pub fn new(config: ComputeConfig) -> Result<Self> {
        config.validate()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("planner-worker-{}", i))
            .build()
            .map_err(|e| PlannerError::InvalidConfig(e.to_string()))?;
        info!(workers = config.workers, timeout_ms = config.timeout_ms, "compute host started");
        Ok(Self {
            pool,
            timeout: config.timeout(),
            active: Arc::new(Mutex::new(HashMap::new())),
            generations: AtomicU64::new(0),
        })
    }

    /// Runs `job` on the pool under `key`, superseding any request already
    /// active under that key. `fallback` is only called if the request times
    /// out or fails.
    pub fn submit<T, J, F>(&self, key: impl Into<String>, job: J, fallback: F) -> ComputeHandle<T>
    where
        T: Send + 'static,
        J: FnOnce(&RunContext) -> Result<T> + Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let key = key.into();
        let submitted_at = Instant::now();
        let token = CancelToken::new();
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);

        if let Some(previous) = self.active.lock().insert(
            key.clone(),
            ActiveRequest {
                generation,
                token: token.clone(),
            },
        ) {
            if previous.token.cancel_with(CancelReason::Superseded) {
                debug!(%key, superseded = previous.generation, "request superseded");
            }
        }

        let (sender, events) = mpsc::channel();
        let progress = sender.clone();
        let ctx = RunContext::with_token(token.clone()).with_progress(move |value| {
            let _ = progress.send(ComputeEvent::Progress { value });
        });

        let active = Arc::clone(&self.active);
        let job_key = key.clone();
        self.pool.spawn(move || {
            let started = Instant::now();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| job(&ctx)));
            drop(ctx);

            let event = match outcome {
                Ok(Ok(data)) => Some(ComputeEvent::Result { data }),
                Ok(Err(PlannerError::Cancelled(reason))) => {
                    debug!(key = %job_key, %reason, "request stopped");
                    None
                }
                Ok(Err(err)) => Some(ComputeEvent::Error {
                    message: err.to_string(),
                }),
                Err(payload) => {
                    let message = PlannerError::WorkerFailed(panic_message(payload.as_ref())).to_string();
                    warn!(key = %job_key, %message, "worker panicked");
                    Some(ComputeEvent::Error { message })
                }
            };
            if let Some(event) = event {
                let _ = sender.send(event);
            }
            drop(sender);

            let mut active = active.lock();
            if active.get(&job_key).is_some_and(|r| r.generation == generation) {
                active.remove(&job_key);
            }
            debug!(key = %job_key, elapsed_ms = started.elapsed().as_millis() as u64, "worker finished");
        });

        ComputeHandle {
            key,
            token,
            events,
            submitted_at,
            timeout: self.timeout,
            fallback: Box::new(fallback),
        }
    }

    /// Cancels the request active under `key`, if any.
    pub fn cancel(&self, key: &str) -> bool {
        match self.active.lock().remove(key) {
            Some(request) => request.token.cancel_with(CancelReason::Cancelled),
            None => false,
        }
    }

    /// Keys with a request still in flight, sorted.
    pub fn active_requests(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.active.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// Caller's side of a submitted request.
pub struct ComputeHandle<T> {
    key: String,
    token: CancelToken,
    events: Receiver<ComputeEvent<T>>,
    submitted_at: Instant,
    /// Measured from submission, not from the call to `wait`.
    timeout: Duration,
    fallback: Box<dyn FnOnce() -> T + Send>,
}

impl<T> ComputeHandle<T> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn cancel(&self) {
        self.token.cancel_with(CancelReason::Cancelled);
    }

    pub fn wait(self) -> ComputeOutcome<T> {
        self.wait_with_progress(|_| {})
    }

    /// Blocks until the request resolves, passing progress values to
    /// `on_progress` as they arrive. Values may repeat; the final outcome
    /// is authoritative.
    pub fn wait_with_progress(self, mut on_progress: impl FnMut(f64)) -> ComputeOutcome<T> {
        let deadline = self.submitted_at + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(remaining) {
                Ok(ComputeEvent::Progress { value }) => on_progress(value),
                Ok(ComputeEvent::Result { data }) => {
                    return match self.token.reason() {
                        Some(reason) => ComputeOutcome::stopped(reason),
                        None => ComputeOutcome::completed(data),
                    };
                }
                Ok(ComputeEvent::Error { message }) => {
                    warn!(key = %self.key, %message, "request failed, using fallback");
                    return ComputeOutcome {
                        status: ComputeStatus::Failed,
                        result: Some((self.fallback)()),
                        error: Some(message),
                    };
                }
                Err(RecvTimeoutError::Timeout) => {
                    if !self.token.cancel_with(CancelReason::TimedOut) {
                        return ComputeOutcome::stopped(self.token.reason().unwrap_or(CancelReason::Cancelled));
                    }
                    warn!(
                        key = %self.key,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "request timed out, using fallback"
                    );
                    return ComputeOutcome {
                        status: ComputeStatus::TimedOut,
                        result: Some((self.fallback)()),
                        error: None,
                    };
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return ComputeOutcome::stopped(self.token.reason().unwrap_or(CancelReason::Cancelled));
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn host(timeout_ms: u64) -> ComputeHost {
        ComputeHost::new(ComputeConfig { workers: 2, timeout_ms }).unwrap()
    }

    fn spin_until_stopped(ctx: &RunContext) -> Result<u32> {
        loop {
            ctx.checkpoint()?;
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_completed_with_progress() {
        let host = host(5_000);
        let handle = host.submit(
            "user-1",
            |ctx: &RunContext| {
                ctx.report(0.5);
                ctx.report(1.0);
                Ok(42u32)
            },
            || 0,
        );
        let mut seen = Vec::new();
        let outcome = handle.wait_with_progress(|value| seen.push(value));
        assert_eq!(outcome.status, ComputeStatus::Completed);
        assert_eq!(outcome.result, Some(42));
        assert_eq!(seen, vec![0.5, 1.0]);
    }

    #[test]
    fn test_new_request_supersedes_old_one() {
        let host = host(5_000);
        let first = host.submit("user-1", spin_until_stopped, || 0);
        let second = host.submit("user-1", |_: &RunContext| Ok(7u32), || 0);

        let stale = first.wait();
        assert_eq!(stale.status, ComputeStatus::Superseded);
        assert_eq!(stale.result, None);
        assert_eq!(second.wait().result, Some(7));
    }

    #[test]
    fn test_timeout_returns_fallback() {
        let host = host(50);
        let handle = host.submit("user-1", spin_until_stopped, || 99);
        let token = handle.token().clone();
        let outcome = handle.wait();
        assert_eq!(outcome.status, ComputeStatus::TimedOut);
        assert_eq!(outcome.result, Some(99));
        assert_eq!(token.reason(), Some(CancelReason::TimedOut));
    }

    #[test]
    fn test_timeout_counts_from_submission() {
        let host = host(300);
        let handle = host.submit("user-1", spin_until_stopped, || 99);
        thread::sleep(Duration::from_millis(400));

        let waiting = Instant::now();
        let outcome = handle.wait();
        assert_eq!(outcome.status, ComputeStatus::TimedOut);
        assert!(waiting.elapsed() < Duration::from_millis(250));
    }

    #[test]
    fn test_job_error_returns_fallback() {
        let host = host(5_000);
        let handle = host.submit(
            "user-1",
            |_: &RunContext| -> Result<u32> { Err(PlannerError::InvalidRequest("empty".to_string())) },
            || 1,
        );
        let outcome = handle.wait();
        assert_eq!(outcome.status, ComputeStatus::Failed);
        assert_eq!(outcome.result, Some(1));
        assert!(outcome.error.unwrap().contains("empty"));
    }

    #[test]
    fn test_panic_is_caught_at_worker_boundary() {
        let host = host(5_000);
        let handle = host.submit("user-1", |_: &RunContext| -> Result<u32> { panic!("boom") }, || 1);
        let outcome = handle.wait();
        assert_eq!(outcome.status, ComputeStatus::Failed);
        assert!(outcome.error.unwrap().contains("boom"));

        // The pool survives the panic.
        let again = host.submit("user-1", |_: &RunContext| Ok(2u32), || 0);
        assert_eq!(again.wait().result, Some(2));
    }

    #[test]
    fn test_cancel_by_key() {
        let host = host(5_000);
        let handle = host.submit("user-1", spin_until_stopped, || 0);
        assert_eq!(host.active_requests(), vec!["user-1".to_string()]);
        assert!(host.cancel("user-1"));
        let outcome = handle.wait();
        assert_eq!(outcome.status, ComputeStatus::Cancelled);
        assert_eq!(outcome.result, None);
        assert!(!host.cancel("user-1"));
    }

    #[test]
    fn test_finished_requests_leave_active_set() {
        let host = host(5_000);
        let outcome = host.submit("user-1", |_: &RunContext| Ok(1u32), || 0).wait();
        assert!(outcome.is_completed());

        let deadline = Instant::now() + Duration::from_secs(2);
        while !host.active_requests().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(host.active_requests().is_empty());
    }

    #[test]
    fn test_event_wire_format() {
        let progress = serde_json::to_value(ComputeEvent::<u32>::Progress { value: 0.5 }).unwrap();
        assert_eq!(progress, serde_json::json!({"type": "progress", "value": 0.5}));

        let result = serde_json::to_value(ComputeEvent::Result { data: 3u32 }).unwrap();
        assert_eq!(result, serde_json::json!({"type": "result", "data": 3}));

        let error = serde_json::to_value(ComputeEvent::<u32>::Error {
            message: "bad".to_string(),
        })
        .unwrap();
        assert_eq!(error, serde_json::json!({"type": "error", "message": "bad"}));
    }
}
