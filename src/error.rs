//! Error types for the planner.
//!
//! Only run-level failures are errors. Per-service problems (bad time
//! windows, exhausted technician caps) are carried as values in
//! [`crate::model::InvalidService`] and [`crate::model::UnscheduledService`].

use thiserror::Error;

use crate::context::CancelReason;

#[derive(Error, Debug)]
pub enum PlannerError {
    /// Request that cannot be planned at all (empty, malformed).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Option values outside their documented range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Cooperative cancellation observed at a checkpoint.
    #[error("Computation cancelled ({0})")]
    Cancelled(CancelReason),

    /// Worker panicked or was torn down before answering.
    #[error("Worker failed: {0}")]
    WorkerFailed(String),

    #[error("OSRM request failed: {0}")]
    Osrm(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PlannerError>;
