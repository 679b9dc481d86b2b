//! Per-run context: cancellation token and progress sink.
//!
//! Every long-running loop in the crate takes a [`RunContext`] and calls
//! [`RunContext::checkpoint`] between steps, so a cancelled or superseded
//! run stops at the next step rather than at loop entry.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

use crate::error::{PlannerError, Result};

const ACTIVE: u8 = 0;
const CANCELLED: u8 = 1;
const SUPERSEDED: u8 = 2;
const TIMED_OUT: u8 = 3;

/// Why a run was stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    Cancelled,
    Superseded,
    TimedOut,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CancelReason::Cancelled => "cancelled",
            CancelReason::Superseded => "superseded",
            CancelReason::TimedOut => "timed out",
        };
        f.write_str(label)
    }
}

/// Shared cancellation flag. The first reason recorded wins.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    state: Arc<AtomicU8>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancel_with(CancelReason::Cancelled);
    }

    /// Returns `true` if this call was the one that stopped the token.
    pub fn cancel_with(&self, reason: CancelReason) -> bool {
        let code = match reason {
            CancelReason::Cancelled => CANCELLED,
            CancelReason::Superseded => SUPERSEDED,
            CancelReason::TimedOut => TIMED_OUT,
        };
        self.state
            .compare_exchange(ACTIVE, code, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) != ACTIVE
    }

    pub fn reason(&self) -> Option<CancelReason> {
        match self.state.load(Ordering::Acquire) {
            CANCELLED => Some(CancelReason::Cancelled),
            SUPERSEDED => Some(CancelReason::Superseded),
            TIMED_OUT => Some(CancelReason::TimedOut),
            _ => None,
        }
    }
}

pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

/// Context handed to every clustering/scheduling run.
#[derive(Clone, Default)]
pub struct RunContext {
    token: CancelToken,
    progress: Option<ProgressFn>,
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("token", &self.token)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl RunContext {
    /// A context that is never cancelled and reports nowhere.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn with_token(token: CancelToken) -> Self {
        Self {
            token,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: impl Fn(f64) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(progress));
        self
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fails with [`PlannerError::Cancelled`] once the token is stopped.
    pub fn checkpoint(&self) -> Result<()> {
        match self.token.reason() {
            Some(reason) => Err(PlannerError::Cancelled(reason)),
            None => Ok(()),
        }
    }

    /// Best-effort progress tick, clamped to `0..=1`.
    pub fn report(&self, fraction: f64) {
        if let Some(progress) = &self.progress {
            if !self.token.is_cancelled() {
                progress(fraction.clamp(0.0, 1.0));
            }
        }
    }

    /// Reports `done / total` scaled into the `[from, to]` band of the run.
    pub fn report_band(&self, from: f64, to: f64, done: usize, total: usize) {
        let inner = if total == 0 {
            1.0
        } else {
            done as f64 / total as f64
        };
        self.report(from + (to - from) * inner);
    }

    /// Child context sharing this token whose `0..=1` progress maps into
    /// `[from, to]` of this one.
    pub fn scoped(&self, from: f64, to: f64) -> RunContext {
        let progress = self.progress.clone().map(|parent| {
            let mapped: ProgressFn = Arc::new(move |value: f64| parent(from + (to - from) * value));
            mapped
        });
        RunContext {
            token: self.token.clone(),
            progress,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_first_reason_wins() {
        let token = CancelToken::new();
        assert!(token.cancel_with(CancelReason::Superseded));
        assert!(!token.cancel_with(CancelReason::TimedOut));
        assert_eq!(token.reason(), Some(CancelReason::Superseded));
    }

    #[test]
    fn test_checkpoint_reports_reason() {
        let token = CancelToken::new();
        let ctx = RunContext::with_token(token.clone());
        assert!(ctx.checkpoint().is_ok());

        token.cancel_with(CancelReason::TimedOut);
        match ctx.checkpoint() {
            Err(PlannerError::Cancelled(CancelReason::TimedOut)) => {}
            other => panic!("expected timed-out cancellation, got {:?}", other),
        }
    }

    #[test]
    fn test_progress_is_clamped_and_silenced_after_cancel() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let ctx = RunContext::detached().with_progress(move |value| sink.lock().unwrap().push(value));

        ctx.report(1.5);
        ctx.report_band(0.0, 0.5, 1, 2);
        ctx.token().cancel();
        ctx.report(0.9);

        assert_eq!(*seen.lock().unwrap(), vec![1.0, 0.25]);
    }

    #[test]
    fn test_scoped_progress_maps_into_band() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let ctx = RunContext::detached().with_progress(move |value| sink.lock().unwrap().push(value));

        let child = ctx.scoped(0.5, 1.0);
        child.report(0.5);
        child.token().cancel();
        assert!(ctx.is_cancelled());

        assert_eq!(*seen.lock().unwrap(), vec![0.75]);
    }
}
