//! Fail-soft stage runner
//!
//! Every collaborator call runs through [`run_stage`]: bounded by a
//! timeout, isolated from panics, and raced against the request's
//! cancellation token. The result is a [`StageOutcome`] value that the
//! pipeline records instead of propagating.

use crate::cancel::{Cancellable, CancellationToken};
use crate::errors::{Result, RetrievalError};
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

/// What happened to one stage
#[derive(Debug)]
pub enum StageOutcome<T> {
    Completed(T),
    Failed(RetrievalError),
    TimedOut(Duration),
    Cancelled,
    Skipped(String),
}

impl<T> StageOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, StageOutcome::Completed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StageOutcome::Cancelled)
    }

    /// Whether this outcome says the backend is unhealthy
    pub fn counts_as_failure(&self) -> bool {
        match self {
            StageOutcome::Failed(e) => e.is_transient(),
            StageOutcome::TimedOut(_) => true,
            _ => false,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StageOutcome::Completed(_) => "completed",
            StageOutcome::Failed(_) => "failed",
            StageOutcome::TimedOut(_) => "timed_out",
            StageOutcome::Cancelled => "cancelled",
            StageOutcome::Skipped(_) => "skipped",
        }
    }
}

/// A recorded stage failure, as reported to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: String,
    pub kind: String,
    pub message: String,
}

impl StageFailure {
    pub fn from_outcome<T>(stage: &str, outcome: &StageOutcome<T>) -> Option<Self> {
        let message = match outcome {
            StageOutcome::Failed(e) => e.to_string(),
            StageOutcome::TimedOut(d) => format!("timed out after {}ms", d.as_millis()),
            _ => return None,
        };
        Some(Self {
            stage: stage.to_string(),
            kind: outcome.label().to_string(),
            message,
        })
    }
}

/// Run one stage future under timeout, panic isolation and cancellation
pub async fn run_stage<T, F>(
    stage: &str,
    timeout: Duration,
    cancel: &CancellationToken,
    fut: F,
) -> StageOutcome<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return StageOutcome::Cancelled;
    }

    let guarded = tokio::time::timeout(timeout, AssertUnwindSafe(fut).catch_unwind());

    tokio::select! {
        biased;
        _ = cancel.cancelled() => StageOutcome::Cancelled,
        res = guarded => match res {
            Err(_) => StageOutcome::TimedOut(timeout),
            Ok(Err(panic)) => StageOutcome::Failed(RetrievalError::StagePanicked {
                stage: stage.to_string(),
                message: panic_message(panic.as_ref()),
            }),
            Ok(Ok(Ok(value))) => StageOutcome::Completed(value),
            Ok(Ok(Err(e))) => StageOutcome::Failed(e),
        },
    }
}

/// Synchronous counterpart for cheap local calls
pub fn run_sync<T, F>(stage: &str, f: F) -> StageOutcome<T>
where
    F: FnOnce() -> Result<T>,
{
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => StageOutcome::Completed(value),
        Ok(Err(e)) => StageOutcome::Failed(e),
        Err(panic) => StageOutcome::Failed(RetrievalError::StagePanicked {
            stage: stage.to_string(),
            message: panic_message(panic.as_ref()),
        }),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
