//! Single-run guard
//!
//! At most one pipeline execution at a time. A second trigger is rejected,
//! never queued.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunRecord {
    pub date: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub succeeded: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PipelineStatus {
    pub running: bool,
    pub last_run: Option<RunRecord>,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineGuard {
    running: Arc<AtomicBool>,
    last_run: Arc<RwLock<Option<RunRecord>>>,
}

impl PipelineGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the guard for a run on `date`, or fail with `AlreadyRunning`.
    pub fn try_acquire(&self, date: DateTime<Utc>) -> PipelineResult<RunPermit> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(PipelineError::AlreadyRunning);
        }
        *self.last_run.write() = Some(RunRecord {
            date,
            started_at: Utc::now(),
            finished_at: None,
            succeeded: None,
            error: None,
        });
        Ok(RunPermit {
            guard: self.clone(),
            finished: false,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            running: self.is_running(),
            last_run: self.last_run.read().clone(),
        }
    }

    fn release(&self, error: Option<String>) {
        if let Some(record) = self.last_run.write().as_mut() {
            record.finished_at = Some(Utc::now());
            record.succeeded = Some(error.is_none());
            record.error = error;
        }
        self.running.store(false, Ordering::Release);
    }
}

/// Held for the duration of a run. Dropping it without [`RunPermit::finish`]
/// records the run as failed.
#[derive(Debug)]
pub struct RunPermit {
    guard: PipelineGuard,
    finished: bool,
}

impl RunPermit {
    pub fn finish<T, E: std::fmt::Display>(mut self, outcome: &Result<T, E>) {
        self.finished = true;
        let error = outcome.as_ref().err().map(|e| e.to_string());
        self.guard.release(error);
    }
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        if !self.finished {
            self.guard.release(Some("run aborted".to_string()));
        }
    }
}
