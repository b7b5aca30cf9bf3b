/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Job identity, state machine, and the process-wide registry.
//!
//! One running job per (project, analyzer) at a time: `start_analysis` on a
//! non-terminal job rejoins it instead of forking a second analysis.
//! `completed` and `cancelled` are terminal; `failed` jobs can run again
//! from their checkpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, Semaphore};
use uuid::Uuid;

use crate::checkpoint::Pass;
use crate::error::AnalysisError;
use crate::graph::model::AnalysisStats;

/// Job lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, not yet picked up by an orchestrator.
    Pending,
    /// Analysis in progress.
    Running,
    /// Controlling caller detached; resumable.
    Paused,
    /// Finished successfully.
    Completed,
    /// Gave up; resumable from the checkpoint.
    Failed,
    /// Cancelled by request.
    Cancelled,
}

impl JobStatus {
    /// Terminal states never run again under the same job id.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Running | Self::Cancelled | Self::Failed)
                | (Self::Running, Self::Paused | Self::Completed | Self::Failed | Self::Cancelled)
                | (Self::Paused, Self::Running | Self::Cancelled | Self::Failed)
                | (Self::Failed, Self::Running)
        )
    }
}

/// A snapshot of one job's externally visible state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobState {
    /// Job identity.
    pub job_id: String,
    /// Owning project.
    pub project_id: String,
    /// Analyzer kind requested at start.
    pub analyzer: String,
    /// Lifecycle state.
    pub status: JobStatus,
    /// Pass marker.
    pub pass: Pass,
    /// Running counters.
    pub stats: AnalysisStats,
    /// Most recent failure, if any.
    pub last_error: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last state change.
    pub updated_at: DateTime<Utc>,
}

/// Shared handle to a job: state behind a lock, plus the cancel signal the
/// orchestrator selects on.
pub struct JobHandle {
    state: Mutex<JobState>,
    cancel_flag: AtomicBool,
    cancel_notify: Notify,
}

impl JobHandle {
    fn new(project_id: &str, analyzer: &str) -> Self {
        Self::with_id(&Uuid::new_v4().to_string(), project_id, analyzer)
    }

    fn with_id(job_id: &str, project_id: &str, analyzer: &str) -> Self {
        let now = Utc::now();
        Self {
            state: Mutex::new(JobState {
                job_id: job_id.to_string(),
                project_id: project_id.to_string(),
                analyzer: analyzer.to_string(),
                status: JobStatus::Pending,
                pass: Pass::Structure,
                stats: AnalysisStats::default(),
                last_error: None,
                created_at: now,
                updated_at: now,
            }),
            cancel_flag: AtomicBool::new(false),
            cancel_notify: Notify::new(),
        }
    }

    /// The job id.
    #[must_use]
    pub fn job_id(&self) -> String {
        self.lock().job_id.clone()
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.lock().status
    }

    /// Full state snapshot.
    #[must_use]
    pub fn snapshot(&self) -> JobState {
        self.lock().clone()
    }

    /// Moves the job to `to`, validating the transition.
    ///
    /// # Errors
    ///
    /// [`AnalysisError::Fatal`] on an illegal transition.
    pub fn transition(&self, to: JobStatus) -> Result<(), AnalysisError> {
        let mut state = self.lock();
        if !state.status.can_transition_to(to) {
            return Err(AnalysisError::Fatal(format!(
                "illegal job transition {:?} -> {to:?} for {}",
                state.status, state.job_id
            )));
        }
        state.status = to;
        state.updated_at = Utc::now();
        Ok(())
    }

    /// Updates the running counters.
    pub fn set_stats(&self, stats: AnalysisStats) {
        let mut state = self.lock();
        state.stats = stats;
        state.updated_at = Utc::now();
    }

    /// Updates the pass marker.
    pub fn set_pass(&self, pass: Pass) {
        let mut state = self.lock();
        state.pass = pass;
        state.updated_at = Utc::now();
    }

    /// Records a failure message.
    pub fn set_error(&self, error: &str) {
        let mut state = self.lock();
        state.last_error = Some(error.to_string());
        state.stats.error = Some(error.to_string());
        state.updated_at = Utc::now();
    }

    /// Flags cancellation and wakes anything waiting on
    /// [`cancelled`](Self::cancelled).
    pub fn request_cancel(&self) {
        self.cancel_flag.store(true, Ordering::SeqCst);
        self.cancel_notify.notify_waiters();
    }

    /// True once cancellation has been requested.
    pub fn cancel_requested(&self) -> bool {
        self.cancel_flag.load(Ordering::SeqCst)
    }

    /// Resolves when cancellation is requested (immediately if it already
    /// was).
    pub async fn cancelled(&self) {
        if self.cancel_requested() {
            return;
        }
        loop {
            let notified = self.cancel_notify.notified();
            if self.cancel_requested() {
                return;
            }
            notified.await;
            if self.cancel_requested() {
                return;
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, JobState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// What `start_analysis` decided to do.
pub enum StartOutcome {
    /// A new or resumed job; the caller must spawn an orchestrator run.
    Run(Arc<JobHandle>),
    /// A non-terminal job already exists; just rejoin it.
    Rejoin(Arc<JobHandle>),
}

impl StartOutcome {
    /// The handle either way.
    #[must_use]
    pub fn handle(&self) -> &Arc<JobHandle> {
        match self {
            Self::Run(h) | Self::Rejoin(h) => h,
        }
    }
}

/// Process-wide job table. Owns the `MAX_ACTIVE_JOBS` gate.
pub struct JobRegistry {
    jobs: Mutex<HashMap<String, Arc<JobHandle>>>,
    slots: Arc<Semaphore>,
}

impl JobRegistry {
    /// Creates a registry admitting at most `max_active_jobs` concurrent
    /// runs.
    #[must_use]
    pub fn new(max_active_jobs: usize) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            slots: Arc::new(Semaphore::new(max_active_jobs.max(1))),
        }
    }

    /// Starts analysis for a (project, analyzer) pair, or rejoins the
    /// existing non-terminal job. Failed jobs are handed back for resume.
    pub fn start_analysis(&self, project_id: &str, analyzer: &str) -> StartOutcome {
        let mut jobs = self.lock();

        let existing = jobs
            .values()
            .find(|j| {
                let s = j.snapshot();
                s.project_id == project_id && s.analyzer == analyzer && !s.status.is_terminal()
            })
            .cloned();

        if let Some(handle) = existing {
            return match handle.status() {
                JobStatus::Failed => StartOutcome::Run(handle),
                _ => StartOutcome::Rejoin(handle),
            };
        }

        let handle = Arc::new(JobHandle::new(project_id, analyzer));
        jobs.insert(handle.job_id(), handle.clone());
        StartOutcome::Run(handle)
    }

    /// Looks up a job.
    #[must_use]
    pub fn get(&self, job_id: &str) -> Option<Arc<JobHandle>> {
        self.lock().get(job_id).cloned()
    }

    /// Re-registers a job known only from its durable checkpoint (the
    /// in-memory table does not survive a restart). The new handle starts
    /// pending; the orchestrator picks up from the checkpoint.
    pub fn adopt(&self, job_id: &str, project_id: &str, analyzer: &str) -> Arc<JobHandle> {
        let mut jobs = self.lock();
        if let Some(existing) = jobs.get(job_id) {
            return existing.clone();
        }
        let handle = Arc::new(JobHandle::with_id(job_id, project_id, analyzer));
        jobs.insert(job_id.to_string(), handle.clone());
        handle
    }

    /// The most recently created job for a (project, analyzer) pair,
    /// regardless of state.
    #[must_use]
    pub fn find(&self, project_id: &str, analyzer: &str) -> Option<Arc<JobHandle>> {
        self.lock()
            .values()
            .filter(|j| {
                let s = j.snapshot();
                s.project_id == project_id && s.analyzer == analyzer
            })
            .max_by_key(|j| j.snapshot().created_at)
            .cloned()
    }

    /// Requests cancellation of a job.
    ///
    /// # Errors
    ///
    /// [`AnalysisError::JobNotFound`] for unknown ids.
    pub fn cancel(&self, job_id: &str) -> Result<(), AnalysisError> {
        let handle = self
            .get(job_id)
            .ok_or_else(|| AnalysisError::JobNotFound(job_id.to_string()))?;
        handle.request_cancel();
        Ok(())
    }

    /// The gate limiting concurrent orchestrator runs.
    #[must_use]
    pub fn slots(&self) -> Arc<Semaphore> {
        self.slots.clone()
    }

    /// Snapshot of every known job.
    #[must_use]
    pub fn all(&self) -> Vec<JobState> {
        self.lock().values().map(|h| h.snapshot()).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<JobHandle>>> {
        match self.jobs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
