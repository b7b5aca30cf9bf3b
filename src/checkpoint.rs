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

//! Durable per-job progress: which files are done, which failed and how
//! often, and the highest batch sequence the store has applied.
//!
//! A file is in `processed_files`, in `failed_files`, or still queued —
//! never two of these; the mutators below keep the sets disjoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::StoreError;
use crate::graph::model::Position;
use crate::store::GraphStore;

/// Which pass the job is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pass {
    /// Pass 1: document symbols → nodes and containment.
    Structure,
    /// Pass 2: references and implementations → semantic edges.
    References,
    /// Both passes finished.
    Done,
}

/// Retry history for a file that has failed at least once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedFile {
    /// Failures so far.
    pub retry_count: u32,
    /// Message from the most recent failure.
    pub last_error: String,
    /// Where the last attempt blew up, letting the next one skip the
    /// offending symbol.
    pub last_position: Option<Position>,
}

/// A durable snapshot of job progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Owning job.
    pub job_id: String,
    /// Pass marker.
    pub pass: Pass,
    /// Files completed in the current pass.
    pub processed_files: BTreeSet<String>,
    /// Files that failed, keyed by path.
    pub failed_files: BTreeMap<String, FailedFile>,
    /// Highest sequence durably applied to the graph store.
    pub last_committed_sequence: u64,
    /// When this snapshot was written.
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Fresh, empty state for a new job.
    #[must_use]
    pub fn new(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            pass: Pass::Structure,
            processed_files: BTreeSet::new(),
            failed_files: BTreeMap::new(),
            last_committed_sequence: 0,
            updated_at: Utc::now(),
        }
    }

    /// Marks a file done. Clears any failure record for it.
    pub fn record_processed(&mut self, path: &str) {
        self.failed_files.remove(path);
        self.processed_files.insert(path.to_string());
    }

    /// Records a failure and returns the new retry count. The file leaves
    /// `processed_files` if it was there.
    pub fn record_failure(&mut self, path: &str, error: &str, position: Option<Position>) -> u32 {
        self.processed_files.remove(path);
        let entry = self.failed_files.entry(path.to_string()).or_insert(FailedFile {
            retry_count: 0,
            last_error: String::new(),
            last_position: None,
        });
        entry.retry_count += 1;
        entry.last_error = error.to_string();
        if position.is_some() {
            entry.last_position = position;
        }
        entry.retry_count
    }

    /// Current retry count for a path (0 if it never failed).
    #[must_use]
    pub fn retry_count(&self, path: &str) -> u32 {
        self.failed_files.get(path).map_or(0, |f| f.retry_count)
    }

    /// Moves to the reference pass. Per-pass progress resets; failure
    /// records survive so hard-failed files stay excluded.
    pub fn begin_references_pass(&mut self) {
        self.pass = Pass::References;
        self.processed_files.clear();
    }

    /// Marks the job fully analyzed.
    pub fn finish(&mut self) {
        self.pass = Pass::Done;
    }
}

/// Persists and restores checkpoints through the graph store.
pub struct CheckpointManager {
    store: Arc<dyn GraphStore>,
}

impl CheckpointManager {
    /// Wraps a store.
    #[must_use]
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    /// Loads the checkpoint for a job, or an empty resumable state if none
    /// was ever written.
    ///
    /// # Errors
    ///
    /// Propagates store read failures.
    pub async fn resume(&self, job_id: &str) -> Result<Checkpoint, StoreError> {
        Ok(self
            .store
            .read_checkpoint(job_id)
            .await?
            .unwrap_or_else(|| Checkpoint::new(job_id)))
    }

    /// Stamps the checkpoint with the just-applied sequence and persists
    /// it. Called exactly once per durably applied batch, after the apply.
    ///
    /// # Errors
    ///
    /// Propagates store write failures.
    pub async fn commit(&self, checkpoint: &mut Checkpoint, sequence: u64) -> Result<(), StoreError> {
        checkpoint.last_committed_sequence = sequence;
        checkpoint.updated_at = Utc::now();
        self.store.write_checkpoint(checkpoint).await
    }

    /// Persists the checkpoint without advancing the sequence (pass
    /// transitions, final marker).
    ///
    /// # Errors
    ///
    /// Propagates store write failures.
    pub async fn persist(&self, checkpoint: &mut Checkpoint) -> Result<(), StoreError> {
        checkpoint.updated_at = Utc::now();
        self.store.write_checkpoint(checkpoint).await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "test fixtures")]

    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn processed_and_failed_stay_disjoint() {
        let mut cp = Checkpoint::new("job-1");

        cp.record_failure("a.py", "boom", None);
        assert_eq!(cp.retry_count("a.py"), 1);

        cp.record_processed("a.py");
        assert!(cp.processed_files.contains("a.py"));
        assert!(!cp.failed_files.contains_key("a.py"));

        cp.record_failure("a.py", "boom again", None);
        assert!(!cp.processed_files.contains("a.py"));
        // Retry history restarted after the success wiped it.
        assert_eq!(cp.retry_count("a.py"), 1);
    }

    #[test]
    fn failure_keeps_last_position() {
        let mut cp = Checkpoint::new("job-1");
        let pos = Position { line: 12, character: 4 };
        cp.record_failure("a.py", "crash at symbol", Some(pos));
        cp.record_failure("a.py", "crash again", None);

        let entry = cp.failed_files.get("a.py").unwrap();
        assert_eq!(entry.retry_count, 2);
        assert_eq!(entry.last_error, "crash again");
        assert_eq!(entry.last_position, Some(pos));
    }

    #[test]
    fn pass_transition_resets_progress_not_failures() {
        let mut cp = Checkpoint::new("job-1");
        cp.record_processed("a.py");
        cp.record_failure("bad.py", "poison", None);

        cp.begin_references_pass();
        assert_eq!(cp.pass, Pass::References);
        assert!(cp.processed_files.is_empty());
        assert!(cp.failed_files.contains_key("bad.py"));
    }

    #[tokio::test]
    async fn resume_returns_empty_state_without_checkpoint() {
        let store = Arc::new(MemoryStore::new());
        let manager = CheckpointManager::new(store);

        let cp = manager.resume("job-9").await.unwrap();
        assert_eq!(cp.pass, Pass::Structure);
        assert_eq!(cp.last_committed_sequence, 0);
        assert!(cp.processed_files.is_empty());
    }

    #[tokio::test]
    async fn commit_then_resume_round_trips() {
        let store = Arc::new(MemoryStore::new());
        let manager = CheckpointManager::new(store);

        let mut cp = Checkpoint::new("job-1");
        cp.record_processed("a.py");
        manager.commit(&mut cp, 3).await.unwrap();

        let restored = manager.resume("job-1").await.unwrap();
        assert_eq!(restored.last_committed_sequence, 3);
        assert!(restored.processed_files.contains("a.py"));
    }
}
