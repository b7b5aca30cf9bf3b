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

//! Pluggable graph persistence.
//!
//! The pipeline only ever talks to [`GraphStore`]; backends must make
//! `apply_batch` idempotent on node id and on the (source, target, type)
//! edge triple, so a replayed batch leaves the store unchanged.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::checkpoint::Checkpoint;
use crate::error::StoreError;
use crate::graph::model::{BatchUpdate, CodeNode, Edge, Project};

/// In-memory reference backend.
pub mod memory;

pub use memory::MemoryStore;

/// A connected slice of the graph returned by [`GraphStore::read_subgraph`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Subgraph {
    /// Nodes reachable within the requested depth.
    pub nodes: Vec<CodeNode>,
    /// Edges between those nodes.
    pub edges: Vec<Edge>,
}

/// Contract between the pipeline and a graph persistence backend.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Registers a project and its root node space. Idempotent.
    async fn ensure_project(&self, project: &Project) -> Result<(), StoreError>;

    /// Upserts nodes keyed on node id.
    async fn upsert_nodes(&self, nodes: &[CodeNode]) -> Result<(), StoreError>;

    /// Upserts edges keyed on the (source, target, type) triple.
    async fn upsert_edges(&self, edges: &[Edge]) -> Result<(), StoreError>;

    /// Applies one batch transactionally. Replaying an already-applied
    /// sequence must be a no-op; skipping ahead of the committed prefix is
    /// a [`StoreError::SequenceConflict`].
    async fn apply_batch(&self, batch: &BatchUpdate) -> Result<(), StoreError>;

    /// Reads the subgraph reachable from `node_id` within `depth` hops.
    async fn read_subgraph(&self, node_id: &str, depth: u32) -> Result<Subgraph, StoreError>;

    /// Persists a checkpoint, replacing any previous one for the job.
    async fn write_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StoreError>;

    /// Reads the checkpoint for a job, if one exists.
    async fn read_checkpoint(&self, job_id: &str) -> Result<Option<Checkpoint>, StoreError>;

    /// Drops everything recorded for a job (checkpoint and batch marker).
    /// Graph data survives; it belongs to the project, not the job.
    async fn delete_job(&self, job_id: &str) -> Result<(), StoreError>;
}
