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

//! In-memory graph store.
//!
//! The reference backend: used by the one-shot CLI, the default `serve`
//! wiring, and every test. Upserts are idempotent by construction (maps
//! keyed on node id, a set of edge triples), and `apply_batch` is atomic
//! under one lock.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use super::{GraphStore, Subgraph};
use crate::checkpoint::Checkpoint;
use crate::error::StoreError;
use crate::graph::model::{BatchUpdate, CodeNode, Edge, NodeId, Project};

#[derive(Default)]
struct Inner {
    projects: HashMap<String, Project>,
    nodes: HashMap<NodeId, CodeNode>,
    edges: HashSet<Edge>,
    checkpoints: HashMap<String, Checkpoint>,
    /// Highest sequence applied per job; replays at or below it are no-ops.
    applied: HashMap<String, u64>,
}

/// See module docs.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    /// Test hook: reject this many upcoming `apply_batch` calls.
    fail_next: AtomicU32,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` `apply_batch` calls fail with
    /// [`StoreError::Rejected`]. Lets tests drive the retry/backoff path.
    pub fn inject_failures(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Number of stored nodes.
    pub fn node_count(&self) -> usize {
        self.lock().nodes.len()
    }

    /// Number of stored edges.
    pub fn edge_count(&self) -> usize {
        self.lock().edges.len()
    }

    /// Sorted node ids, for run-equality assertions.
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.lock().nodes.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Sorted edge triples, for run-equality assertions.
    pub fn edge_triples(&self) -> Vec<(NodeId, NodeId, String)> {
        let mut triples: Vec<(NodeId, NodeId, String)> = self
            .lock()
            .edges
            .iter()
            .map(|e| {
                (
                    e.source.clone(),
                    e.target.clone(),
                    format!("{:?}", e.edge_type),
                )
            })
            .collect();
        triples.sort();
        triples
    }

    /// Looks up a stored node.
    pub fn get_node(&self, id: &str) -> Option<CodeNode> {
        self.lock().nodes.get(id).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl GraphStore for MemoryStore {
    async fn ensure_project(&self, project: &Project) -> Result<(), StoreError> {
        self.lock()
            .projects
            .entry(project.project_id.clone())
            .or_insert_with(|| project.clone());
        Ok(())
    }

    async fn upsert_nodes(&self, nodes: &[CodeNode]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        for node in nodes {
            inner.nodes.insert(node.id.clone(), node.clone());
        }
        Ok(())
    }

    async fn upsert_edges(&self, edges: &[Edge]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        for edge in edges {
            inner.edges.insert(edge.clone());
        }
        Ok(())
    }

    async fn apply_batch(&self, batch: &BatchUpdate) -> Result<(), StoreError> {
        if self.fail_next.load(Ordering::SeqCst) > 0 {
            self.fail_next.fetch_sub(1, Ordering::SeqCst);
            return Err(StoreError::Rejected("injected failure".to_string()));
        }

        let mut inner = self.lock();
        let applied = inner.applied.get(&batch.job_id).copied().unwrap_or(0);
        if batch.sequence > applied + 1 {
            return Err(StoreError::SequenceConflict {
                committed: applied,
                offered: batch.sequence,
            });
        }

        // Replays (a crash between apply and checkpoint re-sends the
        // committed prefix's successor) apply again; upserts keyed on node
        // id and edge triple make that a fixed point.
        for node in &batch.nodes {
            inner.nodes.insert(node.id.clone(), node.clone());
        }
        for edge in &batch.edges {
            inner.edges.insert(edge.clone());
        }
        let high = applied.max(batch.sequence);
        inner.applied.insert(batch.job_id.clone(), high);
        Ok(())
    }

    async fn read_subgraph(&self, node_id: &str, depth: u32) -> Result<Subgraph, StoreError> {
        let inner = self.lock();
        if !inner.nodes.contains_key(node_id) {
            return Err(StoreError::UnknownNode(node_id.to_string()));
        }

        let mut visited: HashSet<&str> = HashSet::new();
        let mut frontier: VecDeque<(&str, u32)> = VecDeque::new();
        visited.insert(node_id);
        frontier.push_back((node_id, 0));

        while let Some((id, dist)) = frontier.pop_front() {
            if dist >= depth {
                continue;
            }
            for edge in &inner.edges {
                if edge.source == id && !visited.contains(edge.target.as_str()) {
                    visited.insert(edge.target.as_str());
                    frontier.push_back((edge.target.as_str(), dist + 1));
                }
            }
        }

        let mut nodes: Vec<CodeNode> = visited
            .iter()
            .filter_map(|id| inner.nodes.get(*id).cloned())
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        let mut edges: Vec<Edge> = inner
            .edges
            .iter()
            .filter(|e| visited.contains(e.source.as_str()) && visited.contains(e.target.as_str()))
            .cloned()
            .collect();
        edges.sort_by(|a, b| (&a.source, &a.target).cmp(&(&b.source, &b.target)));

        Ok(Subgraph { nodes, edges })
    }

    async fn write_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        self.lock()
            .checkpoints
            .insert(checkpoint.job_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn read_checkpoint(&self, job_id: &str) -> Result<Option<Checkpoint>, StoreError> {
        Ok(self.lock().checkpoints.get(job_id).cloned())
    }

    async fn delete_job(&self, job_id: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.checkpoints.remove(job_id);
        inner.applied.remove(job_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "test fixtures")]

    use super::*;
    use crate::graph::model::{BatchStatus, EdgeType, NodeKind, Range, node_id};

    fn node(fqn: &str) -> CodeNode {
        CodeNode {
            id: node_id("p", NodeKind::Function, fqn, "file:///a.py"),
            kind: NodeKind::Function,
            name: fqn.to_string(),
            fully_qualified_name: fqn.to_string(),
            uri: "file:///a.py".to_string(),
            range: Range::default(),
        }
    }

    fn batch(job: &str, sequence: u64, nodes: Vec<CodeNode>, edges: Vec<Edge>) -> BatchUpdate {
        BatchUpdate {
            job_id: job.to_string(),
            sequence,
            nodes,
            edges,
            processed_files: vec![],
            failed_files: vec![],
            status: BatchStatus::StructureComplete,
            statistics: None,
        }
    }

    #[tokio::test]
    async fn apply_batch_is_idempotent() {
        let store = MemoryStore::new();
        let a = node("a");
        let b = node("b");
        let edge = Edge::new(a.id.clone(), b.id.clone(), EdgeType::Calls);

        let update = batch("job-1", 1, vec![a, b], vec![edge]);
        store.apply_batch(&update).await.unwrap();
        let (nodes, edges) = (store.node_count(), store.edge_count());

        // Replay of the same sequence changes nothing.
        store.apply_batch(&update).await.unwrap();
        assert_eq!(store.node_count(), nodes);
        assert_eq!(store.edge_count(), edges);
    }

    #[tokio::test]
    async fn sequence_gap_is_rejected() {
        let store = MemoryStore::new();
        store.apply_batch(&batch("job-1", 1, vec![node("a")], vec![])).await.unwrap();

        let result = store.apply_batch(&batch("job-1", 3, vec![node("b")], vec![])).await;
        assert!(matches!(result, Err(StoreError::SequenceConflict { committed: 1, offered: 3 })));
    }

    #[tokio::test]
    async fn sequences_are_per_job() {
        let store = MemoryStore::new();
        store.apply_batch(&batch("job-1", 1, vec![node("a")], vec![])).await.unwrap();
        store.apply_batch(&batch("job-2", 1, vec![node("b")], vec![])).await.unwrap();
        assert_eq!(store.node_count(), 2);
    }

    #[tokio::test]
    async fn read_subgraph_walks_depth() {
        let store = MemoryStore::new();
        let a = node("a");
        let b = node("b");
        let c = node("c");
        let edges = vec![
            Edge::new(a.id.clone(), b.id.clone(), EdgeType::Contains),
            Edge::new(b.id.clone(), c.id.clone(), EdgeType::Contains),
        ];
        store
            .apply_batch(&batch("job-1", 1, vec![a.clone(), b.clone(), c.clone()], edges))
            .await
            .unwrap();

        let shallow = store.read_subgraph(&a.id, 1).await.unwrap();
        assert_eq!(shallow.nodes.len(), 2);
        assert_eq!(shallow.edges.len(), 1);

        let deep = store.read_subgraph(&a.id, 5).await.unwrap();
        assert_eq!(deep.nodes.len(), 3);
        assert_eq!(deep.edges.len(), 2);

        assert!(matches!(
            store.read_subgraph("missing", 1).await,
            Err(StoreError::UnknownNode(_))
        ));
    }

    #[tokio::test]
    async fn injected_failures_then_success() {
        let store = MemoryStore::new();
        store.inject_failures(2);

        let update = batch("job-1", 1, vec![node("a")], vec![]);
        assert!(store.apply_batch(&update).await.is_err());
        assert!(store.apply_batch(&update).await.is_err());
        assert!(store.apply_batch(&update).await.is_ok());
    }

    #[tokio::test]
    async fn delete_job_keeps_graph_data() {
        let store = MemoryStore::new();
        store.apply_batch(&batch("job-1", 1, vec![node("a")], vec![])).await.unwrap();
        let mut cp = Checkpoint::new("job-1");
        cp.record_processed("a.py");
        store.write_checkpoint(&cp).await.unwrap();

        store.delete_job("job-1").await.unwrap();
        assert!(store.read_checkpoint("job-1").await.unwrap().is_none());
        assert_eq!(store.node_count(), 1);
    }
}
