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

//! Job-scoped in-memory symbol index.
//!
//! Holds only ids and metadata, never cross-pointers between nodes, so the
//! cyclic reference structure of real code cannot produce ownership cycles
//! here. Writes are partitioned by uri (one worker owns one file at a
//! time); reads are free across uris. Discarded when the job ends.

use dashmap::DashMap;

use super::model::{CodeNode, NodeId, NodeKind, Position};

/// In-memory index of discovered symbols.
#[derive(Debug, Default)]
pub struct SymbolRegistry {
    nodes: DashMap<NodeId, CodeNode>,
    by_uri: DashMap<String, Vec<NodeId>>,
    by_fqn: DashMap<String, NodeId>,
}

impl SymbolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a node under all indexes. Re-inserting the same id is a
    /// no-op, so workers replaying a file cannot duplicate entries.
    pub fn insert(&self, node: CodeNode) {
        if self.nodes.contains_key(&node.id) {
            return;
        }
        self.by_uri
            .entry(node.uri.clone())
            .or_default()
            .push(node.id.clone());
        self.by_fqn
            .insert(node.fully_qualified_name.clone(), node.id.clone());
        self.nodes.insert(node.id.clone(), node);
    }

    /// Looks up a node by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<CodeNode> {
        self.nodes.get(id).map(|n| n.clone())
    }

    /// All node ids discovered in a file.
    #[must_use]
    pub fn ids_for_uri(&self, uri: &str) -> Vec<NodeId> {
        self.by_uri.get(uri).map(|ids| ids.clone()).unwrap_or_default()
    }

    /// Resolves a fully qualified name to a node id.
    #[must_use]
    pub fn resolve_fqn(&self, fqn: &str) -> Option<NodeId> {
        self.by_fqn.get(fqn).map(|id| id.clone())
    }

    /// The narrowest symbol in `uri` whose range contains `pos`, preferring
    /// non-file nodes. Falls back to the file node itself, then `None` for
    /// uris this job never indexed.
    #[must_use]
    pub fn enclosing(&self, uri: &str, pos: Position) -> Option<CodeNode> {
        let ids = self.by_uri.get(uri)?;
        let mut best: Option<CodeNode> = None;
        for id in ids.iter() {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            if matches!(node.kind, NodeKind::File | NodeKind::Config) {
                continue;
            }
            if node.range.contains(pos)
                && best
                    .as_ref()
                    .is_none_or(|b| node.range.line_span() < b.range.line_span())
            {
                best = Some(node.clone());
            }
        }
        best.or_else(|| self.file_node(uri))
    }

    /// The File/Config node registered for a uri.
    #[must_use]
    pub fn file_node(&self, uri: &str) -> Option<CodeNode> {
        let ids = self.by_uri.get(uri)?;
        ids.iter()
            .filter_map(|id| self.nodes.get(id))
            .find(|n| matches!(n.kind, NodeKind::File | NodeKind::Config))
            .map(|n| n.clone())
    }

    /// Number of registered nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// All uris with at least one registered node, sorted for determinism.
    #[must_use]
    pub fn uris(&self) -> Vec<String> {
        let mut uris: Vec<String> = self.by_uri.iter().map(|e| e.key().clone()).collect();
        uris.sort();
        uris
    }

    /// Empties every index.
    pub fn clear(&self) {
        self.nodes.clear();
        self.by_uri.clear();
        self.by_fqn.clear();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "test fixtures")]

    use super::*;
    use crate::graph::model::{Range, node_id};

    fn node(kind: NodeKind, fqn: &str, uri: &str, range: Range) -> CodeNode {
        CodeNode {
            id: node_id("proj", kind, fqn, uri),
            kind,
            name: fqn.rsplit('.').next().unwrap().to_string(),
            fully_qualified_name: fqn.to_string(),
            uri: uri.to_string(),
            range,
        }
    }

    fn span(start: u32, end: u32) -> Range {
        Range {
            start_line: start,
            start_char: 0,
            end_line: end,
            end_char: 0,
        }
    }

    #[test]
    fn insert_is_idempotent() {
        let registry = SymbolRegistry::new();
        let n = node(NodeKind::Class, "a.A", "file:///a.py", span(0, 10));
        registry.insert(n.clone());
        registry.insert(n.clone());

        assert_eq!(registry.node_count(), 1);
        assert_eq!(registry.ids_for_uri("file:///a.py").len(), 1);
    }

    #[test]
    fn resolves_by_fqn() {
        let registry = SymbolRegistry::new();
        let n = node(NodeKind::Function, "a.run", "file:///a.py", span(3, 6));
        registry.insert(n.clone());

        assert_eq!(registry.resolve_fqn("a.run"), Some(n.id));
        assert_eq!(registry.resolve_fqn("a.missing"), None);
    }

    #[test]
    fn enclosing_prefers_narrowest() {
        let registry = SymbolRegistry::new();
        registry.insert(node(NodeKind::File, "a", "file:///a.py", span(0, 100)));
        registry.insert(node(NodeKind::Class, "a.A", "file:///a.py", span(0, 50)));
        registry.insert(node(NodeKind::Method, "a.A.m", "file:///a.py", span(10, 12)));

        let hit = registry
            .enclosing("file:///a.py", Position { line: 11, character: 0 })
            .unwrap();
        assert_eq!(hit.fully_qualified_name, "a.A.m");

        // Outside every symbol, fall back to the file node.
        let miss = registry
            .enclosing("file:///a.py", Position { line: 90, character: 0 })
            .unwrap();
        assert_eq!(miss.kind, NodeKind::File);
    }

    #[test]
    fn unknown_uri_has_no_enclosing() {
        let registry = SymbolRegistry::new();
        assert!(
            registry
                .enclosing("file:///other.py", Position::default())
                .is_none()
        );
    }

    #[test]
    fn clear_discards_everything() {
        let registry = SymbolRegistry::new();
        registry.insert(node(NodeKind::Class, "a.A", "file:///a.py", span(0, 5)));
        registry.clear();
        assert_eq!(registry.node_count(), 0);
        assert!(registry.ids_for_uri("file:///a.py").is_empty());
    }
}
