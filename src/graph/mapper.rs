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

//! Deterministic transform from LSP result sets to graph entities.
//!
//! The mapper is a pure function of its inputs: identical symbols from
//! identical files always produce identical node ids and edge triples, so
//! concurrent workers never need to coordinate on identity.

use lsp_types::{DocumentSymbol, DocumentSymbolResponse, Location, SymbolInformation};
use std::collections::HashMap;
use std::path::Path;
use url::Url;

use crate::error::AnalysisError;
use crate::graph::model::{
    CodeNode, Edge, EdgeType, NodeId, NodeKind, Position, Project, Range, node_id,
};
use crate::graph::registry::SymbolRegistry;
use crate::lang;

/// Everything derived from one file's structure pass.
#[derive(Debug, Default)]
pub struct FileMapping {
    /// Nodes for the file, its module, and every symbol.
    pub nodes: Vec<CodeNode>,
    /// CONTAINS edges wiring the nodes into the forest.
    pub edges: Vec<Edge>,
    /// Top-level import-like symbols, resolved to IMPORTS edges in pass 2:
    /// (importing module node, imported name).
    pub import_candidates: Vec<(NodeId, String)>,
}

/// Maps LSP symbols, references, and implementations into graph entities.
pub struct SymbolMapper {
    project_id: String,
    project_node: CodeNode,
    root_uri: String,
}

impl SymbolMapper {
    /// Builds a mapper for a project.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::Fatal`] if the project root cannot be
    /// expressed as a `file://` uri.
    pub fn new(project: &Project) -> Result<Self, AnalysisError> {
        let root_url = Url::from_directory_path(&project.root_path).map_err(|()| {
            AnalysisError::Fatal(format!(
                "project root is not an absolute path: {}",
                project.root_path.display()
            ))
        })?;
        let root_uri = root_url.as_str().trim_end_matches('/').to_string();

        let id = node_id(&project.project_id, NodeKind::Project, &project.project_id, &root_uri);
        let project_node = CodeNode {
            id,
            kind: NodeKind::Project,
            name: project.name.clone(),
            fully_qualified_name: project.project_id.clone(),
            uri: root_uri.clone(),
            range: Range::default(),
        };

        Ok(Self {
            project_id: project.project_id.clone(),
            project_node,
            root_uri,
        })
    }

    /// The root node every CONTAINS path leads to.
    #[must_use]
    pub fn project_node(&self) -> &CodeNode {
        &self.project_node
    }

    /// Canonical `file://` uri for a path under the project root.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::Mapper`] for non-absolute paths.
    pub fn file_uri(&self, path: &Path) -> Result<String, AnalysisError> {
        Url::from_file_path(path)
            .map(|u| u.as_str().to_string())
            .map_err(|()| AnalysisError::Mapper(format!("unmappable path: {}", path.display())))
    }

    /// True if a uri points inside the project root.
    #[must_use]
    pub fn inside_project(&self, uri: &str) -> bool {
        uri.strip_prefix(&self.root_uri)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }

    /// The module name for a file, by language rule: Python uses the dotted
    /// package path from the project root (`pkg/a.py` → `pkg.a`,
    /// `pkg/__init__.py` → `pkg`); every other language uses the file stem.
    #[must_use]
    pub fn module_path(&self, path: &Path, language: &str) -> String {
        let relative = self.relative(path);

        if language == "python" {
            let mut parts: Vec<&str> = relative.split('/').collect();
            if let Some(last) = parts.last_mut() {
                if *last == "__init__.py" {
                    parts.pop();
                } else {
                    *last = last.strip_suffix(".py").unwrap_or(last);
                }
            }
            if parts.is_empty() {
                // __init__.py at the repository root.
                return self.project_id.clone();
            }
            return parts.join(".");
        }

        Path::new(&relative)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&relative)
            .to_string()
    }

    /// Maps one file's `documentSymbol` response (possibly absent, for
    /// config files and languages without a server) into nodes and edges.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::Mapper`] if the file uri cannot be built.
    pub fn map_file(
        &self,
        path: &Path,
        language: &str,
        symbols: Option<DocumentSymbolResponse>,
    ) -> Result<FileMapping, AnalysisError> {
        let uri = self.file_uri(path)?;
        let relative = self.relative(path);
        let mut mapping = FileMapping::default();

        let file_kind = if language == lang::CONFIG_LANGUAGE {
            NodeKind::Config
        } else {
            NodeKind::File
        };
        let file_node = self.make_node(
            file_kind,
            path.file_name().and_then(|n| n.to_str()).unwrap_or(&relative),
            &relative,
            &uri,
            Range::default(),
        );
        mapping.edges.push(Edge::new(
            self.project_node.id.clone(),
            file_node.id.clone(),
            EdgeType::Contains,
        ));

        // Config files carry no module or symbols.
        if file_kind == NodeKind::Config {
            mapping.nodes.push(file_node);
            return Ok(mapping);
        }

        let module_fqn = self.module_path(path, language);
        let module_name = module_fqn.rsplit('.').next().unwrap_or(&module_fqn).to_string();
        // The module spans the whole file, so any position that lands in no
        // narrower symbol still attributes to it.
        let module_range = Range {
            start_line: 0,
            start_char: 0,
            end_line: u32::MAX,
            end_char: 0,
        };
        let module_node =
            self.make_node(NodeKind::Module, &module_name, &module_fqn, &uri, module_range);
        mapping.edges.push(Edge::new(
            file_node.id.clone(),
            module_node.id.clone(),
            EdgeType::Contains,
        ));

        match symbols {
            Some(DocumentSymbolResponse::Nested(symbols)) => {
                for symbol in symbols {
                    self.map_nested(&symbol, &module_fqn, &module_node, &uri, true, &mut mapping);
                }
            }
            Some(DocumentSymbolResponse::Flat(symbols)) => {
                self.map_flat(&symbols, &module_fqn, &module_node, &uri, &mut mapping);
            }
            None => {}
        }

        mapping.nodes.push(file_node);
        mapping.nodes.push(module_node);
        Ok(mapping)
    }

    /// One reference location → one edge onto `target`, or `None` when the
    /// location falls outside the project, cannot be attributed, or is the
    /// symbol referring to itself. Callable targets get CALLS, everything
    /// else REFERENCES.
    #[must_use]
    pub fn map_reference(
        &self,
        target: &CodeNode,
        location: &Location,
        registry: &SymbolRegistry,
    ) -> Option<Edge> {
        let uri = location.uri.as_str();
        if !self.inside_project(uri) {
            return None;
        }
        let pos = Position::from(location.range.start);
        let source = registry.enclosing(uri, pos)?;
        if source.id == target.id {
            return None;
        }
        let edge_type = match target.kind {
            NodeKind::Function | NodeKind::Method => EdgeType::Calls,
            _ => EdgeType::References,
        };
        Some(Edge::new(source.id, target.id.clone(), edge_type))
    }

    /// One implementation location → an IMPLEMENTS or INHERITS_FROM edge
    /// from the implementing symbol to `target`. Class targets read as base
    /// classes; anything else defaults to IMPLEMENTS.
    #[must_use]
    pub fn map_implementation(
        &self,
        target: &CodeNode,
        location: &Location,
        registry: &SymbolRegistry,
    ) -> Option<Edge> {
        let uri = location.uri.as_str();
        if !self.inside_project(uri) {
            return None;
        }
        let pos = Position::from(location.range.start);
        let source = registry.enclosing(uri, pos)?;
        if source.id == target.id {
            return None;
        }
        let edge_type = match target.kind {
            NodeKind::Class => EdgeType::InheritsFrom,
            _ => EdgeType::Implements,
        };
        Some(Edge::new(source.id, target.id.clone(), edge_type))
    }

    fn map_nested(
        &self,
        symbol: &DocumentSymbol,
        parent_fqn: &str,
        parent: &CodeNode,
        uri: &str,
        top_level: bool,
        mapping: &mut FileMapping,
    ) {
        let name = symbol.name.trim();
        if name.is_empty() {
            // Malformed symbol: skip it (and its children), keep the file.
            tracing::debug!("skipping unnamed symbol in {uri}");
            return;
        }

        let kind = NodeKind::from_lsp(symbol.kind);

        // Top-level module-like symbols that are not this file's own module
        // are import statements surfaced by the server.
        if top_level
            && matches!(kind, NodeKind::Module | NodeKind::Namespace | NodeKind::Package)
            && name != parent.name
        {
            mapping.import_candidates.push((parent.id.clone(), name.to_string()));
            return;
        }

        let fqn = format!("{parent_fqn}.{name}");
        let node = self.make_node(kind, name, &fqn, uri, Range::from(symbol.range));
        mapping
            .edges
            .push(Edge::new(parent.id.clone(), node.id.clone(), EdgeType::Contains));

        if let Some(children) = &symbol.children {
            for child in children {
                self.map_nested(child, &fqn, &node, uri, false, mapping);
            }
        }
        mapping.nodes.push(node);
    }

    /// Flat responses carry container names instead of nesting; resolve
    /// each container against symbols already seen, falling back to the
    /// module node.
    fn map_flat(
        &self,
        symbols: &[SymbolInformation],
        module_fqn: &str,
        module_node: &CodeNode,
        uri: &str,
        mapping: &mut FileMapping,
    ) {
        let mut by_name: HashMap<String, (NodeId, String)> = HashMap::new();

        for symbol in symbols {
            let name = symbol.name.trim();
            if name.is_empty() {
                tracing::debug!("skipping unnamed symbol in {uri}");
                continue;
            }
            let kind = NodeKind::from_lsp(symbol.kind);

            let container = symbol.container_name.as_deref().filter(|c| !c.is_empty());
            if container.is_none()
                && matches!(kind, NodeKind::Module | NodeKind::Namespace | NodeKind::Package)
                && name != module_node.name
            {
                mapping
                    .import_candidates
                    .push((module_node.id.clone(), name.to_string()));
                continue;
            }

            let (parent_id, parent_fqn) = container
                .and_then(|c| by_name.get(c).cloned())
                .unwrap_or_else(|| (module_node.id.clone(), module_fqn.to_string()));

            let fqn = format!("{parent_fqn}.{name}");
            let node =
                self.make_node(kind, name, &fqn, uri, Range::from(symbol.location.range));
            mapping
                .edges
                .push(Edge::new(parent_id, node.id.clone(), EdgeType::Contains));
            by_name.insert(name.to_string(), (node.id.clone(), fqn));
            mapping.nodes.push(node);
        }
    }

    fn make_node(&self, kind: NodeKind, name: &str, fqn: &str, uri: &str, range: Range) -> CodeNode {
        CodeNode {
            id: node_id(&self.project_id, kind, fqn, uri),
            kind,
            name: name.to_string(),
            fully_qualified_name: fqn.to_string(),
            uri: uri.to_string(),
            range,
        }
    }

    fn relative(&self, path: &Path) -> String {
        self.file_uri(path)
            .ok()
            .and_then(|uri| {
                uri.strip_prefix(&self.root_uri)
                    .map(|r| r.trim_start_matches('/').to_string())
            })
            .unwrap_or_else(|| path.display().to_string())
    }
}
