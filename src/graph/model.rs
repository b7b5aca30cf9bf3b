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

//! Graph data model: typed nodes, edges, and the sequenced batch unit.
//!
//! Node identity is content-addressed: the same (project, kind, qualified
//! name, uri) always hashes to the same id, so concurrent workers and
//! re-runs agree on identity without coordination.

use lsp_types::SymbolKind;
use serde::{Deserialize, Serialize};

/// A 128-bit content-addressed node id, hex encoded.
pub type NodeId = String;

/// How the project reached the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Cloned from a git remote.
    Git,
    /// Unpacked from an uploaded archive.
    Zip,
}

/// An ingested repository, immutable for the duration of its jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Stable external identity.
    pub project_id: String,
    /// Display name.
    pub name: String,
    /// Filesystem root the walker starts from.
    pub root_path: std::path::PathBuf,
    /// How the root was produced.
    pub source_type: SourceType,
}

/// The closed set of node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// The repository root.
    Project,
    /// A source file.
    File,
    /// A build/config file.
    Config,
    /// A module (file-level or nested).
    Module,
    /// A namespace.
    Namespace,
    /// A package.
    Package,
    /// A class or struct.
    Class,
    /// An interface, trait, or protocol.
    Interface,
    /// An enum or its members.
    Enum,
    /// A free function.
    Function,
    /// A method or constructor.
    Method,
    /// A variable, field, or property.
    Variable,
    /// A constant.
    Constant,
    /// A parameter or type parameter.
    Parameter,
    /// An annotation or decorator.
    Annotation,
    /// An event.
    Event,
    /// An operator definition.
    Operator,
}

impl NodeKind {
    /// Canonical name, used in id hashing and wire frames.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Project => "Project",
            Self::File => "File",
            Self::Config => "Config",
            Self::Module => "Module",
            Self::Namespace => "Namespace",
            Self::Package => "Package",
            Self::Class => "Class",
            Self::Interface => "Interface",
            Self::Enum => "Enum",
            Self::Function => "Function",
            Self::Method => "Method",
            Self::Variable => "Variable",
            Self::Constant => "Constant",
            Self::Parameter => "Parameter",
            Self::Annotation => "Annotation",
            Self::Event => "Event",
            Self::Operator => "Operator",
        }
    }

    /// Maps an LSP `SymbolKind` into the closed node-kind set.
    #[must_use]
    pub const fn from_lsp(kind: SymbolKind) -> Self {
        match kind {
            SymbolKind::FILE => Self::File,
            SymbolKind::MODULE => Self::Module,
            SymbolKind::NAMESPACE => Self::Namespace,
            SymbolKind::PACKAGE => Self::Package,
            SymbolKind::CLASS | SymbolKind::STRUCT => Self::Class,
            SymbolKind::INTERFACE => Self::Interface,
            SymbolKind::ENUM | SymbolKind::ENUM_MEMBER => Self::Enum,
            SymbolKind::FUNCTION => Self::Function,
            SymbolKind::METHOD | SymbolKind::CONSTRUCTOR => Self::Method,
            SymbolKind::CONSTANT => Self::Constant,
            SymbolKind::TYPE_PARAMETER => Self::Parameter,
            SymbolKind::EVENT => Self::Event,
            SymbolKind::OPERATOR => Self::Operator,
            // Fields, properties, and literal-shaped symbols all land on
            // Variable.
            _ => Self::Variable,
        }
    }
}

/// A zero-based line/character position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Zero-based line.
    pub line: u32,
    /// Zero-based character offset within the line.
    pub character: u32,
}

impl From<lsp_types::Position> for Position {
    fn from(p: lsp_types::Position) -> Self {
        Self {
            line: p.line,
            character: p.character,
        }
    }
}

/// A source range in a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    /// First line of the range.
    pub start_line: u32,
    /// Character offset on the first line.
    pub start_char: u32,
    /// Last line of the range.
    pub end_line: u32,
    /// Character offset on the last line.
    pub end_char: u32,
}

impl Range {
    /// True if `pos` falls inside this range (inclusive bounds).
    #[must_use]
    pub fn contains(&self, pos: Position) -> bool {
        let after_start = pos.line > self.start_line
            || (pos.line == self.start_line && pos.character >= self.start_char);
        let before_end =
            pos.line < self.end_line || (pos.line == self.end_line && pos.character <= self.end_char);
        after_start && before_end
    }

    /// Number of spanned lines, for narrowest-range tie breaking.
    #[must_use]
    pub const fn line_span(&self) -> u32 {
        self.end_line.saturating_sub(self.start_line)
    }
}

impl From<lsp_types::Range> for Range {
    fn from(r: lsp_types::Range) -> Self {
        Self {
            start_line: r.start.line,
            start_char: r.start.character,
            end_line: r.end.line,
            end_char: r.end.character,
        }
    }
}

/// A code symbol in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeNode {
    /// Content-addressed identity.
    pub id: NodeId,
    /// Node kind.
    pub kind: NodeKind,
    /// Bare name.
    pub name: String,
    /// Dotted path from the module root.
    pub fully_qualified_name: String,
    /// Canonical `file://` uri of the containing file.
    pub uri: String,
    /// Source range of the symbol.
    pub range: Range,
}

/// The closed set of edge types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeType {
    /// Structural containment (forest rooted at the Project node).
    Contains,
    /// A use site of a symbol.
    References,
    /// Subclass relation.
    InheritsFrom,
    /// Interface/protocol implementation.
    Implements,
    /// Module import.
    Imports,
    /// Membership weaker than containment.
    PartOf,
    /// Build-level dependency.
    DependsOn,
    /// Call site.
    Calls,
    /// Method override.
    Overrides,
    /// Declared type of a value.
    HasType,
}

/// A directed, typed edge. Identity is the full triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    /// Source node id.
    pub source: NodeId,
    /// Target node id.
    pub target: NodeId,
    /// Edge type.
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
}

impl Edge {
    /// Builds an edge.
    #[must_use]
    pub const fn new(source: NodeId, target: NodeId, edge_type: EdgeType) -> Self {
        Self {
            source,
            target,
            edge_type,
        }
    }
}

/// What a batch announces about pipeline progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Structure-pass results for the listed files.
    StructureComplete,
    /// Reference-pass results for the listed files.
    ReferencesComplete,
    /// A file was abandoned after exhausting retries.
    Error,
    /// Terminal batch; the job is done.
    Complete,
}

/// Running counters carried on every batch and status frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisStats {
    /// Files fully processed so far.
    pub processed_files: u64,
    /// Files discovered for this job.
    pub total_files: u64,
    /// Nodes discovered so far.
    pub total_symbols: u64,
    /// Edges discovered so far.
    pub total_edges: u64,
    /// Most recent degradation, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A sequenced, atomic unit of graph updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchUpdate {
    /// Owning job.
    pub job_id: String,
    /// Monotonic per-job sequence, starting at 1.
    pub sequence: u64,
    /// Nodes discovered in this batch.
    pub nodes: Vec<CodeNode>,
    /// Edges discovered in this batch.
    pub edges: Vec<Edge>,
    /// Files completed by this batch.
    pub processed_files: Vec<String>,
    /// Files abandoned by this batch.
    pub failed_files: Vec<String>,
    /// Progress marker.
    pub status: BatchStatus,
    /// Counters at commit time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<AnalysisStats>,
}

/// Computes the content-addressed node id: the low 128 bits of
/// `blake3(project_id ␟ kind ␟ fqn ␟ uri)`, hex encoded.
#[must_use]
pub fn node_id(project_id: &str, kind: NodeKind, fqn: &str, uri: &str) -> NodeId {
    const SEP: [u8; 1] = [0x1F];
    let mut hasher = blake3::Hasher::new();
    hasher.update(project_id.as_bytes());
    hasher.update(&SEP);
    hasher.update(kind.as_str().as_bytes());
    hasher.update(&SEP);
    hasher.update(fqn.as_bytes());
    hasher.update(&SEP);
    hasher.update(uri.as_bytes());
    let hash = hasher.finalize();
    use std::fmt::Write;
    let mut id = String::with_capacity(32);
    for byte in &hash.as_bytes()[..16] {
        // Writing to a String cannot fail.
        let _ = write!(id, "{byte:02x}");
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_is_deterministic() {
        let a = node_id("proj", NodeKind::Class, "pkg.a.A", "file:///repo/pkg/a.py");
        let b = node_id("proj", NodeKind::Class, "pkg.a.A", "file:///repo/pkg/a.py");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn node_id_separates_fields() {
        // Without separators these two would collide.
        let a = node_id("p", NodeKind::Class, "ab", "c");
        let b = node_id("p", NodeKind::Class, "a", "bc");
        assert_ne!(a, b);
    }

    #[test]
    fn node_id_varies_by_kind() {
        let a = node_id("p", NodeKind::Class, "x", "u");
        let b = node_id("p", NodeKind::Interface, "x", "u");
        assert_ne!(a, b);
    }

    #[test]
    fn lsp_kind_mapping() {
        assert_eq!(NodeKind::from_lsp(SymbolKind::CLASS), NodeKind::Class);
        assert_eq!(NodeKind::from_lsp(SymbolKind::STRUCT), NodeKind::Class);
        assert_eq!(NodeKind::from_lsp(SymbolKind::METHOD), NodeKind::Method);
        assert_eq!(NodeKind::from_lsp(SymbolKind::FIELD), NodeKind::Variable);
        assert_eq!(NodeKind::from_lsp(SymbolKind::PROPERTY), NodeKind::Variable);
        assert_eq!(NodeKind::from_lsp(SymbolKind::TYPE_PARAMETER), NodeKind::Parameter);
    }

    #[test]
    fn range_contains() {
        let range = Range {
            start_line: 2,
            start_char: 4,
            end_line: 5,
            end_char: 0,
        };
        assert!(range.contains(Position { line: 3, character: 0 }));
        assert!(range.contains(Position { line: 2, character: 4 }));
        assert!(!range.contains(Position { line: 2, character: 3 }));
        assert!(!range.contains(Position { line: 6, character: 0 }));
    }

    #[test]
    fn edge_type_wire_format() {
        let json = serde_json::to_string(&EdgeType::InheritsFrom).unwrap_or_default();
        assert_eq!(json, "\"INHERITS_FROM\"");
    }

    #[test]
    fn edge_identity_is_the_triple() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(Edge::new("a".into(), "b".into(), EdgeType::References));
        set.insert(Edge::new("a".into(), "b".into(), EdgeType::References));
        set.insert(Edge::new("a".into(), "b".into(), EdgeType::Calls));
        assert_eq!(set.len(), 2);
    }
}
