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

//! Trellis turns a source repository into a streaming knowledge graph.
//!
//! It walks the repo, drives a pool of LSP servers over JSON-RPC to extract
//! symbols and references, maps them into typed nodes and edges with
//! deterministic identity, and streams sequenced batches to subscribers
//! over a bidirectional message channel, checkpointing after every commit
//! so interrupted jobs resume where they left off.

/// Per-job batch fan-out to subscribers.
pub mod broker;
/// The client-facing message channel.
pub mod channel;
/// Durable per-job progress snapshots.
pub mod checkpoint;
/// Layered configuration for servers, projects, and pipeline knobs.
pub mod config;
/// Error taxonomy.
pub mod error;
/// Graph data model, symbol mapping, and the in-memory registry.
pub mod graph;
/// Job state machine and process-wide registry.
pub mod job;
/// Language detection.
pub mod lang;
/// LSP client implementation and server pool.
pub mod lsp;
/// The two-pass analysis pipeline.
pub mod orchestrator;
/// Priority work queue feeding analysis workers.
pub mod queue;
/// Pluggable graph persistence.
pub mod store;
/// Repository enumeration and filtering.
pub mod walker;
