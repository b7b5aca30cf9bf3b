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

//! Layered configuration: defaults, then the user config directory, then an
//! explicit file, then `TRELLIS_*` environment variables. CLI flags merge
//! on top of the loaded result.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Concurrent orchestrator runs admitted process-wide.
    #[serde(default = "default_max_active_jobs")]
    pub max_active_jobs: usize,

    /// Analysis workers per job (default `min(8, cpu_count)`).
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Batch closes when it holds this many nodes.
    #[serde(default = "default_batch_nodes")]
    pub batch_nodes: usize,

    /// Batch closes when it holds this many edges.
    #[serde(default = "default_batch_edges")]
    pub batch_edges: usize,

    /// Batch closes after this long even when under the size limits.
    #[serde(default = "default_batch_interval_ms")]
    pub batch_interval_ms: u64,

    /// Per-file retry budget before a hard failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Deadline for every LSP request.
    #[serde(default = "default_lsp_request_timeout_secs")]
    pub lsp_request_timeout_secs: u64,

    /// Files above this size are not analyzed.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,

    /// Batches the broker keeps for replay, per job.
    #[serde(default = "default_broker_ring")]
    pub broker_ring: usize,

    /// Outbound buffer per subscriber before it counts as slow.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,

    /// Language server respawns tolerated inside the window.
    #[serde(default = "default_max_respawn")]
    pub max_respawn: usize,

    /// Sliding window for the respawn budget.
    #[serde(default = "default_respawn_window_secs")]
    pub respawn_window_secs: u64,

    /// Hot servers kept per language.
    #[serde(default = "default_max_servers_per_lang")]
    pub max_servers_per_lang: usize,

    /// Grace period for workers and servers to unwind on cancel/shutdown.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,

    /// Store transaction retry budget before the job fails.
    #[serde(default = "default_store_retries")]
    pub store_retries: u32,

    /// Server definitions keyed by language ID (e.g., "rust", "python").
    #[serde(default)]
    pub server: HashMap<String, LaunchSpec>,

    /// Projects available to `serve` mode, keyed by project id.
    #[serde(default)]
    pub project: HashMap<String, ProjectConfig>,
}

/// How to launch one language server.
#[derive(Debug, Deserialize, Clone)]
pub struct LaunchSpec {
    /// The command to execute (e.g., "rust-analyzer").
    pub command: String,

    /// Arguments to pass to the command.
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment for the child process.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Initialization options to pass to the LSP server.
    #[serde(default)]
    pub initialization_options: Option<serde_json::Value>,
}

/// A project the ingestion collaborator has already delivered to disk.
#[derive(Debug, Deserialize, Clone)]
pub struct ProjectConfig {
    /// Immutable filesystem root.
    pub root: PathBuf,

    /// Display name (defaults to the project id).
    #[serde(default)]
    pub name: Option<String>,

    /// "git" or "zip".
    #[serde(default = "default_source_type")]
    pub source_type: String,
}

const fn default_max_active_jobs() -> usize {
    4
}
fn default_workers() -> usize {
    num_cpus::get().min(8)
}
const fn default_batch_nodes() -> usize {
    200
}
const fn default_batch_edges() -> usize {
    400
}
const fn default_batch_interval_ms() -> u64 {
    500
}
const fn default_max_retries() -> u32 {
    3
}
const fn default_lsp_request_timeout_secs() -> u64 {
    30
}
const fn default_max_file_bytes() -> u64 {
    2 * 1024 * 1024
}
const fn default_broker_ring() -> usize {
    256
}
const fn default_subscriber_buffer() -> usize {
    64
}
const fn default_max_respawn() -> usize {
    3
}
const fn default_respawn_window_secs() -> u64 {
    300
}
const fn default_max_servers_per_lang() -> usize {
    1
}
const fn default_grace_secs() -> u64 {
    5
}
const fn default_store_retries() -> u32 {
    5
}
fn default_source_type() -> String {
    "git".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_active_jobs: default_max_active_jobs(),
            workers: default_workers(),
            batch_nodes: default_batch_nodes(),
            batch_edges: default_batch_edges(),
            batch_interval_ms: default_batch_interval_ms(),
            max_retries: default_max_retries(),
            lsp_request_timeout_secs: default_lsp_request_timeout_secs(),
            max_file_bytes: default_max_file_bytes(),
            broker_ring: default_broker_ring(),
            subscriber_buffer: default_subscriber_buffer(),
            max_respawn: default_max_respawn(),
            respawn_window_secs: default_respawn_window_secs(),
            max_servers_per_lang: default_max_servers_per_lang(),
            grace_secs: default_grace_secs(),
            store_retries: default_store_retries(),
            server: HashMap::new(),
            project: HashMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from standard paths or a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if a source fails to parse or deserialize.
    pub fn load(explicit_file: Option<PathBuf>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // 1. Load from user config directory (~/.config/trellis/config.toml)
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("trellis").join("config.toml");
            if config_path.exists() {
                builder = builder.add_source(config::File::from(config_path));
            }
        }

        // 2. Load from explicit file if provided
        if let Some(path) = explicit_file {
            builder = builder.add_source(config::File::from(path));
        }

        // 3. Load from environment variables (TRELLIS_MAX_RETRIES, etc.)
        builder = builder.add_source(config::Environment::with_prefix("TRELLIS"));

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// The per-request LSP deadline.
    #[must_use]
    pub const fn lsp_request_timeout(&self) -> Duration {
        Duration::from_secs(self.lsp_request_timeout_secs)
    }

    /// Time-based batch close threshold (floored at 1ms; a zero interval
    /// would spin the assembler).
    #[must_use]
    pub const fn batch_interval(&self) -> Duration {
        let ms = if self.batch_interval_ms == 0 { 1 } else { self.batch_interval_ms };
        Duration::from_millis(ms)
    }

    /// Respawn budget window.
    #[must_use]
    pub const fn respawn_window(&self) -> Duration {
        Duration::from_secs(self.respawn_window_secs)
    }

    /// Unwind grace for cancellation and shutdown.
    #[must_use]
    pub const fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "test fixtures")]

    use super::*;

    #[test]
    fn defaults_match_the_documented_knobs() {
        let config = Config::default();
        assert_eq!(config.max_active_jobs, 4);
        assert!(config.workers >= 1 && config.workers <= 8);
        assert_eq!(config.batch_nodes, 200);
        assert_eq!(config.batch_edges, 400);
        assert_eq!(config.batch_interval(), Duration::from_millis(500));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.lsp_request_timeout(), Duration::from_secs(30));
        assert_eq!(config.max_file_bytes, 2 * 1024 * 1024);
        assert_eq!(config.broker_ring, 256);
        assert_eq!(config.subscriber_buffer, 64);
        assert_eq!(config.max_respawn, 3);
        assert_eq!(config.respawn_window(), Duration::from_secs(300));
        assert_eq!(config.grace(), Duration::from_secs(5));
    }

    #[test]
    fn parses_server_and_project_tables() {
        let toml = r#"
            max_retries = 5

            [server.python]
            command = "pylsp"
            args = ["--check-parent-process"]

            [server.rust]
            command = "rust-analyzer"
            env = { RA_LOG = "error" }

            [project.demo]
            root = "/srv/projects/demo"
            name = "Demo"
            source_type = "zip"
        "#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.max_retries, 5);
        assert_eq!(config.server["python"].command, "pylsp");
        assert_eq!(config.server["rust"].env["RA_LOG"], "error");
        assert_eq!(config.project["demo"].source_type, "zip");
        assert_eq!(config.project["demo"].name.as_deref(), Some("Demo"));
        // Untouched knobs keep their defaults.
        assert_eq!(config.batch_nodes, 200);
    }
}
