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

//! Per-language LSP server lifecycle: lazy spawn, fair sharing, failure
//! isolation, and bounded respawn.
//!
//! A language that keeps killing its server exhausts its respawn budget
//! (`MAX_RESPAWN` within a sliding window) and is declared unavailable;
//! waiters and later callers get [`LspError::Unavailable`] instead of a
//! client. Shutdown escalates: `shutdown`/`exit`, SIGTERM after a grace
//! period, then SIGKILL.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{info, warn};

use super::client::LspClient;
use crate::config::LaunchSpec;
use crate::error::LspError;

/// A leased client. Holding the lease holds one of the language's fairness
/// permits; drop it to let the next waiter in.
pub struct ClientLease {
    /// The shared client. Lock it for the duration of one request sequence
    /// (didOpen must stay ordered with the queries that follow it).
    pub client: Arc<Mutex<LspClient>>,
    _permit: OwnedSemaphorePermit,
}

struct PoolEntry {
    client: Option<Arc<Mutex<LspClient>>>,
    permits: Arc<Semaphore>,
    /// Timestamps of recent respawns, pruned to the sliding window.
    respawns: VecDeque<Instant>,
    /// Set once the respawn budget is spent; cleared after the window.
    unavailable_since: Option<Instant>,
}

/// Pool of language servers keyed by language id.
pub struct ServerPool {
    specs: HashMap<String, LaunchSpec>,
    root: PathBuf,
    request_timeout: Duration,
    max_servers_per_lang: usize,
    max_respawn: usize,
    respawn_window: Duration,
    entries: Mutex<HashMap<String, PoolEntry>>,
}

impl ServerPool {
    /// Creates a pool over the configured launch specs.
    #[must_use]
    pub fn new(
        specs: HashMap<String, LaunchSpec>,
        root: PathBuf,
        request_timeout: Duration,
        max_servers_per_lang: usize,
        max_respawn: usize,
        respawn_window: Duration,
    ) -> Self {
        Self {
            specs,
            root,
            request_timeout,
            max_servers_per_lang: max_servers_per_lang.max(1),
            max_respawn,
            respawn_window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// True if a launch spec exists for the language. Files in languages
    /// without one are graphed structurally but never sent to a server.
    #[must_use]
    pub fn has_server_for(&self, language: &str) -> bool {
        self.specs.contains_key(language)
    }

    /// Leases a client for `language`, spawning the server on first demand
    /// and respawning dead ones within budget.
    ///
    /// # Errors
    ///
    /// [`LspError::Unavailable`] when no spec exists or the respawn budget
    /// is exhausted; [`LspError::Spawn`] when launching fails.
    pub async fn lease(&self, language: &str) -> Result<ClientLease, LspError> {
        if !self.specs.contains_key(language) {
            return Err(LspError::Unavailable(language.to_string()));
        }

        // Take the language's fairness permit first; FIFO semaphore order
        // keeps queued callers fair.
        let permits = {
            let mut entries = self.entries.lock().await;
            let entry = entries.entry(language.to_string()).or_insert_with(|| PoolEntry {
                client: None,
                permits: Arc::new(Semaphore::new(self.max_servers_per_lang)),
                respawns: VecDeque::new(),
                unavailable_since: None,
            });
            entry.permits.clone()
        };
        let permit = permits
            .acquire_owned()
            .await
            .map_err(|_| LspError::Unavailable(language.to_string()))?;

        let mut entries = self.entries.lock().await;
        let entry = entries.get_mut(language).ok_or_else(|| {
            LspError::Unavailable(language.to_string())
        })?;

        if let Some(since) = entry.unavailable_since {
            if since.elapsed() < self.respawn_window {
                return Err(LspError::Unavailable(language.to_string()));
            }
            // Window passed; allow another attempt.
            entry.unavailable_since = None;
            entry.respawns.clear();
        }

        if let Some(client) = &entry.client {
            let is_alive = client.lock().await.is_alive();
            if is_alive {
                return Ok(ClientLease {
                    client: client.clone(),
                    _permit: permit,
                });
            }
            warn!("LSP server for {language} died, considering respawn");
            entry.client = None;
        }

        // Spawning counts against the budget only when it replaces an
        // earlier spawn inside the window.
        let now = Instant::now();
        while let Some(front) = entry.respawns.front() {
            if now.duration_since(*front) > self.respawn_window {
                entry.respawns.pop_front();
            } else {
                break;
            }
        }
        if entry.respawns.len() > self.max_respawn {
            warn!("respawn budget exhausted for {language}; marking unavailable");
            entry.unavailable_since = Some(now);
            return Err(LspError::Unavailable(language.to_string()));
        }
        entry.respawns.push_back(now);

        let spec = self.specs.get(language).ok_or_else(|| {
            LspError::Unavailable(language.to_string())
        })?;
        info!(
            "spawning LSP server for {language}: {} {}",
            spec.command,
            spec.args.join(" ")
        );
        let client = LspClient::spawn(language, spec, self.request_timeout)?;
        client.initialize(&self.root).await?;

        let client = Arc::new(Mutex::new(client));
        entry.client = Some(client.clone());

        Ok(ClientLease {
            client,
            _permit: permit,
        })
    }

    /// Sends `$/cancelRequest` for every in-flight request on every live
    /// server.
    pub async fn cancel_all(&self) {
        let clients = self.snapshot().await;
        for client in clients {
            client.lock().await.cancel_pending().await;
        }
    }

    /// Shuts every server down: polite `shutdown`/`exit` first, SIGTERM for
    /// whatever is still alive after `grace`, SIGKILL half a second later.
    pub async fn shutdown_all(&self, grace: Duration) {
        let clients = {
            let mut entries = self.entries.lock().await;
            let mut clients = Vec::new();
            for (language, mut entry) in entries.drain() {
                if let Some(client) = entry.client.take() {
                    info!("shutting down LSP server for {language}");
                    clients.push(client);
                }
            }
            clients
        };

        for client in &clients {
            let client = client.lock().await;
            if client.is_alive()
                && let Err(e) = tokio::time::timeout(Duration::from_secs(2), client.shutdown()).await
                    .unwrap_or_else(|_| Err(LspError::Protocol("shutdown timed out".to_string())))
            {
                warn!("graceful LSP shutdown failed: {e}");
            }
        }

        // Give servers the grace period to exit on their own.
        let deadline = Instant::now() + grace;
        loop {
            let mut all_dead = true;
            for client in &clients {
                if client.lock().await.is_alive() {
                    all_dead = false;
                    break;
                }
            }
            if all_dead || Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        for client in &clients {
            let client = client.lock().await;
            if client.is_alive() {
                warn!("LSP server (pid {:?}) ignored shutdown, sending SIGTERM", client.pid());
                client.terminate();
            }
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        for client in &clients {
            let client = client.lock().await;
            if client.is_alive() {
                warn!("LSP server (pid {:?}) survived SIGTERM, killing", client.pid());
                client.force_kill();
            }
        }
    }

    /// Languages with a live server right now.
    pub async fn active_languages(&self) -> Vec<String> {
        let entries = self.entries.lock().await;
        let mut languages = Vec::new();
        for (language, entry) in entries.iter() {
            if let Some(client) = &entry.client
                && client.lock().await.is_alive()
            {
                languages.push(language.clone());
            }
        }
        languages.sort();
        languages
    }

    async fn snapshot(&self) -> Vec<Arc<Mutex<LspClient>>> {
        let entries = self.entries.lock().await;
        entries.values().filter_map(|e| e.client.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "test fixtures")]

    use super::*;

    fn pool_with(specs: HashMap<String, LaunchSpec>) -> ServerPool {
        ServerPool::new(
            specs,
            std::env::temp_dir(),
            Duration::from_secs(5),
            1,
            3,
            Duration::from_secs(300),
        )
    }

    #[tokio::test]
    async fn unknown_language_is_unavailable() {
        let pool = pool_with(HashMap::new());
        let result = pool.lease("python").await;
        assert!(matches!(result, Err(LspError::Unavailable(_))));
    }

    #[tokio::test]
    async fn spawn_failure_surfaces_as_spawn_error() {
        let mut specs = HashMap::new();
        specs.insert(
            "python".to_string(),
            LaunchSpec {
                command: "/nonexistent/lsp-binary".to_string(),
                args: vec![],
                env: HashMap::new(),
                initialization_options: None,
            },
        );
        let pool = pool_with(specs);
        let result = pool.lease("python").await;
        assert!(matches!(result, Err(LspError::Spawn { .. })));
    }

    #[tokio::test]
    async fn repeated_spawn_failures_exhaust_the_budget() {
        let mut specs = HashMap::new();
        specs.insert(
            "python".to_string(),
            LaunchSpec {
                command: "/nonexistent/lsp-binary".to_string(),
                args: vec![],
                env: HashMap::new(),
                initialization_options: None,
            },
        );
        let pool = pool_with(specs);

        // Budget is 3 respawns beyond the first attempt; the fifth call must
        // come back Unavailable without trying to spawn.
        for _ in 0..4 {
            assert!(matches!(pool.lease("python").await, Err(LspError::Spawn { .. })));
        }
        assert!(matches!(pool.lease("python").await, Err(LspError::Unavailable(_))));
    }

    #[tokio::test]
    async fn has_server_for_reads_specs() {
        let mut specs = HashMap::new();
        specs.insert(
            "rust".to_string(),
            LaunchSpec {
                command: "rust-analyzer".to_string(),
                args: vec![],
                env: HashMap::new(),
                initialization_options: None,
            },
        );
        let pool = pool_with(specs);
        assert!(pool.has_server_for("rust"));
        assert!(!pool.has_server_for("python"));
    }
}
