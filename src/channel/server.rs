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

//! The bidirectional message channel.
//!
//! One connection, newline-delimited JSON frames, many subscriptions
//! multiplexed. A writer task owns the outbound half; per-subscription
//! forwarder tasks pump broker messages into it. A malformed frame earns an
//! `error` reply and costs nothing else; a stalled client is eventually
//! dropped by the broker, never by the pipeline.

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::types::{ClientMessage, ErrorType, ServerMessage};
use crate::broker::{BrokerMessage, SubscriptionBroker};
use crate::config::Config;
use crate::graph::mapper::SymbolMapper;
use crate::graph::model::{Project, SourceType};
use crate::job::{JobRegistry, JobStatus, StartOutcome};
use crate::lsp::ServerPool;
use crate::orchestrator::Orchestrator;
use crate::store::GraphStore;

/// Outbound frames queued before the writer task backpressures dispatch.
const OUTBOUND_QUEUE: usize = 256;

/// Depth used when snapshotting a completed project's graph.
const SNAPSHOT_DEPTH: u32 = 32;

/// Serves one client connection against the process singletons.
pub struct ChannelServer {
    config: Config,
    jobs: Arc<JobRegistry>,
    store: Arc<dyn GraphStore>,
    broker: Arc<SubscriptionBroker>,
}

impl ChannelServer {
    /// Wires a server onto the shared state.
    #[must_use]
    pub fn new(
        config: Config,
        jobs: Arc<JobRegistry>,
        store: Arc<dyn GraphStore>,
        broker: Arc<SubscriptionBroker>,
    ) -> Self {
        Self {
            config,
            jobs,
            store,
            broker,
        }
    }

    /// Runs the frame loop until the client disconnects.
    ///
    /// # Errors
    ///
    /// Returns an error if reading from the connection fails.
    pub async fn run<R, W>(&self, reader: R, writer: W) -> anyhow::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<ServerMessage>(OUTBOUND_QUEUE);

        let writer_task = tokio::spawn(async move {
            let mut writer = writer;
            while let Some(message) = rx.recv().await {
                let Ok(json) = serde_json::to_string(&message) else {
                    continue;
                };
                if writer.write_all(json.as_bytes()).await.is_err()
                    || writer.write_all(b"\n").await.is_err()
                    || writer.flush().await.is_err()
                {
                    break;
                }
            }
        });

        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ClientMessage>(&line) {
                Ok(message) => self.dispatch(message, &tx).await,
                Err(e) => {
                    debug!("malformed client frame: {e}");
                    let _ = tx
                        .send(ServerMessage::Error {
                            message: format!("malformed frame: {e}"),
                            error_type: ErrorType::ValueError,
                        })
                        .await;
                }
            }
        }

        info!("client disconnected");
        // Subscription forwarders may still hold senders; there is nobody
        // left to read what they produce.
        drop(tx);
        writer_task.abort();
        Ok(())
    }

    async fn dispatch(&self, message: ClientMessage, tx: &mpsc::Sender<ServerMessage>) {
        match message {
            ClientMessage::Ping => {
                let _ = tx.send(ServerMessage::Pong).await;
            }
            ClientMessage::StartAnalysis {
                project_id,
                analyzer_type,
            } => {
                self.handle_start(&project_id, &analyzer_type, tx).await;
            }
            ClientMessage::Subscribe {
                job_id,
                from_sequence,
            } => {
                self.handle_subscribe(&job_id, from_sequence, tx).await;
            }
            ClientMessage::Cancel { job_id } => {
                self.handle_cancel(&job_id, tx).await;
            }
        }
    }

    async fn handle_start(
        &self,
        project_id: &str,
        analyzer: &str,
        tx: &mpsc::Sender<ServerMessage>,
    ) {
        let Some(project_config) = self.config.project.get(project_id) else {
            let _ = tx
                .send(ServerMessage::Error {
                    message: format!("project not found: {project_id}"),
                    error_type: ErrorType::ProjectNotFoundError,
                })
                .await;
            return;
        };

        let project = Project {
            project_id: project_id.to_string(),
            name: project_config
                .name
                .clone()
                .unwrap_or_else(|| project_id.to_string()),
            root_path: project_config.root.clone(),
            source_type: if project_config.source_type == "zip" {
                SourceType::Zip
            } else {
                SourceType::Git
            },
        };

        // An already-completed analysis answers with the stored graph
        // instead of running again.
        if let Some(handle) = self.jobs.find(project_id, analyzer)
            && handle.status() == JobStatus::Completed
        {
            let snapshot = handle.snapshot();
            let graph_data = match SymbolMapper::new(&project) {
                Ok(mapper) => self
                    .store
                    .read_subgraph(&mapper.project_node().id, SNAPSHOT_DEPTH)
                    .await
                    .ok(),
                Err(_) => None,
            };
            let _ = tx
                .send(ServerMessage::StartAnalysisResponse {
                    job_id: snapshot.job_id,
                    status: JobStatus::Completed,
                    analysis_stats: snapshot.stats,
                    graph_data,
                })
                .await;
            return;
        }

        let outcome = self.jobs.start_analysis(project_id, analyzer);
        let handle = outcome.handle().clone();
        let snapshot = handle.snapshot();

        if let StartOutcome::Run(handle) = outcome {
            let slots = self.jobs.slots();
            let pool = Arc::new(ServerPool::new(
                self.config.server.clone(),
                project.root_path.clone(),
                self.config.lsp_request_timeout(),
                self.config.max_servers_per_lang,
                self.config.max_respawn,
                self.config.respawn_window(),
            ));
            let orchestrator = Orchestrator::new(
                project,
                handle,
                self.config.clone(),
                self.store.clone(),
                self.broker.clone(),
                pool,
            );
            tokio::spawn(async move {
                let Ok(_permit) = slots.acquire_owned().await else {
                    return;
                };
                if let Err(e) = orchestrator.run().await {
                    warn!("analysis run failed: {e}");
                }
            });
        }

        let _ = tx
            .send(ServerMessage::StartAnalysisResponse {
                job_id: snapshot.job_id,
                status: snapshot.status,
                analysis_stats: snapshot.stats,
                graph_data: None,
            })
            .await;
    }

    async fn handle_subscribe(
        &self,
        job_id: &str,
        from_sequence: Option<u64>,
        tx: &mpsc::Sender<ServerMessage>,
    ) {
        if self.jobs.get(job_id).is_none() {
            let _ = tx
                .send(ServerMessage::Error {
                    message: format!("job not found: {job_id}"),
                    error_type: ErrorType::JobNotFoundError,
                })
                .await;
            return;
        }

        let mut subscription = self.broker.subscribe(job_id, from_sequence);
        let _ = tx
            .send(ServerMessage::SubscribeResponse {
                job_id: job_id.to_string(),
                last_committed_sequence: self.broker.last_sequence(job_id),
            })
            .await;

        let tx = tx.clone();
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            while let Some(message) = subscription.recv().await {
                let terminal = matches!(message, BrokerMessage::JobEnded { .. });
                let frame = match message {
                    BrokerMessage::Batch(batch) => ServerMessage::BatchUpdate {
                        sequence: batch.sequence,
                        nodes: batch.nodes.clone(),
                        edges: batch.edges.clone(),
                        analysis_stats: batch.statistics.clone().unwrap_or_default(),
                    },
                    BrokerMessage::ResyncRequired { ring_floor } => ServerMessage::Error {
                        message: format!(
                            "requested sequence predates the replay buffer (floor {ring_floor}); \
                             re-query the graph store"
                        ),
                        error_type: ErrorType::ResyncRequired,
                    },
                    BrokerMessage::JobEnded { status, stats } => match status {
                        JobStatus::Completed => ServerMessage::AnalysisComplete {
                            job_id: job_id.clone(),
                            statistics: stats,
                        },
                        _ => ServerMessage::StatusUpdate {
                            status,
                            analysis_stats: stats,
                        },
                    },
                };
                if tx.send(frame).await.is_err() || terminal {
                    return;
                }
            }

            if subscription.dropped_for_slowness() {
                let _ = tx
                    .send(ServerMessage::Error {
                        message: format!("subscription to {job_id} dropped: slow consumer"),
                        error_type: ErrorType::SlowConsumer,
                    })
                    .await;
            }
        });
    }

    async fn handle_cancel(&self, job_id: &str, tx: &mpsc::Sender<ServerMessage>) {
        match self.jobs.cancel(job_id) {
            Ok(()) => {
                let status = self
                    .jobs
                    .get(job_id)
                    .map_or(JobStatus::Cancelled, |h| h.status());
                let stats = self
                    .jobs
                    .get(job_id)
                    .map(|h| h.snapshot().stats)
                    .unwrap_or_default();
                let _ = tx
                    .send(ServerMessage::StatusUpdate {
                        status,
                        analysis_stats: stats,
                    })
                    .await;
            }
            Err(e) => {
                let _ = tx
                    .send(ServerMessage::Error {
                        message: e.to_string(),
                        error_type: ErrorType::JobNotFoundError,
                    })
                    .await;
            }
        }
    }
}
