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

//! The two-pass analysis pipeline: Init → Discovery → Structure →
//! References → Finalize.
//!
//! Workers pop files and produce per-file results; a single assembler task
//! folds them into sequenced batches. Each batch is applied to the store,
//! then checkpointed, then published — in that order. A crash between apply
//! and checkpoint replays exactly one batch on resume, which the store's
//! idempotent upserts absorb.

use dashmap::DashMap;
use lsp_types::{
    DidOpenTextDocumentParams, DocumentSymbolParams, GotoDefinitionParams, GotoDefinitionResponse,
    Location, PartialResultParams, ReferenceContext, ReferenceParams, TextDocumentIdentifier,
    TextDocumentItem, TextDocumentPositionParams, Uri, WorkDoneProgressParams,
};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::broker::SubscriptionBroker;
use crate::checkpoint::{Checkpoint, CheckpointManager, Pass};
use crate::config::Config;
use crate::error::{AnalysisError, StoreError};
use crate::graph::mapper::SymbolMapper;
use crate::graph::model::{
    BatchStatus, BatchUpdate, CodeNode, Edge, EdgeType, NodeId, NodeKind, Position, Project,
};
use crate::graph::registry::SymbolRegistry;
use crate::job::{JobHandle, JobStatus};
use crate::lsp::ServerPool;
use crate::queue::{Pop, WorkItem, WorkQueue};
use crate::store::GraphStore;
use crate::walker::{FileDescriptor, FileWalker};

/// How long a worker waits on an empty queue before re-checking for close.
const POP_DEADLINE: Duration = Duration::from_millis(200);

/// Symbol kinds worth a reference query in pass 2.
const fn is_referenceable(node: &CodeNode) -> bool {
    matches!(
        node.kind,
        NodeKind::Class | NodeKind::Interface | NodeKind::Enum | NodeKind::Function | NodeKind::Method
    )
}

/// Kinds whose implementations are worth querying.
const fn has_implementations(node: &CodeNode) -> bool {
    matches!(node.kind, NodeKind::Class | NodeKind::Interface)
}

/// What one worker produced for one file.
enum WorkerEvent {
    Done {
        path: String,
        nodes: Vec<CodeNode>,
        edges: Vec<Edge>,
    },
    Failed {
        item: WorkItem,
        error: String,
        position: Option<Position>,
        transient: bool,
    },
}

/// How a run ended, short of an error.
enum RunEnd {
    Completed,
    Cancelled,
}

/// Drives one job end to end.
pub struct Orchestrator {
    project: Project,
    job: Arc<JobHandle>,
    config: Config,
    store: Arc<dyn GraphStore>,
    broker: Arc<SubscriptionBroker>,
    pool: Arc<ServerPool>,
    registry: Arc<SymbolRegistry>,
    /// uri → import candidates collected in pass 1, resolved in pass 2.
    imports: Arc<DashMap<String, Vec<(NodeId, String)>>>,
}

impl Orchestrator {
    /// Wires an orchestrator onto the process singletons.
    #[must_use]
    pub fn new(
        project: Project,
        job: Arc<JobHandle>,
        config: Config,
        store: Arc<dyn GraphStore>,
        broker: Arc<SubscriptionBroker>,
        pool: Arc<ServerPool>,
    ) -> Self {
        Self {
            project,
            job,
            config,
            store,
            broker,
            pool,
            registry: Arc::new(SymbolRegistry::new()),
            imports: Arc::new(DashMap::new()),
        }
    }

    /// Runs the full pipeline, updating job state and notifying the broker
    /// however it ends. Per-file trouble never surfaces here; only fatal
    /// errors do.
    ///
    /// # Errors
    ///
    /// Returns the fatal error after marking the job failed (checkpoint
    /// preserved for resume).
    pub async fn run(&self) -> Result<(), AnalysisError> {
        let job_id = self.job.job_id();
        self.job.transition(JobStatus::Running)?;
        info!("job {job_id}: analysis starting for project {}", self.project.project_id);

        let result = self.execute().await;
        let stats = self.job.snapshot().stats;

        // The registry is job-scoped; drop its contents however we ended.
        self.registry.clear();
        self.imports.clear();
        self.pool.shutdown_all(self.config.grace()).await;

        match result {
            Ok(RunEnd::Completed) => {
                self.job.transition(JobStatus::Completed)?;
                self.broker.publish_ended(&job_id, JobStatus::Completed, stats);
                info!("job {job_id}: completed");
                Ok(())
            }
            Ok(RunEnd::Cancelled) => {
                self.job.transition(JobStatus::Cancelled)?;
                self.broker.publish_ended(&job_id, JobStatus::Cancelled, stats);
                info!("job {job_id}: cancelled");
                Ok(())
            }
            Err(e) => {
                warn!("job {job_id}: failed: {e}");
                self.job.set_error(&e.to_string());
                let _ = self.job.transition(JobStatus::Failed);
                let stats = self.job.snapshot().stats;
                self.broker.publish_ended(&job_id, JobStatus::Failed, stats);
                Err(e)
            }
        }
    }

    async fn execute(&self) -> Result<RunEnd, AnalysisError> {
        let job_id = self.job.job_id();
        let checkpoints = CheckpointManager::new(self.store.clone());
        let mut checkpoint = checkpoints.resume(&job_id).await.map_err(AnalysisError::Store)?;
        let resumed = checkpoint.last_committed_sequence > 0;
        if resumed {
            info!(
                "job {job_id}: resuming at pass {:?}, sequence {}",
                checkpoint.pass, checkpoint.last_committed_sequence
            );
        }

        self.store
            .ensure_project(&self.project)
            .await
            .map_err(AnalysisError::Store)?;
        let mapper = Arc::new(SymbolMapper::new(&self.project)?);

        // Discovery.
        let walker = FileWalker::new(&self.project.root_path, self.config.max_file_bytes)
            .map_err(|e| AnalysisError::Fatal(e.to_string()))?;
        let files = tokio::task::spawn_blocking(move || walker.discover())
            .await
            .map_err(|e| AnalysisError::Fatal(format!("discovery task died: {e}")))?
            .map_err(|e| AnalysisError::Fatal(e.to_string()))?;
        let total_files = files.len() as u64;
        debug!("job {job_id}: discovered {total_files} files");

        let mut stats = self.job.snapshot().stats;
        stats.total_files = total_files;
        self.job.set_stats(stats);

        // Pass 1 — structure.
        if checkpoint.pass == Pass::Structure {
            self.job.set_pass(Pass::Structure);
            let items = plan_items(&files, &checkpoint, self.config.max_retries);
            let end = self
                .run_pass(Pass::Structure, items, &mapper, &checkpoints, &mut checkpoint)
                .await?;
            if matches!(end, RunEnd::Cancelled) {
                return Ok(RunEnd::Cancelled);
            }

            checkpoint.begin_references_pass();
            checkpoints
                .persist(&mut checkpoint)
                .await
                .map_err(AnalysisError::Store)?;
        }

        // Pass 2 — references. The registry must cover every analyzable
        // file before the first query, or cross-file reference targets
        // cannot be attributed; after a resume it starts empty.
        if checkpoint.pass == Pass::References {
            self.job.set_pass(Pass::References);
            self.warm_registry(&files, &mapper, &checkpoint).await;

            let items = plan_items(&files, &checkpoint, self.config.max_retries);
            let end = self
                .run_pass(Pass::References, items, &mapper, &checkpoints, &mut checkpoint)
                .await?;
            if matches!(end, RunEnd::Cancelled) {
                return Ok(RunEnd::Cancelled);
            }

            checkpoint.finish();
            checkpoints
                .persist(&mut checkpoint)
                .await
                .map_err(AnalysisError::Store)?;
        }

        // Finalize: terminal batch with statistics.
        self.job.set_pass(Pass::Done);
        let sequence = checkpoint.last_committed_sequence + 1;
        let stats = self.job.snapshot().stats;
        let terminal = BatchUpdate {
            job_id: job_id.clone(),
            sequence,
            // The project root travels with every batch that mentions it;
            // carrying it here too covers repositories with no files.
            nodes: vec![mapper.project_node().clone()],
            edges: vec![],
            processed_files: vec![],
            failed_files: vec![],
            status: BatchStatus::Complete,
            statistics: Some(stats),
        };
        self.apply_with_retry(&terminal).await?;
        checkpoints
            .commit(&mut checkpoint, sequence)
            .await
            .map_err(AnalysisError::Store)?;
        self.broker.publish(Arc::new(terminal));

        Ok(RunEnd::Completed)
    }

    /// Runs one pass: spawns workers over a fresh queue and assembles their
    /// output into batches until every planned file is accounted for.
    async fn run_pass(
        &self,
        pass: Pass,
        items: Vec<WorkItem>,
        mapper: &Arc<SymbolMapper>,
        checkpoints: &CheckpointManager,
        checkpoint: &mut Checkpoint,
    ) -> Result<RunEnd, AnalysisError> {
        let mut remaining = items.len();
        if remaining == 0 {
            return Ok(RunEnd::Completed);
        }
        info!("job {}: pass {:?} over {remaining} files", self.job.job_id(), pass);

        let queue = Arc::new(WorkQueue::new());
        for item in items {
            queue.push(item);
        }

        let worker_count = self.config.workers.max(1);
        let (tx, mut rx) = mpsc::channel::<WorkerEvent>(worker_count * 2);
        let mut workers = Vec::new();
        for _ in 0..worker_count {
            let queue = queue.clone();
            let tx = tx.clone();
            let pool = self.pool.clone();
            let mapper = mapper.clone();
            let registry = self.registry.clone();
            let imports = self.imports.clone();
            workers.push(tokio::spawn(async move {
                worker_loop(pass, &queue, &tx, &pool, &mapper, &registry, &imports).await;
            }));
        }
        drop(tx);

        let batch_status = match pass {
            Pass::Structure => BatchStatus::StructureComplete,
            _ => BatchStatus::ReferencesComplete,
        };

        let mut batch = PendingBatch::default();
        let mut interval = tokio::time::interval(self.config.batch_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut cancelled = false;

        while remaining > 0 {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    match event {
                        WorkerEvent::Done { path, nodes, edges } => {
                            checkpoint.record_processed(&path);
                            batch.absorb(&path, nodes, edges);
                            remaining -= 1;
                        }
                        WorkerEvent::Failed { item, error, position, transient } => {
                            let path = item.file.path.display().to_string();
                            let retries = checkpoint.record_failure(&path, &error, position);
                            if transient && retries < self.config.max_retries {
                                debug!("retrying {path} (attempt {})", retries + 1);
                                let mut retry = item;
                                retry.retry_count = retries;
                                retry.resume_position = checkpoint
                                    .failed_files
                                    .get(&path)
                                    .and_then(|f| f.last_position);
                                queue.push(retry);
                            } else {
                                warn!("giving up on {path}: {error}");
                                self.job.set_error(&format!("{path}: {error}"));
                                batch.failed.push(path);
                                remaining -= 1;
                                // Hard failures flush immediately so
                                // subscribers hear about them.
                                self.flush(
                                    &mut batch,
                                    BatchStatus::Error,
                                    checkpoints,
                                    checkpoint,
                                )
                                .await?;
                            }
                        }
                    }
                    if batch.nodes.len() >= self.config.batch_nodes
                        || batch.edges.len() >= self.config.batch_edges
                    {
                        self.flush(&mut batch, batch_status, checkpoints, checkpoint).await?;
                    }
                }
                _ = interval.tick() => {
                    self.flush(&mut batch, batch_status, checkpoints, checkpoint).await?;
                }
                () = self.job.cancelled() => {
                    cancelled = true;
                    break;
                }
            }
        }

        // Queue drained (or cancel): stop workers, commit the remainder.
        queue.close();
        if cancelled {
            self.pool.cancel_all().await;
        }
        let grace = self.config.grace();
        for mut worker in workers {
            if tokio::time::timeout(grace, &mut worker).await.is_err() {
                warn!("worker did not unwind within grace period, aborting it");
                worker.abort();
            }
        }

        if cancelled {
            // No further batches after cancel; the checkpoint already
            // reflects the last committed sequence.
            return Ok(RunEnd::Cancelled);
        }
        if remaining > 0 {
            return Err(AnalysisError::Fatal(format!(
                "{remaining} files unaccounted for after workers exited"
            )));
        }

        self.flush(&mut batch, batch_status, checkpoints, checkpoint).await?;
        Ok(RunEnd::Completed)
    }

    /// Commits and publishes the pending batch, if it holds anything:
    /// apply → checkpoint → publish, in that order.
    async fn flush(
        &self,
        batch: &mut PendingBatch,
        status: BatchStatus,
        checkpoints: &CheckpointManager,
        checkpoint: &mut Checkpoint,
    ) -> Result<(), AnalysisError> {
        if batch.is_empty() {
            return Ok(());
        }
        let taken = std::mem::take(batch);

        let mut stats = self.job.snapshot().stats;
        stats.processed_files = checkpoint.processed_files.len() as u64;
        stats.total_symbols = self.registry.node_count() as u64;
        stats.total_edges += taken.edges.len() as u64;
        self.job.set_stats(stats.clone());

        let sequence = checkpoint.last_committed_sequence + 1;
        let update = BatchUpdate {
            job_id: self.job.job_id(),
            sequence,
            nodes: taken.nodes,
            edges: taken.edges,
            processed_files: taken.processed,
            failed_files: taken.failed,
            status,
            statistics: Some(stats),
        };

        self.apply_with_retry(&update).await?;
        checkpoints
            .commit(checkpoint, sequence)
            .await
            .map_err(AnalysisError::Store)?;
        self.broker.publish(Arc::new(update));
        Ok(())
    }

    /// Applies a batch with exponential backoff. Exhausting the budget
    /// fails the job.
    async fn apply_with_retry(&self, batch: &BatchUpdate) -> Result<(), AnalysisError> {
        let mut attempt = 0u32;
        loop {
            match self.store.apply_batch(batch).await {
                Ok(()) => return Ok(()),
                Err(e @ StoreError::SequenceConflict { .. }) => {
                    return Err(AnalysisError::Store(e));
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.config.store_retries {
                        return Err(AnalysisError::Store(e));
                    }
                    let backoff = Duration::from_millis(50 * (1 << attempt.min(6)));
                    warn!(
                        "store rejected batch {} (attempt {attempt}): {e}; retrying in {backoff:?}",
                        batch.sequence
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Rebuilds registry coverage for every file missing from it. A no-op
    /// on uninterrupted runs; after a resume it restores the in-memory
    /// index the reference pass depends on.
    async fn warm_registry(
        &self,
        files: &[FileDescriptor],
        mapper: &Arc<SymbolMapper>,
        checkpoint: &Checkpoint,
    ) {
        for file in files {
            let path_str = file.path.display().to_string();
            if checkpoint.retry_count(&path_str) >= self.config.max_retries {
                continue;
            }
            let Ok(uri) = mapper.file_uri(&file.path) else {
                continue;
            };
            if !self.registry.ids_for_uri(&uri).is_empty() {
                continue;
            }
            match fetch_structure(&self.pool, mapper, &file.path, file.language).await
            {
                Ok(mapping) => {
                    register_mapping(&self.registry, &self.imports, &uri, &mapping);
                }
                Err(e) => {
                    debug!("registry warm-up skipped {path_str}: {e}");
                }
            }
        }
    }
}

/// Builds the queue contents for a pass: everything not yet processed and
/// not hard-failed, with retry state carried over from the checkpoint.
fn plan_items(
    files: &[FileDescriptor],
    checkpoint: &Checkpoint,
    max_retries: u32,
) -> Vec<WorkItem> {
    files
        .iter()
        .filter(|f| {
            let path = f.path.display().to_string();
            !checkpoint.processed_files.contains(&path)
                && checkpoint.retry_count(&path) < max_retries
        })
        .map(|f| {
            let path = f.path.display().to_string();
            let mut item = WorkItem::new(f.clone());
            if let Some(failed) = checkpoint.failed_files.get(&path) {
                item.retry_count = failed.retry_count;
                item.resume_position = failed.last_position;
            }
            item
        })
        .collect()
}

/// Accumulating batch state owned by the assembler.
#[derive(Default)]
struct PendingBatch {
    nodes: Vec<CodeNode>,
    edges: Vec<Edge>,
    processed: Vec<String>,
    failed: Vec<String>,
    seen_edges: HashSet<Edge>,
}

impl PendingBatch {
    fn absorb(&mut self, path: &str, nodes: Vec<CodeNode>, edges: Vec<Edge>) {
        self.processed.push(path.to_string());
        self.nodes.extend(nodes);
        for edge in edges {
            if self.seen_edges.insert(edge.clone()) {
                self.edges.push(edge);
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.nodes.is_empty()
            && self.edges.is_empty()
            && self.processed.is_empty()
            && self.failed.is_empty()
    }
}

#[allow(clippy::too_many_arguments, reason = "worker context is spelled out at the spawn site")]
async fn worker_loop(
    pass: Pass,
    queue: &WorkQueue,
    tx: &mpsc::Sender<WorkerEvent>,
    pool: &Arc<ServerPool>,
    mapper: &Arc<SymbolMapper>,
    registry: &Arc<SymbolRegistry>,
    imports: &Arc<DashMap<String, Vec<(NodeId, String)>>>,
) {
    loop {
        let item = match queue.pop(POP_DEADLINE).await {
            Pop::Item(item) => item,
            Pop::TimedOut => {
                if tx.is_closed() {
                    break;
                }
                continue;
            }
            Pop::Closed => break,
        };

        let mut progress: Option<Position> = None;
        let result = match pass {
            Pass::Structure => {
                analyze_structure(pool, mapper, registry, imports, &item).await
            }
            _ => {
                analyze_references(pool, mapper, registry, imports, &item, &mut progress).await
            }
        };

        let event = match result {
            Ok((nodes, edges)) => WorkerEvent::Done {
                path: item.file.path.display().to_string(),
                nodes,
                edges,
            },
            Err(e) => {
                let transient = match &e {
                    AnalysisError::Lsp(lsp) => lsp.is_transient(),
                    _ => false,
                };
                WorkerEvent::Failed {
                    error: e.to_string(),
                    position: progress,
                    transient,
                    item,
                }
            }
        };

        if tx.send(event).await.is_err() {
            // Assembler gone; nothing left to do.
            break;
        }
    }
}

/// Pass 1 for one file: document symbols → nodes + containment edges.
async fn analyze_structure(
    pool: &Arc<ServerPool>,
    mapper: &Arc<SymbolMapper>,
    registry: &Arc<SymbolRegistry>,
    imports: &Arc<DashMap<String, Vec<(NodeId, String)>>>,
    item: &WorkItem,
) -> Result<(Vec<CodeNode>, Vec<Edge>), AnalysisError> {
    let uri = mapper.file_uri(&item.file.path)?;
    let mapping = fetch_structure(pool, mapper, &item.file.path, item.file.language).await?;
    register_mapping(registry, imports, &uri, &mapping);

    let mut nodes = mapping.nodes;
    let edges = mapping.edges;
    // The project root rides along with every file; the store dedupes.
    nodes.push(mapper.project_node().clone());
    Ok((nodes, edges))
}

/// Queries `documentSymbol` (or maps symbol-less files) and returns the
/// file's mapping without touching shared state.
async fn fetch_structure(
    pool: &Arc<ServerPool>,
    mapper: &Arc<SymbolMapper>,
    path: &Path,
    language: &'static str,
) -> Result<crate::graph::mapper::FileMapping, AnalysisError> {
    if !pool.has_server_for(language) {
        // Config files and unserved languages still get File nodes.
        return mapper.map_file(path, language, None);
    }

    let lease = pool.lease(language).await?;
    let client = lease.client.lock().await;

    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| AnalysisError::Mapper(format!("unreadable file {}: {e}", path.display())))?;
    let uri: Uri = mapper
        .file_uri(path)?
        .parse()
        .map_err(|e| AnalysisError::Mapper(format!("bad uri for {}: {e}", path.display())))?;

    client
        .did_open(DidOpenTextDocumentParams {
            text_document: TextDocumentItem {
                uri: uri.clone(),
                language_id: language.to_string(),
                version: 1,
                text,
            },
        })
        .await
        .map_err(AnalysisError::Lsp)?;

    let symbols = client
        .document_symbols(DocumentSymbolParams {
            text_document: TextDocumentIdentifier { uri },
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        })
        .await
        .map_err(AnalysisError::Lsp)?;

    mapper.map_file(path, language, symbols)
}

fn register_mapping(
    registry: &Arc<SymbolRegistry>,
    imports: &Arc<DashMap<String, Vec<(NodeId, String)>>>,
    uri: &str,
    mapping: &crate::graph::mapper::FileMapping,
) {
    for node in &mapping.nodes {
        registry.insert(node.clone());
    }
    if !mapping.import_candidates.is_empty() {
        imports.insert(uri.to_string(), mapping.import_candidates.clone());
    }
}

/// Pass 2 for one file: references and implementations for every symbol the
/// registry holds for it, plus resolved imports.
async fn analyze_references(
    pool: &Arc<ServerPool>,
    mapper: &Arc<SymbolMapper>,
    registry: &Arc<SymbolRegistry>,
    imports: &Arc<DashMap<String, Vec<(NodeId, String)>>>,
    item: &WorkItem,
    progress: &mut Option<Position>,
) -> Result<(Vec<CodeNode>, Vec<Edge>), AnalysisError> {
    let uri = mapper.file_uri(&item.file.path)?;
    let mut edges: Vec<Edge> = Vec::new();
    let mut seen: HashSet<Edge> = HashSet::new();

    // Imports resolve against the now-complete registry.
    if let Some(candidates) = imports.get(&uri) {
        for (module_id, name) in candidates.iter() {
            if let Some(target) = registry.resolve_fqn(name) {
                let edge = Edge::new(module_id.clone(), target, EdgeType::Imports);
                if seen.insert(edge.clone()) {
                    edges.push(edge);
                }
            }
        }
    }

    if !pool.has_server_for(item.file.language) {
        return Ok((vec![], edges));
    }

    let symbol_ids = registry.ids_for_uri(&uri);
    if symbol_ids.is_empty() {
        return Ok((vec![], edges));
    }

    let lease = pool.lease(item.file.language).await?;
    let client = lease.client.lock().await;
    let doc_uri: Uri = uri
        .parse()
        .map_err(|e| AnalysisError::Mapper(format!("bad uri {uri}: {e}")))?;

    for id in symbol_ids {
        let Some(node) = registry.get(&id) else { continue };
        if !is_referenceable(&node) {
            continue;
        }
        // A previous attempt died on a specific symbol; skip exactly that
        // one and keep the rest of the file.
        if let Some(resume) = item.resume_position
            && node.range.start_line == resume.line
            && node.range.start_char == resume.character
        {
            continue;
        }

        let position = lsp_types::Position {
            line: node.range.start_line,
            character: node.range.start_char,
        };
        *progress = Some(Position {
            line: node.range.start_line,
            character: node.range.start_char,
        });

        let locations = client
            .references(ReferenceParams {
                text_document_position: TextDocumentPositionParams {
                    text_document: TextDocumentIdentifier { uri: doc_uri.clone() },
                    position,
                },
                work_done_progress_params: WorkDoneProgressParams::default(),
                partial_result_params: PartialResultParams::default(),
                context: ReferenceContext {
                    include_declaration: false,
                },
            })
            .await
            .map_err(AnalysisError::Lsp)?
            .unwrap_or_default();

        for location in &locations {
            if let Some(edge) = mapper.map_reference(&node, location, registry)
                && seen.insert(edge.clone())
            {
                edges.push(edge);
            }
        }

        if has_implementations(&node) {
            let response = client
                .implementation(GotoDefinitionParams {
                    text_document_position_params: TextDocumentPositionParams {
                        text_document: TextDocumentIdentifier { uri: doc_uri.clone() },
                        position,
                    },
                    work_done_progress_params: WorkDoneProgressParams::default(),
                    partial_result_params: PartialResultParams::default(),
                })
                .await
                .map_err(AnalysisError::Lsp)?;

            for location in flatten_definition_response(response) {
                if let Some(edge) = mapper.map_implementation(&node, &location, registry)
                    && seen.insert(edge.clone())
                {
                    edges.push(edge);
                }
            }
        }
    }

    Ok((vec![], edges))
}

fn flatten_definition_response(response: Option<GotoDefinitionResponse>) -> Vec<Location> {
    match response {
        None => vec![],
        Some(GotoDefinitionResponse::Scalar(location)) => vec![location],
        Some(GotoDefinitionResponse::Array(locations)) => locations,
        Some(GotoDefinitionResponse::Link(links)) => links
            .into_iter()
            .map(|link| Location {
                uri: link.target_uri,
                range: link.target_selection_range,
            })
            .collect(),
    }
}
