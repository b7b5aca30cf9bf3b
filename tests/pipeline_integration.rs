// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! End-to-end pipeline tests against the bundled mock language server.
//!
//! These spawn the `mockls` binary (built alongside the crate) instead of a
//! real language server, so symbol and reference answers are deterministic.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use trellis::broker::{BrokerMessage, SubscriptionBroker};
use trellis::config::{Config, LaunchSpec};
use trellis::graph::model::{NodeKind, Project, SourceType};
use trellis::job::{JobHandle, JobRegistry, JobStatus, StartOutcome};
use trellis::lsp::ServerPool;
use trellis::orchestrator::Orchestrator;
use trellis::store::{GraphStore, MemoryStore};

fn mockls_spec(extra_args: &[&str]) -> LaunchSpec {
    let mut args: Vec<String> = Vec::new();
    args.extend(extra_args.iter().map(|s| (*s).to_string()));
    LaunchSpec {
        command: env!("CARGO_BIN_EXE_mockls").to_string(),
        args,
        env: HashMap::new(),
        initialization_options: None,
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.workers = 1;
    config.batch_interval_ms = 20;
    config.grace_secs = 1;
    config
}

fn write(root: &Path, rel: &str, contents: &str) -> Result<()> {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)?;
    Ok(())
}

fn tiny_python_project(root: &Path) -> Result<()> {
    write(root, "pkg/__init__.py", "")?;
    write(root, "pkg/a.py", "class A:\n    def m(self):\n        pass\n")?;
    write(root, "pkg/b.py", "from pkg.a import A\n\nA().m()\n")?;
    Ok(())
}

struct Harness {
    store: Arc<MemoryStore>,
    broker: Arc<SubscriptionBroker>,
    jobs: JobRegistry,
}

impl Harness {
    fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            broker: Arc::new(SubscriptionBroker::new(256, 64)),
            jobs: JobRegistry::new(4),
        }
    }

    fn orchestrator(
        &self,
        root: &Path,
        config: &Config,
        mockls_args: &[&str],
        handle: Arc<JobHandle>,
    ) -> Result<Orchestrator> {
        let project = Project {
            project_id: "test-project".to_string(),
            name: "test".to_string(),
            root_path: root.canonicalize()?,
            source_type: SourceType::Git,
        };
        let mut specs = HashMap::new();
        specs.insert("python".to_string(), mockls_spec(mockls_args));
        let pool = Arc::new(ServerPool::new(
            specs,
            project.root_path.clone(),
            Duration::from_secs(5),
            1,
            config.max_respawn,
            config.respawn_window(),
        ));
        let store: Arc<dyn GraphStore> = self.store.clone();
        Ok(Orchestrator::new(
            project,
            handle,
            config.clone(),
            store,
            self.broker.clone(),
            pool,
        ))
    }

    fn start(&self) -> Result<Arc<JobHandle>> {
        match self.jobs.start_analysis("test-project", "lsp") {
            StartOutcome::Run(handle) => Ok(handle),
            StartOutcome::Rejoin(_) => anyhow::bail!("expected a fresh job"),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tiny_python_project_builds_expected_graph() -> Result<()> {
    let dir = tempfile::tempdir()?;
    tiny_python_project(dir.path())?;

    let harness = Harness::new();
    let config = test_config();
    let handle = harness.start()?;
    let orchestrator = harness.orchestrator(dir.path(), &config, &[], handle.clone())?;
    orchestrator.run().await?;

    assert_eq!(handle.status(), JobStatus::Completed);

    // Expected nodes: Project, File x3, modules pkg / pkg.a / pkg.b,
    // class pkg.a.A, method pkg.a.A.m.
    let find = |fqn: &str, kind: NodeKind| {
        harness
            .store
            .node_ids()
            .into_iter()
            .filter_map(|id| harness.store.get_node(&id))
            .find(|n| n.fully_qualified_name == fqn && n.kind == kind)
    };
    let class_a = find("pkg.a.A", NodeKind::Class).context("missing class pkg.a.A")?;
    let method_m = find("pkg.a.A.m", NodeKind::Method).context("missing method pkg.a.A.m")?;
    let module_a = find("pkg.a", NodeKind::Module).context("missing module pkg.a")?;
    let module_b = find("pkg.b", NodeKind::Module).context("missing module pkg.b")?;
    find("pkg", NodeKind::Module).context("missing module pkg")?;

    let triples = harness.store.edge_triples();
    let has_edge = |source: &str, target: &str, kind: &str| {
        triples
            .iter()
            .any(|(s, t, k)| s == source && t == target && k == kind)
    };

    // Structure: class contains method.
    assert!(has_edge(&class_a.id, &method_m.id, "Contains"));
    // Imports: pkg.b -> pkg.a.
    assert!(has_edge(&module_b.id, &module_a.id, "Imports"));
    // The call site in pkg.b reaches the method.
    assert!(has_edge(&module_b.id, &method_m.id, "Calls"));
    // And the class is referenced from pkg.b.
    assert!(has_edge(&module_b.id, &class_a.id, "References"));

    // Every non-project node is reachable from the project root over
    // CONTAINS (the containment forest invariant).
    let project_node = harness
        .store
        .node_ids()
        .into_iter()
        .filter_map(|id| harness.store.get_node(&id))
        .find(|n| n.kind == NodeKind::Project)
        .context("missing project node")?;
    let subgraph = harness.store.read_subgraph(&project_node.id, 16).await?;
    assert_eq!(subgraph.nodes.len(), harness.store.node_count());

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn identical_runs_produce_identical_ids() -> Result<()> {
    let dir = tempfile::tempdir()?;
    tiny_python_project(dir.path())?;

    let mut results = Vec::new();
    for _ in 0..2 {
        let harness = Harness::new();
        let config = test_config();
        let handle = harness.start()?;
        let orchestrator = harness.orchestrator(dir.path(), &config, &[], handle)?;
        orchestrator.run().await?;
        results.push((harness.store.node_ids(), harness.store.edge_triples()));
    }

    assert_eq!(results[0].0, results[1].0, "node id sets differ between runs");
    assert_eq!(results[0].1, results[1].1, "edge triples differ between runs");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn interrupted_run_resumes_to_the_same_graph() -> Result<()> {
    let dir = tempfile::tempdir()?;
    tiny_python_project(dir.path())?;

    // Reference: an uninterrupted run.
    let reference = Harness::new();
    let config = test_config();
    let handle = reference.start()?;
    let orchestrator = reference.orchestrator(dir.path(), &config, &[], handle)?;
    orchestrator.run().await?;
    let expected_nodes = reference.store.node_ids();
    let expected_edges = reference.store.edge_triples();

    // Crash simulation: drop the run future mid-flight (the store keeps
    // whatever was committed, exactly like a kill -9).
    let harness = Harness::new();
    let mut slow = test_config();
    slow.batch_interval_ms = 10;
    let handle = harness.start()?;
    let job_id = handle.job_id();
    let orchestrator =
        harness.orchestrator(dir.path(), &slow, &["--response-delay", "40"], handle)?;
    let _ = tokio::time::timeout(Duration::from_millis(250), orchestrator.run()).await;

    // Resume under the same job id, against the same store. A restarted
    // process has an empty job table, so adopt into a fresh registry.
    let fresh_jobs = JobRegistry::new(4);
    let resumed = fresh_jobs.adopt(&job_id, "test-project", "lsp");
    let orchestrator = harness.orchestrator(dir.path(), &config, &[], resumed.clone())?;
    orchestrator.run().await?;

    assert_eq!(resumed.status(), JobStatus::Completed);
    assert_eq!(harness.store.node_ids(), expected_nodes);
    assert_eq!(harness.store.edge_triples(), expected_edges);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn poison_file_fails_alone_and_job_completes() -> Result<()> {
    let dir = tempfile::tempdir()?;
    for i in 0..8 {
        write(dir.path(), &format!("mod_{i}.py"), &format!("def f_{i}():\n    pass\n"))?;
    }
    write(dir.path(), "poison.py", "def doomed():\n    pass\n")?;

    let harness = Harness::new();
    let config = test_config();
    let handle = harness.start()?;
    let job_id = handle.job_id();
    let orchestrator =
        harness.orchestrator(dir.path(), &config, &["--die-on-uri", "poison.py"], handle.clone())?;
    orchestrator.run().await?;

    // The job completes with a warning; only the poison file failed.
    assert_eq!(handle.status(), JobStatus::Completed);
    let checkpoint = harness
        .store
        .read_checkpoint(&job_id)
        .await?
        .context("missing checkpoint")?;
    assert_eq!(checkpoint.failed_files.len(), 1);
    let (path, failed) = checkpoint
        .failed_files
        .iter()
        .next()
        .context("no failed entry")?;
    assert!(path.ends_with("poison.py"));
    assert_eq!(failed.retry_count, config.max_retries);
    assert!(handle.snapshot().last_error.is_some());

    // All eight healthy functions made it into the graph.
    let function_count = harness
        .store
        .node_ids()
        .into_iter()
        .filter_map(|id| harness.store.get_node(&id))
        .filter(|n| n.kind == NodeKind::Function)
        .count();
    assert_eq!(function_count, 8);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancellation_stops_publishing_within_grace() -> Result<()> {
    let dir = tempfile::tempdir()?;
    for i in 0..12 {
        write(dir.path(), &format!("mod_{i}.py"), &format!("def f_{i}():\n    pass\n"))?;
    }

    let harness = Harness::new();
    let mut config = test_config();
    config.batch_interval_ms = 10;
    let handle = harness.start()?;
    let job_id = handle.job_id();
    let mut subscription = harness.broker.subscribe(&job_id, Some(1));

    let orchestrator =
        harness.orchestrator(dir.path(), &config, &["--response-delay", "30"], handle.clone())?;
    let run = tokio::spawn(async move { orchestrator.run().await });

    // Wait for the first batch, then cancel.
    let first = tokio::time::timeout(Duration::from_secs(10), subscription.recv())
        .await?
        .context("no first batch")?;
    assert!(matches!(first, BrokerMessage::Batch(_)));
    harness.jobs.cancel(&job_id)?;

    tokio::time::timeout(Duration::from_secs(10), run).await???;
    assert_eq!(handle.status(), JobStatus::Cancelled);

    // Whatever was in flight settles; after that, nothing new appears.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let settled = harness.broker.last_sequence(&job_id);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.broker.last_sequence(&job_id), settled);

    // The terminal control message arrives instead of a complete batch.
    let mut saw_ended = false;
    while let Ok(Some(message)) =
        tokio::time::timeout(Duration::from_millis(200), subscription.recv()).await
    {
        if let BrokerMessage::JobEnded { status, .. } = message {
            assert_eq!(status, JobStatus::Cancelled);
            saw_ended = true;
            break;
        }
    }
    assert!(saw_ended, "subscriber never heard the job end");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn config_files_are_graphed_without_a_server() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write(dir.path(), "Dockerfile", "FROM debian\n")?;
    write(dir.path(), "lib.py", "def f():\n    pass\n")?;

    let harness = Harness::new();
    let config = test_config();
    let handle = harness.start()?;
    let orchestrator = harness.orchestrator(dir.path(), &config, &[], handle.clone())?;
    orchestrator.run().await?;

    assert_eq!(handle.status(), JobStatus::Completed);
    let config_nodes = harness
        .store
        .node_ids()
        .into_iter()
        .filter_map(|id| harness.store.get_node(&id))
        .filter(|n| n.kind == NodeKind::Config)
        .count();
    assert_eq!(config_nodes, 1);
    Ok(())
}
