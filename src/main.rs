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

//! Trellis server and CLI.
//!
//! `trellis serve` speaks the message channel on stdin/stdout (logs go to
//! stderr). `trellis analyze <root>` runs one job against a directory and
//! prints a summary, no channel required.

#![allow(clippy::print_stdout, reason = "CLI tool needs to output to stdout")]
#![allow(clippy::print_stderr, reason = "CLI tool needs to output to stderr")]

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use trellis::broker::SubscriptionBroker;
use trellis::channel::ChannelServer;
use trellis::config::{Config, LaunchSpec, ProjectConfig};
use trellis::graph::model::{Project, SourceType};
use trellis::job::{JobRegistry, StartOutcome};
use trellis::lsp::ServerPool;
use trellis::orchestrator::Orchestrator;
use trellis::store::{GraphStore, MemoryStore};

/// Command-line arguments for Trellis.
#[derive(Parser, Debug)]
#[command(name = "trellis")]
#[command(about = "Streaming code knowledge-graph analyzer driving LSP servers")]
struct Args {
    /// The subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,

    /// LSP servers to use in "lang:command" format (e.g., "rust:rust-analyzer").
    /// Can be specified multiple times. These override/append to the config file.
    #[arg(short, long = "lsp", global = true)]
    lsps: Vec<String>,

    /// Projects to expose in serve mode, in "id:path" format.
    /// Can be specified multiple times.
    #[arg(short, long = "project", global = true)]
    projects: Vec<String>,

    /// Path to configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

/// Subcommands supported by Trellis.
#[derive(Subcommand, Debug)]
enum Command {
    /// Run the message-channel server on stdin/stdout (default).
    Serve,

    /// Analyze one directory end to end and print a summary.
    Analyze {
        /// Repository root to analyze.
        root: PathBuf,

        /// Project id (defaults to the directory name).
        #[arg(long)]
        project_id: Option<String>,
    },
}

/// Entry point for the Trellis binary.
///
/// # Errors
///
/// Returns an error if the subcommand fails.
#[tokio::main]
async fn main() -> Result<()> {
    let mut args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("trellis=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    match args.command.take() {
        None | Some(Command::Serve) => run_serve(args).await,
        Some(Command::Analyze { root, project_id }) => run_analyze(args, root, project_id).await,
    }
}

/// Loads configuration and merges CLI overrides into it.
fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::load(args.config.clone())?;

    for lsp_spec in &args.lsps {
        let (lang, command_str) = lsp_spec.split_once(':').ok_or_else(|| {
            anyhow::anyhow!("Invalid LSP spec: {lsp_spec}. Expected 'lang:command'")
        })?;

        let lang = lang.trim().to_string();
        let command_str = command_str.trim();

        let mut parts = command_str.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("command cannot be empty"))?
            .to_string();
        let cmd_args: Vec<String> = parts.map(std::string::ToString::to_string).collect();

        config.server.insert(
            lang,
            LaunchSpec {
                command: program,
                args: cmd_args,
                env: std::collections::HashMap::new(),
                initialization_options: None,
            },
        );
    }

    for project_spec in &args.projects {
        let (id, path) = project_spec.split_once(':').ok_or_else(|| {
            anyhow::anyhow!("Invalid project spec: {project_spec}. Expected 'id:path'")
        })?;
        config.project.insert(
            id.trim().to_string(),
            ProjectConfig {
                root: PathBuf::from(path.trim()),
                name: None,
                source_type: "git".to_string(),
            },
        );
    }

    Ok(config)
}

/// Runs the message-channel server.
///
/// # Errors
///
/// Returns an error if the channel loop fails.
async fn run_serve(args: Args) -> Result<()> {
    let config = load_config(&args)?;

    info!("starting trellis analysis server");
    info!(
        "projects: {}",
        if config.project.is_empty() {
            "(none configured)".to_string()
        } else {
            config.project.keys().cloned().collect::<Vec<_>>().join(", ")
        }
    );
    info!(
        "language servers: {}",
        config.server.keys().cloned().collect::<Vec<_>>().join(", ")
    );

    let store: Arc<dyn GraphStore> = Arc::new(MemoryStore::new());
    let broker = Arc::new(SubscriptionBroker::new(
        config.broker_ring,
        config.subscriber_buffer,
    ));
    let jobs = Arc::new(JobRegistry::new(config.max_active_jobs));
    let grace = config.grace();

    let server = ChannelServer::new(config, jobs.clone(), store, broker);

    let result = tokio::select! {
        res = server.run(tokio::io::stdin(), tokio::io::stdout()) => res,
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
            Ok(())
        }
    };

    // Cancel whatever is still running and give it the grace period to
    // unwind and checkpoint.
    let mut live = 0;
    for job in jobs.all() {
        if !job.status.is_terminal() {
            let _ = jobs.cancel(&job.job_id);
            live += 1;
        }
    }
    if live > 0 {
        info!("waiting for {live} running jobs to unwind");
        tokio::time::sleep(grace).await;
    }

    result
}

/// Runs one job to completion against a directory.
///
/// # Errors
///
/// Returns an error if the analysis fails.
async fn run_analyze(args: Args, root: PathBuf, project_id: Option<String>) -> Result<()> {
    let config = load_config(&args)?;

    let root = root.canonicalize()?;
    let project_id = project_id.unwrap_or_else(|| {
        root.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "project".to_string())
    });

    let project = Project {
        project_id: project_id.clone(),
        name: project_id.clone(),
        root_path: root.clone(),
        source_type: SourceType::Git,
    };

    let store: Arc<dyn GraphStore> = Arc::new(MemoryStore::new());
    let broker = Arc::new(SubscriptionBroker::new(
        config.broker_ring,
        config.subscriber_buffer,
    ));
    let jobs = JobRegistry::new(config.max_active_jobs);

    let outcome = jobs.start_analysis(&project_id, "lsp");
    let StartOutcome::Run(handle) = outcome else {
        anyhow::bail!("a job already exists for {project_id}");
    };

    let pool = Arc::new(ServerPool::new(
        config.server.clone(),
        root,
        config.lsp_request_timeout(),
        config.max_servers_per_lang,
        config.max_respawn,
        config.respawn_window(),
    ));
    let orchestrator = Orchestrator::new(
        project,
        handle.clone(),
        config,
        store,
        broker,
        pool,
    );

    if let Err(e) = orchestrator.run().await {
        warn!("analysis failed: {e}");
        anyhow::bail!("analysis failed: {e}");
    }

    let state = handle.snapshot();
    println!("project:          {project_id}");
    println!("status:           {:?}", state.status);
    println!("files processed:  {}/{}", state.stats.processed_files, state.stats.total_files);
    println!("symbols:          {}", state.stats.total_symbols);
    println!("edges:            {}", state.stats.total_edges);
    if let Some(error) = &state.last_error {
        println!("warnings:         {error}");
    }

    Ok(())
}
