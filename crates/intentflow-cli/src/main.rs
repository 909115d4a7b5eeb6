//! CLI entry point for intentflow.
//!
//! This binary provides the `intentflow` command: `run` starts the monitors
//! and the engine, the other subcommands inspect configuration, workflows
//! and stored executions.

mod cli;
mod config;
mod helpers;
mod server;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};

use intentflow_core::{EventSource, Intent, IntentType, UserContext};
use intentflow_engine::{
    DefaultStepExecutor, ExecutionEngine, Pipeline, StaticContextProvider, WorkflowCatalog,
};
use intentflow_intent::{IntentClassifier, WorkflowSelector};
use intentflow_monitor::MonitorManager;
use intentflow_store::{DedupLedger, ExecutionStore, SqliteRecordStore};

use crate::cli::{Cli, Commands, WorkflowAction};
use crate::config::AppConfig;
use crate::helpers::{
    build_llm_client, build_monitor_config, build_notifier, build_transcriber, init_tracing,
    open_store,
};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    // A missing .env is normal.
    let _ = dotenvy::dotenv();

    let config = AppConfig::load(&cli.config)?;
    init_tracing(&config.logging.level, cli.log_json);

    match cli.command {
        Commands::Run => cmd_run(config).await,
        Commands::Classify { user, source, text } => {
            cmd_classify(&config, EventSource::new(user, source, text)).await
        }
        Commands::Executions { user, limit } => cmd_executions(&config, &user, limit).await,
        Commands::Workflows {
            action: WorkflowAction::Check { path },
        } => cmd_workflows_check(path.as_deref().unwrap_or(&config.workflows.path)),
    }
}

// ---------------------------------------------------------------------------
// Subcommand: run
// ---------------------------------------------------------------------------

async fn cmd_run(config: AppConfig) -> Result<()> {
    info!("starting intentflow");

    let db = open_store(&config.store).await?;
    let llm = Arc::new(build_llm_client(&config.llm)?);
    let catalog =
        WorkflowCatalog::load(&config.workflows.path).context("failed to load workflows")?;
    let classifier = IntentClassifier::new(llm);
    let notifier = build_notifier(&config.notifications)?;

    let executor = DefaultStepExecutor::new(
        Arc::new(SqliteRecordStore::new(db.clone())),
        Arc::clone(&notifier),
    )
    .with_classifier(classifier.clone());
    let engine = Arc::new(
        ExecutionEngine::new(Arc::new(executor))
            .with_classifier(classifier.clone())
            .with_store(ExecutionStore::new(db.clone()))
            .with_config(config.engine.engine_config())
            .with_approval_notifier(notifier),
    );
    let pipeline = Arc::new(Pipeline::new(
        classifier,
        WorkflowSelector::default(),
        Arc::new(catalog),
        Arc::clone(&engine),
        Arc::new(StaticContextProvider::new(config.users.iter().cloned())),
    ));

    let mut manager = MonitorManager::new(pipeline, DedupLedger::durable(db));
    if let Some(transcriber) = build_transcriber(&config.transcription)? {
        manager = manager.with_transcriber(transcriber);
    }
    for (index, section) in config.monitors.iter().enumerate() {
        let monitor = build_monitor_config(section)
            .with_context(|| format!("monitors[{index}] is invalid"))?;
        manager
            .start(&section.user, monitor)
            .with_context(|| format!("failed to start monitors[{index}]"))?;
    }
    if manager.is_empty() {
        warn!("no monitors configured; nothing will be processed");
    }

    let (stop_server, server_stopped) = tokio::sync::oneshot::channel::<()>();
    let server = match &config.server.bind {
        Some(bind) => {
            let listener = tokio::net::TcpListener::bind(bind)
                .await
                .with_context(|| format!("failed to bind approval endpoint on {bind}"))?;
            let shutdown = async move {
                let _ = server_stopped.await;
            };
            Some(tokio::spawn(server::serve(listener, Arc::clone(&engine), shutdown)))
        }
        None => {
            warn!("server.bind is unset; approval requests can only expire");
            None
        }
    };
    info!(monitors = manager.len(), "intentflow running, press Ctrl-C to stop");

    let retain = Duration::from_secs(config.engine.retain_finished_secs);
    let mut housekeeping = tokio::time::interval(Duration::from_secs(60));
    housekeeping.tick().await;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "failed to listen for Ctrl-C");
                }
                break;
            }
            _ = housekeeping.tick() => {
                let expired = engine.expire_approvals().await;
                let purged = engine.purge_finished(retain);
                debug!(
                    expired,
                    purged,
                    pending_approvals = engine.pending_approvals(),
                    "housekeeping done"
                );
            }
        }
    }

    info!("shutting down");
    manager.stop_all().await;
    let _ = stop_server.send(());
    if let Some(server) = server {
        match server.await {
            Ok(Err(e)) => warn!(error = %e, "approval endpoint failed"),
            Err(e) => warn!(error = %e, "approval endpoint task panicked"),
            Ok(Ok(())) => {}
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: classify
// ---------------------------------------------------------------------------

async fn cmd_classify(config: &AppConfig, event: EventSource) -> Result<()> {
    let classifier = IntentClassifier::new(Arc::new(build_llm_client(&config.llm)?));
    let context = config
        .users
        .iter()
        .find(|u| u.user_id == event.user_id)
        .cloned()
        .unwrap_or_else(|| UserContext::new(event.user_id.clone()));

    let intent = match classifier.try_classify(&event, &context).await {
        Ok(intent) => intent,
        Err(e) => {
            println!("  Classification failed ({e}); the pipeline would use the default intent.");
            Intent::fallback()
        }
    };

    println!();
    println!("{}", serde_json::to_string_pretty(&intent)?);
    println!();
    match WorkflowSelector::default().evaluate(&intent, &context) {
        Ok(workflow_id) => println!("  Selected workflow: {workflow_id}"),
        Err(denied) => println!("  No workflow would run: {denied}"),
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: executions
// ---------------------------------------------------------------------------

async fn cmd_executions(config: &AppConfig, user: &str, limit: usize) -> Result<()> {
    let store = ExecutionStore::new(open_store(&config.store).await?);
    let executions = store
        .list_by_user(user, limit)
        .await
        .context("failed to list executions")?;

    if executions.is_empty() {
        println!("  No executions for {user}.");
        return Ok(());
    }

    println!();
    for exec in &executions {
        let finished = exec.steps.iter().filter(|s| s.status.is_terminal()).count();
        println!(
            "  {}  {:<26} {:<18} {}  steps {}/{}",
            exec.id,
            exec.workflow_id,
            exec.status.as_str(),
            exec.started_at.format("%Y-%m-%d %H:%M:%S"),
            finished,
            exec.steps.len(),
        );
        if let Some(error) = &exec.error {
            println!("      error: {error}");
        }
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: workflows check
// ---------------------------------------------------------------------------

fn cmd_workflows_check(path: &Path) -> Result<()> {
    let catalog =
        WorkflowCatalog::load(path).with_context(|| format!("{} is invalid", path.display()))?;

    println!();
    println!("  {} workflows in {}", catalog.len(), path.display());
    for id in catalog.ids() {
        if let Some(workflow) = catalog.get(id) {
            println!(
                "    {:<26} {} steps{}{}",
                id,
                workflow.steps.len(),
                if workflow.approval_required { ", approval" } else { "" },
                if workflow.is_active { "" } else { ", inactive" },
            );
        }
    }

    let selector = WorkflowSelector::default();
    for intent_type in IntentType::ALL {
        if let Some(route) = selector.route(intent_type)
            && catalog.get(route).is_none()
        {
            println!("  [!] {intent_type} intents route to `{route}`, which is not defined");
        }
    }
    println!();
    Ok(())
}
