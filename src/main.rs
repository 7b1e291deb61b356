//! Groundwork - git-driven change management for SQL warehouses
//!
//! Declarative object specifications live in a git repository. Each run
//! discovers the commits not yet applied to an environment, validates the
//! changed specifications against the live catalog, renders them into
//! statements and applies them in commit and dependency order, recording
//! every outcome in tracking tables on the target.

mod cli;
mod config;
mod context;
mod error;
mod models;
mod pipeline;
mod report;
mod secrets;
mod source;
mod target;

use crate::cli::{Cli, Command, ListCommand};
use crate::context::RunContext;
use crate::target::{CancellationFlag, Target};
use anyhow::Context as _;
use clap::Parser;
use serde::Serialize;
use tracing::{error, info, info_span, warn, Instrument};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let span = info_span!("run", run_id = %Uuid::new_v4(), env = %cli.env);
    let result = run(cli).instrument(span).await;
    if let Err(e) = &result {
        error!("❌ {:#}", e);
    }
    result
}

/// Initialize tracing with structured logging on stderr
fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,groundwork=debug"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(fmt::layer().json().with_current_span(true).with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .init();
    }
}

/// Print `value` as JSON or as the given text
fn emit<T: Serialize + ?Sized>(json: bool, value: &T, text: impl FnOnce() -> String) -> anyhow::Result<()> {
    if json {
        println!("{}", report::to_json(value)?);
    } else {
        print!("{}", text());
    }
    Ok(())
}

/// Close the target, keeping the command's own error first
async fn finish<T>(mut target: Box<dyn Target>, result: error::AppResult<T>) -> anyhow::Result<T> {
    if let Err(e) = target.close().await {
        if result.is_ok() {
            return Err(e).context("closing target");
        }
        warn!("Closing target failed: {}", e);
    }
    Ok(result?)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let options = cli.run_options().context("reading run options")?;
    let context = RunContext::load(cli.config.as_deref(), &cli.env, options)
        .with_context(|| format!("loading environment {}", cli.env))?;
    let orchestrator = context.orchestrator();
    info!("📋 Environment {} loaded", context.env_name);

    match &cli.command {
        Command::Clone { directory } => {
            orchestrator.clone_into(directory)?;
        }
        Command::List { what: ListCommand::Branches } => {
            let branches = orchestrator.list_branches()?;
            emit(cli.json, &branches, || report::branches(&branches))?;
        }
        Command::List { what: ListCommand::Commits } => {
            let commits = orchestrator.list_commits()?;
            emit(cli.json, &commits, || report::commits(&commits))?;
        }
        Command::List { what: ListCommand::Changes } => {
            let target = context.open_target().await?;
            let result = orchestrator.generate_change_log(target.as_ref()).await;
            if let Ok(log) = &result {
                emit(cli.json, log, || report::change_log(log, &|t: i64| target.object_type_name(t)))?;
            }
            finish(target, result).await?;
        }
        Command::Validate => {
            let mut target = context.open_target().await?;
            let result = match orchestrator.generate_change_log(target.as_ref()).await {
                Ok(mut log) => {
                    let validated = orchestrator.validate(target.as_mut(), &mut log).await;
                    emit(cli.json, &log, || report::change_log(&log, &|t: i64| target.object_type_name(t)))?;
                    validated
                }
                Err(e) => Err(e),
            };
            finish(target, result).await?;
        }
        Command::Render => {
            let mut target = context.open_target().await?;
            let result = match orchestrator.generate_change_log(target.as_ref()).await {
                Ok(mut log) => {
                    let rendered = orchestrator.render(target.as_mut(), &mut log).await;
                    emit(cli.json, &log, || report::change_log(&log, &|t: i64| target.object_type_name(t)))?;
                    rendered.map(|_| ())
                }
                Err(e) => Err(e),
            };
            finish(target, result).await?;
        }
        Command::Apply => {
            let mut target = context.open_target().await?;
            let cancel = CancellationFlag::new();
            let watcher = tokio::spawn(cancel_on_signal(cancel.clone()));

            let result = match orchestrator.generate_change_log(target.as_ref()).await {
                Ok(mut log) => {
                    let applied = orchestrator.apply(target.as_mut(), &cancel, &mut log).await;
                    emit(cli.json, &log, || report::change_log(&log, &|t: i64| target.object_type_name(t)))?;
                    applied
                }
                Err(e) => Err(e),
            };
            watcher.abort();

            if let Err(e) = &result {
                if e.is_resource_leak() {
                    error!("🚨 Temporary grants are still active on the target: {}", e);
                }
            }
            finish(target, result).await?;
            info!("✅ Apply complete");
        }
        Command::History { depth } => {
            let target = context.open_target().await?;
            let result = orchestrator.history(target.as_ref(), *depth).await;
            if let Ok(history) = &result {
                if cli.json {
                    let entries: Vec<_> = history
                        .iter()
                        .map(|(entry, details)| serde_json::json!({ "entry": entry, "details": details }))
                        .collect();
                    emit(true, &entries, String::new)?;
                } else {
                    print!("{}", report::history(history));
                }
            }
            finish(target, result).await?;
        }
    }
    Ok(())
}

/// Set the cancellation flag on Ctrl+C or SIGTERM
async fn cancel_on_signal(cancel: CancellationFlag) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("📴 Received Ctrl+C, stopping after the current item...");
        },
        _ = terminate => {
            info!("📴 Received terminate signal, stopping after the current item...");
        },
    }
    cancel.cancel();
}
