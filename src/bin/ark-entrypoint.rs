// src/bin/ark-entrypoint.rs

//! Supervisor that runs inside a workload: keeps the child process alive,
//! applies incoming file changes and restarts the child as configured.
//!
//! Usage: `ark-entrypoint [--log-level LEVEL] -- <command> [args...]`

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ark::cli::LogLevel;
use ark::config::EntrypointEnv;
use ark::logging;
use ark::supervisor::{ChangeApplier, LogShipper, Supervisor};
use ark::sync::{ChangeHandler, SyncServer};

#[derive(Debug, Parser)]
#[command(name = "ark-entrypoint", version, about = "Run and live-sync a workload process.")]
struct EntrypointArgs {
    #[arg(long, value_enum, value_name = "LEVEL")]
    log_level: Option<LogLevel>,

    /// Command to supervise.
    #[arg(trailing_var_arg = true, required = true, value_name = "COMMAND")]
    command: Vec<String>,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run_main().await {
        eprintln!("ark error: {err:?}");
        std::process::exit(1);
    }
}

async fn run_main() -> anyhow::Result<()> {
    let args = EntrypointArgs::parse();
    logging::init_logging(args.log_level)?;

    let env = EntrypointEnv::from_env()?;
    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone())?;

    let mut supervisor = Supervisor::new(args.command, env.restart_mode)?;
    if let Some(shipper) = LogShipper::from_env(&env, cancel.child_token()) {
        supervisor = supervisor.with_log_shipper(shipper);
    }

    let applier = ChangeApplier::new(None, env.restart_mode).with_stop_handle(supervisor.stop_handle());
    let handler: Arc<dyn ChangeHandler> = Arc::new(applier);

    let server = SyncServer::bind(("0.0.0.0", env.sync_port))
        .await
        .with_context(|| format!("binding sync listener on port {}", env.sync_port))?;
    info!(
        port = env.sync_port,
        restart_mode = %env.restart_mode,
        "entrypoint listening"
    );

    let server_cancel = cancel.child_token();
    let server_task = tokio::spawn(server.serve(handler, server_cancel.clone()));

    let result = supervisor.watch(cancel.child_token()).await;

    server_cancel.cancel();
    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "sync server stopped with error"),
        Err(e) => warn!(error = %e, "sync server task failed"),
    }

    if let Err(e) = &result {
        error!(error = %e, "supervisor stopped with error");
    }
    info!("entrypoint stopped");
    Ok(result?)
}

/// SIGINT or SIGTERM cancels `cancel`.
fn spawn_signal_handler(cancel: CancellationToken) -> anyhow::Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    tokio::spawn(async move {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    warn!(error = %e, "failed to listen for Ctrl+C");
                }
                info!("SIGINT received; shutting down");
            }
            _ = sigterm.recv() => info!("SIGTERM received; shutting down"),
        }
        cancel.cancel();
    });
    Ok(())
}
