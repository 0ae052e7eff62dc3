// src/lib.rs

pub mod actions;
pub mod archive;
pub mod cache;
pub mod cli;
pub mod commands;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod hash;
pub mod logging;
pub mod observer;
pub mod patterns;
pub mod supervisor;
pub mod sync;
pub mod target;
pub mod types;
pub mod workspace;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cli::{CliArgs, Command};
use crate::workspace::Workspace;

/// High-level entry point used by `main.rs`.
///
/// Resolves and loads the workspace, installs the Ctrl-C handler and
/// dispatches to the subcommand.
pub async fn run(args: CliArgs) -> Result<()> {
    if let Command::Version = args.command {
        println!("ark {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let root = commands::resolve_root(args.workspace.as_deref())?;
    let ws = Workspace::load(&root)?;

    // Ctrl-C -> cancel everything in flight.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            debug!("Ctrl+C received; cancelling");
            cancel.cancel();
        });
    }

    match &args.command {
        Command::Run(run) => commands::run(&ws, run, &cancel).await?,
        Command::Targets(cmd) => commands::targets(&ws, cmd, &cancel).await?,
        Command::Debug(cmd) => commands::debug(&ws, cmd)?,
        Command::Artifacts(cmd) => commands::artifacts(&ws, cmd, &cancel).await?,
        Command::Clean => commands::clean(&ws)?,
        Command::Validate => commands::validate(&ws)?,
        Command::Version => {}
    }
    Ok(())
}
