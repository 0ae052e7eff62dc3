// src/commands.rs

//! One function per `ark` subcommand.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::{ArtifactsCommand, DebugCommand, RunArgs, TargetsCommand};
use crate::config::find_workspace_root;
use crate::engine::{BuildWalker, VisitResult, WalkReport};
use crate::errors::{ArkError, Result};
use crate::sync::{LiveSyncBridge, SyncClient, SyncStats};
use crate::target::kinds::live_sync::LiveSyncAttrs;
use crate::target::{Address, BuildContext, Target};
use crate::types::GraphFormat;
use crate::workspace::Workspace;

/// `--workspace`, or the nearest ancestor of the cwd holding `ark.toml`.
pub fn resolve_root(flag: Option<&Path>) -> Result<PathBuf> {
    match flag {
        Some(dir) => Ok(dir.to_path_buf()),
        None => find_workspace_root(&std::env::current_dir()?),
    }
}

pub async fn run(ws: &Workspace, args: &RunArgs, cancel: &CancellationToken) -> Result<()> {
    let address = Address::parse(&args.address)?;
    let walker = BuildWalker {
        force: args.force,
        pull: args.pull,
        push: args.push,
        push_errors_fatal: ws.push_errors_fatal() || args.stop_on_first_error,
    };
    let opts = ws.walk_options(args.stop_on_first_error);

    let report = ws.build(Some(&address), walker, opts, cancel).await?;
    log_build_report(&address, &report);

    if args.watch {
        let stats = watch(ws, &address, args.stop_on_first_error, cancel).await?;
        info!(
            address = %address,
            sent = stats.sent,
            failed = stats.failed,
            merged = stats.merged,
            "watch stopped"
        );
    }
    Ok(())
}

fn log_build_report(address: &Address, report: &WalkReport<VisitResult>) {
    let count = |wanted: VisitResult| {
        report
            .completed
            .iter()
            .filter(|(_, result)| *result == wanted)
            .count()
    };
    info!(
        address = %address,
        built = count(VisitResult::Built),
        local_hits = count(VisitResult::LocalHit),
        remote_hits = count(VisitResult::RemoteHit),
        "build finished"
    );
}

/// Stream changes under the sources of `address` to its entrypoint until
/// `cancel` fires.
///
/// The target must be a `live_sync` target that has been pre-built.
pub async fn watch(
    ws: &Workspace,
    address: &Address,
    stop_on_first_error: bool,
    cancel: &CancellationToken,
) -> Result<SyncStats> {
    let target = ws.graph().lookup_by_address(address)?;
    let attrs = LiveSyncAttrs::from_target(&target)?;

    let observer = ws.spawn_observer(cancel.child_token())?;
    let subscription = ws.filter_change_notifications_by_target(&observer, address)?;

    info!(address = %address, endpoint = %attrs.endpoint, "watching for changes");
    let client = SyncClient::new(attrs.endpoint.clone()).with_max_archive_bytes(ws.max_archive_bytes());
    LiveSyncBridge::new(ws.root(), attrs.matcher()?, client)
        .with_max_archive_bytes(ws.max_archive_bytes())
        .stop_on_first_error(stop_on_first_error)
        .run(subscription, cancel.clone())
        .await
}

pub async fn targets(ws: &Workspace, cmd: &TargetsCommand, cancel: &CancellationToken) -> Result<()> {
    let TargetsCommand::List { remote, filters } = cmd;
    if *remote && ws.remote_cache().is_none() {
        return Err(ArkError::ConfigError(
            "--remote needs an [artifacts] section in ark.toml".to_string(),
        ));
    }

    let ctx = ws.build_context(cancel.clone());
    for line in list_targets(ws, &ctx, filters, *remote).await? {
        println!("{line}");
    }
    Ok(())
}

/// One line per matching target: address, kind, short hash and (with
/// `remote`) whether the remote cache holds the hash.
pub async fn list_targets(
    ws: &Workspace,
    ctx: &BuildContext,
    filters: &[String],
    remote: bool,
) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    for address in ws.graph().sorted_addresses() {
        let name = address.as_str();
        if !filters.is_empty() && !filters.iter().any(|f| name.contains(f.as_str())) {
            continue;
        }
        let target = ws.graph().lookup_by_address(&address)?;
        let hash = match target.as_buildable() {
            Some(buildable) => {
                buildable.pre_build(ctx)?;
                buildable.short_hash()?.to_string()
            }
            None => "-".to_string(),
        };

        let mut line = format!("{name}\t{}\t{hash}", target.kind_name());
        if remote {
            let status = match target.as_cacheable() {
                Some(cacheable) => match cacheable.check_remote_cache(ctx).await {
                    Ok(true) => "remote",
                    Ok(false) => "missing",
                    Err(e) => {
                        warn!(address = %address, error = %e, "remote cache check failed");
                        "unknown"
                    }
                },
                None => "-",
            };
            line.push('\t');
            line.push_str(status);
        }
        lines.push(line);
    }
    Ok(lines)
}

pub fn debug(ws: &Workspace, cmd: &DebugCommand) -> Result<()> {
    let DebugCommand::Graph { address, format } = cmd;
    let address = address.as_deref().map(Address::parse).transpose()?;
    print!("{}", render_graph(ws, address.as_ref(), *format)?);
    Ok(())
}

pub fn render_graph(ws: &Workspace, address: Option<&Address>, format: GraphFormat) -> Result<String> {
    let graph = ws.subgraph(address)?;
    match format {
        GraphFormat::Text => Ok(graph.to_string()),
        GraphFormat::Dot => Ok(graph.dot()),
        GraphFormat::Json => Ok(format!("{}\n", graph.to_json()?)),
        GraphFormat::Png => Err(ArkError::ConfigError(
            "png output is not supported; pipe `--format dot` into graphviz".to_string(),
        )),
    }
}

pub async fn artifacts(ws: &Workspace, cmd: &ArtifactsCommand, cancel: &CancellationToken) -> Result<()> {
    if ws.remote_cache().is_none() {
        return Err(ArkError::ConfigError(
            "no remote cache configured; add an [artifacts] section to ark.toml".to_string(),
        ));
    }
    match cmd {
        ArtifactsCommand::Push { address } => {
            let address = address.as_deref().map(Address::parse).transpose()?;
            let walker = BuildWalker {
                push: true,
                push_errors_fatal: true,
                ..BuildWalker::default()
            };
            let report = ws
                .build(address.as_ref(), walker, ws.walk_options(false), cancel)
                .await?;
            info!(visited = report.completed.len(), "artifacts pushed");
        }
        ArtifactsCommand::Pull { address } => {
            let address = address.as_deref().map(Address::parse).transpose()?;
            let pulled = pull_artifacts(ws, address.as_ref(), cancel).await?;
            info!(pulled, "artifacts pulled");
        }
    }
    Ok(())
}

/// Fetch every cacheable target of the (isolated) graph that is missing
/// locally. Returns how many were downloaded.
pub async fn pull_artifacts(
    ws: &Workspace,
    address: Option<&Address>,
    cancel: &CancellationToken,
) -> Result<usize> {
    let ctx = Arc::new(ws.build_context(cancel.clone()));
    let visit = move |target: Arc<Target>| {
        let ctx = Arc::clone(&ctx);
        async move { pull_one(&target, &ctx).await }
    };
    let report = ws
        .graph_walk(address, visit, ws.walk_options(false), cancel)
        .await?;
    Ok(report.completed.iter().filter(|(_, pulled)| *pulled).count())
}

async fn pull_one(target: &Target, ctx: &BuildContext) -> Result<bool> {
    let Some(buildable) = target.as_buildable() else {
        return Ok(false);
    };
    buildable.pre_build(ctx)?;
    let Some(cacheable) = target.as_cacheable() else {
        return Ok(false);
    };
    if cacheable.check_local_build_cache(ctx)? {
        return Ok(false);
    }
    if !cacheable.check_remote_cache(ctx).await? {
        warn!(
            address = %target.address_str(),
            hash = %buildable.short_hash()?,
            "not in remote cache"
        );
        return Ok(false);
    }
    cacheable.pull_remote_cache(ctx).await?;
    Ok(true)
}

pub fn validate(ws: &Workspace) -> Result<()> {
    println!(
        "{}: {} packages, {} targets",
        ws.root().display(),
        ws.file().packages.len(),
        ws.graph().len()
    );
    Ok(())
}

pub fn clean(ws: &Workspace) -> Result<()> {
    ws.clean()
}
