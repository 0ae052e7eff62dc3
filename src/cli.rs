// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::types::GraphFormat;

/// Command-line arguments for `ark`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "ark",
    version,
    about = "Build workspace targets with content-addressed caching and live-sync them to running workloads.",
    long_about = None
)]
pub struct CliArgs {
    /// Workspace root (directory holding `ark.toml`).
    ///
    /// Default: the nearest ancestor of the current directory with an
    /// `ark.toml`.
    #[arg(long, global = true, value_name = "DIR")]
    pub workspace: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `ARK_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Build a target and its dependencies.
    Run(RunArgs),

    /// Inspect declared targets.
    #[command(subcommand)]
    Targets(TargetsCommand),

    /// Debugging helpers.
    #[command(subcommand)]
    Debug(DebugCommand),

    /// Move artifacts between the local and the remote cache.
    #[command(subcommand)]
    Artifacts(ArtifactsCommand),

    /// Remove the local artifact cache.
    Clean,

    /// Load the workspace file and check the target graph.
    Validate,

    /// Print the version.
    Version,
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Target address, `package.kind.name`.
    pub address: String,

    /// Rebuild even when a cached artifact exists.
    #[arg(long)]
    pub force: bool,

    /// After building, stream file changes to the target's entrypoint.
    #[arg(long)]
    pub watch: bool,

    /// Upload built artifacts to the remote cache.
    #[arg(long)]
    pub push: bool,

    /// Try the remote cache before building.
    #[arg(long)]
    pub pull: bool,

    /// Abort every chain at the first failure.
    #[arg(long = "stop_on_first_error", alias = "stop-on-first-error")]
    pub stop_on_first_error: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum TargetsCommand {
    /// List targets with kind and short hash.
    List {
        /// Also report whether the remote cache holds each hash.
        #[arg(long)]
        remote: bool,

        /// Keep addresses containing any of these substrings.
        #[arg(long, num_args = 1.., value_name = "FILTER")]
        filters: Vec<String>,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum DebugCommand {
    /// Print the target graph, or the sub-graph of one address.
    Graph {
        address: Option<String>,

        #[arg(long, value_enum, default_value_t = GraphFormat::Text)]
        format: GraphFormat,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum ArtifactsCommand {
    /// Build (if needed) and upload every cacheable target.
    Push { address: Option<String> },

    /// Download every cacheable target missing locally.
    Pull { address: Option<String> },
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
