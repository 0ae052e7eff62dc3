// src/target/kinds/local_exec.rs

//! `local_exec`: run a command on the build host.

use std::collections::BTreeMap;
use std::process::Stdio;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::errors::{ArkError, Result};
use crate::target::capability::Capabilities;
use crate::target::context::BoxFuture;
use crate::target::kind::{BuildRequest, TargetKind, decode_attributes};

/// Environment variable pointing the command at its output directory.
pub const ARTIFACTS_DIR_ENV: &str = "ARK_ARTIFACTS_DIR";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalExecAttrs {
    /// Program and arguments; not run through a shell.
    pub command: Vec<String>,
    /// Relative to the package directory.
    #[serde(default)]
    pub workdir: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default = "default_cache")]
    pub cache: bool,
}

fn default_cache() -> bool {
    true
}

#[derive(Debug, Default)]
pub struct LocalExecKind;

impl TargetKind for LocalExecKind {
    fn name(&self) -> &str {
        "local_exec"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::CACHEABLE
    }

    fn validate(&self, attributes: &toml::Table) -> Result<()> {
        let attrs: LocalExecAttrs = decode_attributes(self.name(), attributes)?;
        if attrs.command.is_empty() {
            return Err(ArkError::ConfigError(
                "local_exec: `command` must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    fn cache_enabled(&self, attributes: &toml::Table) -> bool {
        attributes
            .get("cache")
            .and_then(toml::Value::as_bool)
            .unwrap_or(true)
    }

    fn build<'a>(&'a self, req: BuildRequest<'a>) -> BoxFuture<'a, Result<()>> {
        Box::pin(run_command(req))
    }
}

async fn run_command(req: BuildRequest<'_>) -> Result<()> {
    let address = req.target.address_str().to_string();
    let attrs: LocalExecAttrs = decode_attributes(&address, req.attributes)?;
    let Some((program, args)) = attrs.command.split_first() else {
        return Err(ArkError::ConfigError(format!("{address}: empty command")));
    };

    let package = req.ctx.workspace.package(req.target.spec().address.package())?;
    let workdir = match &attrs.workdir {
        Some(dir) => package.dir.join(dir),
        None => package.dir.clone(),
    };

    info!(address = %address, cmd = ?attrs.command, workdir = %workdir.display(), "starting build command");

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(&workdir)
        .envs(&attrs.env)
        .env(ARTIFACTS_DIR_ENV, req.out_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| ArkError::build(&address, format!("spawning {program}: {e}")))?;

    if let Some(stdout) = child.stdout.take() {
        let address = address.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!(address = %address, "stdout: {}", line);
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        let address = address.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(address = %address, "stderr: {}", line);
            }
        });
    }

    tokio::select! {
        status = child.wait() => {
            let status = status.map_err(|e| ArkError::build(&address, format!("waiting for command: {e}")))?;
            if status.success() {
                info!(address = %address, "build command finished");
                Ok(())
            } else {
                let code = status.code().unwrap_or(-1);
                Err(ArkError::build(&address, format!("command exited with status {code}")))
            }
        }
        _ = req.ctx.cancel.cancelled() => {
            warn!(address = %address, "cancellation requested; killing build command");
            if let Err(e) = child.kill().await {
                warn!(address = %address, error = %e, "failed to kill build command");
            }
            Err(ArkError::Cancelled)
        }
    }
}
