// src/target/kinds/live_sync.rs

//! `live_sync`: a workload reachable through an entrypoint supervisor.
//!
//! Building it only checks the declaration; `ark run --watch` on such a
//! target streams file changes to `endpoint`.

use serde::Deserialize;
use tracing::info;

use crate::actions::{Action, ActionMatcher};
use crate::errors::{ArkError, Result};
use crate::target::capability::Capabilities;
use crate::target::context::BoxFuture;
use crate::target::kind::{BuildRequest, TargetKind, decode_attributes};
use crate::target::model::Target;
use crate::types::RestartMode;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LiveSyncAttrs {
    /// `host:port` of the entrypoint's sync listener.
    pub endpoint: String,
    /// Expected supervisor policy; the supervisor itself reads
    /// `ARK_EP_RESTART_MODE`.
    #[serde(default)]
    pub restart_mode: RestartMode,
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl LiveSyncAttrs {
    /// Read the computed attributes of a pre-built `live_sync` target.
    pub fn from_target(target: &Target) -> Result<Self> {
        if target.kind_name() != "live_sync" {
            return Err(ArkError::ConfigError(format!(
                "{} is a {} target; watch mode needs a live_sync target",
                target.address_str(),
                target.kind_name()
            )));
        }
        decode_attributes(target.address_str(), target.computed_attributes()?)
    }

    pub fn matcher(&self) -> Result<ActionMatcher> {
        ActionMatcher::new(self.actions.clone())
    }
}

#[derive(Debug, Default)]
pub struct LiveSyncKind;

impl TargetKind for LiveSyncKind {
    fn name(&self) -> &str {
        "live_sync"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::BUILDABLE
    }

    fn validate(&self, attributes: &toml::Table) -> Result<()> {
        let attrs: LiveSyncAttrs = decode_attributes(self.name(), attributes)?;
        if attrs.endpoint.trim().is_empty() {
            return Err(ArkError::ConfigError(
                "live_sync: `endpoint` must not be empty".to_string(),
            ));
        }
        if let Some(action) = attrs.actions.iter().find(|a| a.command.is_empty()) {
            return Err(ArkError::ConfigError(format!(
                "live_sync: action with patterns {:?} has an empty command",
                action.patterns
            )));
        }
        attrs.matcher()?;
        Ok(())
    }

    fn cache_enabled(&self, _attributes: &toml::Table) -> bool {
        false
    }

    fn build<'a>(&'a self, req: BuildRequest<'a>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let address = req.target.address_str();
            let attrs: LiveSyncAttrs = decode_attributes(address, req.attributes)?;
            info!(
                address = %address,
                endpoint = %attrs.endpoint,
                restart_mode = %attrs.restart_mode,
                actions = attrs.actions.len(),
                "live sync target ready"
            );
            Ok(())
        })
    }
}
