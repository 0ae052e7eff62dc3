// src/config/env.rs

//! Parameters of `ark-entrypoint`, read from the environment.

use crate::errors::{ArkError, Result};
use crate::types::RestartMode;

pub const DEFAULT_PORT: u16 = 9000;

/// Entrypoint settings.
///
/// | variable | default |
/// |---|---|
/// | `ARK_EP_RESTART_MODE` | `auto` |
/// | `ARK_EP_GRPC_PORT` | `9000` |
/// | `LOG_SINK_GRPC_PORT` | `9000`, used when `ARK_LOG_SINK_URL` has no port |
/// | `ARK_USER_TOKEN`, `ARK_LOG_SINK_URL` | unset (no log shipping) |
/// | `ARK_ORG_ID`, `ARK_PROJECT_ID` | `default` |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrypointEnv {
    pub restart_mode: RestartMode,
    /// Sync listener port.
    pub sync_port: u16,
    pub log_sink_port: u16,
    pub user_token: Option<String>,
    pub log_sink_url: Option<String>,
    pub org_id: String,
    pub project_id: String,
}

impl EntrypointEnv {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary lookup; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let restart_mode = match get("ARK_EP_RESTART_MODE") {
            Some(v) => v.parse().map_err(ArkError::ConfigError)?,
            None => RestartMode::default(),
        };

        let port = |key: &str| -> Result<u16> {
            match get(key) {
                Some(v) => v.parse().map_err(|_| {
                    ArkError::ConfigError(format!("{key} must be a port number (got {v:?})"))
                }),
                None => Ok(DEFAULT_PORT),
            }
        };

        Ok(Self {
            restart_mode,
            sync_port: port("ARK_EP_GRPC_PORT")?,
            log_sink_port: port("LOG_SINK_GRPC_PORT")?,
            user_token: get("ARK_USER_TOKEN"),
            log_sink_url: get("ARK_LOG_SINK_URL"),
            org_id: get("ARK_ORG_ID").unwrap_or_else(|| "default".to_string()),
            project_id: get("ARK_PROJECT_ID").unwrap_or_else(|| "default".to_string()),
        })
    }

    pub fn log_shipping_enabled(&self) -> bool {
        self.user_token.is_some() && self.log_sink_url.is_some()
    }

    /// `host:port` of the log sink; a bare host gets `log_sink_port`.
    pub fn log_sink_endpoint(&self) -> Option<String> {
        let url = self.log_sink_url.as_deref()?;
        let has_port = url
            .rsplit_once(':')
            .is_some_and(|(_, port)| port.parse::<u16>().is_ok());
        Some(if has_port {
            url.to_string()
        } else {
            format!("{url}:{}", self.log_sink_port)
        })
    }
}
