// src/types.rs

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Supervisor policy for restarting the child after an archive was unpacked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartMode {
    /// Restart after every unarchive.
    #[default]
    Auto,
    /// Restart only on an explicit stop request.
    Manual,
}

impl RestartMode {
    pub fn restarts_after_unarchive(self) -> bool {
        matches!(self, RestartMode::Auto)
    }
}

impl FromStr for RestartMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(RestartMode::Auto),
            "manual" => Ok(RestartMode::Manual),
            other => Err(format!(
                "invalid restart mode: {other} (expected \"auto\" or \"manual\")"
            )),
        }
    }
}

impl fmt::Display for RestartMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartMode::Auto => f.write_str("auto"),
            RestartMode::Manual => f.write_str("manual"),
        }
    }
}

/// Output format for `ark debug graph`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum GraphFormat {
    #[default]
    Text,
    Dot,
    Json,
    Png,
}
