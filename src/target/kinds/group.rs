// src/target/kinds/group.rs

use crate::errors::{ArkError, Result};
use crate::target::capability::Capabilities;
use crate::target::kind::TargetKind;

/// Addressable-only kind that aggregates its dependencies.
#[derive(Debug, Default)]
pub struct GroupKind;

impl TargetKind for GroupKind {
    fn name(&self) -> &str {
        "group"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::ADDRESSABLE
    }

    fn validate(&self, attributes: &toml::Table) -> Result<()> {
        match attributes.keys().next() {
            Some(key) => Err(ArkError::ConfigError(format!(
                "group targets take no attributes (found {key:?})"
            ))),
            None => Ok(()),
        }
    }
}
