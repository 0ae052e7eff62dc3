// src/target/kinds/local_file.rs

use serde::Deserialize;
use tracing::debug;

use crate::errors::{ArkError, Result};
use crate::target::capability::Capabilities;
use crate::target::context::BoxFuture;
use crate::target::kind::{BuildRequest, TargetKind, decode_attributes};

/// Attributes of `local_file`: render `content` into `filename`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalFileAttrs {
    pub filename: String,
    pub content: String,
}

#[derive(Debug, Default)]
pub struct LocalFileKind;

impl TargetKind for LocalFileKind {
    fn name(&self) -> &str {
        "local_file"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::CACHEABLE
    }

    fn validate(&self, attributes: &toml::Table) -> Result<()> {
        let attrs: LocalFileAttrs = decode_attributes(self.name(), attributes)?;
        if attrs.filename.is_empty()
            || attrs.filename.starts_with('/')
            || attrs.filename.split('/').any(|c| c == "..")
        {
            return Err(ArkError::ConfigError(format!(
                "local_file: filename {:?} must be a relative path without `..`",
                attrs.filename
            )));
        }
        Ok(())
    }

    fn build<'a>(&'a self, req: BuildRequest<'a>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let address = req.target.address_str();
            let attrs: LocalFileAttrs = decode_attributes(address, req.attributes)?;
            let path = req.out_dir.join(&attrs.filename);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, attrs.content.as_bytes()).await?;
            debug!(address = %address, file = %path.display(), "rendered file");
            Ok(())
        })
    }
}
