// src/config/validate.rs

use std::collections::BTreeMap;
use std::path::{Component, Path};

use crate::config::model::{PackageDecl, RawPackage, RawWorkspaceFile, WorkspaceFile, WorkspaceSection};
use crate::errors::{ArkError, Result};
use crate::target::{Address, TargetSpec, address::is_valid_segment};

/// Keys of a target table that are not attributes.
pub const COMMON_KEYS: [&str; 5] = [
    "description",
    "depends_on",
    "source_files",
    "include_patterns",
    "exclude_patterns",
];

impl TryFrom<RawWorkspaceFile> for WorkspaceFile {
    type Error = ArkError;

    fn try_from(raw: RawWorkspaceFile) -> std::result::Result<Self, Self::Error> {
        validate_workspace_section(&raw.workspace)?;
        if let Some(artifacts) = &raw.artifacts {
            if artifacts.storage_dir.trim().is_empty() {
                return Err(ArkError::ConfigError(
                    "[artifacts].storage_dir must not be empty".to_string(),
                ));
            }
        }

        let mut packages = BTreeMap::new();
        for (name, package) in raw.package {
            let decl = validate_package(&name, package)?;
            packages.insert(name, decl);
        }

        Ok(WorkspaceFile::new_unchecked(raw.workspace, raw.artifacts, packages))
    }
}

fn validate_workspace_section(ws: &WorkspaceSection) -> Result<()> {
    if ws.concurrency == Some(0) {
        return Err(ArkError::ConfigError(
            "[workspace].concurrency must be >= 1 (got 0)".to_string(),
        ));
    }
    if ws.max_archive_bytes == 0 {
        return Err(ArkError::ConfigError(
            "[workspace].max_archive_bytes must be >= 1 (got 0)".to_string(),
        ));
    }
    check_relative_dir("[workspace].ark_dir", &ws.ark_dir)?;
    Ok(())
}

fn check_relative_dir(what: &str, dir: &str) -> Result<()> {
    let path = Path::new(dir);
    let escapes = path
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
    if dir.trim().is_empty() || escapes {
        return Err(ArkError::ConfigError(format!(
            "{what} must be a relative path inside the workspace (got {dir:?})"
        )));
    }
    Ok(())
}

fn validate_package(name: &str, raw: RawPackage) -> Result<PackageDecl> {
    if !is_valid_segment(name) {
        return Err(ArkError::ConfigError(format!(
            "invalid package name {name:?}: use letters, digits, '_' or '-'"
        )));
    }

    let dir = raw.dir.unwrap_or_else(|| name.to_string());
    if dir != "." {
        check_relative_dir(&format!("[package.{name}].dir"), &dir)?;
    }
    let dir = dir.trim_start_matches("./").trim_end_matches('/').to_string();

    let mut targets = Vec::new();
    for (kind, by_name) in raw.target {
        for (target_name, table) in by_name {
            let address = Address::new(name, &kind, &target_name)?;
            targets.push(target_spec(address, table)?);
        }
    }

    Ok(PackageDecl {
        name: name.to_string(),
        description: raw.description,
        dir: if dir == "." { String::new() } else { dir },
        targets,
    })
}

/// Split the common keys off a raw target table.
pub fn target_spec(address: Address, mut table: toml::Table) -> Result<TargetSpec> {
    let mut spec = TargetSpec::new(address);

    if let Some(value) = table.remove("description") {
        spec.description = match value {
            toml::Value::String(s) => s,
            other => {
                return Err(ArkError::ConfigError(format!(
                    "{}: `description` must be a string, got {}",
                    spec.address,
                    other.type_str()
                )));
            }
        };
    }

    spec.depends_on = string_list(&spec.address, "depends_on", table.remove("depends_on"))?
        .iter()
        .map(|s| {
            Address::parse(s).map_err(|e| {
                ArkError::ConfigError(format!("{}: depends_on entry {s:?}: {e}", spec.address))
            })
        })
        .collect::<Result<Vec<_>>>()?;
    spec.source_files = string_list(&spec.address, "source_files", table.remove("source_files"))?;
    spec.include_patterns =
        string_list(&spec.address, "include_patterns", table.remove("include_patterns"))?;
    spec.exclude_patterns =
        string_list(&spec.address, "exclude_patterns", table.remove("exclude_patterns"))?;

    for source in &spec.source_files {
        check_relative_dir(&format!("{}: source_files entry", spec.address), source)?;
    }

    spec.attributes = table;
    Ok(spec)
}

fn string_list(address: &Address, key: &str, value: Option<toml::Value>) -> Result<Vec<String>> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    let bad = || ArkError::ConfigError(format!("{address}: `{key}` must be an array of strings"));
    match value {
        toml::Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                toml::Value::String(s) => Ok(s),
                _ => Err(bad()),
            })
            .collect(),
        _ => Err(bad()),
    }
}
