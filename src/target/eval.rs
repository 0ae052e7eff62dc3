// src/target/eval.rs

//! `${...}` attribute expressions.
//!
//! Supported references:
//! - `self.{name,kind,package,address,dir}`
//! - `package.{name,description,dir}`
//! - `workspace.{root,ark_dir}`
//! - `<package>.<kind>.<name>.{address,name,kind,package,hash,short_hash,artifacts_dir}`

use regex::Regex;

use crate::cache::LocalCache;
use crate::errors::{ArkError, Result};
use crate::target::address::Address;
use crate::target::capability::Addressable;
use crate::target::context::{PackageInfo, WorkspaceInfo};
use crate::target::model::Target;
use crate::target::registry::TargetRegistry;

const SCOPES: [&str; 3] = ["self", "package", "workspace"];

/// Finds and substitutes `${...}` expressions in attribute tables.
#[derive(Debug, Clone)]
pub struct Interpolator {
    re: Regex,
}

impl Interpolator {
    pub fn new() -> Result<Self> {
        let re = Regex::new(r"\$\{\s*([^}\s]+)\s*\}")
            .map_err(|e| ArkError::ConfigError(format!("expression pattern: {e}")))?;
        Ok(Self { re })
    }

    /// Every expression body found in string values of `table`.
    pub fn expressions(&self, table: &toml::Table) -> Vec<String> {
        let mut out = Vec::new();
        for value in table.values() {
            self.collect(value, &mut out);
        }
        out
    }

    fn collect(&self, value: &toml::Value, out: &mut Vec<String>) {
        match value {
            toml::Value::String(s) => {
                out.extend(self.re.captures_iter(s).map(|c| c[1].to_string()));
            }
            toml::Value::Array(items) => items.iter().for_each(|v| self.collect(v, out)),
            toml::Value::Table(t) => t.values().for_each(|v| self.collect(v, out)),
            _ => {}
        }
    }

    /// Addresses of other targets referenced by `table`; these become DAG
    /// edges.
    pub fn referenced_addresses(&self, table: &toml::Table) -> Result<Vec<Address>> {
        let mut addresses = Vec::new();
        for expr in self.expressions(table) {
            let parts: Vec<&str> = expr.split('.').collect();
            if SCOPES.contains(&parts[0]) {
                continue;
            }
            if parts.len() != 4 {
                return Err(ArkError::ConfigError(format!(
                    "malformed reference ${{{expr}}} (expected package.kind.name.attribute)"
                )));
            }
            let address = Address::new(parts[0], parts[1], parts[2])?;
            if !addresses.contains(&address) {
                addresses.push(address);
            }
        }
        Ok(addresses)
    }

    /// Substitute every expression in `table` using `ctx`.
    pub fn evaluate(&self, table: &toml::Table, ctx: &EvalContext<'_>) -> Result<toml::Table> {
        let mut out = toml::Table::new();
        for (key, value) in table {
            out.insert(key.clone(), self.evaluate_value(value, ctx)?);
        }
        Ok(out)
    }

    fn evaluate_value(&self, value: &toml::Value, ctx: &EvalContext<'_>) -> Result<toml::Value> {
        Ok(match value {
            toml::Value::String(s) => toml::Value::String(self.substitute(s, ctx)?),
            toml::Value::Array(items) => toml::Value::Array(
                items
                    .iter()
                    .map(|v| self.evaluate_value(v, ctx))
                    .collect::<Result<Vec<_>>>()?,
            ),
            toml::Value::Table(t) => toml::Value::Table(self.evaluate(t, ctx)?),
            other => other.clone(),
        })
    }

    fn substitute(&self, s: &str, ctx: &EvalContext<'_>) -> Result<String> {
        let mut out = String::with_capacity(s.len());
        let mut last = 0;
        for caps in self.re.captures_iter(s) {
            let Some(whole) = caps.get(0) else { continue };
            out.push_str(&s[last..whole.start()]);
            out.push_str(&ctx.resolve(&caps[1])?);
            last = whole.end();
        }
        out.push_str(&s[last..]);
        Ok(out)
    }
}

/// Evaluation scope for one target.
pub struct EvalContext<'a> {
    pub target: &'a Target,
    pub package: &'a PackageInfo,
    pub workspace: &'a WorkspaceInfo,
    pub siblings: &'a TargetRegistry,
    pub local_cache: &'a LocalCache,
}

impl EvalContext<'_> {
    pub fn resolve(&self, expr: &str) -> Result<String> {
        let parts: Vec<&str> = expr.split('.').collect();
        let unresolved = || {
            ArkError::ConfigError(format!(
                "{}: unresolved reference ${{{expr}}}",
                self.target.address()
            ))
        };

        match parts.as_slice() {
            ["self", "hash" | "short_hash" | "artifacts_dir"] => Err(ArkError::ConfigError(format!(
                "{}: ${{{expr}}} depends on the target's own hash",
                self.target.address()
            ))),
            ["self", attr] => address_field(self.target.address(), attr)
                .or_else(|| (*attr == "dir").then(|| self.package.dir.display().to_string()))
                .ok_or_else(unresolved),
            ["package", "name"] => Ok(self.package.name.clone()),
            ["package", "description"] => Ok(self.package.description.clone()),
            ["package", "dir"] => Ok(self.package.dir.display().to_string()),
            ["workspace", "root"] => Ok(self.workspace.root.display().to_string()),
            ["workspace", "ark_dir"] => Ok(self.workspace.ark_dir.display().to_string()),
            [package, kind, name, attr] => {
                let address = Address::new(package, kind, name)?;
                let sibling = self.siblings.lookup(&address)?;
                if let Some(v) = address_field(&address, attr) {
                    return Ok(v);
                }
                let hash = sibling.computed_hash().ok_or_else(|| {
                    ArkError::ConfigError(format!(
                        "{}: {address} has not been evaluated yet",
                        self.target.address()
                    ))
                })?;
                match *attr {
                    "hash" => Ok(hash.to_string()),
                    "short_hash" => Ok(crate::hash::short_hash(hash).to_string()),
                    "artifacts_dir" => Ok(self
                        .local_cache
                        .artifact_dir(&address, hash)
                        .display()
                        .to_string()),
                    _ => Err(unresolved()),
                }
            }
            _ => Err(unresolved()),
        }
    }
}

fn address_field(address: &Address, attr: &str) -> Option<String> {
    match attr {
        "address" => Some(address.to_string()),
        "name" => Some(address.name().to_string()),
        "kind" => Some(address.kind().to_string()),
        "package" => Some(address.package().to_string()),
        _ => None,
    }
}
