// src/target/address.rs

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::errors::{ArkError, Result};

/// Segments are non-empty runs of `[A-Za-z0-9_-]`.
pub fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Canonical target identifier, `package.kind.name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    full: String,
    kind_at: usize,
    name_at: usize,
}

impl Address {
    pub fn new(package: &str, kind: &str, name: &str) -> Result<Self> {
        for (label, segment) in [("package", package), ("kind", kind), ("name", name)] {
            if !is_valid_segment(segment) {
                return Err(ArkError::ConfigError(format!(
                    "invalid {label} segment {segment:?} in address {package}.{kind}.{name}"
                )));
            }
        }
        Ok(Self {
            full: format!("{package}.{kind}.{name}"),
            kind_at: package.len() + 1,
            name_at: package.len() + kind.len() + 2,
        })
    }

    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        match parts.as_slice() {
            [package, kind, name] => Self::new(package, kind, name),
            _ => Err(ArkError::ConfigError(format!(
                "invalid address {s:?} (expected package.kind.name)"
            ))),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.full
    }

    pub fn package(&self) -> &str {
        &self.full[..self.kind_at - 1]
    }

    pub fn kind(&self) -> &str {
        &self.full[self.kind_at..self.name_at - 1]
    }

    pub fn name(&self) -> &str {
        &self.full[self.name_at..]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

impl FromStr for Address {
    type Err = ArkError;

    fn from_str(s: &str) -> Result<Self> {
        Address::parse(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.full)
    }
}
