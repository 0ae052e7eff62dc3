// src/actions.rs

//! Selection of declared live-sync actions for a batch of changed files.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::patterns::PatternSet;

/// A command to run on the remote side when changed files match `patterns`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Action {
    pub command: Vec<String>,
    #[serde(default)]
    pub workdir: String,
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl Action {
    pub fn new<S: Into<String>>(command: Vec<S>, workdir: &str, patterns: Vec<S>) -> Self {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            workdir: workdir.to_string(),
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }
}

/// Declared actions with their include patterns compiled once.
#[derive(Debug, Clone, Default)]
pub struct ActionMatcher {
    actions: Vec<(Action, PatternSet)>,
}

impl ActionMatcher {
    pub fn new(actions: Vec<Action>) -> Result<Self> {
        let actions = actions
            .into_iter()
            .map(|action| {
                let set = PatternSet::compile(&action.patterns)?;
                Ok((action, set))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { actions })
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Actions whose patterns match a single relative path.
    pub fn actions_for<'a>(&'a self, rel: &'a str) -> impl Iterator<Item = &'a Action> + 'a {
        self.actions
            .iter()
            .filter(move |(_, set)| set.matches_file(rel))
            .map(|(action, _)| action)
    }

    /// Actions matched by any of `rels`, in declaration order, each identity
    /// at most once.
    pub fn select<'a, I>(&self, rels: I) -> Vec<Action>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let rels: Vec<&str> = rels.into_iter().collect();
        let mut seen: HashSet<&Action> = HashSet::new();
        let mut selected = Vec::new();

        for (action, set) in &self.actions {
            if seen.contains(action) {
                continue;
            }
            if rels.iter().any(|rel| set.matches_file(rel)) {
                seen.insert(action);
                selected.push(action.clone());
            }
        }

        selected
    }
}
