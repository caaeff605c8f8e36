use super::keywords::KeywordValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),
}

/// One action line of an input script: an action type, an optional label and its
/// keyword/value pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub name: String,
    #[serde(flatten)]
    pub keywords: BTreeMap<String, KeywordValue>,
}

impl ActionInput {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            label: None,
            name: name.into(),
            keywords: BTreeMap::new(),
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn keyword(mut self, key: impl Into<String>, value: impl Into<KeywordValue>) -> Self {
        self.keywords.insert(key.into(), value.into());
        self
    }

    pub fn flag(self, key: impl Into<String>) -> Self {
        self.keyword(key, true)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub natoms: usize,
    pub parallel: bool,
    pub min_parallel_tasks: usize,
    /// Values evaluated on every step whether or not a bias needs them.
    pub watch: Vec<String>,
}

#[derive(Default)]
pub struct EngineConfigBuilder {
    natoms: Option<usize>,
    parallel: Option<bool>,
    min_parallel_tasks: Option<usize>,
    watch: Vec<String>,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn natoms(mut self, natoms: usize) -> Self {
        self.natoms = Some(natoms);
        self
    }
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = Some(parallel);
        self
    }
    pub fn min_parallel_tasks(mut self, tasks: usize) -> Self {
        self.min_parallel_tasks = Some(tasks);
        self
    }
    pub fn watch(mut self, value: impl Into<String>) -> Self {
        self.watch.push(value.into());
        self
    }
    pub fn watch_all(mut self, values: impl IntoIterator<Item = String>) -> Self {
        self.watch.extend(values);
        self
    }

    pub fn build(self) -> Result<EngineConfig, ConfigError> {
        Ok(EngineConfig {
            natoms: self
                .natoms
                .ok_or(ConfigError::MissingParameter("natoms"))?,
            parallel: self.parallel.unwrap_or(cfg!(feature = "parallel")),
            min_parallel_tasks: self.min_parallel_tasks.unwrap_or(64),
            watch: self.watch,
        })
    }
}
