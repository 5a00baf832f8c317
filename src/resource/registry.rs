//! Resource Registry
//!
//! An explicit, ordered list of resource type constructors. The order is
//! hand-curated and encodes deletion dependencies: a child type always comes
//! before its parent. The registry is built once at startup and passed into
//! the run; there is no process-wide instance.
//!
//! Runs process every region before the global scope, so all regional types
//! must be registered before the first global one. Registration enforces it.

use super::{ResourceType, Scope};
use crate::error::ConfigError;
use std::collections::HashSet;
use std::sync::Arc;

/// Builds a fresh, uninitialized resource type value
pub type ResourceConstructor = Arc<dyn Fn() -> Box<dyn ResourceType> + Send + Sync>;

#[derive(Clone)]
struct Entry {
    type_name: String,
    is_global: bool,
    construct: ResourceConstructor,
}

/// Ordered resource type constructors
#[derive(Clone, Default)]
pub struct Registry {
    entries: Vec<Entry>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| &e.type_name))
            .finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a resource type. Its position in the processing order is the
    /// registration order. Regional types after a global one are rejected.
    pub fn register<F>(&mut self, construct: F) -> Result<(), ConfigError>
    where
        F: Fn() -> Box<dyn ResourceType> + Send + Sync + 'static,
    {
        let sample = construct();
        let type_name = sample.type_name().to_string();
        if self.contains(&type_name) {
            return Err(ConfigError::DuplicateResourceType(type_name));
        }
        if !sample.is_global() {
            if let Some(global) = self.entries.iter().find(|e| e.is_global) {
                return Err(ConfigError::RegionalAfterGlobal {
                    regional: type_name,
                    global: global.type_name.clone(),
                });
            }
        }

        self.entries.push(Entry {
            type_name,
            is_global: sample.is_global(),
            construct: Arc::new(construct),
        });
        Ok(())
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.entries.iter().any(|e| e.type_name == type_name)
    }

    /// Type names in processing order
    pub fn type_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.type_name.as_str()).collect()
    }

    /// `(type_name, is_global)` pairs in processing order
    pub fn describe(&self) -> Vec<(&str, bool)> {
        self.entries
            .iter()
            .map(|e| (e.type_name.as_str(), e.is_global))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Narrow the registry to the requested types, keeping registry order.
    ///
    /// An empty `include` selects everything. Unknown names in either list
    /// are rejected so that a typo never silently widens a run.
    pub fn select(&self, include: &[String], exclude: &[String]) -> Result<Registry, ConfigError> {
        for name in include.iter().chain(exclude) {
            if !self.contains(name) {
                return Err(ConfigError::UnknownResourceType(name.clone()));
            }
        }

        let include: HashSet<&str> = include.iter().map(String::as_str).collect();
        let exclude: HashSet<&str> = exclude.iter().map(String::as_str).collect();

        let entries = self
            .entries
            .iter()
            .filter(|e| include.is_empty() || include.contains(e.type_name.as_str()))
            .filter(|e| !exclude.contains(e.type_name.as_str()))
            .cloned()
            .collect();

        Ok(Registry { entries })
    }

    /// Fresh resource type values for one scope, in processing order.
    ///
    /// The global scope gets only global types; a regional scope gets only
    /// regional ones.
    pub fn instantiate(&self, scope: &Scope) -> Vec<Box<dyn ResourceType>> {
        self.entries
            .iter()
            .filter(|e| e.is_global == scope.is_global)
            .map(|e| (e.construct)())
            .collect()
    }
}
