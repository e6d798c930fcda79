//! Name to action lookup.

use super::Action;
use crate::error::{Result, WirecallError};
use crate::filter::{Filter, FilterPipeline};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A group of actions sharing a declaring unit and its class-level filters.
pub struct ServiceUnit {
    name: String,
    filters: Vec<Arc<dyn Filter>>,
    actions: Vec<Action>,
}

impl ServiceUnit {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filters: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Class-level filter applied to every action of the unit.
    pub fn filter(mut self, filter: impl Filter) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    pub fn action(mut self, mut action: Action) -> Self {
        action.set_service(&self.name);
        self.actions.push(action);
        self
    }
}

struct Entry {
    action: Arc<Action>,
    class_filters: Arc<[Arc<dyn Filter>]>,
    pipeline: FilterPipeline,
}

/// Registry of local actions, keyed by exact name.
///
/// Populated during startup and read-only afterwards; share it behind an
/// `Arc` once every service is registered.
#[derive(Default)]
pub struct ActionRegistry {
    entries: HashMap<String, Entry>,
    global_filters: Vec<Arc<dyn Filter>>,
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .field("global_filters", &self.global_filters.len())
            .finish()
    }
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a standalone action with no class-level filters.
    pub fn register(&mut self, action: Action) -> Result<()> {
        self.ensure_free(action.name())?;
        self.insert(action, Arc::from(Vec::new()));
        Ok(())
    }

    /// Register every action of a unit, or none of them.
    pub fn register_service(&mut self, unit: ServiceUnit) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for action in &unit.actions {
            self.ensure_free(action.name())?;
            if !seen.insert(action.name()) {
                return Err(WirecallError::DuplicateName {
                    name: action.name().to_string(),
                });
            }
        }

        let class_filters: Arc<[Arc<dyn Filter>]> = Arc::from(unit.filters);
        let count = unit.actions.len();
        for action in unit.actions {
            self.insert(action, class_filters.clone());
        }
        debug!("Registered service {} with {} actions", unit.name, count);
        Ok(())
    }

    /// Add a filter that wraps every action, present and future.
    pub fn add_global_filter(&mut self, filter: impl Filter) {
        self.global_filters.push(Arc::new(filter));
        for entry in self.entries.values_mut() {
            entry.pipeline = FilterPipeline::build(
                entry.action.filters(),
                &entry.class_filters,
                &self.global_filters,
            );
        }
    }

    /// Find an action by exact name.
    pub fn resolve(&self, name: &str) -> Result<Arc<Action>> {
        self.lookup(name).map(|(action, _)| action)
    }

    /// Find an action together with its assembled filter pipeline.
    pub fn lookup(&self, name: &str) -> Result<(Arc<Action>, FilterPipeline)> {
        self.entries
            .get(name)
            .map(|entry| (entry.action.clone(), entry.pipeline.clone()))
            .ok_or_else(|| WirecallError::NotFound {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn ensure_free(&self, name: &str) -> Result<()> {
        if self.entries.contains_key(name) {
            return Err(WirecallError::DuplicateName {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn insert(&mut self, action: Action, class_filters: Arc<[Arc<dyn Filter>]>) {
        let pipeline =
            FilterPipeline::build(action.filters(), &class_filters, &self.global_filters);
        debug!(
            "Registered action {} ({} filters)",
            action.name(),
            pipeline.len()
        );
        self.entries.insert(
            action.name().to_string(),
            Entry {
                action: Arc::new(action),
                class_filters,
                pipeline,
            },
        );
    }
}
