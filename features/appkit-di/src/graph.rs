use std::collections::{btree_map::Entry, BTreeMap};

use crate::{
    descriptor::ComponentDescriptor,
    errors::{GraphError, GraphErrors},
    types::{ComponentId, Scope},
};

/// Ordered partition of the graph into dependency-respecting levels
///
/// Every dependency of an identity in level `i` lives in some level `< i`,
/// so members of one level may start in any order, or in parallel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    levels: Vec<Vec<ComponentId>>,
}

impl Schedule {
    pub fn levels(&self) -> &[Vec<ComponentId>] {
        &self.levels
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// Registry of component descriptors plus the adjacency derived from their
/// declared dependencies
///
/// Validated once at resolution time, not lazily per component - a defective
/// graph becomes an early startup error instead of a late runtime one.
#[derive(Default)]
pub struct DependencyGraph {
    map: BTreeMap<ComponentId, ComponentDescriptor>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a descriptor, failing on a duplicate identity
    pub fn register(&mut self, descriptor: ComponentDescriptor) -> Result<(), GraphError> {
        match self.map.entry(descriptor.identity().clone()) {
            Entry::Occupied(existing) => {
                Err(GraphError::DuplicateIdentity(existing.key().clone()))
            }
            Entry::Vacant(slot) => {
                tracing::debug!("registered component '{}'", slot.key());
                slot.insert(descriptor);
                Ok(())
            }
        }
    }

    pub fn get(&self, identity: &ComponentId) -> Option<&ComponentDescriptor> {
        self.map.get(identity)
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.map.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Compute the level schedule
    ///
    /// Checks run in order of specificity: missing references first, then
    /// scope compatibility, then cycle detection over whatever remains. All
    /// issues of the failing stage are collected rather than reported one by
    /// one.
    pub fn resolve(&self) -> Result<Schedule, GraphErrors> {
        let mut errors = Vec::new();

        for (identity, descriptor) in &self.map {
            for dependency in descriptor.dependencies() {
                let Some(dependency_descriptor) = self.map.get(dependency) else {
                    errors.push(GraphError::UnknownDependency {
                        required_by: identity.clone(),
                        missing: dependency.clone(),
                    });
                    continue;
                };

                if descriptor.scope() == Scope::Singleton
                    && dependency_descriptor.scope() == Scope::Request
                {
                    errors.push(GraphError::ScopeMismatch {
                        required_by: identity.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }

        if !errors.is_empty() {
            return Err(GraphErrors { errors });
        }

        self.peel_levels()
    }

    /// Kahn's algorithm, peeling zero-in-degree sets level by level
    fn peel_levels(&self) -> Result<Schedule, GraphErrors> {
        let mut in_degree: BTreeMap<&ComponentId, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&ComponentId, Vec<&ComponentId>> = BTreeMap::new();

        for (identity, descriptor) in &self.map {
            in_degree.insert(identity, descriptor.dependencies().len());
            for dependency in descriptor.dependencies() {
                dependents.entry(dependency).or_default().push(identity);
            }
        }

        let mut levels = Vec::new();
        while !in_degree.is_empty() {
            // BTreeMap iteration keeps the in-level order stable
            let ready: Vec<ComponentId> = in_degree
                .iter()
                .filter(|(_, degree)| **degree == 0)
                .map(|(identity, _)| (*identity).clone())
                .collect();

            if ready.is_empty() {
                // No progress - whatever is left sits on at least one cycle
                let identities: Vec<ComponentId> = in_degree.keys().map(|id| (*id).clone()).collect();
                return Err(GraphError::CyclicDependency { identities }.into());
            }

            for identity in &ready {
                in_degree.remove(identity);
                for dependent in dependents.get(identity).into_iter().flatten() {
                    if let Some(degree) = in_degree.get_mut(*dependent) {
                        *degree -= 1;
                    }
                }
            }

            levels.push(ready);
        }

        Ok(Schedule { levels })
    }
}

impl std::fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_struct("DependencyGraph");
        for (identity, descriptor) in &self.map {
            map.field(identity.as_str(), &descriptor.dependencies());
        }
        map.finish()
    }
}
