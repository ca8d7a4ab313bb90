use std::{collections::BTreeMap, fmt};

use crate::types::{ComponentId, Instance, Scope};

/// State machine of one realized instance within its store
///
/// `Stopped` is terminal for the store's lifetime. `Failed` marks a factory
/// or hook failure; a later start pass over the same store may retry the
/// component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Running,
    Stopping,
    Stopped,
    Failed,
}

struct Slot {
    instance: Option<Instance>,
    state: InstanceState,
}

/// Holds realized instances for one scope
///
/// One store exists for the singleton scope (process lifetime) and one fresh
/// store per request context. No interior locking: the orchestrator's
/// level-by-level barrier is the only serialization the store needs.
pub struct ScopeStore {
    scope: Scope,
    slots: BTreeMap<ComponentId, Slot>,
}

impl ScopeStore {
    pub fn new(scope: Scope) -> Self {
        ScopeStore {
            scope,
            slots: BTreeMap::new(),
        }
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Number of components this store has ever realized or tried to
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn state(&self, identity: &str) -> Option<InstanceState> {
        self.slots.get(identity).map(|slot| slot.state)
    }

    /// The instance for `identity`, only while it is `Running`
    pub fn running(&self, identity: &str) -> Option<&Instance> {
        self.slots
            .get(identity)
            .filter(|slot| slot.state == InstanceState::Running)
            .and_then(|slot| slot.instance.as_ref())
    }

    pub fn is_running(&self, identity: &str) -> bool {
        self.running(identity).is_some()
    }

    /// All instances currently in `Running` state, in identity order
    pub fn all_running(&self) -> impl Iterator<Item = &Instance> {
        self.slots
            .values()
            .filter(|slot| slot.state == InstanceState::Running)
            .filter_map(|slot| slot.instance.as_ref())
    }

    pub(crate) fn insert_running(&mut self, instance: Instance) {
        self.slots.insert(
            instance.identity.clone(),
            Slot {
                instance: Some(instance),
                state: InstanceState::Running,
            },
        );
    }

    pub(crate) fn mark_stopping(&mut self, identity: &str) {
        if let Some(slot) = self.slots.get_mut(identity) {
            slot.state = InstanceState::Stopping;
        }
    }

    /// Terminal success: the instance is dropped so its resources release
    pub(crate) fn mark_stopped(&mut self, identity: &str) {
        if let Some(slot) = self.slots.get_mut(identity) {
            slot.state = InstanceState::Stopped;
            slot.instance = None;
        }
    }

    /// Record a failure, whether or not the component ever held an instance
    pub(crate) fn mark_failed(&mut self, identity: &ComponentId) {
        let slot = self.slots.entry(identity.clone()).or_insert(Slot {
            instance: None,
            state: InstanceState::Failed,
        });
        slot.state = InstanceState::Failed;
        slot.instance = None;
    }
}

impl fmt::Debug for ScopeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_struct("ScopeStore");
        map.field("scope", &self.scope);
        for (identity, slot) in &self.slots {
            map.field(identity.as_str(), &slot.state);
        }
        map.finish()
    }
}
