//! Introspection surface
//!
//! Read-only debug accessors, available only when the store was created
//! with the `debug` option. Everything returned is an owned structural
//! copy; nothing can leak mutation back into the registry.

use serde_json::Value;

use super::Store;

/// Structural copy of a compiled condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionInfo {
    pub kind: String,
    pub passive: bool,
    pub required: bool,
    pub target: Option<String>,
}

/// Structural copy of a compiled updater.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdaterInfo {
    /// Reducer registration order within the owning epic.
    pub index: usize,
    pub conditions: Vec<ConditionInfo>,
}

/// Structural copy of a registered listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerInfo {
    pub conditions: Vec<ConditionInfo>,
}

/// Debug read accessor over a store.
pub struct Inspector<'a> {
    store: &'a Store,
}

impl Store {
    /// The introspection surface; `None` unless the store was created with
    /// the `debug` option.
    pub fn inspect(&self) -> Option<Inspector<'_>> {
        self.shared.options.debug.then(|| Inspector { store: self })
    }
}

impl Inspector<'_> {
    /// Committed state of a singleton epic (or the instanced base).
    pub fn state(&self, epic: &str) -> Option<Value> {
        let inner = self.store.shared.inner.borrow();
        inner
            .registry
            .epics
            .get(epic)
            .and_then(|e| e.base.state.as_value().cloned())
    }

    /// Committed private scope of a singleton epic.
    pub fn scope(&self, epic: &str) -> Option<Value> {
        let inner = self.store.shared.inner.borrow();
        inner
            .registry
            .epics
            .get(epic)
            .and_then(|e| e.base.scope.as_value().cloned())
    }

    /// Committed state of one instance of an instanced epic.
    pub fn instance_state(&self, epic: &str, id: &str) -> Option<Value> {
        let inner = self.store.shared.inner.borrow();
        inner
            .registry
            .epics
            .get(epic)
            .and_then(|e| e.instances.as_ref()?.get(id))
            .and_then(|i| i.state.as_value().cloned())
    }

    /// Committed scope of one instance of an instanced epic.
    pub fn instance_scope(&self, epic: &str, id: &str) -> Option<Value> {
        let inner = self.store.shared.inner.borrow();
        inner
            .registry
            .epics
            .get(epic)
            .and_then(|e| e.instances.as_ref()?.get(id))
            .and_then(|i| i.scope.as_value().cloned())
    }

    /// Compiled updaters of an epic, in iteration order.
    pub fn updaters(&self, epic: &str) -> Vec<UpdaterInfo> {
        let inner = self.store.shared.inner.borrow();
        inner
            .registry
            .epics
            .get(epic)
            .map(|e| {
                e.updaters
                    .iter()
                    .map(|u| UpdaterInfo {
                        index: u.index,
                        conditions: u.conditions.iter().map(condition_info).collect(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All registered listeners, in registration order.
    pub fn listeners(&self) -> Vec<ListenerInfo> {
        let inner = self.store.shared.inner.borrow();
        let mut ids: Vec<_> = inner.registry.listeners.keys().copied().collect();
        ids.sort_unstable();
        ids.iter()
            .filter_map(|id| inner.registry.listeners.get(id))
            .map(|l| ListenerInfo {
                conditions: l.conditions.iter().map(condition_info).collect(),
            })
            .collect()
    }

    /// Current undo stack depth.
    pub fn undo_depth(&self) -> usize {
        self.store.shared.inner.borrow().undo_stack.len()
    }

    /// Current redo stack depth.
    pub fn redo_depth(&self) -> usize {
        self.store.shared.inner.borrow().redo_stack.len()
    }
}

fn condition_info(condition: &crate::condition::Condition) -> ConditionInfo {
    ConditionInfo {
        kind: condition.kind.clone(),
        passive: condition.passive,
        required: condition.required,
        target: condition.target.clone(),
    }
}
