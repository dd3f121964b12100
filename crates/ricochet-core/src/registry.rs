//! Epic registry and condition indices
//!
//! The registry owns every registered epic plus the lookup indices the
//! action pump and the listener dispatcher route through:
//! - `updaters` / `patterns`: condition kind -> updater references
//! - `epic_listeners` / `pattern_listeners`: kind -> target -> listener ids
//!
//! Registration validates everything before mutating, so a failed
//! registration never leaves partial entries behind.

use std::collections::HashMap;

use crate::condition::{Condition, ConditionSpec, Pattern};
use crate::epic::{Epic, EpicDef, Instance, ListenerHandler, Updater};
use crate::error::StoreError;
use crate::value::Slot;

pub(crate) type ListenerId = u64;

/// Reference to a compiled updater: owning epic plus its position in the
/// epic's expanded updater list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UpdaterRef {
    pub(crate) epic: String,
    pub(crate) slot: usize,
}

/// A registered listener with its compiled conditions.
pub(crate) struct Listener {
    pub(crate) conditions: Vec<Condition>,
    pub(crate) handler: ListenerHandler,
    pub(crate) processed: bool,
}

/// Listener index: condition kind -> target key -> listener ids.
type ListenerIndex = HashMap<String, HashMap<Option<String>, Vec<ListenerId>>>;

#[derive(Default)]
pub(crate) struct Registry {
    pub(crate) epics: HashMap<String, Epic>,
    pub(crate) updaters: HashMap<String, Vec<UpdaterRef>>,
    pub(crate) patterns: HashMap<String, Vec<UpdaterRef>>,
    /// Pattern keys in first-registration order; pattern iteration must be
    /// deterministic.
    pub(crate) pattern_order: Vec<String>,
    pattern_matchers: HashMap<String, Pattern>,
    pub(crate) epic_listeners: ListenerIndex,
    pub(crate) pattern_listeners: ListenerIndex,
    pub(crate) listener_pattern_order: Vec<String>,
    listener_pattern_matchers: HashMap<String, Pattern>,
    pub(crate) listeners: HashMap<ListenerId, Listener>,
    next_listener_id: ListenerId,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register an epic definition, expanding disjunctions into concrete
    /// updaters and indexing every condition.
    pub(crate) fn register(&mut self, def: EpicDef, patterns_enabled: bool) -> Result<(), StoreError> {
        if self.epics.contains_key(&def.name) {
            return Err(StoreError::DuplicateEpic(def.name));
        }

        // Compile everything up front; nothing is inserted on failure.
        let mut updaters: Vec<Updater> = Vec::new();
        for (reducer_index, updater_def) in def.updaters.iter().enumerate() {
            let owner = format!("epic '{}' updater {}", def.name, reducer_index);
            for vector in crate::condition::split_conditions(&updater_def.conditions) {
                let conditions = compile_conditions(vector, &owner, patterns_enabled)?;
                if conditions.iter().all(|c| c.passive) {
                    return Err(StoreError::NoPassiveUpdaters {
                        epic: def.name.clone(),
                        updater: reducer_index,
                    });
                }
                updaters.push(Updater {
                    conditions,
                    handler: updater_def.handler.clone(),
                    index: reducer_index,
                    processed: false,
                });
            }
        }

        let epic = Epic {
            name: def.name.clone(),
            base: Instance::new(Slot::from(def.state), Slot::from(def.scope)),
            instances: def.instanced.then(HashMap::new),
            instance_order: Vec::new(),
            updaters,
        };

        for (slot, updater) in epic.updaters.iter().enumerate() {
            for condition in &updater.conditions {
                let entry = UpdaterRef {
                    epic: def.name.clone(),
                    slot,
                };
                if let Some(pattern) = &condition.pattern {
                    if !self.patterns.contains_key(&condition.kind) {
                        self.pattern_order.push(condition.kind.clone());
                        self.pattern_matchers
                            .insert(condition.kind.clone(), pattern.clone());
                    }
                    self.patterns.entry(condition.kind.clone()).or_default().push(entry);
                } else {
                    self.updaters.entry(condition.kind.clone()).or_default().push(entry);
                }
            }
        }

        tracing::debug!(
            epic = %def.name,
            updaters = epic.updaters.len(),
            instanced = epic.is_instanced(),
            "epic registered"
        );
        self.epics.insert(def.name.clone(), epic);
        Ok(())
    }

    /// Remove an epic and every index entry it owns. Returns false when the
    /// epic was never registered.
    pub(crate) fn unregister(&mut self, name: &str) -> bool {
        if self.epics.remove(name).is_none() {
            return false;
        }

        self.updaters.retain(|_, refs| {
            refs.retain(|r| r.epic != name);
            !refs.is_empty()
        });
        let mut removed_patterns = Vec::new();
        self.patterns.retain(|kind, refs| {
            refs.retain(|r| r.epic != name);
            if refs.is_empty() {
                removed_patterns.push(kind.clone());
                false
            } else {
                true
            }
        });
        for kind in removed_patterns {
            self.pattern_order.retain(|k| k != &kind);
            self.pattern_matchers.remove(&kind);
        }

        tracing::debug!(epic = %name, "epic unregistered");
        true
    }

    /// Index a listener under every condition's `(kind, target)`.
    pub(crate) fn add_listener(
        &mut self,
        specs: Vec<ConditionSpec>,
        handler: ListenerHandler,
        patterns_enabled: bool,
    ) -> Result<ListenerId, StoreError> {
        let conditions = compile_conditions(specs, "listener", patterns_enabled)?;

        let id = self.next_listener_id;
        self.next_listener_id += 1;

        for condition in &conditions {
            let target = condition.target.clone();
            if let Some(pattern) = &condition.pattern {
                if !self.pattern_listeners.contains_key(&condition.kind) {
                    self.listener_pattern_order.push(condition.kind.clone());
                    self.listener_pattern_matchers
                        .insert(condition.kind.clone(), pattern.clone());
                }
                self.pattern_listeners
                    .entry(condition.kind.clone())
                    .or_default()
                    .entry(target)
                    .or_default()
                    .push(id);
            } else {
                self.epic_listeners
                    .entry(condition.kind.clone())
                    .or_default()
                    .entry(target)
                    .or_default()
                    .push(id);
            }
        }

        self.listeners.insert(
            id,
            Listener {
                conditions,
                handler,
                processed: false,
            },
        );
        Ok(id)
    }

    /// Remove a listener from the arena and every index. Safe to call twice.
    pub(crate) fn remove_listener(&mut self, id: ListenerId) -> bool {
        if self.listeners.remove(&id).is_none() {
            return false;
        }
        prune_listener_index(&mut self.epic_listeners, id);
        let before: Vec<String> = self.pattern_listeners.keys().cloned().collect();
        prune_listener_index(&mut self.pattern_listeners, id);
        for kind in before {
            if !self.pattern_listeners.contains_key(&kind) {
                self.listener_pattern_order.retain(|k| k != &kind);
                self.listener_pattern_matchers.remove(&kind);
            }
        }
        true
    }

    /// Updater references indexed under a literal kind, in registration
    /// order.
    pub(crate) fn updater_refs(&self, kind: &str) -> Vec<UpdaterRef> {
        self.updaters.get(kind).cloned().unwrap_or_default()
    }

    /// Pattern keys matching a kind, in first-registration order.
    pub(crate) fn matching_patterns(&self, kind: &str) -> Vec<String> {
        self.pattern_order
            .iter()
            .filter(|key| {
                self.pattern_matchers
                    .get(*key)
                    .is_some_and(|p| p.matches(kind))
            })
            .cloned()
            .collect()
    }

    pub(crate) fn pattern_refs(&self, key: &str) -> Vec<UpdaterRef> {
        self.patterns.get(key).cloned().unwrap_or_default()
    }

    /// Listener-pattern keys matching an epic name, in registration order.
    pub(crate) fn matching_listener_patterns(&self, epic: &str) -> Vec<String> {
        self.listener_pattern_order
            .iter()
            .filter(|key| {
                self.listener_pattern_matchers
                    .get(*key)
                    .is_some_and(|p| p.matches(epic))
            })
            .cloned()
            .collect()
    }

    pub(crate) fn condition_mut(
        &mut self,
        epic: &str,
        slot: usize,
        condition: usize,
    ) -> Option<&mut Condition> {
        self.epics
            .get_mut(epic)?
            .updaters
            .get_mut(slot)?
            .conditions
            .get_mut(condition)
    }
}

fn compile_conditions(
    specs: Vec<ConditionSpec>,
    owner: &str,
    patterns_enabled: bool,
) -> Result<Vec<Condition>, StoreError> {
    specs
        .into_iter()
        .enumerate()
        .map(|(index, spec)| {
            Condition::compile(spec, patterns_enabled).map_err(|reason| {
                StoreError::InvalidConditionType {
                    owner: owner.to_string(),
                    condition: index,
                    reason,
                }
            })
        })
        .collect()
}

fn prune_listener_index(index: &mut ListenerIndex, id: ListenerId) {
    index.retain(|_, targets| {
        targets.retain(|_, ids| {
            ids.retain(|i| *i != id);
            !ids.is_empty()
        });
        !targets.is_empty()
    });
}
