//! Listener dispatcher
//!
//! After a cycle (or an undo/redo step) the touched epics fan out to the
//! exact and pattern listener indices. Listener failures are collected and
//! reported as one aggregate; they never affect committed state, and
//! listeners cannot dispatch.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::action::Action;
use crate::epic::{HandlerValues, ListenerContext, ListenerHandler};
use crate::registry::ListenerId;
use crate::value::Slot;

use super::Store;

impl Store {
    /// Cycle-end pass over the epics touched by the current cycle.
    pub(crate) fn process_cycle_listeners(&self) -> Vec<String> {
        let (touched, source_action) = {
            let inner = self.shared.inner.borrow();
            (
                inner.cycle.touched.clone(),
                inner.cycle.source_action.clone(),
            )
        };
        if touched.is_empty() {
            return Vec::new();
        }
        let source_action = source_action.unwrap_or_else(|| Action::new(""));
        self.process_epic_listeners(&touched, &source_action, true)
    }

    /// Notify listeners for a set of touched (epic, instance) pairs.
    ///
    /// With `in_cycle` set, staged listener-condition values are handed to
    /// the cycle controller, which promotes them only on commit. Outside a
    /// cycle (undo/redo) they promote immediately.
    pub(crate) fn process_epic_listeners(
        &self,
        touched: &[(String, Option<String>)],
        source_action: &Action,
        in_cycle: bool,
    ) -> Vec<String> {
        let mut errors: Vec<String> = Vec::new();
        let mut visited_listeners: Vec<ListenerId> = Vec::new();
        let mut visited_conditions: Vec<(ListenerId, usize)> = Vec::new();

        // Group instance keys per epic, preserving touch order.
        let mut epic_order: Vec<&String> = Vec::new();
        let mut keys_by_epic: HashMap<&String, Vec<&Option<String>>> = HashMap::new();
        for (name, key) in touched {
            if !keys_by_epic.contains_key(name) {
                epic_order.push(name);
            }
            keys_by_epic.entry(name).or_default().push(key);
        }
        let touched_epics: HashSet<&str> = touched.iter().map(|(n, _)| n.as_str()).collect();

        for name in epic_order {
            let pattern_keys: Vec<String> = if self.shared.options.patterns {
                self.shared
                    .inner
                    .borrow()
                    .registry
                    .matching_listener_patterns(name)
            } else {
                Vec::new()
            };

            for key in &keys_by_epic[name] {
                let candidates = self.gather_candidates(name, key, &pattern_keys);
                for id in candidates {
                    let fired = self.evaluate_listener(
                        id,
                        name,
                        key,
                        &touched_epics,
                        &mut visited_listeners,
                        &mut visited_conditions,
                        &mut errors,
                    );
                    let Some((values, handler)) = fired else {
                        continue;
                    };
                    let ctx = ListenerContext {
                        source_action: source_action.clone(),
                    };
                    if let Err(message) = handler(&values, &ctx) {
                        tracing::warn!(listener = id, error = %message, "listener handler failed");
                        errors.push(message);
                    }
                }
            }
        }

        let mut inner = self.shared.inner.borrow_mut();
        let inner_ref = &mut *inner;
        if in_cycle {
            inner_ref
                .cycle
                .processed_listeners
                .extend(visited_listeners);
            inner_ref
                .cycle
                .listener_condition_cache
                .extend(visited_conditions);
        } else {
            // No commit/rollback decision outside a cycle: promote and
            // clear in place.
            for (id, index) in &visited_conditions {
                if let Some(listener) = inner_ref.registry.listeners.get_mut(id) {
                    if let Some(condition) = listener.conditions.get_mut(*index) {
                        if let Some(staged) = condition.staged.take() {
                            condition.value = staged;
                        }
                        condition.clear_transients();
                    }
                }
            }
            for id in &visited_listeners {
                if let Some(listener) = inner_ref.registry.listeners.get_mut(id) {
                    listener.processed = false;
                }
            }
        }

        errors
    }

    /// Candidate listener ids for one (epic, instance): exact listeners for
    /// the instance falling back to the default target, then the same for
    /// each matched pattern key.
    fn gather_candidates(
        &self,
        name: &str,
        key: &Option<String>,
        pattern_keys: &[String],
    ) -> Vec<ListenerId> {
        let inner = self.shared.inner.borrow();
        let registry = &inner.registry;
        let mut candidates: Vec<ListenerId> = Vec::new();

        if let Some(targets) = registry.epic_listeners.get(name) {
            if let Some(ids) = targets.get(key).or_else(|| targets.get(&None)) {
                candidates.extend(ids);
            }
        }
        for pattern in pattern_keys {
            if let Some(targets) = registry.pattern_listeners.get(pattern) {
                if let Some(ids) = targets.get(key).or_else(|| targets.get(&None)) {
                    candidates.extend(ids);
                }
            }
        }
        candidates
    }

    /// Evaluate one listener's conditions against the touched epic and
    /// decide whether it fires. Returns the handler input when it does.
    #[allow(clippy::too_many_arguments)]
    fn evaluate_listener(
        &self,
        id: ListenerId,
        name: &str,
        key: &Option<String>,
        touched_epics: &HashSet<&str>,
        visited_listeners: &mut Vec<ListenerId>,
        visited_conditions: &mut Vec<(ListenerId, usize)>,
        errors: &mut Vec<String>,
    ) -> Option<(HandlerValues, ListenerHandler)> {
        let mut inner = self.shared.inner.borrow_mut();
        let inner_ref = &mut *inner;
        let epics = &inner_ref.registry.epics;
        let action_cache = &inner_ref.cycle.action_cache;

        let listener = inner_ref.registry.listeners.get_mut(&id)?;
        if listener.processed {
            return None;
        }
        listener.processed = true;
        visited_listeners.push(id);

        let mut has_required = false;
        let mut has_unchanged_required = false;
        let mut has_changed_active = false;

        for (index, condition) in listener.conditions.iter_mut().enumerate() {
            visited_conditions.push((id, index));

            // Resolve the condition's source: the matched epic for pattern
            // kinds, the referenced epic's staged-or-committed state for
            // literal epic kinds, or this cycle's action payloads.
            let source: Option<Value> = if let Some(pattern) = &condition.pattern {
                if pattern.matches(name) {
                    condition.matched_pattern = true;
                    let instance_key = condition.target.clone().or_else(|| key.clone());
                    epic_state(epics, name, &instance_key)
                } else {
                    None
                }
            } else if epics.contains_key(&condition.kind) {
                // Conditions on epics outside the touched set stay
                // unevaluated: they did not change this cycle.
                if touched_epics.contains(condition.kind.as_str()) {
                    let instance_key = condition.target.clone().or_else(|| {
                        if condition.kind == name {
                            key.clone()
                        } else {
                            None
                        }
                    });
                    epic_state(epics, &condition.kind, &instance_key)
                } else {
                    None
                }
            } else {
                action_cache.get(&condition.kind).cloned()
            };

            if let Some(payload) = source {
                let kind = condition.kind.clone();
                match condition.select(&payload, &kind) {
                    Ok(selected) => condition.staged = Some(Slot::Value(selected)),
                    Err(message) => {
                        errors.push(format!(
                            "listener condition '{}' selector failed: {}",
                            kind, message
                        ));
                    }
                }
            }

            let changed = condition.matched_pattern || condition.changed();
            if !condition.passive {
                if condition.required {
                    has_required = true;
                    if !changed {
                        has_unchanged_required = true;
                    }
                }
                if changed {
                    has_changed_active = true;
                }
            }
        }

        let fires = if has_required {
            !has_unchanged_required
        } else {
            has_changed_active
        };
        if !fires {
            return None;
        }

        let values = HandlerValues::new(
            listener
                .conditions
                .iter()
                .map(|c| c.current().as_value().cloned())
                .collect(),
        );
        Some((values, listener.handler.clone()))
    }
}

/// Staged-or-committed state of an epic instance, `None` when never set.
fn epic_state(
    epics: &std::collections::HashMap<String, crate::epic::Epic>,
    epic: &str,
    key: &Option<String>,
) -> Option<Value> {
    epics
        .get(epic)
        .and_then(|e| e.instance(key))
        .and_then(|i| i.current_state().as_value().cloned())
}
