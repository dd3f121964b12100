//! Action pump and updater evaluator
//!
//! The pump matches one action against the direct and pattern updater
//! indices; the evaluator decides whether a matched updater fires, invokes
//! its handler, stages the returned deltas, and chains the synthetic Epic
//! action depth-first.

use serde_json::Value;

use crate::action::Action;
use crate::epic::{HandlerValues, UpdaterContext};
use crate::error::StoreError;
use crate::registry::UpdaterRef;
use crate::value::{merge, Slot};

use super::{Inner, Store};

/// Which half of an instance a delta applies to.
#[derive(Debug, Clone, Copy)]
enum Entity {
    State,
    Scope,
}

impl Store {
    /// Process one action: invariants, selector staging, direct updaters in
    /// registration order, then pattern updaters.
    pub(crate) fn process_action(
        &self,
        action: &Action,
        external: bool,
    ) -> Result<(), StoreError> {
        {
            let mut inner = self.shared.inner.borrow_mut();
            let inner_ref = &mut *inner;
            if external {
                if inner_ref.registry.epics.contains_key(&action.kind) {
                    return Err(StoreError::InvalidEpicAction(action.kind.clone()));
                }
                if inner_ref.cycle.action_cache.contains_key(&action.kind) {
                    return Err(StoreError::NoRepeatedExternalAction(action.kind.clone()));
                }
            }
            inner_ref
                .cycle
                .action_cache
                .insert(action.kind.clone(), action.payload.clone());
        }
        tracing::trace!(action = %action, external, "pumping action");

        let direct = {
            let inner = self.shared.inner.borrow();
            inner.registry.updater_refs(&action.kind)
        };
        for uref in direct {
            let Some(trigger) = self.find_trigger(&uref, &action.kind) else {
                continue;
            };
            let proceed = self.stage_trigger(&uref, trigger, action, false)?;
            // Epic-chained actions whose selector value did not change stop
            // here; external actions always proceed.
            if external || proceed {
                self.process_updater(action, &uref, trigger, false)?;
            }
        }

        if self.shared.options.patterns {
            let keys = {
                let inner = self.shared.inner.borrow();
                inner.registry.matching_patterns(&action.kind)
            };
            for key in keys {
                // A bare `*` matches every action; forcing its updates
                // passive is the hard cut that breaks universal cycles.
                let force_passive = key == "*";
                let refs = {
                    let inner = self.shared.inner.borrow();
                    inner.registry.pattern_refs(&key)
                };
                for uref in refs {
                    let Some(trigger) = self.find_trigger(&uref, &key) else {
                        continue;
                    };
                    self.stage_trigger(&uref, trigger, action, true)?;
                    self.process_updater(action, &uref, trigger, force_passive)?;
                }
            }
        }

        Ok(())
    }

    /// Index of the first condition with the given kind within the updater.
    fn find_trigger(&self, uref: &UpdaterRef, kind: &str) -> Option<usize> {
        let inner = self.shared.inner.borrow();
        inner
            .registry
            .epics
            .get(&uref.epic)?
            .updaters
            .get(uref.slot)?
            .conditions
            .iter()
            .position(|c| c.kind == kind)
    }

    /// Evaluate the triggering condition's selector into its staged slot and
    /// record it in the condition cache. Returns whether the value changed.
    fn stage_trigger(
        &self,
        uref: &UpdaterRef,
        trigger: usize,
        action: &Action,
        matched_pattern: bool,
    ) -> Result<bool, StoreError> {
        let mut inner = self.shared.inner.borrow_mut();
        let inner_ref = &mut *inner;
        let Some(condition) = inner_ref
            .registry
            .condition_mut(&uref.epic, uref.slot, trigger)
        else {
            return Ok(false);
        };

        let selected = condition
            .select(&action.payload, &action.kind)
            .map_err(|message| StoreError::InvalidConditionSelector {
                epic: uref.epic.clone(),
                condition: trigger,
                message,
            })?;
        let staged = Slot::Value(selected);
        let changed = *condition.current() != staged;
        condition.staged = Some(staged);
        if matched_pattern {
            condition.matched_pattern = true;
        }
        inner_ref
            .cycle
            .condition_cache
            .push((uref.epic.clone(), uref.slot, trigger));
        Ok(changed)
    }

    /// Evaluate one matched updater for one triggering condition.
    fn process_updater(
        &self,
        action: &Action,
        uref: &UpdaterRef,
        trigger: usize,
        force_passive: bool,
    ) -> Result<(), StoreError> {
        // Guards and instance selection under one borrow.
        let (targets, reducer_index) = {
            let mut inner = self.shared.inner.borrow_mut();
            let Some(epic) = inner.registry.epics.get_mut(&uref.epic) else {
                return Ok(());
            };
            let Some(updater) = epic.updaters.get(uref.slot) else {
                return Ok(());
            };
            // An updater fires at most once per cycle.
            if updater.processed {
                return Ok(());
            }

            let conditions = &updater.conditions;
            let Some(triggering) = conditions.get(trigger) else {
                return Ok(());
            };

            // A passive trigger only counts when some other active
            // condition moved this cycle.
            if triggering.passive {
                let any_active_moved = conditions.iter().enumerate().any(|(i, c)| {
                    i != trigger && !c.passive && (c.matched_pattern || c.changed())
                });
                if !any_active_moved {
                    return Ok(());
                }
            }

            // Every other required condition must have moved.
            for (i, condition) in conditions.iter().enumerate() {
                if i == trigger || condition.passive || !condition.required {
                    continue;
                }
                if condition.matched_pattern || condition.changed() {
                    continue;
                }
                return Ok(());
            }

            let reducer_index = updater.index;
            let targets: Vec<Option<String>> = if !epic.is_instanced() {
                vec![None]
            } else if let Some(target) = &action.target {
                // Targeted actions materialize the instance up front.
                let key = Some(target.clone());
                let _ = epic.instance_mut(&key);
                vec![key]
            } else {
                epic.instance_order.iter().cloned().map(Some).collect()
            };
            (targets, reducer_index)
        };

        for key in targets {
            // Build the handler input under a borrow, then release it so a
            // handler holding a store clone can still queue actions.
            let prepared = {
                let mut inner = self.shared.inner.borrow_mut();
                let inner_ref = &mut *inner;
                let source_action = inner_ref.cycle.source_action.clone();
                let Some(epic) = inner_ref.registry.epics.get_mut(&uref.epic) else {
                    continue;
                };
                let Some(updater) = epic.updaters.get_mut(uref.slot) else {
                    continue;
                };
                let values = HandlerValues::new(
                    updater
                        .conditions
                        .iter()
                        .map(|c| c.current().as_value().cloned())
                        .collect(),
                );
                let handler = updater.handler.clone();
                if !updater.processed {
                    updater.processed = true;
                    inner_ref
                        .cycle
                        .processed_updaters
                        .push((uref.epic.clone(), uref.slot));
                }
                let Some(instance) = epic.instance_mut(&key) else {
                    continue;
                };
                let ctx = UpdaterContext {
                    state: instance.state.as_value().cloned(),
                    current_cycle_state: instance.current_state().as_value().cloned(),
                    scope: instance.scope.as_value().cloned(),
                    current_cycle_scope: instance.current_scope().as_value().cloned(),
                    source_action: source_action.unwrap_or_else(|| action.clone()),
                    current_action: action.clone(),
                };
                (values, ctx, handler)
            };

            let (values, ctx, handler) = prepared;
            let update = handler(&values, &ctx).map_err(|message| StoreError::Handler {
                epic: uref.epic.clone(),
                updater: reducer_index,
                message,
            })?;
            tracing::trace!(
                epic = %uref.epic,
                updater = reducer_index,
                instance = ?key,
                "updater fired"
            );

            // Scope first, then state; staging the state synthesizes the
            // chained Epic action.
            let mut chained: Option<Action> = None;
            {
                let mut inner = self.shared.inner.borrow_mut();
                let inner_ref = &mut *inner;
                if let Some(delta) = &update.scope {
                    self.apply_delta(inner_ref, uref, reducer_index, &key, Entity::Scope, delta)?;
                }
                if let Some(delta) = &update.state {
                    self.apply_delta(inner_ref, uref, reducer_index, &key, Entity::State, delta)?;
                    if !force_passive && !update.passive {
                        let payload = inner_ref
                            .registry
                            .epics
                            .get(&uref.epic)
                            .and_then(|e| e.instance(&key))
                            .and_then(|i| i.current_state().as_value().cloned())
                            .unwrap_or(Value::Null);
                        chained = Some(Action {
                            kind: uref.epic.clone(),
                            payload,
                            target: key.clone(),
                        });
                    }
                }
            }

            // Depth-first: the Epic action propagates before any sibling
            // updater of the original action runs.
            if let Some(epic_action) = chained {
                self.process_action(&epic_action, false)?;
            }

            if !update.actions.is_empty() {
                let mut queue = self.shared.queue.borrow_mut();
                for queued in &update.actions {
                    queue.push_back(queued.clone());
                }
            }
        }

        Ok(())
    }

    /// Merge a handler delta into the staged instance value, recording the
    /// touch and the undo patches.
    fn apply_delta(
        &self,
        inner: &mut Inner,
        uref: &UpdaterRef,
        reducer_index: usize,
        key: &Option<String>,
        entity: Entity,
        delta: &Value,
    ) -> Result<(), StoreError> {
        let Some(epic) = inner.registry.epics.get_mut(&uref.epic) else {
            return Ok(());
        };
        let Some(instance) = epic.instance_mut(key) else {
            return Ok(());
        };

        let target = match entity {
            Entity::State => instance.current_state().clone(),
            Entity::Scope => instance.current_scope().clone(),
        };
        let (merged, undo, redo) =
            merge(&target, delta).map_err(|source| StoreError::InvalidHandlerUpdate {
                epic: uref.epic.clone(),
                updater: reducer_index,
                source,
            })?;

        instance.stage();
        match entity {
            Entity::State => instance.staged_state = Some(Slot::Value(merged)),
            Entity::Scope => instance.staged_scope = Some(Slot::Value(merged)),
        }

        let touch = (uref.epic.clone(), key.clone());
        if !inner.cycle.touched.contains(&touch) {
            inner.cycle.touched.push(touch);
        }

        if self.shared.options.undo {
            let pair = crate::value::PatchPair { undo, redo };
            match entity {
                Entity::State => inner.cycle.undo_entry.record_state(&uref.epic, key, pair),
                Entity::Scope => inner.cycle.undo_entry.record_scope(&uref.epic, key, pair),
            }
        }

        Ok(())
    }
}
