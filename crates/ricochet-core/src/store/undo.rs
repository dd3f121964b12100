//! Undo/redo engine
//!
//! Committed cycles push their recorded patch pairs onto a bounded undo
//! stack. Undo and redo replay those patches against canonical state
//! outside any dispatch cycle: reducers never re-run, listeners are
//! notified with a synthetic source action, and errors are reported
//! directly without rollback.

use std::collections::BTreeMap;

use crate::action::Action;
use crate::error::StoreError;
use crate::value::{apply, PatchPair, Slot};

use super::{Phase, Store};

/// Source action type for undo notifications.
pub const STORE_UNDO: &str = "STORE_UNDO";
/// Source action type for redo notifications.
pub const STORE_REDO: &str = "STORE_REDO";

/// Patch pairs recorded for one epic instance within one cycle, in merge
/// order.
#[derive(Debug, Clone, Default)]
pub(crate) struct EntityPatches {
    pub(crate) state: Vec<PatchPair>,
    pub(crate) scope: Vec<PatchPair>,
}

/// One committed cycle's patches: epic name -> instance key -> patches.
#[derive(Debug, Clone, Default)]
pub(crate) struct UndoEntry(BTreeMap<String, BTreeMap<Option<String>, EntityPatches>>);

impl UndoEntry {
    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn record_state(&mut self, epic: &str, key: &Option<String>, pair: PatchPair) {
        self.entity(epic, key).state.push(pair);
    }

    pub(crate) fn record_scope(&mut self, epic: &str, key: &Option<String>, pair: PatchPair) {
        self.entity(epic, key).scope.push(pair);
    }

    fn entity(&mut self, epic: &str, key: &Option<String>) -> &mut EntityPatches {
        self.0
            .entry(epic.to_string())
            .or_default()
            .entry(key.clone())
            .or_default()
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Undo,
    Redo,
}

impl Store {
    /// Revert the most recently committed cycle. Returns false when there
    /// is nothing to undo.
    pub fn undo(&self) -> Result<bool, StoreError> {
        self.step_history(Direction::Undo)
    }

    /// Re-apply the most recently undone cycle. Returns false when there is
    /// nothing to redo.
    pub fn redo(&self) -> Result<bool, StoreError> {
        self.step_history(Direction::Redo)
    }

    fn step_history(&self, direction: Direction) -> Result<bool, StoreError> {
        // History steps apply only between cycles.
        if self.shared.phase.get() != Phase::AtRest {
            return Ok(false);
        }

        let entry = {
            let mut inner = self.shared.inner.borrow_mut();
            match direction {
                Direction::Undo => inner.undo_stack.pop(),
                Direction::Redo => inner.redo_stack.pop(),
            }
        };
        let Some(entry) = entry else {
            return Ok(false);
        };

        let mut touched: Vec<(String, Option<String>)> = Vec::new();
        {
            let mut inner = self.shared.inner.borrow_mut();
            let inner_ref = &mut *inner;
            for (epic_name, instances) in &entry.0 {
                let Some(epic) = inner_ref.registry.epics.get_mut(epic_name) else {
                    continue;
                };
                for (key, patches) in instances {
                    let Some(instance) = epic.instance_mut(key) else {
                        continue;
                    };
                    instance.state =
                        replay(instance.state.clone(), &patches.state, direction)?;
                    instance.scope =
                        replay(instance.scope.clone(), &patches.scope, direction)?;
                    touched.push((epic_name.clone(), key.clone()));
                }
            }
        }

        {
            let mut inner = self.shared.inner.borrow_mut();
            match direction {
                Direction::Undo => inner.redo_stack.push(entry),
                Direction::Redo => inner.undo_stack.push(entry),
            }
        }

        let source_action = Action::new(match direction {
            Direction::Undo => STORE_UNDO,
            Direction::Redo => STORE_REDO,
        });
        tracing::debug!(action = %source_action, epics = touched.len(), "history step applied");

        // Listeners must not dispatch from a history notification either.
        self.shared.phase.set(Phase::AfterCycle);
        let errors = self.process_epic_listeners(&touched, &source_action, false);
        self.shared.phase.set(Phase::AtRest);
        if !errors.is_empty() {
            return Err(StoreError::ListenerErrors(errors));
        }
        Ok(true)
    }
}

/// Replay recorded patches onto a canonical slot: undo patches in reverse
/// order, redo patches forward.
fn replay(slot: Slot, pairs: &[PatchPair], direction: Direction) -> Result<Slot, StoreError> {
    let mut current = slot;
    match direction {
        Direction::Undo => {
            for pair in pairs.iter().rev() {
                current = apply(&pair.undo, current)?;
            }
        }
        Direction::Redo => {
            for pair in pairs {
                current = apply(&pair.redo, current)?;
            }
        }
    }
    Ok(current)
}
