//! Epic model and the reducer/listener handler contract
//!
//! This module defines:
//! - EpicDef / UpdaterDef: the registration shapes emitted by the builder
//!   layer
//! - HandlerValues / HandlerUpdate / contexts: the entire contract between
//!   a handler and the engine
//! - the runtime Epic / Instance / Updater structures the engine mutates

use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;

use crate::action::Action;
use crate::condition::{Condition, ConditionInput};
use crate::value::Slot;

/// Reducer handler: receives the condition values view and the cycle
/// context, returns staged deltas and queued actions.
pub type UpdaterHandler =
    Rc<dyn Fn(&HandlerValues, &UpdaterContext) -> Result<HandlerUpdate, String>>;

/// Listener handler: notified after a cycle with the values view and the
/// originating action.
pub type ListenerHandler = Rc<dyn Fn(&HandlerValues, &ListenerContext) -> Result<(), String>>;

/// Per-condition selector values handed to a handler, in condition order.
///
/// A never-written source surfaces as `None`.
#[derive(Debug, Clone, Default)]
pub struct HandlerValues(Vec<Option<Value>>);

impl HandlerValues {
    pub(crate) fn new(values: Vec<Option<Value>>) -> Self {
        Self(values)
    }

    /// Value of the condition at `index`, `None` when absent or never set.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index).and_then(|v| v.as_ref())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over all condition values.
    pub fn iter(&self) -> impl Iterator<Item = Option<&Value>> {
        self.0.iter().map(|v| v.as_ref())
    }
}

/// What a reducer hands back to the engine.
#[derive(Debug, Clone, Default)]
pub struct HandlerUpdate {
    /// Delta merged into the epic state.
    pub state: Option<Value>,
    /// Delta merged into the private scope.
    pub scope: Option<Value>,
    /// External actions queued for this cycle.
    pub actions: Vec<Action>,
    /// Suppress the chained Epic action for this update.
    pub passive: bool,
}

impl HandlerUpdate {
    /// An update that changes nothing.
    pub fn none() -> Self {
        Self::default()
    }

    /// An update staging a state delta.
    pub fn state(delta: Value) -> Self {
        Self {
            state: Some(delta),
            ..Self::default()
        }
    }

    /// An update staging a scope delta.
    pub fn scope(delta: Value) -> Self {
        Self {
            scope: Some(delta),
            ..Self::default()
        }
    }

    /// Add a state delta.
    pub fn with_state(mut self, delta: Value) -> Self {
        self.state = Some(delta);
        self
    }

    /// Add a scope delta.
    pub fn with_scope(mut self, delta: Value) -> Self {
        self.scope = Some(delta);
        self
    }

    /// Queue an external action.
    pub fn with_action(mut self, action: impl Into<Action>) -> Self {
        self.actions.push(action.into());
        self
    }

    /// Queue several external actions.
    pub fn with_actions(mut self, actions: Vec<Action>) -> Self {
        self.actions = actions;
        self
    }

    /// Suppress the chained Epic action.
    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }
}

/// Cycle context handed to reducers.
#[derive(Debug, Clone)]
pub struct UpdaterContext {
    /// Committed state before this cycle.
    pub state: Option<Value>,
    /// In-cycle state view (staged when written, committed otherwise).
    pub current_cycle_state: Option<Value>,
    /// Committed scope before this cycle.
    pub scope: Option<Value>,
    /// In-cycle scope view.
    pub current_cycle_scope: Option<Value>,
    /// The action the cycle started with.
    pub source_action: Action,
    /// The action currently being pumped.
    pub current_action: Action,
}

/// Context handed to listeners after a cycle.
#[derive(Debug, Clone)]
pub struct ListenerContext {
    /// The action the cycle (or undo/redo) originated from.
    pub source_action: Action,
}

/// One user-registered reducer: conditions (possibly disjunctive) plus a
/// handler.
#[derive(Clone)]
pub struct UpdaterDef {
    pub conditions: Vec<ConditionInput>,
    pub handler: UpdaterHandler,
}

impl UpdaterDef {
    pub fn new(
        conditions: Vec<ConditionInput>,
        handler: impl Fn(&HandlerValues, &UpdaterContext) -> Result<HandlerUpdate, String> + 'static,
    ) -> Self {
        Self {
            conditions,
            handler: Rc::new(handler),
        }
    }
}

/// Epic registration shape.
#[derive(Clone, Default)]
pub struct EpicDef {
    pub name: String,
    pub state: Option<Value>,
    pub scope: Option<Value>,
    pub updaters: Vec<UpdaterDef>,
    pub instanced: bool,
}

impl EpicDef {
    /// Create an epic definition with no initial state.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the initial state.
    pub fn with_state(mut self, state: Value) -> Self {
        self.state = Some(state);
        self
    }

    /// Set the initial private scope.
    pub fn with_scope(mut self, scope: Value) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Register a reducer.
    pub fn with_updater(
        mut self,
        conditions: Vec<ConditionInput>,
        handler: impl Fn(&HandlerValues, &UpdaterContext) -> Result<HandlerUpdate, String> + 'static,
    ) -> Self {
        self.updaters.push(UpdaterDef::new(conditions, handler));
        self
    }

    /// Make the epic instanced for its lifetime.
    pub fn instanced(mut self) -> Self {
        self.instanced = true;
        self
    }
}

/// One state/scope replica. The singleton epic has exactly one; instanced
/// epics clone it lazily per instance id.
#[derive(Debug, Clone)]
pub(crate) struct Instance {
    pub(crate) state: Slot,
    pub(crate) scope: Slot,
    pub(crate) staged_state: Option<Slot>,
    pub(crate) staged_scope: Option<Slot>,
}

impl Instance {
    pub(crate) fn new(state: Slot, scope: Slot) -> Self {
        Self {
            state,
            scope,
            staged_state: None,
            staged_scope: None,
        }
    }

    /// Snapshot canonical values into the staging slots on first write.
    pub(crate) fn stage(&mut self) {
        if self.staged_state.is_none() {
            self.staged_state = Some(self.state.clone());
            self.staged_scope = Some(self.scope.clone());
        }
    }

    pub(crate) fn current_state(&self) -> &Slot {
        self.staged_state.as_ref().unwrap_or(&self.state)
    }

    pub(crate) fn current_scope(&self) -> &Slot {
        self.staged_scope.as_ref().unwrap_or(&self.scope)
    }

    /// Promote staged values to canonical on commit.
    pub(crate) fn promote(&mut self) {
        if let Some(staged) = self.staged_state.take() {
            self.state = staged;
        }
        if let Some(staged) = self.staged_scope.take() {
            self.scope = staged;
        }
    }

    /// Drop staged values on rollback.
    pub(crate) fn clear_staged(&mut self) {
        self.staged_state = None;
        self.staged_scope = None;
    }
}

/// A compiled updater: the disjunctive-normal expansion of one reducer
/// produces one of these per conjunctive combination.
pub(crate) struct Updater {
    pub(crate) conditions: Vec<Condition>,
    pub(crate) handler: UpdaterHandler,
    /// Reducer registration order within the owning epic, for error
    /// reporting and stable iteration.
    pub(crate) index: usize,
    /// Set when the handler runs; an updater fires at most once per cycle.
    pub(crate) processed: bool,
}

/// A registered epic with its replicas and compiled updaters.
pub(crate) struct Epic {
    pub(crate) name: String,
    pub(crate) base: Instance,
    pub(crate) instances: Option<HashMap<String, Instance>>,
    pub(crate) instance_order: Vec<String>,
    pub(crate) updaters: Vec<Updater>,
}

impl Epic {
    pub(crate) fn is_instanced(&self) -> bool {
        self.instances.is_some()
    }

    /// Resolve an instance key, lazily cloning the base replica for new ids
    /// on instanced epics. `None` addresses the singleton base.
    pub(crate) fn instance_mut(&mut self, key: &Option<String>) -> Option<&mut Instance> {
        match (key, self.instances.as_mut()) {
            (None, _) => Some(&mut self.base),
            (Some(id), Some(instances)) => {
                if !instances.contains_key(id) {
                    instances.insert(
                        id.clone(),
                        Instance::new(self.base.state.clone(), self.base.scope.clone()),
                    );
                    self.instance_order.push(id.clone());
                }
                instances.get_mut(id)
            }
            (Some(_), None) => None,
        }
    }

    pub(crate) fn instance(&self, key: &Option<String>) -> Option<&Instance> {
        match (key, self.instances.as_ref()) {
            (None, _) => Some(&self.base),
            (Some(id), Some(instances)) => instances.get(id),
            (Some(_), None) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_handler_values_surface_absent_sources_as_none() {
        let values = HandlerValues::new(vec![Some(json!(1)), None]);
        assert_eq!(values.get(0), Some(&json!(1)));
        assert_eq!(values.get(1), None);
        assert_eq!(values.get(7), None);
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_instance_stage_snapshots_once() {
        let mut instance = Instance::new(Slot::Value(json!(1)), Slot::Initial);
        instance.stage();
        instance.staged_state = Some(Slot::Value(json!(2)));
        instance.stage();
        assert_eq!(instance.current_state(), &Slot::Value(json!(2)));
        assert_eq!(instance.state, Slot::Value(json!(1)));
    }

    #[test]
    fn test_instance_promote_and_rollback() {
        let mut instance = Instance::new(Slot::Value(json!(1)), Slot::Initial);
        instance.stage();
        instance.staged_state = Some(Slot::Value(json!(2)));

        let mut rolled_back = instance.clone();
        rolled_back.clear_staged();
        assert_eq!(rolled_back.state, Slot::Value(json!(1)));
        assert!(rolled_back.staged_state.is_none());

        instance.promote();
        assert_eq!(instance.state, Slot::Value(json!(2)));
        assert!(instance.staged_state.is_none());
    }

    #[test]
    fn test_epic_lazily_clones_instances_from_base() {
        let mut epic = Epic {
            name: "grid".to_string(),
            base: Instance::new(Slot::Value(json!({"v": 0})), Slot::Initial),
            instances: Some(HashMap::new()),
            instance_order: Vec::new(),
            updaters: Vec::new(),
        };

        let key = Some("cell-1".to_string());
        let instance = epic.instance_mut(&key).expect("instance");
        assert_eq!(instance.state, Slot::Value(json!({"v": 0})));
        assert_eq!(epic.instance_order, vec!["cell-1".to_string()]);

        // Second resolution reuses the replica.
        epic.instance_mut(&key).unwrap().state = Slot::Value(json!({"v": 5}));
        assert_eq!(
            epic.instance(&key).unwrap().state,
            Slot::Value(json!({"v": 5}))
        );
        assert_eq!(epic.instance_order.len(), 1);
    }

    #[test]
    fn test_singleton_epic_rejects_instance_keys() {
        let mut epic = Epic {
            name: "single".to_string(),
            base: Instance::new(Slot::Initial, Slot::Initial),
            instances: None,
            instance_order: Vec::new(),
            updaters: Vec::new(),
        };
        assert!(epic.instance_mut(&Some("x".to_string())).is_none());
        assert!(epic.instance_mut(&None).is_some());
    }
}
