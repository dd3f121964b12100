//! Store - dispatch cycle controller
//!
//! The store ties the registry, the action pump, the listener dispatcher,
//! and the undo engine together. A dispatch runs one Epic Cycle:
//!
//! 1. the pump matches the action against the updater indices and drains
//!    the pending action queue until quiescence
//! 2. listeners are notified of the touched epics
//! 3. the cycle commits (staged values promote, an undo entry is pushed)
//!    or rolls back wholesale on the first processing error
//!
//! Scheduling is single-threaded and cooperative: exactly one cycle is
//! active at any time, and the pending queue is the only ordering
//! mechanism for actions scheduled from handlers.

mod debug;
mod listeners;
mod pump;
mod undo;

pub use debug::{ConditionInfo, Inspector, ListenerInfo, UpdaterInfo};
pub use undo::{STORE_REDO, STORE_UNDO};

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::{Rc, Weak};

use serde_json::Value;

use crate::action::Action;
use crate::condition::ConditionSpec;
use crate::epic::{EpicDef, HandlerValues, ListenerContext};
use crate::error::StoreError;
use crate::registry::{ListenerId, Registry};

use self::undo::UndoEntry;

const DEFAULT_MAX_UNDO_STACK: usize = 10;

/// Store construction options.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Expose the introspection surface.
    pub debug: bool,
    /// Enable wildcard condition and listener routing.
    pub patterns: bool,
    /// Record undo/redo patches for every committed cycle.
    pub undo: bool,
    /// Undo stack bound; the oldest entry is evicted when the stack is
    /// exactly full.
    pub max_undo_stack: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            debug: false,
            patterns: false,
            undo: false,
            max_undo_stack: DEFAULT_MAX_UNDO_STACK,
        }
    }
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_patterns(mut self, patterns: bool) -> Self {
        self.patterns = patterns;
        self
    }

    pub fn with_undo(mut self, undo: bool) -> Self {
        self.undo = undo;
        self
    }

    pub fn with_max_undo_stack(mut self, max: usize) -> Self {
        self.max_undo_stack = max.max(1);
        self
    }
}

/// Dispatch phase. Checked before any internal borrow so re-entrant calls
/// fail with a proper error instead of a borrow panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    AtRest,
    InCycle,
    AfterCycle,
}

/// Per-cycle transient caches, reset on every dispatch.
#[derive(Default)]
pub(crate) struct CycleState {
    pub(crate) cycle_id: String,
    pub(crate) source_action: Option<Action>,
    /// Action type -> payload, for repeat detection and listener lookups.
    pub(crate) action_cache: HashMap<String, Value>,
    /// Updater conditions staged this cycle: (epic, updater slot, index).
    pub(crate) condition_cache: Vec<(String, usize, usize)>,
    /// Listener conditions staged this cycle.
    pub(crate) listener_condition_cache: Vec<(ListenerId, usize)>,
    /// Touched (epic, instance) pairs in touch order, deduplicated.
    pub(crate) touched: Vec<(String, Option<String>)>,
    /// Updaters whose handler ran this cycle.
    pub(crate) processed_updaters: Vec<(String, usize)>,
    /// Listeners evaluated this cycle.
    pub(crate) processed_listeners: Vec<ListenerId>,
    /// Patch pairs recorded for the undo stack.
    pub(crate) undo_entry: UndoEntry,
}

pub(crate) struct Inner {
    pub(crate) registry: Registry,
    pub(crate) cycle: CycleState,
    pub(crate) undo_stack: Vec<UndoEntry>,
    pub(crate) redo_stack: Vec<UndoEntry>,
}

pub(crate) struct Shared {
    pub(crate) options: StoreOptions,
    pub(crate) phase: Cell<Phase>,
    pub(crate) queue: RefCell<VecDeque<Action>>,
    pub(crate) inner: RefCell<Inner>,
}

/// The event-driven state store.
///
/// Cloning is cheap and shares the underlying store; the store is
/// intentionally single-threaded (`!Send`).
#[derive(Clone)]
pub struct Store {
    pub(crate) shared: Rc<Shared>,
}

impl Store {
    /// Create a store with the given options.
    pub fn new(options: StoreOptions) -> Self {
        Self {
            shared: Rc::new(Shared {
                options,
                phase: Cell::new(Phase::AtRest),
                queue: RefCell::new(VecDeque::new()),
                inner: RefCell::new(Inner {
                    registry: Registry::new(),
                    cycle: CycleState::default(),
                    undo_stack: Vec::new(),
                    redo_stack: Vec::new(),
                }),
            }),
        }
    }

    /// Register an epic. Fails without mutating on duplicate names or
    /// invalid condition shapes.
    pub fn register_epic(&self, def: EpicDef) -> Result<(), StoreError> {
        self.shared
            .inner
            .borrow_mut()
            .registry
            .register(def, self.shared.options.patterns)
    }

    /// Remove an epic and every condition index entry it owns. Returns
    /// false when no such epic exists.
    pub fn unregister_epic(&self, name: &str) -> bool {
        self.shared.inner.borrow_mut().registry.unregister(name)
    }

    /// Register a listener over the given conditions. The returned
    /// subscription unsubscribes idempotently.
    pub fn add_listener(
        &self,
        conditions: Vec<ConditionSpec>,
        handler: impl Fn(&HandlerValues, &ListenerContext) -> Result<(), String> + 'static,
    ) -> Result<Subscription, StoreError> {
        let id = self.shared.inner.borrow_mut().registry.add_listener(
            conditions,
            Rc::new(handler),
            self.shared.options.patterns,
        )?;
        Ok(Subscription {
            shared: Rc::downgrade(&self.shared),
            id,
            done: Cell::new(false),
        })
    }

    /// Dispatch an action, running a full Epic Cycle to quiescence.
    ///
    /// Dispatching from a reducer handler queues the action into the
    /// running cycle; dispatching from a listener is an error.
    pub fn dispatch(&self, action: impl Into<Action>) -> Result<(), StoreError> {
        let action = action.into();
        match self.shared.phase.get() {
            Phase::AfterCycle => Err(StoreError::NoDispatchInEpicListener),
            Phase::InCycle => {
                self.shared.queue.borrow_mut().push_back(action);
                Ok(())
            }
            Phase::AtRest => self.run_cycle(action),
        }
    }

    fn run_cycle(&self, action: Action) -> Result<(), StoreError> {
        let cycle_id = uuid::Uuid::new_v4().to_string();
        {
            let mut inner = self.shared.inner.borrow_mut();
            inner.cycle = CycleState {
                cycle_id: cycle_id.clone(),
                source_action: Some(action.clone()),
                ..CycleState::default()
            };
        }
        self.shared.phase.set(Phase::InCycle);
        tracing::debug!(cycle_id = %cycle_id, action = %action, "dispatch cycle started");

        let mut result = self.process_action(&action, true);
        while result.is_ok() {
            let next = self.shared.queue.borrow_mut().pop_front();
            match next {
                Some(queued) => result = self.process_action(&queued, true),
                None => break,
            }
        }
        if result.is_err() {
            self.shared.queue.borrow_mut().clear();
        }

        self.shared.phase.set(Phase::AfterCycle);
        // A rolled-back cycle changed nothing: listeners only see commits.
        let listener_errors = if result.is_ok() {
            self.process_cycle_listeners()
        } else {
            Vec::new()
        };
        self.finish_cycle(result.is_ok());
        self.shared.phase.set(Phase::AtRest);

        match result {
            Err(error) => {
                tracing::error!(cycle_id = %cycle_id, error = %error, "dispatch cycle rolled back");
                Err(error)
            }
            Ok(()) if !listener_errors.is_empty() => {
                tracing::warn!(
                    cycle_id = %cycle_id,
                    failed = listener_errors.len(),
                    "listener handlers failed after the cycle"
                );
                Err(StoreError::ListenerErrors(listener_errors))
            }
            Ok(()) => {
                tracing::debug!(cycle_id = %cycle_id, "dispatch cycle committed");
                Ok(())
            }
        }
    }

    /// Promote or discard everything staged this cycle and clear the
    /// transient fields, restoring the at-rest invariant.
    fn finish_cycle(&self, committed: bool) {
        let mut inner = self.shared.inner.borrow_mut();
        let inner_ref = &mut *inner;
        let cycle = std::mem::take(&mut inner_ref.cycle);

        for (epic, slot, index) in &cycle.condition_cache {
            if let Some(condition) = inner_ref.registry.condition_mut(epic, *slot, *index) {
                if committed {
                    if let Some(staged) = condition.staged.take() {
                        condition.value = staged;
                    }
                }
                condition.clear_transients();
            }
        }

        for (id, index) in &cycle.listener_condition_cache {
            if let Some(listener) = inner_ref.registry.listeners.get_mut(id) {
                if let Some(condition) = listener.conditions.get_mut(*index) {
                    if committed {
                        if let Some(staged) = condition.staged.take() {
                            condition.value = staged;
                        }
                    }
                    condition.clear_transients();
                }
            }
        }

        for (epic, key) in &cycle.touched {
            if let Some(epic) = inner_ref.registry.epics.get_mut(epic) {
                if let Some(instance) = epic.instance_mut(key) {
                    if committed {
                        instance.promote();
                    } else {
                        instance.clear_staged();
                    }
                }
            }
        }

        for (epic, slot) in &cycle.processed_updaters {
            if let Some(epic) = inner_ref.registry.epics.get_mut(epic) {
                if let Some(updater) = epic.updaters.get_mut(*slot) {
                    updater.processed = false;
                }
            }
        }

        for id in &cycle.processed_listeners {
            if let Some(listener) = inner_ref.registry.listeners.get_mut(id) {
                listener.processed = false;
            }
        }

        if committed && self.shared.options.undo && !cycle.undo_entry.is_empty() {
            // The bound is at least 1 even when the options struct was
            // built literally with a zero value.
            let max_undo_stack = self.shared.options.max_undo_stack.max(1);
            if inner_ref.undo_stack.len() == max_undo_stack {
                inner_ref.undo_stack.remove(0);
            }
            inner_ref.undo_stack.push(cycle.undo_entry);
            inner_ref.redo_stack.clear();
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new(StoreOptions::default())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("options", &self.shared.options)
            .field("phase", &self.shared.phase.get())
            .finish_non_exhaustive()
    }
}

/// Handle returned by [`Store::add_listener`]; unsubscribing twice is a
/// no-op, as is unsubscribing after the store was dropped.
pub struct Subscription {
    shared: Weak<Shared>,
    id: ListenerId,
    done: Cell<bool>,
}

impl Subscription {
    /// Remove the listener from every index.
    pub fn unsubscribe(&self) {
        if self.done.replace(true) {
            return;
        }
        if let Some(shared) = self.shared.upgrade() {
            shared.inner.borrow_mut().registry.remove_listener(self.id);
        }
    }
}
