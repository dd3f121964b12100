//! Store error types

use thiserror::Error;

use crate::value::MergeError;

/// Errors surfaced by registration, dispatch, and undo/redo.
///
/// Registration errors (duplicate epic, invalid condition shapes) are
/// reported before any state mutation. Dispatch errors cause full rollback
/// of the failing cycle. Listener errors are collected after the cycle and
/// never affect committed state.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("epic '{0}' is already registered")]
    DuplicateEpic(String),

    #[error("{owner} condition {condition}: {reason}")]
    InvalidConditionType {
        /// Owning registration, e.g. `epic 'counter' updater 0` or `listener`.
        owner: String,
        condition: usize,
        reason: String,
    },

    #[error("epic '{epic}' condition {condition}: selector failed: {message}")]
    InvalidConditionSelector {
        epic: String,
        condition: usize,
        message: String,
    },

    #[error("epic '{epic}' updater {updater} has no active conditions")]
    NoPassiveUpdaters { epic: String, updater: usize },

    #[error("epic '{epic}' updater {updater} returned an update that cannot be merged: {source}")]
    InvalidHandlerUpdate {
        epic: String,
        updater: usize,
        source: MergeError,
    },

    #[error("action type '{0}' collides with a registered epic")]
    InvalidEpicAction(String),

    #[error("external action '{0}' was already dispatched in this cycle")]
    NoRepeatedExternalAction(String),

    #[error("dispatch is not allowed from an epic listener")]
    NoDispatchInEpicListener,

    #[error("handler failed in epic '{epic}' updater {updater}: {message}")]
    Handler {
        epic: String,
        updater: usize,
        message: String,
    },

    #[error("{} listener(s) failed after the cycle", .0.len())]
    ListenerErrors(Vec<String>),

    #[error(transparent)]
    Merge(#[from] MergeError),
}
