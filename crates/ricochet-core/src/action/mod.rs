//! Action type definitions
//!
//! An action is the only input to the dispatch engine: a type tag, a
//! structured payload, and an optional target instance id. Internal Epic
//! actions reuse the same shape with the epic name as the tag and the
//! freshly staged state as the payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A dispatchable action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Action type tag. Epic actions use the owning epic name.
    #[serde(rename = "type")]
    pub kind: String,
    /// Structured payload handed to condition selectors.
    #[serde(default)]
    pub payload: Value,
    /// Instance id for instanced epics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl Action {
    /// Create an action with an empty payload.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: Value::Null,
            target: None,
        }
    }

    /// Attach a payload.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Target a specific epic instance.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

impl From<&str> for Action {
    fn from(kind: &str) -> Self {
        Action::new(kind)
    }
}

impl From<String> for Action {
    fn from(kind: String) -> Self {
        Action::new(kind)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(target) => write!(f, "{}@{}", self.kind, target),
            None => self.kind.fmt(f),
        }
    }
}
