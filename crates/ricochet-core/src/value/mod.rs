//! Value layer - immutable state slots and structural merge
//!
//! This module provides:
//! - Slot: a state cell that distinguishes "never written" from every user
//!   value, including `null`
//! - merge: recursive overlay of a patch onto a slot, returning the merged
//!   value together with inverse undo/redo patches
//! - Patch: the reversible transform recorded by merge and replayed by the
//!   undo/redo engine

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

/// Merge and patch-application errors
#[derive(Debug, Clone, Error)]
pub enum MergeError {
    #[error("cannot merge object patch into {found} at '{path}'")]
    ShapeMismatch { path: String, found: &'static str },

    #[error("patch does not fit value shape at '{path}'")]
    PatchMismatch { path: String },
}

/// A state cell. `Initial` marks a value that has never been committed and
/// is distinct from every user value, `null` included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    /// No value has ever been written.
    Initial,
    /// A committed value.
    Value(Value),
}

impl Slot {
    /// True when nothing has been written yet.
    pub fn is_initial(&self) -> bool {
        matches!(self, Slot::Initial)
    }

    /// The contained value, if any.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Slot::Initial => None,
            Slot::Value(v) => Some(v),
        }
    }

    /// Consume the slot, surfacing `Initial` as `None`.
    pub fn into_option(self) -> Option<Value> {
        match self {
            Slot::Initial => None,
            Slot::Value(v) => Some(v),
        }
    }
}

impl From<Value> for Slot {
    fn from(value: Value) -> Self {
        Slot::Value(value)
    }
}

impl From<Option<Value>> for Slot {
    fn from(value: Option<Value>) -> Self {
        match value {
            Some(v) => Slot::Value(v),
            None => Slot::Initial,
        }
    }
}

/// Inverse transform recorded by [`merge`]. Opaque to the cycle controller;
/// only [`apply`] interprets it.
#[derive(Debug, Clone, PartialEq)]
pub enum Patch {
    /// Restore "never written" (at the root) or remove the key (nested).
    Unset,
    /// Replace the value wholesale.
    Replace(Value),
    /// Recurse into object fields.
    Object(BTreeMap<String, Patch>),
}

/// A matched undo/redo pair produced by one merge.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchPair {
    pub undo: Patch,
    pub redo: Patch,
}

/// Overlay `patch` onto `target`, returning `(merged, undo, redo)`.
///
/// Object patches over object targets merge recursively; keys absent from
/// the patch are untouched. Anything else replaces the target wholesale.
/// An object patch over a non-object target is a shape error: replacing a
/// primitive with an object requires an explicit wholesale replacement by
/// the caller.
pub fn merge(target: &Slot, patch: &Value) -> Result<(Value, Patch, Patch), MergeError> {
    match target {
        Slot::Initial => Ok((patch.clone(), Patch::Unset, Patch::Replace(patch.clone()))),
        Slot::Value(current) => merge_value(current, patch, "$"),
    }
}

fn merge_value(
    current: &Value,
    patch: &Value,
    path: &str,
) -> Result<(Value, Patch, Patch), MergeError> {
    match (current, patch) {
        (Value::Object(existing), Value::Object(overlay)) => {
            let mut merged = existing.clone();
            let mut undo = BTreeMap::new();
            let mut redo = BTreeMap::new();
            for (key, patch_value) in overlay {
                let child_path = format!("{}.{}", path, key);
                match existing.get(key) {
                    Some(old) => {
                        let (m, u, r) = merge_value(old, patch_value, &child_path)?;
                        merged.insert(key.clone(), m);
                        undo.insert(key.clone(), u);
                        redo.insert(key.clone(), r);
                    }
                    None => {
                        merged.insert(key.clone(), patch_value.clone());
                        undo.insert(key.clone(), Patch::Unset);
                        redo.insert(key.clone(), Patch::Replace(patch_value.clone()));
                    }
                }
            }
            Ok((
                Value::Object(merged),
                Patch::Object(undo),
                Patch::Object(redo),
            ))
        }
        (found, Value::Object(_)) => Err(MergeError::ShapeMismatch {
            path: path.to_string(),
            found: kind_name(found),
        }),
        (old, new) => Ok((
            new.clone(),
            Patch::Replace(old.clone()),
            Patch::Replace(new.clone()),
        )),
    }
}

/// Replay a recorded patch onto a slot.
pub fn apply(patch: &Patch, target: Slot) -> Result<Slot, MergeError> {
    match patch {
        Patch::Unset => Ok(Slot::Initial),
        Patch::Replace(value) => Ok(Slot::Value(value.clone())),
        Patch::Object(fields) => {
            let Slot::Value(Value::Object(mut map)) = target else {
                return Err(MergeError::PatchMismatch {
                    path: "$".to_string(),
                });
            };
            apply_object(fields, &mut map, "$")?;
            Ok(Slot::Value(Value::Object(map)))
        }
    }
}

fn apply_object(
    fields: &BTreeMap<String, Patch>,
    map: &mut serde_json::Map<String, Value>,
    path: &str,
) -> Result<(), MergeError> {
    for (key, patch) in fields {
        match patch {
            Patch::Unset => {
                map.remove(key);
            }
            Patch::Replace(value) => {
                map.insert(key.clone(), value.clone());
            }
            Patch::Object(nested) => {
                let child_path = format!("{}.{}", path, key);
                let Some(Value::Object(child)) = map.get_mut(key) else {
                    return Err(MergeError::PatchMismatch { path: child_path });
                };
                apply_object(nested, child, &child_path)?;
            }
        }
    }
    Ok(())
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_into_initial_adopts_patch() {
        let (merged, undo, redo) = merge(&Slot::Initial, &json!({"counter": 1})).unwrap();
        assert_eq!(merged, json!({"counter": 1}));
        assert_eq!(undo, Patch::Unset);
        assert_eq!(redo, Patch::Replace(json!({"counter": 1})));
    }

    #[test]
    fn test_merge_scalar_replacement_records_old_and_new() {
        let (merged, undo, redo) =
            merge(&Slot::Value(json!({"counter": 1})), &json!({"counter": 2})).unwrap();
        assert_eq!(merged, json!({"counter": 2}));
        assert_eq!(apply(&undo, Slot::Value(merged.clone())).unwrap().as_value(), Some(&json!({"counter": 1})));
        assert_eq!(
            apply(&redo, Slot::Value(json!({"counter": 1}))).unwrap().as_value(),
            Some(&json!({"counter": 2}))
        );
    }

    #[test]
    fn test_merge_recurses_and_preserves_untouched_keys() {
        let target = Slot::Value(json!({"a": {"x": 1, "y": 2}, "b": "keep"}));
        let (merged, undo, _) = merge(&target, &json!({"a": {"x": 10}})).unwrap();
        assert_eq!(merged, json!({"a": {"x": 10, "y": 2}, "b": "keep"}));

        let restored = apply(&undo, Slot::Value(merged)).unwrap();
        assert_eq!(restored, target);
    }

    #[test]
    fn test_merge_added_key_undoes_to_removal() {
        let target = Slot::Value(json!({"a": 1}));
        let (merged, undo, _) = merge(&target, &json!({"b": 2})).unwrap();
        assert_eq!(merged, json!({"a": 1, "b": 2}));
        assert_eq!(apply(&undo, Slot::Value(merged)).unwrap(), target);
    }

    #[test]
    fn test_merge_object_over_primitive_is_shape_error() {
        let err = merge(&Slot::Value(json!({"a": 1})), &json!({"a": {"nested": true}}))
            .expect_err("shape mismatch");
        match err {
            MergeError::ShapeMismatch { path, found } => {
                assert_eq!(path, "$.a");
                assert_eq!(found, "number");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_merge_array_replaces_wholesale() {
        let target = Slot::Value(json!({"items": [1, 2]}));
        let (merged, undo, redo) = merge(&target, &json!({"items": [3]})).unwrap();
        assert_eq!(merged, json!({"items": [3]}));
        assert_eq!(apply(&undo, Slot::Value(merged.clone())).unwrap(), target);
        assert_eq!(
            apply(&redo, target).unwrap(),
            Slot::Value(json!({"items": [3]}))
        );
    }

    #[test]
    fn test_apply_root_unset_restores_initial() {
        let restored = apply(&Patch::Unset, Slot::Value(json!(42))).unwrap();
        assert!(restored.is_initial());
    }

    #[test]
    fn test_apply_object_patch_on_scalar_is_error() {
        let patch = Patch::Object(BTreeMap::from([(
            "a".to_string(),
            Patch::Replace(json!(1)),
        )]));
        assert!(apply(&patch, Slot::Value(json!("scalar"))).is_err());
    }

    #[test]
    fn test_undo_then_redo_round_trips() {
        let target = Slot::Value(json!({"a": {"x": 1}, "b": 2}));
        let patch = json!({"a": {"x": 5, "z": 9}, "b": 7});
        let (merged, undo, redo) = merge(&target, &patch).unwrap();

        let back = apply(&undo, Slot::Value(merged.clone())).unwrap();
        assert_eq!(back, target);
        let forward = apply(&redo, back).unwrap();
        assert_eq!(forward, Slot::Value(merged));
    }
}
