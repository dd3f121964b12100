//! Condition descriptors and the condition compiler
//!
//! Conditions bind reducers and listeners to action types, epic names, or
//! wildcard patterns. This module owns:
//! - the public descriptor shapes (`ConditionSpec`, `ConditionInput`)
//! - disjunction expansion (`split_conditions`)
//! - compilation into runtime conditions with memoized selectors and
//!   anchored pattern matchers

use std::rc::Rc;

use regex::Regex;
use serde_json::Value;

use crate::value::Slot;

/// Pure selector over an action payload: `(payload, kind) -> value`.
///
/// Selectors may fail; a failing selector aborts the cycle it runs in.
pub type Selector = Rc<dyn Fn(&Value, &str) -> Result<Value, String>>;

/// User-facing condition descriptor.
///
/// This is the canonical shape emitted by the fluent builder layer; bare
/// strings convert via `From<&str>`.
#[derive(Clone)]
pub struct ConditionSpec {
    /// Action type, epic name, or wildcard pattern (`*` is the only
    /// metacharacter).
    pub kind: String,
    /// Selector over the triggering payload; identity when absent.
    pub selector: Option<Selector>,
    /// Participates in the handler view without triggering on its own.
    pub passive: bool,
    /// Must have changed this cycle for the updater to fire.
    pub required: bool,
    /// Targets a specific epic instance.
    pub target: Option<String>,
}

impl ConditionSpec {
    /// Create a plain active condition on a type.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            selector: None,
            passive: false,
            required: false,
            target: None,
        }
    }

    /// Attach a selector.
    pub fn with_selector(mut self, selector: impl Fn(&Value, &str) -> Result<Value, String> + 'static) -> Self {
        self.selector = Some(Rc::new(selector));
        self
    }

    /// Mark the condition passive.
    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }

    /// Mark the condition required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Target a specific epic instance.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

impl From<&str> for ConditionSpec {
    fn from(kind: &str) -> Self {
        ConditionSpec::new(kind)
    }
}

impl From<String> for ConditionSpec {
    fn from(kind: String) -> Self {
        ConditionSpec::new(kind)
    }
}

impl std::fmt::Debug for ConditionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionSpec")
            .field("kind", &self.kind)
            .field("passive", &self.passive)
            .field("required", &self.required)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// One slot in a reducer's condition list: a single condition or a
/// disjunction over alternatives.
#[derive(Clone, Debug)]
pub enum ConditionInput {
    Single(ConditionSpec),
    AnyOf(Vec<ConditionSpec>),
}

impl From<ConditionSpec> for ConditionInput {
    fn from(spec: ConditionSpec) -> Self {
        ConditionInput::Single(spec)
    }
}

impl From<&str> for ConditionInput {
    fn from(kind: &str) -> Self {
        ConditionInput::Single(ConditionSpec::new(kind))
    }
}

impl From<Vec<ConditionSpec>> for ConditionInput {
    fn from(specs: Vec<ConditionSpec>) -> Self {
        ConditionInput::AnyOf(specs)
    }
}

/// Expand disjunctions into fully conjunctive condition vectors.
///
/// Each returned vector is one concrete updater: the cartesian product
/// across every `AnyOf` slot, varying the later slots fastest so the first
/// disjunction found dictates the outer order.
pub fn split_conditions(inputs: &[ConditionInput]) -> Vec<Vec<ConditionSpec>> {
    let mut expanded: Vec<Vec<ConditionSpec>> = vec![Vec::new()];
    for input in inputs {
        let alternatives: Vec<&ConditionSpec> = match input {
            ConditionInput::Single(spec) => vec![spec],
            ConditionInput::AnyOf(specs) => specs.iter().collect(),
        };
        let mut next = Vec::with_capacity(expanded.len() * alternatives.len());
        for prefix in &expanded {
            for alt in &alternatives {
                let mut vector = prefix.clone();
                vector.push((*alt).clone());
                next.push(vector);
            }
        }
        expanded = next;
    }
    expanded
}

/// A compiled wildcard pattern with its anchored matcher.
#[derive(Debug, Clone)]
pub struct Pattern {
    raw: String,
    regex: Regex,
}

impl Pattern {
    /// Compile a wildcard pattern. `*` is the only metacharacter; every
    /// other character matches literally and the match is anchored.
    pub fn compile(raw: &str) -> Result<Self, String> {
        let mut source = String::from("^");
        for (index, segment) in raw.split('*').enumerate() {
            if index > 0 {
                source.push_str(".*?");
            }
            source.push_str(&regex::escape(segment));
        }
        source.push('$');
        let regex = Regex::new(&source).map_err(|e| e.to_string())?;
        Ok(Self {
            raw: raw.to_string(),
            regex,
        })
    }

    /// The pattern as written.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Anchored match against an action type or epic name.
    pub fn matches(&self, kind: &str) -> bool {
        self.regex.is_match(kind)
    }
}

/// True when a condition kind routes through the pattern index.
pub fn is_pattern(kind: &str) -> bool {
    kind.contains('*')
}

fn identity_selector() -> Selector {
    Rc::new(|payload, _| Ok(payload.clone()))
}

/// A compiled runtime condition.
///
/// The `value` field holds the last committed selector value; `staged` and
/// `matched_pattern` live only within a cycle and are reset on exit.
pub(crate) struct Condition {
    pub(crate) kind: String,
    pub(crate) selector: Selector,
    pub(crate) passive: bool,
    pub(crate) required: bool,
    pub(crate) target: Option<String>,
    pub(crate) pattern: Option<Pattern>,
    pub(crate) value: Slot,
    pub(crate) staged: Option<Slot>,
    pub(crate) matched_pattern: bool,
    memo: Option<(Value, Value)>,
}

impl std::fmt::Debug for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Condition")
            .field("kind", &self.kind)
            .field("passive", &self.passive)
            .field("required", &self.required)
            .field("target", &self.target)
            .field("pattern", &self.pattern)
            .field("value", &self.value)
            .field("staged", &self.staged)
            .field("matched_pattern", &self.matched_pattern)
            .field("memo", &self.memo)
            .finish()
    }
}

impl Condition {
    /// Compile a descriptor. Returns a human-readable reason on rejection;
    /// the registry attaches epic/updater context.
    pub(crate) fn compile(spec: ConditionSpec, patterns_enabled: bool) -> Result<Self, String> {
        if spec.kind.is_empty() {
            return Err("condition type must be a non-empty string".to_string());
        }
        let pattern = if is_pattern(&spec.kind) {
            if !patterns_enabled {
                return Err(format!(
                    "condition type '{}' uses a wildcard but patterns are disabled",
                    spec.kind
                ));
            }
            Some(Pattern::compile(&spec.kind)?)
        } else {
            None
        };
        Ok(Self {
            kind: spec.kind,
            selector: spec.selector.unwrap_or_else(identity_selector),
            passive: spec.passive,
            required: spec.required,
            target: spec.target,
            pattern,
            value: Slot::Initial,
            staged: None,
            matched_pattern: false,
            memo: None,
        })
    }

    /// Run the selector through the size-one memo cache.
    pub(crate) fn select(&mut self, payload: &Value, kind: &str) -> Result<Value, String> {
        if let Some((input, output)) = &self.memo {
            if input == payload {
                return Ok(output.clone());
            }
        }
        let output = (self.selector)(payload, kind)?;
        self.memo = Some((payload.clone(), output.clone()));
        Ok(output)
    }

    /// The in-cycle view: staged value when present, committed otherwise.
    pub(crate) fn current(&self) -> &Slot {
        self.staged.as_ref().unwrap_or(&self.value)
    }

    /// True when the staged value differs from the committed one.
    pub(crate) fn changed(&self) -> bool {
        match &self.staged {
            Some(staged) => *staged != self.value,
            None => false,
        }
    }

    /// Drop per-cycle transients.
    pub(crate) fn clear_transients(&mut self) {
        self.staged = None;
        self.matched_pattern = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_split_conditions_without_disjunction_is_single_vector() {
        let inputs = vec![ConditionInput::from("a"), ConditionInput::from("b")];
        let vectors = split_conditions(&inputs);
        assert_eq!(vectors.len(), 1);
        assert_eq!(
            vectors[0].iter().map(|c| c.kind.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }

    #[test]
    fn test_split_conditions_expands_any_of_preserving_order() {
        let inputs = vec![
            ConditionInput::from("a"),
            ConditionInput::AnyOf(vec!["x".into(), "y".into()]),
            ConditionInput::from("b"),
        ];
        let vectors = split_conditions(&inputs);
        let kinds: Vec<Vec<&str>> = vectors
            .iter()
            .map(|v| v.iter().map(|c| c.kind.as_str()).collect())
            .collect();
        assert_eq!(kinds, vec![vec!["a", "x", "b"], vec!["a", "y", "b"]]);
    }

    #[test]
    fn test_split_conditions_crosses_multiple_disjunctions() {
        let inputs = vec![
            ConditionInput::AnyOf(vec!["a".into(), "b".into()]),
            ConditionInput::AnyOf(vec!["x".into(), "y".into()]),
        ];
        let vectors = split_conditions(&inputs);
        let kinds: Vec<Vec<&str>> = vectors
            .iter()
            .map(|v| v.iter().map(|c| c.kind.as_str()).collect())
            .collect();
        assert_eq!(
            kinds,
            vec![vec!["a", "x"], vec!["a", "y"], vec!["b", "x"], vec!["b", "y"]]
        );
    }

    #[test]
    fn test_pattern_match_is_anchored() {
        let pattern = Pattern::compile("USER_*").unwrap();
        assert!(pattern.matches("USER_LOGIN"));
        assert!(pattern.matches("USER_"));
        assert!(!pattern.matches("ADMIN_USER_LOGIN"));
    }

    #[test]
    fn test_pattern_escapes_regex_metacharacters() {
        let pattern = Pattern::compile("a.b*").unwrap();
        assert!(pattern.matches("a.b-suffix"));
        assert!(!pattern.matches("aXb-suffix"));
    }

    #[test]
    fn test_star_matches_everything() {
        let pattern = Pattern::compile("*").unwrap();
        assert!(pattern.matches("anything"));
        assert!(pattern.matches(""));
    }

    #[test]
    fn test_compile_rejects_empty_kind() {
        let err = Condition::compile(ConditionSpec::new(""), true).unwrap_err();
        assert!(err.contains("non-empty"));
    }

    #[test]
    fn test_compile_rejects_pattern_when_disabled() {
        let err = Condition::compile(ConditionSpec::new("USER_*"), false).unwrap_err();
        assert!(err.contains("patterns are disabled"));
    }

    #[test]
    fn test_selector_memoizes_last_input() {
        use std::cell::Cell;
        use std::rc::Rc;

        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let spec = ConditionSpec::new("a").with_selector(move |payload, _| {
            counter.set(counter.get() + 1);
            Ok(payload.clone())
        });
        let mut condition = Condition::compile(spec, false).unwrap();

        condition.select(&json!(1), "a").unwrap();
        condition.select(&json!(1), "a").unwrap();
        assert_eq!(calls.get(), 1);

        condition.select(&json!(2), "a").unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_changed_requires_staged_difference() {
        let mut condition = Condition::compile(ConditionSpec::new("a"), false).unwrap();
        assert!(!condition.changed());

        condition.staged = Some(Slot::Value(json!(1)));
        assert!(condition.changed());

        condition.value = Slot::Value(json!(1));
        assert!(!condition.changed());
    }
}
