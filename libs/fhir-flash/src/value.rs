//! The host evaluator's result shape (spec.md §4.6, §9).
//!
//! Inline values already arrive as `serde_json::Value`, which *is* the
//! tagged sum (`Null | Bool | Number | String | Array | Object`) the design
//! notes in §9 ask for — there's no need to reinvent it. What needs a
//! proper tagged variant is distinguishing a plain value from the FRR
//! envelope a nested flash rule produces; §9 explicitly calls out not to
//! rely on a sentinel marker for that, so `EvalResult` carries it as a
//! real enum instead.

use crate::definitions::ElementKind;
use serde_json::Value;

/// The envelope a flash rule's evaluation produces (spec.md §3: FRR).
#[derive(Debug, Clone, PartialEq)]
pub struct FlashRuleResult {
    /// JSON grouping key: `name` or `name:sliceName`.
    pub key: String,
    pub value: Value,
    pub kind: ElementKind,
}

impl FlashRuleResult {
    pub fn new(key: impl Into<String>, value: Value, kind: ElementKind) -> Self {
        Self {
            key: key.into(),
            value,
            kind,
        }
    }
}

/// What evaluating one child expression of a flash node can produce
/// (spec.md §4.6). `undefined` is modeled as `Option::None` at the call
/// site rather than as a variant here.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalResult {
    /// A plain value — either the node's inline right-hand side, or
    /// whatever the host evaluator otherwise returned.
    Raw(Value),
    /// A single nested flash rule's result.
    Rule(FlashRuleResult),
    /// Several flash rule results sharing one grouping key (repeating
    /// resource-kind rules, spec.md §4.5).
    RuleList(Vec<FlashRuleResult>),
}

impl EvalResult {
    pub fn as_raw(&self) -> Option<&Value> {
        match self {
            EvalResult::Raw(v) => Some(v),
            _ => None,
        }
    }
}

/// §4.2's falsy-drop rule for inline expression results: drop falsy
/// values, *except* an explicit `false` or `0`, which are meaningful FHIR
/// primitive values and must be retained.
pub fn is_retained_inline_value(value: &Value) -> bool {
    match value {
        Value::Null => false,
        // `false` and `0` are the only falsy non-null JSON scalars, and
        // both are explicitly retained, so every bool/number is kept.
        Value::Bool(_) => true,
        Value::Number(_) => true,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retains_explicit_false_and_zero() {
        assert!(is_retained_inline_value(&Value::Bool(false)));
        assert!(is_retained_inline_value(&Value::from(0)));
        assert!(is_retained_inline_value(&Value::from(0.0)));
    }

    #[test]
    fn drops_null_and_empty_string() {
        assert!(!is_retained_inline_value(&Value::Null));
        assert!(!is_retained_inline_value(&Value::String(String::new())));
    }

    #[test]
    fn retains_non_empty_collections() {
        assert!(is_retained_inline_value(&serde_json::json!(["a"])));
        assert!(is_retained_inline_value(&serde_json::json!({"a": 1})));
    }
}
