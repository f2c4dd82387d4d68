//! The host expression evaluator contract (spec.md §4.6, §9).
//!
//! The generic expression evaluator is an external collaborator (spec.md
//! §1) — FLASH only requires that it implement this single method.
//! Production callers inject a real mapping-language/FHIRPath engine; the
//! `testing` module (behind `#[cfg(test)]`) provides a literal-returning
//! double used by this crate's own test suite.

use crate::ast::FlashNode;
use crate::env::Environment;
use crate::error::Result;
use crate::value::EvalResult;
use serde_json::Value;

/// Evaluates one AST sub-expression against the current input and
/// environment (spec.md §4.6). Returning `Ok(None)` models `undefined`.
///
/// Implementations are expected to:
/// - return a plain value for ordinary expressions,
/// - return [`EvalResult::Rule`] / [`EvalResult::RuleList`] when the child
///   expression is itself a nested flash rule,
/// - mutate `env` themselves for bind nodes (spec.md §4.2) rather than
///   relying on FLASH to do it.
pub trait HostEvaluator {
    fn evaluate(
        &self,
        node: &FlashNode,
        input: &Value,
        env: &mut Environment,
    ) -> Result<Option<EvalResult>>;
}

/// A host evaluator double for tests. Not `#[cfg(test)]`-gated so it's
/// usable from this crate's own `tests/` integration suite as well as
/// its inline unit tests.
pub mod testing {
    use super::*;
    use crate::value::FlashRuleResult;
    use std::collections::HashMap;

    /// A host evaluator double for tests: each child node's
    /// [`crate::ast::FlashNode::node_type`] is looked up in a map of
    /// canned [`EvalResult`]s. Binds always return `None` after invoking
    /// an optional side-effecting closure against `env`.
    #[derive(Default)]
    pub struct LiteralHost {
        pub results: HashMap<String, EvalResult>,
    }

    impl LiteralHost {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_raw(mut self, node_type: impl Into<String>, value: Value) -> Self {
            self.results.insert(node_type.into(), EvalResult::Raw(value));
            self
        }

        pub fn with_rule(
            mut self,
            node_type: impl Into<String>,
            frr: FlashRuleResult,
        ) -> Self {
            self.results.insert(node_type.into(), EvalResult::Rule(frr));
            self
        }

        pub fn with_rule_list(
            mut self,
            node_type: impl Into<String>,
            frrs: Vec<FlashRuleResult>,
        ) -> Self {
            self.results
                .insert(node_type.into(), EvalResult::RuleList(frrs));
            self
        }
    }

    impl HostEvaluator for LiteralHost {
        fn evaluate(
            &self,
            node: &FlashNode,
            _input: &Value,
            _env: &mut Environment,
        ) -> Result<Option<EvalResult>> {
            if node.is_bind {
                return Ok(None);
            }
            Ok(self.results.get(&node.node_type).cloned())
        }
    }
}
