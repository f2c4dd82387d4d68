//! Sub-expression processing (spec.md §4.2).

use crate::ast::FlashNode;
use crate::env::Environment;
use crate::error::Result;
use crate::host::HostEvaluator;
use crate::value::{is_retained_inline_value, EvalResult, FlashRuleResult};
use serde_json::Value;
use std::collections::HashMap;

/// Grouped results of driving the host evaluator over one node's child
/// expressions: the single inline value (if any) and the per-key FRR
/// groups, in arrival order within each key.
pub(crate) struct SubExpressionResults {
    inline: Option<Value>,
    by_key: HashMap<String, Vec<FlashRuleResult>>,
}

impl SubExpressionResults {
    pub(crate) fn inline(&self) -> Option<&Value> {
        self.inline.as_ref()
    }

    pub(crate) fn get(&self, key: &str) -> &[FlashRuleResult] {
        self.by_key.get(key).map(Vec::as_slice).unwrap_or(&[])
    }
}

pub(crate) fn process_sub_expressions(
    node: &FlashNode,
    input: &Value,
    env: &mut Environment,
    host: &dyn HostEvaluator,
) -> Result<SubExpressionResults> {
    let mut inline: Option<Value> = None;
    let mut by_key: HashMap<String, Vec<FlashRuleResult>> = HashMap::new();

    for child in &node.expressions {
        let Some(result) = host.evaluate(child, input, env)? else {
            continue;
        };

        if child.is_bind {
            continue;
        }

        if child.is_inline_expression {
            let raw = match result {
                EvalResult::Raw(v) => v,
                EvalResult::Rule(frr) => frr.value,
                EvalResult::RuleList(frrs) => {
                    frrs.into_iter().last().map(|f| f.value).unwrap_or(Value::Null)
                }
            };
            if is_retained_inline_value(&raw) {
                inline = Some(raw);
            }
            continue;
        }

        match result {
            EvalResult::Raw(_) => {
                tracing::trace!("ignoring raw value from a non-inline, non-bind sub-expression");
            }
            EvalResult::Rule(frr) => by_key.entry(frr.key.clone()).or_default().push(frr),
            EvalResult::RuleList(frrs) => {
                for frr in frrs {
                    by_key.entry(frr.key.clone()).or_default().push(frr);
                }
            }
        }
    }

    Ok(SubExpressionResults { inline, by_key })
}
