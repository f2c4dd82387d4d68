//! The core `evaluate_flash` procedure (spec.md §2, §4): context
//! initialization, sub-expression processing, child projection, primitive
//! normalization, and final assembly, wired into one recursive function.

mod assembly;
mod context;
mod primitive;
mod projection;
mod subexpr;

use crate::ast::FlashNode;
use crate::definitions::ElementKind;
use crate::env::Environment;
use crate::error::{FlashError, Result};
use crate::host::HostEvaluator;
use crate::value::{EvalResult, FlashRuleResult};
use context::{init_context, ContextOutcome, EvalContext};
use projection::project_children;
use serde_json::{Map, Value};
use std::collections::HashMap;
use subexpr::process_sub_expressions;
use tracing::instrument;

/// Evaluates one AST node — a flash block, flash rule, or virtual rule —
/// against `input`, returning `None` for `undefined` (spec.md §4.5 "Empty
/// result rule", §4.2 "falsy drop").
///
/// Recursion happens only through virtual-rule synthesis (spec.md §4.3
/// point 4); ordinary nested flash rules are the host evaluator's concern
/// (spec.md §4.6), reached back into `FLASH` only via [`HostEvaluator`].
#[instrument(level = "trace", skip(input, env, host), fields(node_type = %node.node_type))]
pub fn evaluate_flash(
    node: &FlashNode,
    input: &Value,
    env: &mut Environment,
    host: &dyn HostEvaluator,
) -> Result<Option<EvalResult>> {
    if env.depth() > env.config().max_recursion_depth {
        return Err(FlashError::recursion_limit_exceeded(env.config().max_recursion_depth));
    }

    let outcome = init_context(node, env.definitions()).map_err(|e| e.with_node(node))?;

    let ctx = match outcome {
        ContextOutcome::ShortCircuit(fixed, kind, grouping_key) => {
            tracing::trace!(%grouping_key, "fixed-value short circuit");
            return finalize(node, kind, Some(grouping_key), fixed);
        }
        ContextOutcome::Proceed(ctx) => ctx,
    };

    let sub = process_sub_expressions(node, input, env, host)?;
    let grouping_key = ctx.ed.as_ref().map(|ed| ed.grouping_key()).transpose()?;

    match ctx.kind {
        ElementKind::System => evaluate_system(node, &ctx, grouping_key, &sub, env),
        ElementKind::Resource => evaluate_resource(node, input, env, host, &ctx, grouping_key, &sub),
        ElementKind::ComplexType => evaluate_complex(node, input, env, host, &ctx, grouping_key, &sub),
        ElementKind::PrimitiveType => evaluate_primitive(node, input, env, host, &ctx, grouping_key, &sub),
    }
}

fn evaluate_system(
    node: &FlashNode,
    ctx: &EvalContext,
    grouping_key: Option<String>,
    sub: &subexpr::SubExpressionResults,
    env: &Environment,
) -> Result<Option<EvalResult>> {
    let Some(raw) = sub.inline().cloned() else {
        return Ok(None);
    };
    // §4.5 "Flash-rule finalization": an array normalized value keeps only
    // its last element for system kind.
    let scalar = match raw {
        Value::Array(items) => items.into_iter().last().unwrap_or(Value::Null),
        other => other,
    };
    let normalized = match &ctx.ed {
        Some(ed) => primitive::normalize(ed, &scalar, env)?,
        None => scalar,
    };
    if normalized.is_null() {
        return Ok(None);
    }
    finalize(node, ctx.kind, grouping_key, normalized)
}

fn evaluate_resource(
    node: &FlashNode,
    input: &Value,
    env: &mut Environment,
    host: &dyn HostEvaluator,
    ctx: &EvalContext,
    grouping_key: Option<String>,
    sub: &subexpr::SubExpressionResults,
) -> Result<Option<EvalResult>> {
    if let Some(Value::Array(items)) = sub.inline() {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let mut obj = assembly::validate_resource_input(item)?;
            if let Some(rt) = &ctx.resource_type {
                obj.insert("resourceType".to_string(), Value::String(rt.clone()));
            }
            out.push(Value::Object(obj));
        }
        return finalize_many(node, ctx.kind, grouping_key, out);
    }

    let (projected, virtual_errors) = project_children(node, input, env, host, ctx, sub)?;
    let mut base = match sub.inline() {
        Some(v @ Value::Object(_)) => assembly::validate_resource_input(v)?,
        Some(other) => return Err(FlashError::resource_input_not_object(other).with_node(node)),
        None => Map::new(),
    };
    for (k, v) in projected {
        base.insert(k, v);
    }
    if let Some(rt) = &ctx.resource_type {
        base.insert("resourceType".to_string(), Value::String(rt.clone()));
    }

    let assembled = postprocess(node, ctx, base, virtual_errors, env)?;
    finalize(node, ctx.kind, grouping_key, Value::Object(assembled))
}

fn evaluate_complex(
    node: &FlashNode,
    input: &Value,
    env: &mut Environment,
    host: &dyn HostEvaluator,
    ctx: &EvalContext,
    grouping_key: Option<String>,
    sub: &subexpr::SubExpressionResults,
) -> Result<Option<EvalResult>> {
    let (projected, virtual_errors) = project_children(node, input, env, host, ctx, sub)?;
    let assembled = postprocess(node, ctx, projected, virtual_errors, env)?;
    finalize(node, ctx.kind, grouping_key, Value::Object(assembled))
}

fn evaluate_primitive(
    node: &FlashNode,
    input: &Value,
    env: &mut Environment,
    host: &dyn HostEvaluator,
    ctx: &EvalContext,
    grouping_key: Option<String>,
    sub: &subexpr::SubExpressionResults,
) -> Result<Option<EvalResult>> {
    let (projected, _virtual_errors) = project_children(node, input, env, host, ctx, sub)?;

    // The common case is a bare scalar inline expression. An inline value
    // that already arrives in the combined `{ value, ...ext }` shape
    // (e.g. a whole FHIR primitive object forwarded by the host
    // evaluator) is folded in as-is instead of re-normalized.
    let mut combined = Map::new();
    let mut scalar_source: Option<&Value> = None;
    match sub.inline() {
        Some(Value::Object(obj)) => combined = obj.clone(),
        Some(other) => scalar_source = Some(other),
        None => {}
    }
    for (k, v) in projected {
        combined.insert(k, v);
    }

    if let Some(raw) = scalar_source {
        let normalized = match &ctx.ed {
            Some(ed) => primitive::normalize(ed, raw, env)?,
            None => raw.clone(),
        };
        if !normalized.is_null() {
            combined.insert("value".to_string(), normalized);
        }
    }

    if combined.is_empty() {
        return Ok(None);
    }
    finalize(node, ctx.kind, grouping_key, Value::Object(combined))
}

fn postprocess(
    node: &FlashNode,
    ctx: &EvalContext,
    mut result: Map<String, Value>,
    virtual_errors: HashMap<String, FlashError>,
    env: &mut Environment,
) -> Result<Map<String, Value>> {
    assembly::flatten_slices(&mut result, ctx);

    if node.is_flash_block {
        if let Some(profile_url) = &ctx.profile_url {
            env.set_keys_before_auto_injection(result.keys().cloned().collect());
            assembly::inject_meta_profile(&mut result, profile_url);
        }
    }

    assembly::validate_mandatory(node, ctx, &result, &virtual_errors, env)?;

    if node.is_flash_block {
        assembly::filter_slice_errors(node, &result, env);
    }

    let skip_reorder = env.config().disable_reordering || no_new_keys_since_snapshot(&result, env);

    Ok(if skip_reorder {
        result
    } else {
        assembly::reorder_keys(result, ctx)
    })
}

fn no_new_keys_since_snapshot(result: &Map<String, Value>, env: &Environment) -> bool {
    let Some(before) = env.keys_before_auto_injection() else {
        return false;
    };
    let before: std::collections::HashSet<&str> = before.iter().map(String::as_str).collect();
    let after: std::collections::HashSet<&str> = result.keys().map(String::as_str).collect();
    before == after
}

fn finalize(
    node: &FlashNode,
    kind: ElementKind,
    grouping_key: Option<String>,
    value: Value,
) -> Result<Option<EvalResult>> {
    if node.is_flash_rule {
        if value.is_null() {
            return Ok(None);
        }
        let key = grouping_key.expect("a flash rule always resolves an ElementDefinition");
        return Ok(Some(EvalResult::Rule(FlashRuleResult::new(key, value, kind))));
    }
    if is_empty_block_result(&value) {
        return Ok(None);
    }
    Ok(Some(EvalResult::Raw(value)))
}

fn finalize_many(
    node: &FlashNode,
    kind: ElementKind,
    grouping_key: Option<String>,
    values: Vec<Value>,
) -> Result<Option<EvalResult>> {
    if values.is_empty() {
        return Ok(None);
    }
    if node.is_flash_rule {
        let key = grouping_key.expect("a flash rule always resolves an ElementDefinition");
        let frrs = values
            .into_iter()
            .map(|v| FlashRuleResult::new(key.clone(), v, kind))
            .collect();
        return Ok(Some(EvalResult::RuleList(frrs)));
    }
    Ok(Some(EvalResult::Raw(Value::Array(values))))
}

/// §4.5 "Empty-result rule": a flash-block result with zero keys, or only
/// `resourceType`, collapses to `undefined`.
fn is_empty_block_result(value: &Value) -> bool {
    match value {
        Value::Object(obj) => obj.is_empty() || (obj.len() == 1 && obj.contains_key("resourceType")),
        _ => false,
    }
}
