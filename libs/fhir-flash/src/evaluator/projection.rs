//! Child projection (spec.md §4.3): candidate-name resolution, per-name
//! harvesting from inline values and sub-expression results, cardinality
//! collapse, and virtual-rule synthesis.

use super::context::EvalContext;
use super::primitive;
use super::subexpr::SubExpressionResults;
use crate::ast::FlashNode;
use crate::definitions::{Cardinality, ElementDef, ElementKind};
use crate::env::Environment;
use crate::error::{FlashError, Result};
use crate::host::HostEvaluator;
use crate::value::EvalResult;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// What was harvested for one child ED, and the JSON key it will be
/// assigned under (`name`, or `name:sliceName` for a non-polymorphic
/// slice — flattened back out in [`super::assembly::flatten_slices`]).
struct Harvest {
    assign_key: String,
    values: Vec<Value>,
}

/// Projects every FHIR child of `ctx` into `result`. Returns the errors
/// captured from virtual-rule synthesis, keyed by grouping key, for the
/// mandatory-children pass to re-throw if still unsatisfied.
pub(crate) fn project_children(
    node: &FlashNode,
    input: &Value,
    env: &mut Environment,
    host: &dyn HostEvaluator,
    ctx: &EvalContext,
    sub: &SubExpressionResults,
) -> Result<(Map<String, Value>, HashMap<String, FlashError>)> {
    let mut result = Map::new();
    let mut virtual_errors = HashMap::new();

    for ed in ctx
        .children
        .iter()
        .filter(|e| e.max != Cardinality::Forbidden && !e.names.is_empty())
    {
        let (harvest, err) = harvest_child(node, input, env, host, ed, sub)?;
        if let Some(e) = err {
            let key = ed.grouping_key().unwrap_or_else(|_| ed.flash_path_ref_key.clone());
            virtual_errors.insert(key, e);
        }
        let Some(harvest) = harvest else { continue };
        let collapsed = collapse(ed, harvest.values);
        assign(&mut result, ed, &harvest.assign_key, collapsed);
    }

    Ok((result, virtual_errors))
}

fn harvest_child(
    node: &FlashNode,
    input: &Value,
    env: &mut Environment,
    host: &dyn HostEvaluator,
    ed: &ElementDef,
    sub: &SubExpressionResults,
) -> Result<(Option<Harvest>, Option<FlashError>)> {
    if ed.is_unnarrowed_polymorphic() {
        // §4.3 point 1/4: multiple candidate names, one per legal type; no
        // virtual-rule synthesis applies to these.
        let mut chosen: Option<Harvest> = None;
        for name in &ed.names {
            let mut values = Vec::new();
            harvest_inline_name(ed, name, sub.inline(), env, &mut values)?;
            harvest_sub_expression_key(name, sub, &mut values);
            if !values.is_empty() {
                chosen = Some(Harvest {
                    assign_key: name.clone(),
                    values,
                });
            }
        }
        return Ok((chosen, None));
    }

    let name = ed.single_name()?;
    let assign_key = if ed.is_slice() {
        format!("{}:{}", name, ed.slice_name.as_ref().unwrap())
    } else {
        name.to_string()
    };

    let mut values = Vec::new();
    harvest_inline_name(ed, name, sub.inline(), env, &mut values)?;
    harvest_sub_expression_key(&assign_key, sub, &mut values);

    if values.is_empty() && ed.min > 0 {
        let synth = FlashNode::virtual_rule(node, ed.flash_path_ref_key.clone());
        env.push_scope();
        let outcome = super::evaluate_flash(&synth, input, env, host);
        env.pop_scope();
        match outcome {
            Ok(Some(EvalResult::Rule(frr))) => values.push(frr.value),
            Ok(Some(EvalResult::RuleList(frrs))) => values.extend(frrs.into_iter().map(|f| f.value)),
            Ok(Some(EvalResult::Raw(v))) => values.push(v),
            Ok(None) => {}
            Err(e) => return Ok((None, Some(e))),
        }
    }

    if values.is_empty() {
        Ok((None, None))
    } else {
        Ok((Some(Harvest { assign_key, values }), None))
    }
}

/// §4.3 point 2, inline half: `inlineResult[name]`/`_name`, not a slice,
/// spread across arrays for repeating elements, wrapped to the combined
/// `{ value, ...extensions }` form for primitive-type elements.
///
/// Unlike sub-expression-sourced values (already normalized by the
/// nested rule's own `evaluate_flash` call, spec.md §4.4), a scalar
/// harvested straight from the parent's inline object never passed
/// through primitive normalization — so it happens here instead.
fn harvest_inline_name(
    ed: &ElementDef,
    name: &str,
    inline: Option<&Value>,
    env: &Environment,
    out: &mut Vec<Value>,
) -> Result<()> {
    if ed.is_slice() {
        return Ok(());
    }
    let Some(Value::Object(obj)) = inline else { return Ok(()) };
    let ext_key = format!("_{name}");
    let v = obj.get(name);
    let ext = obj.get(&ext_key);
    if v.is_none() && ext.is_none() {
        return Ok(());
    }

    if ed.max != Cardinality::Single {
        if let Some(Value::Array(items)) = v {
            let ext_items = ext.and_then(Value::as_array);
            for (i, item) in items.iter().enumerate() {
                let e = ext_items.and_then(|a| a.get(i));
                out.push(normalize_and_wrap(ed, item.clone(), e, env)?);
            }
            return Ok(());
        }
    }
    out.push(normalize_and_wrap(ed, v.cloned().unwrap_or(Value::Null), ext, env)?);
}

fn normalize_and_wrap(ed: &ElementDef, scalar: Value, ext: Option<&Value>, env: &Environment) -> Result<Value> {
    match ed.kind {
        ElementKind::PrimitiveType => {
            let normalized = primitive::normalize(ed, &scalar, env)?;
            Ok(wrap_primitive(normalized, ext))
        }
        ElementKind::System => primitive::normalize(ed, &scalar, env),
        ElementKind::ComplexType | ElementKind::Resource => Ok(scalar),
    }
}

fn wrap_primitive(scalar: Value, ext: Option<&Value>) -> Value {
    let mut obj = Map::new();
    if let Some(Value::Object(ext_obj)) = ext {
        for (k, v) in ext_obj {
            obj.insert(k.clone(), v.clone());
        }
    }
    if !scalar.is_null() {
        obj.insert("value".to_string(), scalar);
    }
    Value::Object(obj)
}

/// §4.3 point 2, sub-expression half: append every FRR value grouped
/// under `key`.
fn harvest_sub_expression_key(key: &str, sub: &SubExpressionResults, out: &mut Vec<Value>) {
    for frr in sub.get(key) {
        out.push(frr.value.clone());
    }
}

enum Collapsed {
    None,
    One(Value),
    Many(Vec<Value>),
}

/// §4.3 point 3.
fn collapse(ed: &ElementDef, harvested: Vec<Value>) -> Collapsed {
    if harvested.is_empty() {
        return Collapsed::None;
    }
    if ed.max != Cardinality::Single {
        return Collapsed::Many(harvested);
    }
    if ed.kind == ElementKind::System {
        return Collapsed::One(harvested.into_iter().last().unwrap());
    }
    // complex/primitive, max = "1": shallow-merge, later values override.
    let merged = harvested.into_iter().fold(None, |acc, v| match (acc, v) {
        (Some(Value::Object(mut a)), Value::Object(b)) => {
            for (k, vv) in b {
                a.insert(k, vv);
            }
            Some(Value::Object(a))
        }
        (_, v) => Some(v),
    });
    Collapsed::One(merged.unwrap())
}

/// §4.5 "Assignment". Primitive-type elements split into index-aligned
/// `name`/`_name` arrays; everything else assigns the collapsed value
/// (or single-element array, when `isArray` forces it) directly.
fn assign(result: &mut Map<String, Value>, ed: &ElementDef, key: &str, collapsed: Collapsed) {
    match collapsed {
        Collapsed::None => {}
        Collapsed::Many(values) => {
            if ed.kind == ElementKind::PrimitiveType {
                assign_primitive_many(result, key, values);
            } else {
                result.insert(key.to_string(), Value::Array(values));
            }
        }
        Collapsed::One(value) => {
            if ed.kind == ElementKind::PrimitiveType {
                assign_primitive_one(result, key, value);
            } else if ed.is_array {
                result.insert(key.to_string(), Value::Array(vec![value]));
            } else {
                result.insert(key.to_string(), value);
            }
        }
    }
}

/// Splits the combined `{ value, ...extensions }` harvest form back into
/// FHIR's parallel `name` scalar and `_name` extension-object arrays.
fn split_primitive(v: &Value) -> (Value, Value) {
    match v {
        Value::Object(obj) => {
            let scalar = obj.get("value").cloned().unwrap_or(Value::Null);
            let mut ext = obj.clone();
            ext.remove("value");
            let ext_val = if ext.is_empty() {
                Value::Null
            } else {
                Value::Object(ext)
            };
            (scalar, ext_val)
        }
        other => (other.clone(), Value::Null),
    }
}

fn assign_primitive_many(result: &mut Map<String, Value>, key: &str, values: Vec<Value>) {
    let mut scalars = Vec::with_capacity(values.len());
    let mut exts = Vec::with_capacity(values.len());
    for v in &values {
        let (s, e) = split_primitive(v);
        scalars.push(s);
        exts.push(e);
    }
    if scalars.iter().any(|v| !v.is_null()) {
        result.insert(key.to_string(), Value::Array(scalars));
    }
    if exts.iter().any(|v| !v.is_null()) {
        result.insert(format!("_{key}"), Value::Array(exts));
    }
}

fn assign_primitive_one(result: &mut Map<String, Value>, key: &str, value: Value) {
    let (scalar, ext) = split_primitive(&value);
    if !scalar.is_null() {
        result.insert(key.to_string(), scalar);
    }
    if !ext.is_null() {
        result.insert(format!("_{key}"), ext);
    }
}
