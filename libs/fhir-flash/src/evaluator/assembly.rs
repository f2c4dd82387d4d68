//! Slicing, meta injection, mandatory validation and key reordering
//! (spec.md §4.5).

use super::context::EvalContext;
use crate::ast::FlashNode;
use crate::definitions::{Cardinality, ElementDef, ElementKind};
use crate::env::Environment;
use crate::error::{FlashError, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// The JSON keys a child ED is reachable under in the assembled result:
/// its single name, or (unnarrowed polymorphic only) all legal names.
fn candidate_output_names(ed: &ElementDef) -> Vec<String> {
    if ed.is_unnarrowed_polymorphic() {
        ed.names.clone()
    } else {
        ed.single_name().map(|n| vec![n.to_string()]).unwrap_or_default()
    }
}

/// §4.5 "Slice flattening". Removes every `parent:sliceName` key (and its
/// `_parent:sliceName` primitive sibling) in ED declaration order and
/// appends the values to `result[parent]` / `result[_parent]`.
pub(crate) fn flatten_slices(result: &mut Map<String, Value>, ctx: &EvalContext) {
    for ed in &ctx.children {
        if !ed.is_slice() || ed.is_polymorphic_base() {
            continue;
        }
        let Ok(name) = ed.single_name() else { continue };
        let slice_key = format!("{name}:{}", ed.slice_name.as_ref().unwrap());

        if ed.kind == ElementKind::PrimitiveType {
            let ext_slice_key = format!("_{slice_key}");
            let scalar = result.remove(&slice_key);
            let ext = result.remove(&ext_slice_key);
            if scalar.is_none() && ext.is_none() {
                continue;
            }
            push_into_array(result, name, scalar.unwrap_or(Value::Null));
            push_into_array(result, &format!("_{name}"), ext.unwrap_or(Value::Null));
        } else if let Some(value) = result.remove(&slice_key) {
            push_into_array(result, name, value);
        }
    }

    let all_null_arrays: Vec<String> = result
        .iter()
        .filter(|(k, v)| k.starts_with('_') && matches!(v, Value::Array(a) if a.iter().all(Value::is_null)))
        .map(|(k, _)| k.clone())
        .collect();
    for k in all_null_arrays {
        result.remove(&k);
    }
}

fn push_into_array(result: &mut Map<String, Value>, key: &str, value: Value) {
    match result.get_mut(key) {
        Some(Value::Array(arr)) => arr.push(value),
        _ => {
            result.insert(key.to_string(), Value::Array(vec![value]));
        }
    }
}

/// §4.5 "Meta profile injection".
pub(crate) fn inject_meta_profile(result: &mut Map<String, Value>, profile_url: &str) {
    let meta = result
        .entry("meta".to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    let Value::Object(meta_obj) = meta else { return };
    let profile = meta_obj
        .entry("profile".to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if let Value::Array(arr) = profile {
        let already_present = arr.iter().any(|v| v.as_str() == Some(profile_url));
        if !already_present {
            arr.push(Value::String(profile_url.to_string()));
        }
    }
}

/// §4.5 "Mandatory children validation" + §7 "Deferral".
pub(crate) fn validate_mandatory(
    node: &FlashNode,
    ctx: &EvalContext,
    result: &Map<String, Value>,
    virtual_errors: &HashMap<String, FlashError>,
    env: &mut Environment,
) -> Result<()> {
    let deferred = node.is_flash_rule
        && !node.is_virtual_rule
        && ctx
            .ed
            .as_ref()
            .map(|e| e.max == Cardinality::Single && !e.is_array)
            .unwrap_or(false);
    if deferred {
        return Ok(());
    }

    for child in &ctx.children {
        if child.min == 0 {
            continue;
        }
        let names = candidate_output_names(child);
        if names.is_empty() {
            continue;
        }
        let present_value = names.iter().find_map(|n| result.get(n));
        let satisfied = match present_value {
            Some(Value::Array(arr)) => arr.len() as u32 >= child.min,
            Some(_) => true,
            None => false,
        };
        if satisfied {
            continue;
        }

        let grouping_key = child
            .grouping_key()
            .unwrap_or_else(|_| child.flash_path_ref_key.clone());
        let err = match virtual_errors.get(&grouping_key) {
            Some(virtual_err) => virtual_err.clone(),
            None => FlashError::mandatory_missing(&child.flash_path_ref_key, &ctx.element_path),
        };
        if env.config().enforce_mandatory {
            return Err(err);
        }
        env.push_slice_error(err);
    }

    Ok(())
}

/// §7 slice-error filtering, resolved per the open question in spec.md §9
/// as a purely structural check: an error survives only if the path it
/// names is genuinely absent from the final result.
pub(crate) fn filter_slice_errors(node: &FlashNode, result: &Map<String, Value>, env: &mut Environment) {
    if !node.is_flash_block {
        return;
    }
    for err in env.take_collected_slice_errors() {
        let path_present = err
            .fhir_element
            .as_deref()
            .map(|el| path_present(el, result))
            .unwrap_or(false);
        if !path_present {
            env.push_slice_error(err);
        }
    }
}

fn path_present(element_path: &str, result: &Map<String, Value>) -> bool {
    let leaf = element_path.rsplit('.').next().unwrap_or(element_path);
    result.contains_key(leaf) || result.contains_key(&format!("_{leaf}"))
}

/// §4.5 "Key reordering". `resourceType`/`id`/`meta`/`_id` first, then
/// children in ED order (each followed by its `_name` sibling), unknown
/// keys last. A pure function of `(result, ctx)`, so re-applying it to an
/// already-ordered result is a no-op (§8 invariant 7).
pub(crate) fn reorder_keys(mut remaining: Map<String, Value>, ctx: &EvalContext) -> Map<String, Value> {
    let mut ordered = Map::new();

    for leading in ["resourceType", "id", "meta", "_id"] {
        if let Some(v) = remaining.remove(leading) {
            ordered.insert(leading.to_string(), v);
        }
    }

    for child in &ctx.children {
        for name in candidate_output_names(child) {
            if let Some(v) = remaining.remove(&name) {
                ordered.insert(name.clone(), v);
            }
            let ext_name = format!("_{name}");
            if let Some(v) = remaining.remove(&ext_name) {
                ordered.insert(ext_name, v);
            }
        }
    }

    for (k, v) in remaining {
        ordered.insert(k, v);
    }
    ordered
}

/// Validates `validateResourceInput` (§4.5 "Result skeleton"): the value
/// must be a non-null object carrying a non-empty string `resourceType`.
pub(crate) fn validate_resource_input(value: &Value) -> Result<Map<String, Value>> {
    let Value::Object(obj) = value else {
        return Err(FlashError::resource_input_not_object(value));
    };
    match obj.get("resourceType") {
        Some(Value::String(s)) if !s.is_empty() => Ok(obj.clone()),
        _ => Err(FlashError::resource_input_missing_resource_type(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::{Cardinality as Card, ElementKind};

    fn child(path: &str, min: u32, max: &str, slice: Option<&str>, name: &str, kind: ElementKind) -> ElementDef {
        ElementDef {
            flash_path_ref_key: path.to_string(),
            min,
            max: Card::parse(max),
            slice_name: slice.map(str::to_string),
            base_path: path.to_string(),
            kind,
            types: vec![],
            fixed_value: None,
            regex: None,
            names: vec![name.to_string()],
            from_definition: None,
            is_array: false,
        }
    }

    fn ctx_with(children: Vec<ElementDef>) -> EvalContext {
        EvalContext {
            kind: ElementKind::Resource,
            children,
            resource_type: None,
            profile_url: None,
            ed: None,
            element_path: "Observation".to_string(),
        }
    }

    #[test]
    fn flatten_slices_merges_in_declaration_order() {
        let mut result = Map::new();
        result.insert("coding:loinc".to_string(), serde_json::json!({"system": "loinc"}));
        result.insert("coding:snomed".to_string(), serde_json::json!({"system": "snomed"}));
        let ctx = ctx_with(vec![
            child("Observation.code.coding", 0, "*", Some("loinc"), "coding", ElementKind::ComplexType),
            child("Observation.code.coding", 0, "*", Some("snomed"), "coding", ElementKind::ComplexType),
        ]);
        flatten_slices(&mut result, &ctx);
        assert!(!result.contains_key("coding:loinc"));
        assert_eq!(
            result["coding"],
            serde_json::json!([{"system": "loinc"}, {"system": "snomed"}])
        );
    }

    #[test]
    fn meta_profile_injected_once() {
        let mut result = Map::new();
        inject_meta_profile(&mut result, "http://example.com/sd");
        inject_meta_profile(&mut result, "http://example.com/sd");
        assert_eq!(
            result["meta"]["profile"],
            serde_json::json!(["http://example.com/sd"])
        );
    }

    #[test]
    fn reorder_is_idempotent() {
        let ctx = ctx_with(vec![child("Observation.status", 1, "1", None, "status", ElementKind::System)]);
        let mut result = Map::new();
        result.insert("status".to_string(), serde_json::json!("final"));
        result.insert("resourceType".to_string(), serde_json::json!("Observation"));
        let once = reorder_keys(result, &ctx);
        let twice = reorder_keys(once.clone(), &ctx);
        assert_eq!(once, twice);
    }
}
