//! Context initialization (spec.md §4.1).

use crate::ast::FlashNode;
use crate::definitions::{Derivation, ElementDef, ElementKind, FhirDefinitions};
use crate::error::{FlashError, Result};
use serde_json::Value;

/// What context initialization produced for one node.
pub(crate) enum ContextOutcome {
    /// The ED carries a fixed value; the node's result is that value
    /// verbatim, with no further projection. Only flash rules short
    /// circuit this way (TypeMeta carries no `fixedValue`), so the
    /// grouping key is always available.
    ShortCircuit(Value, ElementKind, String),
    Proceed(EvalContext),
}

/// The resolved context a node evaluates its children against.
pub(crate) struct EvalContext {
    pub kind: ElementKind,
    pub children: Vec<ElementDef>,
    pub resource_type: Option<String>,
    pub profile_url: Option<String>,
    /// The node's own ED, when it is a flash rule. `None` for flash blocks,
    /// which are rooted in a TypeMeta instead (no regex/fixedValue there).
    pub ed: Option<ElementDef>,
    /// FHIR element path, used as `fhirParent` in mandatory-child errors.
    pub element_path: String,
}

pub(crate) fn init_context(
    node: &FlashNode,
    defs: &dyn FhirDefinitions,
) -> Result<ContextOutcome> {
    if node.is_flash_block {
        init_block_context(node, defs)
    } else {
        init_rule_context(node, defs)
    }
}

fn init_block_context(node: &FlashNode, defs: &dyn FhirDefinitions) -> Result<ContextOutcome> {
    let instanceof = node
        .instanceof
        .as_deref()
        .ok_or_else(|| FlashError::missing_instanceof(node))?;
    let tm = defs
        .type_meta(instanceof)
        .ok_or_else(|| FlashError::type_meta_not_found(instanceof))?;

    let children = defs.type_children(instanceof).map(<[_]>::to_vec).unwrap_or_default();
    let resource_type = (tm.kind == ElementKind::Resource).then(|| tm.type_name.clone());
    let profile_url = (tm.derivation == Derivation::Constraint).then(|| tm.url.clone());

    Ok(ContextOutcome::Proceed(EvalContext {
        kind: tm.kind,
        children,
        resource_type,
        profile_url,
        ed: None,
        element_path: instanceof.to_string(),
    }))
}

fn init_rule_context(node: &FlashNode, defs: &dyn FhirDefinitions) -> Result<ContextOutcome> {
    let key = node
        .flash_path_ref_key
        .as_deref()
        .ok_or_else(|| FlashError::missing_flash_path_ref_key(node))?;
    let ed = defs
        .element_definition(key)
        .ok_or_else(|| FlashError::element_definition_not_found(key))?
        .clone();

    if let crate::definitions::Cardinality::Forbidden = ed.max {
        return Err(FlashError::forbidden_element(key));
    }

    if let Some(fixed) = ed.fixed_value.clone() {
        let grouping_key = ed.grouping_key()?;
        return Ok(ContextOutcome::ShortCircuit(fixed, ed.kind, grouping_key));
    }

    let children = if ed.kind != ElementKind::System {
        defs.element_children(key).map(<[_]>::to_vec).unwrap_or_default()
    } else {
        Vec::new()
    };
    let resource_type = (ed.kind == ElementKind::Resource)
        .then(|| ed.from_definition.clone())
        .flatten();

    Ok(ContextOutcome::Proceed(EvalContext {
        kind: ed.kind,
        children,
        resource_type,
        profile_url: None,
        element_path: key.to_string(),
        ed: Some(ed),
    }))
}
