//! The external AST node shape the FLASH evaluator consumes.
//!
//! These nodes are supplied pre-parsed and pre-annotated by the mapping
//! language's parser (out of scope for this crate, see `spec.md` §1/§6).
//! `FlashNode` only models the attributes the evaluator itself reads.

use serde_json::Value;

/// A single AST node: either a flash block (`InstanceOf: ...`), a flash
/// rule (a single element assignment), or a virtual rule synthesized by
/// the evaluator itself to satisfy a mandatory child (§4.3).
#[derive(Debug, Clone)]
pub struct FlashNode {
    /// Parser-assigned node type tag, passed through untouched.
    pub node_type: String,
    /// Literal value carried by the node, when applicable (e.g. a bind's
    /// right-hand side before the host evaluator runs on it).
    pub value: Option<Value>,
    pub position: usize,
    pub start: usize,
    pub line: usize,

    /// FHIR type id this node targets, for flash blocks.
    pub instanceof: Option<String>,
    /// Element path id this node targets, required for flash rules.
    pub flash_path_ref_key: Option<String>,

    pub is_flash_block: bool,
    pub is_flash_rule: bool,
    pub is_virtual_rule: bool,
    /// Tags this node's expression as the inline right-hand-side value
    /// rather than a nested rule or bind (§4.2).
    pub is_inline_expression: bool,
    /// Tags this node as a variable binding; the host evaluator mutates
    /// the environment itself and the result is discarded (§4.2).
    pub is_bind: bool,

    /// Child expressions evaluated in order (§4.2, §5).
    pub expressions: Vec<FlashNode>,
}

impl FlashNode {
    /// Synthesize the virtual rule invoked to populate a mandatory child
    /// that had no explicit inline value or sub-expression result (§4.3).
    pub fn virtual_rule(parent: &FlashNode, flash_path_ref_key: impl Into<String>) -> FlashNode {
        FlashNode {
            node_type: "virtual-rule".to_string(),
            value: None,
            position: parent.position,
            start: parent.start,
            line: parent.line,
            instanceof: parent.instanceof.clone(),
            flash_path_ref_key: Some(flash_path_ref_key.into()),
            is_flash_block: false,
            is_flash_rule: true,
            is_virtual_rule: true,
            is_inline_expression: false,
            is_bind: false,
            expressions: Vec::new(),
        }
    }
}
