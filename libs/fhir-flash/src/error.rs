//! Error types for the FLASH evaluator (spec.md §7).

use serde_json::Value;
use thiserror::Error;

/// One of the codes listed in spec.md §7, plus `RecursionLimitExceeded`,
/// an ambient safety bound this crate adds (§10.3) that has no code of
/// its own in the source specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    F3000,
    F3001,
    F3002,
    F3003,
    F3004,
    F3005,
    F3006,
    F3007,
    F3008,
    F3010,
    F3011,
    RecursionLimitExceeded,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::F3000 => "F3000",
            Self::F3001 => "F3001",
            Self::F3002 => "F3002",
            Self::F3003 => "F3003",
            Self::F3004 => "F3004",
            Self::F3005 => "F3005",
            Self::F3006 => "F3006",
            Self::F3007 => "F3007",
            Self::F3008 => "F3008",
            Self::F3010 => "F3010",
            Self::F3011 => "F3011",
            Self::RecursionLimitExceeded => "FLASH_RECURSION_LIMIT",
        };
        write!(f, "{s}")
    }
}

/// The "Error object shape" from spec.md §6. `stack` is replaced by
/// `path_stack`, a chain of FHIR element paths visited on the way down to
/// where the error was raised — the idiomatic Rust analogue of a JS call
/// stack trace, and more directly useful to a caller than frame addresses.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct FlashError {
    pub code: ErrorCode,
    pub message: String,
    pub position: Option<usize>,
    pub start: Option<usize>,
    pub line: Option<usize>,
    pub path_stack: Vec<String>,
    pub instance_of: Option<String>,
    pub fhir_element: Option<String>,
    pub fhir_parent: Option<String>,
    pub value: Option<Value>,
    pub value_type: Option<String>,
    pub regex: Option<String>,
    pub fhir_type: Option<String>,
}

pub type Result<T> = std::result::Result<T, FlashError>;

impl FlashError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            position: None,
            start: None,
            line: None,
            path_stack: Vec::new(),
            instance_of: None,
            fhir_element: None,
            fhir_parent: None,
            value: None,
            value_type: None,
            regex: None,
            fhir_type: None,
        }
    }

    pub fn with_node(mut self, node: &crate::ast::FlashNode) -> Self {
        self.position = Some(node.position);
        self.start = Some(node.start);
        self.line = Some(node.line);
        self.instance_of = node.instanceof.clone();
        if self.fhir_element.is_none() {
            self.fhir_element = node.flash_path_ref_key.clone();
        }
        self
    }

    pub fn with_element(mut self, fhir_element: impl Into<String>) -> Self {
        self.fhir_element = Some(fhir_element.into());
        self
    }

    pub fn with_parent(mut self, fhir_parent: impl Into<String>) -> Self {
        self.fhir_parent = Some(fhir_parent.into());
        self
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value_type = Some(json_type_name(&value));
        self.value = Some(value);
        self
    }

    pub fn with_regex(mut self, regex: impl Into<String>) -> Self {
        self.regex = Some(regex.into());
        self
    }

    pub fn with_fhir_type(mut self, fhir_type: impl Into<String>) -> Self {
        self.fhir_type = Some(fhir_type.into());
        self
    }

    pub fn push_path(mut self, path: impl Into<String>) -> Self {
        self.path_stack.push(path.into());
        self
    }

    pub fn missing_flash_path_ref_key(node: &crate::ast::FlashNode) -> Self {
        Self::new(ErrorCode::F3000, "flash rule is missing flashPathRefKey").with_node(node)
    }

    pub fn regex_mismatch(fhir_element: &str, value: &Value, regex: &str) -> Self {
        Self::new(
            ErrorCode::F3001,
            format!("value does not match element regex: {regex}"),
        )
        .with_element(fhir_element.to_string())
        .with_value(value.clone())
        .with_regex(regex.to_string())
    }

    pub fn mandatory_missing(fhir_element: &str, fhir_parent: &str) -> Self {
        Self::new(
            ErrorCode::F3002,
            format!("mandatory element '{fhir_element}' is missing"),
        )
        .with_element(fhir_element.to_string())
        .with_parent(fhir_parent.to_string())
    }

    pub fn element_definition_not_found(flash_path_ref_key: &str) -> Self {
        Self::new(
            ErrorCode::F3003,
            format!("no ElementDefinition found for '{flash_path_ref_key}'"),
        )
        .with_element(flash_path_ref_key.to_string())
    }

    /// A flash block's `instanceof` has no resolvable TypeMeta. The error
    /// table only names F3003 for `flashPathRefKey` lookups, but the same
    /// failure mode applies one level up, against `typeMeta` instead of
    /// `elementDefinitions`.
    pub fn type_meta_not_found(instanceof: &str) -> Self {
        Self::new(
            ErrorCode::F3003,
            format!("no TypeMeta found for '{instanceof}'"),
        )
        .with_fhir_type(instanceof.to_string())
    }

    pub fn missing_instanceof(node: &crate::ast::FlashNode) -> Self {
        Self::new(ErrorCode::F3003, "flash block is missing instanceof").with_node(node)
    }

    pub fn element_definition_no_kind(fhir_element: &str) -> Self {
        Self::new(
            ErrorCode::F3004,
            format!("ElementDefinition for '{fhir_element}' has no kind"),
        )
        .with_element(fhir_element.to_string())
    }

    pub fn element_definition_bad_names(fhir_element: &str) -> Self {
        Self::new(
            ErrorCode::F3005,
            format!("ElementDefinition for '{fhir_element}' has no single name"),
        )
        .with_element(fhir_element.to_string())
    }

    pub fn inline_not_scalar(fhir_element: &str, value: &Value) -> Self {
        Self::new(
            ErrorCode::F3006,
            format!("inline value for '{fhir_element}' is not a scalar primitive"),
        )
        .with_element(fhir_element.to_string())
        .with_value(value.clone())
    }

    pub fn missing_fhir_type_code(fhir_element: &str) -> Self {
        Self::new(
            ErrorCode::F3007,
            format!("ElementDefinition for '{fhir_element}' has no resolvable primitive type"),
        )
        .with_element(fhir_element.to_string())
    }

    pub fn forbidden_element(fhir_element: &str) -> Self {
        Self::new(
            ErrorCode::F3008,
            format!("'{fhir_element}' is forbidden (max = \"0\") in this context"),
        )
        .with_element(fhir_element.to_string())
    }

    pub fn resource_input_not_object(value: &Value) -> Self {
        Self::new(ErrorCode::F3010, "resource-kind input is not an object").with_value(value.clone())
    }

    pub fn resource_input_missing_resource_type(value: &Value) -> Self {
        Self::new(
            ErrorCode::F3011,
            "resource-kind input is missing a non-empty resourceType",
        )
        .with_value(value.clone())
    }

    pub fn recursion_limit_exceeded(max_depth: usize) -> Self {
        Self::new(
            ErrorCode::RecursionLimitExceeded,
            format!("virtual-rule recursion exceeded the configured depth of {max_depth}"),
        )
    }
}

fn json_type_name(value: &Value) -> String {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mandatory_missing_carries_element_and_parent() {
        let err = FlashError::mandatory_missing("Observation.status", "Observation");
        assert_eq!(err.code, ErrorCode::F3002);
        assert_eq!(err.fhir_element.as_deref(), Some("Observation.status"));
        assert_eq!(err.fhir_parent.as_deref(), Some("Observation"));
    }

    #[test]
    fn regex_mismatch_carries_value_type() {
        let err = FlashError::regex_mismatch(
            "Patient.birthDate",
            &Value::String("not-a-date".to_string()),
            r"^\d{4}-\d{2}-\d{2}",
        );
        assert_eq!(err.code, ErrorCode::F3001);
        assert_eq!(err.value_type.as_deref(), Some("string"));
    }
}
