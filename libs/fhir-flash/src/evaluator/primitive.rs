//! Primitive normalization (spec.md §4.4): regex, numeric coercion, date
//! truncation, and the FHIR primitive-extension wrap/unwrap.

use crate::definitions::ElementDef;
use crate::env::Environment;
use crate::error::{FlashError, Result};
use crate::value::is_retained_inline_value;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

/// Normalizes one leaf value against `ed`'s `fhirTypeCode`. Arrays are
/// mapped element-wise; a falsy-but-not-`false`/`0` scalar normalizes to
/// `Value::Null`, standing in for `undefined`.
pub(crate) fn normalize(ed: &ElementDef, raw: &Value, env: &Environment) -> Result<Value> {
    if let Value::Array(items) = raw {
        let mapped = items
            .iter()
            .map(|item| normalize_scalar(ed, item, env))
            .collect::<Result<Vec<_>>>()?;
        return Ok(Value::Array(mapped));
    }
    normalize_scalar(ed, raw, env)
}

fn normalize_scalar(ed: &ElementDef, raw: &Value, env: &Environment) -> Result<Value> {
    if !is_retained_inline_value(raw) {
        return Ok(Value::Null);
    }
    if matches!(raw, Value::Array(_) | Value::Object(_)) {
        return Err(FlashError::inline_not_scalar(&ed.flash_path_ref_key, raw));
    }

    let code = ed
        .primitive_type_code()
        .ok_or_else(|| FlashError::missing_fhir_type_code(&ed.flash_path_ref_key))?;

    let coerced = match code {
        "boolean" => Value::Bool(truthy(raw)),
        "date" => Value::String(truncate_date(&scalar_to_string(raw))),
        "decimal" | "integer" | "positiveInt" | "integer64" | "unsignedInt" => {
            numeric_coerce(ed, raw)?
        }
        _ => Value::String(scalar_to_string(raw)),
    };

    if let Some(pattern) = &ed.regex {
        let matches = env
            .compile_regex(pattern)
            .map(|re| re.is_match(&scalar_to_string(&coerced)))
            .unwrap_or(false);
        if !matches {
            return Err(FlashError::regex_mismatch(
                &ed.flash_path_ref_key,
                &coerced,
                pattern,
            ));
        }
    }

    Ok(coerced)
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

fn truncate_date(s: &str) -> String {
    s.chars().take(10).collect()
}

/// Parses through [`Decimal`] rather than straight to `f64` so a
/// non-numeric string is rejected before precision is ever lost, the way
/// `fhirpath`'s `toDecimal()` does it.
fn numeric_coerce(ed: &ElementDef, v: &Value) -> Result<Value> {
    match v {
        Value::Number(_) => Ok(v.clone()),
        Value::Bool(b) => Ok(Value::from(if *b { 1 } else { 0 })),
        Value::String(s) => {
            let decimal = Decimal::from_str(s.trim())
                .map_err(|_| FlashError::inline_not_scalar(&ed.flash_path_ref_key, v))?;
            Ok(decimal
                .to_f64()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null))
        }
        _ => Ok(Value::Null),
    }
}

fn scalar_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvaluatorConfig;
    use crate::definitions::{Cardinality, ElementDefinitionType, ElementKind, StaticDefinitions};
    use std::sync::Arc;

    fn env() -> Environment {
        Environment::new(Arc::new(StaticDefinitions::new()), EvaluatorConfig::default())
    }

    fn ed_with_code(code: &str, regex: Option<&str>) -> ElementDef {
        ElementDef {
            flash_path_ref_key: "Patient.birthDate".to_string(),
            min: 0,
            max: Cardinality::Single,
            slice_name: None,
            base_path: "Patient.birthDate".to_string(),
            kind: ElementKind::PrimitiveType,
            types: vec![ElementDefinitionType {
                code: code.to_string(),
                kind: ElementKind::System,
            }],
            fixed_value: None,
            regex: regex.map(str::to_string),
            names: vec!["birthDate".to_string()],
            from_definition: None,
            is_array: false,
        }
    }

    #[test]
    fn truncates_date_to_ten_chars() {
        let ed = ed_with_code("date", None);
        let out = normalize(&ed, &Value::String("2024-03-15T10:00:00Z".to_string()), &env()).unwrap();
        assert_eq!(out, Value::String("2024-03-15".to_string()));
    }

    #[test]
    fn regex_mismatch_raises_f3001() {
        let ed = ed_with_code("date", Some(r"^\d{4}-\d{2}-\d{2}"));
        let err = normalize(&ed, &Value::String("not-a-date".to_string()), &env()).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::F3001);
    }

    #[test]
    fn numeric_coerce_parses_string() {
        let ed = ed_with_code("decimal", None);
        let out = normalize(&ed, &Value::String("1.50".to_string()), &env()).unwrap();
        assert_eq!(out, serde_json::json!(1.5));
    }

    #[test]
    fn boolean_preserves_explicit_false() {
        let ed = ed_with_code("boolean", None);
        let out = normalize(&ed, &Value::Bool(false), &env()).unwrap();
        assert_eq!(out, Value::Bool(false));
    }
}
