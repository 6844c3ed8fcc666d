//! Per-field validation and conversion.
//!
//! [`validate`] turns one raw cell into a typed JSON value following the
//! field's [`Validation`](crate::models::Validation) rules:
//!
//! 1. blank or `null` (any case) → null
//! 2. conversion rule lookup on the (possibly empty) text
//! 3. default value when still null
//! 4. required check
//! 5. type coercion (`String`, `Int`, `Long`, `Double`, `Bool`)
//! 6. min/max check (length for strings, value for numbers)
//!
//! Nothing here fails. Violations are logged as errors when the field has
//! `ValidationsNeedToPass`, as warnings otherwise, and a best-effort value
//! is still returned.
//!
//! # Example
//!
//! ```
//! use csvnest::logs::RunLog;
//! use csvnest::models::{FieldMapping, FieldType, Validation};
//! use csvnest::validation::validate;
//!
//! let field = FieldMapping::new("orders.csv", "Amount", "amount")
//!     .with_validation(Validation::of_type(FieldType::Int).with_range(Some(1.0), None));
//! let mut log = RunLog::new();
//!
//! assert_eq!(validate(Some("42"), &field, &mut log), serde_json::json!(42));
//! assert_eq!(validate(Some(" NULL "), &field, &mut log), serde_json::Value::Null);
//! assert_eq!(log.warning_count(), 0);
//! ```

use serde_json::{Number, Value};

use crate::logs::RunLog;
use crate::models::{FieldMapping, FieldType};

/// Validate and convert one raw value for `field`.
pub fn validate(raw: Option<&str>, field: &FieldMapping, log: &mut RunLog) -> Value {
    let mut text = normalize(raw);

    if let Some(rules) = &field.conversion_rules {
        if let Some(converted) = rules.get(text.as_deref().unwrap_or("")) {
            text = value_text(converted);
        }
    }

    let text = match text {
        Some(text) => Some(text),
        None => field.validation.default_value.as_ref().and_then(value_text),
    };

    if field.validation.required && text.is_none() {
        log.violation(
            field.validation.strict,
            format!("{}: Missing Required Field", field.label()),
            format!(
                "The CSV field '{}' in the file '{}' is missing a value. \
                 This may lead to incorrect or unexpected values in the target field '{}'.",
                field.csv_field.as_deref().unwrap_or(""),
                field.csv_file.as_deref().unwrap_or(""),
                json_name(field),
            ),
        );
    }

    let Some(text) = text else {
        return Value::Null;
    };

    match field.validation.field_type {
        FieldType::String => {
            check_range(text.chars().count() as f64, field, log);
            Value::String(text)
        }
        FieldType::Int => match text.trim().parse::<i32>() {
            Ok(n) => {
                check_range(f64::from(n), field, log);
                Value::from(n)
            }
            Err(_) => {
                type_mismatch(&text, field, log);
                check_range(0.0, field, log);
                Value::from(0)
            }
        },
        FieldType::Long => match text.trim().parse::<i64>() {
            Ok(n) => {
                check_range(n as f64, field, log);
                Value::from(n)
            }
            Err(_) => {
                type_mismatch(&text, field, log);
                check_range(0.0, field, log);
                Value::from(0)
            }
        },
        FieldType::Double => match text.trim().parse::<f64>().ok().and_then(Number::from_f64) {
            Some(n) => {
                check_range(n.as_f64().unwrap_or_default(), field, log);
                Value::Number(n)
            }
            None => {
                type_mismatch(&text, field, log);
                check_range(0.0, field, log);
                Value::from(0.0)
            }
        },
        FieldType::Bool => match text.trim().to_lowercase().as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => {
                bool_mismatch(&text, field, log);
                Value::Bool(false)
            }
        },
    }
}

/// Blank and `null` tokens become `None`.
fn normalize(raw: Option<&str>) -> Option<String> {
    raw.filter(|s| {
        let trimmed = s.trim();
        !trimmed.is_empty() && !trimmed.eq_ignore_ascii_case("null")
    })
    .map(str::to_string)
}

/// Text form of a rule or default value; JSON null stays null.
fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn json_name(field: &FieldMapping) -> &str {
    field.json_field.as_deref().unwrap_or("")
}

/// Runtime type name used in type-mismatch diagnostics.
fn type_name(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::String => "String",
        FieldType::Int => "Int32",
        FieldType::Long => "Int64",
        FieldType::Double => "Double",
        FieldType::Bool => "Boolean",
    }
}

fn type_mismatch(text: &str, field: &FieldMapping, log: &mut RunLog) {
    let expected = type_name(field.validation.field_type);
    log.violation(
        field.validation.strict,
        format!("{}: {} Type Validation", field.label(), expected),
        format!(
            "The CSV field '{}' in the file '{}' is expecting a value of type {}, but it received '{}'. \
             This could lead to unexpected behavior or incorrect values in the target field '{}'.",
            field.csv_field.as_deref().unwrap_or(""),
            field.csv_file.as_deref().unwrap_or(""),
            expected,
            text,
            json_name(field),
        ),
    );
}

fn bool_mismatch(text: &str, field: &FieldMapping, log: &mut RunLog) {
    log.violation(
        field.validation.strict,
        format!("{}: {} Type Validation", field.label(), type_name(FieldType::Bool)),
        format!(
            "The JSON field '{}' is expecting a boolean value, but the received value was '{}'. \
             This may result in unexpected or incorrect behavior in the target field.",
            json_name(field),
            text,
        ),
    );
}

fn check_range(measure: f64, field: &FieldMapping, log: &mut RunLog) {
    let rules = &field.validation;

    if let Some(min) = rules.min.filter(|min| measure < *min) {
        log.violation(
            rules.strict,
            format!("{}: Min Range Validation", field.label()),
            format!(
                "The JSON field '{}' has a minimum value of {}, but the provided value '{}' is smaller than the required minimum.",
                json_name(field),
                min,
                measure,
            ),
        );
    }

    if let Some(max) = rules.max.filter(|max| measure > *max) {
        log.violation(
            rules.strict,
            format!("{}: Max Range Validation", field.label()),
            format!(
                "The JSON field '{}' has a maximum value of {}, but the provided value '{}' exceeds the maximum allowed.",
                json_name(field),
                max,
                measure,
            ),
        );
    }
}
