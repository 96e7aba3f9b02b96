//! Field validator.
//!
//! Validates each currently-visible field's submitted value against its
//! declared type and validation keys. Produces the full list of failures in
//! one pass rather than stopping at the first — callers render all of them
//! in the `FIELD_VALIDATION_FAILED` envelope.

use chrono::DateTime;
use gatekit_contract::{canonical_primitive_key, FieldType, NormalizedContract};
use gatekit_logic::Visibility;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

#[derive(Debug, Clone)]
pub struct FieldIssue {
    pub field_id: String,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("field validation failed")]
    FieldValidationFailed(Vec<FieldIssue>),
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("static email regex"))
}

fn date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("static date regex"))
}

fn time_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{2}:\d{2}(:\d{2})?$").expect("static time regex"))
}

/// Validate every visible field's submitted value.
///
/// `data` should already be sanitized (unknown/hidden keys removed) by
/// [`gatekit_logic::sanitize_submission`].
pub fn validate_submission(
    contract: &NormalizedContract,
    visibility: &Visibility,
    data: &Map<String, Value>,
) -> Result<(), ValidationError> {
    let mut issues = Vec::new();

    for field in &contract.fields {
        if !visibility.get(&field.id).copied().unwrap_or(false) {
            continue;
        }

        let value = data.get(&field.id);
        if value.is_none() || matches!(value, Some(Value::Null)) {
            if field.required {
                issues.push(FieldIssue {
                    field_id: field.id.clone(),
                    message: "Required field is missing".to_string(),
                });
            }
            continue;
        }
        let value = value.unwrap();

        if let Some(message) = validate_field_value(field, value) {
            issues.push(FieldIssue {
                field_id: field.id.clone(),
                message,
            });
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::FieldValidationFailed(issues))
    }
}

fn validate_field_value(
    field: &gatekit_contract::NormalizedField,
    value: &Value,
) -> Option<String> {
    use FieldType::*;

    match field.field_type {
        Text | Textarea | Tel | Date | Datetime | Time | Email | Url => {
            let s = match value.as_str() {
                Some(s) => s,
                None => return Some("Must be a string".to_string()),
            };
            if let Some(msg) = validate_string_format(field.field_type, s) {
                return Some(msg);
            }
            if let Some(min_len) = field.min_length {
                if (s.chars().count() as f64) < min_len {
                    return Some(format!("Must be at least {min_len} characters"));
                }
            }
            if let Some(max_len) = field.max_length {
                if (s.chars().count() as f64) > max_len {
                    return Some(format!("Must be at most {max_len} characters"));
                }
            }
            if let Some(re) = &field.pattern {
                if !re.is_match(s) {
                    return Some("Does not match the required pattern".to_string());
                }
            }
            None
        }
        Number | Rating => {
            let n = match value.as_f64().filter(|n| n.is_finite()) {
                Some(n) => n,
                None => return Some("Must be a finite number".to_string()),
            };
            if field.field_type == Rating && n.fract() != 0.0 {
                return Some("Must be an integer".to_string());
            }
            if let Some(min) = field.min {
                if n < min {
                    return Some(format!("Must be at least {min}"));
                }
            }
            if let Some(max) = field.max {
                if n > max {
                    return Some(format!("Must be at most {max}"));
                }
            }
            None
        }
        Checkbox | Boolean => {
            let b = match value.as_bool() {
                Some(b) => b,
                None => return Some("Must be a boolean".to_string()),
            };
            if field.field_type == Checkbox && field.required && !b {
                return Some("Required field is missing".to_string());
            }
            None
        }
        Radio | Select => {
            if !is_primitive(value) {
                return Some("Must be one of the allowed options".to_string());
            }
            let key = canonical_primitive_key(value);
            if field
                .options
                .iter()
                .any(|o| o.canonical_key() == key)
            {
                None
            } else {
                Some("Must be one of the allowed options".to_string())
            }
        }
        Multiselect => {
            let arr = match value.as_array() {
                Some(arr) => arr,
                None => return Some("Must be an array of allowed options".to_string()),
            };
            if !arr.iter().all(is_primitive) {
                return Some("Must be an array of allowed options".to_string());
            }
            let all_valid = arr.iter().all(|v| {
                let key = canonical_primitive_key(v);
                field.options.iter().any(|o| o.canonical_key() == key)
            });
            if !all_valid {
                return Some("Must be an array of allowed options".to_string());
            }
            let count = arr.len() as f64;
            if let Some(min) = field.min {
                if count < min {
                    return Some(format!("Must select at least {min} options"));
                }
            }
            if let Some(max) = field.max {
                if count > max {
                    return Some(format!("Must select at most {max} options"));
                }
            }
            None
        }
    }
}

/// Returns `None` if the value isn't even a string (so the caller falls back
/// to a generic "must be a string" message from the `?` in the caller).
fn validate_string_format(field_type: FieldType, s: &str) -> Option<String> {
    use FieldType::*;
    match field_type {
        Email if !email_regex().is_match(s) => Some("Must be a valid email address".to_string()),
        Url if url::Url::parse(s).is_err() => Some("Must be a valid URL".to_string()),
        Date if !date_regex().is_match(s) => Some("Must be a date in YYYY-MM-DD format".to_string()),
        Datetime if DateTime::parse_from_rfc3339(s).is_err() => {
            Some("Must be an ISO-8601 datetime with an offset".to_string())
        }
        Time if !time_regex().is_match(s) => Some("Must be a time in HH:mm or HH:mm:ss format".to_string()),
        _ => None,
    }
}

fn is_primitive(v: &Value) -> bool {
    matches!(v, Value::String(_) | Value::Number(_) | Value::Bool(_))
}
