use gatekit_contract::parse_contract;
use gatekit_logic::compute_visibility;
use gatekit_validate::{validate_submission, ValidationError};
use serde_json::json;

fn data_map(v: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    v.as_object().unwrap().clone()
}

#[test]
fn valid_submission_passes() {
    let schema = json!({
        "fields": [
            {"id": "email", "type": "email", "validation": {"required": true}},
            {"id": "age", "type": "number", "validation": {"min": 18, "max": 99}},
        ]
    });
    let contract = parse_contract(&schema).unwrap();
    let data = data_map(json!({"email": "a@b.com", "age": 30}));
    let visibility = compute_visibility(&contract, &data);
    assert!(validate_submission(&contract, &visibility, &data).is_ok());
}

#[test]
fn missing_required_field_fails() {
    let schema = json!({"fields": [{"id": "email", "type": "email", "validation": {"required": true}}]});
    let contract = parse_contract(&schema).unwrap();
    let data = data_map(json!({}));
    let visibility = compute_visibility(&contract, &data);
    let err = validate_submission(&contract, &visibility, &data).unwrap_err();
    match err {
        ValidationError::FieldValidationFailed(issues) => {
            assert_eq!(issues.len(), 1);
            assert_eq!(issues[0].message, "Required field is missing");
        }
    }
}

#[test]
fn invalid_email_format_fails() {
    let schema = json!({"fields": [{"id": "email", "type": "email"}]});
    let contract = parse_contract(&schema).unwrap();
    let data = data_map(json!({"email": "not-an-email"}));
    let visibility = compute_visibility(&contract, &data);
    assert!(validate_submission(&contract, &visibility, &data).is_err());
}

#[test]
fn out_of_range_number_fails() {
    let schema = json!({"fields": [{"id": "age", "type": "number", "validation": {"min": 18}}]});
    let contract = parse_contract(&schema).unwrap();
    let data = data_map(json!({"age": 5}));
    let visibility = compute_visibility(&contract, &data);
    assert!(validate_submission(&contract, &visibility, &data).is_err());
}

#[test]
fn multiselect_rejects_value_not_in_options() {
    let schema = json!({"fields": [{"id": "tags", "type": "multiselect", "options": ["a", "b"]}]});
    let contract = parse_contract(&schema).unwrap();
    let data = data_map(json!({"tags": ["a", "ghost"]}));
    let visibility = compute_visibility(&contract, &data);
    assert!(validate_submission(&contract, &visibility, &data).is_err());
}

#[test]
fn hidden_field_is_not_validated() {
    let schema = json!({
        "fields": [{"id": "secret", "type": "email", "hidden": true, "validation": {"required": true}}]
    });
    let contract = parse_contract(&schema).unwrap();
    let data = data_map(json!({}));
    let visibility = compute_visibility(&contract, &data);
    assert!(validate_submission(&contract, &visibility, &data).is_ok());
}
