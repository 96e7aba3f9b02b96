use gatekit_contract::parse_contract;
use gatekit_logic::compute_visibility;
use serde_json::json;

#[test]
fn later_rule_overrides_earlier_rule_for_same_target() {
    let schema = json!({
        "fields": [
            {"id": "tier", "type": "select", "options": ["a", "b"]},
            {"id": "discount_code", "type": "text", "hidden": true},
        ],
        "logic": [
            {"if": [{"id": "tier", "operator": "eq", "value": "a"}], "then": {"action": "show", "id": "discount_code"}},
            {"if": [{"id": "tier", "operator": "eq", "value": "b"}], "then": {"action": "hide", "id": "discount_code"}},
        ]
    });
    let contract = parse_contract(&schema).unwrap();

    let data: serde_json::Map<String, serde_json::Value> =
        json!({"tier": "b"}).as_object().unwrap().clone();
    let visibility = compute_visibility(&contract, &data);
    assert_eq!(visibility["discount_code"], false);
}

#[test]
fn gt_falls_back_to_datetime_when_not_numeric() {
    let schema = json!({
        "fields": [
            {"id": "signed_up_at", "type": "datetime"},
            {"id": "loyalty_field", "type": "text", "hidden": true},
        ],
        "logic": [
            {
                "if": [{"id": "signed_up_at", "operator": "gt", "value": "2020-01-01T00:00:00Z"}],
                "then": {"action": "show", "id": "loyalty_field"}
            }
        ]
    });
    let contract = parse_contract(&schema).unwrap();

    let data: serde_json::Map<String, serde_json::Value> =
        json!({"signed_up_at": "2024-06-01T00:00:00Z"}).as_object().unwrap().clone();
    let visibility = compute_visibility(&contract, &data);
    assert_eq!(visibility["loyalty_field"], true);
}

#[test]
fn exists_treats_blank_string_as_absent() {
    let schema = json!({
        "fields": [
            {"id": "nickname", "type": "text"},
            {"id": "greeting", "type": "text", "hidden": true},
        ],
        "logic": [
            {"if": [{"id": "nickname", "operator": "exists"}], "then": {"action": "show", "id": "greeting"}}
        ]
    });
    let contract = parse_contract(&schema).unwrap();

    let data: serde_json::Map<String, serde_json::Value> =
        json!({"nickname": "   "}).as_object().unwrap().clone();
    let visibility = compute_visibility(&contract, &data);
    assert_eq!(visibility["greeting"], false);
}

#[test]
fn any_group_matches_on_first_true_condition() {
    let schema = json!({
        "fields": [
            {"id": "a", "type": "checkbox"},
            {"id": "b", "type": "checkbox"},
            {"id": "c", "type": "text", "hidden": true},
        ],
        "logic": [
            {
                "if": {"any": [
                    {"id": "a", "operator": "eq", "value": true},
                    {"id": "b", "operator": "eq", "value": true}
                ]},
                "then": {"action": "show", "id": "c"}
            }
        ]
    });
    let contract = parse_contract(&schema).unwrap();

    let data: serde_json::Map<String, serde_json::Value> =
        json!({"a": false, "b": true}).as_object().unwrap().clone();
    let visibility = compute_visibility(&contract, &data);
    assert_eq!(visibility["c"], true);
}
