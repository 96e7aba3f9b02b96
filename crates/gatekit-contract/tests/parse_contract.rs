use gatekit_contract::{parse_contract, ContractError, Operator};
use serde_json::json;

#[test]
fn parses_minimal_contract() {
    let schema = json!({
        "fields": [
            {"id": "email", "type": "email"},
            {"fieldId": "name", "field_type": "text", "validation": {"required": true}},
        ]
    });

    let contract = parse_contract(&schema).expect("should parse");
    assert_eq!(contract.fields.len(), 2);
    assert!(contract.field("name").unwrap().required);
    assert!(contract.field("email").unwrap().default_visible);
}

#[test]
fn rejects_duplicate_ids() {
    let schema = json!({
        "fields": [
            {"id": "email", "type": "email"},
            {"id": "email", "type": "text"},
        ]
    });

    let err = parse_contract(&schema).unwrap_err();
    match err {
        ContractError::UnsupportedFormSchema(issues) => {
            assert!(issues.iter().any(|i| i.contains("duplicate")));
        }
    }
}

#[test]
fn rejects_unsupported_type() {
    let schema = json!({"fields": [{"id": "a", "type": "color"}]});
    assert!(parse_contract(&schema).is_err());
}

#[test]
fn radio_requires_options() {
    let schema = json!({"fields": [{"id": "a", "type": "radio"}]});
    let err = parse_contract(&schema).unwrap_err();
    match err {
        ContractError::UnsupportedFormSchema(issues) => {
            assert!(issues.iter().any(|i| i.contains("requires a non-empty options")));
        }
    }
}

#[test]
fn hidden_sets_default_visible_false() {
    let schema = json!({"fields": [{"id": "a", "type": "text", "hidden": true}]});
    let contract = parse_contract(&schema).unwrap();
    assert!(!contract.field("a").unwrap().default_visible);
}

#[test]
fn collects_fields_from_steps() {
    let schema = json!({
        "steps": [
            {"fields": [{"id": "a", "type": "text"}]},
            {"fields": [{"id": "b", "type": "number"}]},
        ]
    });
    let contract = parse_contract(&schema).unwrap();
    assert_eq!(contract.fields.len(), 2);
}

#[test]
fn parses_logic_rule_with_array_condition_and_show_action() {
    let schema = json!({
        "fields": [
            {"id": "has_company", "type": "checkbox"},
            {"id": "company_name", "type": "text", "hidden": true},
        ],
        "logic": [
            {
                "if": [{"id": "has_company", "operator": "eq", "value": true}],
                "then": {"action": "show", "id": "company_name"}
            }
        ]
    });
    let contract = parse_contract(&schema).unwrap();
    assert_eq!(contract.rules.len(), 1);
    let rule = &contract.rules[0];
    assert!(rule.action.show);
    assert_eq!(rule.action.target_field_id, "company_name");
    match &rule.condition {
        gatekit_contract::ConditionGroup::All(conds) => {
            assert_eq!(conds.len(), 1);
            assert_eq!(conds[0].operator, Operator::Eq);
        }
        _ => panic!("expected All"),
    }
}

#[test]
fn skips_disabled_rules() {
    let schema = json!({
        "fields": [{"id": "a", "type": "text"}],
        "logic": [
            {
                "enabled": false,
                "if": [{"id": "a", "operator": "exists"}],
                "then": {"action": "hide", "id": "a"}
            }
        ]
    });
    let contract = parse_contract(&schema).unwrap();
    assert!(contract.rules.is_empty());
}

#[test]
fn rejects_action_targeting_unknown_field() {
    let schema = json!({
        "fields": [{"id": "a", "type": "text"}],
        "logic": [
            {
                "if": [{"id": "a", "operator": "exists"}],
                "then": {"action": "hide", "id": "ghost"}
            }
        ]
    });
    assert!(parse_contract(&schema).is_err());
}
