//! Logic evaluator.
//!
//! Pure function over a [`NormalizedContract`] and a submitted data mapping
//! — no I/O, no clock ambient state (the caller supplies `now` for the
//! datetime comparison fallback), so this is easy to property-test.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use gatekit_contract::{Condition, ConditionGroup, NormalizedContract, Operator};
use serde_json::{Map, Value};

/// Field id → currently visible.
pub type Visibility = HashMap<String, bool>;

/// Compute the visibility mapping for a submission.
///
/// Initializes each field to its `default_visible`, then applies rules in
/// declared order: a rule whose condition group evaluates true overwrites
/// the target field's visibility. Later rules win over earlier ones for the
/// same target — there is no dependency analysis between rules.
pub fn compute_visibility(contract: &NormalizedContract, data: &Map<String, Value>) -> Visibility {
    let mut visibility: Visibility = contract
        .fields
        .iter()
        .map(|f| (f.id.clone(), f.default_visible))
        .collect();

    for rule in &contract.rules {
        if evaluate_group(&rule.condition, data) {
            visibility.insert(rule.action.target_field_id.clone(), rule.action.show);
        }
    }

    visibility
}

/// Result of [`sanitize_submission`]: submitted keys not present in the
/// contract's field registry at all (as opposed to merely hidden).
#[derive(Debug, Clone, Default)]
pub struct SanitizeOutcome {
    pub sanitized: Map<String, Value>,
    pub unknown_fields: Vec<String>,
}

/// Drop submitted keys whose field is not currently visible, and separately
/// report submitted keys that don't correspond to any field in the contract
/// at all (spec §4.4 step 5: these two cases are distinguished — an unknown
/// key is a client error, a hidden key is silently dropped).
pub fn sanitize_submission(
    contract: &NormalizedContract,
    visibility: &Visibility,
    data: &Map<String, Value>,
) -> SanitizeOutcome {
    let mut sanitized = Map::new();
    let mut unknown_fields = Vec::new();

    for (key, value) in data {
        if contract.field(key).is_none() {
            unknown_fields.push(key.clone());
            continue;
        }
        if visibility.get(key).copied().unwrap_or(false) {
            sanitized.insert(key.clone(), value.clone());
        }
    }

    SanitizeOutcome {
        sanitized,
        unknown_fields,
    }
}

fn evaluate_group(group: &ConditionGroup, data: &Map<String, Value>) -> bool {
    match group {
        ConditionGroup::All(conds) => conds.iter().all(|c| evaluate_condition(c, data)),
        ConditionGroup::Any(conds) => conds.iter().any(|c| evaluate_condition(c, data)),
    }
}

fn evaluate_condition(cond: &Condition, data: &Map<String, Value>) -> bool {
    let actual = data.get(&cond.field_id);

    match cond.operator {
        Operator::Exists => value_exists(actual),
        Operator::NotExists => !value_exists(actual),
        Operator::Eq => {
            let expected = cond.value.as_ref().expect("eq condition carries a value");
            actual.map(|a| values_equal(a, expected)).unwrap_or(false)
        }
        Operator::Neq => {
            let expected = cond.value.as_ref().expect("neq condition carries a value");
            !actual.map(|a| values_equal(a, expected)).unwrap_or(false)
        }
        Operator::In => {
            let expected = cond.value.as_ref().and_then(Value::as_array);
            match (actual, expected) {
                (Some(a), Some(arr)) => arr.iter().any(|v| values_equal(a, v)),
                _ => false,
            }
        }
        Operator::NotIn => {
            let expected = cond.value.as_ref().and_then(Value::as_array);
            match (actual, expected) {
                (Some(a), Some(arr)) => !arr.iter().any(|v| values_equal(a, v)),
                _ => true,
            }
        }
        Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
            evaluate_ordered(cond.operator, actual, cond.value.as_ref())
        }
        Operator::Contains => evaluate_contains(actual, cond.value.as_ref()),
        Operator::NotContains => match actual {
            None => true,
            Some(a) if is_empty_actual(a) => true,
            Some(_) => !evaluate_contains(actual, cond.value.as_ref()),
        },
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    a == b
}

fn value_exists(v: Option<&Value>) -> bool {
    match v {
        None => false,
        Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(arr)) => !arr.is_empty(),
        Some(_) => true,
    }
}

fn is_empty_actual(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(arr) => arr.is_empty(),
        _ => false,
    }
}

fn evaluate_ordered(op: Operator, actual: Option<&Value>, expected: Option<&Value>) -> bool {
    let (actual, expected) = match (actual, expected) {
        (Some(a), Some(e)) => (a, e),
        _ => return false,
    };

    if let (Some(a_num), Some(e_num)) = (as_finite_number(actual), as_finite_number(expected)) {
        return compare(op, a_num.partial_cmp(&e_num));
    }

    if let (Some(a_dt), Some(e_dt)) = (as_datetime(actual), as_datetime(expected)) {
        return compare(op, a_dt.partial_cmp(&e_dt));
    }

    false
}

fn compare(op: Operator, ordering: Option<std::cmp::Ordering>) -> bool {
    use std::cmp::Ordering::*;
    match (op, ordering) {
        (Operator::Gt, Some(Greater)) => true,
        (Operator::Gte, Some(Greater | Equal)) => true,
        (Operator::Lt, Some(Less)) => true,
        (Operator::Lte, Some(Less | Equal)) => true,
        _ => false,
    }
}

fn as_finite_number(v: &Value) -> Option<f64> {
    v.as_f64().filter(|n| n.is_finite())
}

fn as_datetime(v: &Value) -> Option<DateTime<Utc>> {
    let s = v.as_str()?;
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
}

fn evaluate_contains(actual: Option<&Value>, expected: Option<&Value>) -> bool {
    let (actual, expected) = match (actual, expected) {
        (Some(a), Some(e)) => (a, e),
        _ => return false,
    };

    match (actual, expected) {
        (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
        (Value::Array(arr), _) => arr.iter().any(|v| values_equal(v, expected)),
        _ => false,
    }
}
