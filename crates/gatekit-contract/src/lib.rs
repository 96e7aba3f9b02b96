//! Schema contract parser.
//!
//! Turns an arbitrary JSON value claimed to be a published form schema into
//! a [`NormalizedContract`], or a list of human-readable issues. Parsing is
//! hand-rolled against a fixed alias table — no runtime reflection, no
//! schema-description crate — because the input is untrusted and the
//! acceptable shapes are small and fixed.

use std::collections::HashSet;

use regex::Regex;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("unsupported form schema")]
    UnsupportedFormSchema(Vec<String>),
}

const ID_ALIASES: [&str; 5] = ["id", "field_id", "fieldId", "key", "name"];
const TYPE_ALIASES: [&str; 3] = ["type", "field_type", "fieldType"];
const CONDITION_ALIASES: [&str; 3] = ["if", "when", "conditions"];
const ACTION_ALIASES: [&str; 3] = ["then", "action", "actions"];
const SUPPORTED_VALIDATION_KEYS: [&str; 7] = [
    "required",
    "min",
    "max",
    "minLength",
    "maxLength",
    "pattern",
    "options",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Textarea,
    Email,
    Number,
    Tel,
    Url,
    Date,
    Datetime,
    Time,
    Radio,
    Select,
    Multiselect,
    Checkbox,
    Boolean,
    Rating,
}

impl FieldType {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "text" => FieldType::Text,
            "textarea" => FieldType::Textarea,
            "email" => FieldType::Email,
            "number" => FieldType::Number,
            "tel" => FieldType::Tel,
            "url" => FieldType::Url,
            "date" => FieldType::Date,
            "datetime" => FieldType::Datetime,
            "time" => FieldType::Time,
            "radio" => FieldType::Radio,
            "select" => FieldType::Select,
            "multiselect" => FieldType::Multiselect,
            "checkbox" => FieldType::Checkbox,
            "boolean" => FieldType::Boolean,
            "rating" => FieldType::Rating,
            _ => return None,
        })
    }

    fn requires_options(self) -> bool {
        matches!(self, FieldType::Radio | FieldType::Select | FieldType::Multiselect)
    }
}

/// A primitive option value, canonicalized to string form for comparison
/// (spec §4.3's `(type, string(value))` canonicalization).
#[derive(Debug, Clone)]
pub struct OptionValue {
    pub raw: Value,
}

impl OptionValue {
    pub fn canonical_key(&self) -> (&'static str, String) {
        canonical_primitive_key(&self.raw)
    }
}

pub fn canonical_primitive_key(v: &Value) -> (&'static str, String) {
    match v {
        Value::String(s) => ("string", s.clone()),
        Value::Number(n) => ("number", n.to_string()),
        Value::Bool(b) => ("bool", b.to_string()),
        Value::Null => ("null", String::new()),
        other => ("json", other.to_string()),
    }
}

#[derive(Debug, Clone)]
pub struct NormalizedField {
    pub id: String,
    pub field_type: FieldType,
    pub required: bool,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub min_length: Option<f64>,
    pub max_length: Option<f64>,
    pub pattern: Option<Regex>,
    pub options: Vec<OptionValue>,
    pub default_visible: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Contains,
    NotContains,
    Exists,
    NotExists,
}

impl Operator {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "eq" | "=" | "==" => Operator::Eq,
            "neq" | "!=" | "<>" => Operator::Neq,
            "gt" | ">" => Operator::Gt,
            "gte" | ">=" => Operator::Gte,
            "lt" | "<" => Operator::Lt,
            "lte" | "<=" => Operator::Lte,
            "in" => Operator::In,
            "nin" | "not_in" => Operator::NotIn,
            "contains" | "includes" => Operator::Contains,
            "not_contains" | "not_includes" => Operator::NotContains,
            "exists" => Operator::Exists,
            "not_exists" => Operator::NotExists,
            _ => return None,
        })
    }

    fn takes_value(self) -> bool {
        !matches!(self, Operator::Exists | Operator::NotExists)
    }
}

#[derive(Debug, Clone)]
pub struct Condition {
    pub field_id: String,
    pub operator: Operator,
    pub value: Option<Value>,
}

#[derive(Debug, Clone)]
pub enum ConditionGroup {
    All(Vec<Condition>),
    Any(Vec<Condition>),
}

#[derive(Debug, Clone)]
pub struct RuleAction {
    pub show: bool,
    pub target_field_id: String,
}

#[derive(Debug, Clone)]
pub struct NormalizedRule {
    pub condition: ConditionGroup,
    pub action: RuleAction,
}

#[derive(Debug, Clone)]
pub struct NormalizedContract {
    pub fields: Vec<NormalizedField>,
    pub rules: Vec<NormalizedRule>,
}

impl NormalizedContract {
    pub fn field(&self, id: &str) -> Option<&NormalizedField> {
        self.fields.iter().find(|f| f.id == id)
    }
}

/// Parse a published schema JSON value into a [`NormalizedContract`].
///
/// Every fault is fail-closed: the first fault found aborts parsing and is
/// reported as an issue string, consistent with spec rule ordering (schema
/// shape checks before field checks before rule checks).
pub fn parse_contract(schema: &Value) -> Result<NormalizedContract, ContractError> {
    let mut issues = Vec::new();

    let root = match schema.as_object() {
        Some(m) => m,
        None => {
            issues.push("schema root must be an object".to_string());
            return Err(ContractError::UnsupportedFormSchema(issues));
        }
    };

    let mut raw_fields: Vec<&Value> = Vec::new();

    if let Some(fields_val) = root.get("fields") {
        match fields_val.as_array() {
            Some(arr) => raw_fields.extend(arr.iter()),
            None => issues.push("fields must be an array".to_string()),
        }
    }

    if let Some(steps_val) = root.get("steps") {
        match steps_val.as_array() {
            Some(steps) => {
                for step in steps {
                    let step_obj = match step.as_object() {
                        Some(o) => o,
                        None => {
                            issues.push("each step must be an object".to_string());
                            continue;
                        }
                    };
                    if let Some(step_fields) = step_obj.get("fields") {
                        match step_fields.as_array() {
                            Some(arr) => raw_fields.extend(arr.iter()),
                            None => issues.push("step fields must be an array".to_string()),
                        }
                    }
                }
            }
            None => issues.push("steps must be an array".to_string()),
        }
    }

    if !issues.is_empty() {
        return Err(ContractError::UnsupportedFormSchema(issues));
    }

    let mut fields = Vec::new();
    let mut seen_ids = HashSet::new();

    for raw in &raw_fields {
        match parse_field(raw, &mut issues) {
            Some(field) => {
                if !seen_ids.insert(field.id.clone()) {
                    issues.push(format!("duplicate field id: {}", field.id));
                    continue;
                }
                fields.push(field);
            }
            None => continue,
        }
    }

    if !issues.is_empty() {
        return Err(ContractError::UnsupportedFormSchema(issues));
    }

    let registry: HashSet<&str> = fields.iter().map(|f| f.id.as_str()).collect();

    let mut rules = Vec::new();
    if let Some(logic_val) = root.get("logic") {
        match logic_val.as_array() {
            Some(arr) => {
                for rule_val in arr {
                    if let Some(rule) = parse_rule(rule_val, &registry, &mut issues) {
                        rules.push(rule);
                    }
                }
            }
            None => issues.push("logic must be an array".to_string()),
        }
    }

    if !issues.is_empty() {
        return Err(ContractError::UnsupportedFormSchema(issues));
    }

    Ok(NormalizedContract { fields, rules })
}

fn first_alias_str<'a>(obj: &'a serde_json::Map<String, Value>, aliases: &[&str]) -> Option<&'a str> {
    for key in aliases {
        if let Some(Value::String(s)) = obj.get(*key) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed);
            }
        }
    }
    None
}

fn parse_field(raw: &Value, issues: &mut Vec<String>) -> Option<NormalizedField> {
    let obj = match raw.as_object() {
        Some(o) => o,
        None => {
            issues.push("each field must be an object".to_string());
            return None;
        }
    };

    let id = match first_alias_str(obj, &ID_ALIASES) {
        Some(id) => id.to_string(),
        None => {
            issues.push("field is missing a non-empty id".to_string());
            return None;
        }
    };

    let type_str = match first_alias_str(obj, &TYPE_ALIASES) {
        Some(t) => t,
        None => {
            issues.push(format!("field {id} is missing a type"));
            return None;
        }
    };
    let field_type = match FieldType::parse(type_str) {
        Some(t) => t,
        None => {
            issues.push(format!("field {id} has unsupported type: {type_str}"));
            return None;
        }
    };

    // Validation keys may appear under `validation`, `rules`, or flat on the field.
    // Only the two named sub-objects are checked for unsupported keys; the flat
    // field object legitimately carries non-validation keys like id/type/label.
    let mut validation_maps: Vec<(&serde_json::Map<String, Value>, bool)> = Vec::new();
    for key in ["validation", "rules"] {
        if let Some(Value::Object(m)) = obj.get(key) {
            validation_maps.push((m, true));
        }
    }
    validation_maps.push((obj, false));

    let mut required = false;
    let mut min = None;
    let mut max = None;
    let mut min_length = None;
    let mut max_length = None;
    let mut pattern = None;
    let mut options_raw: Option<&Vec<Value>> = None;

    for (map, is_sub_object) in &validation_maps {
        for (k, v) in map.iter() {
            if k == "required" {
                required = required || read_bool(v, &id, "required", issues)?;
            } else if k == "min" {
                min = min.or(read_finite_number(v, &id, "min", issues));
            } else if k == "max" {
                max = max.or(read_finite_number(v, &id, "max", issues));
            } else if k == "minLength" {
                min_length = min_length.or(read_finite_number(v, &id, "minLength", issues));
            } else if k == "maxLength" {
                max_length = max_length.or(read_finite_number(v, &id, "maxLength", issues));
            } else if k == "pattern" {
                pattern = pattern.or_else(|| read_pattern(v, &id, issues));
            } else if k == "options" {
                if options_raw.is_none() {
                    if let Value::Array(arr) = v {
                        options_raw = Some(arr);
                    } else {
                        issues.push(format!("field {id}: options must be an array"));
                    }
                }
            } else if *is_sub_object && !SUPPORTED_VALIDATION_KEYS.contains(&k.as_str()) {
                issues.push(format!("field {id}: unsupported validation key {k}"));
            }
        }
    }

    let hidden = match obj.get("hidden") {
        Some(v) => read_bool(v, &id, "hidden", issues)?,
        None => false,
    };
    let default_visible = !hidden;

    let options = match options_raw {
        Some(arr) => {
            let mut out = Vec::with_capacity(arr.len());
            for entry in arr {
                match extract_option_primitive(entry) {
                    Some(primitive) => out.push(OptionValue { raw: primitive }),
                    None => issues.push(format!("field {id}: option entry is not extractable")),
                }
            }
            out
        }
        None => Vec::new(),
    };

    if field_type.requires_options() && options.is_empty() {
        issues.push(format!("field {id}: {type_str} requires a non-empty options list"));
    }

    Some(NormalizedField {
        id,
        field_type,
        required,
        min,
        max,
        min_length,
        max_length,
        pattern,
        options,
        default_visible,
    })
}

fn read_bool(v: &Value, field_id: &str, key: &str, issues: &mut Vec<String>) -> Option<bool> {
    match v.as_bool() {
        Some(b) => Some(b),
        None => {
            issues.push(format!("field {field_id}: {key} must be a boolean"));
            None
        }
    }
}

fn read_finite_number(v: &Value, field_id: &str, key: &str, issues: &mut Vec<String>) -> Option<f64> {
    match v.as_f64() {
        Some(n) if n.is_finite() => Some(n),
        _ => {
            issues.push(format!("field {field_id}: {key} must be a finite number"));
            None
        }
    }
}

fn read_pattern(v: &Value, field_id: &str, issues: &mut Vec<String>) -> Option<Regex> {
    let s = match v.as_str() {
        Some(s) => s,
        None => {
            issues.push(format!("field {field_id}: pattern must be a string"));
            return None;
        }
    };
    match Regex::new(s) {
        Ok(re) => Some(re),
        Err(_) => {
            issues.push(format!("field {field_id}: pattern is not a valid regular expression"));
            None
        }
    }
}

fn extract_option_primitive(entry: &Value) -> Option<Value> {
    match entry {
        Value::Object(obj) => first_alias_str(obj, &ID_ALIASES).map(|s| Value::String(s.to_string())),
        Value::String(_) | Value::Number(_) | Value::Bool(_) => Some(entry.clone()),
        _ => None,
    }
}

fn parse_rule(
    raw: &Value,
    registry: &HashSet<&str>,
    issues: &mut Vec<String>,
) -> Option<NormalizedRule> {
    let obj = match raw.as_object() {
        Some(o) => o,
        None => {
            issues.push("each logic rule must be an object".to_string());
            return None;
        }
    };

    let enabled = obj
        .get("enabled")
        .and_then(Value::as_bool)
        .unwrap_or(true)
        && obj
            .get("isActive")
            .and_then(Value::as_bool)
            .unwrap_or(true);
    if !enabled {
        return None;
    }

    let condition_val = CONDITION_ALIASES.iter().find_map(|k| obj.get(*k));
    let condition_val = match condition_val {
        Some(v) => v,
        None => {
            issues.push("logic rule is missing a condition".to_string());
            return None;
        }
    };
    let action_val = ACTION_ALIASES.iter().find_map(|k| obj.get(*k));
    let action_val = match action_val {
        Some(v) => v,
        None => {
            issues.push("logic rule is missing an action".to_string());
            return None;
        }
    };

    let condition = parse_condition_group(condition_val, registry, issues)?;
    let action = parse_action(action_val, registry, issues)?;

    Some(NormalizedRule { condition, action })
}

fn parse_condition_group(
    v: &Value,
    registry: &HashSet<&str>,
    issues: &mut Vec<String>,
) -> Option<ConditionGroup> {
    match v {
        Value::Array(arr) => {
            let conditions = parse_conditions(arr, registry, issues)?;
            Some(ConditionGroup::All(conditions))
        }
        Value::Object(obj) => {
            let has_all = obj.contains_key("all");
            let has_any = obj.contains_key("any");
            if has_all == has_any {
                issues.push("condition object must have exactly one of all/any".to_string());
                return None;
            }
            if has_all {
                let arr = obj.get("all").and_then(Value::as_array);
                let arr = match arr {
                    Some(a) => a,
                    None => {
                        issues.push("condition.all must be an array".to_string());
                        return None;
                    }
                };
                Some(ConditionGroup::All(parse_conditions(arr, registry, issues)?))
            } else {
                let arr = obj.get("any").and_then(Value::as_array);
                let arr = match arr {
                    Some(a) => a,
                    None => {
                        issues.push("condition.any must be an array".to_string());
                        return None;
                    }
                };
                Some(ConditionGroup::Any(parse_conditions(arr, registry, issues)?))
            }
        }
        _ => {
            issues.push("condition must be an array or object".to_string());
            None
        }
    }
}

/// A bare single-condition object (not wrapped in all/any/array) parses as
/// mode `all` with one entry (spec §4.1 rule parsing, case (c)).
fn parse_conditions(
    arr: &[Value],
    registry: &HashSet<&str>,
    issues: &mut Vec<String>,
) -> Option<Vec<Condition>> {
    let mut out = Vec::with_capacity(arr.len());
    for item in arr {
        out.push(parse_single_condition(item, registry, issues)?);
    }
    Some(out)
}

fn parse_single_condition(
    v: &Value,
    registry: &HashSet<&str>,
    issues: &mut Vec<String>,
) -> Option<Condition> {
    let obj = match v.as_object() {
        Some(o) => o,
        None => {
            issues.push("condition entry must be an object".to_string());
            return None;
        }
    };

    let field_id = match first_alias_str(obj, &ID_ALIASES) {
        Some(id) => id.to_string(),
        None => {
            issues.push("condition is missing a source field id".to_string());
            return None;
        }
    };
    if !registry.contains(field_id.as_str()) {
        issues.push(format!("condition references unknown field: {field_id}"));
        return None;
    }

    let op_str = match obj.get("operator").or_else(|| obj.get("op")).and_then(Value::as_str) {
        Some(s) => s,
        None => {
            issues.push(format!("condition on {field_id} is missing an operator"));
            return None;
        }
    };
    let operator = match Operator::parse(op_str) {
        Some(op) => op,
        None => {
            issues.push(format!("condition on {field_id} has unsupported operator: {op_str}"));
            return None;
        }
    };

    let value = obj.get("value").cloned();

    if operator.takes_value() && value.is_none() {
        issues.push(format!("condition on {field_id} with operator {op_str} requires a value"));
        return None;
    }

    match operator {
        Operator::In | Operator::NotIn => {
            if !matches!(value, Some(Value::Array(_))) {
                issues.push(format!("condition on {field_id}: {op_str} requires an array value"));
                return None;
            }
        }
        Operator::Contains | Operator::NotContains => {
            if let Some(v) = &value {
                if !matches!(v, Value::String(_) | Value::Number(_) | Value::Bool(_)) {
                    issues.push(format!("condition on {field_id}: {op_str} requires a primitive value"));
                    return None;
                }
            }
        }
        Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
            if let Some(v) = &value {
                if !matches!(v, Value::Number(_) | Value::String(_)) {
                    issues.push(format!(
                        "condition on {field_id}: {op_str} requires a number or string value"
                    ));
                    return None;
                }
            }
        }
        _ => {}
    }

    Some(Condition {
        field_id,
        operator,
        value,
    })
}

fn parse_action(
    v: &Value,
    registry: &HashSet<&str>,
    issues: &mut Vec<String>,
) -> Option<RuleAction> {
    // Actions may be a single action object or an array of one (aliases
    // `actions` commonly carries an array; we take the first entry).
    let obj = match v {
        Value::Object(o) => o,
        Value::Array(arr) => match arr.first().and_then(Value::as_object) {
            Some(o) => o,
            None => {
                issues.push("action array is empty or malformed".to_string());
                return None;
            }
        },
        _ => {
            issues.push("action must be an object or array of objects".to_string());
            return None;
        }
    };

    let action_kind = obj.get("action").or_else(|| obj.get("type")).and_then(Value::as_str);

    let show = if let Some(kind) = action_kind {
        match kind {
            "show" | "show_field" => true,
            "hide" | "hide_field" => false,
            "set_visibility" => match obj.get("visible").and_then(Value::as_bool) {
                Some(b) => b,
                None => {
                    issues.push("set_visibility action requires a boolean visible".to_string());
                    return None;
                }
            },
            other => {
                issues.push(format!("unsupported action kind: {other}"));
                return None;
            }
        }
    } else if obj.contains_key("show") {
        match obj.get("show").and_then(Value::as_bool) {
            Some(b) => b,
            None => {
                issues.push("show action requires a boolean value".to_string());
                return None;
            }
        }
    } else if obj.contains_key("hide") {
        match obj.get("hide").and_then(Value::as_bool) {
            Some(b) => !b,
            None => {
                issues.push("hide action requires a boolean value".to_string());
                return None;
            }
        }
    } else {
        issues.push("action is missing a recognizable kind".to_string());
        return None;
    };

    let target_field_id = match first_alias_str(obj, &ID_ALIASES)
        .map(str::to_string)
        .or_else(|| obj.get("target").and_then(Value::as_str).map(str::to_string))
        .or_else(|| obj.get("targetFieldId").and_then(Value::as_str).map(str::to_string))
    {
        Some(id) => id,
        None => {
            issues.push("action is missing a target field id".to_string());
            return None;
        }
    };
    if !registry.contains(target_field_id.as_str()) {
        issues.push(format!("action references unknown target field: {target_field_id}"));
        return None;
    }

    Some(RuleAction {
        show,
        target_field_id,
    })
}
