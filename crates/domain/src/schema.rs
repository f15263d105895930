//! JSON-schema subset for tool-input validation.
//!
//! Supported keywords: `type`, `required`, `properties`,
//! `additionalProperties`, `items`, `enum`, `const`, `minLength`,
//! `maxLength`, `minimum`, `maximum`, `minItems`, `maxItems`.
//!
//! Two entry points: [`validate_definition`] checks that a stored schema
//! is structurally sane (run when a tool is registered), and
//! [`validate_value`] checks a candidate input against it (run before
//! every outbound tool call). Both return a flat issue list; empty means
//! valid.

use serde_json::Value;

/// One validation problem, anchored by a `$`-rooted path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaIssue {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for SchemaIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

const KNOWN_TYPES: &[&str] = &[
    "object", "array", "string", "number", "integer", "boolean", "null",
];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Definition check
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Structurally validate a schema definition. An empty result guarantees
/// [`validate_value`] terminates for any JSON value.
pub fn validate_definition(schema: &Value) -> Vec<SchemaIssue> {
    let mut issues = Vec::new();
    check_definition(schema, "$", &mut issues);
    issues
}

fn check_definition(schema: &Value, path: &str, issues: &mut Vec<SchemaIssue>) {
    let obj = match schema.as_object() {
        Some(o) => o,
        None => {
            issues.push(SchemaIssue {
                path: path.to_owned(),
                message: "Schema must be an object".into(),
            });
            return;
        }
    };

    if let Some(ty) = obj.get("type") {
        match ty.as_str() {
            Some(s) if KNOWN_TYPES.contains(&s) => {}
            Some(s) => issues.push(SchemaIssue {
                path: format!("{path}.type"),
                message: format!("Unknown type '{s}'"),
            }),
            None => issues.push(SchemaIssue {
                path: format!("{path}.type"),
                message: "'type' must be a string".into(),
            }),
        }
    }

    if let Some(req) = obj.get("required") {
        let ok = req
            .as_array()
            .map(|a| a.iter().all(Value::is_string))
            .unwrap_or(false);
        if !ok {
            issues.push(SchemaIssue {
                path: format!("{path}.required"),
                message: "'required' must be an array of strings".into(),
            });
        }
    }

    match obj.get("properties") {
        Some(Value::Object(props)) => {
            for (key, sub) in props {
                check_definition(sub, &format!("{path}.properties.{key}"), issues);
            }
        }
        Some(_) => issues.push(SchemaIssue {
            path: format!("{path}.properties"),
            message: "'properties' must be an object of schemas".into(),
        }),
        None => {}
    }

    match obj.get("additionalProperties") {
        Some(Value::Bool(_)) | None => {}
        Some(sub @ Value::Object(_)) => {
            check_definition(sub, &format!("{path}.additionalProperties"), issues);
        }
        Some(_) => issues.push(SchemaIssue {
            path: format!("{path}.additionalProperties"),
            message: "'additionalProperties' must be a boolean or a schema".into(),
        }),
    }

    if let Some(items) = obj.get("items") {
        if items.is_object() {
            check_definition(items, &format!("{path}.items"), issues);
        } else {
            issues.push(SchemaIssue {
                path: format!("{path}.items"),
                message: "'items' must be a schema object".into(),
            });
        }
    }

    for bound in ["minimum", "maximum"] {
        if let Some(v) = obj.get(bound) {
            let finite = v.as_f64().map(f64::is_finite).unwrap_or(false);
            if !finite {
                issues.push(SchemaIssue {
                    path: format!("{path}.{bound}"),
                    message: format!("'{bound}' must be a finite number"),
                });
            }
        }
    }

    for bound in ["minLength", "maxLength", "minItems", "maxItems"] {
        if let Some(v) = obj.get(bound) {
            if v.as_u64().is_none() {
                issues.push(SchemaIssue {
                    path: format!("{path}.{bound}"),
                    message: format!("'{bound}' must be a non-negative integer"),
                });
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Value check
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate a JSON value against a (definition-valid) schema.
pub fn validate_value(schema: &Value, value: &Value) -> Vec<SchemaIssue> {
    let mut issues = Vec::new();
    check_value(schema, value, "$", &mut issues);
    issues
}

fn check_value(schema: &Value, value: &Value, path: &str, issues: &mut Vec<SchemaIssue>) {
    let obj = match schema.as_object() {
        Some(o) => o,
        None => return,
    };

    if let Some(expected) = obj.get("type").and_then(Value::as_str) {
        if !matches_type(expected, value) {
            issues.push(SchemaIssue {
                path: path.to_owned(),
                message: format!("Expected type {expected}"),
            });
            // Remaining keywords assume the declared type.
            return;
        }
    }

    if let Some(konst) = obj.get("const") {
        if value != konst {
            issues.push(SchemaIssue {
                path: path.to_owned(),
                message: "Value does not equal const".into(),
            });
        }
    }

    if let Some(variants) = obj.get("enum").and_then(Value::as_array) {
        if !variants.iter().any(|v| v == value) {
            issues.push(SchemaIssue {
                path: path.to_owned(),
                message: "Value is not one of the enum values".into(),
            });
        }
    }

    if let Some(s) = value.as_str() {
        let len = s.chars().count() as u64;
        if let Some(min) = obj.get("minLength").and_then(Value::as_u64) {
            if len < min {
                issues.push(SchemaIssue {
                    path: path.to_owned(),
                    message: format!("String is shorter than minLength {min}"),
                });
            }
        }
        if let Some(max) = obj.get("maxLength").and_then(Value::as_u64) {
            if len > max {
                issues.push(SchemaIssue {
                    path: path.to_owned(),
                    message: format!("String is longer than maxLength {max}"),
                });
            }
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = obj.get("minimum").and_then(Value::as_f64) {
            if n < min {
                issues.push(SchemaIssue {
                    path: path.to_owned(),
                    message: format!("Number is less than minimum {min}"),
                });
            }
        }
        if let Some(max) = obj.get("maximum").and_then(Value::as_f64) {
            if n > max {
                issues.push(SchemaIssue {
                    path: path.to_owned(),
                    message: format!("Number is greater than maximum {max}"),
                });
            }
        }
    }

    if let Some(items) = value.as_array() {
        let len = items.len() as u64;
        if let Some(min) = obj.get("minItems").and_then(Value::as_u64) {
            if len < min {
                issues.push(SchemaIssue {
                    path: path.to_owned(),
                    message: format!("Array has fewer than minItems {min}"),
                });
            }
        }
        if let Some(max) = obj.get("maxItems").and_then(Value::as_u64) {
            if len > max {
                issues.push(SchemaIssue {
                    path: path.to_owned(),
                    message: format!("Array has more than maxItems {max}"),
                });
            }
        }
        if let Some(item_schema) = obj.get("items") {
            for (i, item) in items.iter().enumerate() {
                check_value(item_schema, item, &format!("{path}[{i}]"), issues);
            }
        }
    }

    if let Some(map) = value.as_object() {
        if let Some(required) = obj.get("required").and_then(Value::as_array) {
            for key in required.iter().filter_map(Value::as_str) {
                if !map.contains_key(key) {
                    issues.push(SchemaIssue {
                        path: path.to_owned(),
                        message: format!("Missing required property '{key}'"),
                    });
                }
            }
        }

        let props = obj.get("properties").and_then(Value::as_object);
        let additional = obj.get("additionalProperties");

        for (key, sub_value) in map {
            let sub_path = format!("{path}.{key}");
            if let Some(sub_schema) = props.and_then(|p| p.get(key)) {
                check_value(sub_schema, sub_value, &sub_path, issues);
            } else {
                match additional {
                    Some(Value::Bool(false)) => issues.push(SchemaIssue {
                        path: sub_path,
                        message: format!("Property '{key}' is not allowed"),
                    }),
                    Some(sub_schema @ Value::Object(_)) => {
                        check_value(sub_schema, sub_value, &sub_path, issues);
                    }
                    _ => {}
                }
            }
        }
    }
}

fn matches_type(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "number" => value.as_f64().map(f64::is_finite).unwrap_or(false),
        "integer" => {
            value.as_i64().is_some()
                || value.as_u64().is_some()
                || value
                    .as_f64()
                    .map(|n| n.is_finite() && n.fract() == 0.0)
                    .unwrap_or(false)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn valid_definition_is_empty() {
        let schema = json!({
            "type": "object",
            "required": ["email"],
            "properties": {
                "email": { "type": "string", "minLength": 3 },
                "age": { "type": "integer", "minimum": 0 },
                "tags": { "type": "array", "items": { "type": "string" }, "maxItems": 5 }
            },
            "additionalProperties": false
        });
        assert!(validate_definition(&schema).is_empty());
    }

    #[test]
    fn definition_rejects_unknown_type_and_bad_bounds() {
        let schema = json!({
            "type": "object",
            "properties": {
                "x": { "type": "decimal" },
                "y": { "type": "string", "minLength": -1 }
            },
            "required": "email"
        });
        let issues = validate_definition(&schema);
        assert_eq!(issues.len(), 3);
        assert!(issues.iter().any(|i| i.path == "$.properties.x.type"));
        assert!(issues
            .iter()
            .any(|i| i.path == "$.properties.y.minLength"));
        assert!(issues.iter().any(|i| i.path == "$.required"));
    }

    #[test]
    fn short_string_reports_min_length() {
        let schema = json!({
            "type": "object",
            "required": ["email"],
            "properties": { "email": { "type": "string", "minLength": 3 } }
        });
        let issues = validate_value(&schema, &json!({ "email": "a" }));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "$.email");
        assert_eq!(issues[0].message, "String is shorter than minLength 3");
    }

    #[test]
    fn missing_required_key() {
        let schema = json!({
            "type": "object",
            "required": ["email"],
            "properties": { "email": { "type": "string" } }
        });
        let issues = validate_value(&schema, &json!({}));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "$");
        assert_eq!(issues[0].message, "Missing required property 'email'");
    }

    #[test]
    fn unknown_key_rejected_when_closed() {
        let schema = json!({
            "type": "object",
            "properties": { "a": { "type": "string" } },
            "additionalProperties": false
        });
        let issues = validate_value(&schema, &json!({ "a": "x", "b": 1 }));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "$.b");
    }

    #[test]
    fn additional_properties_schema_recurses() {
        let schema = json!({
            "type": "object",
            "additionalProperties": { "type": "integer" }
        });
        let issues = validate_value(&schema, &json!({ "a": 1, "b": "no" }));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "$.b");
        assert_eq!(issues[0].message, "Expected type integer");
    }

    #[test]
    fn integer_accepts_whole_floats_only() {
        let schema = json!({ "type": "integer" });
        assert!(validate_value(&schema, &json!(3)).is_empty());
        assert!(validate_value(&schema, &json!(3.0)).is_empty());
        assert_eq!(validate_value(&schema, &json!(3.5)).len(), 1);
    }

    #[test]
    fn enum_and_const() {
        let schema = json!({ "type": "string", "enum": ["a", "b"] });
        assert!(validate_value(&schema, &json!("a")).is_empty());
        assert_eq!(validate_value(&schema, &json!("c")).len(), 1);

        let schema = json!({ "const": 42 });
        assert!(validate_value(&schema, &json!(42)).is_empty());
        assert_eq!(validate_value(&schema, &json!(41)).len(), 1);
    }

    #[test]
    fn nested_array_paths() {
        let schema = json!({
            "type": "object",
            "properties": {
                "tags": { "type": "array", "items": { "type": "string", "maxLength": 2 } }
            }
        });
        let issues = validate_value(&schema, &json!({ "tags": ["ok", "toolong"] }));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "$.tags[1]");
    }

    #[test]
    fn valid_definition_implies_value_check_terminates() {
        // Deeply nested value against a shallow schema — recursion is
        // bounded by the schema, not the value.
        let schema = json!({ "type": "object", "additionalProperties": true });
        let mut value = json!({"leaf": 1});
        for _ in 0..64 {
            value = json!({ "next": value });
        }
        assert!(validate_definition(&schema).is_empty());
        assert!(validate_value(&schema, &value).is_empty());
    }
}
