//! Task payload validation (pure, no side effects).
//!
//! What this module provides
//! - `validate` applying a JSON Schema subset to a payload: `type`,
//!   `required`, `properties`, `enum`, `items`
//! - `Violation` records describing each mismatch precisely, for assertions
//!   and for building `INVALID_INPUT` / `INVALID_OUTPUT` errors
//! - `schema_for::<T>()` sugar deriving a schema from a typed parameter
//!   struct via `schemars`
//!
//! The subset is deliberately small: task schemas in this system declare
//! object shapes, required fields, primitive types, and enumerated values.
//! Anything richer belongs in the sub-agent's own business logic.

use serde_json::Value;

/// A single schema mismatch, with a JSON-pointer-style path to the offender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub path: String,
    pub message: String,
}

impl Violation {
    fn at(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Validate `value` against `schema`, returning every violation found.
///
/// An empty result means the payload conforms. A schema that is not an
/// object (e.g. `true`) accepts everything.
pub fn validate(value: &Value, schema: &Value) -> Vec<Violation> {
    let mut violations = Vec::new();
    check(value, schema, "$", &mut violations);
    violations
}

fn check(value: &Value, schema: &Value, path: &str, out: &mut Vec<Violation>) {
    let Some(schema) = schema.as_object() else {
        return;
    };

    if let Some(expected) = schema.get("type").and_then(|t| t.as_str()) {
        if !type_matches(value, expected) {
            out.push(Violation::at(
                path,
                format!("expected {expected}, got {}", type_name(value)),
            ));
            return;
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(|e| e.as_array()) {
        if !allowed.contains(value) {
            out.push(Violation::at(path, format!("value not in enum: {value}")));
        }
    }

    if let Some(obj) = value.as_object() {
        if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
            for field in required.iter().filter_map(|f| f.as_str()) {
                if !obj.contains_key(field) {
                    out.push(Violation::at(
                        path,
                        format!("missing required field `{field}`"),
                    ));
                }
            }
        }
        if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
            for (name, subschema) in props {
                if let Some(child) = obj.get(name) {
                    check(child, subschema, &format!("{path}.{name}"), out);
                }
            }
        }
    }

    if let (Some(items), Some(arr)) = (schema.get("items"), value.as_array()) {
        for (i, child) in arr.iter().enumerate() {
            check(child, items, &format!("{path}[{i}]"), out);
        }
    }
}

fn type_matches(value: &Value, expected: &str) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Derive a JSON Schema from a typed parameter struct.
pub fn schema_for<T: schemars::JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or_else(|_| Value::Bool(true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reservation_schema() -> Value {
        json!({
            "type": "object",
            "required": ["reservation_id"],
            "properties": {
                "reservation_id": {"type": "string"},
                "nights": {"type": "integer"},
                "status": {"type": "string", "enum": ["confirmed", "pending"]}
            }
        })
    }

    #[test]
    fn conforming_payload_passes() {
        let payload = json!({"reservation_id": "ABC123", "nights": 2, "status": "confirmed"});
        assert!(validate(&payload, &reservation_schema()).is_empty());
    }

    #[test]
    fn missing_required_field_is_reported() {
        let payload = json!({"nights": 2});
        let violations = validate(&payload, &reservation_schema());
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message.contains("reservation_id"));
        assert_eq!(violations[0].path, "$");
    }

    #[test]
    fn wrong_type_is_reported_with_path() {
        let payload = json!({"reservation_id": 42});
        let violations = validate(&payload, &reservation_schema());
        assert!(violations
            .iter()
            .any(|v| v.path == "$.reservation_id" && v.message.contains("expected string")));
    }

    #[test]
    fn enum_mismatch_is_reported() {
        let payload = json!({"reservation_id": "A", "status": "cancelled"});
        let violations = validate(&payload, &reservation_schema());
        assert!(violations.iter().any(|v| v.path == "$.status"));
    }

    #[test]
    fn array_items_are_checked() {
        let schema = json!({"type": "array", "items": {"type": "string"}});
        let violations = validate(&json!(["a", 1, "c"]), &schema);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path, "$[1]");
    }

    #[test]
    fn non_object_schema_accepts_everything() {
        assert!(validate(&json!({"anything": true}), &json!(true)).is_empty());
    }

    #[test]
    fn derived_schema_validates_typed_params() {
        #[derive(schemars::JsonSchema)]
        #[allow(dead_code)]
        struct LookupParams {
            reservation_id: String,
            nights: Option<u32>,
        }
        let schema = schema_for::<LookupParams>();
        let ok = json!({"reservation_id": "R1"});
        assert!(validate(&ok, &schema).is_empty());
        let bad = json!({});
        assert!(!validate(&bad, &schema).is_empty());
    }
}
