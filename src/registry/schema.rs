//! Payload schema grammar used by `StageDefinition::payload_schema` and
//! enforced by [`super::StageRegistry::validate_payload`] (`SPEC_FULL.md`
//! §4.1: unknown fields allowed, required missing fields fail).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl FieldType {
    fn matches(self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object => "object",
        }
    }
}

/// Constraints applicable to a single field. Not every constraint applies to
/// every [`FieldType`]; irrelevant constraints are simply ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldConstraints {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    /// Substring the string value must contain. Not a full regular
    /// expression grammar — kept deliberately simple for the core.
    pub pattern: Option<String>,
    pub item_type: Option<FieldType>,
    pub r#enum: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSchema {
    pub field_type: FieldType,
    pub required: bool,
    #[serde(default)]
    pub constraints: FieldConstraints,
}

impl FieldSchema {
    pub fn required(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: true,
            constraints: FieldConstraints::default(),
        }
    }

    pub fn optional(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: false,
            constraints: FieldConstraints::default(),
        }
    }

    #[must_use]
    pub fn with_constraints(mut self, constraints: FieldConstraints) -> Self {
        self.constraints = constraints;
        self
    }
}

/// Schema for a stage's payload object: a map of field name to [`FieldSchema`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PayloadSchema {
    pub fields: BTreeMap<String, FieldSchema>,
}

impl PayloadSchema {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn field(mut self, name: impl Into<String>, schema: FieldSchema) -> Self {
        self.fields.insert(name.into(), schema);
        self
    }

    /// Validates `payload` against this schema, returning every violation
    /// found (not just the first) so callers can report the complete list.
    pub fn validate(&self, payload: &Value) -> Vec<String> {
        let mut errors = Vec::new();
        let Some(obj) = payload.as_object() else {
            errors.push("payload must be a JSON object".to_string());
            return errors;
        };

        for (name, field) in &self.fields {
            match obj.get(name) {
                None => {
                    if field.required {
                        errors.push(format!("missing required field '{name}'"));
                    }
                }
                Some(value) => {
                    if !field.field_type.matches(value) {
                        errors.push(format!(
                            "field '{name}' must be of type {}",
                            field.field_type.name()
                        ));
                        continue;
                    }
                    errors.extend(validate_constraints(name, value, field));
                }
            }
        }
        errors
    }
}

fn validate_constraints(name: &str, value: &Value, field: &FieldSchema) -> Vec<String> {
    let c = &field.constraints;
    let mut errors = Vec::new();

    if let Some(n) = value.as_f64() {
        if let Some(min) = c.min {
            if n < min {
                errors.push(format!("field '{name}' must be >= {min}"));
            }
        }
        if let Some(max) = c.max {
            if n > max {
                errors.push(format!("field '{name}' must be <= {max}"));
            }
        }
    }

    if let Some(s) = value.as_str() {
        if let Some(min_len) = c.min_length {
            if s.len() < min_len {
                errors.push(format!("field '{name}' must have length >= {min_len}"));
            }
        }
        if let Some(max_len) = c.max_length {
            if s.len() > max_len {
                errors.push(format!("field '{name}' must have length <= {max_len}"));
            }
        }
        if let Some(pattern) = &c.pattern {
            if !s.contains(pattern.as_str()) {
                errors.push(format!("field '{name}' does not match pattern '{pattern}'"));
            }
        }
    }

    if let Some(arr) = value.as_array() {
        if let Some(min_len) = c.min_length {
            if arr.len() < min_len {
                errors.push(format!("field '{name}' must have at least {min_len} items"));
            }
        }
        if let Some(max_len) = c.max_length {
            if arr.len() > max_len {
                errors.push(format!("field '{name}' must have at most {max_len} items"));
            }
        }
        if let Some(item_type) = c.item_type {
            for (i, item) in arr.iter().enumerate() {
                if !item_type.matches(item) {
                    errors.push(format!(
                        "field '{name}[{i}]' must be of type {}",
                        item_type.name()
                    ));
                }
            }
        }
    }

    if let Some(allowed) = &c.r#enum {
        if !allowed.contains(value) {
            errors.push(format!("field '{name}' must be one of {allowed:?}"));
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn required_field_missing_is_reported() {
        let schema = PayloadSchema::new().field("projectName", FieldSchema::required(FieldType::String));
        let errors = schema.validate(&json!({}));
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn unknown_fields_are_allowed() {
        let schema = PayloadSchema::new().field("projectName", FieldSchema::required(FieldType::String));
        let errors = schema.validate(&json!({"projectName": "Demo", "extra": 1}));
        assert!(errors.is_empty());
    }

    #[test]
    fn enum_constraint_rejects_unlisted_value() {
        let schema = PayloadSchema::new().field(
            "tier",
            FieldSchema::required(FieldType::String).with_constraints(FieldConstraints {
                r#enum: Some(vec![json!("free"), json!("pro")]),
                ..Default::default()
            }),
        );
        let errors = schema.validate(&json!({"tier": "enterprise"}));
        assert_eq!(errors.len(), 1);
    }
}
