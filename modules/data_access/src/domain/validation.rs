//! Payload validation
//!
//! Field constraints (length, enumerations, patterns) are compiled into one
//! JSON Schema validator per constrained field when an entity is registered.

use crate::contract::{DataAccessError, Value, ValueMap};
use crate::domain::schema::{FieldDef, FieldKind, WriteMode};
use jsonschema::Validator;
use serde_json::json;
use std::collections::BTreeMap;

struct FieldRule {
    column: String,
    label: String,
    required: bool,
    kind: FieldKind,
    validator: Option<Validator>,
}

/// Validates decoded payload values against the declared field constraints
pub struct PayloadValidator {
    rules: Vec<FieldRule>,
}

impl PayloadValidator {
    /// Compile validators for every writable field
    pub fn compile(fields: &[FieldDef]) -> Result<Self, String> {
        let mut rules = Vec::new();
        for field in fields.iter().filter(|f| f.is_writable()) {
            let validator = match field_schema(field)? {
                Some(schema) => Some(Validator::new(&schema).map_err(|e| {
                    format!("invalid constraint on {}: {}", field.name, e)
                })?),
                None => None,
            };
            rules.push(FieldRule {
                column: field.column.clone(),
                label: field.label().to_string(),
                required: field.required,
                kind: field.kind,
                validator,
            });
        }
        Ok(Self { rules })
    }

    /// Check `supplied` (the caller's values) and, on create, the required
    /// fields of `merged` (the full row about to be written).
    pub fn validate(
        &self,
        supplied: &ValueMap,
        merged: &ValueMap,
        mode: WriteMode,
    ) -> Result<(), DataAccessError> {
        let mut errors = BTreeMap::new();

        for rule in &self.rules {
            if rule.required {
                let candidate = match mode {
                    WriteMode::Create => merged.get(&rule.column),
                    WriteMode::Update => supplied.get(&rule.column),
                };
                let missing = match candidate {
                    Some(value) => is_zero(value, rule.kind),
                    None => mode == WriteMode::Create,
                };
                if missing {
                    errors.insert(rule.label.clone(), "required".to_string());
                    continue;
                }
            }

            let (Some(validator), Some(value)) = (&rule.validator, supplied.get(&rule.column))
            else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            if let Err(error) = validator.validate(&value.to_json()) {
                errors.insert(rule.label.clone(), error.to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(DataAccessError::Validation { errors })
        }
    }
}

fn is_zero(value: &Value, kind: FieldKind) -> bool {
    match value {
        Value::Null => true,
        Value::Text(s) => s.is_empty(),
        Value::Int(0) => true,
        Value::Float(f) => *f == 0.0,
        // false is a legitimate boolean answer
        Value::Bool(_) => kind != FieldKind::Bool,
        _ => false,
    }
}

/// JSON Schema for a field, `None` when the field has no constraints
fn field_schema(field: &FieldDef) -> Result<Option<serde_json::Value>, String> {
    let mut schema = serde_json::Map::new();

    if let Some(min) = field.min_length {
        schema.insert("minLength".to_string(), json!(min));
    }
    if let Some(max) = field.max_length {
        schema.insert("maxLength".to_string(), json!(max));
    }
    if let Some(pattern) = &field.pattern {
        schema.insert("pattern".to_string(), json!(pattern));
    }
    if !field.one_of.is_empty() {
        let allowed = field
            .one_of
            .iter()
            .map(|v| field.kind.parse_literal(v).map(|value| value.to_json()))
            .collect::<Result<Vec<_>, _>>()?;
        schema.insert("enum".to_string(), serde_json::Value::Array(allowed));
    }

    if schema.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::Value::Object(schema)))
}
