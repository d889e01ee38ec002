//! Filter operations
//!
//! Callers filter reads with a JSON array of operations:
//! `[{"name": "color", "value": "red", "op": "=", "next_op": "and"}, ...]`.
//! Operations are validated structurally, then resolved against the entity's
//! fields and compiled into a parameterized predicate.

use crate::contract::{DataAccessError, Value};
use crate::domain::schema::{FieldKind, SchemaEntry};
use std::collections::BTreeMap;

/// Comparison applied by a single operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Lt,
    Gt,
    Like,
    In,
}

impl Comparison {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "=" => Some(Self::Eq),
            "<" => Some(Self::Lt),
            ">" => Some(Self::Gt),
            "like" => Some(Self::Like),
            "in" => Some(Self::In),
            _ => None,
        }
    }

    fn sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Like => "like",
            Self::In => "in",
        }
    }
}

/// How an operation joins the one after it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chain {
    And,
    Or,
    Noop,
}

impl Chain {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "and" => Some(Self::And),
            "or" => Some(Self::Or),
            "noop" => Some(Self::Noop),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub name: String,
    pub value: serde_json::Value,
    pub op: Comparison,
    pub next_op: Chain,
}

/// Compiled predicate, without the `where` keyword
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledFilter {
    pub predicate: String,
    pub params: Vec<Value>,
}

impl CompiledFilter {
    pub fn is_empty(&self) -> bool {
        self.predicate.is_empty()
    }
}

/// Structural pass over the raw filter payload
///
/// `null` means no filter. Every problem is reported, keyed by position.
pub fn parse_operations(filters: &serde_json::Value) -> Result<Vec<Operation>, DataAccessError> {
    let items = match filters {
        serde_json::Value::Null => return Ok(Vec::new()),
        serde_json::Value::Array(items) => items,
        _ => {
            return Err(DataAccessError::validation(
                "filters",
                "must be an array of operations",
            ))
        }
    };

    let mut errors = BTreeMap::new();
    let mut operations = Vec::with_capacity(items.len());

    for (i, item) in items.iter().enumerate() {
        let Some(object) = item.as_object() else {
            errors.insert(format!("filters[{}]", i), "must be an object".to_string());
            continue;
        };

        let name = object.get("name").and_then(|v| v.as_str()).unwrap_or_default();
        if name.is_empty() {
            errors.insert(format!("filters[{}].name", i), "required".to_string());
        }

        let value = object.get("value").cloned().unwrap_or(serde_json::Value::Null);
        if value.is_null() {
            errors.insert(format!("filters[{}].value", i), "required".to_string());
        }

        let op = object.get("op").and_then(|v| v.as_str()).and_then(Comparison::parse);
        if op.is_none() {
            errors.insert(format!("filters[{}].op", i), "oneof = < > like in".to_string());
        }

        let next_op = match object.get("next_op") {
            None | Some(serde_json::Value::Null) => Some(Chain::Noop),
            Some(raw) => raw.as_str().and_then(Chain::parse),
        };
        if next_op.is_none() {
            errors.insert(format!("filters[{}].next_op", i), "oneof or and noop".to_string());
        }

        if let (Some(op), Some(next_op)) = (op, next_op) {
            operations.push(Operation {
                name: name.to_string(),
                value,
                op,
                next_op,
            });
        }
    }

    if let Some(last) = operations.len().checked_sub(1) {
        for (i, operation) in operations.iter().enumerate() {
            let dangling = i == last && operation.next_op != Chain::Noop;
            let unjoined = i < last && operation.next_op == Chain::Noop;
            if dangling {
                errors.insert(format!("filters[{}].next_op", i), "last operation must be noop".to_string());
            } else if unjoined {
                errors.insert(format!("filters[{}].next_op", i), "must be and or or".to_string());
            }
        }
    }

    if errors.is_empty() {
        Ok(operations)
    } else {
        Err(DataAccessError::Validation { errors })
    }
}

/// Resolve operations against `entry` and build the predicate
///
/// Columns are qualified with the table name. Output is deterministic for
/// the same input.
pub fn compile(operations: &[Operation], entry: &SchemaEntry) -> Result<CompiledFilter, DataAccessError> {
    let mut parts = Vec::with_capacity(operations.len() * 2);
    let mut params = Vec::new();

    for operation in operations {
        let field = entry
            .field(&operation.name)
            .filter(|f| f.readable && !f.reference)
            .ok_or_else(|| DataAccessError::InvalidField {
                field: operation.name.clone(),
            })?;
        let column = format!("{}.{}", entry.table(), field.column);

        let invalid = |details: String| DataAccessError::InvalidValueType {
            field: operation.name.clone(),
            details,
        };

        match (&operation.value, operation.op) {
            (serde_json::Value::Array(items), Comparison::In) => {
                if items.is_empty() {
                    return Err(invalid("in requires at least one value".to_string()));
                }
                for item in items {
                    if item.is_array() || item.is_object() {
                        return Err(invalid("in values must be scalars".to_string()));
                    }
                    params.push(field.kind.decode(item).map_err(invalid)?);
                }
                let placeholders = vec!["?"; items.len()].join(", ");
                parts.push(format!("{} in ({})", column, placeholders));
            }
            (_, Comparison::In) => {
                return Err(invalid("in requires an array".to_string()));
            }
            (serde_json::Value::Array(_) | serde_json::Value::Object(_), _) => {
                return Err(invalid(format!("{} requires a scalar", operation.op.sql())));
            }
            (raw, op) => {
                if op == Comparison::Like && field.kind != FieldKind::Text {
                    return Err(invalid("like requires a text field".to_string()));
                }
                params.push(field.kind.decode(raw).map_err(invalid)?);
                parts.push(format!("{} {} ?", column, op.sql()));
            }
        }

        match operation.next_op {
            Chain::And => parts.push("and".to_string()),
            Chain::Or => parts.push("or".to_string()),
            Chain::Noop => {}
        }
    }

    Ok(CompiledFilter {
        predicate: parts.join(" "),
        params,
    })
}
