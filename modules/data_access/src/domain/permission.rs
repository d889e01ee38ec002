//! Permission model
//!
//! Evaluates the cached permission matrix of an identity, builds the row
//! predicates for reads and deletes, and turns raw permission rows into a
//! matrix at login.

use crate::contract::{
    Condition, DataAccessError, PermissionKind, PermissionRow, Permissions, TablePermission,
    Value, ValueMap,
};
use crate::domain::schema::{SchemaEntry, SchemaRegistry};
use thiserror::Error;

/// Extra predicate limiting the rows an operation may touch
///
/// Empty when access is unconditional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccessPredicate {
    pub sql: String,
    pub params: Vec<Value>,
}

impl AccessPredicate {
    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }
}

/// Permitted literal vs. supplied value: numeric when both sides are
/// numbers, textual otherwise
fn literal_matches(permitted: &str, actual: &Value) -> bool {
    let numeric = match actual {
        Value::Int(v) => Some(*v as f64),
        Value::Float(v) => Some(*v),
        Value::Text(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    if let (Some(expected), Some(actual)) = (permitted.trim().parse::<f64>().ok(), numeric) {
        return expected == actual;
    }
    permitted == actual.to_string()
}

impl Permissions {
    pub fn table(&self, table: &str) -> Option<&TablePermission> {
        self.tables.get(table)
    }

    pub fn condition(&self, table: &str, kind: PermissionKind) -> Option<&Condition> {
        self.table(table).and_then(|p| p.condition(kind))
    }

    /// Row predicate for a read, update or delete; `None` when the operation is denied
    ///
    /// `col1 in (?, ?) and col2 in (?)`, params in column then value order.
    pub fn row_predicate(&self, entry: &SchemaEntry, kind: PermissionKind) -> Option<AccessPredicate> {
        let condition = self.condition(entry.table(), kind)?;
        let mut clauses = Vec::with_capacity(condition.columns.len());
        let mut params = Vec::new();

        for (column, values) in &condition.columns {
            let field_kind = entry.field(column).map(|f| f.kind);
            for literal in values {
                let value = field_kind
                    .and_then(|k| k.parse_literal(literal).ok())
                    .unwrap_or_else(|| Value::Text(literal.clone()));
                params.push(value);
            }
            let placeholders = vec!["?"; values.len()].join(", ");
            clauses.push(format!("{} in ({})", column, placeholders));
        }

        Some(AccessPredicate {
            sql: clauses.join(" and "),
            params,
        })
    }

    pub fn has_read_access(&self, entry: &SchemaEntry) -> Option<AccessPredicate> {
        self.row_predicate(entry, PermissionKind::Read)
    }

    pub fn has_delete_access(&self, entry: &SchemaEntry) -> Option<AccessPredicate> {
        self.row_predicate(entry, PermissionKind::Delete)
    }

    /// Every known column in `values` must satisfy the create/update
    /// Condition, or be absent from it
    pub fn check_write(
        &self,
        entry: &SchemaEntry,
        values: &ValueMap,
        kind: PermissionKind,
    ) -> Result<(), DataAccessError> {
        let condition = self.condition(entry.table(), kind).ok_or_else(|| {
            DataAccessError::unauthorized(format!(
                "no {} access to {}",
                kind_label(kind),
                entry.table()
            ))
        })?;
        if condition.is_unconditional() {
            return Ok(());
        }

        for (key, value) in values {
            let Some(field) = entry.field(key) else {
                continue;
            };
            let Some(permitted) = condition.columns.get(&field.column) else {
                continue;
            };
            if !permitted.iter().any(|p| literal_matches(p, value)) {
                tracing::debug!(
                    table = %entry.table(),
                    column = %field.column,
                    value = %value,
                    "Write rejected by column condition"
                );
                return Err(DataAccessError::unauthorized(format!(
                    "{} = {} is not permitted for {} on {}",
                    field.column,
                    value,
                    kind_label(kind),
                    entry.table()
                )));
            }
        }
        Ok(())
    }

    /// Whether the identity itself holds the grant described by a permission row
    pub fn holds(&self, table: &str, kind: PermissionKind, column: &str, value: &str) -> bool {
        let Some(condition) = self.condition(table, kind) else {
            return false;
        };
        if condition.is_unconditional() {
            return true;
        }
        if column.is_empty() {
            return false;
        }
        condition
            .columns
            .get(column)
            .is_some_and(|values| values.iter().any(|v| v == value))
    }

    /// Merge one grant into the matrix
    ///
    /// An empty column makes the Condition unconditional, which then
    /// absorbs every column grant.
    pub fn add(
        &mut self,
        table: &str,
        kind: PermissionKind,
        column: &str,
        value: &str,
    ) -> Result<(), PermissionRowError> {
        let slot = self
            .tables
            .entry(table.to_string())
            .or_default()
            .condition_mut(kind);

        if column.is_empty() {
            *slot = Some(Condition::unconditional());
            return Ok(());
        }
        if value.is_empty() {
            return Err(PermissionRowError::EmptyValue(column.to_string()));
        }

        if let Some(condition) = slot.as_mut() {
            if condition.is_unconditional() {
                return Ok(());
            }
            let values = condition.columns.entry(column.to_string()).or_default();
            if values.iter().any(|v| v == value) {
                return Err(PermissionRowError::Duplicate {
                    column: column.to_string(),
                    value: value.to_string(),
                });
            }
            values.push(value.to_string());
            return Ok(());
        }

        let mut condition = Condition::default();
        condition
            .columns
            .insert(column.to_string(), vec![value.to_string()]);
        *slot = Some(condition);
        Ok(())
    }
}

fn kind_label(kind: PermissionKind) -> &'static str {
    match kind {
        PermissionKind::Read => "read",
        PermissionKind::Create => "create",
        PermissionKind::Update => "update",
        PermissionKind::Delete => "delete",
    }
}

// ===== Ingestion =====

/// Reasons a permission row is rejected
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PermissionRowError {
    #[error("invalid permission kind '{0}'")]
    InvalidKind(String),
    #[error("table {0} is not registered")]
    UnknownTable(String),
    #[error("column {column} does not exist in {table}")]
    UnknownColumn { table: String, column: String },
    #[error("access by {0} is applied automatically and cannot be granted")]
    ScopeColumn(String),
    #[error("empty value for column {0}")]
    EmptyValue(String),
    #[error("value '{value}' is not valid for column {column}")]
    InvalidValue { column: String, value: String },
    #[error("permissions on {0} can only be granted by the super-user")]
    RestrictedTable(String),
    #[error("duplicate grant {column} = {value}")]
    Duplicate { column: String, value: String },
}

/// Validates permission rows against the registry
pub struct PermissionRules<'a> {
    registry: &'a SchemaRegistry,
    org_column: &'a str,
    owner_column: &'a str,
}

impl<'a> PermissionRules<'a> {
    pub fn new(registry: &'a SchemaRegistry, org_column: &'a str, owner_column: &'a str) -> Self {
        Self {
            registry,
            org_column,
            owner_column,
        }
    }

    /// Validate one row; returns the parsed kind and the canonical column
    pub fn validate(
        &self,
        row: &PermissionRow,
        is_super_user: bool,
    ) -> Result<(PermissionKind, String), PermissionRowError> {
        let kind = PermissionKind::from_code(row.permission.trim())
            .ok_or_else(|| PermissionRowError::InvalidKind(row.permission.clone()))?;

        let entry = self
            .registry
            .get(&row.table_name)
            .ok_or_else(|| PermissionRowError::UnknownTable(row.table_name.clone()))?;

        if !is_super_user && entry.is_restricted() {
            return Err(PermissionRowError::RestrictedTable(row.table_name.clone()));
        }

        if row.column_name.is_empty() {
            return Ok((kind, String::new()));
        }

        let field = entry
            .field(&row.column_name)
            .filter(|f| !f.reference)
            .ok_or_else(|| PermissionRowError::UnknownColumn {
                table: row.table_name.clone(),
                column: row.column_name.clone(),
            })?;

        if field.column == self.org_column || field.column == self.owner_column {
            return Err(PermissionRowError::ScopeColumn(field.column.clone()));
        }
        if row.value.is_empty() {
            return Err(PermissionRowError::EmptyValue(field.column.clone()));
        }
        field
            .kind
            .parse_literal(&row.value)
            .map_err(|_| PermissionRowError::InvalidValue {
                column: field.column.clone(),
                value: row.value.clone(),
            })?;

        Ok((kind, field.column.clone()))
    }

    /// Build the permission matrix of an identity from role and user rows
    ///
    /// Invalid rows are dropped and logged, never fatal.
    pub fn cache_permissions(
        &self,
        is_super_user: bool,
        role_rows: &[PermissionRow],
        user_rows: &[PermissionRow],
    ) -> Permissions {
        let mut permissions = Permissions::default();
        for (source, row) in role_rows
            .iter()
            .map(|r| ("role", r))
            .chain(user_rows.iter().map(|r| ("user", r)))
        {
            let (kind, column) = match self.validate(row, is_super_user) {
                Ok(parsed) => parsed,
                Err(reason) => {
                    tracing::warn!(
                        source,
                        row_id = row.id,
                        scope_id = row.scope_id,
                        table = %row.table_name,
                        %reason,
                        "Dropping permission row"
                    );
                    continue;
                }
            };
            if let Err(reason) = permissions.add(&row.table_name, kind, &column, &row.value) {
                tracing::debug!(source, row_id = row.id, %reason, "Ignoring permission row");
            }
        }
        permissions
    }
}
