//! Schema registry
//!
//! Every table reachable through the engine is described once by an
//! [`EntityDef`] and compiled into an immutable [`SchemaEntry`]. Entries hold
//! the field metadata used to decode payloads, build insert/update fragments,
//! convert stored rows and rename columns to their exposed names.

use crate::contract::{DataAccessError, TableRow, Value, ValueMap};
use crate::domain::repository::RawRow;
use crate::domain::validation::PayloadValidator;
use chrono::{DateTime, NaiveDateTime, Utc};
use heck::ToSnakeCase;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

const IDENTIFIER_PATTERN: &str = "^[a-z_][a-z0-9_]*$";

/// Registration failures; all of them abort startup
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("entity {entity}: '{name}' is not a valid SQL identifier")]
    InvalidIdentifier { entity: String, name: String },
    #[error("table {0} is already registered")]
    DuplicateTable(String),
    #[error("entity {entity}: key '{key}' resolves to more than one field")]
    FieldCollision { entity: String, key: String },
    #[error("entity {0} must declare an integer id field")]
    MissingId(String),
    #[error("entity {entity} is scoped but has no {column} field")]
    MissingScopeColumn { entity: String, column: String },
    #[error("entity {entity}: {message}")]
    InvalidConstraint { entity: String, message: String },
}

// ===== Field Metadata =====

/// Storage type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Int,
    Float,
    Bool,
    Text,
    Timestamp,
}

impl FieldKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Text => "text",
            Self::Timestamp => "timestamp",
        }
    }

    /// Value a freshly constructed instance carries
    pub fn zero(&self) -> Value {
        match self {
            Self::Int => Value::Int(0),
            Self::Float => Value::Float(0.0),
            Self::Bool => Value::Bool(false),
            Self::Text => Value::Text(String::new()),
            Self::Timestamp => Value::Null,
        }
    }

    /// Decode a caller-supplied JSON value. Kinds must match.
    pub fn decode(&self, raw: &serde_json::Value) -> Result<Value, String> {
        use serde_json::Value as Json;
        match (self, raw) {
            (_, Json::Null) => Ok(Value::Null),
            (Self::Int, Json::Number(n)) => n
                .as_i64()
                .map(Value::Int)
                .ok_or_else(|| format!("{} is not an integer", n)),
            (Self::Float, Json::Number(n)) => n
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| format!("{} is not a number", n)),
            (Self::Bool, Json::Bool(b)) => Ok(Value::Bool(*b)),
            (Self::Text, Json::String(s)) => Ok(Value::Text(s.clone())),
            (Self::Timestamp, Json::String(s)) => parse_timestamp(s).map(Value::Timestamp),
            (kind, other) => Err(format!("expected {}, got {}", kind.name(), json_kind(other))),
        }
    }

    /// Parse a literal kept as text (permission values, org/owner overrides)
    pub fn parse_literal(&self, raw: &str) -> Result<Value, String> {
        let trimmed = raw.trim();
        match self {
            Self::Int => trimmed
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| format!("'{}' is not an integer", raw)),
            Self::Float => trimmed
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| format!("'{}' is not a number", raw)),
            Self::Bool => parse_bool(trimmed)
                .map(Value::Bool)
                .ok_or_else(|| format!("'{}' is not a boolean", raw)),
            Self::Text => Ok(Value::Text(raw.to_string())),
            Self::Timestamp => parse_timestamp(trimmed).map(Value::Timestamp),
        }
    }

    /// Convert a raw stored value. Drivers differ in how they surface
    /// booleans, numbers and timestamps, so this is lenient where `decode` is not.
    pub fn convert(&self, raw: &serde_json::Value) -> Result<Value, String> {
        use serde_json::Value as Json;
        match (self, raw) {
            (_, Json::Null) => Ok(Value::Null),
            (Self::Int, Json::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .map(Value::Int)
                .ok_or_else(|| format!("{} is not an integer", n)),
            (Self::Int, Json::Bool(b)) => Ok(Value::Int(i64::from(*b))),
            (Self::Float, Json::Number(n)) => n
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| format!("{} is not a number", n)),
            (Self::Bool, Json::Bool(b)) => Ok(Value::Bool(*b)),
            (Self::Bool, Json::Number(n)) => Ok(Value::Bool(n.as_f64() != Some(0.0))),
            (Self::Text, Json::String(s)) => Ok(Value::Text(s.clone())),
            (Self::Text, Json::Number(n)) => Ok(Value::Text(n.to_string())),
            (Self::Text, Json::Bool(b)) => Ok(Value::Text(b.to_string())),
            (kind, Json::String(s)) => kind.parse_literal(s),
            (kind, other) => Err(format!("expected {}, got {}", kind.name(), json_kind(other))),
        }
    }
}

fn json_kind(raw: &serde_json::Value) -> &'static str {
    match raw {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "t" | "true" => Some(true),
        "0" | "f" | "false" => Some(false),
        _ => None,
    }
}

/// RFC 3339 first, then the formats SQL engines print by default (UTC assumed)
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Ok(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(format!("'{}' is not a valid timestamp", raw))
}

/// Declared field of an entity
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    /// Declared (internal) name, e.g. `UserRoleId`
    pub name: String,
    /// Storage column, snake_case of the declared name unless overridden
    pub column: String,
    /// Wire name; `None` hides the field from responses
    pub exposed: Option<String>,
    pub kind: FieldKind,
    pub read_only: bool,
    pub unique: bool,
    /// Write-only fields (password) are never emitted in responses
    pub readable: bool,
    /// Reference fields do not map to a column of this table
    pub reference: bool,
    pub required: bool,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub one_of: Vec<String>,
    pub pattern: Option<String>,
    pub default: Option<Value>,
}

impl FieldDef {
    fn new(name: &str, kind: FieldKind) -> Self {
        let snake = name.to_snake_case();
        Self {
            name: name.to_string(),
            column: snake.clone(),
            exposed: Some(snake),
            kind,
            read_only: false,
            unique: false,
            readable: true,
            reference: false,
            required: false,
            min_length: None,
            max_length: None,
            one_of: Vec::new(),
            pattern: None,
            default: None,
        }
    }

    pub fn int(name: &str) -> Self {
        Self::new(name, FieldKind::Int)
    }

    pub fn float(name: &str) -> Self {
        Self::new(name, FieldKind::Float)
    }

    pub fn boolean(name: &str) -> Self {
        Self::new(name, FieldKind::Bool)
    }

    pub fn text(name: &str) -> Self {
        Self::new(name, FieldKind::Text)
    }

    pub fn timestamp(name: &str) -> Self {
        Self::new(name, FieldKind::Timestamp)
    }

    pub fn column(mut self, column: &str) -> Self {
        self.column = column.to_string();
        self
    }

    pub fn exposed(mut self, exposed: &str) -> Self {
        self.exposed = Some(exposed.to_string());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.exposed = None;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn write_only(mut self) -> Self {
        self.readable = false;
        self
    }

    /// Marks a related record; implies read-only
    pub fn reference(mut self) -> Self {
        self.reference = true;
        self.read_only = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn length(mut self, min: usize, max: usize) -> Self {
        self.min_length = Some(min);
        self.max_length = Some(max);
        self
    }

    pub fn one_of(mut self, values: &[&str]) -> Self {
        self.one_of = values.iter().map(|v| v.to_string()).collect();
        self
    }

    pub fn pattern(mut self, pattern: &str) -> Self {
        self.pattern = Some(pattern.to_string());
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Accepted in create/update payloads and emitted in fragments
    pub fn is_writable(&self) -> bool {
        !self.read_only && !self.reference
    }

    /// Name used for this field in responses and error maps
    pub fn label(&self) -> &str {
        self.exposed.as_deref().unwrap_or(&self.column)
    }
}

// ===== Entity Definition =====

/// Whether a write transform runs for an insert or an update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Create,
    Update,
}

/// Entity hook rewriting values before they reach a statement
///
/// Values are keyed by storage column. Only keys present in the map are
/// written, so transforms must not add keys on update.
pub trait WriteTransform: Send + Sync {
    fn apply(&self, values: &mut ValueMap, mode: WriteMode) -> Result<(), DataAccessError>;
}

/// Static description of one entity, consumed by [`RegistryBuilder::register`]
pub struct EntityDef {
    name: String,
    table: Option<String>,
    fields: Vec<FieldDef>,
    tenant_scoped: bool,
    owner_scoped: bool,
    permission_rows: bool,
    restricted: bool,
    transform: Option<Arc<dyn WriteTransform>>,
}

impl EntityDef {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            table: None,
            fields: Vec::new(),
            tenant_scoped: false,
            owner_scoped: false,
            permission_rows: false,
            restricted: false,
            transform: None,
        }
    }

    /// Override the table name derived from the entity name
    pub fn table(mut self, table: &str) -> Self {
        self.table = Some(table.to_string());
        self
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Rows carry the tenant column and are isolated per tenant
    pub fn tenant_scoped(mut self) -> Self {
        self.tenant_scoped = true;
        self
    }

    /// Rows carry the owner column; owners bypass column permissions
    pub fn owner_scoped(mut self) -> Self {
        self.owner_scoped = true;
        self
    }

    /// Rows are permission grants (table_name, column_name, value, permission)
    pub fn permission_rows(mut self) -> Self {
        self.permission_rows = true;
        self
    }

    /// Only the super-user may grant permissions on this table
    pub fn restricted(mut self) -> Self {
        self.restricted = true;
        self
    }

    pub fn write_transform(mut self, transform: Arc<dyn WriteTransform>) -> Self {
        self.transform = Some(transform);
        self
    }
}

// ===== Query Fragments =====

/// Ordered column/parameter pairs of an insert or update.
///
/// Null values are written inline as `null` rather than bound, so the
/// backend takes the type from the column instead of the parameter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    pub columns: Vec<String>,
    pub params: Vec<Value>,
    bound: Vec<bool>,
}

impl Fragment {
    pub fn push(&mut self, column: &str, value: Value) {
        self.columns.push(column.to_string());
        self.bound.push(!value.is_null());
        if !value.is_null() {
            self.params.push(value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    fn placeholders(&self) -> impl Iterator<Item = (&String, &'static str)> {
        self.columns
            .iter()
            .zip(self.bound.iter())
            .map(|(column, bound)| (column, if *bound { "?" } else { "null" }))
    }

    /// `(a, b) values (?, ?)`
    pub fn render_insert(&self) -> String {
        let placeholders = self
            .placeholders()
            .map(|(_, p)| p)
            .collect::<Vec<_>>()
            .join(", ");
        format!("({}) values ({})", self.columns.join(", "), placeholders)
    }

    /// `a = ?, b = ?`
    pub fn render_update(&self) -> String {
        self.placeholders()
            .map(|(c, p)| format!("{} = {}", c, p))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

// ===== Schema Entry =====

/// Compiled, immutable descriptor of a registered table
pub struct SchemaEntry {
    name: String,
    table: String,
    fields: Vec<FieldDef>,
    lookup: HashMap<String, usize>,
    read_columns: String,
    tenant_scoped: bool,
    owner_scoped: bool,
    permission_rows: bool,
    restricted: bool,
    transform: Option<Arc<dyn WriteTransform>>,
    validator: PayloadValidator,
}

impl fmt::Debug for SchemaEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaEntry")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("fields", &self.fields.len())
            .field("tenant_scoped", &self.tenant_scoped)
            .field("owner_scoped", &self.owner_scoped)
            .finish()
    }
}

impl SchemaEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Resolve a field by internal, storage or exposed name
    pub fn field(&self, key: &str) -> Option<&FieldDef> {
        self.lookup.get(key).map(|&i| &self.fields[i])
    }

    /// Comma-joined storage columns of all non-reference fields
    pub fn read_columns(&self) -> &str {
        &self.read_columns
    }

    pub fn is_tenant_scoped(&self) -> bool {
        self.tenant_scoped
    }

    pub fn is_owner_scoped(&self) -> bool {
        self.owner_scoped
    }

    pub fn has_permission_rows(&self) -> bool {
        self.permission_rows
    }

    pub fn is_restricted(&self) -> bool {
        self.restricted
    }

    pub fn transform(&self) -> Option<&Arc<dyn WriteTransform>> {
        self.transform.as_ref()
    }

    pub fn validator(&self) -> &PayloadValidator {
        &self.validator
    }

    /// Zero-value instance: every writable field at its default
    pub fn zero_values(&self) -> ValueMap {
        self.fields
            .iter()
            .filter(|f| f.is_writable())
            .map(|f| {
                let value = f.default.clone().unwrap_or_else(|| f.kind.zero());
                (f.column.clone(), value)
            })
            .collect()
    }

    /// Decode a JSON object payload into values keyed by storage column
    ///
    /// Unknown keys are dropped. Read-only keys and kind mismatches are
    /// collected and reported together.
    pub fn decode_payload(
        &self,
        payload: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<ValueMap, DataAccessError> {
        let mut values = ValueMap::new();
        let mut errors = BTreeMap::new();

        for (key, raw) in payload {
            let Some(field) = self.field(key) else {
                tracing::debug!(table = %self.table, key = %key, "Dropping unknown payload key");
                continue;
            };
            if !field.is_writable() {
                errors.insert(key.clone(), "Cannot modify read only field".to_string());
                continue;
            }
            match field.kind.decode(raw) {
                Ok(value) => {
                    values.insert(field.column.clone(), value);
                }
                Err(reason) => {
                    errors.insert(field.label().to_string(), reason);
                }
            }
        }

        if errors.is_empty() {
            Ok(values)
        } else {
            Err(DataAccessError::Validation { errors })
        }
    }

    fn fragment(&self, values: &ValueMap) -> Fragment {
        let mut by_field: Vec<Option<&Value>> = vec![None; self.fields.len()];
        for (key, value) in values {
            match self.lookup.get(key.as_str()) {
                Some(&i) => by_field[i] = Some(value),
                None => {
                    tracing::debug!(table = %self.table, key = %key, "Skipping unknown key in fragment")
                }
            }
        }

        let mut fragment = Fragment::default();
        for (field, value) in self.fields.iter().zip(by_field) {
            if let Some(value) = value {
                if field.is_writable() {
                    fragment.push(&field.column, value.clone());
                }
            }
        }
        fragment
    }

    /// Columns and params for an insert, in field declaration order
    pub fn insert_fragment(&self, values: &ValueMap) -> Fragment {
        self.fragment(values)
    }

    /// Columns and params for an update, in field declaration order
    pub fn update_fragment(&self, values: &ValueMap) -> Fragment {
        self.fragment(values)
    }

    /// Convert raw store rows into typed rows keyed by storage column
    pub fn convert(&self, rows: Vec<RawRow>) -> Result<Vec<TableRow>, DataAccessError> {
        rows.into_iter().map(|row| self.convert_row(row)).collect()
    }

    fn convert_row(&self, mut row: RawRow) -> Result<TableRow, DataAccessError> {
        let mut converted = TableRow::new();
        for field in self.fields.iter().filter(|f| !f.reference) {
            let Some(raw) = row.remove(&field.column) else {
                continue;
            };
            let value = field
                .kind
                .convert(&raw)
                .map_err(|details| DataAccessError::Conversion {
                    column: field.column.clone(),
                    details,
                })?;
            converted.insert(field.column.clone(), value);
        }
        for column in row.keys() {
            tracing::debug!(table = %self.table, column = %column, "Skipping unknown result column");
        }
        Ok(converted)
    }

    /// Rename storage columns to exposed names, dropping hidden and write-only fields
    pub fn to_exposed(&self, rows: Vec<TableRow>) -> Vec<TableRow> {
        rows.into_iter().map(|row| self.row_to_exposed(row)).collect()
    }

    pub fn row_to_exposed(&self, row: TableRow) -> TableRow {
        row.into_iter()
            .filter_map(|(column, value)| {
                let field = self.field(&column)?;
                if !field.readable {
                    return None;
                }
                field.exposed.clone().map(|name| (name, value))
            })
            .collect()
    }
}

// ===== Registry =====

/// Builds the registry once at startup
pub struct RegistryBuilder {
    org_column: String,
    owner_column: String,
    entries: HashMap<String, Arc<SchemaEntry>>,
}

impl RegistryBuilder {
    pub fn new(org_column: &str, owner_column: &str) -> Self {
        Self {
            org_column: org_column.to_string(),
            owner_column: owner_column.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Compile and add one entity; fails on any metadata inconsistency
    pub fn register(&mut self, def: EntityDef) -> Result<Arc<SchemaEntry>, SchemaError> {
        let identifier = Regex::new(IDENTIFIER_PATTERN).map_err(|e| {
            SchemaError::InvalidConstraint {
                entity: def.name.clone(),
                message: e.to_string(),
            }
        })?;
        let entity = def.name.clone();
        let table = def.table.clone().unwrap_or_else(|| def.name.to_snake_case());
        if !identifier.is_match(&table) {
            return Err(SchemaError::InvalidIdentifier { entity, name: table });
        }
        if self.entries.contains_key(&table) {
            return Err(SchemaError::DuplicateTable(table));
        }

        let mut fields = def.fields;
        for field in &fields {
            if !field.reference && !identifier.is_match(&field.column) {
                return Err(SchemaError::InvalidIdentifier {
                    entity: entity.clone(),
                    name: field.column.clone(),
                });
            }
        }

        if !fields
            .iter()
            .any(|f| f.column == "id" && f.kind == FieldKind::Int && !f.reference)
        {
            return Err(SchemaError::MissingId(entity));
        }

        // Scope columns are managed by the engine, never by payloads
        let scope_columns = [
            (def.tenant_scoped, self.org_column.as_str()),
            (def.owner_scoped, self.owner_column.as_str()),
        ];
        for (scoped, column) in scope_columns {
            if !scoped {
                continue;
            }
            let field = fields
                .iter_mut()
                .find(|f| f.column == column && !f.reference)
                .ok_or_else(|| SchemaError::MissingScopeColumn {
                    entity: entity.clone(),
                    column: column.to_string(),
                })?;
            field.read_only = true;
        }

        let mut lookup = HashMap::new();
        for (i, field) in fields.iter().enumerate() {
            let mut keys = vec![field.name.as_str(), field.column.as_str()];
            if let Some(exposed) = field.exposed.as_deref() {
                keys.push(exposed);
            }
            for key in keys {
                if let Some(&other) = lookup.get(key) {
                    if other != i {
                        return Err(SchemaError::FieldCollision {
                            entity: entity.clone(),
                            key: key.to_string(),
                        });
                    }
                }
                lookup.insert(key.to_string(), i);
            }
        }

        let read_columns = fields
            .iter()
            .filter(|f| !f.reference)
            .map(|f| f.column.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        let validator = PayloadValidator::compile(&fields).map_err(|message| {
            SchemaError::InvalidConstraint {
                entity: entity.clone(),
                message,
            }
        })?;

        let entry = Arc::new(SchemaEntry {
            name: entity,
            table: table.clone(),
            fields,
            lookup,
            read_columns,
            tenant_scoped: def.tenant_scoped,
            owner_scoped: def.owner_scoped,
            permission_rows: def.permission_rows,
            restricted: def.restricted,
            transform: def.transform,
            validator,
        });
        self.entries.insert(table, entry.clone());
        Ok(entry)
    }

    /// Freeze the registry
    pub fn build(self) -> SchemaRegistry {
        tracing::info!(tables = self.entries.len(), "Schema registry built");
        SchemaRegistry {
            entries: self.entries,
        }
    }
}

/// Frozen table name -> entry map, shared read-only
#[derive(Debug)]
pub struct SchemaRegistry {
    entries: HashMap<String, Arc<SchemaEntry>>,
}

impl SchemaRegistry {
    pub fn get(&self, table: &str) -> Option<&Arc<SchemaEntry>> {
        self.entries.get(table)
    }

    pub fn contains(&self, table: &str) -> bool {
        self.entries.contains_key(table)
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn widget() -> EntityDef {
        EntityDef::new("Widget")
            .field(FieldDef::int("ID").column("id").read_only())
            .field(FieldDef::text("Name").unique().required())
            .field(FieldDef::text("Color"))
            .field(FieldDef::text("Secret").write_only())
            .field(FieldDef::int("OrgId").hidden())
            .field(FieldDef::text("Owner").reference())
            .tenant_scoped()
    }

    fn registry() -> SchemaRegistry {
        let mut builder = RegistryBuilder::new("org_id", "auth_user_id");
        builder.register(widget()).unwrap();
        builder.build()
    }

    #[test]
    fn test_storage_names_are_snake_case() {
        let registry = registry();
        let entry = registry.get("widget").unwrap();
        assert_eq!(entry.field("OrgId").unwrap().column, "org_id");
        assert_eq!(entry.read_columns(), "id, name, color, secret, org_id");
    }

    #[test]
    fn test_lookup_by_every_name() {
        let registry = registry();
        let entry = registry.get("widget").unwrap();
        for key in ["Color", "color"] {
            assert_eq!(entry.field(key).unwrap().column, "color");
        }
        assert!(entry.field("colour").is_none());
    }

    #[test]
    fn test_duplicate_table_fails() {
        let mut builder = RegistryBuilder::new("org_id", "auth_user_id");
        builder.register(widget()).unwrap();
        let err = builder.register(widget()).unwrap_err();
        assert_eq!(err, SchemaError::DuplicateTable("widget".to_string()));
    }

    #[test]
    fn test_colliding_keys_fail() {
        let mut builder = RegistryBuilder::new("org_id", "auth_user_id");
        let def = EntityDef::new("Gadget")
            .field(FieldDef::int("ID").column("id"))
            .field(FieldDef::text("Label").exposed("title"))
            .field(FieldDef::text("Title"));
        let err = builder.register(def).unwrap_err();
        assert!(matches!(err, SchemaError::FieldCollision { key, .. } if key == "title"));
    }

    #[test]
    fn test_missing_id_and_scope_column_fail() {
        let mut builder = RegistryBuilder::new("org_id", "auth_user_id");
        let no_id = EntityDef::new("Note").field(FieldDef::text("Body"));
        assert_eq!(
            builder.register(no_id).unwrap_err(),
            SchemaError::MissingId("Note".to_string())
        );

        let no_owner = EntityDef::new("Note")
            .field(FieldDef::int("ID").column("id"))
            .owner_scoped();
        assert!(matches!(
            builder.register(no_owner).unwrap_err(),
            SchemaError::MissingScopeColumn { column, .. } if column == "auth_user_id"
        ));
    }

    #[test]
    fn test_invalid_identifier_fails() {
        let mut builder = RegistryBuilder::new("org_id", "auth_user_id");
        let def = EntityDef::new("Note")
            .table("note; drop table x")
            .field(FieldDef::int("ID").column("id"));
        assert!(matches!(
            builder.register(def).unwrap_err(),
            SchemaError::InvalidIdentifier { .. }
        ));
    }

    #[test]
    fn test_scope_column_becomes_read_only() {
        let registry = registry();
        let entry = registry.get("widget").unwrap();
        assert!(entry.field("org_id").unwrap().read_only);
    }

    #[test]
    fn test_fragments_skip_read_only_and_reference_fields() {
        let registry = registry();
        let entry = registry.get("widget").unwrap();
        let mut values = ValueMap::new();
        values.insert("owner".into(), Value::from("x"));
        values.insert("color".into(), Value::from("red"));
        values.insert("id".into(), Value::Int(4));
        values.insert("org_id".into(), Value::Int(2));
        values.insert("Name".into(), Value::from("a"));
        values.insert("bogus".into(), Value::Int(1));

        let fragment = entry.insert_fragment(&values);
        assert_eq!(fragment.columns, vec!["name", "color"]);
        assert_eq!(fragment.params, vec![Value::from("a"), Value::from("red")]);
        assert_eq!(fragment.render_insert(), "(name, color) values (?, ?)");
        assert_eq!(entry.update_fragment(&values).render_update(), "name = ?, color = ?");
    }

    #[test]
    fn test_null_values_are_not_bound() {
        let mut builder = RegistryBuilder::new("org_id", "auth_user_id");
        builder
            .register(
                EntityDef::new("Event")
                    .field(FieldDef::int("ID").read_only())
                    .field(FieldDef::text("Title"))
                    .field(FieldDef::timestamp("SeenAt"))
                    .field(FieldDef::int("Rank")),
            )
            .unwrap();
        let registry = builder.build();
        let entry = registry.get("event").unwrap();

        let mut values = entry.zero_values();
        values.insert("title".into(), Value::from("boot"));
        values.insert("rank".into(), Value::Null);

        let fragment = entry.insert_fragment(&values);
        assert_eq!(fragment.columns, vec!["title", "seen_at", "rank"]);
        assert_eq!(fragment.params, vec![Value::from("boot")]);
        assert_eq!(
            fragment.render_insert(),
            "(title, seen_at, rank) values (?, null, null)"
        );
        assert_eq!(
            fragment.render_update(),
            "title = ?, seen_at = null, rank = null"
        );
    }

    #[test]
    fn test_decode_payload_reports_read_only_and_type_errors() {
        let registry = registry();
        let entry = registry.get("widget").unwrap();
        let payload = json!({"id": 3, "name": 7, "color": "red", "unknown": true});
        let err = entry
            .decode_payload(payload.as_object().unwrap())
            .unwrap_err();
        match err {
            DataAccessError::Validation { errors } => {
                assert_eq!(errors.get("id").unwrap(), "Cannot modify read only field");
                assert!(errors.contains_key("name"));
                assert!(!errors.contains_key("unknown"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_convert_and_expose() {
        let registry = registry();
        let entry = registry.get("widget").unwrap();
        let raw = json!({"id": 1, "name": "a", "color": "red", "secret": "s", "org_id": "2", "extra": 1});
        let rows = entry
            .convert(vec![raw.as_object().unwrap().clone()])
            .unwrap();
        assert_eq!(rows[0].get("org_id"), Some(&Value::Int(2)));
        assert!(rows[0].get("extra").is_none());

        let exposed = entry.to_exposed(rows);
        let keys: Vec<&str> = exposed[0].keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["id", "name", "color"]);
    }

    #[test]
    fn test_convert_reports_unparseable_values() {
        let registry = registry();
        let entry = registry.get("widget").unwrap();
        let raw = json!({"id": "abc"});
        let err = entry
            .convert(vec![raw.as_object().unwrap().clone()])
            .unwrap_err();
        assert!(matches!(err, DataAccessError::Conversion { column, .. } if column == "id"));
    }

    #[test]
    fn test_timestamp_formats() {
        assert!(parse_timestamp("2024-03-01T10:00:00Z").is_ok());
        assert!(parse_timestamp("2024-03-01 10:00:00").is_ok());
        assert!(parse_timestamp("2024-03-01 10:00:00.123+02:00").is_ok());
        assert!(parse_timestamp("yesterday").is_err());
    }
}
