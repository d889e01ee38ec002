//! Contract models for the data access service
//!
//! These models are transport-agnostic and used for inter-module communication.
//! NO serde derives - these are pure domain models.

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::fmt;

/// A single column value as it travels between callers, the engine and the store
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Only produced when converting stored rows
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// JSON rendering used when handing rows back to callers
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(v) => serde_json::Value::Bool(*v),
            Self::Int(v) => serde_json::Value::from(*v),
            Self::Float(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::Text(v) => serde_json::Value::String(v.clone()),
            Self::Timestamp(v) => {
                serde_json::Value::String(v.to_rfc3339_opts(SecondsFormat::Secs, true))
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, ""),
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Text(v) => write!(f, "{}", v),
            Self::Timestamp(v) => write!(f, "{}", v.to_rfc3339_opts(SecondsFormat::Secs, true)),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

/// Loosely-typed field map, insertion ordered
pub type ValueMap = IndexMap<String, Value>;

/// One converted result row
pub type TableRow = IndexMap<String, Value>;

/// Render a row as a JSON object
pub fn row_to_json(row: &TableRow) -> serde_json::Value {
    serde_json::Value::Object(
        row.iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    )
}

/// Operation a permission row grants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PermissionKind {
    Read,
    Create,
    Update,
    Delete,
}

impl PermissionKind {
    /// Parse the single-letter code stored in permission tables (r, c, u, d)
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "r" => Some(Self::Read),
            "c" => Some(Self::Create),
            "u" => Some(Self::Update),
            "d" => Some(Self::Delete),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Read => "r",
            Self::Create => "c",
            Self::Update => "u",
            Self::Delete => "d",
        }
    }
}

/// Column-scoped access rule
///
/// Maps a storage column to the literal values the caller may touch.
/// An empty map means unconditional access.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Condition {
    pub columns: BTreeMap<String, Vec<String>>,
}

impl Condition {
    /// Unconditional access
    pub fn unconditional() -> Self {
        Self::default()
    }

    pub fn is_unconditional(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Per-table access, one optional Condition per operation
///
/// `None` denies the operation entirely.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TablePermission {
    pub read: Option<Condition>,
    pub create: Option<Condition>,
    pub update: Option<Condition>,
    pub delete: Option<Condition>,
}

impl TablePermission {
    pub fn condition(&self, kind: PermissionKind) -> Option<&Condition> {
        match kind {
            PermissionKind::Read => self.read.as_ref(),
            PermissionKind::Create => self.create.as_ref(),
            PermissionKind::Update => self.update.as_ref(),
            PermissionKind::Delete => self.delete.as_ref(),
        }
    }

    pub fn condition_mut(&mut self, kind: PermissionKind) -> &mut Option<Condition> {
        match kind {
            PermissionKind::Read => &mut self.read,
            PermissionKind::Create => &mut self.create,
            PermissionKind::Update => &mut self.update,
            PermissionKind::Delete => &mut self.delete,
        }
    }
}

/// Permission matrix of one identity: table name -> TablePermission
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Permissions {
    pub tables: BTreeMap<String, TablePermission>,
}

/// Authenticated identity, cached for the lifetime of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserData {
    /// auth_user id
    pub id: i64,
    /// Session token issued at login
    pub token: String,
    /// Tenant the user belongs to
    pub org_id: i64,
    pub permissions: Permissions,
}

impl UserData {
    pub fn new(id: i64, org_id: i64, permissions: Permissions) -> Self {
        Self {
            id,
            token: String::new(),
            org_id,
            permissions,
        }
    }
}

/// Raw permission row, as loaded from a role or user permission table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionRow {
    pub id: i64,
    pub table_name: String,
    /// Empty means the grant is unconditional
    pub column_name: String,
    pub value: String,
    /// Raw kind code, validated at ingestion
    pub permission: String,
    /// Role id or user id the row belongs to
    pub scope_id: i64,
}

/// Parameters of a read
#[derive(Debug, Clone, PartialEq)]
pub struct ReadRequest {
    /// JSON array of filter operations, `Null` for none
    pub filters: serde_json::Value,
    pub from: i64,
    /// 0 means the configured maximum
    pub limit: i64,
    pub desc: bool,
    /// Empty sorts by `id`
    pub sort_by: String,
}

impl Default for ReadRequest {
    fn default() -> Self {
        Self {
            filters: serde_json::Value::Null,
            from: 0,
            limit: 0,
            desc: false,
            sort_by: String::new(),
        }
    }
}

impl ReadRequest {
    pub fn with_filters(filters: serde_json::Value) -> Self {
        Self {
            filters,
            ..Self::default()
        }
    }
}

/// Result of a successful create
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedRecord {
    pub id: i64,
    /// Set for tenant-scoped entities
    pub org_id: Option<i64>,
    /// Set for owner-scoped entities
    pub owner_id: Option<i64>,
    /// Stored values keyed by exposed name, without write-only fields
    pub fields: TableRow,
}
