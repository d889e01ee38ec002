//! Domain service - CRUD engine
//!
//! Every operation follows the same pipeline: validate input, resolve the
//! existing row (update/delete), authorize, build the statement, execute,
//! reshape the result into exposed field names.
//!
//! Authorization precedence: the super-user has full access and bypasses
//! tenant scoping; the owner of a row has full access to that row; everyone
//! else goes through the permission matrix plus the tenant predicate.

use crate::config::Config;
use crate::contract::{
    CreatedRecord, DataAccessError, PermissionKind, PermissionRow, Permissions, ReadRequest,
    TableRow, UserData, Value, ValueMap,
};
use crate::domain::entities::AUTH_USER_TABLE;
use crate::domain::filter::{compile, parse_operations};
use crate::domain::permission::{PermissionRowError, PermissionRules};
use crate::domain::repository::{RelationalStore, StoreError};
use crate::domain::schema::{FieldKind, SchemaEntry, SchemaRegistry, WriteMode};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Payload key through which the super-user sets the tenant of a row
const ORG_KEY: &str = "org";
/// Payload key through which the super-user sets the owner of a row
const OWNER_KEY: &str = "owner";
/// Column of a user grant naming the user it is for
const GRANTEE_COLUMN: &str = "auth_user_id";

/// Raw org/owner overrides taken out of a payload
#[derive(Debug, Default)]
struct ScopeOverrides {
    org: Option<serde_json::Value>,
    owner: Option<serde_json::Value>,
}

/// Tenant and owner written alongside the payload
#[derive(Debug, Default)]
struct Scope {
    org: Option<i64>,
    owner: Option<i64>,
}

/// Domain service for permission-aware data access
pub struct Service {
    registry: Arc<SchemaRegistry>,
    store: Arc<dyn RelationalStore>,
    config: Config,
}

impl Service {
    /// Create a new service instance
    pub fn new(
        registry: Arc<SchemaRegistry>,
        store: Arc<dyn RelationalStore>,
        config: Config,
    ) -> Self {
        Self {
            registry,
            store,
            config,
        }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_super_user(&self, identity: &UserData) -> bool {
        identity.id == self.config.super_user_id
    }

    /// Identity used for internal lookups (login, password resets)
    pub fn super_user(&self) -> UserData {
        UserData::new(
            self.config.super_user_id,
            self.config.super_user_org,
            Permissions::default(),
        )
    }

    /// Validates permission rows against this registry
    pub fn permission_rules(&self) -> PermissionRules<'_> {
        PermissionRules::new(
            &self.registry,
            &self.config.org_column,
            &self.config.owner_column,
        )
    }

    fn entry(&self, table: &str) -> Result<Arc<SchemaEntry>, DataAccessError> {
        self.registry.get(table).cloned().ok_or_else(|| {
            tracing::debug!("{} is not registered", table);
            DataAccessError::NotFound {
                resource: "table".to_string(),
                id: table.to_string(),
            }
        })
    }

    // ===== Read =====

    /// Read rows visible to `identity`, keyed by exposed field names
    pub async fn read(
        &self,
        table: &str,
        request: &ReadRequest,
        identity: &UserData,
    ) -> Result<Vec<TableRow>, DataAccessError> {
        let entry = self.entry(table)?;
        let rows = self.read_stored(table, request, identity).await?;
        Ok(entry.to_exposed(rows))
    }

    /// Same as [`Service::read`] but rows stay keyed by storage column and
    /// keep write-only fields
    pub async fn read_stored(
        &self,
        table: &str,
        request: &ReadRequest,
        identity: &UserData,
    ) -> Result<Vec<TableRow>, DataAccessError> {
        let entry = self.entry(table)?;

        let mut errors = BTreeMap::new();
        if request.from < 0 {
            errors.insert("from".to_string(), "must not be negative".to_string());
        }
        if request.limit < 0 {
            errors.insert("limit".to_string(), "must not be negative".to_string());
        }
        if !errors.is_empty() {
            return Err(DataAccessError::Validation { errors });
        }
        let limit = if request.limit == 0 || request.limit > self.config.max_read_limit {
            self.config.max_read_limit
        } else {
            request.limit
        };

        let sort_column = if request.sort_by.is_empty() {
            "id".to_string()
        } else {
            entry
                .field(&request.sort_by)
                .filter(|f| f.readable && !f.reference)
                .map(|f| f.column.clone())
                .ok_or_else(|| DataAccessError::InvalidField {
                    field: request.sort_by.clone(),
                })?
        };

        let operations = parse_operations(&request.filters)?;
        let filter = compile(&operations, &entry)?;

        let mut clauses = Vec::new();
        let mut params = Vec::new();
        if !filter.is_empty() {
            clauses.push(format!("({})", filter.predicate));
            params.extend(filter.params);
        }

        if !self.is_super_user(identity) {
            let access = identity.permissions.has_read_access(&entry).ok_or_else(|| {
                tracing::debug!("User {} does not have read access to {}", identity.id, table);
                DataAccessError::unauthorized(format!("no read access to {}", table))
            })?;

            if entry.is_tenant_scoped() {
                if identity.org_id <= 0 {
                    tracing::debug!("User {} has no valid org, denying read", identity.id);
                    return Err(DataAccessError::unauthorized("invalid org"));
                }
                clauses.push(format!("{}.{} = ?", table, self.config.org_column));
                params.push(Value::Int(identity.org_id));
            }

            if !access.is_empty() {
                if entry.is_owner_scoped() {
                    clauses.push(format!(
                        "(({}) or {}.{} = ?)",
                        access.sql, table, self.config.owner_column
                    ));
                    params.extend(access.params);
                    params.push(Value::Int(identity.id));
                } else {
                    clauses.push(format!("({})", access.sql));
                    params.extend(access.params);
                }
            }
        }

        let condition = if clauses.is_empty() {
            String::new()
        } else {
            format!(" where {}", clauses.join(" and "))
        };
        let sql = format!(
            "select {} from {}{} order by {}.{} {} limit {} offset {}",
            entry.read_columns(),
            table,
            condition,
            table,
            sort_column,
            if request.desc { "desc" } else { "asc" },
            limit,
            request.from
        );
        tracing::debug!(sql = %sql, "Read");

        let raw = self
            .store
            .fetch(&sql, params)
            .await
            .map_err(|e| store_error(&entry, e))?;
        entry.convert(raw)
    }

    // ===== Create =====

    /// Insert one row from a JSON object payload
    pub async fn create(
        &self,
        table: &str,
        payload: &serde_json::Value,
        identity: &UserData,
    ) -> Result<CreatedRecord, DataAccessError> {
        let entry = self.entry(table)?;
        let mut object = payload_object(payload)?;
        let overrides = take_overrides(&entry, &mut object);
        let supplied = entry.decode_payload(&object)?;

        let mut values = entry.zero_values();
        for (column, value) in &supplied {
            values.insert(column.clone(), value.clone());
        }
        entry
            .validator()
            .validate(&supplied, &values, WriteMode::Create)?;

        let scope = self.resolve_scope(&entry, overrides, identity, WriteMode::Create)?;

        if !self.is_super_user(identity) {
            identity
                .permissions
                .check_write(&entry, &values, PermissionKind::Create)?;
        }
        if entry.has_permission_rows() {
            self.check_grant(&values, identity).await?;
        }
        self.check_unique(&entry, &supplied, None).await?;

        if let Some(transform) = entry.transform() {
            transform.apply(&mut values, WriteMode::Create)?;
        }

        let mut fragment = entry.insert_fragment(&values);
        if let Some(org) = scope.org {
            fragment.push(&self.config.org_column, Value::Int(org));
        }
        if let Some(owner) = scope.owner {
            fragment.push(&self.config.owner_column, Value::Int(owner));
        }
        let sql = format!("insert into {} {}", table, fragment.render_insert());
        tracing::debug!(sql = %sql, "Insert");

        let id = self
            .store
            .insert(&sql, fragment.params)
            .await
            .map_err(|e| store_error(&entry, e))?;

        let mut row = TableRow::new();
        row.insert("id".to_string(), Value::Int(id));
        row.extend(values);
        if let Some(org) = scope.org {
            row.insert(self.config.org_column.clone(), Value::Int(org));
        }
        if let Some(owner) = scope.owner {
            row.insert(self.config.owner_column.clone(), Value::Int(owner));
        }

        tracing::info!(table, id, user_id = identity.id, "Record created");
        Ok(CreatedRecord {
            id,
            org_id: scope.org,
            owner_id: scope.owner,
            fields: entry.row_to_exposed(row),
        })
    }

    // ===== Update =====

    /// Update one row; returns the changed fields as supplied by the caller
    pub async fn update(
        &self,
        table: &str,
        id: i64,
        payload: &serde_json::Value,
        identity: &UserData,
    ) -> Result<TableRow, DataAccessError> {
        let entry = self.entry(table)?;
        if id <= 0 {
            return Err(DataAccessError::validation("id", "object id invalid"));
        }
        let mut object = payload_object(payload)?;
        let existing = self.find_by_id(&entry, id).await?;

        if object.len() > self.config.max_update_fields {
            return Err(DataAccessError::validation(
                "payload",
                format!(
                    "Cannot modify more than {} fields in a single update",
                    self.config.max_update_fields
                ),
            ));
        }

        let overrides = take_overrides(&entry, &mut object);
        let mut supplied = entry.decode_payload(&object)?;
        entry
            .validator()
            .validate(&supplied, &supplied, WriteMode::Update)?;

        if entry.has_permission_rows() {
            let mut merged = existing.clone();
            merged.extend(supplied.clone());
            self.check_grant(&merged, identity).await?;
        }

        let scope = self.resolve_scope(&entry, overrides, identity, WriteMode::Update)?;
        let super_user = self.is_super_user(identity);
        let mut restriction = None;
        if super_user {
            tracing::debug!("User {} is super-user, granting update on {}", identity.id, table);
        } else if self.is_owner(&entry, &existing, identity) {
            tracing::debug!("User {} owns {} in {}, granting update", identity.id, id, table);
        } else {
            identity
                .permissions
                .check_write(&entry, &supplied, PermissionKind::Update)?;
            // the current row must also satisfy the update condition
            restriction = identity
                .permissions
                .row_predicate(&entry, PermissionKind::Update)
                .filter(|access| !access.is_empty());
        }
        self.check_unique(&entry, &supplied, Some(id)).await?;

        let mut changed = supplied.clone();
        if let Some(transform) = entry.transform() {
            transform.apply(&mut supplied, WriteMode::Update)?;
        }

        let mut fragment = entry.update_fragment(&supplied);
        if let Some(org) = scope.org {
            fragment.push(&self.config.org_column, Value::Int(org));
            changed.insert(self.config.org_column.clone(), Value::Int(org));
        }
        if let Some(owner) = scope.owner {
            fragment.push(&self.config.owner_column, Value::Int(owner));
            changed.insert(self.config.owner_column.clone(), Value::Int(owner));
        }
        if fragment.is_empty() {
            return Err(DataAccessError::validation(
                "payload",
                "no updatable fields supplied",
            ));
        }

        let mut sql = format!("update {} set {} where id = ?", table, fragment.render_update());
        let mut params = fragment.params;
        params.push(Value::Int(id));
        if !super_user && entry.is_tenant_scoped() {
            sql.push_str(&format!(" and {} = ?", self.config.org_column));
            params.push(Value::Int(identity.org_id));
        }
        if let Some(access) = restriction {
            sql.push_str(&format!(" and ({})", access.sql));
            params.extend(access.params);
        }
        tracing::debug!(sql = %sql, "Update");

        let affected = self
            .store
            .execute(&sql, params)
            .await
            .map_err(|e| store_error(&entry, e))?;
        if affected == 0 {
            return Err(self.nothing_affected(&entry, id, identity));
        }

        tracing::info!(table, id, user_id = identity.id, "Record updated");
        Ok(entry.row_to_exposed(changed))
    }

    // ===== Delete =====

    /// Delete one row
    pub async fn delete(
        &self,
        table: &str,
        id: i64,
        identity: &UserData,
    ) -> Result<(), DataAccessError> {
        let entry = self.entry(table)?;
        if id <= 0 {
            return Err(DataAccessError::validation("id", "object id invalid"));
        }
        let existing = self.find_by_id(&entry, id).await?;

        let mut sql = format!("delete from {} where id = ?", table);
        let mut params = vec![Value::Int(id)];

        if !self.is_super_user(identity) {
            if entry.is_tenant_scoped() {
                sql.push_str(&format!(" and {} = ?", self.config.org_column));
                params.push(Value::Int(identity.org_id));
            }
            if self.is_owner(&entry, &existing, identity) {
                tracing::debug!("User {} owns {} in {}, granting delete", identity.id, id, table);
            } else {
                let access = identity.permissions.has_delete_access(&entry).ok_or_else(|| {
                    DataAccessError::unauthorized(format!("no delete access to {}", table))
                })?;
                if !access.is_empty() {
                    sql.push_str(&format!(" and ({})", access.sql));
                    params.extend(access.params);
                }
            }
        }
        tracing::debug!(sql = %sql, "Delete");

        let affected = self
            .store
            .execute(&sql, params)
            .await
            .map_err(|e| store_error(&entry, e))?;
        if affected == 0 {
            return Err(self.nothing_affected(&entry, id, identity));
        }

        tracing::info!(table, id, user_id = identity.id, "Record deleted");
        Ok(())
    }

    // ===== Helpers =====

    async fn find_by_id(&self, entry: &SchemaEntry, id: i64) -> Result<TableRow, DataAccessError> {
        let sql = format!(
            "select {} from {} where id = ?",
            entry.read_columns(),
            entry.table()
        );
        let raw = self
            .store
            .fetch(&sql, vec![Value::Int(id)])
            .await
            .map_err(|e| store_error(entry, e))?;
        entry
            .convert(raw)?
            .into_iter()
            .next()
            .ok_or_else(|| DataAccessError::NotFound {
                resource: entry.table().to_string(),
                id: id.to_string(),
            })
    }

    fn is_owner(&self, entry: &SchemaEntry, row: &TableRow, identity: &UserData) -> bool {
        entry.is_owner_scoped()
            && row.get(&self.config.owner_column).and_then(Value::as_i64) == Some(identity.id)
    }

    /// A permission-gated statement matched no row
    fn nothing_affected(&self, entry: &SchemaEntry, id: i64, identity: &UserData) -> DataAccessError {
        if self.is_super_user(identity) {
            DataAccessError::NotFound {
                resource: entry.table().to_string(),
                id: id.to_string(),
            }
        } else {
            tracing::debug!("No row of {} matched for user {}", entry.table(), identity.id);
            DataAccessError::unauthorized(format!("row {} of {} is not accessible", id, entry.table()))
        }
    }

    /// Advisory uniqueness pre-check over the supplied unique fields
    async fn check_unique(
        &self,
        entry: &SchemaEntry,
        supplied: &ValueMap,
        exclude: Option<i64>,
    ) -> Result<(), DataAccessError> {
        let mut clauses = Vec::new();
        let mut params = Vec::new();
        let mut fields = Vec::new();

        for field in entry.fields().iter().filter(|f| f.unique && !f.reference) {
            let Some(value) = supplied.get(&field.column) else {
                continue;
            };
            if value.is_null() || value.as_str() == Some("") {
                continue;
            }
            clauses.push(format!("{} = ?", field.column));
            params.push(value.clone());
            fields.push(field.label().to_string());
        }
        if clauses.is_empty() {
            return Ok(());
        }

        let mut sql = format!(
            "select id from {} where ({})",
            entry.table(),
            clauses.join(" or ")
        );
        if let Some(id) = exclude {
            sql.push_str(" and id <> ?");
            params.push(Value::Int(id));
        }
        sql.push_str(" limit 1");
        tracing::debug!(sql = %sql, "Unique check");

        let rows = self
            .store
            .fetch(&sql, params)
            .await
            .map_err(|e| store_error(entry, e))?;
        if rows.is_empty() {
            Ok(())
        } else {
            Err(DataAccessError::DuplicateEntry { fields })
        }
    }

    fn resolve_scope(
        &self,
        entry: &SchemaEntry,
        overrides: ScopeOverrides,
        identity: &UserData,
        mode: WriteMode,
    ) -> Result<Scope, DataAccessError> {
        if self.is_super_user(identity) {
            let org = match overrides.org {
                Some(raw) => Some(parse_override(ORG_KEY, &raw)?),
                None if mode == WriteMode::Create && entry.is_tenant_scoped() => {
                    tracing::error!("missing org in request from super-user");
                    return Err(DataAccessError::validation(ORG_KEY, "missing org in input"));
                }
                None => None,
            };
            let owner = match overrides.owner {
                Some(raw) => Some(parse_override(OWNER_KEY, &raw)?),
                None if mode == WriteMode::Create && entry.is_owner_scoped() => Some(identity.id),
                None => None,
            };
            return Ok(Scope { org, owner });
        }

        if overrides.org.is_some() || overrides.owner.is_some() {
            tracing::debug!("Ignoring org/owner override from user {}", identity.id);
        }
        if mode == WriteMode::Update {
            return Ok(Scope::default());
        }

        let org = if entry.is_tenant_scoped() {
            if identity.org_id <= 0 {
                return Err(DataAccessError::unauthorized("invalid org"));
            }
            Some(identity.org_id)
        } else {
            None
        };
        let owner = entry.is_owner_scoped().then_some(identity.id);
        Ok(Scope { org, owner })
    }

    /// Writes to permission tables must describe a valid grant. Only the
    /// super-user may grant what they do not hold or grant to a user of
    /// another org.
    async fn check_grant(
        &self,
        values: &ValueMap,
        identity: &UserData,
    ) -> Result<(), DataAccessError> {
        let text = |column: &str| values.get(column).map(|v| v.to_string()).unwrap_or_default();
        let row = PermissionRow {
            id: 0,
            table_name: text("table_name"),
            column_name: text("column_name"),
            value: text("value"),
            permission: text("permission"),
            scope_id: 0,
        };

        let super_user = self.is_super_user(identity);
        let (kind, column) = self
            .permission_rules()
            .validate(&row, super_user)
            .map_err(|reason| match reason {
                PermissionRowError::RestrictedTable(_) => {
                    DataAccessError::unauthorized(reason.to_string())
                }
                _ => DataAccessError::validation("permission", reason.to_string()),
            })?;

        if !super_user && !identity.permissions.holds(&row.table_name, kind, &column, &row.value) {
            tracing::debug!(
                "User {} tried to grant {} on {} without holding it",
                identity.id,
                kind.code(),
                row.table_name
            );
            return Err(DataAccessError::unauthorized(format!(
                "cannot grant {} on {} without holding it",
                kind.code(),
                row.table_name
            )));
        }

        if let Some(target) = values.get(GRANTEE_COLUMN).and_then(Value::as_i64) {
            if !super_user {
                self.check_grantee_org(target, identity).await?;
            }
        }
        Ok(())
    }

    async fn check_grantee_org(&self, target: i64, identity: &UserData) -> Result<(), DataAccessError> {
        let users = self.entry(AUTH_USER_TABLE)?;
        let target_org = match self.find_by_id(&users, target).await {
            Ok(row) => row.get(&self.config.org_column).and_then(Value::as_i64),
            Err(DataAccessError::NotFound { .. }) => None,
            Err(e) => return Err(e),
        };
        if target_org != Some(identity.org_id) {
            tracing::debug!(
                "User {} of org {} tried to grant to user {} outside it",
                identity.id,
                identity.org_id,
                target
            );
            return Err(DataAccessError::unauthorized(format!(
                "user {} is not in your org",
                target
            )));
        }
        Ok(())
    }
}

fn payload_object(
    payload: &serde_json::Value,
) -> Result<serde_json::Map<String, serde_json::Value>, DataAccessError> {
    payload
        .as_object()
        .cloned()
        .ok_or_else(|| DataAccessError::validation("payload", "must be a JSON object"))
}

/// Remove the org/owner control keys from a payload of a scoped entity
fn take_overrides(
    entry: &SchemaEntry,
    object: &mut serde_json::Map<String, serde_json::Value>,
) -> ScopeOverrides {
    let mut overrides = ScopeOverrides::default();
    if entry.is_tenant_scoped() && entry.field(ORG_KEY).is_none() {
        overrides.org = object.remove(ORG_KEY);
    }
    if entry.is_owner_scoped() && entry.field(OWNER_KEY).is_none() {
        overrides.owner = object.remove(OWNER_KEY);
    }
    overrides
}

fn parse_override(key: &str, raw: &serde_json::Value) -> Result<i64, DataAccessError> {
    match FieldKind::Int.convert(raw) {
        Ok(Value::Int(v)) if v > 0 => Ok(v),
        _ => {
            tracing::error!("Invalid format for {}", key);
            Err(DataAccessError::validation(key, format!("Invalid format for {}", key)))
        }
    }
}

fn store_error(entry: &SchemaEntry, err: StoreError) -> DataAccessError {
    match err {
        StoreError::UniqueViolation(detail) => {
            tracing::debug!(table = %entry.table(), %detail, "Unique constraint violated");
            let fields = entry
                .fields()
                .iter()
                .filter(|f| f.unique)
                .map(|f| f.label().to_string())
                .collect();
            DataAccessError::DuplicateEntry { fields }
        }
        StoreError::Database(message) => {
            tracing::error!(table = %entry.table(), %message, "Store failure");
            DataAccessError::Store { message }
        }
    }
}
