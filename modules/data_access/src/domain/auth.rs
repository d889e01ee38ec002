//! Authentication and sessions
//!
//! Login verifies credentials against `auth_user`, merges the role and user
//! permission rows into a permission matrix and caches the resulting identity
//! in the session store under both the user id and the session token.

use crate::contract::{
    CreatedRecord, DataAccessError, PermissionRow, ReadRequest, TableRow, UserData, Value,
};
use crate::domain::entities::{
    verify_password, AUTH_USER_TABLE, USER_PERMISSION_TABLE, USER_ROLE_PERMISSION_TABLE,
};
use crate::domain::repository::SessionStore;
use crate::domain::service::Service;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const USER_ID_KEY: &str = "USER_ID_KEY:";
pub const USER_UUID_KEY: &str = "USER_UUID_KEY:";

pub struct AuthService {
    service: Arc<Service>,
    sessions: Arc<dyn SessionStore>,
}

impl AuthService {
    pub fn new(service: Arc<Service>, sessions: Arc<dyn SessionStore>) -> Self {
        Self { service, sessions }
    }

    fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.service.config().session_ttl_hours * 3600)
    }

    fn password_token_ttl(&self) -> Duration {
        Duration::from_secs(self.service.config().password_token_ttl_hours * 3600)
    }

    /// Resolve a session token to its identity
    pub async fn authorize(&self, token: &str) -> Result<UserData, DataAccessError> {
        if token.is_empty() {
            return Err(DataAccessError::Unauthenticated);
        }
        self.sessions
            .get(&format!("{}{}", USER_UUID_KEY, token))
            .await
            .map_err(session_error)?
            .ok_or(DataAccessError::Unauthenticated)
    }

    /// Verify credentials and open a session
    ///
    /// A new login replaces the previous session of the same user.
    pub async fn login(&self, username: &str, password: &str) -> Result<UserData, DataAccessError> {
        let super_user = self.service.super_user();
        let request = ReadRequest::with_filters(json!([
            {"name": "username", "value": username, "op": "="}
        ]));
        let users = self
            .service
            .read_stored(AUTH_USER_TABLE, &request, &super_user)
            .await?;

        let [user] = users.as_slice() else {
            tracing::debug!("Login for {} matched {} users", username, users.len());
            return Err(DataAccessError::Unauthenticated);
        };
        let hash = user.get("password").and_then(Value::as_str).unwrap_or_default();
        if hash.is_empty() || !verify_password(password, hash) {
            tracing::debug!("Invalid password for {}", username);
            return Err(DataAccessError::Unauthenticated);
        }

        let config = self.service.config();
        let id = int_column(user, "id");
        let org_id = int_column(user, &config.org_column);
        let role_id = int_column(user, "user_role_id");

        let role_rows = self
            .load_permission_rows(USER_ROLE_PERMISSION_TABLE, "user_role_id", role_id, None)
            .await?;
        let user_rows = self
            .load_permission_rows(USER_PERMISSION_TABLE, "auth_user_id", id, Some(org_id))
            .await?;
        let permissions = self.service.permission_rules().cache_permissions(
            id == config.super_user_id,
            &role_rows,
            &user_rows,
        );

        let identity = UserData {
            id,
            token: Uuid::new_v4().to_string(),
            org_id,
            permissions,
        };

        let id_key = format!("{}{}", USER_ID_KEY, id);
        if let Some(previous) = self.sessions.get(&id_key).await.map_err(session_error)? {
            self.sessions
                .delete(&[format!("{}{}", USER_UUID_KEY, previous.token)])
                .await
                .map_err(session_error)?;
        }
        let ttl = self.session_ttl();
        self.sessions
            .put(&id_key, &identity, ttl)
            .await
            .map_err(session_error)?;
        self.sessions
            .put(&format!("{}{}", USER_UUID_KEY, identity.token), &identity, ttl)
            .await
            .map_err(session_error)?;

        tracing::info!(user_id = id, org_id, "User logged in");
        Ok(identity)
    }

    /// Drop both session keys of the identity
    pub async fn logout(&self, identity: &UserData) -> Result<(), DataAccessError> {
        self.sessions
            .delete(&[
                format!("{}{}", USER_ID_KEY, identity.id),
                format!("{}{}", USER_UUID_KEY, identity.token),
            ])
            .await
            .map_err(session_error)?;
        tracing::info!(user_id = identity.id, "User logged out");
        Ok(())
    }

    /// Create a user and issue the one-time token used to set its password
    pub async fn create_user(
        &self,
        payload: &serde_json::Value,
        creator: &UserData,
    ) -> Result<(CreatedRecord, String), DataAccessError> {
        let created = self.service.create(AUTH_USER_TABLE, payload, creator).await?;
        let token = self.issue_password_token(created.id).await?;
        Ok((created, token))
    }

    pub async fn issue_password_token(&self, user_id: i64) -> Result<String, DataAccessError> {
        let token = Uuid::new_v4().to_string();
        self.sessions
            .put_password_token(&token, user_id, self.password_token_ttl())
            .await
            .map_err(session_error)?;
        Ok(token)
    }

    /// Consume a password token and store the new password
    pub async fn set_password(&self, token: &str, password: &str) -> Result<(), DataAccessError> {
        if password.is_empty() {
            return Err(DataAccessError::validation("password", "required"));
        }
        let user_id = self
            .sessions
            .take_password_token(token)
            .await
            .map_err(session_error)?
            .ok_or(DataAccessError::Unauthenticated)?;

        let super_user = self.service.super_user();
        self.service
            .update(
                AUTH_USER_TABLE,
                user_id,
                &json!({ "password": password }),
                &super_user,
            )
            .await?;
        tracing::info!(user_id, "Password set");
        Ok(())
    }

    /// Grant rows of one user or role; user grants only count inside the
    /// user's own org
    async fn load_permission_rows(
        &self,
        table: &str,
        scope_column: &str,
        scope_id: i64,
        org_id: Option<i64>,
    ) -> Result<Vec<PermissionRow>, DataAccessError> {
        if scope_id <= 0 {
            return Ok(Vec::new());
        }
        let filters = match org_id {
            Some(org_id) => json!([
                {"name": scope_column, "value": scope_id, "op": "=", "next_op": "and"},
                {"name": self.service.config().org_column, "value": org_id, "op": "="}
            ]),
            None => json!([{"name": scope_column, "value": scope_id, "op": "="}]),
        };
        let super_user = self.service.super_user();
        let page = self.service.config().max_read_limit;
        let mut rows = Vec::new();
        let mut from = 0;

        loop {
            let request = ReadRequest {
                filters: filters.clone(),
                from,
                limit: page,
                ..ReadRequest::default()
            };
            let batch = self
                .service
                .read_stored(table, &request, &super_user)
                .await?;
            let fetched = batch.len() as i64;
            rows.extend(batch.iter().map(|row| PermissionRow {
                id: int_column(row, "id"),
                table_name: text_column(row, "table_name"),
                column_name: text_column(row, "column_name"),
                value: text_column(row, "value"),
                permission: text_column(row, "permission"),
                scope_id,
            }));
            if fetched < page {
                break;
            }
            from += page;
        }
        Ok(rows)
    }
}

fn int_column(row: &TableRow, column: &str) -> i64 {
    row.get(column).and_then(Value::as_i64).unwrap_or(0)
}

fn text_column(row: &TableRow, column: &str) -> String {
    row.get(column).map(|v| v.to_string()).unwrap_or_default()
}

fn session_error(err: anyhow::Error) -> DataAccessError {
    tracing::error!("Session store failure: {}", err);
    DataAccessError::store(err.to_string())
}
