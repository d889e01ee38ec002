//! SeaORM relational store
//!
//! Runs the engine's parameterized statements on a `DatabaseConnection`.
//! Rows come back as JSON objects so any registered table can be read
//! without a compiled entity.

use crate::contract::Value;
use crate::domain::repository::{RawRow, RelationalStore, StoreError};
use async_trait::async_trait;
use sea_orm::{
    ConnectionTrait, DatabaseBackend, DatabaseConnection, DbErr, FromQueryResult, JsonValue,
    SqlErr, Statement,
};
use std::sync::Arc;

pub struct SeaOrmStore {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    fn statement(&self, sql: &str, params: Vec<Value>) -> Statement {
        let backend = self.db.get_database_backend();
        let sql = match backend {
            DatabaseBackend::Postgres => number_placeholders(sql),
            _ => sql.to_string(),
        };
        Statement::from_sql_and_values(backend, sql, params.into_iter().map(to_db_value))
    }

    async fn fetch_json(&self, stmt: Statement) -> Result<Vec<RawRow>, StoreError> {
        let rows = JsonValue::find_by_statement(stmt)
            .all(&*self.db)
            .await
            .map_err(db_error)?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match row {
                JsonValue::Object(map) => Some(map),
                _ => None,
            })
            .collect())
    }
}

#[async_trait]
impl RelationalStore for SeaOrmStore {
    async fn fetch(&self, sql: &str, params: Vec<Value>) -> Result<Vec<RawRow>, StoreError> {
        self.fetch_json(self.statement(sql, params)).await
    }

    async fn execute(&self, sql: &str, params: Vec<Value>) -> Result<u64, StoreError> {
        let result = self
            .db
            .execute(self.statement(sql, params))
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected())
    }

    async fn insert(&self, sql: &str, params: Vec<Value>) -> Result<i64, StoreError> {
        match self.db.get_database_backend() {
            DatabaseBackend::Postgres => {
                let stmt = self.statement(&format!("{} returning id", sql), params);
                let rows = self.fetch_json(stmt).await?;
                rows.first()
                    .and_then(|row| row.get("id"))
                    .and_then(|id| id.as_i64())
                    .ok_or_else(|| StoreError::Database("insert returned no id".to_string()))
            }
            _ => {
                let result = self
                    .db
                    .execute(self.statement(sql, params))
                    .await
                    .map_err(db_error)?;
                Ok(result.last_insert_id() as i64)
            }
        }
    }
}

/// `?` placeholders to PostgreSQL `$n`
fn number_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut n = 0;
    for c in sql.chars() {
        if c == '?' {
            n += 1;
            out.push('$');
            out.push_str(&n.to_string());
        } else {
            out.push(c);
        }
    }
    out
}

fn to_db_value(value: Value) -> sea_orm::Value {
    match value {
        Value::Null => sea_orm::Value::String(None),
        Value::Bool(v) => v.into(),
        Value::Int(v) => v.into(),
        Value::Float(v) => v.into(),
        Value::Text(v) => v.into(),
        Value::Timestamp(v) => v.into(),
    }
}

fn db_error(err: DbErr) -> StoreError {
    if let Some(SqlErr::UniqueConstraintViolation(detail)) = err.sql_err() {
        return StoreError::UniqueViolation(detail);
    }
    StoreError::Database(err.to_string())
}
