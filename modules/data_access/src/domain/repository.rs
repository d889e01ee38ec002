//! Store traits
//!
//! These traits define the interface to the relational store and the session
//! store. Implementations are in infra/storage.

use crate::contract::{UserData, Value};
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Raw row as produced by the store: column -> driver value
pub type RawRow = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
    #[error("database error: {0}")]
    Database(String),
}

/// Parameterized access to the relational store
///
/// Statements use `?` placeholders; implementations adapt them to the
/// backend dialect.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Run a select and return raw rows
    async fn fetch(&self, sql: &str, params: Vec<Value>) -> Result<Vec<RawRow>, StoreError>;

    /// Run an update or delete and return the affected row count
    async fn execute(&self, sql: &str, params: Vec<Value>) -> Result<u64, StoreError>;

    /// Run an insert and return the generated id
    async fn insert(&self, sql: &str, params: Vec<Value>) -> Result<i64, StoreError>;
}

/// Key-value store holding sessions and one-time password tokens
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Identity stored under `key`, if present and not expired
    async fn get(&self, key: &str) -> Result<Option<UserData>>;

    /// Store an identity under `key` for `ttl`
    async fn put(&self, key: &str, identity: &UserData, ttl: Duration) -> Result<()>;

    /// Remove keys; missing keys are ignored
    async fn delete(&self, keys: &[String]) -> Result<()>;

    /// Store a one-time password token for a user
    async fn put_password_token(&self, token: &str, user_id: i64, ttl: Duration) -> Result<()>;

    /// Consume a password token, returning the user it was issued for
    async fn take_password_token(&self, token: &str) -> Result<Option<i64>>;
}
