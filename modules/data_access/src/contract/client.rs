//! Native client trait for inter-module communication
//!
//! This trait defines the API that other modules use to read and write
//! registered tables on behalf of an authenticated identity.
//! NO HTTP - direct function calls.

use super::{
    error::DataAccessError,
    model::{CreatedRecord, ReadRequest, TableRow, UserData},
};
use async_trait::async_trait;

/// Data access API for inter-module communication
#[async_trait]
pub trait DataAccessApi: Send + Sync {
    // ===== Session Operations =====

    /// Resolve a session token to its cached identity
    async fn authorize(&self, token: &str) -> Result<UserData, DataAccessError>;

    /// Verify credentials and open a session, returning the token
    async fn login(&self, username: &str, password: &str) -> Result<String, DataAccessError>;

    /// Close the session of the given identity
    async fn logout(&self, identity: &UserData) -> Result<(), DataAccessError>;

    // ===== Record Operations =====

    /// Insert one row built from a JSON object payload
    async fn create(
        &self,
        table: &str,
        payload: serde_json::Value,
        identity: &UserData,
    ) -> Result<CreatedRecord, DataAccessError>;

    /// Read rows visible to the identity, keyed by exposed field names
    async fn read(
        &self,
        table: &str,
        request: ReadRequest,
        identity: &UserData,
    ) -> Result<Vec<TableRow>, DataAccessError>;

    /// Update one row and return the changed fields
    async fn update(
        &self,
        table: &str,
        id: i64,
        payload: serde_json::Value,
        identity: &UserData,
    ) -> Result<TableRow, DataAccessError>;

    /// Delete one row
    async fn delete(&self, table: &str, id: i64, identity: &UserData)
        -> Result<(), DataAccessError>;
}
