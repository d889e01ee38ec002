//! Native client implementation - wraps the domain services for in-process calls

use crate::contract::{CreatedRecord, DataAccessApi, DataAccessError, ReadRequest, TableRow, UserData};
use crate::domain::{AuthService, Service};
use async_trait::async_trait;
use std::sync::Arc;

/// Native client that calls the CRUD engine and the session service directly
#[derive(Clone)]
pub struct NativeClient {
    service: Arc<Service>,
    auth: Arc<AuthService>,
}

impl NativeClient {
    pub fn new(service: Arc<Service>, auth: Arc<AuthService>) -> Self {
        Self { service, auth }
    }
}

#[async_trait]
impl DataAccessApi for NativeClient {
    async fn authorize(&self, token: &str) -> Result<UserData, DataAccessError> {
        self.auth.authorize(token).await
    }

    async fn login(&self, username: &str, password: &str) -> Result<String, DataAccessError> {
        let identity = self.auth.login(username, password).await?;
        Ok(identity.token)
    }

    async fn logout(&self, identity: &UserData) -> Result<(), DataAccessError> {
        self.auth.logout(identity).await
    }

    async fn create(
        &self,
        table: &str,
        payload: serde_json::Value,
        identity: &UserData,
    ) -> Result<CreatedRecord, DataAccessError> {
        self.service.create(table, &payload, identity).await
    }

    async fn read(
        &self,
        table: &str,
        request: ReadRequest,
        identity: &UserData,
    ) -> Result<Vec<TableRow>, DataAccessError> {
        self.service.read(table, &request, identity).await
    }

    async fn update(
        &self,
        table: &str,
        id: i64,
        payload: serde_json::Value,
        identity: &UserData,
    ) -> Result<TableRow, DataAccessError> {
        self.service.update(table, id, &payload, identity).await
    }

    async fn delete(&self, table: &str, id: i64, identity: &UserData) -> Result<(), DataAccessError> {
        self.service.delete(table, id, identity).await
    }
}
