//! Module declaration and lifecycle

use crate::api::native::NativeClient;
use crate::config::Config;
use crate::contract::DataAccessApi;
use crate::domain::entities::builtin_entities;
use crate::domain::{AuthService, EntityDef, RegistryBuilder, Service, SessionStore};
use crate::infra::storage::migrations::Migrator;
use crate::infra::storage::{InMemorySessionStore, SeaOrmStore};
use anyhow::{Context, Result};
use parking_lot::RwLock;
use sea_orm::{Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use std::sync::Arc;

/// Data access module
pub struct DataAccessModule {
    config: RwLock<Config>,
    service: RwLock<Option<Arc<Service>>>,
    auth: RwLock<Option<Arc<AuthService>>>,
}

impl Default for DataAccessModule {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl DataAccessModule {
    pub fn new(config: Config) -> Self {
        Self {
            config: RwLock::new(config),
            service: RwLock::new(None),
            auth: RwLock::new(None),
        }
    }

    /// Open a database connection
    pub async fn connect(url: &str) -> Result<Arc<DatabaseConnection>> {
        let db = Database::connect(url)
            .await
            .with_context(|| format!("failed to connect to {}", url))?;
        Ok(Arc::new(db))
    }

    /// Run the account table migrations
    pub async fn migrate(db: &DatabaseConnection) -> Result<()> {
        Migrator::up(db, None).await?;
        tracing::info!("Data access migrations completed");
        Ok(())
    }

    /// Migrate, register the built-in and application entities and build the
    /// services with an in-process session store
    pub async fn init(&self, db: Arc<DatabaseConnection>, entities: Vec<EntityDef>) -> Result<()> {
        self.init_with_sessions(db, entities, Arc::new(InMemorySessionStore::new()))
            .await
    }

    /// Same as [`DataAccessModule::init`] with a caller-provided session store
    pub async fn init_with_sessions(
        &self,
        db: Arc<DatabaseConnection>,
        entities: Vec<EntityDef>,
        sessions: Arc<dyn SessionStore>,
    ) -> Result<()> {
        Self::migrate(&db).await?;

        let config = self.config.read().clone();
        let mut builder = RegistryBuilder::new(&config.org_column, &config.owner_column);
        for def in builtin_entities(&config).into_iter().chain(entities) {
            builder.register(def)?;
        }
        let registry = Arc::new(builder.build());

        let store = Arc::new(SeaOrmStore::new(db));
        let service = Arc::new(Service::new(registry, store, config));
        let auth = Arc::new(AuthService::new(service.clone(), sessions));

        *self.service.write() = Some(service);
        *self.auth.write() = Some(auth);
        tracing::info!("Data access module initialized");
        Ok(())
    }

    pub fn service(&self) -> Result<Arc<Service>> {
        self.service
            .read()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Service not initialized"))
    }

    pub fn auth(&self) -> Result<Arc<AuthService>> {
        self.auth
            .read()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Auth service not initialized"))
    }

    /// In-process client for other modules
    pub fn client(&self) -> Result<Arc<dyn DataAccessApi>> {
        Ok(Arc::new(NativeClient::new(self.service()?, self.auth()?)))
    }
}
