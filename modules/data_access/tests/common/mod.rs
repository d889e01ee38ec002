//! Common test utilities: a migrated SQLite database with one application table

#![allow(dead_code)]

use data_access::config::Config;
use data_access::contract::{PermissionKind, Permissions, UserData};
use data_access::domain::{AuthService, EntityDef, FieldDef, Service};
use data_access::DataAccessModule;
use sea_orm::{ConnectionTrait, DatabaseConnection};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

pub const TENANT_A: i64 = 1;
pub const TENANT_B: i64 = 2;

/// Application table used across the integration tests
pub fn widget_entity() -> EntityDef {
    EntityDef::new("Widget")
        .field(FieldDef::int("ID").read_only())
        .field(FieldDef::text("Name").unique().required())
        .field(FieldDef::text("Color"))
        .field(FieldDef::int("Size"))
        .field(FieldDef::int("OrgId").hidden())
        .field(FieldDef::int("AuthUserId"))
        .tenant_scoped()
        .owner_scoped()
}

const CREATE_WIDGET: &str = "create table widget (
    id integer primary key autoincrement,
    name text not null unique,
    color text not null default '',
    size bigint not null default 0,
    org_id bigint not null default 0,
    auth_user_id bigint not null default 0
)";

pub struct TestEnv {
    // keeps the database file alive
    _dir: TempDir,
    pub db: Arc<DatabaseConnection>,
    pub module: DataAccessModule,
    pub service: Arc<Service>,
    pub auth: Arc<AuthService>,
}

impl TestEnv {
    pub async fn new() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();

        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("data.db").display());
        let db = DataAccessModule::connect(&url).await.unwrap();
        db.execute_unprepared(CREATE_WIDGET).await.unwrap();

        let module = DataAccessModule::new(Config::default());
        module.init(db.clone(), vec![widget_entity()]).await.unwrap();
        let service = module.service().unwrap();
        let auth = module.auth().unwrap();

        Self {
            _dir: dir,
            db,
            module,
            service,
            auth,
        }
    }

    pub fn super_user(&self) -> UserData {
        self.service.super_user()
    }

    /// Seed a role and the super-user account (id 1)
    pub async fn seed_accounts(&self, admin_password: &str) -> i64 {
        let root = self.super_user();
        let role = self
            .service
            .create("user_role", &json!({"role": "staff"}), &root)
            .await
            .unwrap();
        let admin = self
            .service
            .create(
                "auth_user",
                &json!({
                    "username": "admin",
                    "email": "admin@example.com",
                    "password": admin_password,
                    "user_role_id": role.id,
                    "org": TENANT_A,
                }),
                &root,
            )
            .await
            .unwrap();
        assert_eq!(admin.id, 1);
        role.id
    }
}

/// Identity with an explicit permission matrix, no session involved
pub fn identity(id: i64, org_id: i64, grants: &[(PermissionKind, &str, &str)]) -> UserData {
    let mut permissions = Permissions::default();
    for (kind, column, value) in grants {
        permissions.add("widget", *kind, column, value).unwrap();
    }
    UserData::new(id, org_id, permissions)
}

pub fn print_test_header(test_name: &str, purpose: &[&str]) {
    println!("\n🧪 TEST: {}", test_name);
    if let Some(first) = purpose.first() {
        println!("📋 PURPOSE: {}", first);
    }
    for line in purpose.iter().skip(1) {
        println!("   {}", line);
    }
}
