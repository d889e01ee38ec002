//! Statement-shape tests for the CRUD engine against a recording store

use data_access::config::Config;
use data_access::contract::{DataAccessError, PermissionKind, ReadRequest, Value};
use data_access::domain::repository::{RawRow, RelationalStore, StoreError};
use data_access::domain::{RegistryBuilder, Service};
use serde_json::json;
use std::sync::Arc;

mod common;
use common::{identity, print_test_header, widget_entity, TENANT_A};

use PermissionKind::{Create, Read, Update};

// Mock store implementation for testing
pub mod mocks {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::RwLock;

    /// Records every statement; selects return `rows` except uniqueness checks,
    /// inserts fail with `insert_conflict` when it is set
    #[derive(Default)]
    pub struct MockStore {
        pub statements: RwLock<Vec<(String, Vec<Value>)>>,
        pub rows: RwLock<Vec<RawRow>>,
        pub unique_hit: RwLock<bool>,
        pub affected: RwLock<u64>,
        pub insert_conflict: RwLock<Option<String>>,
    }

    impl MockStore {
        pub fn with_row(row: serde_json::Value) -> Self {
            let store = Self::default();
            if let serde_json::Value::Object(map) = row {
                store.rows.write().push(map);
            }
            *store.affected.write() = 1;
            store
        }

        pub fn last(&self) -> (String, Vec<Value>) {
            self.statements.read().last().cloned().unwrap()
        }

        pub fn print_state(&self, context: &str) {
            println!("\n========== Statements: {} ==========", context);
            for (sql, params) in self.statements.read().iter() {
                println!("  {}", sql);
                println!("    params: {:?}", params);
            }
            println!("=====================================\n");
        }
    }

    #[async_trait]
    impl RelationalStore for MockStore {
        async fn fetch(&self, sql: &str, params: Vec<Value>) -> Result<Vec<RawRow>, StoreError> {
            self.statements.write().push((sql.to_string(), params));
            if sql.starts_with("select id from") {
                if *self.unique_hit.read() {
                    let mut hit = RawRow::new();
                    hit.insert("id".to_string(), json!(99));
                    return Ok(vec![hit]);
                }
                return Ok(Vec::new());
            }
            Ok(self.rows.read().clone())
        }

        async fn execute(&self, sql: &str, params: Vec<Value>) -> Result<u64, StoreError> {
            self.statements.write().push((sql.to_string(), params));
            Ok(*self.affected.read())
        }

        async fn insert(&self, sql: &str, params: Vec<Value>) -> Result<i64, StoreError> {
            self.statements.write().push((sql.to_string(), params));
            if let Some(detail) = self.insert_conflict.read().clone() {
                return Err(StoreError::UniqueViolation(detail));
            }
            Ok(42)
        }
    }
}

use mocks::MockStore;

fn service(store: Arc<MockStore>) -> Service {
    let mut builder = RegistryBuilder::new("org_id", "auth_user_id");
    builder.register(widget_entity()).unwrap();
    Service::new(Arc::new(builder.build()), store, Config::default())
}

fn stored_widget(owner: i64) -> serde_json::Value {
    json!({
        "id": 10,
        "name": "w",
        "color": "red",
        "size": 1,
        "org_id": TENANT_A,
        "auth_user_id": owner
    })
}

#[tokio::test]
async fn test_read_statement_combines_filter_tenant_and_condition() {
    print_test_header(
        "test_read_statement_combines_filter_tenant_and_condition",
        &["Caller filter, tenant predicate and access predicate are all applied"],
    );
    let store = Arc::new(MockStore::default());
    let service = service(store.clone());
    let user = identity(2, TENANT_A, &[(Read, "color", "red"), (Read, "color", "blue")]);

    let request = ReadRequest {
        filters: json!([{"name": "name", "value": "w", "op": "="}]),
        limit: 10,
        from: 20,
        desc: true,
        sort_by: "size".to_string(),
    };
    service.read("widget", &request, &user).await.unwrap();
    store.print_state("read");

    let (sql, params) = store.last();
    assert_eq!(
        sql,
        "select id, name, color, size, org_id, auth_user_id from widget \
         where (widget.name = ?) and widget.org_id = ? \
         and ((color in (?, ?)) or widget.auth_user_id = ?) \
         order by widget.size desc limit 10 offset 20"
    );
    assert_eq!(
        params,
        vec![
            Value::Text("w".to_string()),
            Value::Int(TENANT_A),
            Value::Text("red".to_string()),
            Value::Text("blue".to_string()),
            Value::Int(2),
        ]
    );
}

#[tokio::test]
async fn test_read_limit_is_clamped() {
    let store = Arc::new(MockStore::default());
    let service = service(store.clone());
    let request = ReadRequest {
        limit: 100_000,
        ..ReadRequest::default()
    };
    service
        .read("widget", &request, &service.super_user())
        .await
        .unwrap();
    let (sql, params) = store.last();
    assert_eq!(
        sql,
        "select id, name, color, size, org_id, auth_user_id from widget \
         order by widget.id asc limit 500 offset 0"
    );
    assert!(params.is_empty());
}

#[tokio::test]
async fn test_insert_never_writes_read_only_fields() {
    let store = Arc::new(MockStore::default());
    let service = service(store.clone());
    let user = identity(2, TENANT_A, &[(Create, "", "")]);

    let err = service
        .create("widget", &json!({"name": "w", "id": 7}), &user)
        .await
        .unwrap_err();
    assert!(matches!(err, DataAccessError::Validation { .. }));

    let created = service
        .create("widget", &json!({"name": "w", "org_id": 9, "bogus": 1}), &user)
        .await;
    assert!(created.is_err());

    let created = service
        .create("widget", &json!({"name": "w", "color": "red"}), &user)
        .await
        .unwrap();
    assert_eq!(created.id, 42);
    store.print_state("create");

    let (sql, params) = store.last();
    assert_eq!(
        sql,
        "insert into widget (name, color, size, org_id, auth_user_id) values (?, ?, ?, ?, ?)"
    );
    assert_eq!(
        params,
        vec![
            Value::Text("w".to_string()),
            Value::Text("red".to_string()),
            Value::Int(0),
            Value::Int(TENANT_A),
            Value::Int(2),
        ]
    );
}

#[tokio::test]
async fn test_unique_check_runs_before_insert() {
    let store = Arc::new(MockStore::default());
    *store.unique_hit.write() = true;
    let service = service(store.clone());

    let err = service
        .create("widget", &json!({"name": "w", "org": TENANT_A}), &service.super_user())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        DataAccessError::DuplicateEntry {
            fields: vec!["name".to_string()]
        }
    );
    let statements = store.statements.read();
    assert_eq!(statements.len(), 1);
    assert_eq!(
        statements[0].0,
        "select id from widget where (name = ?) limit 1"
    );
}

#[tokio::test]
async fn test_store_unique_violation_is_duplicate_entry() {
    print_test_header(
        "test_store_unique_violation_is_duplicate_entry",
        &["A constraint hit the pre-check missed still reports the unique fields"],
    );
    let store = Arc::new(MockStore::default());
    *store.insert_conflict.write() = Some("UNIQUE constraint failed: widget.name".to_string());
    let service = service(store.clone());

    let err = service
        .create("widget", &json!({"name": "w", "org": TENANT_A}), &service.super_user())
        .await
        .unwrap_err();
    store.print_state("conflicting insert");
    assert_eq!(
        err,
        DataAccessError::DuplicateEntry {
            fields: vec!["name".to_string()]
        }
    );
    let statements = store.statements.read();
    assert_eq!(statements.len(), 2);
    assert!(statements[1].0.starts_with("insert into widget"));
}

#[tokio::test]
async fn test_update_authorizes_before_unique_check() {
    let store = Arc::new(MockStore::with_row(stored_widget(2)));
    *store.unique_hit.write() = true;
    let service = service(store.clone());
    let stranger = identity(3, TENANT_A, &[(Read, "", "")]);

    let err = service
        .update("widget", 10, &json!({"name": "taken"}), &stranger)
        .await
        .unwrap_err();
    assert!(err.is_unauthorized());
    assert!(store
        .statements
        .read()
        .iter()
        .all(|(sql, _)| !sql.starts_with("select id from")));

    let owner = identity(2, TENANT_A, &[]);
    let err = service
        .update("widget", 10, &json!({"name": "taken"}), &owner)
        .await
        .unwrap_err();
    assert!(matches!(err, DataAccessError::DuplicateEntry { .. }));
}

#[tokio::test]
async fn test_owner_update_keeps_tenant_predicate() {
    print_test_header(
        "test_owner_update_keeps_tenant_predicate",
        &["Owners skip the permission matrix but never the tenant predicate"],
    );
    let store = Arc::new(MockStore::with_row(stored_widget(2)));
    let service = service(store.clone());
    let owner = identity(2, TENANT_A, &[]);

    let changed = service
        .update("widget", 10, &json!({"color": "blue"}), &owner)
        .await
        .unwrap();
    assert_eq!(changed.get("color"), Some(&Value::Text("blue".to_string())));

    let (sql, params) = store.last();
    assert_eq!(
        sql,
        "update widget set color = ? where id = ? and org_id = ?"
    );
    assert_eq!(
        params,
        vec![
            Value::Text("blue".to_string()),
            Value::Int(10),
            Value::Int(TENANT_A),
        ]
    );
}

#[tokio::test]
async fn test_update_appends_condition_predicate() {
    let store = Arc::new(MockStore::with_row(stored_widget(2)));
    let service = service(store.clone());
    let editor = identity(3, TENANT_A, &[(Update, "color", "red"), (Update, "color", "blue")]);

    service
        .update("widget", 10, &json!({"color": "blue"}), &editor)
        .await
        .unwrap();
    let (sql, params) = store.last();
    assert_eq!(
        sql,
        "update widget set color = ? where id = ? and org_id = ? and (color in (?, ?))"
    );
    assert_eq!(params.len(), 5);

    *store.affected.write() = 0;
    let err = service
        .update("widget", 10, &json!({"color": "red"}), &editor)
        .await
        .unwrap_err();
    assert!(err.is_unauthorized());
}

#[tokio::test]
async fn test_super_user_moves_row_between_tenants() {
    let store = Arc::new(MockStore::with_row(stored_widget(2)));
    let service = service(store.clone());

    let changed = service
        .update(
            "widget",
            10,
            &json!({"org": 2, "owner": 5}),
            &service.super_user(),
        )
        .await
        .unwrap();
    assert_eq!(changed.get("auth_user_id"), Some(&Value::Int(5)));

    let (sql, _) = store.last();
    assert_eq!(
        sql,
        "update widget set org_id = ?, auth_user_id = ? where id = ?"
    );

    let err = service
        .update("widget", 10, &json!({"org": "abc"}), &service.super_user())
        .await
        .unwrap_err();
    assert!(matches!(err, DataAccessError::Validation { ref errors } if errors.contains_key("org")));
}

#[tokio::test]
async fn test_delete_statement_for_non_owner() {
    let store = Arc::new(MockStore::with_row(stored_widget(2)));
    let service = service(store.clone());
    let deleter = identity(
        3,
        TENANT_A,
        &[(PermissionKind::Delete, "size", "1"), (PermissionKind::Delete, "size", "2")],
    );

    service.delete("widget", 10, &deleter).await.unwrap();
    let (sql, params) = store.last();
    assert_eq!(
        sql,
        "delete from widget where id = ? and org_id = ? and (size in (?, ?))"
    );
    assert_eq!(
        params,
        vec![
            Value::Int(10),
            Value::Int(TENANT_A),
            Value::Int(1),
            Value::Int(2),
        ]
    );
}
