//! Built-in account entities
//!
//! Users, roles, permission grants and tenants live in the same store as
//! application tables and go through the same engine.

use crate::config::Config;
use crate::contract::{DataAccessError, Value, ValueMap};
use crate::domain::schema::{EntityDef, FieldDef, WriteMode, WriteTransform};
use std::sync::Arc;

pub const AUTH_USER_TABLE: &str = "auth_user";
pub const USER_ROLE_TABLE: &str = "user_role";
pub const USER_PERMISSION_TABLE: &str = "user_permission";
pub const USER_ROLE_PERMISSION_TABLE: &str = "user_role_permission";
pub const ORG_TABLE: &str = "org";

const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";

/// Entity definitions for the account tables
pub fn builtin_entities(config: &Config) -> Vec<EntityDef> {
    vec![
        auth_user(config),
        user_role(),
        user_permission(),
        user_role_permission(),
        org(),
    ]
}

fn auth_user(config: &Config) -> EntityDef {
    EntityDef::new("AuthUser")
        .field(FieldDef::int("ID").exposed("auth_user_id").read_only())
        .field(FieldDef::text("Username").unique().length(3, 12))
        .field(FieldDef::text("Email").unique().pattern(EMAIL_PATTERN))
        .field(FieldDef::text("Password").hidden().write_only())
        .field(FieldDef::int("UserRoleId").required())
        .field(FieldDef::int("IsActive"))
        .field(FieldDef::int("OrgId").hidden())
        .field(FieldDef::text("FacebookId").hidden())
        .field(FieldDef::text("GoogleId").hidden())
        .field(FieldDef::timestamp("DateAdd").read_only())
        .field(FieldDef::timestamp("DateUpd").read_only())
        .field(FieldDef::text("UserRole").reference())
        .tenant_scoped()
        .write_transform(Arc::new(PasswordTransform::new(config.password_hash_cost)))
}

fn user_role() -> EntityDef {
    EntityDef::new("UserRole")
        .field(FieldDef::int("ID").read_only())
        .field(FieldDef::text("Role").unique().required())
        .field(FieldDef::text("Description"))
        .restricted()
}

fn user_permission() -> EntityDef {
    EntityDef::new("UserPermission")
        .field(FieldDef::int("ID").read_only())
        .field(FieldDef::int("AuthUserId").required())
        .field(FieldDef::text("TableName").required())
        .field(FieldDef::text("ColumnName"))
        .field(FieldDef::text("Value"))
        .field(FieldDef::text("Permission").required().one_of(&["r", "c", "u", "d"]))
        .field(FieldDef::int("OrgId").hidden())
        .tenant_scoped()
        .permission_rows()
}

fn user_role_permission() -> EntityDef {
    EntityDef::new("UserRolePermission")
        .field(FieldDef::int("ID").read_only())
        .field(FieldDef::text("TableName").required())
        .field(FieldDef::text("ColumnName"))
        .field(FieldDef::text("Value").exposed("values"))
        .field(FieldDef::text("Permission").required().one_of(&["r", "c", "u", "d"]))
        .field(FieldDef::int("UserRoleId").required())
        .permission_rows()
        .restricted()
}

fn org() -> EntityDef {
    EntityDef::new("Org")
        .field(FieldDef::int("ID").read_only())
        .field(FieldDef::text("Name").required())
        .restricted()
}

// ===== Password Handling =====

pub fn hash_password(password: &str, cost: u32) -> Result<String, DataAccessError> {
    bcrypt::hash(password, cost).map_err(|e| {
        tracing::error!("Unable to hash password: {}", e);
        DataAccessError::validation("password", "unable to hash password")
    })
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

/// Hashes passwords before they are written; a new user needs a username
/// or an external identity
pub struct PasswordTransform {
    cost: u32,
}

impl PasswordTransform {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }
}

impl WriteTransform for PasswordTransform {
    fn apply(&self, values: &mut ValueMap, mode: WriteMode) -> Result<(), DataAccessError> {
        if mode == WriteMode::Create {
            let has_identity = ["username", "google_id", "facebook_id"]
                .iter()
                .any(|key| values.get(*key).and_then(Value::as_str).is_some_and(|s| !s.is_empty()));
            if !has_identity {
                return Err(DataAccessError::validation(
                    "username",
                    "Invalid username/FB Id/Google Id",
                ));
            }
        }

        if let Some(Value::Text(password)) = values.get_mut("password") {
            if !password.is_empty() {
                *password = hash_password(password, self.cost)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::schema::RegistryBuilder;

    #[test]
    fn test_builtins_register() {
        let config = Config::default();
        let mut builder = RegistryBuilder::new(&config.org_column, &config.owner_column);
        for def in builtin_entities(&config) {
            builder.register(def).unwrap();
        }
        let registry = builder.build();
        let user = registry.get(AUTH_USER_TABLE).unwrap();
        assert_eq!(user.field("auth_user_id").unwrap().column, "id");
        assert!(user.read_columns().contains("password"));
        assert!(user.field("UserRole").unwrap().reference);
        assert!(!user.read_columns().ends_with("user_role"));
        assert!(registry.get(USER_ROLE_PERMISSION_TABLE).unwrap().is_restricted());
        assert!(registry.get(USER_PERMISSION_TABLE).unwrap().has_permission_rows());
    }

    #[test]
    fn test_password_is_hashed() {
        let transform = PasswordTransform::new(4);
        let mut values = ValueMap::new();
        values.insert("username".into(), Value::from("alice"));
        values.insert("password".into(), Value::from("secret"));
        transform.apply(&mut values, WriteMode::Create).unwrap();

        let hash = values.get("password").and_then(Value::as_str).unwrap();
        assert_ne!(hash, "secret");
        assert!(verify_password("secret", hash));
        assert!(!verify_password("wrong", hash));
    }

    #[test]
    fn test_create_requires_an_identity() {
        let transform = PasswordTransform::new(4);
        let mut values = ValueMap::new();
        values.insert("username".into(), Value::from(""));
        let err = transform.apply(&mut values, WriteMode::Create).unwrap_err();
        assert!(matches!(err, DataAccessError::Validation { .. }));

        let mut google = ValueMap::new();
        google.insert("google_id".into(), Value::from("g-123"));
        assert!(transform.apply(&mut google, WriteMode::Create).is_ok());
    }
}
