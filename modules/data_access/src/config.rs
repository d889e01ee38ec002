//! Configuration for the data access module

use serde::Deserialize;

/// Data access configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// auth_user id that bypasses permission checks and tenant scoping
    #[serde(default = "default_super_user_id")]
    pub super_user_id: i64,

    /// Tenant the super-user belongs to
    #[serde(default = "default_super_user_org")]
    pub super_user_org: i64,

    /// Storage column holding the tenant of tenant-scoped tables
    #[serde(default = "default_org_column")]
    pub org_column: String,

    /// Storage column holding the owner of owner-scoped tables
    #[serde(default = "default_owner_column")]
    pub owner_column: String,

    /// Upper bound (and default) for read page size
    #[serde(default = "default_max_read_limit")]
    pub max_read_limit: i64,

    /// Maximum number of payload keys accepted by a single update
    #[serde(default = "default_max_update_fields")]
    pub max_update_fields: usize,

    /// Session lifetime (hours)
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: u64,

    /// One-time password token lifetime (hours)
    #[serde(default = "default_password_token_ttl_hours")]
    pub password_token_ttl_hours: u64,

    /// bcrypt cost used when hashing passwords
    #[serde(default = "default_password_hash_cost")]
    pub password_hash_cost: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            super_user_id: default_super_user_id(),
            super_user_org: default_super_user_org(),
            org_column: default_org_column(),
            owner_column: default_owner_column(),
            max_read_limit: default_max_read_limit(),
            max_update_fields: default_max_update_fields(),
            session_ttl_hours: default_session_ttl_hours(),
            password_token_ttl_hours: default_password_token_ttl_hours(),
            password_hash_cost: default_password_hash_cost(),
        }
    }
}

impl Config {
    /// Parse a YAML document; absent keys take their defaults
    pub fn from_yaml(source: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(source)?)
    }
}

fn default_super_user_id() -> i64 {
    1
}

fn default_super_user_org() -> i64 {
    1
}

fn default_org_column() -> String {
    "org_id".to_string()
}

fn default_owner_column() -> String {
    "auth_user_id".to_string()
}

fn default_max_read_limit() -> i64 {
    500
}

fn default_max_update_fields() -> usize {
    9
}

fn default_session_ttl_hours() -> u64 {
    24 * 10 // 10 days
}

fn default_password_token_ttl_hours() -> u64 {
    12
}

fn default_password_hash_cost() -> u32 {
    4 // bcrypt minimum
}
