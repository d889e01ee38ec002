//! Data Access Module
//!
//! Multi-tenant, permission-aware CRUD over registered relational tables.
//! Callers describe entities once; every read and write is validated against
//! the schema, filtered through the caller's permission matrix and scoped to
//! the caller's tenant.

// Public exports
pub mod contract;
pub use contract::{
    client::DataAccessApi, error::DataAccessError, CreatedRecord, PermissionKind, Permissions,
    ReadRequest, TableRow, UserData, Value,
};

pub mod module;
pub use module::DataAccessModule;

// Internal modules (hidden from public API)
#[doc(hidden)]
pub mod api;
#[doc(hidden)]
pub mod config;
#[doc(hidden)]
pub mod domain;
#[doc(hidden)]
pub mod infra;

pub use config::Config;
pub use domain::{EntityDef, FieldDef};
