//! Contract layer - public API for inter-module communication
//!
//! This layer contains transport-agnostic models and the native client trait.
//! NO serde derives on models - these are pure domain types.

pub mod client;
pub mod error;
pub mod model;

pub use client::DataAccessApi;
pub use error::DataAccessError;
pub use model::{
    row_to_json, Condition, CreatedRecord, PermissionKind, PermissionRow, Permissions,
    ReadRequest, TablePermission, TableRow, UserData, Value, ValueMap,
};
