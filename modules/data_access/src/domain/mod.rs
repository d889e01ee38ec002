//! Domain layer - schema, permissions and the CRUD engine

pub mod auth;
pub mod entities;
pub mod filter;
pub mod permission;
pub mod repository;
pub mod schema;
pub mod service;
pub mod validation;

pub use auth::AuthService;
pub use repository::{RelationalStore, SessionStore};
pub use schema::{EntityDef, FieldDef, RegistryBuilder, SchemaRegistry};
pub use service::Service;
