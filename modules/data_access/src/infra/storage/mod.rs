//! Storage layer - relational store, sessions and migrations

pub mod mapper;
pub mod migrations;
pub mod session;
pub mod store;

pub use session::InMemorySessionStore;
pub use store::SeaOrmStore;
