//! Credential store implementations backed by real infrastructure.
//!
//! The in-memory store used by tests and dev lives next to the trait in
//! `gatehouse-auth`; it is re-exported here so wiring code has one place to
//! pick a backend from.

pub mod postgres;

pub use gatehouse_auth::InMemoryCredentialStore;
pub use postgres::{PostgresCredentialStore, ensure_schema};
