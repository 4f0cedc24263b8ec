//! Infrastructure layer: Postgres persistence, audit sinks, catalog seeding
//! and configuration.

pub mod audit;
pub mod config;
pub mod seed;
pub mod store;

pub use audit::{AuditWriter, PostgresAuditWriter, SpawnedAuditSink, TracingAuditWriter};
pub use config::{AdminSeed, AppConfig, ConfigError};
pub use store::{InMemoryCredentialStore, PostgresCredentialStore, ensure_schema};
