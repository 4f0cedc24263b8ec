//! `gatehouse-auth`: bearer-token authentication and RBAC engine.
//!
//! This crate is intentionally decoupled from HTTP and storage: persistence is
//! reached through [`CredentialStore`], audit through [`AuditSink`].

pub mod audit;
pub mod authenticator;
pub mod context;
pub mod error;
pub mod issuer;
pub mod password;
pub mod permissions;
pub mod policy;
pub mod resolver;
pub mod roles;
pub mod service;
pub mod store;
pub mod token;
pub mod user;

pub use audit::{AuditAction, AuditEvent, AuditSink, InMemoryAuditLog};
pub use authenticator::{AuthMode, TokenAuthenticator, parse_bearer};
pub use context::AuthContext;
pub use error::AuthError;
pub use issuer::TokenIssuer;
pub use password::{Argon2Hasher, PasswordHashConfig, PasswordHasher};
pub use permissions::{Permission, PermissionDefinition};
pub use policy::AuthzError;
pub use resolver::{EffectivePermissions, PermissionResolver, resolve};
pub use roles::{DEFAULT_ROLE, Role, RoleDefinition};
pub use service::{AuthService, InvalidationPolicy, LoginOutcome, Registration};
pub use store::{CredentialStore, InMemoryCredentialStore, StoreError};
pub use token::{AccessToken, TokenConfig, TokenConfigError, TokenSecret};
pub use user::User;
