//! `gatehouse-core`: shared identifiers and the domain error model.
//!
//! No infrastructure concerns live here.

pub mod error;
pub mod id;

pub use error::DomainError;
pub use id::{PermissionId, RoleId, TokenId, UserId};
