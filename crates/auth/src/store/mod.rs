//! Persistence boundary for users, roles, permissions and access tokens.
//!
//! The engine only talks to storage through [`CredentialStore`]. Query
//! language and schema belong to the implementations: an in-memory store for
//! tests/dev lives here, the Postgres store lives in `gatehouse-infra`.

pub mod in_memory;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use gatehouse_core::{PermissionId, RoleId, TokenId, UserId};

use crate::{AccessToken, PermissionDefinition, Role, RoleDefinition, User};

pub use in_memory::InMemoryCredentialStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

/// Storage operations the authentication engine depends on.
///
/// `find_*` methods return `Ok(None)` for absent rows; `Err` always means the
/// backend itself failed. Users are returned with their roles (in assignment
/// order, each carrying its ordered permissions) and direct grants attached.
#[async_trait::async_trait]
pub trait CredentialStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────
    // Tokens
    // ─────────────────────────────────────────────────────────────────────

    async fn find_token_by_secret(&self, secret: &str) -> Result<Option<AccessToken>, StoreError>;

    async fn insert_token(&self, token: &AccessToken) -> Result<(), StoreError>;

    /// Move a token's expiry forward. Implementations keep the later of the
    /// stored and the supplied value, so concurrent refreshes never regress it.
    async fn update_token_expiry(
        &self,
        token_id: TokenId,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn delete_token(&self, token_id: TokenId) -> Result<(), StoreError>;

    /// Delete every token owned by `user_id`. Returns the number removed.
    async fn delete_tokens_by_user_id(&self, user_id: UserId) -> Result<u64, StoreError>;

    /// Delete tokens whose `expires_at` lies before `now`.
    async fn purge_expired_tokens(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    // ─────────────────────────────────────────────────────────────────────
    // Users
    // ─────────────────────────────────────────────────────────────────────

    /// Soft-deleted users are returned too; callers decide what that means.
    async fn find_user_by_id(&self, user_id: UserId) -> Result<Option<User>, StoreError>;

    async fn find_user_by_email_or_phone(&self, identifier: &str)
    -> Result<Option<User>, StoreError>;

    /// Fails with `Conflict` when the e-mail or phone is already taken.
    async fn insert_user(&self, user: &User) -> Result<(), StoreError>;

    async fn update_password_hash(
        &self,
        user_id: UserId,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn soft_delete_user(&self, user_id: UserId, now: DateTime<Utc>) -> Result<(), StoreError>;

    async fn restore_user(&self, user_id: UserId, now: DateTime<Utc>) -> Result<(), StoreError>;

    // ─────────────────────────────────────────────────────────────────────
    // Roles & permissions
    // ─────────────────────────────────────────────────────────────────────

    async fn insert_permission(&self, permission: &PermissionDefinition) -> Result<(), StoreError>;

    async fn find_permission_by_id(
        &self,
        permission_id: PermissionId,
    ) -> Result<Option<PermissionDefinition>, StoreError>;

    async fn list_permissions(&self) -> Result<Vec<PermissionDefinition>, StoreError>;

    /// Every permission a role references must already exist.
    async fn insert_role(&self, role: &RoleDefinition) -> Result<(), StoreError>;

    async fn find_role_by_id(&self, role_id: RoleId) -> Result<Option<RoleDefinition>, StoreError>;

    async fn find_role_by_name(&self, name: &Role) -> Result<Option<RoleDefinition>, StoreError>;

    async fn list_roles(&self) -> Result<Vec<RoleDefinition>, StoreError>;

    /// Append a role to the user's assignments. Assigning a held role is a no-op.
    async fn assign_role(&self, user_id: UserId, role_id: RoleId) -> Result<(), StoreError>;

    async fn unassign_role(&self, user_id: UserId, role_id: RoleId) -> Result<(), StoreError>;

    /// Append a direct grant. Granting a held permission is a no-op.
    async fn grant_permission(
        &self,
        user_id: UserId,
        permission_id: PermissionId,
    ) -> Result<(), StoreError>;

    async fn revoke_permission(
        &self,
        user_id: UserId,
        permission_id: PermissionId,
    ) -> Result<(), StoreError>;
}

#[async_trait::async_trait]
impl<S> CredentialStore for Arc<S>
where
    S: CredentialStore + ?Sized,
{
    async fn find_token_by_secret(&self, secret: &str) -> Result<Option<AccessToken>, StoreError> {
        (**self).find_token_by_secret(secret).await
    }

    async fn insert_token(&self, token: &AccessToken) -> Result<(), StoreError> {
        (**self).insert_token(token).await
    }

    async fn update_token_expiry(
        &self,
        token_id: TokenId,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        (**self).update_token_expiry(token_id, expires_at).await
    }

    async fn delete_token(&self, token_id: TokenId) -> Result<(), StoreError> {
        (**self).delete_token(token_id).await
    }

    async fn delete_tokens_by_user_id(&self, user_id: UserId) -> Result<u64, StoreError> {
        (**self).delete_tokens_by_user_id(user_id).await
    }

    async fn purge_expired_tokens(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        (**self).purge_expired_tokens(now).await
    }

    async fn find_user_by_id(&self, user_id: UserId) -> Result<Option<User>, StoreError> {
        (**self).find_user_by_id(user_id).await
    }

    async fn find_user_by_email_or_phone(
        &self,
        identifier: &str,
    ) -> Result<Option<User>, StoreError> {
        (**self).find_user_by_email_or_phone(identifier).await
    }

    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        (**self).insert_user(user).await
    }

    async fn update_password_hash(
        &self,
        user_id: UserId,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        (**self).update_password_hash(user_id, password_hash, now).await
    }

    async fn soft_delete_user(&self, user_id: UserId, now: DateTime<Utc>) -> Result<(), StoreError> {
        (**self).soft_delete_user(user_id, now).await
    }

    async fn restore_user(&self, user_id: UserId, now: DateTime<Utc>) -> Result<(), StoreError> {
        (**self).restore_user(user_id, now).await
    }

    async fn insert_permission(&self, permission: &PermissionDefinition) -> Result<(), StoreError> {
        (**self).insert_permission(permission).await
    }

    async fn find_permission_by_id(
        &self,
        permission_id: PermissionId,
    ) -> Result<Option<PermissionDefinition>, StoreError> {
        (**self).find_permission_by_id(permission_id).await
    }

    async fn list_permissions(&self) -> Result<Vec<PermissionDefinition>, StoreError> {
        (**self).list_permissions().await
    }

    async fn insert_role(&self, role: &RoleDefinition) -> Result<(), StoreError> {
        (**self).insert_role(role).await
    }

    async fn find_role_by_id(&self, role_id: RoleId) -> Result<Option<RoleDefinition>, StoreError> {
        (**self).find_role_by_id(role_id).await
    }

    async fn find_role_by_name(&self, name: &Role) -> Result<Option<RoleDefinition>, StoreError> {
        (**self).find_role_by_name(name).await
    }

    async fn list_roles(&self) -> Result<Vec<RoleDefinition>, StoreError> {
        (**self).list_roles().await
    }

    async fn assign_role(&self, user_id: UserId, role_id: RoleId) -> Result<(), StoreError> {
        (**self).assign_role(user_id, role_id).await
    }

    async fn unassign_role(&self, user_id: UserId, role_id: RoleId) -> Result<(), StoreError> {
        (**self).unassign_role(user_id, role_id).await
    }

    async fn grant_permission(
        &self,
        user_id: UserId,
        permission_id: PermissionId,
    ) -> Result<(), StoreError> {
        (**self).grant_permission(user_id, permission_id).await
    }

    async fn revoke_permission(
        &self,
        user_id: UserId,
        permission_id: PermissionId,
    ) -> Result<(), StoreError> {
        (**self).revoke_permission(user_id, permission_id).await
    }
}
