//! Account flows built on the engine: login, registration, logout, password
//! changes, soft delete and grant management.
//!
//! Every mutating flow checks policy first, mutates through the store, then
//! hands an audit event to the sink without waiting on it.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{error, info, instrument, warn};

use gatehouse_core::{PermissionId, RoleId, UserId};

use crate::permissions::catalog;
use crate::policy;
use crate::{
    AccessToken, AuditAction, AuditEvent, AuditSink, AuthContext, AuthError, CredentialStore,
    DEFAULT_ROLE, EffectivePermissions, PasswordHasher, PermissionDefinition, PermissionResolver,
    RoleDefinition, TokenAuthenticator, TokenConfig, TokenIssuer, User, resolve,
};

const USERS: &str = "users";

/// How hard to try when every token of a user must go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidationPolicy {
    pub attempts: u32,
    pub backoff: StdDuration,
}

/// Upper bound on a single pause between invalidation attempts.
pub const MAX_INVALIDATION_BACKOFF: StdDuration = StdDuration::from_secs(30);

impl InvalidationPolicy {
    /// Pause before retrying after the `attempt`-th failure: linear in the
    /// attempt number, capped at [`MAX_INVALIDATION_BACKOFF`].
    pub fn delay(&self, attempt: u32) -> StdDuration {
        self.backoff
            .checked_mul(attempt)
            .map_or(MAX_INVALIDATION_BACKOFF, |d| d.min(MAX_INVALIDATION_BACKOFF))
    }
}

impl Default for InvalidationPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: StdDuration::from_millis(50),
        }
    }
}

/// Result of a successful login or registration.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: User,
    pub token: AccessToken,
    pub permissions: EffectivePermissions,
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub email: String,
    pub phone: Option<String>,
    pub password: String,
}

pub struct AuthService<S> {
    store: S,
    issuer: TokenIssuer<S>,
    authenticator: TokenAuthenticator<S>,
    resolver: PermissionResolver<S>,
    hasher: Arc<dyn PasswordHasher>,
    audit: Arc<dyn AuditSink>,
    invalidation: InvalidationPolicy,
}

impl<S: CredentialStore + Clone> AuthService<S> {
    pub fn new(
        store: S,
        tokens: TokenConfig,
        hasher: Arc<dyn PasswordHasher>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            issuer: TokenIssuer::new(store.clone(), tokens),
            authenticator: TokenAuthenticator::new(store.clone(), tokens),
            resolver: PermissionResolver::new(store.clone()),
            store,
            hasher,
            audit,
            invalidation: InvalidationPolicy::default(),
        }
    }

    pub fn with_invalidation_policy(mut self, policy: InvalidationPolicy) -> Self {
        self.invalidation = policy;
        self
    }
}

impl<S: CredentialStore> AuthService<S> {
    pub fn authenticator(&self) -> &TokenAuthenticator<S> {
        &self.authenticator
    }

    // ─────────────────────────────────────────────────────────────────────
    // Sessions
    // ─────────────────────────────────────────────────────────────────────

    /// Unknown identifier, soft-deleted account and wrong password all fail
    /// with the same `InvalidCredentials`, after the same amount of hashing.
    #[instrument(skip(self, password), err)]
    pub async fn login(&self, identifier: &str, password: &str) -> Result<LoginOutcome, AuthError> {
        let Some(user) = self.store.find_user_by_email_or_phone(identifier).await? else {
            self.burn_verification(password).await;
            return Err(AuthError::InvalidCredentials);
        };

        let matches = self.verify_password(password, &user.password_hash).await?;
        if !matches || user.is_deleted() {
            return Err(AuthError::InvalidCredentials);
        }

        self.start_session(user).await
    }

    #[instrument(skip(self, registration), fields(email = %registration.email), err)]
    pub async fn register(&self, registration: Registration) -> Result<LoginOutcome, AuthError> {
        validate_password(&registration.password)?;
        let hash = self.hash_password(&registration.password).await?;
        let user = User::new(
            &registration.email,
            registration.phone.as_deref(),
            hash,
            Utc::now(),
        )?;

        self.store.insert_user(&user).await?;
        self.assign_default_role(user.id).await;
        self.audit
            .record(AuditEvent::new(UserId::nil(), USERS, user.id, AuditAction::Create));

        let user = self
            .store
            .find_user_by_id(user.id)
            .await?
            .ok_or(AuthError::NotFound("user"))?;
        self.start_session(user).await
    }

    /// The account already exists at this point, so a failure here leaves it
    /// without the default role rather than failing the registration.
    async fn assign_default_role(&self, user_id: UserId) {
        let role = match self.store.find_role_by_name(&DEFAULT_ROLE).await {
            Ok(Some(role)) => role,
            Ok(None) => {
                warn!(role = %DEFAULT_ROLE, "default role missing; user registered without roles");
                return;
            }
            Err(e) => {
                warn!(role = %DEFAULT_ROLE, error = %e, "default role lookup failed; user registered without roles");
                return;
            }
        };
        if let Err(e) = self.store.assign_role(user_id, role.id).await {
            warn!(%user_id, role = %DEFAULT_ROLE, error = %e, "failed to assign default role");
        }
    }

    async fn start_session(&self, user: User) -> Result<LoginOutcome, AuthError> {
        let token = self.issuer.issue(user.id).await?;
        let permissions = resolve(&user);

        info!(user_id = %user.id, "user logged in");
        self.audit
            .record(AuditEvent::new(user.id, USERS, user.id, AuditAction::Login));

        Ok(LoginOutcome {
            user,
            token,
            permissions,
        })
    }

    /// Revoke only the token the caller presented.
    #[instrument(skip(self, ctx), fields(user_id = %ctx.user_id()), err)]
    pub async fn logout(&self, ctx: &AuthContext) -> Result<(), AuthError> {
        if ctx.is_anonymous() {
            return Err(AuthError::Unauthenticated);
        }
        self.store.delete_token(ctx.token.id).await?;

        info!(user_id = %ctx.user_id(), "user logged out");
        self.audit.record(AuditEvent::new(
            ctx.user_id(),
            USERS,
            ctx.user_id(),
            AuditAction::Logout,
        ));
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn purge_expired_tokens(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        let purged = self
            .store
            .purge_expired_tokens(now)
            .await
            .map_err(AuthError::Storage)?;
        if purged > 0 {
            info!(purged, "expired access tokens purged");
        }
        Ok(purged)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Users
    // ─────────────────────────────────────────────────────────────────────

    pub async fn view_user(&self, ctx: &AuthContext, target: UserId) -> Result<User, AuthError> {
        policy::authorize_self_or(ctx, target, &catalog::VIEW_USER)?;
        self.load_user(target).await
    }

    pub async fn user_permissions(
        &self,
        ctx: &AuthContext,
        target: UserId,
    ) -> Result<EffectivePermissions, AuthError> {
        policy::authorize_self_or(ctx, target, &catalog::VIEW_USER)?;
        self.resolver.resolve_user(target).await
    }

    /// Change a password after proving knowledge of the current one. Every
    /// token of the user is revoked, the caller's included.
    #[instrument(skip(self, ctx, current, new), fields(actor = %ctx.user_id()), err)]
    pub async fn change_password(
        &self,
        ctx: &AuthContext,
        target: UserId,
        current: &str,
        new: &str,
    ) -> Result<(), AuthError> {
        policy::authorize_self_or(ctx, target, &catalog::UPDATE_USER)?;
        let user = self.load_user(target).await?;

        if !self.verify_password(current, &user.password_hash).await? {
            return Err(AuthError::InvalidCredentials);
        }

        self.replace_password(ctx, &user, new, AuditAction::UpdatePassword)
            .await
    }

    /// Administrative reset: no current password, same revocation.
    #[instrument(skip(self, ctx, new), fields(actor = %ctx.user_id()), err)]
    pub async fn reset_password(
        &self,
        ctx: &AuthContext,
        target: UserId,
        new: &str,
    ) -> Result<(), AuthError> {
        policy::can(&ctx.permissions, &catalog::UPDATE_USER)?;
        let user = self.load_user(target).await?;

        self.replace_password(ctx, &user, new, AuditAction::ResetPassword)
            .await
    }

    async fn replace_password(
        &self,
        ctx: &AuthContext,
        user: &User,
        new: &str,
        action: AuditAction,
    ) -> Result<(), AuthError> {
        validate_password(new)?;
        let hash = self.hash_password(new).await?;
        self.store
            .update_password_hash(user.id, &hash, Utc::now())
            .await?;

        let revoked = self.invalidate_tokens(user.id).await?;
        info!(user_id = %user.id, revoked, %action, "password replaced, sessions revoked");

        self.audit
            .record(AuditEvent::new(ctx.user_id(), USERS, user.id, action));
        Ok(())
    }

    /// Bulk revocation must not be skipped: retry with linear backoff, then
    /// give up with a storage error.
    async fn invalidate_tokens(&self, user_id: UserId) -> Result<u64, AuthError> {
        let attempts = self.invalidation.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.store.delete_tokens_by_user_id(user_id).await {
                Ok(revoked) => return Ok(revoked),
                Err(e) if attempt < attempts => {
                    warn!(%user_id, attempt, error = %e, "token invalidation failed, retrying");
                    tokio::time::sleep(self.invalidation.delay(attempt)).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(%user_id, attempt, error = %e, "token invalidation failed");
                    return Err(AuthError::Storage(e));
                }
            }
        }
    }

    #[instrument(skip(self, ctx), fields(actor = %ctx.user_id()), err)]
    pub async fn soft_delete_user(&self, ctx: &AuthContext, target: UserId) -> Result<(), AuthError> {
        policy::can(&ctx.permissions, &catalog::DELETE_USER)?;
        let user = self.load_user(target).await?;

        self.store.soft_delete_user(target, Utc::now()).await?;
        self.audit.record(
            AuditEvent::new(ctx.user_id(), USERS, target, AuditAction::MoveToTrash)
                .with_previous_state(snapshot(&user)),
        );
        Ok(())
    }

    #[instrument(skip(self, ctx), fields(actor = %ctx.user_id()), err)]
    pub async fn restore_user(&self, ctx: &AuthContext, target: UserId) -> Result<(), AuthError> {
        policy::can(&ctx.permissions, &catalog::DELETE_USER)?;
        let user = self.load_user(target).await?;

        self.store.restore_user(target, Utc::now()).await?;
        self.audit.record(
            AuditEvent::new(ctx.user_id(), USERS, target, AuditAction::Restore)
                .with_previous_state(snapshot(&user)),
        );
        Ok(())
    }

    async fn load_user(&self, user_id: UserId) -> Result<User, AuthError> {
        self.store
            .find_user_by_id(user_id)
            .await?
            .ok_or(AuthError::NotFound("user"))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Password hashing (off the async runtime)
    // ─────────────────────────────────────────────────────────────────────

    async fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let hasher = self.hasher.clone();
        let password = password.to_owned();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AuthError::PasswordHash(e.to_string()))?
    }

    async fn verify_password(&self, password: &str, hash: &str) -> Result<bool, AuthError> {
        let hasher = self.hasher.clone();
        let (password, hash) = (password.to_owned(), hash.to_owned());
        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| AuthError::PasswordHash(e.to_string()))?
    }

    async fn burn_verification(&self, password: &str) {
        let hasher = self.hasher.clone();
        let password = password.to_owned();
        if let Err(e) = tokio::task::spawn_blocking(move || hasher.verify_dummy(&password)).await {
            warn!(error = %e, "dummy password verification task failed");
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Roles & permissions
    // ─────────────────────────────────────────────────────────────────────

    pub async fn list_roles(&self, ctx: &AuthContext) -> Result<Vec<RoleDefinition>, AuthError> {
        policy::can(&ctx.permissions, &catalog::VIEW_ROLE)?;
        Ok(self.store.list_roles().await?)
    }

    pub async fn list_permissions(
        &self,
        ctx: &AuthContext,
    ) -> Result<Vec<PermissionDefinition>, AuthError> {
        policy::can(&ctx.permissions, &catalog::VIEW_PERMISSION)?;
        Ok(self.store.list_permissions().await?)
    }

    #[instrument(skip(self, ctx), fields(actor = %ctx.user_id()), err)]
    pub async fn grant_role(
        &self,
        ctx: &AuthContext,
        role_id: RoleId,
        target: UserId,
    ) -> Result<(), AuthError> {
        let role = self.load_role(role_id).await?;
        policy::authorize_role_grant(ctx, &role.name)?;
        let user = self.load_user(target).await?;

        self.store.assign_role(target, role_id).await?;
        self.audit.record(
            AuditEvent::new(ctx.user_id(), USERS, target, AuditAction::Grant)
                .with_previous_state(json!({ "role": role.name, "roles": role_names(&user) })),
        );
        Ok(())
    }

    #[instrument(skip(self, ctx), fields(actor = %ctx.user_id()), err)]
    pub async fn revoke_role(
        &self,
        ctx: &AuthContext,
        role_id: RoleId,
        target: UserId,
    ) -> Result<(), AuthError> {
        let role = self.load_role(role_id).await?;
        policy::authorize_role_revoke(ctx, &role.name)?;
        let user = self.load_user(target).await?;

        self.store.unassign_role(target, role_id).await?;
        self.audit.record(
            AuditEvent::new(ctx.user_id(), USERS, target, AuditAction::Revoke)
                .with_previous_state(json!({ "role": role.name, "roles": role_names(&user) })),
        );
        Ok(())
    }

    #[instrument(skip(self, ctx), fields(actor = %ctx.user_id()), err)]
    pub async fn grant_permission(
        &self,
        ctx: &AuthContext,
        permission_id: PermissionId,
        target: UserId,
    ) -> Result<(), AuthError> {
        let permission = self.load_permission(permission_id).await?;
        policy::authorize_permission_grant(ctx, &permission.name)?;
        let user = self.load_user(target).await?;

        self.store.grant_permission(target, permission_id).await?;
        self.audit.record(
            AuditEvent::new(ctx.user_id(), USERS, target, AuditAction::Grant).with_previous_state(
                json!({ "permission": permission.name, "permissions": direct_grants(&user) }),
            ),
        );
        Ok(())
    }

    #[instrument(skip(self, ctx), fields(actor = %ctx.user_id()), err)]
    pub async fn revoke_permission(
        &self,
        ctx: &AuthContext,
        permission_id: PermissionId,
        target: UserId,
    ) -> Result<(), AuthError> {
        let permission = self.load_permission(permission_id).await?;
        policy::authorize_permission_revoke(ctx, &permission.name)?;
        let user = self.load_user(target).await?;

        self.store.revoke_permission(target, permission_id).await?;
        self.audit.record(
            AuditEvent::new(ctx.user_id(), USERS, target, AuditAction::Revoke).with_previous_state(
                json!({ "permission": permission.name, "permissions": direct_grants(&user) }),
            ),
        );
        Ok(())
    }

    async fn load_role(&self, role_id: RoleId) -> Result<RoleDefinition, AuthError> {
        self.store
            .find_role_by_id(role_id)
            .await?
            .ok_or(AuthError::NotFound("role"))
    }

    async fn load_permission(
        &self,
        permission_id: PermissionId,
    ) -> Result<PermissionDefinition, AuthError> {
        self.store
            .find_permission_by_id(permission_id)
            .await?
            .ok_or(AuthError::NotFound("permission"))
    }
}

fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.trim().is_empty() {
        return Err(AuthError::Validation("password must not be empty".into()));
    }
    Ok(())
}

fn snapshot(user: &User) -> serde_json::Value {
    serde_json::to_value(user).unwrap_or(serde_json::Value::Null)
}

fn role_names(user: &User) -> Vec<&str> {
    user.role_names().map(|r| r.as_str()).collect()
}

fn direct_grants(user: &User) -> Vec<&str> {
    user.permissions.iter().map(|p| p.name.as_str()).collect()
}
