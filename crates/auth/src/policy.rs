//! Policy gate: permission and role checks run by handlers before acting.
//!
//! - No IO
//! - No panics
//! - Exact-match only: a permission is held or it is not

use thiserror::Error;

use gatehouse_core::UserId;

use crate::permissions::catalog;
use crate::{AuthContext, EffectivePermissions, Permission, Role, User};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),

    #[error("forbidden: missing role '{0}'")]
    MissingRole(String),
}

pub fn can(permissions: &EffectivePermissions, required: &Permission) -> Result<(), AuthzError> {
    if permissions.contains(required) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

pub fn has_role(user: &User, role: &Role) -> Result<(), AuthzError> {
    if user.holds_role(role) {
        Ok(())
    } else {
        Err(AuthzError::MissingRole(role.as_str().to_string()))
    }
}

/// Acting on one's own record is always allowed; anyone else needs `required`.
pub fn authorize_self_or(
    ctx: &AuthContext,
    target: UserId,
    required: &Permission,
) -> Result<(), AuthzError> {
    if !ctx.is_anonymous() && ctx.user_id() == target {
        return Ok(());
    }
    can(&ctx.permissions, required)
}

// ─────────────────────────────────────────────────────────────────────────────
// Escalation guards
// ─────────────────────────────────────────────────────────────────────────────

/// Granting a role needs `grant role` and the role itself: nobody hands out
/// what they do not hold.
pub fn authorize_role_grant(ctx: &AuthContext, role: &Role) -> Result<(), AuthzError> {
    can(&ctx.permissions, &catalog::GRANT_ROLE)?;
    has_role(&ctx.user, role)
}

pub fn authorize_role_revoke(ctx: &AuthContext, role: &Role) -> Result<(), AuthzError> {
    can(&ctx.permissions, &catalog::REVOKE_ROLE)?;
    has_role(&ctx.user, role)
}

/// Granting a permission directly needs `grant permission` and the
/// permission itself in the actor's effective set.
pub fn authorize_permission_grant(
    ctx: &AuthContext,
    permission: &Permission,
) -> Result<(), AuthzError> {
    can(&ctx.permissions, &catalog::GRANT_PERMISSION)?;
    can(&ctx.permissions, permission)
}

pub fn authorize_permission_revoke(
    ctx: &AuthContext,
    permission: &Permission,
) -> Result<(), AuthzError> {
    can(&ctx.permissions, &catalog::REVOKE_PERMISSION)?;
    can(&ctx.permissions, permission)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AccessToken, PermissionDefinition, RoleDefinition};
    use chrono::{Duration, Utc};

    fn ctx_with(roles: Vec<RoleDefinition>, grants: Vec<&'static str>) -> AuthContext {
        let mut user = User::new("gus@example.com", None, "h".into(), Utc::now()).unwrap();
        user.roles = roles;
        user.permissions = grants.into_iter().map(PermissionDefinition::new).collect();
        let token = AccessToken::mint(user.id, Utc::now(), Duration::hours(1));
        AuthContext::authenticated(user, token)
    }

    #[test]
    fn can_names_missing_permission() {
        let ctx = ctx_with(vec![], vec!["edit"]);
        assert!(can(&ctx.permissions, &Permission::new("edit")).is_ok());
        assert_eq!(
            can(&ctx.permissions, &Permission::new("publish")),
            Err(AuthzError::Forbidden("publish".into()))
        );
    }

    #[test]
    fn role_grant_requires_holding_the_role() {
        let ctx = ctx_with(vec![], vec!["grant role"]);
        assert_eq!(
            authorize_role_grant(&ctx, &Role::new("admin")),
            Err(AuthzError::MissingRole("admin".into()))
        );
    }

    #[test]
    fn role_grant_requires_grant_permission() {
        let ctx = ctx_with(
            vec![RoleDefinition::new("admin", vec![Permission::new("view user")])],
            vec![],
        );
        assert_eq!(
            authorize_role_grant(&ctx, &Role::new("admin")),
            Err(AuthzError::Forbidden("grant role".into()))
        );
    }

    #[test]
    fn role_grant_allowed_with_both() {
        let ctx = ctx_with(
            vec![RoleDefinition::new("moderator", vec![Permission::new("revoke role")])],
            vec!["grant role"],
        );
        assert!(authorize_role_grant(&ctx, &Role::new("moderator")).is_ok());
        assert!(authorize_role_revoke(&ctx, &Role::new("moderator")).is_ok());
    }

    #[test]
    fn permission_grant_requires_holding_the_permission() {
        let ctx = ctx_with(vec![], vec!["grant permission", "share"]);
        assert!(authorize_permission_grant(&ctx, &Permission::new("share")).is_ok());
        assert_eq!(
            authorize_permission_grant(&ctx, &Permission::new("delete user")),
            Err(AuthzError::Forbidden("delete user".into()))
        );
        assert_eq!(
            authorize_permission_revoke(&ctx, &Permission::new("share")),
            Err(AuthzError::Forbidden("revoke permission".into()))
        );
    }

    #[test]
    fn self_access_bypasses_permission() {
        let ctx = ctx_with(vec![], vec![]);
        assert!(authorize_self_or(&ctx, ctx.user_id(), &catalog::VIEW_USER).is_ok());
        assert!(authorize_self_or(&ctx, UserId::new(), &catalog::VIEW_USER).is_err());
    }

    #[test]
    fn anonymous_never_matches_self() {
        let ctx = AuthContext::anonymous();
        assert!(authorize_self_or(&ctx, UserId::nil(), &catalog::VIEW_USER).is_err());
    }
}
