use gatehouse_core::UserId;

use crate::{AccessToken, EffectivePermissions, Permission, User, resolve};

/// The identity attached to a request once authentication has run.
///
/// Either a real user with the token it presented, or the anonymous sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub user: User,
    pub token: AccessToken,
    pub permissions: EffectivePermissions,
}

impl AuthContext {
    pub fn authenticated(user: User, token: AccessToken) -> Self {
        let permissions = resolve(&user);
        Self {
            user,
            token,
            permissions,
        }
    }

    pub fn anonymous() -> Self {
        Self {
            user: User::anonymous(),
            token: AccessToken::anonymous(),
            permissions: EffectivePermissions::empty(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.user.is_anonymous()
    }

    pub fn user_id(&self) -> UserId {
        self.user.id
    }

    pub fn has_permission(&self, permission: &Permission) -> bool {
        self.permissions.contains(permission)
    }
}
