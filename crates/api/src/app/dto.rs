use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gatehouse_auth::{LoginOutcome, PermissionDefinition, RoleDefinition, User};
use gatehouse_core::{PermissionId, RoleId, UserId};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub phone: Option<String>,
    pub password: String,
}

/// `identifier` may be sent as `email` or `phone` as well.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(alias = "email", alias = "phone")]
    pub identifier: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub new_password: String,
}

/// Body of role/permission grant and revoke calls.
#[derive(Debug, Deserialize)]
pub struct GrantRequest {
    pub user_id: String,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct UserView {
    pub id: UserId,
    pub email: String,
    pub phone: Option<String>,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            phone: user.phone.clone(),
            roles: user.role_names().map(|r| r.as_str().to_string()).collect(),
            permissions: user
                .permissions
                .iter()
                .map(|p| p.name.as_str().to_string())
                .collect(),
            created_at: user.created_at,
            updated_at: user.updated_at,
            deleted_at: user.deleted_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user: UserView,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub permissions: Vec<String>,
}

impl From<&LoginOutcome> for LoginResponse {
    fn from(outcome: &LoginOutcome) -> Self {
        Self {
            user: UserView::from(&outcome.user),
            token: outcome.token.secret.as_str().to_string(),
            expires_at: outcome.token.expires_at,
            permissions: outcome.permissions.names(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RoleView {
    pub id: RoleId,
    pub name: String,
    pub permissions: Vec<String>,
}

impl From<&RoleDefinition> for RoleView {
    fn from(role: &RoleDefinition) -> Self {
        Self {
            id: role.id,
            name: role.name.as_str().to_string(),
            permissions: role
                .permissions
                .iter()
                .map(|p| p.as_str().to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PermissionView {
    pub id: PermissionId,
    pub name: String,
}

impl From<&PermissionDefinition> for PermissionView {
    fn from(permission: &PermissionDefinition) -> Self {
        Self {
            id: permission.id,
            name: permission.name.as_str().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_accepts_email_or_phone_keys() {
        let by_email: LoginRequest =
            serde_json::from_str(r#"{"email":"a@b.c","password":"pw"}"#).unwrap();
        let by_phone: LoginRequest =
            serde_json::from_str(r#"{"phone":"+15550100","password":"pw"}"#).unwrap();

        assert_eq!(by_email.identifier, "a@b.c");
        assert_eq!(by_phone.identifier, "+15550100");
    }

    #[test]
    fn user_view_never_carries_the_hash() {
        let user = User::new("a@b.c", None, "$argon2id$secret".into(), Utc::now()).unwrap();
        let json = serde_json::to_string(&UserView::from(&user)).unwrap();
        assert!(!json.contains("argon2id"));
    }
}
