//! User identity as seen by the authentication core.
//!
//! Users are owned by CRUD flows outside this crate; the core reads them,
//! resolves their grants and enforces the soft-delete lockout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gatehouse_core::{DomainError, UserId};

use crate::{PermissionDefinition, Role, RoleDefinition};

/// A user together with its assigned roles and direct permission grants.
///
/// # Invariants
/// - A user with `deleted_at` set never authenticates.
/// - `roles` and `permissions` keep the order in which they were assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub phone: Option<String>,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub roles: Vec<RoleDefinition>,
    pub permissions: Vec<PermissionDefinition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    /// Build a new, not yet persisted user.
    pub fn new(
        email: &str,
        phone: Option<&str>,
        password_hash: String,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let email = normalize_email(email)?;
        let phone = match phone.map(str::trim) {
            Some("") | None => None,
            Some(p) => Some(p.to_string()),
        };

        Ok(Self {
            id: UserId::new(),
            email,
            phone,
            password_hash,
            roles: Vec::new(),
            permissions: Vec::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        })
    }

    /// The "no authenticated caller" sentinel. Never persisted.
    pub fn anonymous() -> Self {
        Self {
            id: UserId::nil(),
            email: "anonymous@anonymous.invalid".to_string(),
            phone: None,
            password_hash: String::new(),
            roles: Vec::new(),
            permissions: Vec::new(),
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
            deleted_at: None,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.id.is_nil()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn holds_role(&self, role: &Role) -> bool {
        self.roles.iter().any(|r| r.name == *role)
    }

    pub fn role_names(&self) -> impl Iterator<Item = &Role> {
        self.roles.iter().map(|r| &r.name)
    }
}

/// Trim and lowercase an e-mail, rejecting values that cannot be one.
pub fn normalize_email(email: &str) -> Result<String, DomainError> {
    let email = email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(DomainError::validation("invalid email format"));
    }
    Ok(email)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Permission;

    #[test]
    fn new_user_normalizes_email_and_drops_blank_phone() {
        let user = User::new("  Alice@Example.COM ", Some("  "), "hash".into(), Utc::now()).unwrap();
        assert_eq!(user.email, "alice@example.com");
        assert_eq!(user.phone, None);
        assert!(!user.is_deleted());
    }

    #[test]
    fn invalid_email_rejected() {
        let result = User::new("invalid-email", None, "hash".into(), Utc::now());
        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn anonymous_has_no_grants() {
        let anon = User::anonymous();
        assert!(anon.is_anonymous());
        assert!(anon.roles.is_empty());
        assert!(anon.permissions.is_empty());
    }

    #[test]
    fn holds_role_matches_by_name() {
        let mut user = User::new("bob@example.com", None, "hash".into(), Utc::now()).unwrap();
        user.roles
            .push(RoleDefinition::new("editor", vec![Permission::new("edit")]));

        assert!(user.holds_role(&Role::new("editor")));
        assert!(!user.holds_role(&Role::new("admin")));
    }

    #[test]
    fn password_hash_is_never_serialized() {
        let user = User::new("carol@example.com", None, "secret-hash".into(), Utc::now()).unwrap();
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
    }
}
