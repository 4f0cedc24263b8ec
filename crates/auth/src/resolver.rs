//! Flattening of roles and direct grants into an effective permission set.

use std::collections::HashSet;

use serde::{Serialize, Serializer};
use tracing::instrument;

use gatehouse_core::UserId;

use crate::{AuthError, CredentialStore, Permission, User};

/// Ordered, de-duplicated permissions a user effectively holds.
///
/// Order is first-seen: roles in assignment order, each role's permissions
/// in order, then direct grants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectivePermissions {
    ordered: Vec<Permission>,
    index: HashSet<Permission>,
}

impl EffectivePermissions {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn contains(&self, permission: &Permission) -> bool {
        self.index.contains(permission)
    }

    pub fn as_slice(&self) -> &[Permission] {
        &self.ordered
    }

    pub fn names(&self) -> Vec<String> {
        self.ordered.iter().map(|p| p.as_str().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    fn push(&mut self, permission: &Permission) {
        if self.index.insert(permission.clone()) {
            self.ordered.push(permission.clone());
        }
    }
}

impl<'a> FromIterator<&'a Permission> for EffectivePermissions {
    fn from_iter<I: IntoIterator<Item = &'a Permission>>(iter: I) -> Self {
        let mut out = Self::default();
        for p in iter {
            out.push(p);
        }
        out
    }
}

impl Serialize for EffectivePermissions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.ordered.serialize(serializer)
    }
}

/// Compute the effective permissions of `user`. Pure; linear in the number
/// of role edges plus direct grants.
pub fn resolve(user: &User) -> EffectivePermissions {
    user.roles
        .iter()
        .flat_map(|role| role.permissions.iter())
        .chain(user.permissions.iter().map(|grant| &grant.name))
        .collect()
}

/// Store-backed resolver: loads the user, then flattens.
#[derive(Debug, Clone)]
pub struct PermissionResolver<S> {
    store: S,
}

impl<S: CredentialStore> PermissionResolver<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    #[instrument(skip(self), err)]
    pub async fn resolve_user(&self, user_id: UserId) -> Result<EffectivePermissions, AuthError> {
        let user = self
            .store
            .find_user_by_id(user_id)
            .await?
            .ok_or(AuthError::NotFound("user"))?;
        Ok(resolve(&user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryCredentialStore, PermissionDefinition, RoleDefinition};
    use chrono::Utc;
    use proptest::prelude::*;

    fn user_with(roles: Vec<RoleDefinition>, grants: Vec<PermissionDefinition>) -> User {
        let mut user = User::new("erin@example.com", None, "h".into(), Utc::now()).unwrap();
        user.roles = roles;
        user.permissions = grants;
        user
    }

    fn perms(names: &[&'static str]) -> Vec<Permission> {
        names.iter().map(|n| Permission::from_static(n)).collect()
    }

    #[test]
    fn roles_then_direct_grants_first_seen_order() {
        let user = user_with(
            vec![
                RoleDefinition::new("editor", perms(&["edit", "publish"])),
                RoleDefinition::new("reviewer", perms(&["publish", "comment"])),
            ],
            vec![
                PermissionDefinition::new("delete"),
                PermissionDefinition::new("edit"),
            ],
        );

        let effective = resolve(&user);
        assert_eq!(effective.names(), vec!["edit", "publish", "comment", "delete"]);
    }

    #[test]
    fn role_plus_direct_grant_flow() {
        let user = user_with(
            vec![RoleDefinition::new("editor", perms(&["edit", "publish"]))],
            vec![PermissionDefinition::new("delete")],
        );

        let effective = resolve(&user);
        assert_eq!(effective.names(), vec!["edit", "publish", "delete"]);
        assert!(effective.contains(&Permission::new("delete")));
        assert!(!effective.contains(&Permission::new("admin")));
    }

    #[test]
    fn anonymous_resolves_to_nothing() {
        assert!(resolve(&User::anonymous()).is_empty());
    }

    #[test]
    fn serializes_as_plain_list() {
        let user = user_with(vec![], vec![PermissionDefinition::new("share")]);
        let json = serde_json::to_value(resolve(&user)).unwrap();
        assert_eq!(json, serde_json::json!(["share"]));
    }

    #[tokio::test]
    async fn resolve_user_reports_missing_user() {
        let resolver = PermissionResolver::new(InMemoryCredentialStore::new());
        let err = resolver.resolve_user(UserId::new()).await.unwrap_err();
        assert!(matches!(err, AuthError::NotFound("user")));
    }

    const POOL: [&str; 6] = ["a", "b", "c", "d", "e", "f"];

    proptest! {
        #[test]
        fn resolved_set_has_no_duplicates_and_covers_every_grant(
            role_perms in prop::collection::vec(prop::collection::vec(0usize..POOL.len(), 0..5), 0..4),
            direct in prop::collection::vec(0usize..POOL.len(), 0..5),
        ) {
            let roles = role_perms
                .iter()
                .enumerate()
                .map(|(i, ps)| {
                    RoleDefinition::new(
                        format!("role-{i}"),
                        ps.iter().map(|&p| Permission::from_static(POOL[p])).collect(),
                    )
                })
                .collect();
            let grants = direct
                .iter()
                .map(|&p| PermissionDefinition::new(POOL[p]))
                .collect();
            let user = user_with(roles, grants);

            let effective = resolve(&user);
            let unique: HashSet<_> = effective.as_slice().iter().collect();
            prop_assert_eq!(unique.len(), effective.len());

            for role in &user.roles {
                for p in &role.permissions {
                    prop_assert!(effective.contains(p));
                }
            }
            for grant in &user.permissions {
                prop_assert!(effective.contains(&grant.name));
            }
        }
    }
}
