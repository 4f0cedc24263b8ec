//! Default role/permission catalog installed into an empty store.

use chrono::Utc;
use tracing::info;

use gatehouse_auth::{
    AuthError, CredentialStore, DEFAULT_ROLE, PasswordHasher, Permission, PermissionDefinition,
    Role, RoleDefinition, StoreError, User,
};
use gatehouse_core::UserId;

use crate::config::AdminSeed;

const CRUD_VERBS: [&str; 4] = ["view", "create", "update", "delete"];
const CRUD_SUBJECTS: [&str; 3] = ["user", "role", "permission"];
const ADMIN_CAPABILITIES: [&str; 4] = [
    "grant role",
    "revoke role",
    "grant permission",
    "revoke permission",
];
const MEMBER_CAPABILITIES: [&str; 4] = ["comment", "reply", "share", "report"];

pub const MODERATOR_ROLE: &str = "moderator";
pub const ADMIN_ROLE: &str = "admin";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub permissions: usize,
    pub roles: usize,
}

/// Every permission name in the catalog, in a stable order.
pub fn catalog_permissions() -> Vec<String> {
    let crud = CRUD_SUBJECTS
        .iter()
        .flat_map(|subject| CRUD_VERBS.iter().map(move |verb| format!("{verb} {subject}")));
    crud.chain(ADMIN_CAPABILITIES.iter().map(|c| c.to_string()))
        .chain(MEMBER_CAPABILITIES.iter().map(|c| c.to_string()))
        .collect()
}

/// Roles of the catalog with their ordered permissions.
pub fn catalog_roles() -> Vec<RoleDefinition> {
    let member: Vec<Permission> = MEMBER_CAPABILITIES
        .iter()
        .map(|c| Permission::new(c.to_string()))
        .collect();

    let mut moderator = vec![Permission::new("view user")];
    moderator.extend(member.iter().cloned());

    let admin = catalog_permissions().into_iter().map(Permission::new).collect();

    vec![
        RoleDefinition::new(DEFAULT_ROLE.as_str().to_string(), member),
        RoleDefinition::new(MODERATOR_ROLE, moderator),
        RoleDefinition::new(ADMIN_ROLE, admin),
    ]
}

/// Install the catalog unless the store already has roles. Entries that
/// already exist are skipped.
pub async fn seed_catalog<S: CredentialStore>(store: &S) -> Result<SeedReport, StoreError> {
    if !store.list_roles().await?.is_empty() {
        info!("role catalog already present; skipping seed");
        return Ok(SeedReport::default());
    }

    let mut report = SeedReport::default();
    for name in catalog_permissions() {
        if inserted(store.insert_permission(&PermissionDefinition::new(name)).await)? {
            report.permissions += 1;
        }
    }
    for role in catalog_roles() {
        if inserted(store.insert_role(&role).await)? {
            report.roles += 1;
        }
    }

    info!(permissions = report.permissions, roles = report.roles, "role catalog seeded");
    Ok(report)
}

/// Ensure the bootstrap administrator exists and holds the `admin` role.
///
/// An existing account keeps its password; only the role is (re)assigned.
pub async fn seed_admin<S: CredentialStore>(
    store: &S,
    hasher: &dyn PasswordHasher,
    admin: &AdminSeed,
) -> Result<UserId, AuthError> {
    let role = store
        .find_role_by_name(&Role::from_static(ADMIN_ROLE))
        .await?
        .ok_or(AuthError::NotFound("admin role"))?;

    let user = match store.find_user_by_email_or_phone(&admin.email).await? {
        Some(user) => user,
        None => {
            let user = User::new(&admin.email, None, hasher.hash(admin.password())?, Utc::now())?;
            match store.insert_user(&user).await {
                Ok(()) => {
                    info!(user_id = %user.id, email = %user.email, "bootstrap administrator created");
                    user
                }
                Err(StoreError::Conflict(_)) => store
                    .find_user_by_email_or_phone(&admin.email)
                    .await?
                    .ok_or(AuthError::NotFound("user"))?,
                Err(e) => return Err(e.into()),
            }
        }
    };

    store.assign_role(user.id, role.id).await?;
    Ok(user.id)
}

/// A concurrent seeder winning the race is not an error.
fn inserted(result: Result<(), StoreError>) -> Result<bool, StoreError> {
    match result {
        Ok(()) => Ok(true),
        Err(StoreError::Conflict(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_auth::{
        Argon2Hasher, InMemoryCredentialStore, PasswordHashConfig, permissions::catalog, resolve,
    };

    #[test]
    fn catalog_covers_every_permission_the_engine_checks() {
        let names = catalog_permissions();
        for required in [
            catalog::VIEW_USER,
            catalog::UPDATE_USER,
            catalog::DELETE_USER,
            catalog::VIEW_ROLE,
            catalog::GRANT_ROLE,
            catalog::REVOKE_ROLE,
            catalog::VIEW_PERMISSION,
            catalog::GRANT_PERMISSION,
            catalog::REVOKE_PERMISSION,
        ] {
            assert!(names.iter().any(|n| n == required.as_str()), "{required}");
        }
    }

    #[tokio::test]
    async fn seeding_is_skipped_once_roles_exist() {
        let store = InMemoryCredentialStore::new();

        let first = seed_catalog(&store).await.unwrap();
        assert_eq!(first.roles, 3);
        assert_eq!(first.permissions, 12 + 4 + 4);

        let second = seed_catalog(&store).await.unwrap();
        assert_eq!(second, SeedReport::default());
    }

    #[tokio::test]
    async fn moderator_can_view_users_but_not_grant() {
        let store = InMemoryCredentialStore::new();
        seed_catalog(&store).await.unwrap();

        let moderator = store
            .find_role_by_name(&Role::new(MODERATOR_ROLE))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(moderator.permissions[0], catalog::VIEW_USER);
        assert!(!moderator.permissions.contains(&catalog::GRANT_ROLE));
    }

    #[tokio::test]
    async fn bootstrap_admin_is_created_once_with_the_admin_role() {
        let store = InMemoryCredentialStore::new();
        seed_catalog(&store).await.unwrap();
        let hasher = Argon2Hasher::new(PasswordHashConfig::minimal()).unwrap();
        let seed = AdminSeed::new("root@example.com", "s3cret");

        let id = seed_admin(&store, &hasher, &seed).await.unwrap();
        let again = seed_admin(&store, &hasher, &seed).await.unwrap();
        assert_eq!(id, again);

        let admin = store.find_user_by_id(id).await.unwrap().unwrap();
        assert_eq!(
            admin.role_names().map(|r| r.as_str()).collect::<Vec<_>>(),
            vec![ADMIN_ROLE]
        );
        assert!(hasher.verify("s3cret", &admin.password_hash).unwrap());
        assert!(resolve(&admin).contains(&catalog::GRANT_ROLE));
    }

    #[tokio::test]
    async fn bootstrap_admin_needs_the_catalog() {
        let store = InMemoryCredentialStore::new();
        let hasher = Argon2Hasher::new(PasswordHashConfig::minimal()).unwrap();

        let err = seed_admin(&store, &hasher, &AdminSeed::new("root@example.com", "pw"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NotFound(_)));
    }
}
