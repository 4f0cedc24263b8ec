use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use gatehouse_core::{PermissionId, RoleId, TokenId, UserId};

use super::{CredentialStore, StoreError};
use crate::{AccessToken, PermissionDefinition, Role, RoleDefinition, User};

/// A user row as stored: grants are kept as ordered id lists and joined on read.
#[derive(Debug, Clone)]
struct UserRow {
    user: User,
    role_ids: Vec<RoleId>,
    permission_ids: Vec<PermissionId>,
}

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<UserId, UserRow>,
    roles: HashMap<RoleId, RoleDefinition>,
    permissions: HashMap<PermissionId, PermissionDefinition>,
    tokens: HashMap<TokenId, AccessToken>,
}

impl Tables {
    fn hydrate(&self, row: &UserRow) -> User {
        let mut user = row.user.clone();
        user.roles = row
            .role_ids
            .iter()
            .filter_map(|id| self.roles.get(id).cloned())
            .collect();
        user.permissions = row
            .permission_ids
            .iter()
            .filter_map(|id| self.permissions.get(id).cloned())
            .collect();
        user
    }

    fn user_row_mut(&mut self, user_id: UserId) -> Result<&mut UserRow, StoreError> {
        self.users
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::NotFound(format!("user {user_id}")))
    }
}

/// Failure switches for exercising degraded-storage paths.
#[derive(Debug, Default)]
struct Faults {
    lookups: AtomicBool,
    expiry_updates: AtomicBool,
    role_assignments: AtomicBool,
    bulk_invalidations: AtomicUsize,
}

/// In-memory credential store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    tables: RwLock<Tables>,
    faults: Faults,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make token and user lookups fail with a backend error.
    pub fn fail_lookups(&self, fail: bool) {
        self.faults.lookups.store(fail, Ordering::SeqCst);
    }

    /// Make `update_token_expiry` fail with a backend error.
    pub fn fail_expiry_updates(&self, fail: bool) {
        self.faults.expiry_updates.store(fail, Ordering::SeqCst);
    }

    /// Make `assign_role` fail with a backend error.
    pub fn fail_role_assignments(&self, fail: bool) {
        self.faults.role_assignments.store(fail, Ordering::SeqCst);
    }

    /// Fail the next `n` calls to `delete_tokens_by_user_id`.
    pub fn fail_next_bulk_invalidations(&self, n: usize) {
        self.faults.bulk_invalidations.store(n, Ordering::SeqCst);
    }

    /// Number of tokens currently stored, expired ones included.
    pub fn token_count(&self) -> usize {
        self.tables.read().map(|t| t.tokens.len()).unwrap_or(0)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::backend("credential store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|_| StoreError::backend("credential store lock poisoned"))
    }

    fn check_lookup(&self) -> Result<(), StoreError> {
        if self.faults.lookups.load(Ordering::SeqCst) {
            return Err(StoreError::backend("injected lookup failure"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn find_token_by_secret(&self, secret: &str) -> Result<Option<AccessToken>, StoreError> {
        self.check_lookup()?;
        let tables = self.read()?;
        Ok(tables
            .tokens
            .values()
            .find(|t| t.secret.as_str() == secret)
            .cloned())
    }

    async fn insert_token(&self, token: &AccessToken) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        if tables.tokens.values().any(|t| t.secret == token.secret) {
            return Err(StoreError::Conflict("token secret already exists".into()));
        }
        tables.tokens.insert(token.id, token.clone());
        Ok(())
    }

    async fn update_token_expiry(
        &self,
        token_id: TokenId,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if self.faults.expiry_updates.load(Ordering::SeqCst) {
            return Err(StoreError::backend("injected expiry update failure"));
        }
        let mut tables = self.write()?;
        let token = tables
            .tokens
            .get_mut(&token_id)
            .ok_or_else(|| StoreError::NotFound(format!("token {token_id}")))?;
        token.expires_at = token.expires_at.max(expires_at);
        Ok(())
    }

    async fn delete_token(&self, token_id: TokenId) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        tables.tokens.remove(&token_id);
        Ok(())
    }

    async fn delete_tokens_by_user_id(&self, user_id: UserId) -> Result<u64, StoreError> {
        let pending = self.faults.bulk_invalidations.load(Ordering::SeqCst);
        if pending > 0 {
            self.faults
                .bulk_invalidations
                .store(pending - 1, Ordering::SeqCst);
            return Err(StoreError::backend("injected bulk invalidation failure"));
        }

        let mut tables = self.write()?;
        let before = tables.tokens.len();
        tables.tokens.retain(|_, t| t.user_id != user_id);
        Ok((before - tables.tokens.len()) as u64)
    }

    async fn purge_expired_tokens(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tables = self.write()?;
        let before = tables.tokens.len();
        tables.tokens.retain(|_, t| !t.is_expired(now));
        Ok((before - tables.tokens.len()) as u64)
    }

    async fn find_user_by_id(&self, user_id: UserId) -> Result<Option<User>, StoreError> {
        self.check_lookup()?;
        let tables = self.read()?;
        Ok(tables.users.get(&user_id).map(|row| tables.hydrate(row)))
    }

    async fn find_user_by_email_or_phone(
        &self,
        identifier: &str,
    ) -> Result<Option<User>, StoreError> {
        self.check_lookup()?;
        let needle = identifier.trim();
        let email = needle.to_lowercase();
        let tables = self.read()?;
        Ok(tables
            .users
            .values()
            .find(|row| row.user.email == email || row.user.phone.as_deref() == Some(needle))
            .map(|row| tables.hydrate(row)))
    }

    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        let taken = tables.users.values().any(|row| {
            row.user.email == user.email
                || (user.phone.is_some() && row.user.phone == user.phone)
        });
        if taken {
            return Err(StoreError::Conflict("email or phone already registered".into()));
        }

        let row = UserRow {
            role_ids: user.roles.iter().map(|r| r.id).collect(),
            permission_ids: user.permissions.iter().map(|p| p.id).collect(),
            user: User {
                roles: Vec::new(),
                permissions: Vec::new(),
                ..user.clone()
            },
        };
        tables.users.insert(user.id, row);
        Ok(())
    }

    async fn update_password_hash(
        &self,
        user_id: UserId,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        let row = tables.user_row_mut(user_id)?;
        row.user.password_hash = password_hash.to_string();
        row.user.updated_at = now;
        Ok(())
    }

    async fn soft_delete_user(&self, user_id: UserId, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        let row = tables.user_row_mut(user_id)?;
        row.user.deleted_at = Some(now);
        row.user.updated_at = now;
        Ok(())
    }

    async fn restore_user(&self, user_id: UserId, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        let row = tables.user_row_mut(user_id)?;
        row.user.deleted_at = None;
        row.user.updated_at = now;
        Ok(())
    }

    async fn insert_permission(&self, permission: &PermissionDefinition) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        if tables.permissions.values().any(|p| p.name == permission.name) {
            return Err(StoreError::Conflict(format!(
                "permission '{}' already exists",
                permission.name
            )));
        }
        tables.permissions.insert(permission.id, permission.clone());
        Ok(())
    }

    async fn find_permission_by_id(
        &self,
        permission_id: PermissionId,
    ) -> Result<Option<PermissionDefinition>, StoreError> {
        let tables = self.read()?;
        Ok(tables.permissions.get(&permission_id).cloned())
    }

    async fn list_permissions(&self) -> Result<Vec<PermissionDefinition>, StoreError> {
        let tables = self.read()?;
        let mut out: Vec<_> = tables.permissions.values().cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn insert_role(&self, role: &RoleDefinition) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        if tables.roles.values().any(|r| r.name == role.name) {
            return Err(StoreError::Conflict(format!("role '{}' already exists", role.name)));
        }
        if let Some(missing) = role
            .permissions
            .iter()
            .find(|name| !tables.permissions.values().any(|p| &p.name == *name))
        {
            return Err(StoreError::NotFound(format!("permission '{missing}'")));
        }
        tables.roles.insert(role.id, role.clone());
        Ok(())
    }

    async fn find_role_by_id(&self, role_id: RoleId) -> Result<Option<RoleDefinition>, StoreError> {
        let tables = self.read()?;
        Ok(tables.roles.get(&role_id).cloned())
    }

    async fn find_role_by_name(&self, name: &Role) -> Result<Option<RoleDefinition>, StoreError> {
        let tables = self.read()?;
        Ok(tables.roles.values().find(|r| r.name == *name).cloned())
    }

    async fn list_roles(&self) -> Result<Vec<RoleDefinition>, StoreError> {
        let tables = self.read()?;
        let mut out: Vec<_> = tables.roles.values().cloned().collect();
        out.sort_by(|a, b| a.name.as_str().cmp(b.name.as_str()));
        Ok(out)
    }

    async fn assign_role(&self, user_id: UserId, role_id: RoleId) -> Result<(), StoreError> {
        if self.faults.role_assignments.load(Ordering::SeqCst) {
            return Err(StoreError::backend("injected role assignment failure"));
        }
        let mut tables = self.write()?;
        if !tables.roles.contains_key(&role_id) {
            return Err(StoreError::NotFound(format!("role {role_id}")));
        }
        let row = tables.user_row_mut(user_id)?;
        if !row.role_ids.contains(&role_id) {
            row.role_ids.push(role_id);
        }
        Ok(())
    }

    async fn unassign_role(&self, user_id: UserId, role_id: RoleId) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        let row = tables.user_row_mut(user_id)?;
        row.role_ids.retain(|id| *id != role_id);
        Ok(())
    }

    async fn grant_permission(
        &self,
        user_id: UserId,
        permission_id: PermissionId,
    ) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        if !tables.permissions.contains_key(&permission_id) {
            return Err(StoreError::NotFound(format!("permission {permission_id}")));
        }
        let row = tables.user_row_mut(user_id)?;
        if !row.permission_ids.contains(&permission_id) {
            row.permission_ids.push(permission_id);
        }
        Ok(())
    }

    async fn revoke_permission(
        &self,
        user_id: UserId,
        permission_id: PermissionId,
    ) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        let row = tables.user_row_mut(user_id)?;
        row.permission_ids.retain(|id| *id != permission_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Permission;
    use chrono::Duration;

    async fn seeded() -> (InMemoryCredentialStore, User, RoleDefinition) {
        let store = InMemoryCredentialStore::new();
        for name in ["edit", "publish"] {
            store
                .insert_permission(&PermissionDefinition::new(name))
                .await
                .unwrap();
        }
        let role = RoleDefinition::new(
            "editor",
            vec![Permission::new("edit"), Permission::new("publish")],
        );
        store.insert_role(&role).await.unwrap();

        let user = User::new("dana@example.com", Some("+15550100"), "h".into(), Utc::now()).unwrap();
        store.insert_user(&user).await.unwrap();
        (store, user, role)
    }

    #[tokio::test]
    async fn users_are_hydrated_with_roles_in_assignment_order() {
        let (store, user, editor) = seeded().await;
        let viewer = RoleDefinition::new("viewer", vec![Permission::new("edit")]);
        store.insert_role(&viewer).await.unwrap();

        store.assign_role(user.id, viewer.id).await.unwrap();
        store.assign_role(user.id, editor.id).await.unwrap();
        store.assign_role(user.id, viewer.id).await.unwrap();

        let loaded = store.find_user_by_id(user.id).await.unwrap().unwrap();
        let names: Vec<_> = loaded.role_names().map(|r| r.as_str()).collect();
        assert_eq!(names, vec!["viewer", "editor"]);
    }

    #[tokio::test]
    async fn lookup_by_email_is_case_insensitive_and_phone_exact() {
        let (store, user, _) = seeded().await;
        let by_email = store
            .find_user_by_email_or_phone("DANA@example.com")
            .await
            .unwrap();
        let by_phone = store.find_user_by_email_or_phone("+15550100").await.unwrap();

        assert_eq!(by_email.map(|u| u.id), Some(user.id));
        assert_eq!(by_phone.map(|u| u.id), Some(user.id));
        assert!(store
            .find_user_by_email_or_phone("nobody@example.com")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let (store, _, _) = seeded().await;
        let dup = User::new("dana@example.com", None, "h".into(), Utc::now()).unwrap();
        assert!(matches!(
            store.insert_user(&dup).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn role_with_unknown_permission_is_rejected() {
        let store = InMemoryCredentialStore::new();
        let role = RoleDefinition::new("ghost", vec![Permission::new("haunt")]);
        assert!(matches!(
            store.insert_role(&role).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn expiry_update_keeps_the_later_value() {
        let (store, user, _) = seeded().await;
        let now = Utc::now();
        let token = AccessToken::mint(user.id, now, Duration::hours(10));
        store.insert_token(&token).await.unwrap();

        store
            .update_token_expiry(token.id, now + Duration::hours(1))
            .await
            .unwrap();

        let stored = store
            .find_token_by_secret(token.secret.as_str())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.expires_at, token.expires_at);
    }

    #[tokio::test]
    async fn bulk_delete_only_touches_the_owner() {
        let (store, user, _) = seeded().await;
        let other = UserId::new();
        let now = Utc::now();
        for owner in [user.id, user.id, other] {
            store
                .insert_token(&AccessToken::mint(owner, now, Duration::hours(1)))
                .await
                .unwrap();
        }

        assert_eq!(store.delete_tokens_by_user_id(user.id).await.unwrap(), 2);
        assert_eq!(store.token_count(), 1);
    }

    #[tokio::test]
    async fn purge_removes_only_expired_tokens() {
        let (store, user, _) = seeded().await;
        let now = Utc::now();
        store
            .insert_token(&AccessToken::mint(user.id, now - Duration::hours(2), Duration::hours(1)))
            .await
            .unwrap();
        store
            .insert_token(&AccessToken::mint(user.id, now, Duration::hours(1)))
            .await
            .unwrap();

        assert_eq!(store.purge_expired_tokens(now).await.unwrap(), 1);
        assert_eq!(store.token_count(), 1);
    }

    #[tokio::test]
    async fn injected_bulk_failures_are_consumed() {
        let (store, user, _) = seeded().await;
        store.fail_next_bulk_invalidations(2);

        assert!(store.delete_tokens_by_user_id(user.id).await.is_err());
        assert!(store.delete_tokens_by_user_id(user.id).await.is_err());
        assert!(store.delete_tokens_by_user_id(user.id).await.is_ok());
    }

    #[tokio::test]
    async fn soft_delete_and_restore_toggle_marker() {
        let (store, user, _) = seeded().await;
        store.soft_delete_user(user.id, Utc::now()).await.unwrap();
        assert!(store.find_user_by_id(user.id).await.unwrap().unwrap().is_deleted());

        store.restore_user(user.id, Utc::now()).await.unwrap();
        assert!(!store.find_user_by_id(user.id).await.unwrap().unwrap().is_deleted());
    }
}
