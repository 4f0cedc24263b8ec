//! Postgres-backed credential store.
//!
//! ## Error Mapping
//!
//! | Failure | Postgres code | `StoreError` |
//! |---|---|---|
//! | Unique violation (duplicate e-mail, role name, secret) | `23505` | `Conflict` |
//! | Foreign-key violation (unknown user/role/permission) | `23503` | `NotFound` |
//! | Anything else | - | `Backend` |
//!
//! Grant tables carry a `position` column so roles and direct grants come back
//! in assignment order.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use gatehouse_auth::{
    AccessToken, CredentialStore, Permission, PermissionDefinition, Role, RoleDefinition,
    StoreError, TokenSecret, User,
};
use gatehouse_core::{PermissionId, RoleId, TokenId, UserId};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id            UUID PRIMARY KEY,
        email         TEXT NOT NULL UNIQUE,
        phone         TEXT UNIQUE,
        password_hash TEXT NOT NULL,
        created_at    TIMESTAMPTZ NOT NULL,
        updated_at    TIMESTAMPTZ NOT NULL,
        deleted_at    TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS permissions (
        id   UUID PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS roles (
        id   UUID PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS role_permissions (
        role_id       UUID NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
        permission_id UUID NOT NULL REFERENCES permissions(id) ON DELETE CASCADE,
        position      INTEGER NOT NULL,
        PRIMARY KEY (role_id, permission_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_roles (
        user_id  UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        role_id  UUID NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
        position BIGINT NOT NULL,
        PRIMARY KEY (user_id, role_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_permissions (
        user_id       UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        permission_id UUID NOT NULL REFERENCES permissions(id) ON DELETE CASCADE,
        position      BIGINT NOT NULL,
        PRIMARY KEY (user_id, permission_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS access_tokens (
        id         UUID PRIMARY KEY,
        secret     TEXT NOT NULL UNIQUE,
        user_id    UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        created_at TIMESTAMPTZ NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS access_tokens_expires_at_idx ON access_tokens (expires_at)",
    "CREATE INDEX IF NOT EXISTS access_tokens_user_id_idx ON access_tokens (user_id)",
    r#"
    CREATE TABLE IF NOT EXISTS activities (
        id                BIGSERIAL PRIMARY KEY,
        actor_id          UUID NOT NULL,
        target_id         UUID NOT NULL,
        target_collection TEXT NOT NULL,
        action            TEXT NOT NULL,
        previous_state    JSONB,
        occurred_at       TIMESTAMPTZ NOT NULL
    )
    "#,
];

/// Create every table and index the store and the audit writer need.
/// Idempotent.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), StoreError> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PostgresCredentialStore {
    pool: Arc<PgPool>,
}

impl PostgresCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    async fn hydrate(&self, row: PgRow) -> Result<User, StoreError> {
        let user_id: Uuid = get(&row, "id")?;

        let role_rows = sqlx::query(
            r#"
            SELECT r.id, r.name
            FROM user_roles ur
            JOIN roles r ON r.id = ur.role_id
            WHERE ur.user_id = $1
            ORDER BY ur.position ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_user_roles", e))?;

        let role_ids: Vec<Uuid> = role_rows
            .iter()
            .map(|r| get(r, "id"))
            .collect::<Result<_, _>>()?;
        let mut role_permissions = self.role_permissions(&role_ids).await?;

        let mut roles = Vec::with_capacity(role_rows.len());
        for r in &role_rows {
            let id: Uuid = get(r, "id")?;
            roles.push(RoleDefinition {
                id: RoleId::from_uuid(id),
                name: Role::new(get::<String>(r, "name")?),
                permissions: role_permissions.remove(&id).unwrap_or_default(),
            });
        }

        let grant_rows = sqlx::query(
            r#"
            SELECT p.id, p.name
            FROM user_permissions up
            JOIN permissions p ON p.id = up.permission_id
            WHERE up.user_id = $1
            ORDER BY up.position ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_user_permissions", e))?;

        let permissions = grant_rows
            .iter()
            .map(permission_from_row)
            .collect::<Result<_, _>>()?;

        Ok(User {
            id: UserId::from_uuid(user_id),
            email: get(&row, "email")?,
            phone: get(&row, "phone")?,
            password_hash: get(&row, "password_hash")?,
            roles,
            permissions,
            created_at: get(&row, "created_at")?,
            updated_at: get(&row, "updated_at")?,
            deleted_at: get(&row, "deleted_at")?,
        })
    }

    /// Ordered permission names per role.
    async fn role_permissions(
        &self,
        role_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<Permission>>, StoreError> {
        if role_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT rp.role_id, p.name
            FROM role_permissions rp
            JOIN permissions p ON p.id = rp.permission_id
            WHERE rp.role_id = ANY($1)
            ORDER BY rp.role_id, rp.position ASC
            "#,
        )
        .bind(role_ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_role_permissions", e))?;

        let mut out: HashMap<Uuid, Vec<Permission>> = HashMap::new();
        for row in &rows {
            out.entry(get(row, "role_id")?)
                .or_default()
                .push(Permission::new(get::<String>(row, "name")?));
        }
        Ok(out)
    }

    async fn role_from_row(&self, row: &PgRow) -> Result<RoleDefinition, StoreError> {
        let id: Uuid = get(row, "id")?;
        let mut perms = self.role_permissions(&[id]).await?;
        Ok(RoleDefinition {
            id: RoleId::from_uuid(id),
            name: Role::new(get::<String>(row, "name")?),
            permissions: perms.remove(&id).unwrap_or_default(),
        })
    }

    async fn touch_user(
        &self,
        operation: &str,
        sql: &str,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(sql)
            .bind(user_id.as_uuid())
            .bind(now)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("user {user_id}")));
        }
        Ok(())
    }
}

const USER_COLUMNS: &str =
    "id, email, phone, password_hash, created_at, updated_at, deleted_at";

#[async_trait::async_trait]
impl CredentialStore for PostgresCredentialStore {
    #[instrument(skip(self, secret), err)]
    async fn find_token_by_secret(&self, secret: &str) -> Result<Option<AccessToken>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, secret, user_id, created_at, expires_at
            FROM access_tokens
            WHERE secret = $1
            "#,
        )
        .bind(secret)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_token_by_secret", e))?;

        row.as_ref().map(token_from_row).transpose()
    }

    #[instrument(skip(self, token), fields(token_id = %token.id, user_id = %token.user_id), err)]
    async fn insert_token(&self, token: &AccessToken) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO access_tokens (id, secret, user_id, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(token.id.as_uuid())
        .bind(token.secret.as_str())
        .bind(token.user_id.as_uuid())
        .bind(token.created_at)
        .bind(token.expires_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_token", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn update_token_expiry(
        &self,
        token_id: TokenId,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE access_tokens SET expires_at = GREATEST(expires_at, $2) WHERE id = $1",
        )
        .bind(token_id.as_uuid())
        .bind(expires_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_token_expiry", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("token {token_id}")));
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn delete_token(&self, token_id: TokenId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM access_tokens WHERE id = $1")
            .bind(token_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_token", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn delete_tokens_by_user_id(&self, user_id: UserId) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM access_tokens WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_tokens_by_user_id", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self), err)]
    async fn purge_expired_tokens(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM access_tokens WHERE expires_at < $1")
            .bind(now)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("purge_expired_tokens", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self), err)]
    async fn find_user_by_id(&self, user_id: UserId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(user_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_user_by_id", e))?;

        match row {
            Some(row) => self.hydrate(row).await.map(Some),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, identifier), err)]
    async fn find_user_by_email_or_phone(
        &self,
        identifier: &str,
    ) -> Result<Option<User>, StoreError> {
        let identifier = identifier.trim();
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = lower($1) OR phone = $1 LIMIT 1"
        ))
        .bind(identifier)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_user_by_email_or_phone", e))?;

        match row {
            Some(row) => self.hydrate(row).await.map(Some),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, user), fields(user_id = %user.id), err)]
    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query(
            r#"
            INSERT INTO users (id, email, phone, password_hash, created_at, updated_at, deleted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(user.id.as_uuid())
        .bind(&user.email)
        .bind(user.phone.as_deref())
        .bind(&user.password_hash)
        .bind(user.created_at)
        .bind(user.updated_at)
        .bind(user.deleted_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_user", e))?;

        for (position, role) in user.roles.iter().enumerate() {
            sqlx::query("INSERT INTO user_roles (user_id, role_id, position) VALUES ($1, $2, $3)")
                .bind(user.id.as_uuid())
                .bind(role.id.as_uuid())
                .bind(position as i64)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("insert_user_roles", e))?;
        }
        for (position, grant) in user.permissions.iter().enumerate() {
            sqlx::query(
                "INSERT INTO user_permissions (user_id, permission_id, position) VALUES ($1, $2, $3)",
            )
            .bind(user.id.as_uuid())
            .bind(grant.id.as_uuid())
            .bind(position as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_user_permissions", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self, password_hash), err)]
    async fn update_password_hash(
        &self,
        user_id: UserId,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE users SET password_hash = $2, updated_at = $3 WHERE id = $1")
                .bind(user_id.as_uuid())
                .bind(password_hash)
                .bind(now)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("update_password_hash", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("user {user_id}")));
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn soft_delete_user(&self, user_id: UserId, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.touch_user(
            "soft_delete_user",
            "UPDATE users SET deleted_at = $2, updated_at = $2 WHERE id = $1",
            user_id,
            now,
        )
        .await
    }

    #[instrument(skip(self), err)]
    async fn restore_user(&self, user_id: UserId, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.touch_user(
            "restore_user",
            "UPDATE users SET deleted_at = NULL, updated_at = $2 WHERE id = $1",
            user_id,
            now,
        )
        .await
    }

    #[instrument(skip(self, permission), fields(name = %permission.name), err)]
    async fn insert_permission(&self, permission: &PermissionDefinition) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO permissions (id, name) VALUES ($1, $2)")
            .bind(permission.id.as_uuid())
            .bind(permission.name.as_str())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert_permission", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn find_permission_by_id(
        &self,
        permission_id: PermissionId,
    ) -> Result<Option<PermissionDefinition>, StoreError> {
        let row = sqlx::query("SELECT id, name FROM permissions WHERE id = $1")
            .bind(permission_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_permission_by_id", e))?;
        row.as_ref().map(permission_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_permissions(&self) -> Result<Vec<PermissionDefinition>, StoreError> {
        let rows = sqlx::query("SELECT id, name FROM permissions ORDER BY name ASC")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_permissions", e))?;
        rows.iter().map(permission_from_row).collect()
    }

    #[instrument(skip(self, role), fields(name = %role.name), err)]
    async fn insert_role(&self, role: &RoleDefinition) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query("INSERT INTO roles (id, name) VALUES ($1, $2)")
            .bind(role.id.as_uuid())
            .bind(role.name.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_role", e))?;

        for (position, name) in role.permissions.iter().enumerate() {
            let result = sqlx::query(
                r#"
                INSERT INTO role_permissions (role_id, permission_id, position)
                SELECT $1, id, $3 FROM permissions WHERE name = $2
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(role.id.as_uuid())
            .bind(name.as_str())
            .bind(position as i32)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_role_permissions", e))?;

            if result.rows_affected() == 0
                && !role.permissions[..position].contains(name)
            {
                // Dropping `tx` rolls the role back.
                return Err(StoreError::NotFound(format!("permission '{name}'")));
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self), err)]
    async fn find_role_by_id(&self, role_id: RoleId) -> Result<Option<RoleDefinition>, StoreError> {
        let row = sqlx::query("SELECT id, name FROM roles WHERE id = $1")
            .bind(role_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_role_by_id", e))?;
        match row {
            Some(row) => self.role_from_row(&row).await.map(Some),
            None => Ok(None),
        }
    }

    #[instrument(skip(self), err)]
    async fn find_role_by_name(&self, name: &Role) -> Result<Option<RoleDefinition>, StoreError> {
        let row = sqlx::query("SELECT id, name FROM roles WHERE name = $1")
            .bind(name.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_role_by_name", e))?;
        match row {
            Some(row) => self.role_from_row(&row).await.map(Some),
            None => Ok(None),
        }
    }

    #[instrument(skip(self), err)]
    async fn list_roles(&self) -> Result<Vec<RoleDefinition>, StoreError> {
        let rows = sqlx::query("SELECT id, name FROM roles ORDER BY name ASC")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_roles", e))?;

        let ids: Vec<Uuid> = rows
            .iter()
            .map(|r| get(r, "id"))
            .collect::<Result<_, _>>()?;
        let mut perms = self.role_permissions(&ids).await?;

        rows.iter()
            .map(|row| {
                let id: Uuid = get(row, "id")?;
                Ok(RoleDefinition {
                    id: RoleId::from_uuid(id),
                    name: Role::new(get::<String>(row, "name")?),
                    permissions: perms.remove(&id).unwrap_or_default(),
                })
            })
            .collect()
    }

    #[instrument(skip(self), err)]
    async fn assign_role(&self, user_id: UserId, role_id: RoleId) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO user_roles (user_id, role_id, position)
            SELECT $1, $2, COALESCE(MAX(position), -1) + 1 FROM user_roles WHERE user_id = $1
            ON CONFLICT (user_id, role_id) DO NOTHING
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(role_id.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("assign_role", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn unassign_role(&self, user_id: UserId, role_id: RoleId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM user_roles WHERE user_id = $1 AND role_id = $2")
            .bind(user_id.as_uuid())
            .bind(role_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("unassign_role", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn grant_permission(
        &self,
        user_id: UserId,
        permission_id: PermissionId,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO user_permissions (user_id, permission_id, position)
            SELECT $1, $2, COALESCE(MAX(position), -1) + 1 FROM user_permissions WHERE user_id = $1
            ON CONFLICT (user_id, permission_id) DO NOTHING
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(permission_id.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("grant_permission", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn revoke_permission(
        &self,
        user_id: UserId,
        permission_id: PermissionId,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM user_permissions WHERE user_id = $1 AND permission_id = $2")
            .bind(user_id.as_uuid())
            .bind(permission_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("revoke_permission", e))?;
        Ok(())
    }
}

// SQLx row helpers

fn get<T>(row: &PgRow, column: &str) -> Result<T, StoreError>
where
    T: for<'r> sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::backend(format!("failed to decode column '{column}': {e}")))
}

fn token_from_row(row: &PgRow) -> Result<AccessToken, StoreError> {
    Ok(AccessToken {
        id: TokenId::from_uuid(get(row, "id")?),
        secret: TokenSecret::new(get::<String>(row, "secret")?),
        user_id: UserId::from_uuid(get(row, "user_id")?),
        created_at: get(row, "created_at")?,
        expires_at: get(row, "expires_at")?,
    })
}

fn permission_from_row(row: &PgRow) -> Result<PermissionDefinition, StoreError> {
    Ok(PermissionDefinition {
        id: PermissionId::from_uuid(get(row, "id")?),
        name: Permission::new(get::<String>(row, "name")?),
    })
}

pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                Some("23503") => StoreError::NotFound(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}
