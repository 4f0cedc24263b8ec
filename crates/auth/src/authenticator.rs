//! Bearer validation with sliding expiry.
//!
//! One authenticator serves both endpoint kinds; the caller picks the
//! [`AuthMode`]. Every way a credential can be unusable (no header, wrong
//! scheme, unknown secret, expired, owner gone or soft-deleted) collapses into
//! the same outcome: `Unauthenticated` in `Required` mode, the anonymous
//! context in `Optional` mode. Storage faults are not credential problems and
//! surface as `Storage` in both modes.

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use crate::{AccessToken, AuthContext, AuthError, CredentialStore, TokenConfig, User};

pub const BEARER_SCHEME: &str = "Bearer";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Reject callers without a usable credential.
    Required,
    /// Downgrade callers without a usable credential to anonymous.
    Optional,
}

/// Why a credential was not usable. Logged, never returned to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    MissingHeader,
    MalformedHeader,
    UnknownToken,
    Expired,
    OwnerMissing,
    OwnerDeleted,
}

/// Extract the token from an `Authorization` header value.
///
/// The value must split on a single space into exactly two parts, the first
/// being `Bearer` and the second non-empty.
pub fn parse_bearer(header: &str) -> Option<&str> {
    let mut parts = header.split(' ');
    let (scheme, token) = (parts.next()?, parts.next()?);
    if parts.next().is_some() || scheme != BEARER_SCHEME || token.is_empty() {
        return None;
    }
    Some(token)
}

#[derive(Debug, Clone)]
pub struct TokenAuthenticator<S> {
    store: S,
    config: TokenConfig,
}

impl<S: CredentialStore> TokenAuthenticator<S> {
    pub fn new(store: S, config: TokenConfig) -> Self {
        Self { store, config }
    }

    pub async fn authenticate(
        &self,
        header: Option<&str>,
        mode: AuthMode,
    ) -> Result<AuthContext, AuthError> {
        self.authenticate_at(header, mode, Utc::now()).await
    }

    #[instrument(skip(self, header), err)]
    pub async fn authenticate_at(
        &self,
        header: Option<&str>,
        mode: AuthMode,
        now: DateTime<Utc>,
    ) -> Result<AuthContext, AuthError> {
        match self.validate(header, now).await? {
            Ok((user, token)) => Ok(AuthContext::authenticated(user, token)),
            Err(reason) => {
                debug!(?reason, ?mode, "credential rejected");
                match mode {
                    AuthMode::Required => Err(AuthError::Unauthenticated),
                    AuthMode::Optional => Ok(AuthContext::anonymous()),
                }
            }
        }
    }

    /// Outer `Err` is a storage fault; inner `Err` is a rejected credential.
    async fn validate(
        &self,
        header: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Result<(User, AccessToken), Rejection>, AuthError> {
        let Some(header) = header else {
            return Ok(Err(Rejection::MissingHeader));
        };
        let Some(secret) = parse_bearer(header) else {
            return Ok(Err(Rejection::MalformedHeader));
        };

        let Some(mut token) = self
            .store
            .find_token_by_secret(secret)
            .await
            .map_err(AuthError::Storage)?
        else {
            return Ok(Err(Rejection::UnknownToken));
        };
        if token.is_expired(now) {
            return Ok(Err(Rejection::Expired));
        }

        let user = match self
            .store
            .find_user_by_id(token.user_id)
            .await
            .map_err(AuthError::Storage)?
        {
            None => return Ok(Err(Rejection::OwnerMissing)),
            Some(user) if user.is_deleted() => return Ok(Err(Rejection::OwnerDeleted)),
            Some(user) => user,
        };

        self.refresh(&mut token, now).await;
        Ok(Ok((user, token)))
    }

    /// Best effort: a failed write only shortens the session, so it is logged
    /// and the request proceeds.
    async fn refresh(&self, token: &mut AccessToken, now: DateTime<Utc>) {
        token.refresh(now, self.config.ttl());
        if let Err(e) = self
            .store
            .update_token_expiry(token.id, token.expires_at)
            .await
        {
            warn!(token_id = %token.id, error = %e, "failed to persist refreshed token expiry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryCredentialStore, Permission, PermissionDefinition, RoleDefinition};
    use chrono::Duration;
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-03-01T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    struct Fixture {
        store: Arc<InMemoryCredentialStore>,
        auth: TokenAuthenticator<Arc<InMemoryCredentialStore>>,
        user: User,
        token: AccessToken,
    }

    impl Fixture {
        fn header(&self) -> String {
            format!("Bearer {}", self.token.secret.as_str())
        }
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryCredentialStore::new());
        for name in ["edit", "publish", "delete"] {
            store
                .insert_permission(&PermissionDefinition::new(name))
                .await
                .unwrap();
        }
        let editor = RoleDefinition::new(
            "editor",
            vec![Permission::new("edit"), Permission::new("publish")],
        );
        store.insert_role(&editor).await.unwrap();

        let user = User::new("hal@example.com", None, "h".into(), t0()).unwrap();
        store.insert_user(&user).await.unwrap();
        store.assign_role(user.id, editor.id).await.unwrap();

        let config = TokenConfig::from_minutes(600).unwrap();
        let token = AccessToken::mint(user.id, t0(), config.ttl());
        store.insert_token(&token).await.unwrap();

        Fixture {
            auth: TokenAuthenticator::new(store.clone(), config),
            store,
            user,
            token,
        }
    }

    #[test]
    fn bearer_parsing_is_strict() {
        assert_eq!(parse_bearer("Bearer abc"), Some("abc"));
        assert_eq!(parse_bearer("Bearer"), None);
        assert_eq!(parse_bearer("Bearer "), None);
        assert_eq!(parse_bearer("bearer abc"), None);
        assert_eq!(parse_bearer("Basic abc"), None);
        assert_eq!(parse_bearer("Bearer  abc"), None);
        assert_eq!(parse_bearer("Bearer abc def"), None);
        assert_eq!(parse_bearer(""), None);
    }

    #[tokio::test]
    async fn valid_token_authenticates_with_resolved_permissions() {
        let f = fixture().await;
        let ctx = f
            .auth
            .authenticate_at(Some(&f.header()), AuthMode::Required, t0())
            .await
            .unwrap();

        assert_eq!(ctx.user_id(), f.user.id);
        assert_eq!(ctx.permissions.names(), vec!["edit", "publish"]);
    }

    #[tokio::test]
    async fn direct_grant_follows_role_permissions() {
        let f = fixture().await;
        let delete = f
            .store
            .list_permissions()
            .await
            .unwrap()
            .into_iter()
            .find(|p| p.name.as_str() == "delete")
            .unwrap();
        f.store.grant_permission(f.user.id, delete.id).await.unwrap();

        let ctx = f
            .auth
            .authenticate_at(Some(&f.header()), AuthMode::Required, t0())
            .await
            .unwrap();
        assert_eq!(ctx.permissions.names(), vec!["edit", "publish", "delete"]);
    }

    #[tokio::test]
    async fn sliding_window_scenario() {
        let f = fixture().await;
        let header = f.header();

        let at_5h = t0() + Duration::hours(5);
        for _ in 0..3 {
            let ctx = f
                .auth
                .authenticate_at(Some(&header), AuthMode::Required, at_5h)
                .await
                .unwrap();
            assert_eq!(ctx.token.expires_at, t0() + Duration::hours(15));
        }
        let stored = f
            .store
            .find_token_by_secret(f.token.secret.as_str())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.expires_at, t0() + Duration::hours(15));

        let late = t0() + Duration::hours(15) + Duration::seconds(1);
        let err = f
            .auth
            .authenticate_at(Some(&header), AuthMode::Required, late)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Unauthenticated));
    }

    #[tokio::test]
    async fn expired_token_is_rejected_without_refresh() {
        let f = fixture().await;
        let past = t0() + Duration::hours(10) + Duration::seconds(1);

        let err = f
            .auth
            .authenticate_at(Some(&f.header()), AuthMode::Required, past)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Unauthenticated));

        let stored = f
            .store
            .find_token_by_secret(f.token.secret.as_str())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.expires_at, f.token.expires_at);
    }

    #[tokio::test]
    async fn every_rejection_looks_the_same() {
        let f = fixture().await;
        let unknown = format!("Bearer {}", "0".repeat(64));
        let headers: Vec<Option<&str>> = vec![None, Some("Token abc"), Some(unknown.as_str())];

        for header in headers {
            let required = f
                .auth
                .authenticate_at(header, AuthMode::Required, t0())
                .await
                .unwrap_err();
            assert_eq!(required.to_string(), "unauthenticated");

            let optional = f
                .auth
                .authenticate_at(header, AuthMode::Optional, t0())
                .await
                .unwrap();
            assert!(optional.is_anonymous());
        }
    }

    #[tokio::test]
    async fn soft_deleted_owner_cannot_authenticate() {
        let f = fixture().await;
        f.store.soft_delete_user(f.user.id, t0()).await.unwrap();

        let required = f
            .auth
            .authenticate_at(Some(&f.header()), AuthMode::Required, t0())
            .await;
        assert!(matches!(required, Err(AuthError::Unauthenticated)));

        let optional = f
            .auth
            .authenticate_at(Some(&f.header()), AuthMode::Optional, t0())
            .await
            .unwrap();
        assert!(optional.is_anonymous());
    }

    #[tokio::test]
    async fn token_of_missing_owner_is_rejected() {
        let f = fixture().await;
        let orphan = AccessToken::mint(gatehouse_core::UserId::new(), t0(), Duration::hours(1));
        f.store.insert_token(&orphan).await.unwrap();

        let header = format!("Bearer {}", orphan.secret.as_str());
        let result = f
            .auth
            .authenticate_at(Some(&header), AuthMode::Required, t0())
            .await;
        assert!(matches!(result, Err(AuthError::Unauthenticated)));
    }

    #[tokio::test]
    async fn refresh_write_failure_does_not_fail_the_request() {
        let f = fixture().await;
        f.store.fail_expiry_updates(true);

        let ctx = f
            .auth
            .authenticate_at(
                Some(&f.header()),
                AuthMode::Required,
                t0() + Duration::hours(1),
            )
            .await
            .unwrap();
        assert_eq!(ctx.user_id(), f.user.id);
    }

    #[tokio::test]
    async fn lookup_failure_is_a_storage_error_in_both_modes() {
        let f = fixture().await;
        f.store.fail_lookups(true);

        for mode in [AuthMode::Required, AuthMode::Optional] {
            let result = f.auth.authenticate_at(Some(&f.header()), mode, t0()).await;
            assert!(matches!(result, Err(AuthError::Storage(_))));
        }
    }

    #[tokio::test]
    async fn missing_header_in_optional_mode_skips_the_store() {
        let f = fixture().await;
        f.store.fail_lookups(true);

        let ctx = f
            .auth
            .authenticate_at(None, AuthMode::Optional, t0())
            .await
            .unwrap();
        assert!(ctx.is_anonymous());
    }
}
