use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use gatehouse_core::UserId;

use crate::{AccessToken, AuthError, CredentialStore, TokenConfig};

/// Mints and persists access tokens for already-verified identities.
#[derive(Debug, Clone)]
pub struct TokenIssuer<S> {
    store: S,
    config: TokenConfig,
}

impl<S: CredentialStore> TokenIssuer<S> {
    pub fn new(store: S, config: TokenConfig) -> Self {
        Self { store, config }
    }

    pub async fn issue(&self, user_id: UserId) -> Result<AccessToken, AuthError> {
        self.issue_at(user_id, Utc::now()).await
    }

    /// Issue with an explicit clock reading.
    ///
    /// When persisting fails the token is dropped: an identity is never
    /// handed a bearer the store does not know about.
    #[instrument(skip(self), err)]
    pub async fn issue_at(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<AccessToken, AuthError> {
        let token = AccessToken::mint(user_id, now, self.config.ttl());
        self.store
            .insert_token(&token)
            .await
            .map_err(AuthError::Storage)?;

        info!(%user_id, token_id = %token.id, expires_at = %token.expires_at, "access token issued");
        Ok(token)
    }
}
